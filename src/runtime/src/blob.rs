//! Blob access: bytes plus media type, with lazily computed digest and size.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ocm_core::error::{OcmError, Result};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Size reported while the blob has not been read yet.
pub const UNKNOWN_SIZE: i64 = -1;

/// Digest reported while the blob has not been read yet.
pub const UNKNOWN_DIGEST: &str = "";

pub const MIME_OCTET: &str = "application/octet-stream";

/// Digest in OCI notation (`sha256:<hex>`).
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Access to a blob's content and metadata.
pub trait BlobAccess: Send + Sync {
    /// Complete content.
    fn get(&self) -> Result<Vec<u8>>;

    /// Streaming access to the content.
    fn reader(&self) -> Result<Box<dyn Read + Send>>;

    fn mime_type(&self) -> &str;

    /// Content digest, computed on first use if unknown.
    fn digest(&self) -> Result<String>;

    /// Content size, computed on first use if unknown.
    fn size(&self) -> Result<i64>;
}

/// Digest and size cached after the first full read.
#[derive(Debug)]
pub struct BlobInfo {
    state: Mutex<(String, i64)>,
}

impl Default for BlobInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

impl BlobInfo {
    pub fn unknown() -> Self {
        Self {
            state: Mutex::new((UNKNOWN_DIGEST.to_string(), UNKNOWN_SIZE)),
        }
    }

    pub fn known(digest: &str, size: i64) -> Self {
        Self {
            state: Mutex::new((digest.to_string(), size)),
        }
    }

    pub fn is_known(&self) -> bool {
        let s = self.state.lock();
        s.1 != UNKNOWN_SIZE && s.0 != UNKNOWN_DIGEST
    }

    /// Record digest and size of fully read content.
    pub fn observe(&self, data: &[u8]) {
        let mut s = self.state.lock();
        if s.1 == UNKNOWN_SIZE || s.0 == UNKNOWN_DIGEST {
            *s = (sha256_digest(data), data.len() as i64);
        }
    }

    /// Cached values, reading the content via `fetch` once if unknown.
    pub fn resolve(&self, fetch: impl FnOnce() -> Result<Vec<u8>>) -> Result<(String, i64)> {
        if !self.is_known() {
            let data = fetch()?;
            self.observe(&data);
        }
        Ok(self.state.lock().clone())
    }
}

/// Blob held in memory.
#[derive(Debug, Clone)]
pub struct MemoryBlob {
    data: Arc<Vec<u8>>,
    mime_type: String,
}

impl MemoryBlob {
    pub fn new(data: impl Into<Vec<u8>>, mime_type: &str) -> Self {
        Self {
            data: Arc::new(data.into()),
            mime_type: mime_type.to_string(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl BlobAccess for MemoryBlob {
    fn get(&self) -> Result<Vec<u8>> {
        Ok(self.data.as_ref().clone())
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.data.as_ref().clone())))
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.data))
    }

    fn size(&self) -> Result<i64> {
        Ok(self.data.len() as i64)
    }
}

/// Blob backed by a file.
#[derive(Debug)]
pub struct FileBlob {
    path: PathBuf,
    mime_type: String,
    info: BlobInfo,
}

impl FileBlob {
    pub fn new(path: impl Into<PathBuf>, mime_type: &str) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.to_string(),
            info: BlobInfo::unknown(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .map_err(|e| OcmError::Io(e).wrap(format!("reading blob {}", self.path.display())))
    }
}

impl BlobAccess for FileBlob {
    fn get(&self) -> Result<Vec<u8>> {
        let data = self.read_all()?;
        self.info.observe(&data);
        Ok(data)
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>> {
        let file = File::open(&self.path)
            .map_err(|e| OcmError::Io(e).wrap(format!("opening blob {}", self.path.display())))?;
        Ok(Box::new(file))
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn digest(&self) -> Result<String> {
        Ok(self.info.resolve(|| self.read_all())?.0)
    }

    fn size(&self) -> Result<i64> {
        Ok(self.info.resolve(|| self.read_all())?.1)
    }
}

type FetchFn = Box<dyn Fn() -> Result<Vec<u8>> + Send + Sync>;

/// Blob whose content is fetched on demand, e.g. from a remote store.
///
/// Digest and size may be given up front; otherwise they are taken from
/// the first full read and cached.
pub struct LazyBlob {
    fetch: FetchFn,
    mime_type: String,
    info: BlobInfo,
}

impl LazyBlob {
    pub fn new<F>(mime_type: &str, fetch: F) -> Self
    where
        F: Fn() -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            fetch: Box::new(fetch),
            mime_type: mime_type.to_string(),
            info: BlobInfo::unknown(),
        }
    }

    pub fn with_info(mut self, digest: &str, size: i64) -> Self {
        self.info = BlobInfo::known(digest, size);
        self
    }
}

impl std::fmt::Debug for LazyBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyBlob")
            .field("mime_type", &self.mime_type)
            .field("info", &self.info)
            .finish()
    }
}

impl BlobAccess for LazyBlob {
    fn get(&self) -> Result<Vec<u8>> {
        let data = (self.fetch)()?;
        self.info.observe(&data);
        Ok(data)
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.get()?)))
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn digest(&self) -> Result<String> {
        Ok(self.info.resolve(|| (self.fetch)())?.0)
    }

    fn size(&self) -> Result<i64> {
        Ok(self.info.resolve(|| (self.fetch)())?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HELLO_DIGEST: &str =
        "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_digest() {
        assert_eq!(sha256_digest(b"hello"), HELLO_DIGEST);
    }

    #[test]
    fn test_memory_blob() {
        let blob = MemoryBlob::new("hello", "text/plain");
        assert_eq!(blob.get().unwrap(), b"hello");
        assert_eq!(blob.mime_type(), "text/plain");
        assert_eq!(blob.size().unwrap(), 5);
        assert_eq!(blob.digest().unwrap(), HELLO_DIGEST);
        let mut s = String::new();
        blob.reader().unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, "hello");
    }

    #[test]
    fn test_file_blob() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"hello").unwrap();
        let blob = FileBlob::new(&path, MIME_OCTET);
        assert_eq!(blob.size().unwrap(), 5);
        assert_eq!(blob.digest().unwrap(), HELLO_DIGEST);
        assert_eq!(blob.get().unwrap(), b"hello");
    }

    #[test]
    fn test_lazy_blob_caches_info_after_first_read() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let blob = LazyBlob::new("text/plain", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(b"hello".to_vec())
        });

        assert_eq!(blob.size().unwrap(), 5);
        assert_eq!(blob.digest().unwrap(), HELLO_DIGEST);
        assert_eq!(blob.size().unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_blob_known_info_needs_no_read() {
        let blob = LazyBlob::new("text/plain", || Err(OcmError::Other("offline".to_string())))
            .with_info(HELLO_DIGEST, 5);
        assert_eq!(blob.size().unwrap(), 5);
        assert_eq!(blob.digest().unwrap(), HELLO_DIGEST);
        assert!(blob.get().is_err());
    }

    #[test]
    fn test_get_fills_info() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let blob = LazyBlob::new("text/plain", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(b"hello".to_vec())
        });
        blob.get().unwrap();
        assert_eq!(blob.digest().unwrap(), HELLO_DIGEST);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
