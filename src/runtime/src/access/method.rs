//! Access methods: runtime handles for access specifications.

use std::io::Read;

use ocm_core::error::Result;

use crate::blob::BlobAccess;

/// Content access obtained for an access specification.
pub trait AccessMethod: BlobAccess {
    /// Kind of the access specification this method was created for.
    fn access_kind(&self) -> &str;

    fn as_blob_access(&self) -> &dyn BlobAccess;

    /// Release resources held by the method.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Access method backed by a blob.
///
/// Every blob operation is forwarded to the wrapped blob.
pub struct BlobAccessMethod {
    kind: String,
    blob: Box<dyn BlobAccess>,
}

impl BlobAccessMethod {
    pub fn new(kind: &str, blob: impl BlobAccess + 'static) -> Self {
        Self {
            kind: kind.to_string(),
            blob: Box::new(blob),
        }
    }

    pub fn boxed(kind: &str, blob: impl BlobAccess + 'static) -> Box<dyn AccessMethod> {
        Box::new(Self::new(kind, blob))
    }
}

impl std::fmt::Debug for BlobAccessMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobAccessMethod")
            .field("kind", &self.kind)
            .field("mime_type", &self.blob.mime_type())
            .finish()
    }
}

impl BlobAccess for BlobAccessMethod {
    fn get(&self) -> Result<Vec<u8>> {
        self.blob.get()
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>> {
        self.blob.reader()
    }

    fn mime_type(&self) -> &str {
        self.blob.mime_type()
    }

    fn digest(&self) -> Result<String> {
        self.blob.digest()
    }

    fn size(&self) -> Result<i64> {
        self.blob.size()
    }
}

impl AccessMethod for BlobAccessMethod {
    fn access_kind(&self) -> &str {
        &self.kind
    }

    fn as_blob_access(&self) -> &dyn BlobAccess {
        self
    }
}
