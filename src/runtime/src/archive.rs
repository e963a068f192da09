//! File system layouts used by the archive based repositories.
//!
//! A layout is a directory tree that is either used in place or packed as
//! a `tar` or `tar.gz` file. Packed layouts are unpacked into a staging
//! directory on open and packed again on close.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ocm_core::error::{OcmError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tar::{Archive, Builder};
use tempfile::TempDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// On-disk format of a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Directory,
    Tar,
    Tgz,
}

impl FileFormat {
    /// Detect the format of an existing path.
    pub fn detect(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(FileFormat::Directory);
        }
        let mut magic = [0u8; 2];
        let mut file = File::open(path)
            .map_err(|e| OcmError::Io(e).wrap(format!("opening {}", path.display())))?;
        let n = file.read(&mut magic)?;
        if n == 2 && magic == GZIP_MAGIC {
            Ok(FileFormat::Tgz)
        } else {
            Ok(FileFormat::Tar)
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileFormat::Directory => "directory",
            FileFormat::Tar => "tar",
            FileFormat::Tgz => "tgz",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FileFormat {
    type Err = OcmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "directory" => Ok(FileFormat::Directory),
            "tar" => Ok(FileFormat::Tar),
            "tgz" | "tar.gz" => Ok(FileFormat::Tgz),
            other => Err(OcmError::invalid("file format", other, "expected directory, tar or tgz")),
        }
    }
}

/// How a layout is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[serde(rename = "readonly")]
    ReadOnly,
    #[default]
    #[serde(rename = "readwrite")]
    ReadWrite,
    /// Read-write, creating the layout if it does not exist
    Create,
}

impl AccessMode {
    pub fn is_readonly(&self) -> bool {
        matches!(self, AccessMode::ReadOnly)
    }
}

/// An opened layout.
#[derive(Debug)]
pub struct ArchiveDir {
    path: PathBuf,
    format: FileFormat,
    mode: AccessMode,
    root: PathBuf,
    _staging: Option<TempDir>,
    closed: Mutex<bool>,
}

impl ArchiveDir {
    /// Open the layout at `path`.
    ///
    /// `format` is only used when a new layout is created; existing layouts
    /// keep the format found on disk.
    pub fn open(path: &Path, mode: AccessMode, format: Option<FileFormat>) -> Result<Self> {
        if path.exists() {
            let detected = FileFormat::detect(path)?;
            return match detected {
                FileFormat::Directory => Ok(Self::new(path, detected, mode, path.to_path_buf(), None)),
                _ => {
                    let staging = TempDir::new()?;
                    unpack(path, detected, staging.path())?;
                    let root = staging.path().to_path_buf();
                    Ok(Self::new(path, detected, mode, root, Some(staging)))
                }
            };
        }

        if mode != AccessMode::Create {
            return Err(OcmError::not_found("file", path.display().to_string()));
        }

        let format = format.unwrap_or_default();
        tracing::debug!(path = %path.display(), format = %format, "creating layout");
        match format {
            FileFormat::Directory => {
                std::fs::create_dir_all(path).map_err(|e| {
                    OcmError::Io(e).wrap(format!("creating directory {}", path.display()))
                })?;
                Ok(Self::new(path, format, mode, path.to_path_buf(), None))
            }
            _ => {
                let staging = TempDir::new()?;
                let root = staging.path().to_path_buf();
                Ok(Self::new(path, format, mode, root, Some(staging)))
            }
        }
    }

    fn new(
        path: &Path,
        format: FileFormat,
        mode: AccessMode,
        root: PathBuf,
        staging: Option<TempDir>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            format,
            mode,
            root,
            _staging: staging,
            closed: Mutex::new(false),
        }
    }

    /// Directory holding the unpacked content.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn is_readonly(&self) -> bool {
        self.mode.is_readonly()
    }

    /// Write packed layouts back to their file. Repeated calls are no-ops.
    pub fn close(&self) -> Result<()> {
        let mut closed = self.closed.lock();
        if *closed {
            return Ok(());
        }
        *closed = true;
        if self.is_readonly() || self.format == FileFormat::Directory {
            return Ok(());
        }
        pack(&self.root, self.format, &self.path)?;
        tracing::debug!(path = %self.path.display(), format = %self.format, "packed layout");
        Ok(())
    }
}

fn unpack(path: &Path, format: FileFormat, target: &Path) -> Result<()> {
    let file = File::open(path)
        .map_err(|e| OcmError::Io(e).wrap(format!("opening archive {}", path.display())))?;
    let result = match format {
        FileFormat::Tgz => Archive::new(GzDecoder::new(file)).unpack(target),
        _ => Archive::new(file).unpack(target),
    };
    result.map_err(|e| OcmError::Io(e).wrap(format!("extracting archive {}", path.display())))
}

fn pack(root: &Path, format: FileFormat, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)
        .map_err(|e| OcmError::Io(e).wrap(format!("creating archive {}", path.display())))?;
    let result = match format {
        FileFormat::Tgz => {
            let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
            builder.append_dir_all(".", root)?;
            builder.into_inner()?.finish().map(|_| ())
        }
        _ => {
            let mut builder = Builder::new(file);
            builder.append_dir_all(".", root)?;
            builder.into_inner().map(|_| ())
        }
    };
    result.map_err(|e| OcmError::Io(e).wrap(format!("writing archive {}", path.display())))
}
