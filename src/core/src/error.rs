use std::fmt;

use thiserror::Error;

use crate::field::ValidationErrors;

/// OCM error types
#[derive(Error, Debug)]
pub enum OcmError {
    /// Requested element does not exist
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },

    /// Type name not registered in the scheme consulted
    #[error("unknown {kind} {name:?}")]
    Unknown { kind: String, name: String },

    /// Malformed specification or reference syntax
    #[error("invalid {kind} {name:?}: {reason}")]
    Invalid {
        kind: String,
        name: String,
        reason: String,
    },

    /// Element already present and overwrite not requested
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Backend capability gap
    #[error("{what} not supported")]
    NotSupported { what: String },

    /// Operation not implemented by this backend
    #[error("{what} not implemented")]
    NotImplemented { what: String },

    /// Use after close
    #[error("{kind} {name:?} is closed")]
    Closed { kind: String, name: String },

    /// Component version graph contains a cycle
    #[error("component version recursion: {}", chain.join(" -> "))]
    Recursion { chain: Vec<String> },

    /// Field-path addressed validation failures
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Several independent failures
    #[error("{0}")]
    Multi(MultiError),

    /// Error annotated with the operation it happened in
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        source: Box<OcmError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// OCI registry communication error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse classification used for kind-based error inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unknown,
    Invalid,
    AlreadyExists,
    NotSupported,
    NotImplemented,
    Closed,
    Recursion,
    Validation,
    Other,
}

impl OcmError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn unknown(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Unknown {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn invalid(
        kind: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            kind: kind.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported { what: what.into() }
    }

    pub fn not_implemented(what: impl Into<String>) -> Self {
        Self::NotImplemented { what: what.into() }
    }

    pub fn closed(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Closed {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Annotate the error with the operation (and element) it occurred in.
    /// The original error stays reachable through `source()` and `kind()`.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Self::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classification of this error, looking through `Wrapped` layers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unknown { .. } => ErrorKind::Unknown,
            Self::Invalid { .. } => ErrorKind::Invalid,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::Closed { .. } => ErrorKind::Closed,
            Self::Recursion { .. } => ErrorKind::Recursion,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Wrapped { source, .. } => source.kind(),
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Innermost error below any `Wrapped` layers.
    pub fn root(&self) -> &OcmError {
        match self {
            Self::Wrapped { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for OcmError {
    fn from(err: serde_json::Error) -> Self {
        OcmError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OcmError {
    fn from(err: serde_yaml::Error) -> Self {
        OcmError::Serialization(err.to_string())
    }
}

/// Extension for adding context to results.
pub trait ResultExt<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| e.wrap(context()))
    }
}

/// Aggregates failures of independent sub-operations so that one
/// failure never hides another.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<OcmError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: OcmError) {
        self.errors.push(err);
    }

    /// Record the error of a result, if any.
    pub fn add<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[OcmError] {
        &self.errors
    }

    /// `Ok` when nothing failed, the error itself for a single failure,
    /// an aggregate otherwise.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(OcmError::Multi(self)),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors: ", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// Result type alias for OCM operations
pub type Result<T> = std::result::Result<T, OcmError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_not_found_display() {
        let err = OcmError::not_found("component version", "acme.org/app:1.0.0");
        assert_eq!(
            err.to_string(),
            "component version \"acme.org/app:1.0.0\" not found"
        );
    }

    #[test]
    fn test_recursion_display() {
        let err = OcmError::Recursion {
            chain: vec!["a:1".to_string(), "b:1".to_string(), "a:1".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "component version recursion: a:1 -> b:1 -> a:1"
        );
    }

    #[test]
    fn test_wrap_keeps_kind_and_source() {
        let err = OcmError::closed("session", "").wrap("lookup component");
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert!(err.to_string().starts_with("lookup component: "));
        assert!(err.source().is_some());
        assert!(matches!(err.root(), OcmError::Closed { .. }));
    }

    #[test]
    fn test_io_not_found_kind() {
        let err: OcmError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_multi_error_into_result() {
        assert!(MultiError::new().into_result().is_ok());

        let mut single = MultiError::new();
        single.push(OcmError::not_supported("listing"));
        assert!(matches!(
            single.into_result(),
            Err(OcmError::NotSupported { .. })
        ));

        let mut multi = MultiError::new();
        multi.push(OcmError::Other("first".to_string()));
        assert_eq!(multi.add::<()>(Err(OcmError::Other("second".to_string()))), None);
        assert_eq!(multi.add(Ok(3)), Some(3));
        assert_eq!(multi.len(), 2);
        let err = multi.into_result().unwrap_err();
        assert_eq!(err.to_string(), "2 errors: first; second");
    }

    #[test]
    fn test_result_ext_context() {
        let res: Result<()> = Err(OcmError::not_found("blob", "sha256:00"));
        let err = res.context(|| "reading resource".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "reading resource: blob \"sha256:00\" not found");
    }

    #[test]
    fn test_serialization_from_json() {
        let err: OcmError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, OcmError::Serialization(_)));
    }
}
