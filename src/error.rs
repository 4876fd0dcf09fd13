use std::convert::Infallible;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum UswidError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not find uSWID magic signature")]
    MagicNotFound,

    #[error("no known header version: {0} (expected 2)")]
    UnsupportedHeaderVersion(u8),

    #[error("truncated uSWID container at offset {offset}: need {needed} bytes, have {available}")]
    TruncatedContainer {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("decoding CBOR record at stream offset {offset}: {source}")]
    RecordDecode {
        offset: usize,
        #[source]
        source: minicbor::decode::Error,
    },

    #[error("payload ended after {consumed} of {declared} declared bytes")]
    ShortPayload { declared: usize, consumed: usize },

    #[error("file extension not supported: {0:?}")]
    UnsupportedExtension(String),

    #[error("unknown file format: {0}")]
    UnknownFormat(String),

    #[error("input data empty")]
    EmptyInput,

    #[error("parent file should only contain a single CoSWID tag, found {0}")]
    MultipleIdentitiesInParent(usize),

    #[error("expected a single CoSWID tag, found {0}")]
    ExpectedSingleIdentity(usize),

    #[error("zlib stream malformed: {0}")]
    Compression(#[source] io::Error),

    #[error("payload of {0} bytes does not fit in a uSWID container")]
    PayloadTooLarge(usize),

    #[error("CBOR encode error: {0}")]
    CborEncode(#[from] minicbor::encode::Error<Infallible>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("parsing {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: Box<UswidError>,
    },

    #[error("I/O error: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl UswidError {
    /// Annotate an error with the input it came from.
    pub fn in_source<P: AsRef<Path>>(self, path: P) -> Self {
        UswidError::Source {
            path: path.as_ref().to_path_buf(),
            source: Box::new(self),
        }
    }

    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        UswidError::InvalidField {
            field,
            value: value.into(),
        }
    }

    pub(crate) fn xml<E: std::fmt::Display>(err: E) -> Self {
        UswidError::Xml(err.to_string())
    }

    /// The innermost error, with any source annotations stripped.
    pub fn root(&self) -> &UswidError {
        match self {
            UswidError::Source { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_annotation_wraps_cause() {
        let err = UswidError::MagicNotFound.in_source("firmware.bin");
        assert_eq!(
            err.to_string(),
            "parsing firmware.bin: could not find uSWID magic signature"
        );
        assert!(matches!(err.root(), UswidError::MagicNotFound));
        assert!(std::error::Error::source(&err).is_some());
    }
}
