use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::warn;

use crate::error::UswidError;

/// Representations a collection of tags can be read from or written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    /// CoSWID JSON, one object or an array of objects
    Json,
    /// SWID XML, one or more sibling `SoftwareIdentity` elements
    Xml,
    /// Concatenated CoSWID CBOR items
    Cbor,
    /// uSWID container, possibly embedded in a larger binary
    Uswid,
    /// pkg-config style `Key: Value` file
    PkgConfig,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::Xml => "xml",
            FileFormat::Cbor => "cbor",
            FileFormat::Uswid => "uswid",
            FileFormat::PkgConfig => "pc",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "xml" | "swidtag" => Some(FileFormat::Xml),
            "cbor" | "coswid" => Some(FileFormat::Cbor),
            "uswid" => Some(FileFormat::Uswid),
            "pc" => Some(FileFormat::PkgConfig),
            _ => None,
        }
    }

    /// Format of an input file. Anything unrecognized is scanned for a uSWID
    /// container, since firmware images rarely have a telling extension.
    pub fn for_input<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let ext = path.extension().and_then(|ext| ext.to_str());
        match ext.and_then(Self::from_extension) {
            Some(format) => format,
            None => {
                warn!(
                    path = %path.display(),
                    "unrecognized file extension, searching for uSWID data"
                );
                FileFormat::Uswid
            }
        }
    }

    /// Format of an output file.
    pub fn for_output<P: AsRef<Path>>(path: P) -> Result<Self, UswidError> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");
        match Self::from_extension(ext) {
            Some(format) if format.is_writable() => Ok(format),
            _ => Err(UswidError::UnsupportedExtension(ext.to_string())),
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, FileFormat::PkgConfig)
    }
}

impl FromStr for FileFormat {
    type Err = UswidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| UswidError::UnknownFormat(s.to_string()))
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
