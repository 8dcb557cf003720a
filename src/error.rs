use std::path::PathBuf;

/// error type for jimage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad jimage magic: {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported jimage version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("truncated container: {0}")]
    Truncated(String),

    #[error("invalid jimage attribute kind: {0}")]
    InvalidAttributeKind(u8),

    #[error("truncated attribute stream at offset {0}")]
    TruncatedAttribute(usize),

    #[error("invalid string table offset: {0}")]
    InvalidStringOffset(u32),

    #[error("malformed container: {0}")]
    Malformed(String),

    #[error("missing preview directory: {0}")]
    MissingPreviewDirectory(String),

    #[error("unsupported decompressor: {0}")]
    UnsupportedCompression(String),

    #[error("invalid module references: {0}")]
    InvalidModuleReferences(String),

    #[error("cannot merge module references for {first} and {second}")]
    ModuleReferenceMismatch { first: String, second: String },

    #[error("image reader is closed")]
    Closed,

    #[error("image reader already closed")]
    AlreadyClosed,

    #[error("not a resource: {0}")]
    NotAResource(String),

    #[error("directory children already set: {0}")]
    DirectoryComplete(String),

    #[error("invalid preview mode: {0}")]
    InvalidPreviewMode(String),

    #[error("no image given and JAVA_HOME is not set")]
    NoImage,

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// true for errors meaning the container itself cannot be trusted
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::BadMagic(_)
                | Error::UnsupportedVersion { .. }
                | Error::Truncated(_)
                | Error::InvalidAttributeKind(_)
                | Error::TruncatedAttribute(_)
                | Error::InvalidStringOffset(_)
                | Error::Malformed(_)
                | Error::MissingPreviewDirectory(_)
                | Error::UnsupportedCompression(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
