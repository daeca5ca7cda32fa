use std::path::PathBuf;

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// Path does not resolve under the fragment's root.
    InvalidPath(PathBuf),
    /// A referenced file disappeared between index and read.
    MissingFile(PathBuf),
    /// Path resolves under no registered fragment; callers reaching this
    /// passed a path they never registered.
    NoFragment(PathBuf),
    Key(common::KeyParseError),
    Persist(String),
    /// An in-flight refresh this caller joined reported a failure.
    Refresh(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Json(err) => write!(f, "serialization error: {}", err),
            LibraryError::InvalidPath(path) => {
                write!(f, "path outside fragment root: {}", path.display())
            }
            LibraryError::MissingFile(path) => {
                write!(f, "referenced file is gone: {}", path.display())
            }
            LibraryError::NoFragment(path) => {
                write!(f, "no fragment covers path: {}", path.display())
            }
            LibraryError::Key(err) => write!(f, "{}", err),
            LibraryError::Persist(message) => write!(f, "persist error: {}", message),
            LibraryError::Refresh(message) => write!(f, "refresh failed: {}", message),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}

impl From<common::KeyParseError> for LibraryError {
    fn from(err: common::KeyParseError) -> Self {
        LibraryError::Key(err)
    }
}
