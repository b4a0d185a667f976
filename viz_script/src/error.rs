use std::path::PathBuf;

use thiserror::Error;
use viz_marshal::{PayloadError, SessionError, ValueKind};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{0}")]
    Lua(#[from] mlua::Error),
    #[error("failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("script {0} is plain text and cannot be unlocked with a passphrase")]
    Passphrase(PathBuf),
    #[error("no script has been set for this window")]
    NoScript,
    #[error("Variable '{0}' not found")]
    MissingVariable(String),
    #[error("Variable '{name}' holds a {found} value, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        found: &'static str,
    },
    #[error("Variable data type not supported: {0}")]
    Unsupported(ValueKind),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("window has been closed")]
    Closed,
}

impl From<ScriptError> for SessionError {
    fn from(err: ScriptError) -> Self {
        SessionError::new(err.to_string())
    }
}
