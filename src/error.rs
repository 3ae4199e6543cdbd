//! Error types shared by every compiler stage.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

/// Position inside the script source. Unknown until the parser attaches one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location(Option<(usize, usize)>);

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Location(Some((line, column)))
    }

    pub fn unknown() -> Self {
        Location(None)
    }

    pub fn is_known(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some((line, column)) => write!(f, " (line {} char {})", line, column),
            None => Ok(()),
        }
    }
}

#[derive(Error, Debug)]
pub enum CompileError {
    /// Malformed token stream: unexpected character, missing keyword, unbalanced braces.
    #[error("Syntax error: {message}{at}")]
    Syntax { message: String, at: Location },

    /// A construct used where it is not allowed.
    #[error("Structural error: {message}{at}")]
    Structural { message: String, at: Location },

    /// The scratch signal pool ran dry inside one lexical chain.
    #[error("No temp variables left: all {pool} candidates are in use{at}")]
    ResourceExhausted { pool: usize, at: Location },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid blueprint: {0}")]
    Blueprint(String),

    #[error("Blueprint compression failed: {0}")]
    Codec(#[source] std::io::Error),

    #[error("Blueprint is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Blueprint JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, at: Location) -> Self {
        CompileError::Syntax {
            message: message.into(),
            at,
        }
    }

    /// Structural error without a position; the parser adds one via [`CompileError::located`].
    pub fn structural(message: impl Into<String>) -> Self {
        CompileError::Structural {
            message: message.into(),
            at: Location::unknown(),
        }
    }

    /// Attaches `location` unless the error already carries one.
    pub fn located(self, location: Location) -> Self {
        match self {
            CompileError::Syntax { message, at } if !at.is_known() => CompileError::Syntax {
                message,
                at: location,
            },
            CompileError::Structural { message, at } if !at.is_known() => {
                CompileError::Structural {
                    message,
                    at: location,
                }
            }
            CompileError::ResourceExhausted { pool, at } if !at.is_known() => {
                CompileError::ResourceExhausted {
                    pool,
                    at: location,
                }
            }
            other => other,
        }
    }
}
