//! Broker error types
//!
//! Every layer wraps the underlying cause and forwards it. Nothing here is
//! retried automatically; a failed invocation is reported once.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Top-level error returned by every capability call
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("Failed to launch helper {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect helper {stream} stream")]
    StreamSetup { stream: &'static str },

    #[error("Failed waiting for helper to exit: {0}")]
    Wait(#[source] io::Error),

    #[error("Helper exited abnormally ({})", describe_exit(.code, .signal))]
    Exit {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("Invalid helper output: {0}")]
    Decode(#[from] DecodeError),

    #[error("Helper returned an unparseable public key: {0}")]
    KeyParse(#[source] p256::pkcs8::spki::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Helper did not finish within {0:?}")]
    Timeout(Duration),
}

fn describe_exit(code: &Option<i32>, signal: &Option<i32>) -> String {
    match (*code, *signal) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(signal)) => format!("killed by signal {}", signal),
        (None, None) => "unknown status".to_string(),
    }
}

/// Failures while materializing the helper on disk
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("No helper payload embedded in this build")]
    MissingPayload,

    #[error("Failed to create staging directory: {0}")]
    CreateDir(#[source] io::Error),

    #[error("Failed to write helper to {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to restrict permissions on {path}: {source}")]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures while reading the helper's output record
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("helper produced no output")]
    Empty,

    #[error("output ended before a complete record: {0}")]
    Truncated(#[source] serde_json::Error),

    #[error("output is not a well-formed record: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("output exceeded {limit} bytes without a complete record")]
    TooLarge { limit: usize },

    #[error("failed to read helper output: {0}")]
    Read(#[source] io::Error),

    #[error("field `{field}` is not valid base64: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("required field `{0}` is missing")]
    MissingField(&'static str),
}

impl BrokerError {
    /// Exit code reported by the helper, if the failure was an abnormal exit
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            BrokerError::Exit { code, .. } => *code,
            _ => None,
        }
    }
}
