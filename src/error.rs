//! Error types for the host binding.
//!
//! Every failure that reaches a caller is one of the closed set of kinds below.
//! Native error payloads and host callback failures are translated here so that
//! raw engine codes never escape the crate.

use crate::engine::{NativeError, NativeErrorKind};
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the host binding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The policy source was rejected by the engine
    #[error("Load error: {message}")]
    Load {
        /// Detailed error message
        message: String,
        /// Source file that failed, if known
        filename: Option<String>,
    },

    /// A value has no representation on the other side of the boundary
    #[error("Marshal error: {message}")]
    Marshal {
        /// Detailed error message
        message: String,
        /// Kind of the offending value or term
        kind: Option<String>,
    },

    /// A host callback failed during external dispatch
    #[error("Application error: {message}")]
    Application {
        /// The original message raised by the host code
        message: String,
        /// Class whose member raised, if known
        class: Option<String>,
        /// Member (method or attribute) that raised, if known
        member: Option<String>,
    },

    /// Unexpected protocol event, native failure, or unresolvable dispatch
    #[error("Protocol error: {message}")]
    Protocol {
        /// Detailed error message
        message: String,
    },

    /// Unknown or already-released instance id
    #[error("Resource error: {message}")]
    Resource {
        /// Detailed error message
        message: String,
        /// Offending instance id
        instance_id: Option<u64>,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// Detailed error message
        message: String,
        /// Configuration key that caused the error
        key: Option<String>,
    },
}

impl Error {
    /// Create a load error.
    pub fn load(message: impl Into<String>) -> Self {
        Error::Load {
            message: message.into(),
            filename: None,
        }
    }

    /// Create a load error for a specific source file.
    pub fn load_file(message: impl Into<String>, filename: impl Into<String>) -> Self {
        Error::Load {
            message: message.into(),
            filename: Some(filename.into()),
        }
    }

    /// Create a marshal error.
    pub fn marshal(message: impl Into<String>) -> Self {
        Error::Marshal {
            message: message.into(),
            kind: None,
        }
    }

    /// Create a marshal error naming the offending kind.
    pub fn marshal_kind(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Error::Marshal {
            message: message.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an application error.
    pub fn application(message: impl Into<String>) -> Self {
        Error::Application {
            message: message.into(),
            class: None,
            member: None,
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Create a resource error for an instance id.
    pub fn resource(message: impl Into<String>, instance_id: u64) -> Self {
        Error::Resource {
            message: message.into(),
            instance_id: Some(instance_id),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error with key context.
    pub fn config_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Translate a native error raised while loading policy or registering constants.
    pub fn from_native_load(err: NativeError) -> Self {
        match err.kind {
            NativeErrorKind::Parse
            | NativeErrorKind::Validation
            | NativeErrorKind::Runtime
            | NativeErrorKind::Operational => Error::load(err.message),
            NativeErrorKind::Application | NativeErrorKind::Unknown(_) => {
                Error::protocol(err.message)
            }
        }
    }

    /// Translate a native error raised while a query is running.
    pub fn from_native_query(err: NativeError) -> Self {
        match err.kind {
            NativeErrorKind::Application => Error::application(err.message),
            _ => Error::protocol(err.message),
        }
    }

    /// Whether this error ends the query that produced it.
    pub fn is_query_fatal(&self) -> bool {
        matches!(
            self,
            Error::Protocol { .. } | Error::Resource { .. } | Error::Application { .. }
        )
    }

    /// Get the error category for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Load { .. } => "load",
            Error::Marshal { .. } => "marshal",
            Error::Application { .. } => "application",
            Error::Protocol { .. } => "protocol",
            Error::Resource { .. } => "resource",
            Error::Config { .. } => "config",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::protocol(format!("malformed payload at the engine boundary: {}", err))
    }
}

/// Extension trait for adding dispatch context to errors.
pub trait ErrorContext<T> {
    /// Attach the class and member that raised to application errors.
    fn with_member(self, class: &str, member: &str) -> Result<T>;

    /// Attach the source file name to load errors.
    fn with_filename(self, filename: &str) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn with_member(self, class: &str, member: &str) -> Result<T> {
        self.map_err(|e| match e {
            Error::Application { message, .. } => Error::Application {
                message,
                class: Some(class.to_string()),
                member: Some(member.to_string()),
            },
            other => other,
        })
    }

    fn with_filename(self, filename: &str) -> Result<T> {
        self.map_err(|e| match e {
            Error::Load { message, .. } => Error::Load {
                message,
                filename: Some(filename.to_string()),
            },
            other => other,
        })
    }
}
