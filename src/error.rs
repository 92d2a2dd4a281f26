//! Error types and handling for the payload pipeline

/// Result type alias for payload pipeline operations
pub type Result<T> = std::result::Result<T, PloadError>;

/// Errors raised by payloads, stores and the listener registry
#[derive(Debug, thiserror::Error)]
pub enum PloadError {
    /// I/O related errors (file operations, mmap, truncate, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// The payload has already been classified
    #[error("Payload already classified")]
    AlreadyClassified,

    /// Bytes were already buffered when the operation required none
    #[error("Payload already has buffered data")]
    AlreadyBuffered,

    /// No payload type registered under that name
    #[error("Unknown payload type: {name}")]
    UnknownType { name: String },

    /// No decoder registered for that encoding
    #[error("Unknown encoding: {name}")]
    UnknownEncoding { name: String },

    /// An analyzer is already bound to the type
    #[error("Payload type {name} already has an analyzer")]
    AnalyzerExists { name: String },

    /// The decoder rejected its input
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// The analyzer reported an error
    #[error("Analysis error: {message}")]
    Analysis { message: String },

    /// Reading a store that never persisted anything
    #[error("Store has no backing file")]
    StoreEmpty,

    /// No registration for that owner in the given scope
    #[error("Listener {owner} not found for payload type {scope}")]
    ListenerNotFound { owner: String, scope: String },

    /// Listener registration attempted while traffic is flowing
    #[error("Engine must be paused")]
    EngineRunning,

    /// The payload was already ended
    #[error("Payload already ended")]
    PayloadEnded,

    /// Filter compilation failure
    #[error("Filter error: {message}")]
    Filter { message: String },

    /// Configuration or resource failure
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PloadError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an I/O error without an underlying source
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an unknown type error
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Create an unknown encoding error
    pub fn unknown_encoding(name: impl Into<String>) -> Self {
        Self::UnknownEncoding { name: name.into() }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an analysis error
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis {
            message: message.into(),
        }
    }

    /// Create a listener not found error
    pub fn listener_not_found(owner: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::ListenerNotFound {
            owner: owner.into(),
            scope: scope.into(),
        }
    }

    /// Create a filter error
    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for PloadError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<toml::de::Error> for PloadError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("TOML error: {}", err))
    }
}
