//! Error taxonomy for gate evaluation.
//!
//! Only fatal conditions are Rust errors: a malformed configuration or a
//! trigger that cannot be routed to exactly one profile. Check failures,
//! check faults and timeouts are recorded inside the [`Verdict`](crate::Verdict).

/// Configuration could not be loaded or is internally inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported config version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid gate spec for '{environment}': {reason}")]
    InvalidSpec { environment: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A trigger could not be routed to exactly one environment profile.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("no environment profile matches {context}")]
    NoMatchingProfile { context: String },

    #[error("profiles '{first}' and '{second}' both match {context}")]
    AmbiguousProfile {
        first: String,
        second: String,
        context: String,
    },
}

/// Fatal errors. Any of these aborts the run before a verdict exists.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),
}

impl GateError {
    /// Process exit code for fatal errors.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Result type for gate evaluation operations.
pub type Result<T> = std::result::Result<T, GateError>;
