//! Configuration errors shared across the workspace.

use thiserror::Error;

/// A configuration problem, surfaced at construction time.
///
/// A transport that fails its configuration check is unusable; callers
/// should treat this as fatal for the affected driver rather than retry.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was absent or empty.
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    /// A field was present but its value is unusable.
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
