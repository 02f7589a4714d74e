//! Error types for NicWatch

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// NicWatch error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Hardware query provider failed or returned malformed data
    #[error("Hardware query failed: {0}")]
    Query(String),

    /// Configuration store has no entry
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Driver installer or patch could not be run, or exited non-zero
    #[error("Driver install failed: {0}")]
    Install(String),

    /// Network configuration command failed
    #[error("Network configuration failed: {0}")]
    ConfigurationApply(String),

    /// Hot-plug event subscription could not be established
    #[error("Event subscription failed: {0}")]
    Subscription(String),

    /// Static address setting is not a dotted IPv4 quad
    #[error("Invalid address for {field}: {value:?}")]
    InvalidAddress {
        /// Configuration field name
        field: &'static str,
        /// Rejected value
        value: String,
    },

    /// Configuration value is out of range
    #[error("Invalid setting for {field}: {value:?}")]
    InvalidSetting {
        /// Configuration field name
        field: &'static str,
        /// Rejected value
        value: String,
    },

    /// Service control manager rejected a registration or status report
    #[error("Service control failed: {0}")]
    Service(String),

    /// Host platform lacks a required capability
    #[error("Unsupported platform: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Process (or service-specific) exit code for a run that ended with this error.
    ///
    /// A lost hot-plug subscription is distinguished so a supervisor can restart the daemon.
    pub fn exit_code(&self) -> u32 {
        match self {
            Error::Subscription(_) => 2,
            _ => 1,
        }
    }
}

impl From<windowspnp::EnumerateError> for Error {
    fn from(err: windowspnp::EnumerateError) -> Self {
        Error::Query(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_subscription_has_its_own_exit_code() {
        assert_eq!(Error::Subscription("watcher stopped".into()).exit_code(), 2);
        assert_eq!(Error::Install("setup.exe".into()).exit_code(), 1);
        assert_eq!(Error::Service("not started by the SCM".into()).exit_code(), 1);
    }
}
