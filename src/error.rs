use thiserror::Error;

/// Errors that are fatal at boot time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the local hostname")]
    HostnameUnavailable,
    #[error("hostname {0:?} is not a usable topic segment")]
    InvalidHostname(String),
    #[error("poweroff delay must not be negative (got {0} s)")]
    NegativeDelay(f64),
    #[error("--mqtt-password-file {path}: {source}")]
    PasswordFile {
        path: String,
        source: std::io::Error,
    },
    #[error("--mqtt-password requires --mqtt-username")]
    PasswordWithoutUsername,
}

/// Errors that tear down the running bridge (exit non-zero).
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("system D-Bus connection failed: {0}")]
    BusConnect(#[source] zbus::Error),
    #[error("system D-Bus connection lost")]
    BusLost,
    #[error("unit {unit:?} could not be resolved: {source}")]
    UnknownUnit {
        unit: String,
        source: zbus::Error,
    },
}
