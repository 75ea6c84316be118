use std::io;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::session::types::Phase;

/// A failure surfaced to the presentation layer via `SessionEvent::Failure`.
///
/// None of these are retried automatically; each is recoverable by calling
/// `start()` again on the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("Required Bluetooth capabilities were denied")]
    CapabilityDenied,

    #[error("No Bluetooth radio is available on this system")]
    RadioUnavailable,

    #[error("Enabling the Bluetooth radio was declined")]
    RadioEnableDeclined,

    #[error("The discovery scan could not be started: {reason}")]
    ScanFailed { reason: String },

    #[error("No discovered device with address {address}")]
    NotFound { address: String },
}

/// Error returned directly to a caller of `DiscoverySession::select`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No discovered device with address {address}")]
    NotFound { address: String },

    #[error("A device can not be selected while the session is {phase:?}")]
    WrongPhase { phase: Phase },
}

#[derive(Error, Debug)]
pub enum RadioError {
    #[error("Error communicating with the Bluetooth stack (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No Bluetooth adapter is present")]
    NoAdapter,

    #[error("Radio backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to access the Bluetooth radio: {source}")]
    Radio { #[from] source: RadioError },

    #[error("Discovery session failed: {reason}")]
    Discovery { reason: FailureReason },

    #[error("Failed to read/write the terminal: {source}")]
    IOError { #[from] source: io::Error },
}
