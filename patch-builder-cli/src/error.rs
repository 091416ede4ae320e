//! CLI error type and exit code mapping.

use std::fmt;

use patch_builder::config::ConfigError;
use patch_builder::engine::EngineError;
use patch_builder::logging::LoggingError;
use patch_builder::report::ExitStatus;
use patch_builder::request::RequestError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration file or argument combination rejected.
    Config(String),

    /// The patch request failed validation.
    Request(RequestError),

    /// The run could not start or the catalog failed.
    Engine(EngineError),

    /// Logging could not be initialized.
    Logging(LoggingError),

    /// Failed to create the Tokio runtime.
    Runtime(String),
}

impl CliError {
    /// Process exit status for this error.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            CliError::Config(_) | CliError::Request(_) | CliError::Logging(_) => {
                ExitStatus::InvalidInput
            }
            CliError::Engine(EngineError::Catalog(_)) => ExitStatus::TotalFailure,
            CliError::Engine(_) => ExitStatus::InvalidInput,
            CliError::Runtime(_) => ExitStatus::TotalFailure,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Request(e) => write!(f, "Invalid request: {}", e),
            CliError::Engine(e) => write!(f, "{}", e),
            CliError::Logging(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Runtime(msg) => write!(f, "Failed to create Tokio runtime: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Request(e) => Some(e),
            CliError::Engine(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Config(_) | CliError::Runtime(_) => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<RequestError> for CliError {
    fn from(e: RequestError) -> Self {
        CliError::Request(e)
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}
