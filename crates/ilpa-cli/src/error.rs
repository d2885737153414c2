use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct CliError(pub String);

impl From<String> for CliError {
    fn from(s: String) -> Self {
        CliError(s)
    }
}

impl From<&str> for CliError {
    fn from(s: &str) -> Self {
        CliError(s.to_string())
    }
}

impl From<ilpa_server::IlpaError> for CliError {
    fn from(e: ilpa_server::IlpaError) -> Self {
        CliError(e.to_string())
    }
}

impl From<ilpa_server::error::StoreError> for CliError {
    fn from(e: ilpa_server::error::StoreError) -> Self {
        CliError(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError(format!("JSON error: {e}"))
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError(format!("IO error: {e}"))
    }
}

pub type CliResult<T> = Result<T, CliError>;
