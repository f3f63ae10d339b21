//! Error types shared by the service client, the session and configuration.

use thiserror::Error;

/// Failures surfaced by the generative-language service boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Network failure or a 5xx answer from the service
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The service refused the request (4xx, invalid configuration)
    #[error("Request rejected: {0}")]
    RequestRejected(String),

    /// No answer within the configured request timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// A streamed fragment could not be parsed; aggregation skips it
    #[error("Malformed fragment: {0}")]
    MalformedFragment(String),
}

impl ServiceError {
    pub fn is_malformed_fragment(&self) -> bool {
        matches!(self, ServiceError::MalformedFragment(_))
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout(err.to_string())
        } else if err.is_decode() {
            ServiceError::MalformedFragment(err.to_string())
        } else if err.status().is_some_and(|s| s.is_client_error()) || err.is_builder() {
            ServiceError::RequestRejected(err.to_string())
        } else {
            ServiceError::ServiceUnavailable(err.to_string())
        }
    }
}

/// State-machine violations of a conversation session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("A reply is still streaming; wait for it to finish or stop it first")]
    TurnInFlight,

    #[error("Message {0} is not being streamed")]
    NotStreaming(uuid::Uuid),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported api_key_ref format: {0}")]
    UnsupportedKeyRef(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}
