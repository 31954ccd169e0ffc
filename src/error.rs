//! Error taxonomy for the paged cache engine.

use thiserror::Error;

/// Failure to read a single raw record.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
  /// The identifier field is absent or has the wrong type.
  #[error("record has no usable identifier")]
  InvalidData,
}

/// Errors surfaced by the local cache, remote fetch and paged result layers.
#[derive(Debug, Error)]
pub enum ServiceError {
  /// Transport-level failure (connectivity, timeout, non-2xx status).
  #[error("network error: {0}")]
  Network(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// Envelope shape was unexpected or a record could not be identified.
  #[error("wrong response format")]
  WrongResponseFormat,

  /// An invariant was violated; indicates a bug rather than bad input.
  #[error("internal error: {0}")]
  Internal(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

impl From<ParseError> for ServiceError {
  fn from(_: ParseError) -> Self {
    ServiceError::WrongResponseFormat
  }
}

impl From<rusqlite::Error> for ServiceError {
  fn from(e: rusqlite::Error) -> Self {
    ServiceError::Internal(format!("store: {}", e))
  }
}

impl From<reqwest::Error> for ServiceError {
  fn from(e: reqwest::Error) -> Self {
    ServiceError::Network(Box::new(e))
  }
}

impl From<tokio::task::JoinError> for ServiceError {
  fn from(e: tokio::task::JoinError) -> Self {
    ServiceError::Internal(format!("working context task failed: {}", e))
  }
}

impl ServiceError {
  pub fn is_network(&self) -> bool {
    matches!(self, ServiceError::Network(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_error_becomes_wrong_format() {
    let err: ServiceError = ParseError::InvalidData.into();
    assert!(matches!(err, ServiceError::WrongResponseFormat));
  }

  #[test]
  fn test_network_error_keeps_cause() {
    let err = ServiceError::Network("connection reset".into());
    assert!(err.is_network());
    assert_eq!(err.to_string(), "network error: connection reset");
  }
}
