use std::error::Error as StdError;
use std::iter;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{config::LoadError, infra::error::InfraError};

/// Diagnostic chain attached to failed responses and consumed by the
/// response-logging middleware. Never serialized to clients.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let messages = iter::successors(Some(error), |err| (*err).source())
            .map(ToString::to_string)
            .collect();
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Top-level error returned by the binary entry points.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn report_collects_source_chain() {
        let err = Outer(std::io::Error::other("disk unplugged"));
        let report = ErrorReport::from_error("tests", StatusCode::INTERNAL_SERVER_ERROR, &err);

        assert_eq!(report.messages, vec!["outer failure", "disk unplugged"]);
        assert_eq!(report.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn report_walks_nested_sources_to_the_root() {
        let err = InfraError::from(std::io::Error::other("socket closed"));
        let app = AppError::from(err);
        let report = ErrorReport::from_error("tests", StatusCode::BAD_GATEWAY, &app);

        assert_eq!(report.messages.len(), 2);
        assert_eq!(report.messages.last().map(String::as_str), Some("socket closed"));
    }

    #[test]
    fn missing_database_url_is_an_infra_error() {
        let err = AppError::from(InfraError::configuration("database url is not configured"));
        assert!(matches!(err, AppError::Infra(InfraError::Configuration { .. })));
        assert_eq!(
            err.to_string(),
            "configuration error: database url is not configured"
        );
    }
}
