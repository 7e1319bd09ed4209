use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("no Slack API token provided")]
    MissingToken,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Slack rate limit error: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Slack API error: {0}")]
    SlackApi(String),

    #[error("HTTP error during {context}: {detail}")]
    Http { context: String, detail: String },

    #[error("invalid response from {context}")]
    InvalidResponse { context: String },

    #[error("unexpected record shape: {context}")]
    UnexpectedShape { context: String },

    #[error("attachment {id} has no private download URL")]
    UnsupportedAttachment { id: String },

    #[error("download of {file} failed with HTTP status {status}")]
    DownloadFailed { file: String, status: u16 },

    #[error("output file already exists: {path}")]
    OutputConflict { path: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("failed to read file at {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file at {path}: {source}")]
    WriteFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("JSON serialization error: {0}")]
    JsonSerialize(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_missing_token_display() {
        let err = AppError::MissingToken;
        assert_eq!(err.to_string(), "no Slack API token provided");
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: AppError = io_err.into();
        assert!(matches!(err, AppError::Io(_)));
    }

    #[test]
    fn test_rate_limited_display() {
        let err = AppError::RateLimited { retry_after_secs: 30 };
        assert_eq!(err.to_string(), "Slack rate limit error: retry after 30s");
    }

    #[test]
    fn test_slack_api_display() {
        let err = AppError::SlackApi("message_not_found".to_string());
        assert_eq!(err.to_string(), "Slack API error: message_not_found");
    }

    #[test]
    fn test_invalid_response_display() {
        let err = AppError::InvalidResponse {
            context: "conversations.history C123".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid response from conversations.history C123"
        );
    }

    #[test]
    fn test_unexpected_shape_carries_identifier() {
        let err = AppError::UnexpectedShape {
            context: "message 1712345678.000400 has no \"user\"".to_string(),
        };
        assert!(err.to_string().contains("1712345678.000400"));
    }

    #[test]
    fn test_unsupported_attachment_display() {
        let err = AppError::UnsupportedAttachment {
            id: "F0123".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "attachment F0123 has no private download URL"
        );
    }

    #[test]
    fn test_download_failed_display() {
        let err = AppError::DownloadFailed {
            file: "F0123".to_string(),
            status: 403,
        };
        assert!(err.to_string().contains("F0123"));
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn test_output_conflict_display() {
        let err = AppError::OutputConflict {
            path: "./history/history-20240101-120000.json".to_string(),
        };
        assert!(err.to_string().contains("history-20240101-120000.json"));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_read_file_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = AppError::ReadFile {
            path: "/path/to/file.json".to_string(),
            source: io_err,
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/path/to/file.json"));
    }

    #[test]
    fn test_write_file_source() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
        let err = AppError::WriteFile {
            path: "/path/to/output.json".to_string(),
            source: io_err,
        };
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AppError>();
    }

    #[test]
    fn test_error_is_sync() {
        fn assert_sync<T: Sync>() {}
        assert_sync::<AppError>();
    }

    #[test]
    fn test_result_type_ok() {
        let result: Result<i32> = Ok(42);
        assert!(result.is_ok());
    }
}
