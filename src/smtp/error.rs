//! Error types for the SMTP server

use crate::smtp::response::{ReplyCode, SmtpResponse};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Bad sequence of commands: {0}")]
    BadSequence(String),

    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Too much mail data (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Too many lines in message (max {max})")]
    TooManyLines { max: usize },
}

/// Protocol limits defined in RFC 821
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a command line including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a reply line including CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;
}

/// Maps SMTP errors to appropriate replies
impl SmtpError {
    pub fn to_reply_code(&self) -> ReplyCode {
        match self {
            SmtpError::Io(_) => ReplyCode::ServiceUnavailable,
            SmtpError::Config(_) | SmtpError::ConfigParse(_) => ReplyCode::LocalError,
            SmtpError::InvalidCommand => ReplyCode::CommandUnrecognized,
            SmtpError::BadSequence(_) => ReplyCode::BadSequence,
            SmtpError::InvalidSyntax(_) => ReplyCode::SyntaxError,
            SmtpError::LineTooLong { .. } => ReplyCode::CommandUnrecognized,
            SmtpError::TooMuchData { .. } => ReplyCode::StorageExceeded,
            SmtpError::TooManyLines { .. } => ReplyCode::StorageExceeded,
        }
    }

    pub fn to_response_message(&self) -> String {
        match self {
            SmtpError::Io(_) => "Service not available".to_string(),
            SmtpError::Config(_) | SmtpError::ConfigParse(_) => {
                "Local error in processing".to_string()
            }
            SmtpError::InvalidCommand => "Syntax error, command unrecognized".to_string(),
            SmtpError::BadSequence(msg) => format!("Bad sequence of commands: {msg}"),
            SmtpError::InvalidSyntax(msg) => format!("Syntax error: {msg}"),
            SmtpError::LineTooLong { max } => format!("Line too long (max {max} characters)"),
            SmtpError::TooMuchData { max } => format!("Too much mail data (max {max} bytes)"),
            SmtpError::TooManyLines { max } => format!("Too many lines in message (max {max})"),
        }
    }

    /// Build the reply a peer should see for this error
    pub fn to_response(&self) -> SmtpResponse {
        SmtpResponse::error(self.to_reply_code(), &self.to_response_message())
    }
}
