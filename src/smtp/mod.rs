//! SMTP server implementation

pub mod commands;
pub mod config;
mod connection;
pub mod email;
pub mod error;
pub mod framing;
pub mod hooks;
pub mod response;
pub mod server;
pub mod session;
pub mod transaction_log;

pub use commands::Command;
pub use config::ServerConfig;
pub use email::Email;
pub use error::{SmtpError, SmtpLimits};
pub use framing::{Frame, FrameMode, FrameReader};
pub use hooks::{ChannelHook, DefaultHooks, DeliveryHook};
pub use response::{ReplyCode, SmtpResponse, encode};
pub use server::{ConnectionId, ServerStatus, SmtpServer};
pub use session::{AuthMethod, SmtpSession, SmtpState};
pub use transaction_log::{TransactionLog, TranscriptEntry};
