//! # mailinlet
//!
//! mailinlet is an embeddable SMTP receiving server.
//!
//! It accepts connections, runs the SMTP dialogue on a thread per
//! connection and hands every completed message to a [`DeliveryHook`],
//! one [`Email`] per recipient.
//!
//! ## Quick Start
//!
//! ```rust
//! use mailinlet::{ChannelHook, ServerConfig, SmtpServer};
//! use std::net::TcpListener;
//! use std::sync::mpsc;
//! use std::thread;
//! use std::time::Duration;
//!
//! let (tx, rx) = mpsc::channel();
//! let server = SmtpServer::with_hooks(ServerConfig::new("test.local"), ChannelHook::new(tx));
//!
//! let listener = TcpListener::bind("127.0.0.1:0").unwrap();
//! let running = server.clone();
//! thread::spawn(move || running.start_with_listener(listener));
//!
//! // Application sends email to the listener address
//! // ...
//!
//! if let Ok(email) = rx.recv_timeout(Duration::from_millis(100)) {
//!     println!("Received email from: {}", email.sender);
//! }
//!
//! server.shutdown();
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client and open a session
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify a recipient (multiple recipients are supported)
//! - `DATA` - Send the message, ended by `<CR><LF>.<CR><LF>`
//! - `RSET` - Reset the current transaction
//! - `VRFY` - Ask the delivery hook whether a mailbox exists
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! `EHLO` advertises `8BITMIME`, `SIZE` and `PIPELINING` unless
//! extensions are disabled in [`ServerConfig`].
//!
//! ## Connection lifecycle
//!
//! Connections live in a shared table owned by [`SmtpServer`]. A
//! connection that ends (QUIT, peer disconnect, I/O error, oversized
//! message) only queues itself for removal; [`SmtpServer::drain`],
//! which the accept loop runs whenever it is idle, removes it and
//! stores its transcript in a bounded [`TransactionLog`].
//!
//! ## Notes
//!
//! - Runs in-memory only. Message persistence is not supported.
//! - SMTP authentication is not negotiated; only the hook interface exists.
//! - SSL/TLS connection is not supported.
//! - Mail relay is not supported.

mod smtp;

pub use smtp::{
    AuthMethod, ChannelHook, Command, ConnectionId, DefaultHooks, DeliveryHook, Email, Frame,
    FrameMode, FrameReader, ReplyCode, ServerConfig, ServerStatus, SmtpError, SmtpLimits,
    SmtpResponse, SmtpServer, SmtpSession, SmtpState, TransactionLog, TranscriptEntry, encode,
};
