//! SMTP reply encoding

use std::fmt;

/// Reply codes emitted by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ReplyCode {
    NonStandardSuccess = 200,
    SystemStatus = 211,
    ServiceReady = 220,
    ServiceClosing = 221,
    Ok = 250,
    UserNotLocal = 251,
    CannotVerifyUser = 252,
    StartMailInput = 354,
    ServiceUnavailable = 421,
    MailboxBusy = 450,
    LocalError = 451,
    CommandUnrecognized = 500,
    SyntaxError = 501,
    CommandNotImplemented = 502,
    BadSequence = 503,
    AuthenticationRequired = 530,
    MailboxUnavailable = 550,
    StorageExceeded = 552,
    TransactionFailed = 554,
}

impl ReplyCode {
    /// Numeric value of the code
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Encode a single reply line without the line terminator.
///
/// `continued` selects the `-` separator used by every line of a
/// multi-line reply except the last one.
pub fn encode(code: ReplyCode, text: &str, continued: bool) -> String {
    let separator = if continued { '-' } else { ' ' };
    format!("{code}{separator}{text}")
}

/// Represents an SMTP reply that can be sent to a client
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpResponse {
    /// The reply code shared by every line
    pub code: ReplyCode,
    /// Reply text, one entry per wire line
    pub lines: Vec<String>,
}

impl SmtpResponse {
    /// Create a single line response
    pub fn new(code: ReplyCode, message: &str) -> Self {
        Self {
            code,
            lines: vec![message.to_owned()],
        }
    }

    /// Create a multiline response: a leading message followed by extra lines
    pub fn new_multiline(code: ReplyCode, message: &str, lines: Vec<String>) -> Self {
        let mut all = Vec::with_capacity(lines.len() + 1);
        all.push(message.to_owned());
        all.extend(lines);
        Self { code, lines: all }
    }

    /// Create a success response (250 OK)
    pub fn ok() -> Self {
        Self::new(ReplyCode::Ok, "OK")
    }

    /// Create a greeting response (220)
    pub fn greeting(domain: &str) -> Self {
        Self::new(
            ReplyCode::ServiceReady,
            &format!("{domain} ESMTP service ready"),
        )
    }

    /// Create a HELO response (250)
    pub fn helo(domain: &str, client_domain: &str) -> Self {
        Self::new(ReplyCode::Ok, &format!("{domain} Hello {client_domain}"))
    }

    /// Create an EHLO response (250) advertising the supported extensions
    pub fn ehlo(domain: &str, client_domain: &str, max_message_bytes: usize) -> Self {
        Self::new_multiline(
            ReplyCode::Ok,
            &format!("{domain} greets {client_domain}"),
            vec![
                "8BITMIME".to_owned(),
                format!("SIZE {max_message_bytes}"),
                "PIPELINING".to_owned(),
            ],
        )
    }

    /// Create a DATA intermediate response (354)
    pub fn data_start() -> Self {
        Self::new(
            ReplyCode::StartMailInput,
            "Start mail input; end with <CR><LF>.<CR><LF>",
        )
    }

    /// Create the reply for an accepted message body
    pub fn queued() -> Self {
        Self::new(ReplyCode::Ok, "OK, message queued")
    }

    /// Create a QUIT response (221)
    pub fn quit(domain: &str) -> Self {
        Self::new(
            ReplyCode::ServiceClosing,
            &format!("{domain} closing connection, goodbye"),
        )
    }

    /// Best-effort notice sent when the server tears a connection down
    pub fn server_closing(domain: &str) -> Self {
        Self::new(
            ReplyCode::ServiceClosing,
            &format!("{domain} shutting down, goodbye"),
        )
    }

    /// Create an error response
    pub fn error(code: ReplyCode, message: &str) -> Self {
        Self::new(code, message)
    }

    /// Iterate over the encoded wire lines, without terminators
    pub fn encoded_lines(&self) -> impl Iterator<Item = String> + '_ {
        let last = self.lines.len().saturating_sub(1);
        self.lines
            .iter()
            .enumerate()
            .map(move |(i, line)| encode(self.code, line, i < last))
    }

    /// Format the response for sending over the wire
    pub fn format(&self) -> String {
        let mut result = String::new();
        for line in self.encoded_lines() {
            result.push_str(&line);
            result.push_str("\r\n");
        }
        result
    }
}
