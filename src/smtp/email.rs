//! Delivered message data structures

use chrono::{DateTime, Utc};

/// One message delivered to a single recipient.
///
/// A transaction with several `RCPT TO` commands produces one `Email`
/// per recipient, each carrying the same sender, body lines and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    /// The sender's address from `MAIL FROM`
    pub sender: String,

    /// The recipient this copy is delivered to
    pub recipient: String,

    /// When the body terminator was received
    pub received_at: DateTime<Utc>,

    /// Message content (headers and body), one entry per line
    pub body: Vec<String>,

    /// Session annotations such as client domain and peer address
    pub metadata: Vec<String>,
}

impl Email {
    /// Create a new email stamped with the current time
    pub fn new(
        sender: String,
        recipient: String,
        body: Vec<String>,
        metadata: Vec<String>,
    ) -> Self {
        Self {
            sender,
            recipient,
            received_at: Utc::now(),
            body,
            metadata,
        }
    }

    /// Check if this email was sent from a specific sender
    pub fn is_from_sender(&self, sender: &str) -> bool {
        self.sender == sender
    }

    /// Get the size of the message content in bytes, counting CRLF line endings
    pub fn data_size(&self) -> usize {
        self.body.iter().map(|line| line.len() + 2).sum()
    }

    /// Get the subject line from the email headers (if present)
    pub fn subject(&self) -> Option<&str> {
        self.headers().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("subject")
                .then(|| value.trim_start())
        })
    }

    /// Get the message body: the lines after the first empty line
    pub fn body_text(&self) -> Option<String> {
        let start = self.body.iter().position(|line| line.is_empty())? + 1;
        if start >= self.body.len() {
            return None;
        }
        Some(self.body[start..].join("\n"))
    }

    /// Check if the email contains a specific text in headers or body
    pub fn contains_text(&self, text: &str) -> bool {
        self.body.iter().any(|line| line.contains(text))
    }

    fn headers(&self) -> impl Iterator<Item = &str> {
        self.body
            .iter()
            .map(String::as_str)
            .take_while(|line| !line.is_empty())
    }
}
