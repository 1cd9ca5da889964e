//! SMTP session state management

use crate::smtp::commands::Command;
use crate::smtp::email::Email;
use crate::smtp::error::SmtpError;
use crate::smtp::response::{ReplyCode, SmtpResponse};
use std::str::FromStr;

/// Authentication mechanism negotiated for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    #[default]
    None,
    Plain,
    Login,
    DigestMd5,
}

impl FromStr for AuthMethod {
    type Err = SmtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(AuthMethod::None),
            "PLAIN" => Ok(AuthMethod::Plain),
            "LOGIN" => Ok(AuthMethod::Login),
            "DIGEST-MD5" => Ok(AuthMethod::DigestMd5),
            other => Err(SmtpError::InvalidSyntax(format!(
                "unsupported auth mechanism {other}"
            ))),
        }
    }
}

/// Where a session stands in the mail transaction
#[derive(Debug, Clone, PartialEq)]
pub enum SmtpState {
    /// HELO/EHLO accepted (or transaction reset) - ready for MAIL
    Greeted,
    /// MAIL FROM received - ready for RCPT commands
    MailReceived,
    /// At least one RCPT TO received - ready for DATA or more RCPT commands
    RecipientsReceived,
    /// DATA accepted - collecting the message body
    InBody,
}

/// Transactional state of one mail dialogue on a connection
#[derive(Debug, Default)]
pub struct SmtpSession {
    /// Sender address from MAIL FROM, empty when unset
    pub sender: String,
    /// Recipients from RCPT TO, in the order given
    pub recipients: Vec<String>,
    /// Free-form annotations: negotiated extensions, peer address, ...
    pub metadata: Vec<String>,
    /// Whether DATA was accepted and the body is being received
    pub in_body: bool,
    /// Mechanism used to authenticate, if any
    pub auth_method: AuthMethod,
    body_buffer: String,
}

impl SmtpSession {
    /// Create an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position in the transaction
    pub fn state(&self) -> SmtpState {
        if self.in_body {
            SmtpState::InBody
        } else if !self.recipients.is_empty() {
            SmtpState::RecipientsReceived
        } else if !self.sender.is_empty() {
            SmtpState::MailReceived
        } else {
            SmtpState::Greeted
        }
    }

    /// Clear sender, recipients, body and metadata
    pub fn reset(&mut self) {
        self.sender.clear();
        self.recipients.clear();
        self.metadata.clear();
        self.body_buffer.clear();
        self.in_body = false;
    }

    /// Apply a transaction command and produce the reply for it.
    ///
    /// Only RSET, MAIL FROM, RCPT TO and DATA are meaningful here; any
    /// other command is answered with "command not recognized".
    pub fn apply(&mut self, command: &Command) -> SmtpResponse {
        match command {
            Command::Rset => {
                self.reset();
                SmtpResponse::new(ReplyCode::Ok, "OK, transaction reset")
            }
            Command::MailFrom(addr) => {
                self.recipients.clear();
                self.body_buffer.clear();
                self.sender = addr.clone();
                SmtpResponse::ok()
            }
            Command::RcptTo(addr) => {
                self.recipients.push(addr.clone());
                if self.recipients.len() > 1 {
                    SmtpResponse::new(ReplyCode::Ok, "OK, will also deliver to this recipient")
                } else {
                    SmtpResponse::ok()
                }
            }
            Command::Data => match self.start_body() {
                Ok(()) => SmtpResponse::data_start(),
                Err(e) => e.to_response(),
            },
            _ => SmtpError::InvalidCommand.to_response(),
        }
    }

    fn start_body(&mut self) -> Result<(), SmtpError> {
        if self.sender.is_empty() || self.recipients.is_empty() {
            return Err(SmtpError::BadSequence(
                "MAIL FROM and RCPT TO are required before DATA".to_string(),
            ));
        }
        self.body_buffer.clear();
        self.in_body = true;
        Ok(())
    }

    /// Append received body text while in body mode
    pub fn append_body(&mut self, text: &str) -> Result<(), SmtpError> {
        if !self.in_body {
            return Err(SmtpError::BadSequence("not receiving a message body".to_string()));
        }
        self.body_buffer.push_str(text);
        Ok(())
    }

    /// Bytes of body text accumulated so far
    pub fn body_len(&self) -> usize {
        self.body_buffer.len()
    }

    /// Finish the body and produce one email per recipient.
    ///
    /// The session is left in its empty greeted state, ready for the
    /// next transaction on the same connection.
    pub fn finish_message(&mut self) -> Result<Vec<Email>, SmtpError> {
        if !self.in_body {
            return Err(SmtpError::BadSequence("not receiving a message body".to_string()));
        }

        let lines = body_lines(&self.body_buffer);
        let emails = self
            .recipients
            .iter()
            .map(|recipient| {
                Email::new(
                    self.sender.clone(),
                    recipient.clone(),
                    lines.clone(),
                    self.metadata.clone(),
                )
            })
            .collect();

        self.reset();
        Ok(emails)
    }
}

/// Split raw body text into lines, dropping CRs and undoing dot-stuffing
fn body_lines(body: &str) -> Vec<String> {
    if body.is_empty() {
        return Vec::new();
    }
    body.split('\n')
        .map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line).replace('\r', "");
            match line.strip_prefix("..") {
                Some(rest) => format!(".{rest}"),
                None => line,
            }
        })
        .collect()
}
