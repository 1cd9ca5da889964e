//! Per-connection protocol handling

use crate::smtp::commands::Command;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::framing::{Frame, FrameMode, FrameReader};
use crate::smtp::response::{ReplyCode, SmtpResponse};
use crate::smtp::server::{ConnectionId, SmtpServer};
use crate::smtp::session::SmtpSession;

use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// State of a connection shared between its worker thread and the registry.
///
/// Once `shutdown` is set nothing more is written to the peer, except
/// for the single final notice sent by the registry when it tears the
/// connection down itself. The transcript is `None` once the registry
/// has taken it; later lines are dropped.
#[derive(Debug)]
pub(crate) struct ConnectionLink {
    writer: Mutex<TcpStream>,
    control: TcpStream,
    shutdown: AtomicBool,
    transcript: Mutex<Option<Vec<String>>>,
}

impl ConnectionLink {
    pub(crate) fn new(stream: &TcpStream) -> io::Result<Self> {
        Ok(Self {
            writer: Mutex::new(stream.try_clone()?),
            control: stream.try_clone()?,
            shutdown: AtomicBool::new(false),
            transcript: Mutex::new(Some(Vec::new())),
        })
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Set the shutdown flag; true if this call is the one that set it
    pub(crate) fn request_shutdown(&self) -> bool {
        !self.shutdown.swap(true, Ordering::SeqCst)
    }

    /// Record a received line; ignored once shutdown was requested
    pub(crate) fn record(&self, line: String) {
        let mut transcript = self.transcript.lock();
        if self.is_shutdown() {
            return;
        }
        if let Some(lines) = transcript.as_mut() {
            lines.push(line);
        }
    }

    fn write(&self, writer: &mut TcpStream, response: &SmtpResponse) -> io::Result<()> {
        let mut formatted = response.format();
        if formatted
            .split("\r\n")
            .any(|line| line.len() + 2 > SmtpLimits::REPLY_LINE_MAX_LENGTH)
        {
            formatted = SmtpResponse::new(response.code, "Response too long (truncated)").format();
        }

        if let Some(lines) = self.transcript.lock().as_mut() {
            lines.extend(formatted.lines().map(|line| format!("S: {line}")));
        }
        writer.write_all(formatted.as_bytes())?;
        writer.flush()
    }

    /// Write a reply unless shutdown was requested
    pub(crate) fn send(&self, response: &SmtpResponse) -> io::Result<()> {
        if self.is_shutdown() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        self.write(&mut writer, response)
    }

    /// Mark the connection shut down and send a best-effort notice.
    ///
    /// The notice is skipped when the connection had already shut itself
    /// down or a write is in progress; errors are ignored.
    pub(crate) fn notify_shutdown(&self, response: &SmtpResponse) {
        if !self.request_shutdown() {
            return;
        }
        if let Some(mut writer) = self.writer.try_lock() {
            let _ = self.write(&mut writer, response);
        }
    }

    /// Hand the transcript over; it can only be taken once
    pub(crate) fn take_transcript(&self) -> Vec<String> {
        self.transcript.lock().take().unwrap_or_default()
    }

    /// Shut the socket down, which also wakes a worker blocked in read
    pub(crate) fn close(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

/// Drives the SMTP dialogue for one accepted socket
pub(crate) struct SmtpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    link: Arc<ConnectionLink>,
    server: SmtpServer,
    frames: FrameReader,
    session: Option<SmtpSession>,
}

impl SmtpConnection {
    pub(crate) fn new(
        id: ConnectionId,
        peer: SocketAddr,
        stream: TcpStream,
        link: Arc<ConnectionLink>,
        server: SmtpServer,
    ) -> Self {
        let frames = FrameReader::new(server.config().max_line_length);
        Self {
            id,
            peer,
            stream,
            link,
            server,
            frames,
            session: None,
        }
    }

    /// Greet the peer, then read until the connection shuts down
    pub(crate) fn run(mut self) {
        let span = tracing::info_span!("connection", id = %self.id, peer = %self.peer);
        let _guard = span.enter();

        let greeting = SmtpResponse::greeting(&self.server.config().domain);
        self.send(&greeting);

        let mut buf = vec![0u8; self.server.config().buffer_size];
        while !self.link.is_shutdown() {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    debug!("peer closed the connection");
                    self.terminate();
                }
                Ok(n) => self.process(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if !self.link.is_shutdown() {
                        warn!("read failed: {e}");
                    }
                    self.terminate();
                }
            }
        }
        debug!("connection worker finished");
    }

    fn process(&mut self, chunk: &[u8]) {
        self.frames.push(chunk);

        while !self.link.is_shutdown() {
            let Some(frame) = self.frames.next_frame() else {
                break;
            };
            match frame {
                Frame::Line(line) => self.handle_line(&line),
                Frame::Body(body) => self.handle_body(body),
                Frame::LineTooLong => {
                    self.link.record("C: <line too long>".to_string());
                    let max = self.server.config().max_line_length;
                    self.send(&SmtpError::LineTooLong { max }.to_response());
                }
            }
        }

        if !self.link.is_shutdown() && self.frames.mode() == FrameMode::Body {
            if let Err(e) = self.check_pending_body() {
                self.reject_body(e);
            }
        }
    }

    /// Guard against a body growing past the limits before its terminator arrives
    fn check_pending_body(&self) -> Result<(), SmtpError> {
        let config = self.server.config();
        // Allow for the terminator that has not been stripped yet.
        if self.frames.buffered() > config.max_message_bytes + 5 {
            return Err(SmtpError::TooMuchData {
                max: config.max_message_bytes,
            });
        }
        if self.frames.buffered_lines() > config.max_body_lines + 1 {
            return Err(SmtpError::TooManyLines {
                max: config.max_body_lines,
            });
        }
        Ok(())
    }

    fn reject_body(&mut self, error: SmtpError) {
        warn!("rejecting message body: {error}");
        self.send(&error.to_response());
        self.terminate();
    }

    fn handle_line(&mut self, line: &str) {
        self.link.record(format!("C: {line}"));

        let command = Command::parse(line);
        debug!(verb = command.verb(), "<- {line}");
        match command {
            Command::Rset => {
                let response = self
                    .session
                    .get_or_insert_with(SmtpSession::new)
                    .apply(&command);
                self.frames.set_mode(FrameMode::Line);
                self.send(&response);
            }
            Command::Vrfy(ref user) => {
                let response = if user.is_empty() {
                    SmtpResponse::error(ReplyCode::SyntaxError, "Syntax: VRFY <address>")
                } else if self.server.has_mailbox(user) {
                    SmtpResponse::new(ReplyCode::Ok, "User mailbox exists")
                } else {
                    SmtpResponse::error(
                        ReplyCode::MailboxUnavailable,
                        "Unable to verify user account",
                    )
                };
                self.send(&response);
            }
            Command::Noop => self.send(&SmtpResponse::ok()),
            Command::Quit => {
                self.session = None;
                let response = SmtpResponse::quit(&self.server.config().domain);
                self.send(&response);
                self.terminate();
            }
            Command::Helo(ref domain) => self.handle_greeting(domain.as_deref(), false),
            Command::Ehlo(ref domain) => self.handle_greeting(domain.as_deref(), true),
            Command::MailFrom(_) | Command::RcptTo(_) | Command::Data => {
                let Some(session) = self.session.as_mut() else {
                    self.send(&SmtpResponse::error(
                        ReplyCode::BadSequence,
                        "Send HELO/EHLO first",
                    ));
                    return;
                };
                let response = session.apply(&command);
                if session.in_body {
                    self.frames.set_mode(FrameMode::Body);
                }
                self.send(&response);
            }
            Command::Unknown(_) => {
                debug!("unrecognized command");
                self.send(&SmtpError::InvalidCommand.to_response());
            }
        }
    }

    fn handle_greeting(&mut self, client_domain: Option<&str>, extended: bool) {
        let config = self.server.config().clone();

        if extended && !config.allow_extensions {
            self.send(&SmtpError::InvalidCommand.to_response());
            return;
        }
        if self.session.is_some() {
            self.send(&SmtpResponse::error(
                ReplyCode::BadSequence,
                "Already greeted, use RSET to start over",
            ));
            return;
        }
        let Some(client_domain) = client_domain else {
            let verb = if extended { "EHLO" } else { "HELO" };
            self.send(&SmtpResponse::error(
                ReplyCode::SyntaxError,
                &format!("Syntax: {verb} <domain>"),
            ));
            return;
        };

        let mut session = SmtpSession::new();
        session.metadata.push(format!("Client domain: {client_domain}"));
        session.metadata.push(format!("Peer address: {}", self.peer));
        let response = if extended {
            session.metadata.push("ESMTP extensions negotiated".to_string());
            SmtpResponse::ehlo(&config.domain, client_domain, config.max_message_bytes)
        } else {
            SmtpResponse::helo(&config.domain, client_domain)
        };
        self.session = Some(session);
        self.send(&response);
    }

    fn handle_body(&mut self, body: String) {
        self.frames.set_mode(FrameMode::Line);

        let config = self.server.config();
        let lines = memchr::memchr_iter(b'\n', body.as_bytes()).count() + 1;
        self.link.record(format!(
            "C: <message body, {} bytes, {lines} lines>",
            body.len()
        ));
        if body.len() > config.max_message_bytes {
            let max = config.max_message_bytes;
            return self.reject_body(SmtpError::TooMuchData { max });
        }
        if lines > config.max_body_lines {
            let max = config.max_body_lines;
            return self.reject_body(SmtpError::TooManyLines { max });
        }

        let emails = match self.session.as_mut() {
            Some(session) => session
                .append_body(&body)
                .and_then(|()| session.finish_message()),
            None => Err(SmtpError::BadSequence("no active session".to_string())),
        };

        match emails {
            Ok(emails) => {
                info!(recipients = emails.len(), bytes = body.len(), "message accepted");
                self.send(&SmtpResponse::queued());
                for email in emails {
                    self.server.notify_delivery(email);
                }
            }
            Err(e) => self.send(&e.to_response()),
        }
    }

    fn send(&mut self, response: &SmtpResponse) {
        if self.link.is_shutdown() {
            return;
        }
        for line in response.encoded_lines() {
            debug!("-> {line}");
        }
        if let Err(e) = self.link.send(response) {
            warn!("write failed: {e}");
            self.terminate();
        }
    }

    /// Stop the dialogue and ask the registry to remove this connection
    fn terminate(&mut self) {
        if self.link.request_shutdown() {
            self.server.request_close(self.id);
        }
    }
}
