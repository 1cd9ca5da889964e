//! SMTP server implementation: accept loop and connection registry

use crate::smtp::config::ServerConfig;
use crate::smtp::connection::{ConnectionLink, SmtpConnection};
use crate::smtp::email::Email;
use crate::smtp::error::SmtpError;
use crate::smtp::hooks::{DefaultHooks, DeliveryHook};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::AuthMethod;
use crate::smtp::transaction_log::{TransactionLog, TranscriptEntry};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};

/// Server-wide unique identity of a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time counters describing the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    /// Delivered messages held in the mail store
    pub pending_mail: usize,
    /// Connections present in the connection table
    pub active_sessions: usize,
    /// Transcripts retained by the transaction log
    pub log_entries: usize,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SMTP server status: {} active session(s), {} pending message(s), {} logged transaction(s)",
            self.active_sessions, self.pending_mail, self.log_entries
        )
    }
}

/// Registry entry for a live connection
struct ConnectionHandle {
    peer: SocketAddr,
    link: Arc<ConnectionLink>,
}

struct ServerInner {
    config: ServerConfig,
    hooks: Arc<dyn DeliveryHook>,
    connections: DashMap<ConnectionId, ConnectionHandle>,
    close_queue: Mutex<VecDeque<ConnectionId>>,
    mailbox: Mutex<VecDeque<Email>>,
    log: TransactionLog,
    stopped: AtomicBool,
}

/// SMTP server that accepts connections and hands messages to a [`DeliveryHook`].
///
/// Cloning is cheap; clones share the same connection table, mail store
/// and transaction log. Connections never remove themselves from the
/// table: they queue their identity with [`SmtpServer::request_close`]
/// and [`SmtpServer::drain`] performs the removal.
#[derive(Clone)]
pub struct SmtpServer {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for SmtpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpServer")
            .field("domain", &self.inner.config.domain)
            .field("status", &self.status())
            .finish()
    }
}

impl SmtpServer {
    /// Create a server for `domain` with default settings and hooks
    pub fn new(domain: &str) -> Self {
        Self::with_config(ServerConfig::new(domain))
    }

    /// Create a server with default hooks
    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_hooks(config, DefaultHooks)
    }

    /// Create a server delivering through `hooks`
    pub fn with_hooks(config: ServerConfig, hooks: impl DeliveryHook + 'static) -> Self {
        let log = TransactionLog::new(config.transaction_log_capacity);
        Self {
            inner: Arc::new(ServerInner {
                config,
                hooks: Arc::new(hooks),
                connections: DashMap::new(),
                close_queue: Mutex::new(VecDeque::new()),
                mailbox: Mutex::new(VecDeque::new()),
                log,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Bind to `addr` and serve until [`SmtpServer::shutdown`] is called (blocking)
    pub fn start(&self, addr: &str) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr)?;
        self.start_with_listener(listener)
    }

    /// Serve on an existing listener until [`SmtpServer::shutdown`] is called (blocking).
    ///
    /// While no connection is pending the deferred-close queue is drained
    /// and the loop sleeps for the configured poll interval.
    pub fn start_with_listener(&self, listener: TcpListener) -> Result<(), SmtpError> {
        info!("SMTP server listening on {}", listener.local_addr()?);
        listener.set_nonblocking(true)?;
        let poll_interval = self.inner.config.poll_interval();

        while !self.is_stopped() {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = self.accept(stream) {
                        warn!("failed to set up connection: {e}");
                    }
                    self.drain();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.drain();
                    thread::sleep(poll_interval);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("error accepting connection: {e}");
                    thread::sleep(poll_interval);
                }
            }
        }

        // Sweep anything accepted while the stop was in flight.
        self.shutdown();
        info!("SMTP server stopped");
        Ok(())
    }

    /// Register an accepted socket and start its connection worker.
    ///
    /// The worker sends the greeting itself, so this returns as soon as
    /// the connection is in the table.
    pub fn accept(&self, stream: TcpStream) -> Result<ConnectionId, SmtpError> {
        stream.set_nonblocking(false)?;
        let peer = stream.peer_addr()?;
        let timeout = self.inner.config.idle_timeout();
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;

        let link = Arc::new(ConnectionLink::new(&stream)?);
        let id = self.register(ConnectionHandle {
            peer,
            link: link.clone(),
        });
        info!(%id, %peer, "accepted connection");

        let connection = SmtpConnection::new(id, peer, stream, link, self.clone());
        let spawned = thread::Builder::new()
            .name(format!("smtp-conn-{id}"))
            .spawn(move || connection.run());
        if let Err(e) = spawned {
            self.request_close(id);
            return Err(e.into());
        }
        Ok(id)
    }

    fn register(&self, handle: ConnectionHandle) -> ConnectionId {
        loop {
            let id = ConnectionId(rand::random());
            match self.inner.connections.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(handle);
                    return id;
                }
                Entry::Occupied(_) => debug!(%id, "connection id collision, retrying"),
            }
        }
    }

    /// Queue a connection for removal by the next [`SmtpServer::drain`]
    pub fn request_close(&self, id: ConnectionId) {
        debug!(%id, "connection queued for close");
        self.inner.close_queue.lock().push_back(id);
    }

    /// Remove every queued connection from the table.
    ///
    /// Each removed connection gets a best-effort closing notice, its
    /// transcript is appended to the transaction log and its socket is
    /// shut down. Identities that are no longer present are skipped.
    /// Returns the number of connections removed.
    pub fn drain(&self) -> usize {
        let queued: Vec<ConnectionId> = self.inner.close_queue.lock().drain(..).collect();
        let notice = SmtpResponse::server_closing(&self.inner.config.domain);

        let mut closed = 0;
        for id in queued {
            let Some((_, handle)) = self.inner.connections.remove(&id) else {
                continue;
            };
            handle.link.notify_shutdown(&notice);
            self.inner.log.append(handle.link.take_transcript());
            handle.link.close();
            info!(%id, peer = %handle.peer, "connection closed");
            closed += 1;
        }
        closed
    }

    /// Stop accepting and close every live connection. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            info!("SMTP server shutting down");
        }
        let ids: Vec<ConnectionId> = self.inner.connections.iter().map(|e| *e.key()).collect();
        {
            let mut queue = self.inner.close_queue.lock();
            queue.extend(ids);
        }
        self.drain();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Store a delivered message and pass it to the delivery hook.
    ///
    /// A panicking hook is logged and otherwise ignored.
    pub fn notify_delivery(&self, email: Email) {
        info!(
            sender = %email.sender,
            recipient = %email.recipient,
            "received mail"
        );
        self.store(email.clone());

        let hooks = &self.inner.hooks;
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            hooks.on_mail_received(&email.recipient, &email)
        }));
        if delivered.is_err() {
            error!(recipient = %email.recipient, "delivery hook panicked");
        }
    }

    fn store(&self, email: Email) {
        let capacity = self.inner.config.mail_store_capacity;
        if capacity == 0 {
            return;
        }
        let mut mailbox = self.inner.mailbox.lock();
        while mailbox.len() >= capacity {
            mailbox.pop_front();
        }
        mailbox.push_back(email);
    }

    /// Ask the delivery hook whether `user` has a mailbox; a panicking hook means no
    pub fn has_mailbox(&self, user: &str) -> bool {
        let hooks = &self.inner.hooks;
        panic::catch_unwind(AssertUnwindSafe(|| hooks.has_mailbox(user))).unwrap_or_else(|_| {
            error!(user, "mailbox hook panicked");
            false
        })
    }

    /// Ask the delivery hook to check a login; a panicking hook means invalid
    pub fn validate_login(&self, user: &str, credential: &str, method: AuthMethod) -> bool {
        let hooks = &self.inner.hooks;
        panic::catch_unwind(AssertUnwindSafe(|| {
            hooks.validate_login(user, credential, method)
        }))
        .unwrap_or_else(|_| {
            error!(user, "login hook panicked");
            false
        })
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            pending_mail: self.inner.mailbox.lock().len(),
            active_sessions: self.inner.connections.len(),
            log_entries: self.inner.log.len(),
        }
    }

    /// Copy of every stored message, oldest first
    pub fn received_emails(&self) -> Vec<Email> {
        self.inner.mailbox.lock().iter().cloned().collect()
    }

    /// Remove and return every stored message
    pub fn take_received_emails(&self) -> Vec<Email> {
        self.inner.mailbox.lock().drain(..).collect()
    }

    /// Copy of the retained connection transcripts, oldest first
    pub fn transaction_log(&self) -> Vec<TranscriptEntry> {
        self.inner.log.snapshot()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.connections.iter().map(|e| *e.key()).collect()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.inner.connections.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::hooks::ChannelHook;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    /// Accept one client socket directly, without running the accept loop
    fn connect(server: &SmtpServer) -> (ConnectionId, TcpStream, BufReader<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let id = server.accept(stream).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(client.try_clone().unwrap());
        (id, client, reader)
    }

    fn read_reply(reader: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_server_creation() {
        let server = SmtpServer::new("test.local");
        assert_eq!(server.config().domain, "test.local");
        assert_eq!(
            server.status(),
            ServerStatus {
                pending_mail: 0,
                active_sessions: 0,
                log_entries: 0
            }
        );
    }

    #[test]
    fn test_accept_registers_and_greets() {
        let server = SmtpServer::new("test.local");
        let (id, _client, mut reader) = connect(&server);

        assert!(server.is_connected(id));
        assert_eq!(server.connection_ids(), vec![id]);
        assert!(read_reply(&mut reader).starts_with("220 test.local"));
    }

    #[test]
    fn test_request_close_is_deferred_until_drain() {
        let server = SmtpServer::new("test.local");
        let (id, _client, mut reader) = connect(&server);
        read_reply(&mut reader);

        server.request_close(id);
        assert!(server.is_connected(id));

        assert_eq!(server.drain(), 1);
        assert!(!server.is_connected(id));
        assert!(read_reply(&mut reader).starts_with("221 "));
        assert_eq!(server.status().log_entries, 1);

        // Queuing an identity that is already gone is harmless.
        server.request_close(id);
        assert_eq!(server.drain(), 0);
    }

    #[test]
    fn test_quit_then_drain_records_transcript() {
        let server = SmtpServer::new("test.local");
        let (id, mut client, mut reader) = connect(&server);
        read_reply(&mut reader);

        client.write_all(b"NOOP\r\nQUIT\r\n").unwrap();
        assert!(read_reply(&mut reader).starts_with("250"));
        assert!(read_reply(&mut reader).starts_with("221"));

        assert!(wait_for(|| {
            server.drain();
            !server.is_connected(id)
        }));

        let log = server.transaction_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0][0], "S: 220 test.local ESMTP service ready");
        assert!(log[0].contains(&"C: NOOP".to_string()));
        assert!(log[0].contains(&"C: QUIT".to_string()));
        // No second goodbye after QUIT.
        assert_eq!(log[0].iter().filter(|l| l.starts_with("S: 221")).count(), 1);

        let mut rest = Vec::new();
        assert_eq!(reader.read_to_end(&mut rest).unwrap(), 0);
    }

    #[test]
    fn test_peer_disconnect_is_cleaned_up() {
        let server = SmtpServer::new("test.local");
        let (id, client, mut reader) = connect(&server);
        read_reply(&mut reader);
        drop(reader);
        drop(client);

        assert!(wait_for(|| {
            server.drain();
            !server.is_connected(id)
        }));
        assert_eq!(server.status().active_sessions, 0);
    }

    #[test]
    fn test_shutdown_closes_everything_and_is_idempotent() {
        let server = SmtpServer::new("test.local");
        let (first, _c1, mut r1) = connect(&server);
        let (second, _c2, mut r2) = connect(&server);
        read_reply(&mut r1);
        read_reply(&mut r2);

        server.shutdown();
        assert!(server.is_stopped());
        assert!(!server.is_connected(first));
        assert!(!server.is_connected(second));
        assert!(read_reply(&mut r1).starts_with("221"));
        assert!(read_reply(&mut r2).starts_with("221"));
        assert_eq!(server.status().log_entries, 2);

        server.shutdown();
        assert_eq!(server.status().log_entries, 2);
    }

    #[test]
    fn test_notify_delivery_stores_and_calls_hook() {
        let (tx, rx) = mpsc::channel();
        let server = SmtpServer::with_hooks(ServerConfig::new("test.local"), ChannelHook::new(tx));
        let email = Email::new(
            "a@a.test".into(),
            "b@b.test".into(),
            vec!["hi".into()],
            Vec::new(),
        );

        server.notify_delivery(email.clone());
        assert_eq!(rx.try_recv().unwrap(), email);
        assert_eq!(server.status().pending_mail, 1);
        assert_eq!(server.take_received_emails(), vec![email]);
        assert_eq!(server.status().pending_mail, 0);
    }

    #[test]
    fn test_mail_store_keeps_newest_messages() {
        let config = ServerConfig {
            mail_store_capacity: 2,
            ..ServerConfig::new("test.local")
        };
        let server = SmtpServer::with_config(config);
        for recipient in ["a@a.test", "b@b.test", "c@c.test"] {
            server.notify_delivery(Email::new(
                "sender@a.test".into(),
                recipient.into(),
                Vec::new(),
                Vec::new(),
            ));
        }

        assert_eq!(server.status().pending_mail, 2);
        let recipients: Vec<String> = server
            .received_emails()
            .into_iter()
            .map(|email| email.recipient)
            .collect();
        assert_eq!(recipients, vec!["b@b.test", "c@c.test"]);

        let config = ServerConfig {
            mail_store_capacity: 0,
            ..ServerConfig::new("test.local")
        };
        let server = SmtpServer::with_config(config);
        server.notify_delivery(Email::new(
            "sender@a.test".into(),
            "a@a.test".into(),
            Vec::new(),
            Vec::new(),
        ));
        assert_eq!(server.status().pending_mail, 0);
    }

    struct PanickingHooks;

    impl DeliveryHook for PanickingHooks {
        fn has_mailbox(&self, _user: &str) -> bool {
            panic!("mailbox lookup failed")
        }

        fn validate_login(&self, _user: &str, _credential: &str, _method: AuthMethod) -> bool {
            panic!("login lookup failed")
        }

        fn on_mail_received(&self, _recipient: &str, _message: &Email) {
            panic!("delivery failed")
        }
    }

    #[test]
    fn test_panicking_hooks_are_contained() {
        let server = SmtpServer::with_hooks(ServerConfig::new("test.local"), PanickingHooks);
        assert!(!server.has_mailbox("user"));
        assert!(!server.validate_login("user", "pw", AuthMethod::Login));

        server.notify_delivery(Email::new(
            "a@a.test".into(),
            "b@b.test".into(),
            Vec::new(),
            Vec::new(),
        ));
        assert_eq!(server.status().pending_mail, 1);
    }

    #[test]
    fn test_default_hooks_validate_login() {
        let server = SmtpServer::new("test.local");
        assert!(server.validate_login("user", "pw", AuthMethod::Plain));
        assert!(server.has_mailbox("user"));
    }

    #[test]
    fn test_status_display() {
        let status = ServerStatus {
            pending_mail: 2,
            active_sessions: 1,
            log_entries: 3,
        };
        assert_eq!(
            status.to_string(),
            "SMTP server status: 1 active session(s), 2 pending message(s), 3 logged transaction(s)"
        );
    }
}
