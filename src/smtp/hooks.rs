//! Delivery hooks supplied by the embedding application

use crate::smtp::email::Email;
use crate::smtp::session::AuthMethod;
use std::sync::mpsc;

/// Callbacks the server consults for mailbox checks, logins and delivery.
///
/// Hooks are called from connection threads, possibly concurrently.
pub trait DeliveryHook: Send + Sync {
    /// Whether `user` has a mailbox on this server (used by `VRFY`)
    fn has_mailbox(&self, user: &str) -> bool;

    /// Whether the credential is valid for `user` under `method`
    fn validate_login(&self, user: &str, credential: &str, method: AuthMethod) -> bool;

    /// Called once per delivered message
    fn on_mail_received(&self, recipient: &str, message: &Email);
}

/// Accepts every mailbox and login and discards deliveries
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl DeliveryHook for DefaultHooks {
    fn has_mailbox(&self, _user: &str) -> bool {
        true
    }

    fn validate_login(&self, _user: &str, _credential: &str, _method: AuthMethod) -> bool {
        true
    }

    fn on_mail_received(&self, _recipient: &str, _message: &Email) {}
}

/// Forwards every delivered message into a channel.
///
/// Useful for tests: receive with `recv_timeout()` instead of sleeping.
#[derive(Debug)]
pub struct ChannelHook {
    sender: mpsc::Sender<Email>,
}

impl ChannelHook {
    pub fn new(sender: mpsc::Sender<Email>) -> Self {
        Self { sender }
    }
}

impl DeliveryHook for ChannelHook {
    fn has_mailbox(&self, _user: &str) -> bool {
        true
    }

    fn validate_login(&self, _user: &str, _credential: &str, _method: AuthMethod) -> bool {
        true
    }

    fn on_mail_received(&self, recipient: &str, message: &Email) {
        // Errors when there are no listeners.
        if self.sender.send(message.clone()).is_err() {
            tracing::debug!(recipient, "no receiver for delivered message");
        }
    }
}
