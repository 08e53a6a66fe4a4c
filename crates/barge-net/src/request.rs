//! A decoded message paired with the connection it arrived on.

use std::sync::{Arc, Weak};

use barge_proto::Message;

use crate::conn::Connection;

/// One unit of work for the broker: the message plus a non-owning
/// handle on its connection. The weak reference keeps a queued request
/// from extending a socket's lifetime past the loop closing it; by the
/// time a worker runs, the connection may simply be gone.
#[derive(Debug)]
pub struct Request {
    connection: Weak<Connection>,
    message: Message,
}

impl Request {
    /// Pair a message with its originating connection.
    #[must_use]
    pub fn new(connection: Weak<Connection>, message: Message) -> Self {
        Self {
            connection,
            message,
        }
    }

    /// The originating connection, if it is still alive.
    #[must_use]
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }

    /// Borrow the message.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Take the message out of the request.
    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }
}
