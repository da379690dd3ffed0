//! Server hooks
//!
//! Application logic plugs into a [`Server`](crate::Server) by implementing
//! [`ServerHandler`]. Every method has a logging default.

use std::sync::Arc;

use crate::protocol::{Message, MessageTag};
use super::Connection;

/// Callbacks a server invokes over a connection's lifetime
pub trait ServerHandler<T: MessageTag>: Send + Sync + 'static {
    /// Called on the reactor thread for every accepted socket, before it is
    /// registered. Returning false closes and discards the connection.
    fn on_client_connected(&self, connection: &Arc<Connection<T>>) -> bool {
        tracing::info!("Client connected from {:?}", connection.peer_addr());
        true
    }

    /// Called once for each dead connection, after it has been taken out of
    /// the connection list.
    fn on_client_disconnected(&self, connection: &Arc<Connection<T>>) {
        tracing::info!("Removing client {}", connection.id());
    }

    /// Called from [`Server::update`](crate::Server::update) for every
    /// dispatched message. `sender` is `None` if the connection is gone.
    fn on_message_received(&self, sender: Option<Arc<Connection<T>>>, message: Message<T>) {
        tracing::debug!(
            "Message from {:?}: {}",
            sender.map(|c| c.id()),
            message
        );
    }
}

/// Handler that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl<T: MessageTag> ServerHandler<T> for LoggingHandler {}
