//! Network Module
//!
//! TCP client and server built on per-connection read/write pipelines.
//!
//! ## Architecture
//! - One reactor thread per client or server drives every socket it owns
//! - Each connection runs a read pipeline and a write pipeline
//! - Application threads post sends and drain the inbound queue
//! - Servers dispatch through an explicit `update` pump

mod reactor;
mod connection;
mod handler;
mod client;
mod server;

pub use reactor::Reactor;
pub use connection::{Connection, ConnectionState, Role};
pub use handler::{LoggingHandler, ServerHandler};
pub use client::Client;
pub use server::Server;
