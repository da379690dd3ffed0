//! # framelink
//!
//! An asynchronous TCP messaging transport for custom application protocols:
//! - Typed, length-prefixed binary messages
//! - Symmetric client and server roles over persistent connections
//! - One reactor thread per endpoint driving every socket it owns
//! - Pull-model inbound queue, explicit server dispatch pump
//!
//! ## Architecture Overview
//!
//! ```text
//!   Application threads                    Reactor thread
//! ┌──────────────────────┐          ┌────────────────────────────────┐
//! │ send(msg) ───────────┼─ post ──►│ write pipeline                 │
//! │                      │          │  outbound queue ──► socket     │
//! │                      │          │                                │
//! │ update() / queue() ◄─┼─ pop ────┤ read pipeline                  │
//! │                      │          │  socket ──► inbound queue      │
//! └──────────────────────┘          │                                │
//!                                   │ accept loop (server only)      │
//!                                   └────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use framelink::{Client, Message, Server};
//!
//! let mut server: Server<u32> = Server::with_logging(60000);
//! server.start().unwrap();
//!
//! let mut client: Client<u32> = Client::new();
//! client.connect("127.0.0.1", 60000).unwrap();
//!
//! let mut msg = Message::new(1u32);
//! msg.append(42u64).unwrap();
//! client.send(msg).unwrap();
//!
//! server.update(Some(1), true);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod queue;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LinkError, Result};
pub use config::Config;
pub use protocol::{Message, MessageHeader, MessageTag, OwnedMessage};
pub use queue::MessageQueue;
pub use network::{Client, Connection, ConnectionState, LoggingHandler, Role, Server, ServerHandler};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of framelink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
