//! Queue Module
//!
//! Thread-safe FIFO used as the inbound message queue.
//!
//! ## Responsibilities
//! - Accept pushes from the reactor thread
//! - Serve pops from any number of application threads
//! - Strict arrival order
//! - Let a consumer block until something arrives
//!
//! ## Data Structure Choice
//! A `VecDeque` behind a parking_lot `Mutex`, paired with a `Condvar` for
//! the blocking wait. Every operation holds the lock only briefly.

mod message_queue;

pub use message_queue::MessageQueue;
