//! Protocol Module
//!
//! Defines the message model and the wire format shared by clients and
//! servers.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Tag (T)  │ Size (4) │            Body             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Body Convention
//! The body is a stack. `append` pushes a value's bytes at the tail and
//! `extract` pops them from the tail, so a peer must extract fields in the
//! reverse order they were appended.
//!
//! ### Header Layout
//! The header is packed: the size field starts right after the tag's
//! `size_of::<T>()` bytes, with no alignment padding. A `u8` tag gives a
//! 5-byte header, not the 8 bytes a padded C struct would occupy. Peers
//! that send a raw `struct { T id; uint32_t size; }` only match byte for
//! byte when that struct has no padding, as with a 4-byte tag.
//!
//! ### Limitations
//! - Host byte order: peers of differing endianness do not interoperate
//! - Packed header: no byte-for-byte interop with padded C-struct headers
//!   for narrow tags
//! - No checksum, magic number or version field

mod message;
mod codec;

pub use message::{Message, MessageHeader, MessageTag, OwnedMessage};
pub use codec::{
    check_body_size, decode_header, encode_header, encode_message, read_message, write_message,
};
