//! Protocol codec
//!
//! Encoding and decoding functions for the wire format.
//!
//! ## Wire Format
//! ```text
//! ┌────────────────────┬──────────┬─────────────────────────────┐
//! │ Tag (size_of::<T>) │ Size (4) │       Body (Size bytes)     │
//! └────────────────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! All fields are in host byte order. There is no magic number, version
//! field or checksum.

use std::io::{Read, Write};
use std::mem::size_of;

use bytes::{Buf, BufMut, BytesMut};
use zerocopy::{FromBytes, IntoBytes};

use crate::error::{LinkError, Result};
use super::{Message, MessageHeader, MessageTag};

// =============================================================================
// Header Encoding/Decoding
// =============================================================================

/// Append the wire form of `header` to `buf`
pub fn encode_header<T: MessageTag, B: BufMut>(header: &MessageHeader<T>, buf: &mut B) {
    buf.put_slice(header.id.as_bytes());
    buf.put_u32_ne(header.size);
}

/// Decode a header from the first `MessageHeader::<T>::WIRE_SIZE` bytes
pub fn decode_header<T: MessageTag>(bytes: &[u8]) -> Result<MessageHeader<T>> {
    if bytes.len() < MessageHeader::<T>::WIRE_SIZE {
        return Err(LinkError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            MessageHeader::<T>::WIRE_SIZE,
            bytes.len()
        )));
    }

    let tag_len = size_of::<T>();
    let id = T::read_from_bytes(&bytes[..tag_len])
        .map_err(|_| LinkError::Protocol("Unreadable message tag".to_string()))?;

    let mut rest = &bytes[tag_len..];
    let size = rest.get_u32_ne();

    Ok(MessageHeader { id, size })
}

/// Check a declared body size against the configured limit
pub fn check_body_size(size: u32, max_body_size: u32) -> Result<()> {
    if size > max_body_size {
        return Err(LinkError::Protocol(format!(
            "Body too large: {} bytes (max {})",
            size, max_body_size
        )));
    }
    Ok(())
}

// =============================================================================
// Message Encoding
// =============================================================================

/// Encode a whole message (header + body) to bytes
pub fn encode_message<T: MessageTag>(message: &Message<T>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(message.size());
    encode_header(message.header(), &mut bytes);
    bytes.extend_from_slice(message.body());
    bytes
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete message from a blocking stream
///
/// Blocks until a complete message is received or an error occurs
pub fn read_message<T: MessageTag, R: Read>(reader: &mut R, max_body_size: u32) -> Result<Message<T>> {
    // Read header first
    let mut header = vec![0u8; MessageHeader::<T>::WIRE_SIZE];
    reader.read_exact(&mut header)?;
    let header = decode_header::<T>(&header)?;

    check_body_size(header.size, max_body_size)?;

    // Read body
    let mut body = BytesMut::zeroed(header.size as usize);
    if !body.is_empty() {
        reader.read_exact(&mut body[..])?;
    }

    Message::from_frame(header.id, body)
}

/// Write a message to a blocking stream
pub fn write_message<T: MessageTag, W: Write>(writer: &mut W, message: &Message<T>) -> Result<()> {
    writer.write_all(&encode_message(message))?;
    writer.flush()?;
    Ok(())
}
