//! Message types
//!
//! A message is a fixed header followed by a body that behaves like a stack:
//! values are appended at the tail and extracted from the tail, so the last
//! value appended is the first one extracted.

use std::fmt;
use std::mem::size_of;
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::error::{LinkError, Result};
use crate::network::Connection;

/// Application-defined message type discriminator.
///
/// Any fixed-size type without padding whose every bit pattern is valid
/// qualifies: the primitive integers, arrays of them, or a
/// `#[repr(transparent)]` newtype deriving the zerocopy traits.
pub trait MessageTag:
    FromBytes + IntoBytes + Immutable + Copy + Send + Sync + fmt::Debug + 'static
{
}

impl<T> MessageTag for T where
    T: FromBytes + IntoBytes + Immutable + Copy + Send + Sync + fmt::Debug + 'static
{
}

/// Fixed-size message header
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader<T> {
    /// Application-defined tag
    pub id: T,

    /// Body length in bytes
    pub size: u32,
}

impl<T: MessageTag> MessageHeader<T> {
    /// Bytes the header occupies on the wire: tag followed by a u32 size,
    /// packed with no padding in between
    pub const WIRE_SIZE: usize = size_of::<T>() + size_of::<u32>();

    pub fn new(id: T) -> Self {
        Self { id, size: 0 }
    }
}

/// A typed message: header plus raw body bytes
#[derive(Debug, Clone)]
pub struct Message<T> {
    header: MessageHeader<T>,
    body: BytesMut,
}

impl<T: MessageTag> Message<T> {
    /// Create an empty message with the given tag
    pub fn new(id: T) -> Self {
        Self {
            header: MessageHeader::new(id),
            body: BytesMut::new(),
        }
    }

    /// Build a message from a tag and an already laid-out body
    pub fn from_parts(id: T, body: Vec<u8>) -> Result<Self> {
        Self::from_frame(id, BytesMut::from(body.as_slice()))
    }

    /// Build a message around a body split off a read buffer
    pub(crate) fn from_frame(id: T, body: BytesMut) -> Result<Self> {
        let size = u32::try_from(body.len()).map_err(|_| LinkError::BodyTooLarge(body.len()))?;
        Ok(Self {
            header: MessageHeader { id, size },
            body,
        })
    }

    /// The message header; `size` always tracks the body length
    pub fn header(&self) -> &MessageHeader<T> {
        &self.header
    }

    /// The message tag
    pub fn id(&self) -> T {
        self.header.id
    }

    /// Retag the message, leaving the body alone
    pub fn set_id(&mut self, id: T) {
        self.header.id = id;
    }

    /// Raw body bytes
    pub fn body(&self) -> &[u8] {
        &self.body[..]
    }

    /// Total size of the message in bytes, header included
    pub fn size(&self) -> usize {
        MessageHeader::<T>::WIRE_SIZE + self.body.len()
    }

    /// Copy `value`'s bytes onto the tail of the body
    pub fn append<V>(&mut self, value: V) -> Result<&mut Self>
    where
        V: IntoBytes + Immutable,
    {
        let bytes = value.as_bytes();
        let new_len = self.body.len() + bytes.len();
        if new_len > u32::MAX as usize {
            return Err(LinkError::BodyTooLarge(new_len));
        }

        self.body.extend_from_slice(bytes);
        self.header.size = new_len as u32;
        Ok(self)
    }

    /// Remove a `V` from the tail of the body.
    ///
    /// Fails without touching the body when fewer than `size_of::<V>()`
    /// bytes remain.
    pub fn extract<V>(&mut self) -> Result<V>
    where
        V: FromBytes,
    {
        let needed = size_of::<V>();
        let available = self.body.len();
        let start = available
            .checked_sub(needed)
            .ok_or(LinkError::BodyUnderflow { needed, available })?;

        let value = V::read_from_bytes(&self.body[start..])
            .map_err(|_| LinkError::BodyUnderflow { needed, available })?;

        self.body.truncate(start);
        self.header.size = start as u32;
        Ok(value)
    }
}

impl<T: MessageTag> fmt::Display for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {:?} Size: {}", self.header.id, self.header.size)
    }
}

/// A received message together with where it came from.
///
/// On the server the origin is a weak reference to the sending connection;
/// on the client it is always `None` (the one server).
#[derive(Debug)]
pub struct OwnedMessage<T: MessageTag> {
    pub remote: Option<Weak<Connection<T>>>,
    pub msg: Message<T>,
}

impl<T: MessageTag> OwnedMessage<T> {
    /// The originating connection, if it is still alive
    pub fn sender(&self) -> Option<Arc<Connection<T>>> {
        self.remote.as_ref().and_then(Weak::upgrade)
    }
}

impl<T: MessageTag> fmt::Display for OwnedMessage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.msg, f)
    }
}
