//! Tests for Message
//!
//! These tests verify:
//! - Stack ordering of append/extract (last in, first out)
//! - header.size always tracking the body length
//! - Underflow handling
//! - Application-defined tags

use framelink::{LinkError, Message, MessageHeader};
use zerocopy::{FromBytes, Immutable, IntoBytes};

#[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable)]
#[repr(transparent)]
struct GameTag(u16);

const PING: GameTag = GameTag(3);

// =============================================================================
// Append / Extract Tests
// =============================================================================

#[test]
fn test_append_then_extract_restores_value_and_size() {
    let mut msg = Message::new(1u32);
    msg.append(0xDEADu16).unwrap();
    let size_before = msg.header().size;

    msg.append(123_456_789u64).unwrap();
    assert_eq!(msg.header().size, size_before + 8);

    assert_eq!(msg.extract::<u64>().unwrap(), 123_456_789);
    assert_eq!(msg.header().size, size_before);
}

#[test]
fn test_extract_order_is_reverse_of_append() {
    let mut msg = Message::new(1u32);
    msg.append(1u8).unwrap();
    msg.append(2u16).unwrap();
    msg.append(3u64).unwrap();

    assert_eq!(msg.extract::<u64>().unwrap(), 3);
    assert_eq!(msg.extract::<u16>().unwrap(), 2);
    assert_eq!(msg.extract::<u8>().unwrap(), 1);
    assert!(msg.body().is_empty());
}

#[test]
fn test_size_tracks_body_through_mixed_sequence() {
    let mut msg = Message::new(1u32);
    assert_eq!(msg.header().size, 0);

    msg.append(1.5f32).unwrap();
    assert_eq!(msg.header().size as usize, msg.body().len());

    msg.append([7u8; 10]).unwrap();
    assert_eq!(msg.header().size as usize, msg.body().len());

    msg.extract::<[u8; 3]>().unwrap();
    assert_eq!(msg.header().size as usize, msg.body().len());

    msg.append(-42i32).unwrap();
    assert_eq!(msg.header().size as usize, msg.body().len());
    assert_eq!(msg.header().size, 4 + 7 + 4);
}

#[test]
fn test_append_uses_host_byte_order() {
    let mut msg = Message::new(1u32);
    msg.append(0x0102_0304u32).unwrap();

    assert_eq!(msg.body(), &0x0102_0304u32.to_ne_bytes());
}

#[test]
fn test_append_chains() {
    let mut msg = Message::new(1u32);
    msg.append(1u32).unwrap().append(2u32).unwrap();

    assert_eq!(msg.header().size, 8);
    assert_eq!(msg.extract::<u32>().unwrap(), 2);
}

#[test]
fn test_float_and_array_values() {
    let mut msg = Message::new(1u32);
    msg.append([1.0f64, -2.5, 1e9]).unwrap();
    msg.append(0.25f32).unwrap();

    assert_eq!(msg.extract::<f32>().unwrap(), 0.25);
    assert_eq!(msg.extract::<[f64; 3]>().unwrap(), [1.0, -2.5, 1e9]);
}

// =============================================================================
// Underflow Tests
// =============================================================================

#[test]
fn test_extract_from_empty_body_fails() {
    let mut msg = Message::new(1u32);
    let result = msg.extract::<u32>();

    match result {
        Err(LinkError::BodyUnderflow { needed, available }) => {
            assert_eq!(needed, 4);
            assert_eq!(available, 0);
        }
        other => panic!("Expected underflow, got {:?}", other),
    }
}

#[test]
fn test_failed_extract_leaves_body_untouched() {
    let mut msg = Message::new(1u32);
    msg.append(5u16).unwrap();

    assert!(msg.extract::<u64>().is_err());
    assert_eq!(msg.header().size, 2);
    assert_eq!(msg.extract::<u16>().unwrap(), 5);
}

// =============================================================================
// Construction and Display Tests
// =============================================================================

#[test]
fn test_from_parts_sets_size() {
    let msg = Message::from_parts(4u32, vec![1, 2, 3]).unwrap();
    assert_eq!(msg.header().size, 3);
    assert_eq!(msg.size(), MessageHeader::<u32>::WIRE_SIZE + 3);
}

#[test]
fn test_display_shows_tag_and_size() {
    let mut msg = Message::new(7u32);
    msg.append(0u32).unwrap();
    assert_eq!(msg.to_string(), "ID: 7 Size: 4");
}

#[test]
fn test_set_id_keeps_body() {
    let mut msg = Message::new(1u32);
    msg.append(9u8).unwrap();
    msg.set_id(2);

    assert_eq!(msg.id(), 2);
    assert_eq!(msg.body(), &[9]);
}

#[test]
fn test_application_defined_tag() {
    let mut msg = Message::new(PING);
    msg.append(77u32).unwrap();

    assert_eq!(msg.id(), PING);
    assert_eq!(MessageHeader::<GameTag>::WIRE_SIZE, 6);
    assert_eq!(msg.extract::<u32>().unwrap(), 77);
}
