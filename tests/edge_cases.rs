#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the crypt framing layer.
//! Boundary conditions, truncated input, and desync behavior.

use bytes::{BufMut, Bytes, BytesMut};
use frontier_protocol::core::codec::CryptCodec;
use frontier_protocol::core::crypto;
use frontier_protocol::error::ProtocolError;
use frontier_protocol::{CryptHeader, CRYPT_HEADER_LEN};
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// HEADER CODEC EDGE CASES
// ============================================================================

#[test]
fn test_header_rejects_everything_but_fourteen_bytes() {
    for len in [0usize, 1, 13, 15, 28] {
        let result = CryptHeader::decode(&vec![0u8; len]);
        assert!(
            matches!(result, Err(ProtocolError::MalformedHeader(_))),
            "length {len} should be rejected"
        );
    }
    assert!(CryptHeader::decode(&[0u8; CRYPT_HEADER_LEN]).is_ok());
}

#[test]
fn test_header_field_offsets_are_stable() {
    let header = CryptHeader {
        pf0: 0x03,
        key_rot_delta: 0x05,
        packet_num: 0x1122,
        data_size: 0x3344,
        prev_packet_combined_check: 0x5566,
        check0: 0x7788,
        check1: 0x99AA,
        check2: 0xBBCC,
    };
    assert_eq!(
        header.encode(),
        [0x03, 0x05, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC]
    );
}

// ============================================================================
// STREAM CODEC EDGE CASES
// ============================================================================

#[test]
fn test_empty_payload_frame() {
    let mut sender = CryptCodec::new();
    let mut receiver = CryptCodec::new();

    let mut buf = BytesMut::new();
    sender.encode(Bytes::new(), &mut buf).expect("encode");
    assert_eq!(buf.len(), CRYPT_HEADER_LEN);

    let out = receiver.decode(&mut buf).expect("decode").expect("frame");
    assert!(out.is_empty());
}

#[test]
fn test_max_payload_frame() {
    let mut sender = CryptCodec::new();
    let mut receiver = CryptCodec::new();

    let payload = vec![0x5Au8; usize::from(u16::MAX)];
    let mut buf = BytesMut::new();
    sender
        .encode(Bytes::from(payload.clone()), &mut buf)
        .expect("encode");

    let out = receiver.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(out.len(), payload.len());
    assert_eq!(&out[..], &payload[..]);
}

#[test]
fn test_oversized_payload_rejected_before_framing() {
    let mut sender = CryptCodec::new();
    let mut buf = BytesMut::new();
    let result = sender.encode(Bytes::from(vec![0u8; usize::from(u16::MAX) + 1]), &mut buf);
    assert!(matches!(result, Err(ProtocolError::OversizedPayload(_))));
}

#[test]
fn test_truncated_header_waits() {
    let mut receiver = CryptCodec::new();
    let mut buf = BytesMut::from(&[0u8; CRYPT_HEADER_LEN - 1][..]);
    assert!(receiver.decode(&mut buf).expect("decode").is_none());
    // Nothing may be consumed while the frame is incomplete.
    assert_eq!(buf.len(), CRYPT_HEADER_LEN - 1);
}

#[test]
fn test_truncated_body_waits() {
    let mut sender = CryptCodec::new();
    let mut receiver = CryptCodec::new();

    let mut frame = BytesMut::new();
    sender
        .encode(Bytes::from_static(b"held back"), &mut frame)
        .expect("encode");

    let full = frame.len();
    let mut buf = frame.split_to(full - 1);
    assert!(receiver.decode(&mut buf).expect("decode").is_none());
    assert_eq!(buf.len(), full - 1);

    buf.unsplit(frame);
    let out = receiver.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(&out[..], b"held back");
}

#[test]
fn test_two_frames_in_one_buffer() {
    let mut sender = CryptCodec::new();
    let mut receiver = CryptCodec::new();

    let mut buf = BytesMut::new();
    sender.encode(Bytes::from_static(b"one"), &mut buf).expect("encode");
    sender.encode(Bytes::from_static(b"two"), &mut buf).expect("encode");

    let first = receiver.decode(&mut buf).expect("decode").expect("frame");
    let second = receiver.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(&first[..], b"one");
    assert_eq!(&second[..], b"two");
    assert!(buf.is_empty());
}

#[test]
fn test_corrupted_header_checksum_is_fatal() {
    let mut sender = CryptCodec::new();
    let mut receiver = CryptCodec::new();

    let mut buf = BytesMut::new();
    sender
        .encode(Bytes::from_static(b"some payload"), &mut buf)
        .expect("encode");
    // Flip a bit in check0.
    buf[8] ^= 0x01;

    let result = receiver.decode(&mut buf);
    assert!(matches!(result, Err(ProtocolError::ChecksumMismatch)));
}

#[test]
fn test_zero_delta_skips_rotation() {
    // A frame ciphered under the untouched seed, with delta 0, decodes on
    // a fresh receiver whose key has never rotated.
    let (cipher, checks) =
        crypto::encrypt(b"seeded", frontier_protocol::core::codec::KEY_ROT_SEED, None);
    let header = CryptHeader {
        pf0: CryptHeader::pack_pf0(cipher.len()),
        key_rot_delta: 0,
        packet_num: 0,
        data_size: cipher.len() as u16,
        prev_packet_combined_check: 0,
        check0: checks.check0,
        check1: checks.check1,
        check2: checks.check2,
    };

    let mut buf = BytesMut::new();
    buf.put_slice(&header.encode());
    buf.put_slice(&cipher);

    let mut receiver = CryptCodec::new();
    let out = receiver.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(&out[..], b"seeded");
}
