//! Canonical CBOR encoding for manifest signatures.
//!
//! The manifest MAC is computed over these bytes, and any member may re-sign
//! a manifest, so every client must produce identical bytes for identical
//! content. The encoder follows RFC 8949 Core Deterministic Encoding:
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - Map keys in ascending order
//!
//! Member order is preserved as given, never sorted: re-signing unchanged
//! content must not reorder it.

use crate::types::{SpaceHandle, UserId};

/// Domain separator prefixed to every manifest encoding.
pub const MANIFEST_DOMAIN: &[u8] = b"sealpipe-manifest-v1";

/// Manifest field keys (integer keys for compact encoding).
mod keys {
    pub const VERSION: u64 = 0;
    pub const HANDLE: u64 = 1;
    pub const USERS: u64 = 2;
}

/// Manifest encoding version.
const VERSION: u64 = 1;

/// Encode manifest content to the bytes covered by its MAC.
///
/// Format: `MANIFEST_DOMAIN || cbor({0: version, 1: handle, 2: [users]})`
pub fn manifest_bytes(handle: &SpaceHandle, users: &[UserId]) -> Vec<u8> {
    let mut buf = MANIFEST_DOMAIN.to_vec();

    encode_uint(&mut buf, 5, 3);

    encode_uint(&mut buf, 0, keys::VERSION);
    encode_uint(&mut buf, 0, VERSION);

    encode_uint(&mut buf, 0, keys::HANDLE);
    encode_text(&mut buf, handle.as_str());

    encode_uint(&mut buf, 0, keys::USERS);
    encode_uint(&mut buf, 4, users.len() as u64);
    for user in users {
        encode_text(&mut buf, user.as_str());
    }

    buf
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}
