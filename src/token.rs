//! Device token handling.
//!
//! APNs device tokens travel hex-encoded in the request path. The token is
//! stored in its canonical form (lowercase hex) no matter which constructor
//! produced it, so equality and logging behave consistently.

use std::fmt;

/// An APNs device token in canonical lowercase-hex form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceToken(String);

impl DeviceToken {
    /// Create a token from raw token bytes.
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self(hex::encode(raw))
    }

    /// Create a token from a hex string.
    ///
    /// Decoding is lenient: non-hex characters are skipped and a trailing
    /// unpaired nibble is dropped. The result is re-encoded, so the stored
    /// form is always canonical lowercase hex.
    pub fn from_hex(token: &str) -> Self {
        Self(hex::encode(decode_lenient(token)))
    }

    /// The canonical hex form of the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decode hex, skipping anything that is not a hex digit and dropping a
/// trailing unpaired nibble.
fn decode_lenient(input: &str) -> Vec<u8> {
    let mut nibbles = input
        .chars()
        .filter_map(|c| c.to_digit(16).map(|d| d as u8));

    let mut bytes = Vec::with_capacity(input.len() / 2);
    while let Some(hi) = nibbles.next() {
        let Some(lo) = nibbles.next() else { break };
        bytes.push(hi << 4 | lo);
    }
    bytes
}
