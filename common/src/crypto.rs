//! Cryptography helpers shared by plugins that need to derive an
//! identifier from raw bytes rather than trust one supplied upstream.

use blake2::{digest::consts::U32, Blake2b, Digest};

/// Blake2b-256 hash of `bytes`, hex-encoded — used by the mempool input to
/// derive a transaction's hash from its raw CBOR body, mirroring how a
/// chain-sync source's own hash derivation works on the wire.
pub fn blake2b_256_hex(bytes: &[u8]) -> String {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        assert_eq!(blake2b_256_hex(b"abc"), blake2b_256_hex(b"abc"));
        assert_ne!(blake2b_256_hex(b"abc"), blake2b_256_hex(b"abd"));
    }

    #[test]
    fn produces_64_hex_chars() {
        assert_eq!(blake2b_256_hex(b"abc").len(), 64);
    }
}
