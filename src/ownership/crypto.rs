//! Deterministic, reversible transform for files stored on another peer's
//! behalf. Not a security boundary — the key is derived
//! entirely from public information (owner address + filename) so any
//! peer holding the owner's current address can reconstruct it. Its job is
//! to keep a storage peer from reading a meaningful byte-for-byte copy of
//! plaintext it didn't write, not to resist a targeted attacker.

use crate::types::Address;
use sha3::{Digest, Sha3_256};

fn derive_key(owner_address: &Address, filename: &str) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(owner_address.to_socket_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(filename.as_bytes());
    hasher.finalize().into()
}

fn keystream(key: &[u8; 32], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while out.len() < len {
        let mut hasher = Sha3_256::new();
        hasher.update(key);
        hasher.update(counter.to_be_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

/// XOR-based stream transform. Self-inverse: calling this on ciphertext
/// with the same `owner_address`/`filename` recovers the plaintext.
pub fn transform(data: &[u8], owner_address: &Address, filename: &str) -> Vec<u8> {
    let key = derive_key(owner_address, filename);
    let stream = keystream(&key, data.len());
    data.iter().zip(stream.iter()).map(|(a, b)| a ^ b).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_is_its_own_inverse() {
        let addr = Address::new("1.2.3.4", 9000);
        let plaintext = b"the quick brown fox";
        let ciphertext = transform(plaintext, &addr, "doc.txt");
        assert_ne!(ciphertext, plaintext);
        let recovered = transform(&ciphertext, &addr, "doc.txt");
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn different_filenames_produce_different_ciphertext() {
        let addr = Address::new("1.2.3.4", 9000);
        let plaintext = b"same bytes";
        let a = transform(plaintext, &addr, "a.txt");
        let b = transform(plaintext, &addr, "b.txt");
        assert_ne!(a, b);
    }
}
