//! Spill encryption (§4.2): pages written to a spill file are encrypted so
//! that data a query spills to local disk cannot be recovered once the
//! spill file is deleted, without requiring the disk itself to be wiped.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use crate::error::MalformedPage;

const NONCE_LEN: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Encrypts/decrypts page payloads before they touch a spill file. Exactly
/// one nonce is generated per call to [`Self::encrypt`] and prepended to
/// the ciphertext so [`Self::decrypt`] is self-contained.
pub trait SpillCipher: std::fmt::Debug + Send + Sync {
    /// Encrypt `plaintext`, returning a self-describing ciphertext.
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8>;

    /// Decrypt a ciphertext produced by [`Self::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, MalformedPage>;
}

/// AES-256-CTR with a random nonce per page, the default [`SpillCipher`].
pub struct Aes256CtrCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for Aes256CtrCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes256CtrCipher").finish_non_exhaustive()
    }
}

impl Aes256CtrCipher {
    /// Construct from a 256-bit key, typically generated once per worker
    /// process and never persisted.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Generate a fresh key from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self::new(key)
    }
}

impl SpillCipher for Aes256CtrCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let mut buf = plaintext.to_vec();
        let mut cipher = Aes256Ctr::new((&self.key).into(), (&nonce).into());
        cipher.apply_keystream(&mut buf);

        let mut out = Vec::with_capacity(NONCE_LEN + buf.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&buf);
        out
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, MalformedPage> {
        if ciphertext.len() < NONCE_LEN {
            return Err(MalformedPage::decryption_failed(
                "ciphertext shorter than the nonce",
            ));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        let mut buf = body.to_vec();
        let mut cipher = Aes256Ctr::new((&self.key).into(), nonce.into());
        cipher.apply_keystream(&mut buf);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let cipher = Aes256CtrCipher::new([7u8; 32]);
        let plaintext = b"the quick brown fox jumps over the lazy dog".to_vec();
        let ciphertext = cipher.encrypt(&plaintext);
        assert_ne!(ciphertext[NONCE_LEN..], plaintext[..]);
        let decrypted = cipher.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let cipher = Aes256CtrCipher::new([3u8; 32]);
        let plaintext = b"same input, different nonce".to_vec();
        let a = cipher.encrypt(&plaintext);
        let b = cipher.encrypt(&plaintext);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let cipher = Aes256CtrCipher::new([1u8; 32]);
        let err = cipher.decrypt(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, MalformedPage::Malformed { .. }));
    }
}
