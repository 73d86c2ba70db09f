//! Identity, handshake signatures and session encryption
//!
//! Each peer holds a long-term Ed25519 keypair. The handshake exchanges
//! public keys with signatures over a timestamp, then both sides derive the
//! same shared secret by mapping their signature keys onto Curve25519 and
//! performing a Diffie-Hellman agreement. The secret keys a ChaCha20-Poly1305
//! session cipher; nonces are built from explicit per-direction counters so
//! the transport can prefix the counter to each encrypted payload.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroize;

/// Public key length in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Signature length in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Shared secret length in bytes
pub const SHARED_SECRET_SIZE: usize = 32;

/// A peer's long-term signing identity
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a fresh random identity
    pub fn generate() -> Self {
        Identity {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore an identity from its 32-byte seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Identity {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Public key bytes as sent in the handshake
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message with the long-term key
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Derive the session secret shared with a remote peer
    ///
    /// Maps the remote Ed25519 key to its Curve25519 form and multiplies by
    /// our own secret scalar. Both sides arrive at the same point, so the
    /// handshake needs no extra ephemeral key exchange. An identity remote
    /// key (a low-order point) is rejected rather than producing an
    /// all-zero secret.
    pub fn shared_secret(
        &self,
        remote_public_key: &[u8; PUBLIC_KEY_SIZE],
    ) -> Result<SharedSecret, CryptoError> {
        let remote = parse_public_key(remote_public_key)?;
        let point: MontgomeryPoint = remote.to_montgomery() * self.signing_key.to_scalar();
        let bytes = point.to_bytes();
        if bytes.iter().all(|&b| b == 0) {
            return Err(CryptoError::WeakRemoteKey);
        }
        Ok(SharedSecret(bytes))
    }

    /// Short human-readable key fingerprint for logs
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key())
    }
}

/// Verify a signature against a peer's asserted public key
pub fn verify(
    public_key: &[u8; PUBLIC_KEY_SIZE],
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<(), CryptoError> {
    let key = parse_public_key(public_key)?;
    let signature = Signature::from_bytes(signature);
    key.verify(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

fn parse_public_key(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<VerifyingKey, CryptoError> {
    VerifyingKey::from_bytes(bytes).map_err(|_| CryptoError::BadPublicKey)
}

/// Format a public key as a short colon-separated fingerprint
pub fn fingerprint(public_key: &[u8; PUBLIC_KEY_SIZE]) -> String {
    public_key[..8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Session key material, zeroed when dropped
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Per-session AEAD cipher
///
/// Nonces are 12 bytes: four zero bytes followed by the big-endian 64-bit
/// counter the caller supplies. Each direction of a session uses its own
/// monotonic counter, so a (key, counter) pair is never reused.
pub struct SessionCipher {
    cipher: ChaCha20Poly1305,
}

impl SessionCipher {
    pub fn new(secret: &SharedSecret) -> Self {
        SessionCipher {
            cipher: ChaCha20Poly1305::new(Key::from_slice(secret.as_bytes())),
        }
    }

    /// Encrypt and authenticate a payload under the given nonce counter
    pub fn seal(&self, counter: u64, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(&nonce(counter), plaintext)
            .map_err(|_| CryptoError::EncryptFailed)
    }

    /// Decrypt and verify a payload; fails on any tampering
    pub fn open(&self, counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(&nonce(counter), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

fn nonce(counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..].copy_from_slice(&counter.to_be_bytes());
    Nonce::from(bytes)
}

/// Sliding anti-replay window over received nonce counters
///
/// Tracks the highest counter seen plus a 64-wide bitmap of recent ones, so
/// reordered datagrams are still accepted exactly once while anything stale
/// or repeated is refused. Callers must authenticate a payload before
/// accepting its counter.
#[derive(Debug, Default)]
pub struct ReplayWindow {
    highest: u64,
    seen: u64,
    primed: bool,
}

/// Counters this far behind the highest seen are refused outright
pub const REPLAY_WINDOW_SIZE: u64 = 64;

impl ReplayWindow {
    pub fn new() -> Self {
        ReplayWindow::default()
    }

    /// Accept a counter exactly once
    pub fn accept(&mut self, counter: u64) -> bool {
        if !self.primed {
            self.primed = true;
            self.highest = counter;
            self.seen = 1;
            return true;
        }

        if counter > self.highest {
            let advance = counter - self.highest;
            self.seen = if advance >= REPLAY_WINDOW_SIZE {
                0
            } else {
                self.seen << advance
            };
            self.seen |= 1;
            self.highest = counter;
            return true;
        }

        let behind = self.highest - counter;
        if behind >= REPLAY_WINDOW_SIZE {
            return false;
        }
        let bit = 1u64 << behind;
        if self.seen & bit != 0 {
            return false;
        }
        self.seen |= bit;
        true
    }
}

/// Cryptographic failures; all are fail-closed
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed public key")]
    BadPublicKey,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("remote public key produces a weak shared secret")]
    WeakRemoteKey,

    #[error("payload encryption failed")]
    EncryptFailed,

    #[error("payload decryption failed")]
    DecryptFailed,

    #[error("replayed or stale nonce counter {0}")]
    ReplayedCounter(u64),
}
