//! Ephemeral per-session cryptographic identity (spec.md §9).
//!
//! Every SSH connection mints a fresh keypair purely in memory; nothing here
//! is ever written to disk. This is the opposite of Bootstrap Mode's
//! identity (see bootstrap.rs), which loads or generates a long-lived key
//! and persists it across restarts.

use iroh::{EndpointId, PublicKey, SecretKey};

use crate::fingerprint::fingerprint;

/// A session's throwaway identity: a keypair that exists only for the
/// lifetime of one connection, plus the display fingerprint derived from it.
#[derive(Debug, Clone)]
pub struct EphemeralIdentity {
    secret_key: SecretKey,
    fingerprint: String,
}

impl EphemeralIdentity {
    /// Mint a new random identity. Called once per incoming SSH session.
    pub fn generate() -> Self {
        let secret_key = SecretKey::generate(&mut rand::rng());
        let fingerprint = fingerprint(secret_key.public().as_bytes());
        Self {
            secret_key,
            fingerprint,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret_key.public()
    }

    pub fn endpoint_id(&self) -> EndpointId {
        self.secret_key.public()
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// 8-character uppercase hex fingerprint, the only identity surface
    /// shown to other users.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Default nickname before the user picks one: `"anon_" + firstSixOfFingerprint`.
    pub fn default_nick(&self) -> String {
        format!("anon_{}", self.fingerprint[..6].to_lowercase())
    }
}
