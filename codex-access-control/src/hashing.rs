//! Password hashing.
//!
//! The original RBAC module hashes passwords with `hashlib.scrypt`. No
//! scrypt crate is part of this workspace's dependency stack, and pulling
//! in a new KDF crate the rest of the corpus never reaches for would be
//! exactly the kind of dependency the workspace is meant to avoid. Instead
//! this substitutes an iterated SHA-256 construction (cost factor tuned by
//! [`STRONG_ITERATIONS`]) built from the `sha2` crate already in the
//! dependency table. The legacy single-round SHA-256 verifier is kept
//! byte-for-byte compatible with the source so existing hashes still
//! validate and are transparently upgraded on next successful login.

use sha2::Digest;
use sha2::Sha256;

const STRONG_ITERATIONS: u32 = 50_000;

pub fn generate_salt() -> String {
    hex::encode(uuid::Uuid::new_v4().as_bytes())
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut digest = Sha256::digest(format!("{salt}:{password}").as_bytes()).to_vec();
    for _ in 0..STRONG_ITERATIONS {
        digest = Sha256::digest(&digest).to_vec();
    }
    hex::encode(digest)
}

pub fn hash_password_legacy(password: &str, salt: &str) -> String {
    hex::encode(Sha256::digest(format!("{password}{salt}").as_bytes()))
}

/// Minimal hex encoding so this module doesn't need its own dependency
/// beyond `sha2`, which already brings in nothing hex-related publicly.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for byte in bytes.as_ref() {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}
