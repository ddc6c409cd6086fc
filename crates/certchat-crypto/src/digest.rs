//! Content digest: SHA-256

use sha2::{Digest, Sha256};

use crate::DIGEST_SIZE;

/// Fixed-size fingerprint of `data`.
pub fn digest(data: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::digest(data).into()
}
