//! certchat-crypto: certificates and the CA signing protocol
//!
//! Signing pipeline:
//! ```text
//! unsigned Certificate (subject, public key)
//!   → assign serial (SerialNumberGenerator), issuer, emission date
//!   → SHA-256(canonical fields)
//!   → RSA PKCS#1 private-key encryption of the digest = signature
//! ```
//!
//! Verification recomputes the digest and compares it with the signature
//! decrypted under the CA public key.

pub mod authority;
pub mod certificate;
pub mod digest;
pub mod encoder;
pub mod rsa;
pub mod serial;
pub mod symmetric;

pub use authority::{verify_certificate, verify_certificate_der, CertificateAuthority};
pub use certificate::Certificate;
pub use digest::digest;
pub use encoder::CertificateEncoder;
pub use rsa::{generate_key_pair, KeyPair};
pub use serial::{SerialNumberGenerator, MAX_SERIAL};
pub use symmetric::{generate_symmetric_key, SymmetricKey};

/// Default RSA modulus size in bits
pub const DEFAULT_KEY_BITS: u32 = 2048;

/// Size of a SHA-256 digest in bytes
pub const DIGEST_SIZE: usize = 32;

/// Size of an AES-256 key in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
