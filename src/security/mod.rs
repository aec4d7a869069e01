use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod session;

// 256 bits of entropy for every one-time and refresh token
const TOKEN_BYTES: usize = 32;

/// Generate an opaque URL-safe token (43 characters)
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Digest stored in place of a raw token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
