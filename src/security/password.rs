use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use hmac::{Hmac, Mac};
use log::debug;
use sha2::Sha256;

use crate::config::SecurityConfig;

/// One-way password hashing used by registration, login and reset
#[cfg_attr(test, mockall::automock)]
pub trait PasswordHasher: Send + Sync {
    /// Produce a self-describing PHC hash string
    fn hash(&self, password: &str) -> Result<String>;

    /// Check a password against a stored hash. A malformed hash is an error,
    /// a mismatch is `Ok(false)`.
    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

/// Argon2id with configurable cost and an optional HMAC-SHA256 pepper
pub struct Argon2Hasher {
    params: Params,
    pepper: Option<Vec<u8>>,
}

impl Argon2Hasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32, pepper: Option<&str>) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| anyhow!("Invalid Argon2 parameters: {}", e))?;

        Ok(Self {
            params,
            pepper: pepper.map(|p| p.as_bytes().to_vec()),
        })
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        Self::new(
            config.hash_memory_kib,
            config.hash_iterations,
            config.hash_parallelism,
            config.password_pepper.as_deref(),
        )
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    // The pepper never reaches storage, so a leaked table alone cannot be brute forced
    fn apply_pepper(&self, password: &str) -> Result<Vec<u8>> {
        match &self.pepper {
            Some(pepper) => {
                let mut mac = Hmac::<Sha256>::new_from_slice(pepper)
                    .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
                mac.update(password.as_bytes());
                Ok(mac.finalize().into_bytes().to_vec())
            }
            None => Ok(password.as_bytes().to_vec()),
        }
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let input = self.apply_pepper(password)?;

        let hash = self.argon2()
            .hash_password(&input, &salt)
            .map_err(|e| anyhow!("Failed to hash password: {}", e))?
            .to_string();

        debug!("Hashed password with m={} t={} p={}",
            self.params.m_cost(), self.params.t_cost(), self.params.p_cost());
        Ok(hash)
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| anyhow!("Failed to parse password hash: {}", e))?;
        let input = self.apply_pepper(password)?;

        // Cost parameters are read from the hash itself
        Ok(self.argon2().verify_password(&input, &parsed_hash).is_ok())
    }
}
