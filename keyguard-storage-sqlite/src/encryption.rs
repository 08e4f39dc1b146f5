//! Encryption key derivation

use crate::{Error, Result};
use argon2::{Argon2, ParamsBuilder, Version};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

/// Argon2id parameters: m_cost (KiB), t_cost, p_cost
const ARGON2_PARAMS: (u32, u32, u32) = (65536, 3, 4);

/// Minimum salt length accepted for derivation
pub const MIN_SALT_LENGTH: usize = 16;

/// Encryption key for the secure store database
pub struct EncryptionKey(Zeroizing<[u8; 32]>);

impl EncryptionKey {
    /// Derive from a device secret using Argon2id + salt
    pub fn from_passphrase(secret: &str, salt: &[u8]) -> Result<Self> {
        if salt.len() < MIN_SALT_LENGTH {
            return Err(Error::Encryption("Salt too short".to_string()));
        }

        let params = ParamsBuilder::new()
            .m_cost(ARGON2_PARAMS.0) // 64 MiB
            .t_cost(ARGON2_PARAMS.1) // 3 iterations
            .p_cost(ARGON2_PARAMS.2) // 4 parallelism
            .output_len(32)
            .build()
            .map_err(|e| Error::Encryption(e.to_string()))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(secret.as_bytes(), salt, &mut *key)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok(Self(key))
    }

    /// Create from raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Create from raw key bytes slice
    pub fn from_bytes_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::Encryption("Invalid key length".to_string()));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Fresh random key
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *key);
        Self(key)
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Generate a random salt
pub fn generate_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let salt = [7u8; 32];
        let key1 = EncryptionKey::from_passphrase("device-secret", &salt).unwrap();
        let key2 = EncryptionKey::from_passphrase("device-secret", &salt).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
        assert!(key1.as_bytes().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_short_salt_rejected() {
        let result = EncryptionKey::from_passphrase("device-secret", &[1u8; 8]);
        assert!(matches!(result, Err(Error::Encryption(_))));
    }

    #[test]
    fn test_from_bytes_slice_length() {
        assert!(EncryptionKey::from_bytes_slice(&[0u8; 31]).is_err());
        assert!(EncryptionKey::from_bytes_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = EncryptionKey::from_bytes([0xAB; 32]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(..)");
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(EncryptionKey::generate().as_bytes(), EncryptionKey::generate().as_bytes());
    }
}
