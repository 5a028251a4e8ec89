//! Container settings used when saving
//!
//! Loaded from TOML or built in code. Opening a file yields the settings
//! it was written with, so a re-save keeps the same cipher and KDF cost.

use crate::body::{BodyCipher, CipherKind};
use crate::error::{Error, Result};
use crate::kdf::{AesKdfParams, Argon2Params, Argon2Variant, KdfParameters, SALT_LEN};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default HMAC block size: 1 MiB
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub cipher: CipherKind,
    pub compression: bool,
    pub block_size: usize,
    pub kdf: KdfConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdfAlgorithm {
    #[default]
    Argon2d,
    Argon2id,
    AesKdf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub algorithm: KdfAlgorithm,
    pub iterations: u64,
    pub memory_bytes: u64,
    pub parallelism: u32,
    pub version: u32,
    /// AES-KDF only
    pub rounds: u64,
}

fn default_iterations() -> u64 {
    10
}

fn default_memory_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_parallelism() -> u32 {
    2
}

fn default_version() -> u32 {
    0x13
}

fn default_rounds() -> u64 {
    100_000
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::default(),
            iterations: default_iterations(),
            memory_bytes: default_memory_bytes(),
            parallelism: default_parallelism(),
            version: default_version(),
            rounds: default_rounds(),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            cipher: CipherKind::default(),
            compression: true,
            block_size: DEFAULT_BLOCK_SIZE,
            kdf: KdfConfig::default(),
        }
    }
}

impl KdfConfig {
    /// Build header KDF parameters with a freshly generated salt
    pub fn parameters<R: RngCore + CryptoRng>(&self, rng: &mut R) -> KdfParameters {
        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let variant = match self.algorithm {
            KdfAlgorithm::AesKdf => {
                return KdfParameters::AesKdf(AesKdfParams {
                    seed: salt,
                    rounds: self.rounds,
                })
            }
            KdfAlgorithm::Argon2d => Argon2Variant::D,
            KdfAlgorithm::Argon2id => Argon2Variant::Id,
        };
        KdfParameters::Argon2(Argon2Params {
            variant,
            salt: salt.to_vec(),
            parallelism: self.parallelism,
            memory_bytes: self.memory_bytes,
            iterations: self.iterations,
            version: self.version,
            secret_key: None,
            associated_data: None,
        })
    }

    /// Cost settings of existing parameters, without the salt
    pub fn from_parameters(params: &KdfParameters) -> Self {
        match params {
            KdfParameters::AesKdf(p) => Self {
                algorithm: KdfAlgorithm::AesKdf,
                rounds: p.rounds,
                ..Self::default()
            },
            KdfParameters::Argon2(p) => Self {
                algorithm: match p.variant {
                    Argon2Variant::D => KdfAlgorithm::Argon2d,
                    Argon2Variant::Id => KdfAlgorithm::Argon2id,
                },
                iterations: p.iterations,
                memory_bytes: p.memory_bytes,
                parallelism: p.parallelism,
                version: p.version,
                rounds: default_rounds(),
            },
        }
    }
}

impl ContainerConfig {
    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ContainerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded container config from {:?}", path);
        Ok(config)
    }

    pub fn body_cipher(&self) -> BodyCipher {
        BodyCipher::new(self.cipher, self.compression)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > u32::MAX as usize {
            return Err(Error::Config(format!(
                "block_size must be between 1 and {}, got {}",
                u32::MAX,
                self.block_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.cipher, CipherKind::Aes256Cbc);
        assert!(config.compression);
        assert_eq!(config.block_size, 1_048_576);
        assert_eq!(config.kdf.algorithm, KdfAlgorithm::Argon2d);
        assert_eq!(config.kdf.version, 0x13);
    }

    #[test]
    fn test_partial_toml() {
        let config = ContainerConfig::from_toml_str(
            r#"
            compression = false
            block_size = 1296

            [kdf]
            algorithm = "argon2id"
            memory_bytes = 65536
            "#,
        )
        .unwrap();
        assert!(!config.compression);
        assert_eq!(config.block_size, 1296);
        assert_eq!(config.cipher, CipherKind::Aes256Cbc);
        assert_eq!(config.kdf.algorithm, KdfAlgorithm::Argon2id);
        assert_eq!(config.kdf.memory_bytes, 65536);
        assert_eq!(config.kdf.parallelism, 2);
    }

    #[test]
    fn test_cipher_names() {
        let config = ContainerConfig::from_toml_str(r#"cipher = "twofish-cbc""#).unwrap();
        assert_eq!(config.cipher, CipherKind::TwofishCbc);
        assert!(ContainerConfig::from_toml_str(r#"cipher = "rot13""#).is_err());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let err = ContainerConfig::from_toml_str("block_size = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parameters_get_fresh_salt() {
        let kdf = KdfConfig {
            algorithm: KdfAlgorithm::AesKdf,
            rounds: 6000,
            ..KdfConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let a = kdf.parameters(&mut rng);
        let b = kdf.parameters(&mut rng);
        assert_ne!(a, b);
        assert_eq!(KdfConfig::from_parameters(&a), kdf);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("kdbx-container-{}.toml", std::process::id()));
        std::fs::write(&path, "compression = false\n").unwrap();
        let config = ContainerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(!config.compression);
    }
}
