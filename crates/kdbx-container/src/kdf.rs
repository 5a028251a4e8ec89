//! Key derivation: composite key, AES-KDF / Argon2 and the final key schedule
//!
//! compositeKey = SHA-256(SHA-256(password))
//! derivedKey   = KDF(compositeKey, params)
//! encryptionKey = SHA-256(masterSeed || derivedKey)
//! baseHmacKey   = SHA-512(masterSeed || derivedKey || 0x01)

use crate::error::{Error, ParseError, Result, UnsupportedError};
use crate::variant_map::{VariantMap, VariantValue};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use argon2::{Algorithm, Argon2, AssociatedData, ParamsBuilder, Version};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const AES_KDF_UUID: Uuid = Uuid::from_u128(0xc9d9f39a_628a_4460_bf74_0d08c18a4fea);
pub const ARGON2D_UUID: Uuid = Uuid::from_u128(0xef636ddf_8c29_444b_91f7_a9a403e30a0c);
pub const ARGON2ID_UUID: Uuid = Uuid::from_u128(0x9e298b19_56db_4773_b23d_fc3ec6f0a1e6);

// VariantDictionary keys
const KEY_UUID: &str = "$UUID";
const KEY_SALT: &str = "S";
const KEY_PARALLELISM: &str = "P";
const KEY_MEMORY: &str = "M";
const KEY_ITERATIONS: &str = "I";
const KEY_VERSION: &str = "V";
const KEY_SECRET: &str = "K";
const KEY_ASSOC_DATA: &str = "A";
const KEY_ROUNDS: &str = "R";

/// Length of generated salts and of the AES-KDF seed
pub const SALT_LEN: usize = 32;

const HMAC_KEY_END: u8 = 0x01;

pub(crate) type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argon2Variant {
    D,
    Id,
}

impl Argon2Variant {
    fn algorithm(self) -> Algorithm {
        match self {
            Argon2Variant::D => Algorithm::Argon2d,
            Argon2Variant::Id => Algorithm::Argon2id,
        }
    }
}

/// AES-KDF parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesKdfParams {
    pub seed: [u8; SALT_LEN],
    pub rounds: u64,
}

/// Argon2d / Argon2id parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argon2Params {
    pub variant: Argon2Variant,
    pub salt: Vec<u8>,
    pub parallelism: u32,
    /// Memory in bytes, as stored in the header
    pub memory_bytes: u64,
    pub iterations: u64,
    /// 0x10 or 0x13
    pub version: u32,
    pub secret_key: Option<Vec<u8>>,
    pub associated_data: Option<Vec<u8>>,
}

/// KDF selection and parameters, identified on disk by the `$UUID` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KdfParameters {
    AesKdf(AesKdfParams),
    Argon2(Argon2Params),
}

impl KdfParameters {
    pub fn uuid(&self) -> Uuid {
        match self {
            KdfParameters::AesKdf(_) => AES_KDF_UUID,
            KdfParameters::Argon2(p) => match p.variant {
                Argon2Variant::D => ARGON2D_UUID,
                Argon2Variant::Id => ARGON2ID_UUID,
            },
        }
    }

    /// Decode from the header's KDFParameters variant map
    pub fn from_variant_map(map: &VariantMap) -> Result<Self> {
        let uuid_bytes = map
            .get_bytes(KEY_UUID)?
            .ok_or(ParseError::MissingKdfField("uuid"))?;
        let uuid = Uuid::from_slice(uuid_bytes).map_err(|_| ParseError::InvalidFieldLength {
            field: "KDF UUID",
            expected: 16,
            actual: uuid_bytes.len(),
        })?;

        let variant = match uuid {
            AES_KDF_UUID => return Self::aes_kdf_from_map(map),
            ARGON2D_UUID => Argon2Variant::D,
            ARGON2ID_UUID => Argon2Variant::Id,
            other => return Err(UnsupportedError::UnknownKdf(other).into()),
        };

        let salt = map
            .get_bytes(KEY_SALT)?
            .ok_or(ParseError::MissingKdfField("salt"))?
            .to_vec();
        let parallelism = map
            .get_u32(KEY_PARALLELISM)?
            .ok_or(ParseError::MissingKdfField("parallelism"))?;
        let memory_bytes = map
            .get_u64(KEY_MEMORY)?
            .ok_or(ParseError::MissingKdfField("memory"))?;
        let iterations = map
            .get_u64(KEY_ITERATIONS)?
            .ok_or(ParseError::MissingKdfField("iterations"))?;
        let version = map
            .get_u32(KEY_VERSION)?
            .ok_or(ParseError::MissingKdfField("version"))?;

        Ok(KdfParameters::Argon2(Argon2Params {
            variant,
            salt,
            parallelism,
            memory_bytes,
            iterations,
            version,
            secret_key: map.get_bytes(KEY_SECRET)?.map(<[u8]>::to_vec),
            associated_data: map.get_bytes(KEY_ASSOC_DATA)?.map(<[u8]>::to_vec),
        }))
    }

    fn aes_kdf_from_map(map: &VariantMap) -> Result<Self> {
        let seed = map
            .get_bytes(KEY_SALT)?
            .ok_or(ParseError::MissingKdfField("seed"))?;
        let seed: [u8; SALT_LEN] = seed.try_into().map_err(|_| ParseError::InvalidFieldLength {
            field: "AES-KDF seed",
            expected: SALT_LEN,
            actual: seed.len(),
        })?;
        let rounds = map
            .get_u64(KEY_ROUNDS)?
            .ok_or(ParseError::MissingKdfField("rounds"))?;
        Ok(KdfParameters::AesKdf(AesKdfParams { seed, rounds }))
    }

    /// Encode into a variant map for the header
    pub fn to_variant_map(&self) -> VariantMap {
        let map = VariantMap::new().with(KEY_UUID, VariantValue::Bytes(self.uuid().as_bytes().to_vec()));
        match self {
            KdfParameters::AesKdf(p) => map
                .with(KEY_ROUNDS, VariantValue::UInt64(p.rounds))
                .with(KEY_SALT, VariantValue::Bytes(p.seed.to_vec())),
            KdfParameters::Argon2(p) => {
                let mut map = map
                    .with(KEY_SALT, VariantValue::Bytes(p.salt.clone()))
                    .with(KEY_PARALLELISM, VariantValue::UInt32(p.parallelism))
                    .with(KEY_MEMORY, VariantValue::UInt64(p.memory_bytes))
                    .with(KEY_ITERATIONS, VariantValue::UInt64(p.iterations))
                    .with(KEY_VERSION, VariantValue::UInt32(p.version));
                if let Some(k) = &p.secret_key {
                    map.insert(KEY_SECRET, VariantValue::Bytes(k.clone()));
                }
                if let Some(a) = &p.associated_data {
                    map.insert(KEY_ASSOC_DATA, VariantValue::Bytes(a.clone()));
                }
                map
            }
        }
    }

    /// Stretch the composite key into the 32-byte derived key
    pub fn derive(&self, composite_key: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
        match self {
            KdfParameters::AesKdf(p) => {
                tracing::debug!("Deriving key with AES-KDF, rounds={}", p.rounds);
                Ok(aes_kdf(composite_key, &p.seed, p.rounds))
            }
            KdfParameters::Argon2(p) => {
                tracing::debug!(
                    "Deriving key with {:?}: memory={}KiB, iterations={}, parallelism={}, version={:#x}",
                    p.variant,
                    p.memory_bytes / 1024,
                    p.iterations,
                    p.parallelism,
                    p.version
                );
                argon2_kdf(composite_key, p)
            }
        }
    }
}

/// SHA-256(SHA-256(UTF-8 password))
pub fn composite_key(password: &str) -> Zeroizing<[u8; 32]> {
    let mut password_hash = Sha256::digest(password.as_bytes());
    let mut composite = Sha256::digest(password_hash.as_slice());
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&composite);
    password_hash.as_mut_slice().zeroize();
    composite.as_mut_slice().zeroize();
    out
}

/// `rounds` AES-256-ECB encryptions of each half of the key under `seed`, then SHA-256
fn aes_kdf(composite_key: &[u8; 32], seed: &[u8; SALT_LEN], rounds: u64) -> Zeroizing<[u8; 32]> {
    let cipher = Aes256::new(GenericArray::from_slice(seed));
    let mut block = Zeroizing::new(*composite_key);
    {
        let (left, right) = block.split_at_mut(16);
        let left = GenericArray::from_mut_slice(left);
        let right = GenericArray::from_mut_slice(right);
        for _ in 0..rounds {
            cipher.encrypt_block(left);
            cipher.encrypt_block(right);
        }
    }
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&Sha256::digest(block.as_slice()));
    out
}

fn argon2_kdf(composite_key: &[u8; 32], p: &Argon2Params) -> Result<Zeroizing<[u8; 32]>> {
    let memory_kib = u32::try_from(p.memory_bytes / 1024).map_err(|_| ParseError::InvalidKdfParameter {
        name: "memory",
        reason: format!("{} bytes is out of range", p.memory_bytes),
    })?;
    let iterations = u32::try_from(p.iterations).map_err(|_| ParseError::InvalidKdfParameter {
        name: "iterations",
        reason: format!("{} is out of range", p.iterations),
    })?;
    let version = match p.version {
        0x10 => Version::V0x10,
        0x13 => Version::V0x13,
        other => return Err(UnsupportedError::Argon2Version(other).into()),
    };

    let mut builder = ParamsBuilder::new();
    builder
        .m_cost(memory_kib)
        .t_cost(iterations)
        .p_cost(p.parallelism)
        .output_len(32);
    if let Some(ad) = &p.associated_data {
        let ad = AssociatedData::new(ad).map_err(|e| ParseError::InvalidKdfParameter {
            name: "associated data",
            reason: e.to_string(),
        })?;
        builder.data(ad);
    }
    let params = builder.build().map_err(|e| ParseError::InvalidKdfParameter {
        name: "argon2",
        reason: e.to_string(),
    })?;

    let argon2 = match &p.secret_key {
        Some(secret) => Argon2::new_with_secret(secret, p.variant.algorithm(), version, params)
            .map_err(|e| Error::Kdf(e.to_string()))?,
        None => Argon2::new(p.variant.algorithm(), version, params),
    };

    let mut out = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(composite_key, &p.salt, out.as_mut_slice())
        .map_err(|e| Error::Kdf(e.to_string()))?;
    Ok(out)
}

/// Keys for one container operation. Zeroed on drop, never cached.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    encryption_key: [u8; 32],
    base_hmac_key: [u8; 64],
}

impl DerivedKeys {
    /// Full derivation from a password
    pub fn derive(password: &str, kdf: &KdfParameters, master_seed: &[u8]) -> Result<Self> {
        let composite = composite_key(password);
        let transformed = kdf.derive(&composite)?;
        Ok(Self::from_transformed_key(master_seed, &transformed))
    }

    /// Final key schedule from an already computed KDF output
    pub fn from_transformed_key(master_seed: &[u8], transformed_key: &[u8; 32]) -> Self {
        let mut encryption_key = [0u8; 32];
        let mut hasher = Sha256::new();
        hasher.update(master_seed);
        hasher.update(transformed_key);
        encryption_key.copy_from_slice(&hasher.finalize());

        let mut base_hmac_key = [0u8; 64];
        let mut hasher = Sha512::new();
        hasher.update(master_seed);
        hasher.update(transformed_key);
        hasher.update([HMAC_KEY_END]);
        base_hmac_key.copy_from_slice(&hasher.finalize());

        Self {
            encryption_key,
            base_hmac_key,
        }
    }

    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    pub fn base_hmac_key(&self) -> &[u8; 64] {
        &self.base_hmac_key
    }

    /// SHA-512(LE64(index) || baseHmacKey)
    pub fn block_key(&self, index: u64) -> Zeroizing<[u8; 64]> {
        let mut hasher = Sha512::new();
        hasher.update(index.to_le_bytes());
        hasher.update(self.base_hmac_key);
        let mut key = Zeroizing::new([0u8; 64]);
        key.copy_from_slice(&hasher.finalize());
        key
    }

    /// Header HMAC key, i.e. the block key for index `u64::MAX`
    pub fn header_hmac_key(&self) -> Zeroizing<[u8; 64]> {
        self.block_key(u64::MAX)
    }

    /// HMAC-SHA256 keyed for block `index`, with nothing fed yet
    pub(crate) fn block_mac(&self, index: u64) -> HmacSha256 {
        keyed_mac(&self.block_key(index))
    }

    pub(crate) fn header_mac(&self) -> HmacSha256 {
        keyed_mac(&self.header_hmac_key())
    }
}

// 64-byte keys equal the SHA-256 block size, so this constructor cannot fail.
fn keyed_mac(key: &[u8; 64]) -> HmacSha256 {
    <HmacSha256 as Mac>::new(GenericArray::from_slice(key.as_slice()))
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedKeys(***)")
    }
}
