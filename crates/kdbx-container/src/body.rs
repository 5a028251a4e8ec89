//! Bulk payload cipher and gzip compression

use crate::error::{Error, IntegrityError, ParseError, Result, UnsupportedError};
use crate::kdf::DerivedKeys;
use aes::{Aes128, Aes256};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use uuid::Uuid;

pub const AES128_CBC_UUID: Uuid = Uuid::from_u128(0x61ab05a1_9464_41c3_8d74_3a563df8dd35);
pub const AES256_CBC_UUID: Uuid = Uuid::from_u128(0x31c1f2e6_bf71_4350_be58_05216afc5aff);
pub const TWOFISH_CBC_UUID: Uuid = Uuid::from_u128(0xad68f29f_576f_4bb9_a36a_d47af965346c);
pub const CHACHA20_UUID: Uuid = Uuid::from_u128(0xd6038a2b_8b6f_4cb5_a524_339a31dbb59a);

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// Body cipher selected by the header's CipherID
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherKind {
    #[serde(rename = "aes128-cbc")]
    Aes128Cbc,
    #[default]
    #[serde(rename = "aes256-cbc")]
    Aes256Cbc,
    #[serde(rename = "twofish-cbc")]
    TwofishCbc,
    #[serde(rename = "chacha20")]
    ChaCha20,
}

impl CipherKind {
    pub fn from_uuid(uuid: Uuid) -> Result<Self> {
        match uuid {
            AES128_CBC_UUID => Ok(CipherKind::Aes128Cbc),
            AES256_CBC_UUID => Ok(CipherKind::Aes256Cbc),
            TWOFISH_CBC_UUID => Ok(CipherKind::TwofishCbc),
            CHACHA20_UUID => Ok(CipherKind::ChaCha20),
            other => Err(UnsupportedError::UnknownCipher(other).into()),
        }
    }

    pub fn uuid(self) -> Uuid {
        match self {
            CipherKind::Aes128Cbc => AES128_CBC_UUID,
            CipherKind::Aes256Cbc => AES256_CBC_UUID,
            CipherKind::TwofishCbc => TWOFISH_CBC_UUID,
            CipherKind::ChaCha20 => CHACHA20_UUID,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherKind::Aes128Cbc => "AES-128-CBC",
            CipherKind::Aes256Cbc => "AES-256-CBC",
            CipherKind::TwofishCbc => "Twofish-CBC",
            CipherKind::ChaCha20 => "ChaCha20",
        }
    }

    /// Length of the EncryptionIV header field
    pub fn iv_len(self) -> usize {
        match self {
            CipherKind::ChaCha20 => 12,
            _ => 16,
        }
    }

    /// Fails with `NotImplemented` for the recognized but unavailable ciphers
    pub fn ensure_implemented(self) -> Result<()> {
        match self {
            CipherKind::Aes128Cbc | CipherKind::Aes256Cbc => Ok(()),
            other => Err(UnsupportedError::NotImplemented(other.name()).into()),
        }
    }

    fn iv_error(self, iv: &[u8]) -> Error {
        ParseError::InvalidFieldLength {
            field: "encryption IV",
            expected: self.iv_len(),
            actual: iv.len(),
        }
        .into()
    }

    fn check_iv(self, iv: &[u8]) -> Result<()> {
        if iv.len() != self.iv_len() {
            return Err(self.iv_error(iv));
        }
        Ok(())
    }

    pub fn decrypt(self, key: &[u8; 32], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.ensure_implemented()?;
        self.check_iv(iv)?;
        let plain = match self {
            CipherKind::Aes128Cbc => Aes128CbcDec::new_from_slices(&key[..16], iv)
                .map_err(|_| self.iv_error(iv))?
                .decrypt_padded_vec_mut::<Pkcs7>(data),
            _ => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| self.iv_error(iv))?
                .decrypt_padded_vec_mut::<Pkcs7>(data),
        };
        plain.map_err(|_| IntegrityError::InvalidPadding.into())
    }

    pub fn encrypt(self, key: &[u8; 32], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.ensure_implemented()?;
        self.check_iv(iv)?;
        Ok(match self {
            CipherKind::Aes128Cbc => Aes128CbcEnc::new_from_slices(&key[..16], iv)
                .map_err(|_| self.iv_error(iv))?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            _ => Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|_| self.iv_error(iv))?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
        })
    }
}

/// Cipher plus compression flag for one container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyCipher {
    pub kind: CipherKind,
    pub compression: bool,
}

impl BodyCipher {
    pub fn new(kind: CipherKind, compression: bool) -> Self {
        Self { kind, compression }
    }

    /// Decrypt the deblockified payload, then gunzip if flagged
    pub fn decrypt(&self, keys: &DerivedKeys, iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let decrypted = self.kind.decrypt(keys.encryption_key(), iv, data)?;
        if self.compression {
            decompress(&decrypted)
        } else {
            Ok(decrypted)
        }
    }

    /// Gzip if flagged, then encrypt
    pub fn encrypt(&self, keys: &DerivedKeys, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.compression {
            let compressed = compress(plaintext)?;
            self.kind.encrypt(keys.encryption_key(), iv, &compressed)
        } else {
            self.kind.encrypt(keys.encryption_key(), iv, plaintext)
        }
    }
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| ParseError::Decompression(e.to_string()))?;
    Ok(result)
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
