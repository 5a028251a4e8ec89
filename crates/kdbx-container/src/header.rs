//! Outer header codec
//!
//! The outer header is the unencrypted prefix of the file: signatures,
//! format version, a TLV field list, then SHA-256 and HMAC-SHA256 over
//! everything before them. Parsing keeps the exact consumed bytes so both
//! checks run over what was actually on disk.

use crate::body::{BodyCipher, CipherKind};
use crate::config::ContainerConfig;
use crate::error::{IntegrityError, ParseError, Result};
use crate::kdf::{DerivedKeys, KdfParameters};
use crate::variant_map::VariantMap;
use crate::wire;
use byteorder::{LittleEndian, WriteBytesExt};
use hmac::Mac;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use uuid::Uuid;
use zeroize::Zeroizing;

pub const SIGNATURE_1: u32 = 0x9AA2_D903;
pub const SIGNATURE_2: u32 = 0xB54B_FB67;
pub const VERSION_MAJOR: u16 = 4;
pub const VERSION_MINOR: u16 = 1;

pub const MASTER_SEED_LEN: usize = 32;
pub const HEADER_HASH_LEN: usize = 32;

const END_SENTINEL: [u8; 4] = [0x0D, 0x0A, 0x0D, 0x0A];

/// Outer header field type codes
pub mod field {
    pub const END: u8 = 0;
    pub const COMMENT: u8 = 1;
    pub const CIPHER_ID: u8 = 2;
    pub const COMPRESSION_FLAGS: u8 = 3;
    pub const MASTER_SEED: u8 = 4;
    pub const TRANSFORM_SEED: u8 = 5;
    pub const TRANSFORM_ROUNDS: u8 = 6;
    pub const ENCRYPTION_IV: u8 = 7;
    pub const PROTECTED_STREAM_KEY: u8 = 8;
    pub const STREAM_START_BYTES: u8 = 9;
    pub const INNER_RANDOM_STREAM_ID: u8 = 10;
    pub const KDF_PARAMETERS: u8 = 11;
    pub const PUBLIC_CUSTOM_DATA: u8 = 12;
}

/// Parsed outer header
///
/// The master seed and raw header bytes live here only until
/// [`OuterHeader::derive_keys`] has run. After that only the public
/// settings remain.
pub struct OuterHeader {
    pub version_minor: u16,
    pub cipher: CipherKind,
    pub compression: bool,
    pub encryption_iv: Vec<u8>,
    pub kdf: KdfParameters,
    pub public_custom_data: Option<VariantMap>,
    master_seed: Option<Zeroizing<[u8; MASTER_SEED_LEN]>>,
    raw: Option<Vec<u8>>,
    hmac: [u8; HEADER_HASH_LEN],
}

/// Fields collected during the structural walk, before interpretation
#[derive(Default)]
struct RawFields {
    cipher_id: Option<Vec<u8>>,
    compression: Option<Vec<u8>>,
    master_seed: Option<Zeroizing<Vec<u8>>>,
    encryption_iv: Option<Vec<u8>>,
    kdf_parameters: Option<Vec<u8>>,
    public_custom_data: Option<Vec<u8>>,
}

/// Copies everything read from `inner` into `consumed`
struct Recorder<'a, R> {
    inner: &'a mut R,
    consumed: Vec<u8>,
}

impl<R: Read> Read for Recorder<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

impl OuterHeader {
    /// Parse the header and verify its SHA-256 hash
    ///
    /// The HMAC needs key material and is checked by [`OuterHeader::derive_keys`].
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut recorder = Recorder {
            inner: reader,
            consumed: Vec::new(),
        };

        let sig1 = wire::read_u32(&mut recorder, "signature")?;
        let sig2 = wire::read_u32(&mut recorder, "signature")?;
        if sig1 != SIGNATURE_1 || sig2 != SIGNATURE_2 {
            return Err(ParseError::WrongSignature { sig1, sig2 }.into());
        }

        let version_minor = wire::read_u16(&mut recorder, "version")?;
        let version_major = wire::read_u16(&mut recorder, "version")?;
        if version_major != VERSION_MAJOR {
            return Err(ParseError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            }
            .into());
        }

        let fields = read_fields(&mut recorder)?;
        let raw = recorder.consumed;

        let hash: [u8; HEADER_HASH_LEN] = wire::read_array(reader, "header hash")?;
        let hmac: [u8; HEADER_HASH_LEN] = wire::read_array(reader, "header HMAC")?;

        if Sha256::digest(&raw).as_slice() != hash.as_slice() {
            tracing::warn!("Outer header hash mismatch");
            return Err(IntegrityError::HeaderHashMismatch.into());
        }

        let header = Self::interpret(fields, version_minor, raw, hmac)?;
        tracing::debug!(
            "Parsed outer header: cipher={}, compression={}, kdf={}",
            header.cipher.name(),
            header.compression,
            header.kdf.uuid()
        );
        Ok(header)
    }

    fn interpret(
        fields: RawFields,
        version_minor: u16,
        raw: Vec<u8>,
        hmac: [u8; HEADER_HASH_LEN],
    ) -> Result<Self> {
        let cipher_id = fields
            .cipher_id
            .ok_or(ParseError::MissingHeaderField("cipher ID"))?;
        let cipher_id = Uuid::from_slice(&cipher_id).map_err(|_| ParseError::InvalidFieldLength {
            field: "cipher ID",
            expected: 16,
            actual: cipher_id.len(),
        })?;
        let cipher = CipherKind::from_uuid(cipher_id)?;

        let compression = fields
            .compression
            .ok_or(ParseError::MissingHeaderField("compression flags"))?;
        let compression: [u8; 4] =
            compression
                .as_slice()
                .try_into()
                .map_err(|_| ParseError::InvalidFieldLength {
                    field: "compression flags",
                    expected: 4,
                    actual: compression.len(),
                })?;
        let compression = u32::from_le_bytes(compression) == 1;

        let seed = fields
            .master_seed
            .ok_or(ParseError::MissingHeaderField("master seed"))?;
        if seed.len() != MASTER_SEED_LEN {
            return Err(ParseError::InvalidFieldLength {
                field: "master seed",
                expected: MASTER_SEED_LEN,
                actual: seed.len(),
            }
            .into());
        }
        let mut master_seed = Zeroizing::new([0u8; MASTER_SEED_LEN]);
        master_seed.copy_from_slice(&seed);

        let encryption_iv = fields
            .encryption_iv
            .ok_or(ParseError::MissingHeaderField("encryption IV"))?;
        if encryption_iv.len() != cipher.iv_len() {
            return Err(ParseError::InvalidFieldLength {
                field: "encryption IV",
                expected: cipher.iv_len(),
                actual: encryption_iv.len(),
            }
            .into());
        }

        let kdf = fields
            .kdf_parameters
            .ok_or(ParseError::MissingHeaderField("KDF parameters"))?;
        let kdf = KdfParameters::from_variant_map(&VariantMap::parse(&kdf)?)?;

        let public_custom_data = fields
            .public_custom_data
            .map(|data| VariantMap::parse(&data))
            .transpose()?;

        Ok(Self {
            version_minor,
            cipher,
            compression,
            encryption_iv,
            kdf,
            public_custom_data,
            master_seed: Some(master_seed),
            raw: Some(raw),
            hmac,
        })
    }

    pub fn body_cipher(&self) -> BodyCipher {
        BodyCipher::new(self.cipher, self.compression)
    }

    /// Derive the container keys and verify the header HMAC with them
    ///
    /// Consumes the master seed and the raw header bytes; a second call
    /// fails with `MissingHeaderField`.
    pub fn derive_keys(&mut self, password: &str) -> Result<DerivedKeys> {
        let master_seed = self
            .master_seed
            .take()
            .ok_or(ParseError::MissingHeaderField("master seed"))?;
        let raw = self
            .raw
            .take()
            .ok_or(ParseError::MissingHeaderField("raw header"))?;

        let keys = DerivedKeys::derive(password, &self.kdf, master_seed.as_slice())?;
        drop(master_seed);

        let mut mac = keys.header_mac();
        mac.update(&raw);
        if mac.verify_slice(&self.hmac).is_err() {
            tracing::warn!("Outer header HMAC mismatch");
            return Err(IntegrityError::HeaderHmacMismatch.into());
        }
        tracing::debug!("Header HMAC verified");
        Ok(keys)
    }
}

impl std::fmt::Debug for OuterHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OuterHeader")
            .field("version_minor", &self.version_minor)
            .field("cipher", &self.cipher)
            .field("compression", &self.compression)
            .field("kdf", &self.kdf.uuid())
            .field("public_custom_data", &self.public_custom_data.is_some())
            .finish_non_exhaustive()
    }
}

fn read_fields<R: Read>(reader: &mut R) -> Result<RawFields> {
    let mut fields = RawFields::default();
    loop {
        let field_type = wire::read_u8(reader, "header field type")?;
        let len = wire::read_u32(reader, "header field length")? as usize;
        let value = wire::read_vec(reader, len, "header field value")?;

        match field_type {
            field::END => break,
            field::CIPHER_ID => fields.cipher_id = Some(value),
            field::COMPRESSION_FLAGS => fields.compression = Some(value),
            field::MASTER_SEED => fields.master_seed = Some(Zeroizing::new(value)),
            field::ENCRYPTION_IV => fields.encryption_iv = Some(value),
            field::KDF_PARAMETERS => fields.kdf_parameters = Some(value),
            field::PUBLIC_CUSTOM_DATA => fields.public_custom_data = Some(value),
            other => tracing::debug!("Skipping outer header field {} ({} bytes)", other, len),
        }
    }
    Ok(fields)
}

/// Result of writing a header: the keys and IV the body must be sealed with
pub struct SealedHeader {
    pub keys: DerivedKeys,
    pub encryption_iv: Vec<u8>,
    pub kdf: KdfParameters,
}

/// Write a complete outer header with a fresh master seed, IV and KDF salt
///
/// Runs the KDF, since the trailing HMAC depends on the derived keys.
pub fn write_header<W, R>(
    writer: &mut W,
    password: &str,
    config: &ContainerConfig,
    public_custom_data: Option<&VariantMap>,
    rng: &mut R,
) -> Result<SealedHeader>
where
    W: Write,
    R: RngCore + CryptoRng,
{
    config.cipher.ensure_implemented()?;

    let mut master_seed = Zeroizing::new([0u8; MASTER_SEED_LEN]);
    rng.fill_bytes(master_seed.as_mut_slice());
    let mut encryption_iv = vec![0u8; config.cipher.iv_len()];
    rng.fill_bytes(&mut encryption_iv);
    let kdf = config.kdf.parameters(rng);

    let mut raw = Vec::new();
    write_fields(
        &mut raw,
        config,
        master_seed.as_slice(),
        &encryption_iv,
        &kdf,
        public_custom_data,
    )?;

    let keys = DerivedKeys::derive(password, &kdf, master_seed.as_slice())?;
    drop(master_seed);

    let hash = Sha256::digest(&raw);
    let mut mac = keys.header_mac();
    mac.update(&raw);
    let hmac = mac.finalize().into_bytes();

    writer.write_all(&raw)?;
    writer.write_all(&hash)?;
    writer.write_all(&hmac)?;
    tracing::debug!("Wrote outer header ({} bytes)", raw.len() + 2 * HEADER_HASH_LEN);

    Ok(SealedHeader {
        keys,
        encryption_iv,
        kdf,
    })
}

fn write_fields<W: Write>(
    out: &mut W,
    config: &ContainerConfig,
    master_seed: &[u8],
    encryption_iv: &[u8],
    kdf: &KdfParameters,
    public_custom_data: Option<&VariantMap>,
) -> Result<()> {
    out.write_u32::<LittleEndian>(SIGNATURE_1)?;
    out.write_u32::<LittleEndian>(SIGNATURE_2)?;
    out.write_u16::<LittleEndian>(VERSION_MINOR)?;
    out.write_u16::<LittleEndian>(VERSION_MAJOR)?;

    wire::write_tlv(out, field::CIPHER_ID, config.cipher.uuid().as_bytes())?;
    wire::write_tlv(
        out,
        field::COMPRESSION_FLAGS,
        &u32::from(config.compression).to_le_bytes(),
    )?;
    wire::write_tlv(out, field::MASTER_SEED, master_seed)?;
    wire::write_tlv(out, field::ENCRYPTION_IV, encryption_iv)?;
    wire::write_tlv(out, field::KDF_PARAMETERS, &kdf.to_variant_map().to_bytes()?)?;
    if let Some(data) = public_custom_data {
        wire::write_tlv(out, field::PUBLIC_CUSTOM_DATA, &data.to_bytes()?)?;
    }
    wire::write_tlv(out, field::END, &END_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KdfAlgorithm, KdfConfig};
    use crate::error::{Error, UnsupportedError};
    use crate::variant_map::VariantValue;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Cursor;

    fn cheap_config() -> ContainerConfig {
        ContainerConfig {
            kdf: KdfConfig {
                algorithm: KdfAlgorithm::Argon2id,
                iterations: 1,
                memory_bytes: 64 * 1024,
                parallelism: 1,
                ..KdfConfig::default()
            },
            ..ContainerConfig::default()
        }
    }

    fn written(config: &ContainerConfig, custom: Option<&VariantMap>) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut out = Vec::new();
        write_header(&mut out, "pw", config, custom, &mut rng).unwrap();
        out
    }

    #[test]
    fn test_header_round_trip() {
        let config = cheap_config();
        let mut rng = StdRng::seed_from_u64(5);
        let mut out = Vec::new();
        let sealed = write_header(&mut out, "pw", &config, None, &mut rng).unwrap();

        let mut cursor = Cursor::new(&out);
        let mut header = OuterHeader::read(&mut cursor).unwrap();
        assert_eq!(cursor.position() as usize, out.len());
        assert_eq!(header.cipher, CipherKind::Aes256Cbc);
        assert!(header.compression);
        assert_eq!(header.encryption_iv, sealed.encryption_iv);
        assert_eq!(header.kdf, sealed.kdf);
        assert!(header.public_custom_data.is_none());

        let keys = header.derive_keys("pw").unwrap();
        assert_eq!(keys.encryption_key(), sealed.keys.encryption_key());
    }

    #[test]
    fn test_seed_is_consumed_by_key_derivation() {
        let out = written(&cheap_config(), None);
        let mut header = OuterHeader::read(&mut Cursor::new(&out)).unwrap();
        header.derive_keys("pw").unwrap();
        let err = header.derive_keys("pw").unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::MissingHeaderField(_))));
    }

    #[test]
    fn test_wrong_password_fails_hmac() {
        let out = written(&cheap_config(), None);
        let mut header = OuterHeader::read(&mut Cursor::new(&out)).unwrap();
        let err = header.derive_keys("not pw").unwrap_err();
        assert!(matches!(err, Error::Integrity(IntegrityError::HeaderHmacMismatch)));
    }

    #[test]
    fn test_fresh_seed_iv_and_salt_per_write() {
        let config = cheap_config();
        let mut rng = StdRng::seed_from_u64(5);
        let mut a = Vec::new();
        let mut b = Vec::new();
        let first = write_header(&mut a, "pw", &config, None, &mut rng).unwrap();
        let second = write_header(&mut b, "pw", &config, None, &mut rng).unwrap();
        assert_ne!(first.encryption_iv, second.encryption_iv);
        assert_ne!(first.kdf, second.kdf);
        assert_ne!(first.keys.encryption_key(), second.keys.encryption_key());
    }

    #[test]
    fn test_public_custom_data_is_kept() {
        let custom = VariantMap::new().with("plugin", VariantValue::String("on".to_string()));
        let out = written(&cheap_config(), Some(&custom));
        let header = OuterHeader::read(&mut Cursor::new(&out)).unwrap();
        assert_eq!(header.public_custom_data, Some(custom));
    }

    #[test]
    fn test_wrong_signature() {
        let mut out = written(&cheap_config(), None);
        out[0] ^= 0x01;
        let err = OuterHeader::read(&mut Cursor::new(&out)).unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::WrongSignature { .. })));
    }

    #[test]
    fn test_version_3_rejected() {
        let mut out = written(&cheap_config(), None);
        out[10] = 3;
        let err = OuterHeader::read(&mut Cursor::new(&out)).unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError::UnsupportedVersion { major: 3, .. })
        ));
    }

    #[test]
    fn test_unknown_field_is_skipped() {
        let config = cheap_config();
        let mut raw = Vec::new();
        let kdf = config.kdf.parameters(&mut StdRng::seed_from_u64(1));
        raw.write_u32::<LittleEndian>(SIGNATURE_1).unwrap();
        raw.write_u32::<LittleEndian>(SIGNATURE_2).unwrap();
        raw.write_u16::<LittleEndian>(VERSION_MINOR).unwrap();
        raw.write_u16::<LittleEndian>(VERSION_MAJOR).unwrap();
        wire::write_tlv(&mut raw, field::COMMENT, b"hello").unwrap();
        wire::write_tlv(&mut raw, 99, &[1, 2, 3]).unwrap();
        wire::write_tlv(&mut raw, field::CIPHER_ID, config.cipher.uuid().as_bytes()).unwrap();
        wire::write_tlv(&mut raw, field::COMPRESSION_FLAGS, &[0, 0, 0, 0]).unwrap();
        wire::write_tlv(&mut raw, field::MASTER_SEED, &[1u8; 32]).unwrap();
        wire::write_tlv(&mut raw, field::ENCRYPTION_IV, &[2u8; 16]).unwrap();
        wire::write_tlv(&mut raw, field::KDF_PARAMETERS, &kdf.to_variant_map().to_bytes().unwrap()).unwrap();
        // terminator with an empty payload is accepted on read
        wire::write_tlv(&mut raw, field::END, &[]).unwrap();

        let mut file = raw.clone();
        file.extend_from_slice(&Sha256::digest(&raw));
        file.extend_from_slice(&[0u8; 32]);

        let header = OuterHeader::read(&mut Cursor::new(&file)).unwrap();
        assert!(!header.compression);
        assert_eq!(header.kdf, kdf);
    }

    #[test]
    fn test_missing_master_seed() {
        let mut raw = Vec::new();
        raw.write_u32::<LittleEndian>(SIGNATURE_1).unwrap();
        raw.write_u32::<LittleEndian>(SIGNATURE_2).unwrap();
        raw.write_u16::<LittleEndian>(VERSION_MINOR).unwrap();
        raw.write_u16::<LittleEndian>(VERSION_MAJOR).unwrap();
        wire::write_tlv(&mut raw, field::CIPHER_ID, CipherKind::Aes256Cbc.uuid().as_bytes()).unwrap();
        wire::write_tlv(&mut raw, field::COMPRESSION_FLAGS, &[1, 0, 0, 0]).unwrap();
        wire::write_tlv(&mut raw, field::END, &END_SENTINEL).unwrap();
        let mut file = raw.clone();
        file.extend_from_slice(&Sha256::digest(&raw));
        file.extend_from_slice(&[0u8; 32]);

        let err = OuterHeader::read(&mut Cursor::new(&file)).unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError::MissingHeaderField("master seed"))
        ));
    }

    #[test]
    fn test_unimplemented_cipher_refused_before_kdf() {
        let config = ContainerConfig {
            cipher: CipherKind::TwofishCbc,
            ..cheap_config()
        };
        let mut out = Vec::new();
        let err = write_header(&mut out, "pw", &config, None, &mut StdRng::seed_from_u64(1)).err().unwrap();
        assert!(matches!(err, Error::Unsupported(UnsupportedError::NotImplemented(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_truncated_header() {
        let out = written(&cheap_config(), None);
        let err = OuterHeader::read(&mut Cursor::new(&out[..out.len() - 10])).unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::Truncated { .. })));
    }

    /// Offsets whose corruption breaks the TLV framing itself: every length
    /// byte, plus the END type byte, after which the reader runs into the
    /// hash and HMAC and out of input.
    fn framing_offsets(out: &[u8]) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut pos = 12;
        loop {
            let field_type = out[pos];
            let len = u32::from_le_bytes(out[pos + 1..pos + 5].try_into().unwrap()) as usize;
            offsets.extend(pos + 1..pos + 5);
            if field_type == field::END {
                offsets.push(pos);
                return offsets;
            }
            pos += 5 + len;
        }
    }

    /// Flips outside the framing leave every field readable, so the hash or
    /// HMAC has to catch them.
    #[test]
    fn test_every_header_bit_flip_is_detected() {
        let out = written(&cheap_config(), None);
        let body_start = out.len() - 2 * HEADER_HASH_LEN;
        let framing = framing_offsets(&out);
        assert_eq!(framing.len(), 6 * 4 + 1);

        for byte in 12..body_start {
            for bit in 0..8 {
                let mut tampered = out.clone();
                tampered[byte] ^= 1 << bit;
                let result = OuterHeader::read(&mut Cursor::new(&tampered))
                    .and_then(|mut header| header.derive_keys("pw"));
                let err = match result {
                    Ok(_) => panic!("flip at byte {byte} bit {bit} went unnoticed"),
                    Err(err) => err,
                };
                if framing.contains(&byte) {
                    assert!(
                        err.is_integrity()
                            || matches!(err, Error::Parse(ParseError::Truncated { .. })),
                        "framing byte {byte} bit {bit}: {err}"
                    );
                } else {
                    assert!(
                        matches!(err, Error::Integrity(IntegrityError::HeaderHashMismatch)),
                        "byte {byte} bit {bit}: {err}"
                    );
                }
            }
        }
    }
}
