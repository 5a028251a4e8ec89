//! Whole-file decrypt and encrypt
//!
//! Read: outer header, key derivation, block verification, body decryption,
//! inner header. The document bytes and a ready protected stream are handed
//! to the caller. Write is the mirror image and always generates a new master
//! seed, IV, KDF salt and stream key.

use crate::block::BlockCodec;
use crate::config::{ContainerConfig, KdfConfig};
use crate::error::Result;
use crate::header::{self, OuterHeader};
use crate::inner_header::InnerHeader;
use crate::protected::ProtectedStream;
use crate::variant_map::VariantMap;
use rand::{CryptoRng, RngCore};
use std::io::{Read, Write};
use std::time::Instant;
use zeroize::Zeroizing;

/// Everything the document layer needs after a successful decrypt
pub struct DecryptedContainer {
    /// Settings the file was written with, reusable for the next save
    pub config: ContainerConfig,
    pub public_custom_data: Option<VariantMap>,
    pub binaries: Vec<Vec<u8>>,
    /// Plaintext document following the inner header
    pub document: Zeroizing<Vec<u8>>,
    /// Positioned at the first protected value of `document`
    pub stream: ProtectedStream,
}

/// Opaque header data carried from an opened file into the next save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Passthrough {
    pub public_custom_data: Option<VariantMap>,
    pub binaries: Vec<Vec<u8>>,
}

/// Decrypt a complete container
///
/// Any failure aborts the whole operation; no partial document is returned.
pub fn decrypt<R: Read>(reader: &mut R, password: &str) -> Result<DecryptedContainer> {
    let started = Instant::now();

    let mut header = OuterHeader::read(reader)?;
    let keys = header.derive_keys(password)?;
    tracing::debug!("Derived container keys");

    let payload = BlockCodec::read_blocks(reader, &keys)?;
    let plaintext = Zeroizing::new(header.body_cipher().decrypt(&keys, &header.encryption_iv, &payload)?);
    drop(keys);
    tracing::debug!("Decrypted payload ({} bytes)", plaintext.len());

    let (inner, document) = InnerHeader::parse(&plaintext)?;
    let stream = ProtectedStream::new(inner.stream_cipher, inner.stream_key())?;
    let document = Zeroizing::new(document.to_vec());

    let config = ContainerConfig {
        cipher: header.cipher,
        compression: header.compression,
        kdf: KdfConfig::from_parameters(&header.kdf),
        ..ContainerConfig::default()
    };

    tracing::info!(
        "Decrypted container in {:.2?} ({} document bytes)",
        started.elapsed(),
        document.len()
    );
    Ok(DecryptedContainer {
        config,
        public_custom_data: header.public_custom_data.take(),
        binaries: inner.binaries,
        document,
        stream,
    })
}

/// Encrypt a document into a complete container
///
/// `serialize` produces the plaintext document and must push every
/// protected value through the stream it is given, in document order.
pub fn encrypt<W, R, F>(
    writer: &mut W,
    password: &str,
    config: &ContainerConfig,
    passthrough: &Passthrough,
    rng: &mut R,
    serialize: F,
) -> Result<()>
where
    W: Write,
    R: RngCore + CryptoRng,
    F: FnOnce(&mut ProtectedStream) -> Result<Vec<u8>>,
{
    let started = Instant::now();
    config.validate()?;
    config.cipher.ensure_implemented()?;

    let inner = InnerHeader::generate(rng, passthrough.binaries.clone());
    let mut stream = ProtectedStream::new(inner.stream_cipher, inner.stream_key())?;
    let document = Zeroizing::new(serialize(&mut stream)?);

    let mut plaintext = Zeroizing::new(inner.to_bytes()?);
    plaintext.extend_from_slice(&document);
    drop(document);

    let mut out = Vec::new();
    let sealed = header::write_header(
        &mut out,
        password,
        config,
        passthrough.public_custom_data.as_ref(),
        rng,
    )?;
    let body = config
        .body_cipher()
        .encrypt(&sealed.keys, &sealed.encryption_iv, &plaintext)?;
    BlockCodec::new(config.block_size).write_blocks(&mut out, &sealed.keys, &body)?;

    writer.write_all(&out)?;
    writer.flush()?;
    tracing::info!(
        "Encrypted container in {:.2?} ({} bytes)",
        started.elapsed(),
        out.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::CipherKind;
    use crate::config::KdfAlgorithm;
    use crate::error::{Error, IntegrityError, UnsupportedError};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Cursor;

    fn cheap_config() -> ContainerConfig {
        ContainerConfig {
            block_size: 1296,
            kdf: KdfConfig {
                algorithm: KdfAlgorithm::Argon2d,
                iterations: 1,
                memory_bytes: 64 * 1024,
                parallelism: 1,
                ..KdfConfig::default()
            },
            ..ContainerConfig::default()
        }
    }

    fn seal(config: &ContainerConfig, passthrough: &Passthrough, document: &[u8], secrets: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut rng = StdRng::seed_from_u64(21);
        encrypt(&mut out, "pw", config, passthrough, &mut rng, |stream| {
            let mut doc = document.to_vec();
            for secret in secrets {
                doc.extend_from_slice(stream.encode_value("Password", secret, true)?.as_bytes());
                doc.push(b'\n');
            }
            Ok(doc)
        })
        .unwrap();
        out
    }

    #[test]
    fn test_round_trip_with_protected_values() {
        let config = cheap_config();
        let document = vec![b'x'; 5000];
        let out = seal(&config, &Passthrough::default(), &document, &["one", "two"]);

        let mut opened = decrypt(&mut Cursor::new(&out), "pw").unwrap();
        assert!(opened.document.starts_with(&document));
        let tail = String::from_utf8(opened.document[document.len()..].to_vec()).unwrap();
        let values: Vec<String> = tail
            .lines()
            .map(|line| opened.stream.decode_value("Password", line, true).unwrap())
            .collect();
        assert_eq!(values, vec!["one", "two"]);
        assert_eq!(opened.config.cipher, CipherKind::Aes256Cbc);
        assert_eq!(opened.config.kdf, config.kdf);
    }

    #[test]
    fn test_passthrough_survives() {
        let passthrough = Passthrough {
            public_custom_data: Some(VariantMap::new().with(
                "k",
                crate::variant_map::VariantValue::UInt32(1),
            )),
            binaries: vec![vec![1, 2, 3], vec![0]],
        };
        let out = seal(&cheap_config(), &passthrough, b"<doc/>", &[]);
        let opened = decrypt(&mut Cursor::new(&out), "pw").unwrap();
        assert_eq!(opened.binaries, passthrough.binaries);
        assert_eq!(opened.public_custom_data, passthrough.public_custom_data);
        assert_eq!(opened.document.as_slice(), b"<doc/>");
    }

    #[test]
    fn test_document_with_leading_zero_bytes() {
        for compression in [true, false] {
            let config = ContainerConfig {
                compression,
                ..cheap_config()
            };
            let document = [0, 0, 0, 0, b'x'];
            let out = seal(&config, &Passthrough::default(), &document, &[]);
            let opened = decrypt(&mut Cursor::new(&out), "pw").unwrap();
            assert_eq!(opened.document.as_slice(), &document);
        }
    }

    #[test]
    fn test_uncompressed_aes128() {
        let config = ContainerConfig {
            cipher: CipherKind::Aes128Cbc,
            compression: false,
            ..cheap_config()
        };
        let out = seal(&config, &Passthrough::default(), b"plain document", &[]);
        let opened = decrypt(&mut Cursor::new(&out), "pw").unwrap();
        assert_eq!(opened.document.as_slice(), b"plain document");
        assert!(!opened.config.compression);
        assert_eq!(opened.config.cipher, CipherKind::Aes128Cbc);
    }

    #[test]
    fn test_aes_kdf_container() {
        let config = ContainerConfig {
            kdf: KdfConfig {
                algorithm: KdfAlgorithm::AesKdf,
                rounds: 100,
                ..KdfConfig::default()
            },
            ..cheap_config()
        };
        let out = seal(&config, &Passthrough::default(), b"doc", &[]);
        let opened = decrypt(&mut Cursor::new(&out), "pw").unwrap();
        assert_eq!(opened.config.kdf.algorithm, KdfAlgorithm::AesKdf);
        assert_eq!(opened.config.kdf.rounds, 100);
    }

    #[test]
    fn test_wrong_password() {
        let out = seal(&cheap_config(), &Passthrough::default(), b"doc", &[]);
        let err = decrypt(&mut Cursor::new(&out), "wrong").err().unwrap();
        assert!(matches!(err, Error::Integrity(IntegrityError::HeaderHmacMismatch)));
    }

    #[test]
    fn test_serializer_error_writes_nothing() {
        let mut out = Vec::new();
        let err = encrypt(
            &mut out,
            "pw",
            &cheap_config(),
            &Passthrough::default(),
            &mut StdRng::seed_from_u64(1),
            |_| Err(Error::KeystreamExhausted),
        )
        .unwrap_err();
        assert!(matches!(err, Error::KeystreamExhausted));
        assert!(out.is_empty());
    }

    #[test]
    fn test_chacha20_body_refused() {
        let config = ContainerConfig {
            cipher: CipherKind::ChaCha20,
            ..cheap_config()
        };
        let mut out = Vec::new();
        let err = encrypt(
            &mut out,
            "pw",
            &config,
            &Passthrough::default(),
            &mut StdRng::seed_from_u64(1),
            |_| Ok(Vec::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Unsupported(UnsupportedError::NotImplemented(_))));
    }
}
