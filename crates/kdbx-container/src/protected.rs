//! Protected value stream cipher
//!
//! Protected fields in the document are XORed with one shared ChaCha20
//! keystream, consumed in document order. Reading and writing keep separate
//! offsets so a document can be decoded and re-encoded with one instance.

use crate::error::{Error, Result, UnsupportedError};
use crate::inner_header::StreamCipherKind;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20::cipher::generic_array::GenericArray;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, Zeroizing};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct ProtectedStream {
    key: Zeroizing<[u8; KEY_LEN]>,
    nonce: [u8; NONCE_LEN],
    decrypt_offset: u64,
    encrypt_offset: u64,
}

impl ProtectedStream {
    /// Derive key and nonce from the inner header's stream key
    pub fn new(kind: StreamCipherKind, stream_key: &[u8]) -> Result<Self> {
        if kind != StreamCipherKind::ChaCha20 {
            return Err(UnsupportedError::NotImplemented("Salsa20 protected stream").into());
        }
        let (key, nonce) = derive(stream_key);
        Ok(Self {
            key,
            nonce,
            decrypt_offset: 0,
            encrypt_offset: 0,
        })
    }

    /// Decrypt the next protected value read from the document
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let out = self.apply(data, self.decrypt_offset)?;
        self.decrypt_offset += data.len() as u64;
        Ok(out)
    }

    /// Encrypt the next protected value written to the document
    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let out = self.apply(data, self.encrypt_offset)?;
        self.encrypt_offset += data.len() as u64;
        Ok(out)
    }

    /// Rewind both directions to the start of the keystream
    pub fn reset(&mut self) {
        self.decrypt_offset = 0;
        self.encrypt_offset = 0;
    }

    /// Switch to a new stream key and rewind
    pub fn refresh(&mut self, stream_key: &[u8]) {
        let (key, nonce) = derive(stream_key);
        self.key = key;
        self.nonce = nonce;
        self.reset();
    }

    pub fn decrypt_offset(&self) -> u64 {
        self.decrypt_offset
    }

    pub fn encrypt_offset(&self) -> u64 {
        self.encrypt_offset
    }

    // Same output as running the keystream over `offset` zero bytes
    // followed by `data` and dropping the first `offset` bytes.
    fn apply(&self, data: &[u8], offset: u64) -> Result<Vec<u8>> {
        let mut cipher = ChaCha20::new(
            GenericArray::from_slice(self.key.as_slice()),
            GenericArray::from_slice(&self.nonce),
        );
        cipher
            .try_seek(offset)
            .map_err(|_| Error::KeystreamExhausted)?;
        let mut out = data.to_vec();
        cipher
            .try_apply_keystream(&mut out)
            .map_err(|_| Error::KeystreamExhausted)?;
        Ok(out)
    }

    /// Decode a string value as it appears in the document
    ///
    /// Base64 is undone first, then the stream cipher when `protected`.
    pub fn decode_value(&mut self, key: &str, wire: &str, protected: bool) -> Result<String> {
        if !protected {
            return decode_unprotected(key, wire);
        }
        let mut raw = BASE64.decode(wire.trim())?;
        let plain = self.decrypt(&raw)?;
        raw.zeroize();
        Ok(String::from_utf8(plain)?)
    }

    /// Inverse of [`ProtectedStream::decode_value`]
    pub fn encode_value(&mut self, key: &str, plain: &str, protected: bool) -> Result<String> {
        if protected {
            Ok(BASE64.encode(self.encrypt(plain.as_bytes())?))
        } else {
            Ok(encode_unprotected(key, plain))
        }
    }
}

/// Decode an unprotected value; never touches the keystream
pub fn decode_unprotected(key: &str, wire: &str) -> Result<String> {
    if uses_base64(key, false) {
        Ok(String::from_utf8(BASE64.decode(wire.trim())?)?)
    } else {
        Ok(wire.to_string())
    }
}

pub fn encode_unprotected(key: &str, plain: &str) -> String {
    if uses_base64(key, false) {
        BASE64.encode(plain.as_bytes())
    } else {
        plain.to_string()
    }
}

fn derive(stream_key: &[u8]) -> (Zeroizing<[u8; KEY_LEN]>, [u8; NONCE_LEN]) {
    let mut hashed = Sha512::digest(stream_key);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&hashed[..KEY_LEN]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&hashed[KEY_LEN..KEY_LEN + NONCE_LEN]);
    hashed.as_mut_slice().zeroize();
    (key, nonce)
}

/// Whether a string field is base64 on the wire
pub fn uses_base64(key: &str, protected: bool) -> bool {
    protected || key == "Password" || key.contains("Time")
}

impl std::fmt::Debug for ProtectedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedStream")
            .field("decrypt_offset", &self.decrypt_offset)
            .field("encrypt_offset", &self.encrypt_offset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stream() -> ProtectedStream {
        ProtectedStream::new(StreamCipherKind::ChaCha20, &[0x42; 64]).unwrap()
    }

    #[test]
    fn test_key_and_nonce_come_from_sha512() {
        let hashed = Sha512::digest([0x42u8; 64]);
        let s = stream();
        assert_eq!(s.key.as_slice(), &hashed[..32]);
        assert_eq!(s.nonce.as_slice(), &hashed[32..44]);
    }

    #[test]
    fn test_offset_matches_zero_padding() {
        let mut s = stream();
        s.encrypt(b"first value").unwrap();
        let second = s.encrypt(b"second").unwrap();

        // Whole keystream from the start, over the concatenation
        let mut fresh = stream();
        let joined = fresh.encrypt(b"first valuesecond").unwrap();
        assert_eq!(second, joined[11..]);
    }

    #[test]
    fn test_in_order_round_trip() {
        let values: [&[u8]; 3] = [b"hunter2", b"", b"correct horse battery staple"];
        let mut writer = stream();
        let encrypted: Vec<Vec<u8>> = values.iter().map(|v| writer.encrypt(v).unwrap()).collect();
        let mut reader = stream();
        for (value, cipher) in values.iter().zip(&encrypted) {
            assert_eq!(reader.decrypt(cipher).unwrap(), *value);
        }
        assert_eq!(reader.decrypt_offset(), writer.encrypt_offset());
    }

    #[test]
    fn test_directions_are_independent() {
        let mut s = stream();
        let cipher = s.encrypt(b"abc").unwrap();
        assert_eq!(s.encrypt_offset(), 3);
        assert_eq!(s.decrypt_offset(), 0);
        assert_eq!(s.decrypt(&cipher).unwrap(), b"abc");
    }

    #[test]
    fn test_reset_replays_keystream() {
        let mut s = stream();
        let a = s.encrypt(b"value").unwrap();
        s.decrypt(&a).unwrap();
        s.reset();
        assert_eq!(s.encrypt_offset(), 0);
        assert_eq!(s.decrypt_offset(), 0);
        assert_eq!(s.encrypt(b"value").unwrap(), a);
    }

    #[test]
    fn test_refresh_changes_keystream() {
        let mut s = stream();
        let a = s.encrypt(b"value").unwrap();
        s.refresh(&[0x43; 64]);
        assert_eq!(s.encrypt_offset(), 0);
        assert_ne!(s.encrypt(b"value").unwrap(), a);
    }

    #[test]
    fn test_salsa20_not_implemented() {
        let err = ProtectedStream::new(StreamCipherKind::Salsa20, &[0; 64]).unwrap_err();
        assert!(matches!(err, Error::Unsupported(UnsupportedError::NotImplemented(_))));
    }

    #[test]
    fn test_base64_convention() {
        assert!(uses_base64("Title", true));
        assert!(uses_base64("Password", false));
        assert!(uses_base64("CreationTime", false));
        assert!(!uses_base64("UserName", false));
        assert!(!uses_base64("password", false));
    }

    #[test]
    fn test_value_encoding_order() {
        let mut writer = stream();
        let wire = writer.encode_value("Password", "s3cret", true).unwrap();
        assert_ne!(wire, BASE64.encode("s3cret"));
        let mut reader = stream();
        assert_eq!(reader.decode_value("Password", &wire, true).unwrap(), "s3cret");

        let plain_b64 = writer.encode_value("Password", "open", false).unwrap();
        assert_eq!(plain_b64, BASE64.encode("open"));
        assert_eq!(writer.encode_value("URL", "https://x", false).unwrap(), "https://x");
        // unprotected values do not touch the keystream
        assert_eq!(writer.encrypt_offset(), 6);
    }

    #[test]
    fn test_bad_base64_is_encoding_error() {
        let err = stream().decode_value("Password", "***", true).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    proptest! {
        #[test]
        fn prop_round_trip_in_order(values in proptest::collection::vec(".{0,40}", 1..8)) {
            let mut writer = stream();
            let wire: Vec<String> = values
                .iter()
                .map(|v| writer.encode_value("Password", v, true).unwrap())
                .collect();
            let mut reader = stream();
            for (value, encoded) in values.iter().zip(&wire) {
                prop_assert_eq!(&reader.decode_value("Password", encoded, true).unwrap(), value);
            }
        }

        /// Decrypting in a different order than encrypting garbles the values.
        #[test]
        fn prop_out_of_order_does_not_match(
            first in proptest::collection::vec(any::<u8>(), 8..32),
            second in proptest::collection::vec(any::<u8>(), 8..32),
        ) {
            let mut writer = stream();
            let c1 = writer.encrypt(&first).unwrap();
            let c2 = writer.encrypt(&second).unwrap();

            let mut reader = stream();
            let p2 = reader.decrypt(&c2).unwrap();
            let p1 = reader.decrypt(&c1).unwrap();
            prop_assert!(p2 != second || p1 != first);
        }
    }
}
