//! HMAC block stream
//!
//! The encrypted payload is cut into blocks of `{hmac: 32 bytes, len: u32, data}`.
//! Each block is signed with a key derived from its index, so blocks cannot be
//! reordered, dropped or truncated. An empty block ends the stream and is
//! signed like any other.

use crate::config::DEFAULT_BLOCK_SIZE;
use crate::error::{IntegrityError, Result};
use crate::kdf::{DerivedKeys, HmacSha256};
use crate::wire;
use byteorder::{LittleEndian, WriteBytesExt};
use hmac::Mac;
use std::io::{Read, Write};

pub const BLOCK_HMAC_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCodec {
    block_size: usize,
}

impl Default for BlockCodec {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

fn block_mac(keys: &DerivedKeys, index: u64, len: u32, content: &[u8]) -> HmacSha256 {
    let mut mac = keys.block_mac(index);
    mac.update(&index.to_le_bytes());
    mac.update(&len.to_le_bytes());
    mac.update(content);
    mac
}

impl BlockCodec {
    /// Block size is clamped to `1..=u32::MAX` so every chunk fits its length field
    pub fn new(block_size: usize) -> Self {
        let max = usize::try_from(u32::MAX).unwrap_or(usize::MAX);
        Self {
            block_size: block_size.clamp(1, max),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Verify and concatenate blocks up to and including the terminator
    ///
    /// Stops at the first block whose HMAC does not match; nothing read so
    /// far is returned in that case.
    pub fn read_blocks<R: Read>(reader: &mut R, keys: &DerivedKeys) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        let mut index: u64 = 0;

        loop {
            let signature: [u8; BLOCK_HMAC_LEN] = wire::read_array(reader, "block HMAC")?;
            let len = wire::read_u32(reader, "block length")?;
            let content = wire::read_vec(reader, len as usize, "block data")?;

            if block_mac(keys, index, len, &content)
                .verify_slice(&signature)
                .is_err()
            {
                tracing::warn!("Block {} failed HMAC verification", index);
                return Err(IntegrityError::BlockHmacMismatch { index }.into());
            }

            if content.is_empty() {
                break;
            }
            payload.extend_from_slice(&content);
            index += 1;
        }

        tracing::debug!("Verified {} data blocks ({} bytes)", index, payload.len());
        Ok(payload)
    }

    /// Sign and write `payload`, followed by the empty terminator block
    ///
    /// Returns the number of blocks written, terminator included.
    pub fn write_blocks<W: Write>(
        &self,
        writer: &mut W,
        keys: &DerivedKeys,
        payload: &[u8],
    ) -> Result<u64> {
        let mut index: u64 = 0;
        for chunk in payload.chunks(self.block_size) {
            write_block(writer, keys, index, chunk)?;
            index += 1;
        }
        write_block(writer, keys, index, &[])?;
        tracing::debug!("Wrote {} blocks ({} bytes)", index + 1, payload.len());
        Ok(index + 1)
    }
}

fn write_block<W: Write>(writer: &mut W, keys: &DerivedKeys, index: u64, content: &[u8]) -> Result<()> {
    let len = wire::frame_len(content.len(), "block data")?;
    let signature = block_mac(keys, index, len, content).finalize().into_bytes();
    writer.write_all(&signature)?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(content)?;
    Ok(())
}
