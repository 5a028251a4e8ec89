//! Little-endian read helpers shared by the TLV codecs

use crate::error::{EncodingError, Error, ParseError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Maps an early EOF to `ParseError::Truncated`, passing other IO errors through
pub(crate) fn truncated(context: &'static str) -> impl Fn(io::Error) -> Error {
    move |err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ParseError::Truncated { context }.into()
        } else {
            Error::Io(err)
        }
    }
}

pub(crate) fn read_u8<R: Read>(reader: &mut R, context: &'static str) -> Result<u8> {
    reader.read_u8().map_err(truncated(context))
}

pub(crate) fn read_u16<R: Read>(reader: &mut R, context: &'static str) -> Result<u16> {
    reader.read_u16::<LittleEndian>().map_err(truncated(context))
}

pub(crate) fn read_u32<R: Read>(reader: &mut R, context: &'static str) -> Result<u32> {
    reader.read_u32::<LittleEndian>().map_err(truncated(context))
}

pub(crate) fn read_array<R: Read, const N: usize>(
    reader: &mut R,
    context: &'static str,
) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(truncated(context))?;
    Ok(buf)
}

/// Reads exactly `len` bytes without trusting `len` for the allocation size
pub(crate) fn read_vec<R: Read>(reader: &mut R, len: usize, context: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(truncated(context))?;
    if buf.len() != len {
        return Err(ParseError::Truncated { context }.into());
    }
    Ok(buf)
}

/// Length prefix for a field of `len` bytes
pub(crate) fn frame_len(len: usize, field: &'static str) -> Result<u32> {
    u32::try_from(len).map_err(|_| EncodingError::FieldTooLong { field, len }.into())
}

/// Writes `{type:u8, length:u32 LE, value}`
pub(crate) fn write_tlv<W: Write>(writer: &mut W, field_type: u8, value: &[u8]) -> Result<()> {
    let len = frame_len(value.len(), "header field")?;
    writer.write_u8(field_type)?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_vec_truncated() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3]);
        let err = read_vec(&mut cursor, 4, "field").unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError::Truncated { context: "field" })
        ));
    }

    #[test]
    fn test_write_tlv_layout() {
        let mut out = Vec::new();
        write_tlv(&mut out, 7, &[0xAA, 0xBB]).unwrap();
        assert_eq!(out, vec![7, 2, 0, 0, 0, 0xAA, 0xBB]);
    }

    #[test]
    fn test_frame_len_limit() {
        assert_eq!(frame_len(u32::MAX as usize, "field").unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        {
            let err = frame_len(u32::MAX as usize + 1, "field").unwrap_err();
            assert!(matches!(
                err,
                Error::Encoding(EncodingError::FieldTooLong { field: "field", .. })
            ));
        }
    }
}
