use crate::sqlite::error::RecordError;

/// Longest encoding of an SQLite varint
pub const MAX_VARINT_LEN: usize = 9;

/// Decodes a big-endian varint: 7 bits per byte with the high bit as the
/// continuation flag, except the ninth byte which contributes all 8 bits.
pub fn read_varint(bytes: &[u8], offset: usize) -> Result<(i64, usize), RecordError> {
    let byte_at = |i: usize| {
        bytes
            .get(offset + i)
            .copied()
            .ok_or(RecordError::MalformedVarint { offset })
    };

    let mut result = 0u64;
    for i in 0..MAX_VARINT_LEN - 1 {
        let byte = byte_at(i)?;
        result = (result << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            return Ok((result as i64, i + 1));
        }
    }

    result = (result << 8) | byte_at(MAX_VARINT_LEN - 1)? as u64;
    Ok((result as i64, MAX_VARINT_LEN))
}
