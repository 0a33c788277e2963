/// Low-level byte encodings shared by the block codec, the postings payload and
/// the field directory.
///
/// Varint: unsigned LEB128, 7 bits per byte, high bit = continuation.
/// Byte string: [varint len][bytes].

/// Encode a u64 as a varint (LEB128).
pub fn encode_varint(buf: &mut Vec<u8>, mut val: u64) {
    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if val == 0 {
            break;
        }
    }
}

/// Decode a varint. Returns the value and advances offset.
pub fn decode_varint(data: &[u8], offset: &mut usize) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        if *offset >= data.len() {
            return None;
        }
        let byte = data[*offset];
        *offset += 1;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
    Some(result)
}

/// Number of bytes `encode_varint` emits for `val`.
pub fn varint_len(mut val: u64) -> usize {
    let mut n = 1;
    while val >= 0x80 {
        val >>= 7;
        n += 1;
    }
    n
}

/// Write a length-prefixed byte string.
pub fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Read a length-prefixed byte string.
pub fn decode_bytes<'a>(data: &'a [u8], offset: &mut usize) -> Option<&'a [u8]> {
    let len = decode_varint(data, offset)? as usize;
    let end = offset.checked_add(len)?;
    if end > data.len() {
        return None;
    }
    let bytes = &data[*offset..end];
    *offset = end;
    Some(bytes)
}

/// Read a little-endian u32 at `pos`.
pub fn read_u32_le(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Read a little-endian u64 at `pos`.
pub fn read_u64_le(data: &[u8], pos: usize) -> Option<u64> {
    let bytes = data.get(pos..pos.checked_add(8)?)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// CRC-32 (IEEE) over `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFFFFFF;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}
