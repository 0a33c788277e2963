/// File framing around the blocks: header, field directory and trailer.
///
/// File layout:
///   [magic: 8 bytes "BLKTREE1"][version: u32 LE]
///   [blocks of every field]
///   [field directory]
///   [directory fp: u64 LE][crc32 of directory: u32 LE][magic: 8 bytes]
///
/// Field directory:
///   [segment: bytes][field count: varint]
///   per field:
///     [name: bytes][num_terms: varint][total_term_bytes: varint]
///     [root pointer code: varint][min_term: bytes][max_term: bytes][index: bytes]
use crate::codec::{
    crc32, decode_bytes, decode_varint, encode_bytes, encode_varint, read_u32_le, read_u64_le,
};
use crate::error::{Result, TermDictError};
use crate::index::BlockPointer;

pub const MAGIC: &[u8; 8] = b"BLKTREE1";
pub const VERSION: u32 = 1;
pub const HEADER_LEN: u64 = 12;
pub const TRAILER_LEN: u64 = 20;

/// Directory entry for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub num_terms: u64,
    pub total_term_bytes: u64,
    pub root: BlockPointer,
    pub min_term: Vec<u8>,
    pub max_term: Vec<u8>,
    /// Serialized terms index.
    pub index_bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Directory {
    pub segment: String,
    pub fields: Vec<FieldMeta>,
}

pub fn encode_header() -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN as usize);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf
}

pub fn check_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < HEADER_LEN as usize || bytes[..8] != MAGIC[..] {
        return Err(TermDictError::InvalidFormat("bad magic".into()));
    }
    let version = read_u32_le(bytes, 8)
        .ok_or_else(|| TermDictError::InvalidFormat("truncated header".into()))?;
    if version != VERSION {
        return Err(TermDictError::InvalidFormat(format!(
            "unsupported version {} (expected {})",
            version, VERSION
        )));
    }
    Ok(())
}

pub fn encode_trailer(dir_fp: u64, checksum: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TRAILER_LEN as usize);
    buf.extend_from_slice(&dir_fp.to_le_bytes());
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf.extend_from_slice(MAGIC);
    buf
}

/// Returns `(directory fp, directory checksum)`.
pub fn decode_trailer(bytes: &[u8]) -> Result<(u64, u32)> {
    if bytes.len() != TRAILER_LEN as usize || bytes[12..] != MAGIC[..] {
        return Err(TermDictError::InvalidFormat("bad trailer".into()));
    }
    let dir_fp = read_u64_le(bytes, 0)
        .ok_or_else(|| TermDictError::InvalidFormat("truncated trailer".into()))?;
    let checksum = read_u32_le(bytes, 8)
        .ok_or_else(|| TermDictError::InvalidFormat("truncated trailer".into()))?;
    Ok((dir_fp, checksum))
}

fn truncated(what: &str) -> TermDictError {
    TermDictError::InvalidFormat(format!("field directory truncated at {}", what))
}

impl Directory {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_bytes(&mut buf, self.segment.as_bytes());
        encode_varint(&mut buf, self.fields.len() as u64);
        for field in &self.fields {
            encode_bytes(&mut buf, field.name.as_bytes());
            encode_varint(&mut buf, field.num_terms);
            encode_varint(&mut buf, field.total_term_bytes);
            encode_varint(&mut buf, field.root.encode());
            encode_bytes(&mut buf, &field.min_term);
            encode_bytes(&mut buf, &field.max_term);
            encode_bytes(&mut buf, &field.index_bytes);
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let segment = decode_bytes(data, &mut pos).ok_or_else(|| truncated("segment"))?;
        let segment = String::from_utf8(segment.to_vec())
            .map_err(|_| TermDictError::InvalidFormat("segment name is not UTF-8".into()))?;
        let count = decode_varint(data, &mut pos).ok_or_else(|| truncated("field count"))?;

        let mut fields = Vec::new();
        for _ in 0..count {
            let name = decode_bytes(data, &mut pos).ok_or_else(|| truncated("field name"))?;
            let name = String::from_utf8(name.to_vec())
                .map_err(|_| TermDictError::InvalidFormat("field name is not UTF-8".into()))?;
            let num_terms = decode_varint(data, &mut pos).ok_or_else(|| truncated("num_terms"))?;
            let total_term_bytes =
                decode_varint(data, &mut pos).ok_or_else(|| truncated("total_term_bytes"))?;
            let root = decode_varint(data, &mut pos).ok_or_else(|| truncated("root pointer"))?;
            let min_term = decode_bytes(data, &mut pos).ok_or_else(|| truncated("min_term"))?;
            let max_term = decode_bytes(data, &mut pos).ok_or_else(|| truncated("max_term"))?;
            let index_bytes = decode_bytes(data, &mut pos).ok_or_else(|| truncated("index"))?;
            fields.push(FieldMeta {
                name,
                num_terms,
                total_term_bytes,
                root: BlockPointer::decode(root),
                min_term: min_term.to_vec(),
                max_term: max_term.to_vec(),
                index_bytes: index_bytes.to_vec(),
            });
        }
        if pos != data.len() {
            return Err(TermDictError::InvalidFormat(format!(
                "{} trailing bytes after field directory",
                data.len() - pos
            )));
        }
        Ok(Directory { segment, fields })
    }

    pub fn checksum(bytes: &[u8]) -> u32 {
        crc32(bytes)
    }
}
