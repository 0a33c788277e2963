use tracing::info;

use crate::blocktree::block::{peek_block_len, BlockReader};
use crate::blocktree::directory::{
    check_header, decode_trailer, Directory, FieldMeta, HEADER_LEN, TRAILER_LEN,
};
use crate::blocktree::frame::BlockLoader;
use crate::blocktree::stats::Stats;
use crate::blocktree::terms_enum::TermsEnum;
use crate::error::{Result, TermDictError};
use crate::index::{BlockPointer, TermsIndex};
use crate::storage::BlockStore;

struct FieldReader {
    meta: FieldMeta,
    index: TermsIndex,
}

/// Read side of a finished term dictionary.
///
/// Opening validates the header, trailer and directory checksum and loads every
/// field's terms index; blocks are read on demand. The reader only takes `&self`
/// after opening, so any number of enumerators may share it.
pub struct TermDictReader<S: BlockStore> {
    store: S,
    segment: String,
    fields: Vec<FieldReader>,
    /// End of the block region (start of the field directory).
    blocks_end: u64,
}

impl<S: BlockStore> TermDictReader<S> {
    pub fn open(store: S) -> Result<Self> {
        let len = store.len();
        if len < HEADER_LEN + TRAILER_LEN {
            return Err(TermDictError::InvalidFormat(format!(
                "file of {} bytes is too short",
                len
            )));
        }
        check_header(&store.read_bytes(0, HEADER_LEN as usize)?)?;

        let trailer_fp = len - TRAILER_LEN;
        let (dir_fp, checksum) =
            decode_trailer(&store.read_bytes(trailer_fp, TRAILER_LEN as usize)?)?;
        if dir_fp < HEADER_LEN || dir_fp > trailer_fp {
            return Err(TermDictError::InvalidFormat(format!(
                "directory fp {} outside [{}, {}]",
                dir_fp, HEADER_LEN, trailer_fp
            )));
        }
        let dir_bytes = store.read_bytes(dir_fp, (trailer_fp - dir_fp) as usize)?;
        if Directory::checksum(&dir_bytes) != checksum {
            return Err(TermDictError::InvalidFormat(
                "field directory checksum mismatch".into(),
            ));
        }
        let directory = Directory::decode(&dir_bytes)?;

        let mut fields: Vec<FieldReader> = Vec::with_capacity(directory.fields.len());
        for mut meta in directory.fields {
            if fields.iter().any(|f| f.meta.name == meta.name) {
                return Err(TermDictError::InvalidFormat(format!(
                    "field {} listed twice",
                    meta.name
                )));
            }
            if meta.root.fp < HEADER_LEN || meta.root.fp >= dir_fp {
                return Err(TermDictError::InvalidFormat(format!(
                    "field {} root fp {} outside the block region",
                    meta.name, meta.root.fp
                )));
            }
            let index = TermsIndex::from_bytes(std::mem::take(&mut meta.index_bytes))?;
            if index.get(b"") != Some(meta.root) {
                return Err(TermDictError::InvalidFormat(format!(
                    "field {} terms index disagrees with its root pointer",
                    meta.name
                )));
            }
            fields.push(FieldReader { meta, index });
        }

        info!(
            segment = %directory.segment,
            fields = fields.len(),
            bytes = len,
            "opened term dictionary"
        );
        Ok(TermDictReader {
            store,
            segment: directory.segment,
            fields,
            blocks_end: dir_fp,
        })
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.meta.name.as_str()).collect()
    }

    pub fn field(&self, name: &str) -> Result<FieldTerms<'_, S>> {
        self.fields
            .iter()
            .find(|f| f.meta.name == name)
            .map(|field| self.view(field))
            .ok_or_else(|| TermDictError::FieldNotFound(name.to_string()))
    }

    /// All fields, in the order they were written.
    pub fn fields(&self) -> impl Iterator<Item = FieldTerms<'_, S>> + '_ {
        self.fields.iter().map(move |field| self.view(field))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn view<'a>(&'a self, field: &'a FieldReader) -> FieldTerms<'a, S> {
        FieldTerms {
            store: &self.store,
            segment: &self.segment,
            field,
            blocks_end: self.blocks_end,
        }
    }
}

/// One field of an open dictionary.
pub struct FieldTerms<'a, S: BlockStore> {
    store: &'a S,
    segment: &'a str,
    field: &'a FieldReader,
    blocks_end: u64,
}

impl<S: BlockStore> Clone for FieldTerms<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: BlockStore> Copy for FieldTerms<'_, S> {}

impl<'a, S: BlockStore> FieldTerms<'a, S> {
    pub fn name(&self) -> &'a str {
        &self.field.meta.name
    }

    pub fn segment(&self) -> &'a str {
        self.segment
    }

    pub fn num_terms(&self) -> u64 {
        self.field.meta.num_terms
    }

    /// Sum of all term lengths.
    pub fn total_term_bytes(&self) -> u64 {
        self.field.meta.total_term_bytes
    }

    pub fn min_term(&self) -> &'a [u8] {
        &self.field.meta.min_term
    }

    pub fn max_term(&self) -> &'a [u8] {
        &self.field.meta.max_term
    }

    pub fn root(&self) -> BlockPointer {
        self.field.meta.root
    }

    pub fn index(&self) -> &'a TermsIndex {
        &self.field.index
    }

    /// A fresh enumerator, positioned before the first term.
    pub fn iter(&self) -> TermsEnum<'a, S> {
        TermsEnum::new(*self)
    }

    /// The stats payload of `term`, if present.
    pub fn get(&self, term: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut terms_enum = self.iter();
        if terms_enum.seek_exact(term)? {
            Ok(Some(terms_enum.stats_bytes()?.to_vec()))
        } else {
            Ok(None)
        }
    }

    /// Walk every block of the field and return its finished statistics.
    ///
    /// Fails on the first corrupt block, on blocks that classify as nothing, and
    /// when the walked totals disagree with each other or with the directory.
    pub fn compute_stats(&self) -> Result<Stats> {
        let mut stats = Stats::new(self.segment, self.name());
        stats.set_index_num_bytes(self.field.index.num_bytes() as u64)?;
        self.iter().verify_into(&mut stats)?;
        stats.finish()?;
        info!(
            segment = self.segment,
            field = self.name(),
            blocks = stats.total_block_count(),
            terms = stats.total_term_count(),
            "verified field"
        );
        Ok(stats)
    }

    pub(crate) fn violation(&self, detail: String) -> TermDictError {
        TermDictError::InvariantViolation {
            segment: self.segment.to_string(),
            field: self.name().to_string(),
            detail,
        }
    }
}

impl<S: BlockStore> BlockLoader for FieldTerms<'_, S> {
    fn load_block(&self, fp: u64) -> Result<BlockReader> {
        if fp < HEADER_LEN || fp.saturating_add(4) > self.blocks_end {
            return Err(self.corruption(
                fp,
                format!(
                    "block pointer outside the block region [{}, {})",
                    HEADER_LEN, self.blocks_end
                ),
            ));
        }
        let head = self.store.read_bytes(fp, 4)?;
        let len = peek_block_len(fp, &head).map_err(|e| self.lift(e))?;
        if fp + len as u64 > self.blocks_end {
            return Err(self.corruption(
                fp,
                format!("block of {} bytes runs past the block region", len),
            ));
        }
        let bytes = self.store.read_bytes(fp, len)?;
        BlockReader::parse(fp, bytes).map_err(|e| self.lift(e))
    }

    fn corruption(&self, fp: u64, reason: String) -> TermDictError {
        TermDictError::Corruption {
            segment: self.segment.to_string(),
            field: self.name().to_string(),
            fp,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocktree::writer::TermDictWriter;
    use crate::config::BlockTreeConfig;
    use crate::postings::{StatsOnlyReader, TermStats};
    use crate::storage::MemBlockStore;

    fn sample() -> TermDictReader<MemBlockStore> {
        let config = BlockTreeConfig::new(2, 4).unwrap();
        let mut dict = TermDictWriter::new(MemBlockStore::new(), "_0", config).unwrap();
        let mut field = dict.field("body").unwrap();
        for (i, term) in ["cat", "dog", "dogs"].iter().enumerate() {
            field
                .add(term.as_bytes(), TermStats::new(i as u32 + 1, i as u64 + 2))
                .unwrap();
        }
        field.finish().unwrap();
        TermDictReader::open(dict.close().unwrap()).unwrap()
    }

    #[test]
    fn test_open_and_lookup() {
        let reader = sample();
        assert_eq!(reader.segment(), "_0");
        assert_eq!(reader.field_names(), vec!["body"]);

        let body = reader.field("body").unwrap();
        assert_eq!(body.num_terms(), 3);
        assert_eq!(body.min_term(), b"cat");
        assert_eq!(body.max_term(), b"dogs");

        let mut terms_enum = body.iter();
        assert!(terms_enum.seek_exact(b"dog").unwrap());
        assert_eq!(
            terms_enum.term_state(&StatsOnlyReader).unwrap(),
            TermStats::new(2, 3)
        );
        assert_eq!(body.get(b"do").unwrap(), None);
        assert!(matches!(
            reader.field("title"),
            Err(TermDictError::FieldNotFound(_))
        ));
    }

    #[test]
    fn test_compute_stats() {
        let reader = sample();
        let stats = reader.field("body").unwrap().compute_stats().unwrap();
        assert_eq!(stats.total_term_count(), 3);
        assert_eq!(stats.total_term_bytes(), 10);
        assert!(stats.is_finished());
        assert!(stats.index_num_bytes() > 0);
    }

    #[test]
    fn test_rejects_damaged_directory() {
        let mut bytes = sample().into_store().into_bytes();
        let at = bytes.len() - TRAILER_LEN as usize - 1;
        bytes[at] ^= 0xFF;
        assert!(matches!(
            TermDictReader::open(MemBlockStore::from_bytes(bytes)),
            Err(TermDictError::InvalidFormat(_))
        ));

        let mut bytes = sample().into_store().into_bytes();
        bytes[0] = b'X';
        assert!(TermDictReader::open(MemBlockStore::from_bytes(bytes)).is_err());
        assert!(TermDictReader::open(MemBlockStore::from_bytes(vec![0; 8])).is_err());
    }
}
