//! Dictionary over a section store, for values without a 64-bit form.

use std::path::Path;
use std::sync::Arc;

use crate::codec::ValueCodec;
use crate::error::{Error, Result};
use crate::section::{SectionCache, SectionCursor, SectionIter, SectionStore};

#[derive(Debug)]
pub struct SortedDictionary {
    codec: ValueCodec,
    store: SectionStore,
}

impl SortedDictionary {
    pub fn open(path: &Path, cache: Arc<SectionCache>) -> Result<Self> {
        let store = SectionStore::open(path, cache)?;
        let codec = ValueCodec::from_tag(store.payload_tag()).ok_or_else(|| {
            Error::corrupt(format!(
                "{}: unknown codec tag {}",
                path.display(),
                store.payload_tag()
            ))
        })?;
        Ok(SortedDictionary { codec, store })
    }

    pub fn codec(&self) -> ValueCodec {
        self.codec
    }

    pub fn len(&self) -> u64 {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn position_of(&self, bytes: &[u8]) -> Result<Option<u64>> {
        self.store.find(bytes)
    }

    pub fn value_of(&self, rank: u64) -> Result<Vec<u8>> {
        self.store.get(rank)
    }

    pub fn iter(&self) -> SectionIter<'_> {
        self.store.iter()
    }

    pub fn cursor(&self) -> SectionCursor<'_> {
        self.store.cursor()
    }

    pub fn store(&self) -> &SectionStore {
        &self.store
    }
}
