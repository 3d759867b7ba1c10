use std::collections::BTreeMap;

use crate::{error::PdfResult, objects::Reference};

pub(crate) mod parser;
pub(crate) mod stream;

/// The cross-reference table: the index that permits random access to
/// indirect objects without reading the whole file.
///
/// Entries are keyed by object number and kept sorted.
#[derive(Debug, Clone, Default)]
pub(crate) struct Xref {
    pub(crate) entries: BTreeMap<usize, XrefEntry>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum XrefEntry {
    InUse {
        offset: usize,
        generation: u16,
    },
    Free {
        next_free: u64,
        generation: u16,
    },
    /// Stored inside an object stream. The container's generation is
    /// implicitly zero.
    Compressed {
        container: usize,
        index: usize,
    },
}

/// Where an object's bytes live.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ByteOffset {
    MainFile(usize),
    ObjectStream { container: usize, index: usize },
}

impl Xref {
    pub fn get(&self, number: usize) -> Option<&XrefEntry> {
        self.entries.get(&number)
    }

    pub fn offset_for(&self, reference: Reference) -> PdfResult<Option<ByteOffset>> {
        Ok(match self.entries.get(&reference.number) {
            Some(XrefEntry::InUse { offset, generation }) => {
                if *generation != reference.generation {
                    log::warn!(
                        "object {} has generation {}, reference asked for {}",
                        reference.number,
                        generation,
                        reference.generation
                    );
                }

                Some(ByteOffset::MainFile(*offset))
            }
            Some(&XrefEntry::Compressed { container, index }) => {
                Some(ByteOffset::ObjectStream { container, index })
            }
            Some(XrefEntry::Free { .. }) | None => None,
        })
    }

    /// Fold an earlier section into this one. Numbers already present win,
    /// so sections are merged newest first.
    pub fn merge_previous(&mut self, previous: Xref) {
        for (number, entry) in previous.entries {
            self.entries.entry(number).or_insert(entry);
        }
    }

    pub fn max_object_number(&self) -> usize {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
