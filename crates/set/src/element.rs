//! Elements, their mutation history and membership by generation.

use alloy_primitives::{B256, Keccak256};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Content hash identifying an element.
pub type ElementHash = B256;

/// An opaque payload with an application-defined type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    pub element_type: u16,
    pub data: Bytes,
}

impl Element {
    pub fn new(element_type: u16, data: impl Into<Bytes>) -> Self {
        Self {
            element_type,
            data: data.into(),
        }
    }

    /// Keccak-256 over the big-endian type tag followed by the payload.
    pub fn hash(&self) -> ElementHash {
        let mut hasher = Keccak256::new();
        hasher.update(self.element_type.to_be_bytes());
        hasher.update(&self.data);
        hasher.finalize()
    }
}

/// An element entering (`added`) or leaving the set at `generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MutationEvent {
    pub(crate) generation: u32,
    pub(crate) added: bool,
}

/// Half-open range `[start, end)` of generations a set must not observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GenerationRange {
    pub(crate) start: u32,
    pub(crate) end: u32,
}

impl GenerationRange {
    fn contains(&self, generation: u32) -> bool {
        generation >= self.start && generation < self.end
    }
}

pub(crate) fn is_excluded_generation(generation: u32, excluded: &[GenerationRange]) -> bool {
    excluded.iter().any(|range| range.contains(generation))
}

/// An element together with every mutation any sibling set performed on it.
#[derive(Debug, Clone)]
pub(crate) struct ElementEntry {
    pub(crate) element: Element,
    pub(crate) hash: ElementHash,
    /// In insertion order, which is not generation order once sets fork.
    pub(crate) mutations: Vec<MutationEvent>,
}

impl ElementEntry {
    pub(crate) fn new(element: Element, hash: ElementHash) -> Self {
        Self {
            element,
            hash,
            mutations: Vec::new(),
        }
    }

    /// Whether the element belongs to the set at `generation`, ignoring the
    /// mutations of excluded generations.
    ///
    /// # Panics
    ///
    /// If two admissible mutations in a row record the same state.
    pub(crate) fn is_member(&self, generation: u32, excluded: &[GenerationRange]) -> bool {
        if is_excluded_generation(generation, excluded) {
            warn!(hash = %self.hash, generation, "membership queried at excluded generation");
            return false;
        }
        let mut present = false;
        for mutation in &self.mutations {
            if mutation.generation > generation
                || is_excluded_generation(mutation.generation, excluded)
            {
                continue;
            }
            assert_ne!(
                present, mutation.added,
                "element {} mutated to the same state twice",
                self.hash
            );
            present = mutation.added;
        }
        present
    }

    pub(crate) fn push(&mut self, generation: u32, added: bool) {
        self.mutations.push(MutationEvent { generation, added });
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn entry() -> ElementEntry {
        let element = Element::new(1, b"x".as_slice());
        let hash = element.hash();
        ElementEntry::new(element, hash)
    }

    #[test]
    fn test_hash_covers_type() {
        let a = Element::new(1, b"payload".as_slice());
        let b = Element::new(2, b"payload".as_slice());
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), Element::new(1, b"payload".to_vec()).hash());
    }

    #[test]
    fn test_add_remove_add_by_generation() {
        let mut entry = entry();
        entry.push(1, true);
        entry.push(2, false);
        entry.push(3, true);

        assert!(!entry.is_member(0, &[]));
        assert!(entry.is_member(1, &[]));
        assert!(!entry.is_member(2, &[]));
        assert!(entry.is_member(3, &[]));
        assert!(entry.is_member(10, &[]));
    }

    #[test]
    fn test_excluded_mutations_are_invisible() {
        let mut entry = entry();
        entry.push(0, true);
        // A sibling removed the element at generation 2.
        entry.push(2, false);

        let excluded = [GenerationRange { start: 2, end: 3 }];
        assert!(entry.is_member(3, &excluded));
        assert!(!entry.is_member(3, &[]));
    }

    #[test]
    #[should_panic(expected = "same state twice")]
    fn test_double_add_panics() {
        let mut entry = entry();
        entry.push(0, true);
        entry.push(1, true);
        entry.is_member(1, &[]);
    }

    proptest! {
        #[test]
        fn test_membership_follows_last_visible_mutation(
            steps in 1usize..16,
            query in 0u32..20,
        ) {
            let mut entry = entry();
            for step in 0..steps {
                entry.push(step as u32, step % 2 == 0);
            }
            let last_visible = (0..steps).filter(|s| *s as u32 <= query).last();
            prop_assert_eq!(entry.is_member(query, &[]), last_visible.is_some_and(|s| s % 2 == 0));
        }
    }
}
