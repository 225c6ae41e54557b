//! Element storage shared by a set and its lazy copies.

use std::collections::{HashMap, VecDeque};
use std::ops::{Index, IndexMut};

use crate::element::{Element, ElementEntry, ElementHash, GenerationRange};
use crate::protocol::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ContentId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation {
    Add(Element),
    Remove(Element),
}

/// A mutation held back while an iteration runs over the content.
#[derive(Debug)]
pub(crate) struct PendingMutation {
    /// Owner of the set the mutation applies to.
    pub(crate) set: ClientId,
    pub(crate) mutation: Mutation,
}

#[derive(Debug)]
pub(crate) struct SetContent {
    pub(crate) elements: HashMap<ElementHash, ElementEntry>,
    /// Sets sharing this content.
    pub(crate) refcount: usize,
    pub(crate) latest_generation: u32,
    /// Iterations in progress; mutations are queued while non-zero.
    pub(crate) iterator_count: usize,
    pub(crate) pending: VecDeque<PendingMutation>,
}

impl SetContent {
    fn new() -> Self {
        Self {
            elements: HashMap::new(),
            refcount: 1,
            latest_generation: 0,
            iterator_count: 0,
            pending: VecDeque::new(),
        }
    }

    /// Drop every element that is not a member for any of `readers`.
    ///
    /// Each reader is a generation together with the exclusions of the set
    /// reading at it. Returns the number of elements dropped.
    pub(crate) fn collect_garbage(&mut self, readers: &[(u32, &[GenerationRange])]) -> usize {
        let before = self.elements.len();
        self.elements.retain(|_, entry| {
            readers
                .iter()
                .any(|(generation, excluded)| entry.is_member(*generation, excluded))
        });
        before - self.elements.len()
    }
}

/// Owner of all set contents, indexed by [`ContentId`].
///
/// Indexing with an id that was already released panics.
#[derive(Debug, Default)]
pub(crate) struct ContentArena {
    entries: HashMap<ContentId, SetContent>,
    next_id: u64,
}

impl ContentArena {
    /// Fresh content referenced by one set.
    pub(crate) fn create(&mut self) -> ContentId {
        let id = ContentId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, SetContent::new());
        id
    }

    pub(crate) fn get_mut(&mut self, id: ContentId) -> Option<&mut SetContent> {
        self.entries.get_mut(&id)
    }

    /// Drop one reference; the content is released when none remain.
    ///
    /// Returns `true` if the content was released.
    pub(crate) fn release(&mut self, id: ContentId) -> bool {
        let Some(content) = self.entries.get_mut(&id) else {
            return false;
        };
        content.refcount -= 1;
        if content.refcount > 0 {
            return false;
        }
        self.entries.remove(&id);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Index<ContentId> for ContentArena {
    type Output = SetContent;

    fn index(&self, id: ContentId) -> &SetContent {
        match self.entries.get(&id) {
            Some(content) => content,
            None => panic!("{id:?} used after release"),
        }
    }
}

impl IndexMut<ContentId> for ContentArena {
    fn index_mut(&mut self, id: ContentId) -> &mut SetContent {
        match self.entries.get_mut(&id) {
            Some(content) => content,
            None => panic!("{id:?} used after release"),
        }
    }
}
