//! Local sets: generation bookkeeping, mutation and iteration.

use std::collections::VecDeque;

use tracing::trace;

use crate::content::{ContentId, Mutation, SetContent};
use crate::element::{Element, ElementEntry, ElementHash, GenerationRange};
use crate::operation::OperationId;
use crate::protocol::OperationType;

/// Strategy-private per-set state, cloned by lazy copies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SetState {
    /// Members at the current generation, announced in operation requests.
    pub(crate) element_count: u64,
}

/// An iteration over the content as it was at `generation`.
#[derive(Debug)]
pub(crate) struct Iteration {
    pub(crate) generation: u32,
    remaining: VecDeque<ElementHash>,
}

#[derive(Debug)]
pub(crate) struct Set {
    pub(crate) operation: OperationType,
    pub(crate) state: SetState,
    pub(crate) content: ContentId,
    /// Generation new mutations are recorded at.
    pub(crate) current_generation: u32,
    /// Generations written by sibling sets after a lazy copy.
    pub(crate) excluded: Vec<GenerationRange>,
    pub(crate) iteration: Option<Iteration>,
    pub(crate) iteration_id: u16,
    pub(crate) operations: Vec<OperationId>,
}

impl Set {
    pub(crate) fn new(operation: OperationType, content: ContentId) -> Self {
        Self {
            operation,
            state: SetState::default(),
            content,
            current_generation: 0,
            excluded: Vec::new(),
            iteration: None,
            iteration_id: 0,
            operations: Vec::new(),
        }
    }

    /// A sibling sharing this set's content and history up to now.
    ///
    /// The caller accounts for the extra content reference and advances the
    /// generations of both siblings.
    pub(crate) fn lazy_copy(&self) -> Self {
        Self {
            operation: self.operation,
            state: self.state.clone(),
            content: self.content,
            current_generation: self.current_generation,
            excluded: self.excluded.clone(),
            iteration: None,
            iteration_id: 0,
            operations: Vec::new(),
        }
    }

    /// Move to a generation no other set has written to.
    ///
    /// If siblings advanced the shared counter in the meantime, their
    /// generations are skipped in one step and recorded as excluded.
    pub(crate) fn advance_generation(&mut self, content: &mut SetContent) {
        if self.current_generation == content.latest_generation {
            content.latest_generation += 1;
            self.current_generation += 1;
            return;
        }
        assert!(
            self.current_generation < content.latest_generation,
            "set generation {} ahead of its content ({})",
            self.current_generation,
            content.latest_generation
        );
        let range = GenerationRange {
            start: self.current_generation + 1,
            end: content.latest_generation + 1,
        };
        content.latest_generation = range.end;
        self.current_generation = range.end;
        self.excluded.push(range);
    }

    /// Record a mutation at the current generation.
    ///
    /// Adding a member or removing a non-member is a no-op.
    pub(crate) fn apply(&mut self, content: &mut SetContent, mutation: Mutation) {
        let generation = self.current_generation;
        match mutation {
            Mutation::Add(element) => {
                let hash = element.hash();
                let entry = content
                    .elements
                    .entry(hash)
                    .or_insert_with(|| ElementEntry::new(element, hash));
                if entry.is_member(generation, &self.excluded) {
                    trace!(%hash, generation, "element already present");
                    return;
                }
                entry.push(generation, true);
                self.state.element_count += 1;
                trace!(%hash, generation, "element added");
            }
            Mutation::Remove(element) => {
                let hash = element.hash();
                let Some(entry) = content.elements.get_mut(&hash) else {
                    trace!(%hash, "removing unknown element");
                    return;
                };
                if !entry.is_member(generation, &self.excluded) {
                    trace!(%hash, generation, "element already absent");
                    return;
                }
                entry.push(generation, false);
                self.state.element_count = self.state.element_count.saturating_sub(1);
                trace!(%hash, generation, "element removed");
            }
        }
    }

    /// Begin iterating over the members at the current generation.
    pub(crate) fn start_iteration(&mut self, content: &mut SetContent) {
        content.iterator_count += 1;
        self.iteration = Some(Iteration {
            generation: self.current_generation,
            remaining: content.elements.keys().copied().collect(),
        });
    }

    /// Next member of the running iteration, `None` once exhausted.
    pub(crate) fn next_element(&mut self, content: &SetContent) -> Option<Element> {
        let iteration = self.iteration.as_mut()?;
        while let Some(hash) = iteration.remaining.pop_front() {
            let Some(entry) = content.elements.get(&hash) else {
                continue;
            };
            if entry.is_member(iteration.generation, &self.excluded) {
                return Some(entry.element.clone());
            }
        }
        None
    }

    /// Stop the running iteration, if any. Returns whether one was running.
    pub(crate) fn end_iteration(&mut self, content: &mut SetContent) -> bool {
        if self.iteration.take().is_none() {
            return false;
        }
        self.iteration_id = self.iteration_id.wrapping_add(1);
        content.iterator_count -= 1;
        true
    }
}
