// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! The vector-clock index proper.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use moira_types::{Epoch, Event, EventHash, EventSource, Seq, Validators};

use crate::error::IndexError;

/// A single validator's entry in an event's HighestBefore vector.
///
/// `seq == 0` means the validator has no event visible in the causal past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HighestBeforeEntry {
    pub seq: Seq,
    pub id: EventHash,
    fork: bool,
}

impl HighestBeforeEntry {
    pub fn is_empty(&self) -> bool {
        self.seq == 0
    }

    /// True once two conflicting events of this validator are both
    /// reachable from the indexed event.
    pub fn is_fork_detected(&self) -> bool {
        self.fork
    }
}

/// Per-event vectors kept by the index.
#[derive(Debug, Clone)]
struct EventVectors {
    creator_idx: usize,
    seq: Seq,
    highest_before: Vec<HighestBeforeEntry>,
    /// For each validator: lowest seq of that validator's events observing
    /// this event; 0 = not observed.
    lowest_after: Vec<Seq>,
}

/// Epoch-scoped state, replaced wholesale on [`VectorIndex::reset`].
struct EpochIndex {
    epoch: Epoch,
    validators: Arc<Validators>,
    source: Arc<dyn EventSource>,
    /// Committed vectors.
    base: DashMap<EventHash, EventVectors>,
    /// Tentative overlay: freshly added events plus copy-on-write copies of
    /// ancestors whose LowestAfter was extended since the last flush.
    staged: DashMap<EventHash, EventVectors>,
}

impl EpochIndex {
    fn contains(&self, id: &EventHash) -> bool {
        self.staged.contains_key(id) || self.base.contains_key(id)
    }

    fn vectors(&self, id: &EventHash) -> Option<EventVectors> {
        if let Some(v) = self.staged.get(id) {
            return Some(v.clone());
        }
        self.base.get(id).map(|v| v.clone())
    }

    /// Merge another entry of the same validator into `dst`.
    ///
    /// Entries at different seqs are reconciled through the self-parent
    /// chain: if the lower event is not an ancestor of the higher one, two
    /// branches of this validator are reachable from the merging event and
    /// the fork flag is set. The equal-seq case needs no walk.
    fn merge_entry(
        &self,
        dst: &mut HighestBeforeEntry,
        src: &HighestBeforeEntry,
    ) -> Result<(), IndexError> {
        if src.is_empty() {
            return Ok(());
        }
        if dst.is_empty() {
            *dst = *src;
            return Ok(());
        }
        if src.seq == dst.seq {
            if src.id != dst.id {
                // same creator, same seq, different hash: an equivocation
                dst.fork = true;
                // keep the lexicographically smaller hash so the merge
                // result doesn't depend on parent order
                if src.id < dst.id {
                    dst.id = src.id;
                }
            } else {
                dst.fork |= src.fork;
            }
            return Ok(());
        }

        let (lo, hi) = if dst.seq < src.seq {
            (*dst, *src)
        } else {
            (*src, *dst)
        };
        let fork = dst.fork || src.fork || !self.same_branch(&hi, &lo)?;
        if src.seq > dst.seq {
            *dst = *src;
        }
        dst.fork = fork;
        Ok(())
    }

    /// Whether `lo` lies on `hi`'s self-parent chain.
    fn same_branch(
        &self,
        hi: &HighestBeforeEntry,
        lo: &HighestBeforeEntry,
    ) -> Result<bool, IndexError> {
        let mut cur = hi.id;
        loop {
            if cur == lo.id {
                return Ok(true);
            }
            let event = self
                .source
                .get_event(&cur)
                .ok_or(IndexError::MissingParent(cur))?;
            if event.seq() <= lo.seq {
                return Ok(false);
            }
            let Some(parent) = event.self_parent() else {
                return Ok(false);
            };
            cur = parent;
        }
    }

    /// Set `lowest_after[creator_idx]` of `id` to `seq` if unset.
    /// Returns whether the entry was newly set.
    fn observe(&self, id: &EventHash, creator_idx: usize, seq: Seq) -> Result<bool, IndexError> {
        if let Some(mut v) = self.staged.get_mut(id) {
            if v.lowest_after[creator_idx] != 0 {
                return Ok(false);
            }
            v.lowest_after[creator_idx] = seq;
            return Ok(true);
        }
        let Some(committed) = self.base.get(id) else {
            return Err(IndexError::MissingParent(*id));
        };
        if committed.lowest_after[creator_idx] != 0 {
            return Ok(false);
        }
        let mut copy = committed.clone();
        drop(committed);
        copy.lowest_after[creator_idx] = seq;
        self.staged.insert(*id, copy);
        Ok(true)
    }
}

/// Causal-visibility index over one epoch of the DAG.
///
/// Single-writer: `add`/`flush`/`drop_not_flushed`/`reset` must be invoked
/// from one logical thread of control. Queries over flushed state are safe
/// for concurrent readers.
pub struct VectorIndex {
    epoch: ArcSwapOption<EpochIndex>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            epoch: ArcSwapOption::const_empty(),
        }
    }

    /// Reinitialize all index state for a new epoch. Must run before any
    /// event of that epoch is indexed; prior-epoch state is discarded.
    pub fn reset(&self, epoch: Epoch, validators: Arc<Validators>, source: Arc<dyn EventSource>) {
        debug!(epoch, validators = validators.len(), "vector index reset");
        self.epoch.store(Some(Arc::new(EpochIndex {
            epoch,
            validators,
            source,
            base: DashMap::new(),
            staged: DashMap::new(),
        })));
    }

    /// The epoch the index is currently serving, if initialized.
    pub fn current_epoch(&self) -> Option<Epoch> {
        self.epoch.load().as_ref().map(|ep| ep.epoch)
    }

    fn load(&self) -> Result<Arc<EpochIndex>, IndexError> {
        self.epoch.load_full().ok_or(IndexError::NotInitialized)
    }

    /// Compute and stage the event's vectors from its parents' vectors.
    ///
    /// Nothing is committed until [`flush`](Self::flush); a failed or
    /// rejected event is erased by [`drop_not_flushed`](Self::drop_not_flushed).
    pub fn add(&self, e: &Event) -> Result<(), IndexError> {
        let ep = self.load()?;
        if ep.contains(&e.id()) {
            return Err(IndexError::DuplicateEvent(e.id()));
        }
        let creator_idx = ep
            .validators
            .idx_of(e.creator())
            .ok_or(IndexError::UnknownCreator(e.creator()))?;
        let width = ep.validators.len();

        // merge parents' HighestBefore
        let mut highest_before = vec![HighestBeforeEntry::default(); width];
        for parent in e.parents() {
            let pv = ep
                .vectors(parent)
                .ok_or(IndexError::MissingParent(*parent))?;
            for (dst, src) in highest_before.iter_mut().zip(&pv.highest_before) {
                ep.merge_entry(dst, src)?;
            }
        }

        // extend with the creator's own entry
        let own = &mut highest_before[creator_idx];
        if own.seq >= e.seq() {
            // the causal past already contains an event of this creator at
            // this seq or later: a self-fork
            own.fork = true;
            if e.seq() == own.seq && e.id() < own.id {
                own.id = e.id();
            }
        } else {
            let fork = own.fork;
            *own = HighestBeforeEntry {
                seq: e.seq(),
                id: e.id(),
                fork,
            };
        }

        ep.staged.insert(
            e.id(),
            EventVectors {
                creator_idx,
                seq: e.seq(),
                highest_before,
                lowest_after: vec![0; width],
            },
        );

        // extend LowestAfter down the ancestry: every ancestor not yet
        // observed by this creator now is, at this event's seq
        let mut queue: Vec<EventHash> = vec![e.id()];
        while let Some(id) = queue.pop() {
            if !ep.observe(&id, creator_idx, e.seq())? {
                continue;
            }
            if id == e.id() {
                queue.extend_from_slice(e.parents());
            } else {
                let ancestor = ep
                    .source
                    .get_event(&id)
                    .ok_or(IndexError::MissingParent(id))?;
                queue.extend_from_slice(ancestor.parents());
            }
        }

        Ok(())
    }

    /// Commit all staged mutations.
    pub fn flush(&self) {
        if let Some(ep) = self.epoch.load_full() {
            let keys: Vec<EventHash> = ep.staged.iter().map(|r| *r.key()).collect();
            for key in keys {
                if let Some((id, vectors)) = ep.staged.remove(&key) {
                    ep.base.insert(id, vectors);
                }
            }
        }
    }

    /// Discard all staged mutations, as if the events were never added.
    pub fn drop_not_flushed(&self) {
        if let Some(ep) = self.epoch.load_full() {
            ep.staged.clear();
        }
    }

    /// True if `a` is "clearly" causally after `b`: a quorum-weight set of
    /// validators each have a fork-free event observing `b` that is itself
    /// visible to `a`.
    pub fn forkless_cause(&self, a: &EventHash, b: &EventHash) -> bool {
        let Some(ep) = self.epoch.load_full() else {
            return false;
        };
        let (Some(va), Some(vb)) = (ep.vectors(a), ep.vectors(b)) else {
            return false;
        };
        // a fork of b's creator visible to `a` voids the observation of b
        if va.highest_before[vb.creator_idx].is_fork_detected() {
            return false;
        }

        let mut counter = ep.validators.new_counter();
        for idx in 0..ep.validators.len() {
            let highest = &va.highest_before[idx];
            if highest.is_fork_detected() {
                continue;
            }
            let lowest = vb.lowest_after[idx];
            if lowest != 0 && lowest <= highest.seq {
                counter.count_idx(idx);
            }
            if counter.has_quorum() {
                return true;
            }
        }
        counter.has_quorum()
    }

    /// The event's full per-validator HighestBefore vector, in canonical
    /// validator order. Used to read off every validator's fork flag at once.
    pub fn merged_highest_before(&self, id: &EventHash) -> Option<Vec<HighestBeforeEntry>> {
        let ep = self.epoch.load_full()?;
        ep.vectors(id).map(|v| v.highest_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dashmap::DashMap;
    use moira_types::test_utils::{build_event, build_event_salted};
    use moira_types::Validators;

    #[derive(Default)]
    struct TestSource {
        events: DashMap<EventHash, Event>,
    }

    impl TestSource {
        fn insert(&self, e: &Event) {
            self.events.insert(e.id(), e.clone());
        }
    }

    impl EventSource for TestSource {
        fn has_event(&self, id: &EventHash) -> bool {
            self.events.contains_key(id)
        }
        fn get_event(&self, id: &EventHash) -> Option<Event> {
            self.events.get(id).map(|e| e.clone())
        }
    }

    fn setup(members: &[(u32, u64)]) -> (VectorIndex, Arc<TestSource>) {
        let validators = Arc::new(Validators::from_members(members.iter().copied()));
        let source = Arc::new(TestSource::default());
        let index = VectorIndex::new();
        index.reset(1, validators, source.clone());
        (index, source)
    }

    fn admit(index: &VectorIndex, source: &TestSource, e: &Event) {
        index.add(e).unwrap();
        index.flush();
        source.insert(e);
    }

    #[test]
    fn test_not_initialized() {
        let index = VectorIndex::new();
        let e = build_event(1, 1, 1, vec![]);
        assert!(matches!(index.add(&e), Err(IndexError::NotInitialized)));
    }

    #[test]
    fn test_duplicate_rejected() {
        let (index, source) = setup(&[(1, 1)]);
        let e = build_event(1, 1, 1, vec![]);
        admit(&index, &source, &e);
        assert!(matches!(
            index.add(&e),
            Err(IndexError::DuplicateEvent(_))
        ));
    }

    #[test]
    fn test_unknown_creator_rejected() {
        let (index, _) = setup(&[(1, 1)]);
        let e = build_event(9, 1, 1, vec![]);
        assert!(matches!(
            index.add(&e),
            Err(IndexError::UnknownCreator(9))
        ));
    }

    #[test]
    fn test_forkless_cause_single_validator() {
        let (index, source) = setup(&[(1, 1)]);
        let e1 = build_event(1, 1, 1, vec![]);
        admit(&index, &source, &e1);
        let e2 = build_event(1, 1, 2, vec![e1.id()]);
        admit(&index, &source, &e2);

        assert!(index.forkless_cause(&e2.id(), &e1.id()));
        // not in the other direction
        assert!(!index.forkless_cause(&e1.id(), &e2.id()));
    }

    #[test]
    fn test_forkless_cause_needs_quorum() {
        // 3 validators, quorum = 3: seeing one other validator isn't enough
        let (index, source) = setup(&[(1, 1), (2, 1), (3, 1)]);
        let a1 = build_event(1, 1, 1, vec![]);
        admit(&index, &source, &a1);
        let b1 = build_event(2, 1, 1, vec![a1.id()]);
        admit(&index, &source, &b1);
        assert!(!index.forkless_cause(&b1.id(), &a1.id()));

        let c1 = build_event(3, 1, 1, vec![a1.id(), b1.id()]);
        admit(&index, &source, &c1);
        // a1 is now observed by all three validators, and c1 sees them all
        assert!(index.forkless_cause(&c1.id(), &a1.id()));
    }

    #[test]
    fn test_fork_detection_on_merge() {
        let (index, source) = setup(&[(1, 1), (2, 1)]);
        // validator 2 equivocates: two seq-1 events
        let fork_a = build_event_salted(2, 1, 1, vec![], 0);
        let fork_b = build_event_salted(2, 1, 1, vec![], 1);
        assert_ne!(fork_a.id(), fork_b.id());
        admit(&index, &source, &fork_a);
        admit(&index, &source, &fork_b);

        let merger = build_event(1, 1, 1, vec![fork_a.id(), fork_b.id()]);
        admit(&index, &source, &merger);

        let hb = index.merged_highest_before(&merger.id()).unwrap();
        // validator 2 sits at canonical index 1
        assert!(hb[1].is_fork_detected());
        assert!(!hb[0].is_fork_detected());

        // a forked creator cannot be forkless-caused through the merger
        assert!(!index.forkless_cause(&merger.id(), &fork_a.id()));
    }

    #[test]
    fn test_fork_flag_propagates_to_descendants() {
        let (index, source) = setup(&[(1, 1), (2, 1)]);
        let fork_a = build_event_salted(2, 1, 1, vec![], 0);
        let fork_b = build_event_salted(2, 1, 1, vec![], 1);
        admit(&index, &source, &fork_a);
        admit(&index, &source, &fork_b);
        let merger = build_event(1, 1, 1, vec![fork_a.id(), fork_b.id()]);
        admit(&index, &source, &merger);
        let child = build_event(1, 1, 2, vec![merger.id()]);
        admit(&index, &source, &child);

        let hb = index.merged_highest_before(&child.id()).unwrap();
        assert!(hb[1].is_fork_detected());
    }

    #[test]
    fn test_fork_detected_across_extended_branch() {
        let (index, source) = setup(&[(1, 1), (2, 1)]);
        // validator 2 equivocates at seq 1 and keeps building on one branch
        let x1 = build_event_salted(2, 1, 1, vec![], 0);
        let y1 = build_event_salted(2, 1, 1, vec![], 1);
        admit(&index, &source, &x1);
        admit(&index, &source, &y1);
        let y2 = build_event(2, 1, 2, vec![y1.id()]);
        admit(&index, &source, &y2);

        // the merge sees x@1 against y@2; x1 is not on y2's self-parent
        // chain, so both conflicting seq-1 events are reachable
        let merger = build_event(1, 1, 1, vec![x1.id(), y2.id()]);
        admit(&index, &source, &merger);

        let hb = index.merged_highest_before(&merger.id()).unwrap();
        assert!(hb[1].is_fork_detected());
        assert!(!index.forkless_cause(&merger.id(), &y2.id()));
    }

    #[test]
    fn test_same_branch_entries_at_different_seqs_are_no_fork() {
        let (index, source) = setup(&[(1, 1), (2, 1)]);
        let b1 = build_event(2, 1, 1, vec![]);
        admit(&index, &source, &b1);
        let b2 = build_event(2, 1, 2, vec![b1.id()]);
        admit(&index, &source, &b2);
        let a1 = build_event(1, 1, 1, vec![b1.id()]);
        admit(&index, &source, &a1);

        // a2 merges b@1 (through a1) with b@2 (direct parent): one branch
        let a2 = build_event(1, 1, 2, vec![a1.id(), b2.id()]);
        admit(&index, &source, &a2);

        let hb = index.merged_highest_before(&a2.id()).unwrap();
        assert!(!hb[1].is_fork_detected());
        assert_eq!(hb[1].seq, 2);
    }

    #[test]
    fn test_drop_not_flushed_leaves_no_residue() {
        let (index, source) = setup(&[(1, 1)]);
        let e1 = build_event(1, 1, 1, vec![]);
        admit(&index, &source, &e1);

        let before = index.merged_highest_before(&e1.id()).unwrap();

        let e2 = build_event(1, 1, 2, vec![e1.id()]);
        index.add(&e2).unwrap();
        index.drop_not_flushed();

        assert!(index.merged_highest_before(&e2.id()).is_none());
        assert!(!index.forkless_cause(&e2.id(), &e1.id()));
        // e1's committed state is untouched
        assert_eq!(index.merged_highest_before(&e1.id()).unwrap(), before);

        // the same event is addable again afterwards
        index.add(&e2).unwrap();
        index.flush();
        source.insert(&e2);
        assert!(index.forkless_cause(&e2.id(), &e1.id()));
    }

    #[test]
    fn test_reset_discards_prior_epoch() {
        let (index, source) = setup(&[(1, 1)]);
        let e1 = build_event(1, 1, 1, vec![]);
        admit(&index, &source, &e1);
        assert!(index.merged_highest_before(&e1.id()).is_some());

        let validators = Arc::new(Validators::from_members([(1, 1)]));
        index.reset(2, validators, Arc::new(TestSource::default()));
        assert_eq!(index.current_epoch(), Some(2));
        assert!(index.merged_highest_before(&e1.id()).is_none());
    }

    #[test]
    fn test_missing_parent_rejected() {
        let (index, _) = setup(&[(1, 1)]);
        let ghost = build_event(1, 1, 1, vec![]);
        let e = build_event(1, 1, 2, vec![ghost.id()]);
        assert!(matches!(
            index.add(&e),
            Err(IndexError::MissingParent(_))
        ));
    }
}
