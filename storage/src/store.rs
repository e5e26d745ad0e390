// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! The consensus store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tracing::info;

use moira_types::{Epoch, EventHash, Frame, RootRef, Validators};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("genesis validator set is empty")]
    EmptyValidators,
}

/// Genesis state applied to a fresh store.
#[derive(Debug, Clone)]
pub struct Genesis {
    pub validators: Validators,
    pub epoch: Epoch,
}

/// Epoch-scoped state: the counter and its validator set are replaced
/// together, never independently.
struct EpochState {
    epoch: Epoch,
    validators: Arc<Validators>,
}

/// Per-epoch consensus bookkeeping, discarded wholesale at epoch seal.
struct EpochTable {
    /// Roots per frame, possibly several per validator when it forks.
    roots: DashMap<Frame, Vec<RootRef>>,
    last_decided_frame: AtomicU32,
}

impl EpochTable {
    fn new() -> Self {
        Self {
            roots: DashMap::new(),
            last_decided_frame: AtomicU32::new(0),
        }
    }
}

/// Keeper of validator sets, the epoch counter, frame roots and per-event
/// confirmation marks.
///
/// Confirmation marks survive epoch transitions; everything frame-scoped
/// does not.
pub struct Store {
    epoch_state: ArcSwap<EpochState>,
    epoch_table: ArcSwap<EpochTable>,
    /// Frame at which each event was confirmed; absent = unconfirmed (0).
    confirmed_on: DashMap<EventHash, Frame>,
}

impl Store {
    /// Apply genesis: the only way to construct a store.
    pub fn from_genesis(genesis: Genesis) -> Result<Self, StoreError> {
        if genesis.validators.is_empty() {
            return Err(StoreError::EmptyValidators);
        }
        info!(
            epoch = genesis.epoch,
            validators = genesis.validators.len(),
            "genesis applied"
        );
        Ok(Self {
            epoch_state: ArcSwap::from_pointee(EpochState {
                epoch: genesis.epoch,
                validators: Arc::new(genesis.validators),
            }),
            epoch_table: ArcSwap::from_pointee(EpochTable::new()),
            confirmed_on: DashMap::new(),
        })
    }

    pub fn get_epoch(&self) -> Epoch {
        self.epoch_state.load().epoch
    }

    pub fn get_validators(&self) -> Arc<Validators> {
        self.epoch_state.load().validators.clone()
    }

    /// Seal the running epoch: bump the counter, install the new validator
    /// set and start a fresh frame/root table. Single atomic replacement.
    pub fn advance_epoch(&self, new_validators: Validators) -> Epoch {
        let new_epoch = self.get_epoch() + 1;
        info!(
            epoch = new_epoch,
            validators = new_validators.len(),
            "epoch sealed"
        );
        self.epoch_state.store(Arc::new(EpochState {
            epoch: new_epoch,
            validators: Arc::new(new_validators),
        }));
        self.epoch_table.store(Arc::new(EpochTable::new()));
        new_epoch
    }

    /// The frame an event was confirmed on; 0 = unconfirmed.
    pub fn get_event_confirmed_on(&self, id: &EventHash) -> Frame {
        self.confirmed_on.get(id).map(|f| *f).unwrap_or(0)
    }

    /// Record an event's confirmation frame. A mark is write-once: repeat
    /// calls keep the first frame, so a mark is never cleared or reassigned.
    pub fn set_event_confirmed_on(&self, id: &EventHash, frame: Frame) {
        self.confirmed_on.entry(*id).or_insert(frame);
    }

    pub fn add_root(&self, root: RootRef) {
        let table = self.epoch_table.load();
        table.roots.entry(root.frame).or_default().push(root);
    }

    /// All roots admitted for a frame, in admission order.
    pub fn frame_roots(&self, frame: Frame) -> Vec<RootRef> {
        let table = self.epoch_table.load();
        table
            .roots
            .get(&frame)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn last_decided_frame(&self) -> Frame {
        self.epoch_table.load().last_decided_frame.load(Ordering::Acquire)
    }

    pub fn set_last_decided_frame(&self, frame: Frame) {
        self.epoch_table
            .load()
            .last_decided_frame
            .store(frame, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::from_genesis(Genesis {
            validators: Validators::from_members([(1, 1), (2, 1)]),
            epoch: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_empty_genesis_rejected() {
        let result = Store::from_genesis(Genesis {
            validators: Validators::from_members([]),
            epoch: 1,
        });
        assert!(matches!(result, Err(StoreError::EmptyValidators)));
    }

    #[test]
    fn test_confirmed_on_defaults_zero() {
        let s = store();
        let id = EventHash::new([1; 32]);
        assert_eq!(s.get_event_confirmed_on(&id), 0);
        s.set_event_confirmed_on(&id, 3);
        assert_eq!(s.get_event_confirmed_on(&id), 3);
    }

    #[test]
    fn test_confirmation_mark_is_write_once() {
        let s = store();
        let id = EventHash::new([4; 32]);
        s.set_event_confirmed_on(&id, 2);
        s.set_event_confirmed_on(&id, 5);
        assert_eq!(s.get_event_confirmed_on(&id), 2);
    }

    #[test]
    fn test_roots_per_frame() {
        let s = store();
        let root = RootRef {
            frame: 1,
            validator: 2,
            id: EventHash::new([2; 32]),
        };
        s.add_root(root);
        assert_eq!(s.frame_roots(1), vec![root]);
        assert!(s.frame_roots(2).is_empty());
    }

    #[test]
    fn test_advance_epoch_replaces_frame_state() {
        let s = store();
        s.add_root(RootRef {
            frame: 1,
            validator: 1,
            id: EventHash::new([3; 32]),
        });
        s.set_last_decided_frame(1);
        let id = EventHash::new([3; 32]);
        s.set_event_confirmed_on(&id, 1);

        let new_epoch = s.advance_epoch(Validators::from_members([(7, 5)]));
        assert_eq!(new_epoch, 2);
        assert_eq!(s.get_epoch(), 2);
        assert_eq!(s.get_validators().sorted_ids(), &[7]);

        // frame-scoped state is fresh
        assert!(s.frame_roots(1).is_empty());
        assert_eq!(s.last_decided_frame(), 0);
        // confirmation marks survive
        assert_eq!(s.get_event_confirmed_on(&id), 1);
    }
}
