// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! DAG events and related identifiers.
//!
//! An event is created by exactly one validator and references its causal
//! predecessors by hash. The consensus core does not own events; it reads
//! them through [`EventSource`] and annotates locally built ones with the
//! frame number and root flag via [`Event::set_frame`] / [`Event::set_root`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validator::ValidatorId;

/// Validator-set era counter.
pub type Epoch = u32;

/// Causal partition index assigned to events.
pub type Frame = u32;

/// Per-creator monotonic sequence number.
pub type Seq = u32;

/// 256-bit event hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct EventHash(pub [u8; 32]);

impl EventHash {
    /// The zero hash (all zeros).
    pub const ZERO: EventHash = EventHash([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form, enough to tell events apart in logs
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}

/// A validator's atomic contribution to the DAG.
///
/// `frame`, `is_root` and `build_id` are consensus annotations: zeroed on a
/// freshly built event and filled in by the ordering pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    id: EventHash,
    creator: ValidatorId,
    epoch: Epoch,
    seq: Seq,
    /// Causal predecessors; `parents[0]` is the self-parent when `seq > 1`.
    parents: Vec<EventHash>,

    frame: Frame,
    is_root: bool,
    /// Globally unique dirty-build token. A distinctness marker only,
    /// never consulted for ordering.
    build_id: u128,
}

impl Event {
    pub fn new(
        id: EventHash,
        creator: ValidatorId,
        epoch: Epoch,
        seq: Seq,
        parents: Vec<EventHash>,
    ) -> Self {
        Self {
            id,
            creator,
            epoch,
            seq,
            parents,
            frame: 0,
            is_root: false,
            build_id: 0,
        }
    }

    pub fn id(&self) -> EventHash {
        self.id
    }

    pub fn creator(&self) -> ValidatorId {
        self.creator
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn seq(&self) -> Seq {
        self.seq
    }

    pub fn parents(&self) -> &[EventHash] {
        &self.parents
    }

    /// The event's self-parent, present for every non-first event.
    pub fn self_parent(&self) -> Option<EventHash> {
        if self.seq > 1 {
            self.parents.first().copied()
        } else {
            None
        }
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn build_id(&self) -> u128 {
        self.build_id
    }

    pub fn set_frame(&mut self, frame: Frame) {
        self.frame = frame;
    }

    pub fn set_root(&mut self, is_root: bool) {
        self.is_root = is_root;
    }

    pub fn set_build_id(&mut self, id: u128) {
        self.build_id = id;
    }
}

/// A root event reference within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRef {
    pub frame: Frame,
    pub validator: ValidatorId,
    pub id: EventHash,
}

/// Read access to previously accepted events, supplied by the external
/// event storage. Absence of an event is a normal outcome, not an error.
pub trait EventSource: Send + Sync {
    fn has_event(&self, id: &EventHash) -> bool;
    fn get_event(&self, id: &EventHash) -> Option<Event>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_parent() {
        let first = Event::new(EventHash::new([1; 32]), 5, 1, 1, vec![]);
        assert_eq!(first.self_parent(), None);

        let second = Event::new(
            EventHash::new([2; 32]),
            5,
            1,
            2,
            vec![EventHash::new([1; 32]), EventHash::new([9; 32])],
        );
        assert_eq!(second.self_parent(), Some(EventHash::new([1; 32])));
    }

    #[test]
    fn test_annotations_start_zeroed() {
        let e = Event::new(EventHash::new([1; 32]), 1, 1, 1, vec![]);
        assert_eq!(e.frame(), 0);
        assert!(!e.is_root());
        assert_eq!(e.build_id(), 0);
    }

    #[test]
    fn test_hash_display_roundtrip() {
        let h = EventHash::new([0xab; 32]);
        let s = h.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("abab"));
    }
}
