// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! Test helpers for building DAG events with content-derived hashes.

use sha2::{Digest, Sha256};

use crate::event::{Epoch, Event, EventHash, Seq};
use crate::validator::ValidatorId;

/// Hash an event's identity fields. The `salt` distinguishes deliberate
/// forks: two events with identical creator/seq/parents but different salts
/// get different hashes.
pub fn hash_event(
    creator: ValidatorId,
    epoch: Epoch,
    seq: Seq,
    parents: &[EventHash],
    salt: u64,
) -> EventHash {
    let mut hasher = Sha256::new();
    hasher.update(creator.to_le_bytes());
    hasher.update(epoch.to_le_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(salt.to_le_bytes());
    for p in parents {
        hasher.update(p.as_bytes());
    }
    let digest: [u8; 32] = hasher.finalize().into();
    EventHash::new(digest)
}

/// Build an event whose id is derived from its contents.
pub fn build_event(
    creator: ValidatorId,
    epoch: Epoch,
    seq: Seq,
    parents: Vec<EventHash>,
) -> Event {
    build_event_salted(creator, epoch, seq, parents, 0)
}

/// Same as [`build_event`], with an explicit salt for fork construction.
pub fn build_event_salted(
    creator: ValidatorId,
    epoch: Epoch,
    seq: Seq,
    parents: Vec<EventHash>,
    salt: u64,
) -> Event {
    let id = hash_event(creator, epoch, seq, &parents, salt);
    Event::new(id, creator, epoch, seq, parents)
}
