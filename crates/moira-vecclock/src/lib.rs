// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! # moira-vecclock
//!
//! Per-event vector-clock index for the Moira DAG.
//!
//! For every indexed event the crate maintains two per-validator vectors:
//!
//! - **HighestBefore**: the highest `(seq, hash)` of each validator's events
//!   visible in the event's causal past, with a fork flag that is set once
//!   two conflicting events of that validator (same seq, different hash —
//!   or two self-parent branches merged at different seqs) are both
//!   reachable.
//! - **LowestAfter**: for each validator, the lowest seq of that validator's
//!   events which causally observe the indexed event.
//!
//! Together they answer the two queries the ordering layers need:
//! [`VectorIndex::forkless_cause`] (the quorum-weighted causal-visibility
//! predicate) and [`VectorIndex::merged_highest_before`] (fork flags for
//! cheater extraction).
//!
//! ## Two-phase mutation
//!
//! [`VectorIndex::add`] stages its mutations in an overlay;
//! [`VectorIndex::flush`] commits them and [`VectorIndex::drop_not_flushed`]
//! discards them. Event admission is only final once the whole pipeline has
//! accepted the event, so a rejected event must leave zero residue here —
//! otherwise later fork detection and causal queries would be corrupted.

pub mod error;
pub mod index;

pub use error::IndexError;
pub use index::{HighestBeforeEntry, VectorIndex};
