// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! Moira Consensus Module
//!
//! Asynchronous BFT ordering for a DAG of events: assigns causal frames,
//! elects one canonical event (Atropos) per frame by leaderless virtual
//! voting, confirms the Atropos's causal subgraph into a block and reports
//! validators caught equivocating.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       IndexedPush                          │
//! │  - unique build ids for locally built events               │
//! │  - vector-index add/flush/rollback around admission        │
//! │  - index reset on epoch change                             │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                        Push                          │  │
//! │  │  - cheater extraction from the Atropos vector clock  │  │
//! │  │  - confirmed-subgraph traversal, block callbacks     │  │
//! │  │  ┌────────────────────────────────────────────────┐  │  │
//! │  │  │                    Orderer                     │  │  │
//! │  │  │  - frame / root assignment                     │  │  │
//! │  │  │  - virtual-voting election  ──► Atropos        │  │  │
//! │  │  │  - epoch sealing                               │  │  │
//! │  │  └────────────────────────────────────────────────┘  │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each layer owns the one below it and augments its callback set; use
//! [`IndexedPush`] for a general-purpose engine, or the lower layers when
//! the surrounding system maintains the DAG index itself.
//!
//! Event admission (`build`/`process`) is single-writer: parents first,
//! never concurrently. Rejectable admission errors come back as
//! [`ProcessError`]; ordering-layer invariant violations go to the
//! caller-supplied fatal sink ([`Crit`]) and abort the node.

pub mod election;
pub mod error;
pub mod indexed;
pub mod orderer;
pub mod push;

pub use election::{Decision, Election, ElectionContext};
pub use error::{BootstrapError, Crit, FatalError, ProcessError};
pub use indexed::IndexedPush;
pub use orderer::{Orderer, OrdererCallbacks};
pub use push::{Application, BlockHandler, Push};
