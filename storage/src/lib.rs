// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! In-memory storage for the Moira ordering engine.
//!
//! Two stores live here:
//!
//! - [`Store`]: the consensus store — epoch counter, validator set, per-frame
//!   roots, last-decided frame and per-event confirmation marks. The epoch
//!   state is replaced atomically as a whole at epoch seal, never mutated
//!   in place.
//! - [`EventStore`]: a dashmap-backed event keeper implementing the
//!   [`moira_types::EventSource`] contract.
//!
//! Durable persistence is deliberately out of scope; these stores are the
//! in-memory reference implementations of the contracts the core consumes.

pub mod event_store;
pub mod store;

pub use event_store::EventStore;
pub use store::{Genesis, Store, StoreError};
