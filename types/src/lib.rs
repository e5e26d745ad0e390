// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! Core data model for the Moira ordering engine.
//!
//! This crate defines the types shared by every layer of the pipeline:
//! validator sets with stake weights, DAG events, frame/epoch counters,
//! blocks, and the `EventSource` contract through which the consensus core
//! reads previously accepted events.

pub mod block;
pub mod event;
pub mod validator;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use block::{Block, Cheaters};
pub use event::{Epoch, Event, EventHash, EventSource, Frame, RootRef, Seq};
pub use validator::{
    ValidatorId, Validators, ValidatorsBuilder, Weight, WeightCounter,
};
