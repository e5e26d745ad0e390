// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! Blocks produced by the ordering pipeline.

use serde::{Deserialize, Serialize};

use crate::event::EventHash;
use crate::validator::ValidatorId;

/// Validators caught equivocating, in canonical (ascending id) order.
pub type Cheaters = Vec<ValidatorId>;

/// A part of the ordered chain of batches of events.
///
/// One block is produced per decided frame; `atropos` is the frame's elected
/// canonical event and seeds the block's confirmed subgraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub atropos: EventHash,
    pub cheaters: Cheaters,
}
