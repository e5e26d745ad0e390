// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

use moira_types::{EventHash, ValidatorId};

/// Rejectable index-admission errors. An event failing `add` must be
/// dropped by the caller; the index itself rolls back via
/// `drop_not_flushed`.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector index is not initialized for the epoch")]
    NotInitialized,

    #[error("event {0} is already indexed")]
    DuplicateEvent(EventHash),

    #[error("event references unindexed parent {0}")]
    MissingParent(EventHash),

    #[error("event creator {0} is not a member of the epoch validator set")]
    UnknownCreator(ValidatorId),
}
