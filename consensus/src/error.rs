// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! Two-tier error model.
//!
//! [`ProcessError`] is the rejectable tier: the event is dropped, the index
//! rolls back, the caller decides what to do with the peer. [`FatalError`]
//! is the consensus-internal tier: the local ordering state cannot be
//! repaired, so the error is routed to the fatal sink and never returned
//! from an admission call. The two tiers are intentionally separate types.

use std::sync::Arc;

use moira_types::{Epoch, EventHash, Frame, ValidatorId};
use moira_vecclock::IndexError;

/// Rejectable event-admission errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("consensus is not bootstrapped")]
    NotBootstrapped,

    #[error("event epoch {claimed} does not match current epoch {current}")]
    EpochMismatch { claimed: Epoch, current: Epoch },

    #[error("event parent {0} is not processed")]
    MissingParent(EventHash),

    #[error("claimed frame {claimed} mismatches calculated frame {calculated}")]
    FrameMismatch { claimed: Frame, calculated: Frame },

    #[error("claimed root flag {claimed} mismatches calculated {calculated}")]
    RootMismatch { claimed: bool, calculated: bool },

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Unrecoverable ordering-layer faults. Routed to [`Crit`], which is
/// expected to halt the process; there is no retry.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("atropos applied before bootstrap")]
    NotBootstrapped,

    #[error("root {voter} has no vote for validator {subject}")]
    MissingVote {
        voter: EventHash,
        subject: ValidatorId,
    },

    #[error("conflicting observed roots for validator {subject} in frame {frame}")]
    ConflictingVotes { frame: Frame, subject: ValidatorId },

    #[error("frame {0} fully decided with no elected candidate")]
    NoAtropos(Frame),

    #[error("event {0} is missing during confirmation traversal")]
    MissingEvent(EventHash),

    #[error("no vector clock indexed for atropos {0}")]
    MissingAtroposVectors(EventHash),
}

/// Bootstrap misuse.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("consensus is already bootstrapped")]
    AlreadyBootstrapped,
}

/// Caller-supplied fatal-error sink. Expected to abort the process (e.g.
/// panic); consensus does not continue meaningfully after invoking it.
pub type Crit = Arc<dyn Fn(FatalError) + Send + Sync>;
