// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! The Orderer: frame/root assignment and election driving.
//!
//! This is the raw ordering level: it reaches finality on the events' order
//! but does not track cheaters or walk confirmed subgraphs — that belongs
//! to the [`Push`](crate::push::Push) wrapper.
//!
//! A frame passes through open → quorum-reached → decided → sealed: roots
//! are admitted while open, each new root is folded into the election, a
//! decision fires `apply_atropos`, and a non-nil return from the callback
//! seals the whole epoch.

use std::sync::Arc;

use tracing::{debug, error, info};

use moira_types::{Event, EventHash, EventSource, Frame, RootRef, Validators};
use moira_storage::Store;
use moira_vecclock::VectorIndex;

use crate::election::{Decision, Election, ElectionContext};
use crate::error::{BootstrapError, Crit, FatalError, ProcessError};

/// Callbacks the Orderer drives. `apply_atropos` may return a new validator
/// set, which seals the epoch; `epoch_db_loaded` fires once per epoch,
/// before any event of that epoch is processed.
pub trait OrdererCallbacks {
    fn apply_atropos(
        &mut self,
        decided_frame: Frame,
        atropos: &EventHash,
    ) -> Result<Option<Validators>, FatalError>;

    fn epoch_db_loaded(&mut self, epoch: moira_types::Epoch);
}

struct OrdererDag<'a> {
    index: &'a VectorIndex,
    store: &'a Store,
}

impl ElectionContext for OrdererDag<'_> {
    fn forkless_cause(&self, a: &EventHash, b: &EventHash) -> bool {
        self.index.forkless_cause(a, b)
    }
    fn frame_roots(&self, frame: Frame) -> Vec<RootRef> {
        self.store.frame_roots(frame)
    }
}

/// Processes events to reach finality on their order.
pub struct Orderer {
    store: Arc<Store>,
    input: Arc<dyn EventSource>,
    index: Arc<VectorIndex>,
    election: Election,
    crit: Crit,
    callback: Option<Box<dyn OrdererCallbacks>>,
}

impl Orderer {
    pub fn new(
        store: Arc<Store>,
        input: Arc<dyn EventSource>,
        index: Arc<VectorIndex>,
        crit: Crit,
    ) -> Self {
        let election = Election::new(store.get_validators(), store.last_decided_frame() + 1);
        Self {
            store,
            input,
            index,
            election,
            crit,
            callback: None,
        }
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn input(&self) -> Arc<dyn EventSource> {
        self.input.clone()
    }

    pub fn index(&self) -> Arc<VectorIndex> {
        self.index.clone()
    }

    /// Install the callbacks and announce the current epoch. Must be called
    /// exactly once, before any event is built or processed.
    pub fn bootstrap(&mut self, callback: Box<dyn OrdererCallbacks>) -> Result<(), BootstrapError> {
        if self.callback.is_some() {
            return Err(BootstrapError::AlreadyBootstrapped);
        }
        self.callback = Some(callback);
        self.election
            .reset(self.store.get_validators(), self.store.last_decided_frame() + 1);
        let epoch = self.store.get_epoch();
        if let Some(cb) = self.callback.as_mut() {
            cb.epoch_db_loaded(epoch);
        }
        info!(epoch, "orderer bootstrapped");
        Ok(())
    }

    /// Fill the consensus annotations (frame, root flag) of a locally built
    /// event. The event must already be staged in the vector index.
    pub fn build(&mut self, e: &mut Event) -> Result<(), ProcessError> {
        if self.callback.is_none() {
            return Err(ProcessError::NotBootstrapped);
        }
        self.check_epoch(e)?;
        let (frame, is_root) = self.calc_frame_idx(e)?;
        e.set_frame(frame);
        e.set_root(is_root);
        Ok(())
    }

    /// Take an event into processing: verify its claimed annotations, admit
    /// it as a root if it is one, and drive the election. Parents first;
    /// not safe for concurrent use.
    pub fn process(&mut self, e: &Event) -> Result<(), ProcessError> {
        if self.callback.is_none() {
            return Err(ProcessError::NotBootstrapped);
        }
        self.check_epoch(e)?;
        let (frame, is_root) = self.calc_frame_idx(e)?;
        if e.frame() != frame {
            return Err(ProcessError::FrameMismatch {
                claimed: e.frame(),
                calculated: frame,
            });
        }
        if e.is_root() != is_root {
            return Err(ProcessError::RootMismatch {
                claimed: e.is_root(),
                calculated: is_root,
            });
        }
        if !is_root {
            return Ok(());
        }

        let root = RootRef {
            frame,
            validator: e.creator(),
            id: e.id(),
        };
        debug!(frame, validator = root.validator, id = %root.id, "root admitted");
        self.store.add_root(root);

        if let Err(fault) = self.handle_election(root) {
            // an ordering-layer inconsistency cannot be repaired locally;
            // hand it to the sink, which is expected to abort the node
            error!(error = %fault, "fatal consensus fault");
            (self.crit)(fault);
        }
        Ok(())
    }

    fn check_epoch(&self, e: &Event) -> Result<(), ProcessError> {
        let current = self.store.get_epoch();
        if e.epoch() != current {
            return Err(ProcessError::EpochMismatch {
                claimed: e.epoch(),
                current,
            });
        }
        Ok(())
    }

    /// Frame of an event: parents' max frame, advanced by one when the
    /// event forkless-causes a quorum-weight set of that frame's roots.
    /// Root iff the frame exceeds the self-parent's.
    fn calc_frame_idx(&self, e: &Event) -> Result<(Frame, bool), ProcessError> {
        if e.parents().is_empty() {
            // very first events in an epoch
            return Ok((1, true));
        }

        let self_parent = e.self_parent();
        let mut max_parents_frame: Frame = 0;
        let mut self_parent_frame: Frame = 0;
        for parent in e.parents() {
            let p = self
                .input
                .get_event(parent)
                .ok_or(ProcessError::MissingParent(*parent))?;
            max_parents_frame = max_parents_frame.max(p.frame());
            if Some(*parent) == self_parent {
                self_parent_frame = p.frame();
            }
        }

        let frame = if self.forkless_caused_by_quorum_on(&e.id(), max_parents_frame) {
            max_parents_frame + 1
        } else {
            max_parents_frame
        };
        Ok((frame, frame > self_parent_frame))
    }

    fn forkless_caused_by_quorum_on(&self, id: &EventHash, frame: Frame) -> bool {
        let validators = self.store.get_validators();
        let mut observed = validators.new_counter();
        for root in self.store.frame_roots(frame) {
            if self.index.forkless_cause(id, &root.id) {
                observed.count(root.validator);
            }
            if observed.has_quorum() {
                break;
            }
        }
        observed.has_quorum()
    }

    /// Fold the new root into the election; apply every decision it
    /// unlocks, in increasing frame order, until the election stalls or
    /// the epoch seals.
    fn handle_election(&mut self, root: RootRef) -> Result<(), FatalError> {
        let mut decided = self.election.process_root(
            root,
            &OrdererDag {
                index: &self.index,
                store: &self.store,
            },
        )?;
        while let Some(decision) = decided {
            let sealed = self.on_frame_decided(decision)?;
            if sealed {
                return Ok(());
            }
            decided = self.process_known_roots()?;
        }
        Ok(())
    }

    fn on_frame_decided(&mut self, decision: Decision) -> Result<bool, FatalError> {
        info!(frame = decision.frame, atropos = %decision.atropos, "frame decided");
        self.election
            .reset(self.store.get_validators(), decision.frame + 1);
        self.store.set_last_decided_frame(decision.frame);

        let Some(callback) = self.callback.as_mut() else {
            return Err(FatalError::NotBootstrapped);
        };
        let seal = callback.apply_atropos(decision.frame, &decision.atropos)?;
        if let Some(new_validators) = seal {
            self.seal_epoch(new_validators)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Atomic epoch transition: new validator set and fresh frame, root,
    /// election and index state. No event of the prior epoch may be
    /// processed afterwards.
    fn seal_epoch(&mut self, new_validators: Validators) -> Result<(), FatalError> {
        let new_epoch = self.store.advance_epoch(new_validators);
        self.election.reset(self.store.get_validators(), 1);
        let Some(callback) = self.callback.as_mut() else {
            return Err(FatalError::NotBootstrapped);
        };
        callback.epoch_db_loaded(new_epoch);
        Ok(())
    }

    /// After a decided frame the election restarts one frame later; replay
    /// the already-known roots of later frames into it.
    fn process_known_roots(&mut self) -> Result<Option<Decision>, FatalError> {
        let mut frame = self.store.last_decided_frame() + 1;
        loop {
            let roots = self.store.frame_roots(frame);
            if roots.is_empty() {
                return Ok(None);
            }
            for root in roots {
                let decided = self.election.process_root(
                    root,
                    &OrdererDag {
                        index: &self.index,
                        store: &self.store,
                    },
                )?;
                if decided.is_some() {
                    return Ok(decided);
                }
            }
            frame += 1;
        }
    }
}
