// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! Finality delivery on top of the [`Orderer`]: each decided frame becomes
//! a block headed by its Atropos, cheaters are read off the Atropos' view,
//! and the newly confirmed subgraph is walked in deterministic order.

use std::sync::Arc;

use tracing::{debug, info, warn};

use moira_types::{Block, Cheaters, Event, EventHash, EventSource, Frame, Validators};
use moira_storage::Store;
use moira_vecclock::VectorIndex;

use crate::error::{BootstrapError, Crit, FatalError, ProcessError};
use crate::orderer::{Orderer, OrdererCallbacks};

/// Receiver of a confirmed event. Returned by [`Application::begin_block`],
/// valid until the matching `end_block`.
pub trait BlockHandler {
    fn on_event_confirmed(&mut self, e: &Event);
}

/// The application layer a node plugs into the consensus stack. A block
/// opens, receives every newly confirmed event of its subgraph, and closes;
/// a non-nil validator set from `end_block` seals the epoch.
pub trait Application: Send {
    fn begin_block(&mut self, block: &Block) -> &mut dyn BlockHandler;

    fn end_block(&mut self, decided_frame: Frame) -> Option<Validators>;
}

struct AtroposApplier {
    store: Arc<Store>,
    input: Arc<dyn EventSource>,
    index: Arc<VectorIndex>,
    app: Box<dyn Application>,
    reset_index: bool,
}

impl AtroposApplier {
    /// Validators the Atropos has detected a fork from, in canonical
    /// (ascending id) order.
    fn cheaters(&self, atropos: &EventHash) -> Result<Cheaters, FatalError> {
        let validators = self.store.get_validators();
        let highest_before = self
            .index
            .merged_highest_before(atropos)
            .ok_or(FatalError::MissingAtroposVectors(*atropos))?;
        let mut cheaters = Cheaters::new();
        for (idx, entry) in highest_before.iter().enumerate() {
            if entry.is_fork_detected() {
                cheaters.push(validators.id_at(idx));
            }
        }
        Ok(cheaters)
    }
}

/// Walk the Atropos' unconfirmed past depth-first, marking and delivering
/// each event. The walk order depends only on the subgraph shape, never on
/// arrival order.
fn confirm_events(
    store: &Store,
    input: &dyn EventSource,
    handler: &mut dyn BlockHandler,
    decided_frame: Frame,
    atropos: &EventHash,
) -> Result<(), FatalError> {
    let mut stack: Vec<EventHash> = vec![*atropos];
    while let Some(id) = stack.pop() {
        if store.get_event_confirmed_on(&id) != 0 {
            continue;
        }
        let e = input.get_event(&id).ok_or(FatalError::MissingEvent(id))?;
        store.set_event_confirmed_on(&id, decided_frame);
        handler.on_event_confirmed(&e);
        debug!(id = %id, frame = decided_frame, "event confirmed");
        stack.extend(e.parents().iter().copied());
    }
    Ok(())
}

impl OrdererCallbacks for AtroposApplier {
    fn apply_atropos(
        &mut self,
        decided_frame: Frame,
        atropos: &EventHash,
    ) -> Result<Option<Validators>, FatalError> {
        let cheaters = self.cheaters(atropos)?;
        if !cheaters.is_empty() {
            warn!(frame = decided_frame, ?cheaters, "forks observed by atropos");
        }
        let block = Block {
            atropos: *atropos,
            cheaters,
        };

        let handler = self.app.begin_block(&block);
        confirm_events(&self.store, self.input.as_ref(), handler, decided_frame, atropos)?;
        Ok(self.app.end_block(decided_frame))
    }

    fn epoch_db_loaded(&mut self, epoch: moira_types::Epoch) {
        if self.reset_index {
            self.index
                .reset(epoch, self.store.get_validators(), self.input.clone());
        }
        info!(epoch, "epoch state loaded");
    }
}

/// Orderer plus block delivery. Does not manage the vector index's
/// transactional lifecycle; see [`IndexedPush`](crate::indexed::IndexedPush)
/// for the full stack.
pub struct Push {
    orderer: Orderer,
}

impl Push {
    pub fn new(
        store: Arc<Store>,
        input: Arc<dyn EventSource>,
        index: Arc<VectorIndex>,
        crit: Crit,
    ) -> Self {
        Self {
            orderer: Orderer::new(store, input, index, crit),
        }
    }

    pub fn bootstrap(&mut self, app: Box<dyn Application>) -> Result<(), BootstrapError> {
        self.bootstrap_with(app, false)
    }

    pub(crate) fn bootstrap_with(
        &mut self,
        app: Box<dyn Application>,
        reset_index: bool,
    ) -> Result<(), BootstrapError> {
        let applier = AtroposApplier {
            store: self.orderer.store(),
            input: self.orderer.input(),
            index: self.orderer.index(),
            app,
            reset_index,
        };
        self.orderer.bootstrap(Box::new(applier))
    }

    pub fn build(&mut self, e: &mut Event) -> Result<(), ProcessError> {
        self.orderer.build(e)
    }

    pub fn process(&mut self, e: &Event) -> Result<(), ProcessError> {
        self.orderer.process(e)
    }

    pub fn store(&self) -> Arc<Store> {
        self.orderer.store()
    }

    pub fn index(&self) -> Arc<VectorIndex> {
        self.orderer.index()
    }
}
