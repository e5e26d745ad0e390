// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! The full stack: [`Push`] coupled transactionally to the vector index.
//! Every admitted event is staged in the index first, committed only if
//! ordering accepts it, and rolled back otherwise.

use std::sync::Arc;

use moira_types::{Event, EventSource};
use moira_storage::Store;
use moira_vecclock::VectorIndex;

use crate::error::{BootstrapError, Crit, ProcessError};
use crate::push::{Application, Push};

/// Node-unique build id source. Ids from distinct nodes never collide:
/// the low 64 bits carry the node salt, the high bits a local counter.
struct UniqueId {
    salt: u64,
    counter: u64,
}

impl UniqueId {
    fn sample(&mut self) -> u128 {
        self.counter += 1;
        ((self.counter as u128) << 64) | self.salt as u128
    }
}

/// [`Push`] plus vector index lifecycle. The only entry point a node needs.
pub struct IndexedPush {
    push: Push,
    index: Arc<VectorIndex>,
    unique_id: UniqueId,
}

impl IndexedPush {
    pub fn new(
        store: Arc<Store>,
        input: Arc<dyn EventSource>,
        index: Arc<VectorIndex>,
        node_salt: u64,
        crit: Crit,
    ) -> Self {
        Self {
            push: Push::new(store, input, index.clone(), crit),
            index,
            unique_id: UniqueId {
                salt: node_salt,
                counter: 0,
            },
        }
    }

    /// Bootstrap the whole stack. Resets the index to the current epoch
    /// before any event is admitted, and again at every epoch seal.
    pub fn bootstrap(&mut self, app: Box<dyn Application>) -> Result<(), BootstrapError> {
        self.push.bootstrap_with(app, true)
    }

    /// Annotate a locally built event with a fresh build id plus its frame
    /// and root flag. The index staging is always rolled back: a built
    /// event re-enters through [`process`](Self::process) like any other.
    pub fn build(&mut self, e: &mut Event) -> Result<(), ProcessError> {
        e.set_build_id(self.unique_id.sample());
        let res = self.index.add(e).map_err(ProcessError::from);
        let res = res.and_then(|_| self.push.build(e));
        self.index.drop_not_flushed();
        res
    }

    /// Admit an external or built event. The index mutation commits iff
    /// ordering accepts the event.
    pub fn process(&mut self, e: &Event) -> Result<(), ProcessError> {
        if let Err(err) = self.index.add(e) {
            self.index.drop_not_flushed();
            return Err(err.into());
        }
        match self.push.process(e) {
            Ok(()) => {
                self.index.flush();
                Ok(())
            }
            Err(err) => {
                self.index.drop_not_flushed();
                Err(err)
            }
        }
    }

    pub fn store(&self) -> Arc<Store> {
        self.push.store()
    }

    pub fn index(&self) -> Arc<VectorIndex> {
        self.index.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_differ_across_nodes_and_samples() {
        let mut a = UniqueId { salt: 1, counter: 0 };
        let mut b = UniqueId { salt: 2, counter: 0 };
        let ids = [a.sample(), a.sample(), b.sample(), b.sample()];
        for (i, x) in ids.iter().enumerate() {
            for y in &ids[i + 1..] {
                assert_ne!(x, y);
            }
        }
    }
}
