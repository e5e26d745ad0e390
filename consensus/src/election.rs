// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! Virtual-voting election.
//!
//! Decides, for the oldest undecided frame, which root is the Atropos —
//! using only roots and the forkless-cause relation, never arrival order.
//!
//! Every root of a later frame casts one vote per candidate validator of
//! the frame under decision. Roots exactly one frame later vote directly
//! (did I forkless-cause one of the candidate's roots?); roots further out
//! aggregate the votes of the previous frame's roots they forkless-cause,
//! by cumulative validator weight, and side with the majority. A candidate
//! is decided once either answer gathers quorum weight. The Atropos is the
//! first decided-yes candidate in canonical validator order; an undecided
//! candidate earlier in that order makes the whole frame wait — there is
//! deliberately no tie-break, so nodes observing events in different orders
//! cannot diverge.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use moira_types::{EventHash, Frame, RootRef, ValidatorId, Validators};

use crate::error::FatalError;

/// Read access to the DAG state the election votes over.
pub trait ElectionContext {
    fn forkless_cause(&self, a: &EventHash, b: &EventHash) -> bool;
    fn frame_roots(&self, frame: Frame) -> Vec<RootRef>;
}

/// A decided frame and its elected Atropos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub frame: Frame,
    pub atropos: EventHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct VoteId {
    voter: EventHash,
    subject: ValidatorId,
}

#[derive(Debug, Clone, Copy)]
struct Vote {
    yes: bool,
    /// The candidate root this vote is about; meaningful only for yes votes.
    observed: EventHash,
}

/// Incremental election state for one undecided frame.
pub struct Election {
    validators: Arc<Validators>,
    frame_to_decide: Frame,
    votes: HashMap<VoteId, Vote>,
    decided: HashMap<ValidatorId, Vote>,
}

impl Election {
    pub fn new(validators: Arc<Validators>, frame_to_decide: Frame) -> Self {
        Self {
            validators,
            frame_to_decide,
            votes: HashMap::new(),
            decided: HashMap::new(),
        }
    }

    /// Restart the election for another frame, wiping all vote state.
    /// Known roots of later frames must be re-processed by the caller.
    pub fn reset(&mut self, validators: Arc<Validators>, frame_to_decide: Frame) {
        self.validators = validators;
        self.frame_to_decide = frame_to_decide;
        self.votes.clear();
        self.decided.clear();
    }

    pub fn frame_to_decide(&self) -> Frame {
        self.frame_to_decide
    }

    /// Fold one new root's votes in. Returns the frame's decision once the
    /// first candidate in canonical order is decided yes.
    pub fn process_root(
        &mut self,
        voter: RootRef,
        ctx: &dyn ElectionContext,
    ) -> Result<Option<Decision>, FatalError> {
        if voter.frame <= self.frame_to_decide {
            // roots of the frame under decision are candidates, not voters
            return Ok(None);
        }
        let round = voter.frame - self.frame_to_decide;
        let validators = self.validators.clone();
        let mut newly_decided = false;

        for &subject in validators.sorted_ids() {
            if self.decided.contains_key(&subject) {
                continue;
            }

            let vote = if round == 1 {
                self.direct_vote(&voter, subject, ctx)
            } else {
                let (vote, decided) = self.aggregated_vote(&voter, subject, ctx)?;
                if decided {
                    self.decided.insert(subject, vote);
                    newly_decided = true;
                }
                vote
            };

            self.votes.insert(
                VoteId {
                    voter: voter.id,
                    subject,
                },
                vote,
            );
        }

        if newly_decided {
            self.choose_atropos()
        } else {
            Ok(None)
        }
    }

    /// A root one frame above the decided frame votes by direct observation.
    fn direct_vote(&self, voter: &RootRef, subject: ValidatorId, ctx: &dyn ElectionContext) -> Vote {
        // among the subject's roots (several if it forked), pick the
        // smallest forkless-caused hash so the observed root does not
        // depend on admission order
        let mut observed: Option<EventHash> = None;
        for candidate in ctx.frame_roots(self.frame_to_decide) {
            if candidate.validator != subject {
                continue;
            }
            if !ctx.forkless_cause(&voter.id, &candidate.id) {
                continue;
            }
            if observed.map_or(true, |seen| candidate.id < seen) {
                observed = Some(candidate.id);
            }
        }
        Vote {
            yes: observed.is_some(),
            observed: observed.unwrap_or(EventHash::ZERO),
        }
    }

    /// A root further out aggregates the previous frame's votes it
    /// forkless-causes; quorum weight on either side decides the subject.
    fn aggregated_vote(
        &self,
        voter: &RootRef,
        subject: ValidatorId,
        ctx: &dyn ElectionContext,
    ) -> Result<(Vote, bool), FatalError> {
        let mut yes_weight = 0;
        let mut no_weight = 0;
        let mut observed: Option<EventHash> = None;

        for prev in ctx.frame_roots(voter.frame - 1) {
            if !ctx.forkless_cause(&voter.id, &prev.id) {
                continue;
            }
            let prev_vote = self
                .votes
                .get(&VoteId {
                    voter: prev.id,
                    subject,
                })
                .copied()
                .ok_or(FatalError::MissingVote {
                    voter: prev.id,
                    subject,
                })?;
            let weight = self.validators.weight_of(prev.validator);
            if prev_vote.yes {
                match observed {
                    Some(seen) if seen != prev_vote.observed => {
                        return Err(FatalError::ConflictingVotes {
                            frame: self.frame_to_decide,
                            subject,
                        });
                    }
                    _ => observed = Some(prev_vote.observed),
                }
                yes_weight += weight;
            } else {
                no_weight += weight;
            }
        }

        let vote = Vote {
            yes: yes_weight >= no_weight,
            observed: observed.unwrap_or(EventHash::ZERO),
        };
        let decided = yes_weight >= self.validators.quorum() || no_weight >= self.validators.quorum();
        if decided {
            debug!(
                frame = self.frame_to_decide,
                subject,
                yes = vote.yes,
                "candidate decided"
            );
        }
        Ok((vote, decided))
    }

    /// Scan candidates in canonical order: the first decided-yes root is
    /// the Atropos; an undecided candidate before it means wait.
    fn choose_atropos(&self) -> Result<Option<Decision>, FatalError> {
        for &subject in self.validators.sorted_ids() {
            match self.decided.get(&subject) {
                None => return Ok(None),
                Some(vote) if vote.yes => {
                    return Ok(Some(Decision {
                        frame: self.frame_to_decide,
                        atropos: vote.observed,
                    }));
                }
                Some(_) => continue,
            }
        }
        // quorum intersection guarantees at least one yes among honest roots
        Err(FatalError::NoAtropos(self.frame_to_decide))
    }
}
