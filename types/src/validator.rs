// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! Validator Set Management
//!
//! An epoch's validator set is immutable once built. Validators are kept in
//! canonical order (ascending id), which every consumer relies on for
//! reproducible iteration: election votes, cheater lists and quorum counting
//! must not depend on insertion order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of a validator.
pub type ValidatorId = u32;

/// Stake weight of a validator.
pub type Weight = u64;

/// Index of a validator inside the canonical ordering of a [`Validators`] set.
pub type ValidatorIdx = usize;

/// An immutable, canonically ordered validator set with stake weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    /// Ids sorted ascending.
    ids: Vec<ValidatorId>,
    /// Weights parallel to `ids`.
    weights: Vec<Weight>,
    total: Weight,
}

/// Builder for [`Validators`]: collect id → weight, then `build()`.
#[derive(Debug, Clone, Default)]
pub struct ValidatorsBuilder {
    members: BTreeMap<ValidatorId, Weight>,
}

impl ValidatorsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a validator's weight. A repeated id overwrites the previous weight.
    pub fn set(&mut self, id: ValidatorId, weight: Weight) -> &mut Self {
        self.members.insert(id, weight);
        self
    }

    pub fn build(&self) -> Validators {
        let ids: Vec<ValidatorId> = self.members.keys().copied().collect();
        let weights: Vec<Weight> = self.members.values().copied().collect();
        let total = weights.iter().sum();
        Validators {
            ids,
            weights,
            total,
        }
    }
}

impl Validators {
    /// Build a set from `(id, weight)` pairs.
    pub fn from_members<I: IntoIterator<Item = (ValidatorId, Weight)>>(members: I) -> Self {
        let mut builder = ValidatorsBuilder::new();
        for (id, weight) in members {
            builder.set(id, weight);
        }
        builder.build()
    }

    /// Number of validators in the set.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in canonical (ascending) order.
    pub fn sorted_ids(&self) -> &[ValidatorId] {
        &self.ids
    }

    /// Canonical index of a validator, if it is a member.
    pub fn idx_of(&self, id: ValidatorId) -> Option<ValidatorIdx> {
        self.ids.binary_search(&id).ok()
    }

    pub fn contains(&self, id: ValidatorId) -> bool {
        self.idx_of(id).is_some()
    }

    /// Weight of a validator; 0 for non-members.
    pub fn weight_of(&self, id: ValidatorId) -> Weight {
        self.idx_of(id).map(|i| self.weights[i]).unwrap_or(0)
    }

    /// Weight at a canonical index.
    pub fn weight_at(&self, idx: ValidatorIdx) -> Weight {
        self.weights[idx]
    }

    /// Id at a canonical index.
    pub fn id_at(&self, idx: ValidatorIdx) -> ValidatorId {
        self.ids[idx]
    }

    pub fn total_weight(&self) -> Weight {
        self.total
    }

    /// Supermajority threshold: strictly more than 2/3 of the total weight.
    /// Widened so extreme stake sums cannot overflow; the result always
    /// fits back into `Weight`.
    pub fn quorum(&self) -> Weight {
        (self.total as u128 * 2 / 3 + 1) as Weight
    }

    /// A fresh weight accumulator over this set.
    pub fn new_counter(&self) -> WeightCounter<'_> {
        WeightCounter {
            validators: self,
            counted: vec![false; self.ids.len()],
            sum: 0,
        }
    }
}

/// Accumulates validator weights towards quorum.
///
/// Each validator is counted at most once, so two fork roots created by the
/// same validator contribute a single weight.
#[derive(Debug)]
pub struct WeightCounter<'a> {
    validators: &'a Validators,
    counted: Vec<bool>,
    sum: Weight,
}

impl WeightCounter<'_> {
    /// Count a validator by id. Returns false if it was already counted
    /// or is not a member.
    pub fn count(&mut self, id: ValidatorId) -> bool {
        match self.validators.idx_of(id) {
            Some(idx) => self.count_idx(idx),
            None => false,
        }
    }

    /// Count a validator by canonical index.
    pub fn count_idx(&mut self, idx: ValidatorIdx) -> bool {
        if self.counted[idx] {
            return false;
        }
        self.counted[idx] = true;
        self.sum += self.validators.weight_at(idx);
        true
    }

    pub fn sum(&self) -> Weight {
        self.sum
    }

    pub fn has_quorum(&self) -> bool {
        self.sum >= self.validators.quorum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let v = Validators::from_members([(3, 10), (1, 20), (2, 30)]);
        assert_eq!(v.sorted_ids(), &[1, 2, 3]);
        assert_eq!(v.weight_of(1), 20);
        assert_eq!(v.weight_of(3), 10);
        assert_eq!(v.total_weight(), 60);
    }

    #[test]
    fn test_quorum_threshold() {
        // 4 equal validators: quorum is 3
        let v = Validators::from_members([(1, 1), (2, 1), (3, 1), (4, 1)]);
        assert_eq!(v.quorum(), 3);

        // single validator: quorum is 1
        let v = Validators::from_members([(7, 1)]);
        assert_eq!(v.quorum(), 1);

        // stake sums near u64::MAX must not overflow the threshold math
        let v = Validators::from_members([(1, u64::MAX / 2), (2, u64::MAX / 2)]);
        assert_eq!(v.quorum(), ((u64::MAX as u128 - 1) * 2 / 3 + 1) as u64);
    }

    #[test]
    fn test_counter_dedupes() {
        let v = Validators::from_members([(1, 1), (2, 1), (3, 1)]);
        let mut counter = v.new_counter();
        assert!(counter.count(1));
        assert!(!counter.count(1));
        assert_eq!(counter.sum(), 1);
        assert!(!counter.has_quorum());
        counter.count(2);
        counter.count(3);
        assert!(counter.has_quorum());
    }

    #[test]
    fn test_counter_ignores_non_members() {
        let v = Validators::from_members([(1, 5)]);
        let mut counter = v.new_counter();
        assert!(!counter.count(99));
        assert_eq!(counter.sum(), 0);
    }

    #[test]
    fn test_builder_overwrites() {
        let mut builder = ValidatorsBuilder::new();
        builder.set(1, 10).set(1, 15);
        let v = builder.build();
        assert_eq!(v.weight_of(1), 15);
        assert_eq!(v.len(), 1);
    }
}
