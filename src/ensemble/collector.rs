//! Training data collection for estimators
//!
//! Inputs are recorded under a record id when a candidate is selected.
//! A target arriving later under the same id completes every pending
//! input for that id; each completed pair is appended to a
//! [`TrainingDataset`] and the pending record is removed.

use crate::core::error::{EnsembleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// How repeated inputs under one record id are folded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMode {
    /// Keep the earliest input, ignore later ones
    #[default]
    First,
    /// Keep only the most recent input
    Last,
    /// Keep every input; one target completes all of them
    All,
}

/// What to do when a target arrives for an id with no pending input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    /// Count it and move on
    #[default]
    Drop,
    /// Report [`EnsembleError::UnmatchedRecord`]
    Raise,
}

/// Append-only `(X, Y)` training arrays
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingDataset {
    inputs: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

impl TrainingDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, input: Vec<f64>, target: f64) {
        self.inputs.push(input);
        self.targets.push(target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn inputs(&self) -> &[Vec<f64>] {
        &self.inputs
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[f64], f64)> {
        self.inputs
            .iter()
            .map(Vec::as_slice)
            .zip(self.targets.iter().copied())
    }

    /// Take every row, leaving the dataset empty
    pub fn drain(&mut self) -> TrainingDataset {
        std::mem::take(self)
    }

    pub fn extend(&mut self, other: TrainingDataset) {
        self.inputs.extend(other.inputs);
        self.targets.extend(other.targets);
    }
}

/// Input waiting for its target
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInput<M> {
    pub features: Vec<f64>,
    pub meta: M,
}

/// Pending inputs keyed by record id
///
/// Keys are kept ordered so completed rows land in the dataset in a
/// deterministic order.
#[derive(Debug, Clone)]
pub struct DataCollector<K, M> {
    mode: CollectionMode,
    policy: UnmatchedPolicy,
    pending: BTreeMap<K, Vec<PendingInput<M>>>,
    matched: u64,
    dropped_targets: u64,
}

impl<K: Ord + Clone + Debug, M> DataCollector<K, M> {
    pub fn new(mode: CollectionMode) -> Self {
        Self {
            mode,
            policy: UnmatchedPolicy::default(),
            pending: BTreeMap::new(),
            matched: 0,
            dropped_targets: 0,
        }
    }

    pub fn with_policy(mut self, policy: UnmatchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn mode(&self) -> CollectionMode {
        self.mode
    }

    /// Record an input for `id`, folded according to the collection mode
    pub fn collect_inputs(&mut self, id: K, features: Vec<f64>, meta: M) {
        let records = self.pending.entry(id).or_default();
        let input = PendingInput { features, meta };
        match self.mode {
            CollectionMode::First => {
                if records.is_empty() {
                    records.push(input);
                }
            }
            CollectionMode::Last => {
                records.clear();
                records.push(input);
            }
            CollectionMode::All => records.push(input),
        }
    }

    /// Complete every pending input for `id` with `target`
    ///
    /// Returns the number of rows appended to `sink`.
    pub fn collect_targets(&mut self, id: &K, target: f64, sink: &mut TrainingDataset) -> Result<usize> {
        self.collect_targets_with(id, sink, |_| target)
    }

    /// Like [`collect_targets`](Self::collect_targets) with a per-input
    /// target computed from the input's metadata
    pub fn collect_targets_with<F>(&mut self, id: &K, sink: &mut TrainingDataset, mut target: F) -> Result<usize>
    where
        F: FnMut(&M) -> f64,
    {
        match self.pending.remove(id) {
            Some(records) => {
                let count = records.len();
                for record in records {
                    let y = target(&record.meta);
                    sink.push(record.features, y);
                }
                self.matched += count as u64;
                Ok(count)
            }
            None => match self.policy {
                UnmatchedPolicy::Drop => {
                    self.dropped_targets += 1;
                    tracing::debug!(record = ?id, "dropping target with no pending input");
                    Ok(0)
                }
                UnmatchedPolicy::Raise => Err(EnsembleError::UnmatchedRecord(format!("{:?}", id))),
            },
        }
    }

    /// Remove pending inputs for which `stale` returns true
    ///
    /// Returns the number of inputs evicted.
    pub fn evict_where<F>(&mut self, mut stale: F) -> usize
    where
        F: FnMut(&K, &M) -> bool,
    {
        let mut evicted = 0;
        self.pending.retain(|id, records| {
            let before = records.len();
            records.retain(|r| !stale(id, &r.meta));
            evicted += before - records.len();
            !records.is_empty()
        });
        evicted
    }

    /// Drop every pending input for `id`
    pub fn evict(&mut self, id: &K) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn is_pending(&self, id: &K) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_ids(&self) -> impl Iterator<Item = &K> {
        self.pending.keys()
    }

    /// Number of ids with pending inputs
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_inputs(&self, id: &K) -> &[PendingInput<M>] {
        self.pending.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Inputs completed with a target so far
    pub fn matched(&self) -> u64 {
        self.matched
    }

    /// Targets dropped under [`UnmatchedPolicy::Drop`]
    pub fn dropped_targets(&self) -> u64 {
        self.dropped_targets
    }
}
