use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::Result;

use crate::counters::CounterSink;
use crate::error::JoinError;
use crate::record::Any;
use crate::stats::JobStats;
use crate::wire::Wire;

// ========== Core MapReduce traits ==========

pub trait Mapper {
    type Key: Wire + Send + 'static;
    type Value: Wire + Send + 'static;
    /// Built once per map task by `setup` and only read afterwards.
    type State;

    fn setup(&self, counters: &dyn CounterSink) -> Result<Self::State, JoinError>;

    fn do_map<I, F>(&self, state: &Self::State, input: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(Self::Key, Self::Value);
}

/// Reducer consumes one key group at a time, values in sort-comparator order.
/// `key` is the first key of the group.
pub trait Reducer {
    type Key: Wire + Send + 'static;
    type ValueIn: Wire + Send + 'static;
    type Out: Send + 'static;

    fn do_reduce<I, F>(&self, key: &Self::Key, values: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out);
}

// ========== Executable pipeline interface ==========

pub trait ExecutablePipeline {
    fn add_input(&mut self, input_path: impl Into<String>);
    fn add_output(&mut self, output_path: impl Into<String>);

    fn map_reduce<M, R>(&mut self, mapper: M, reducer: R, shuffle: Shuffle<M::Key>, counters: &dyn CounterSink) -> Result<JobStats>
    where
        M: Mapper + Sync,
        R: Reducer<Key = M::Key, ValueIn = M::Value, Out = Any> + Sync;
}

// ========== Shuffle wiring ==========

/// Partition, sort and group functions installed into the runtime for one job.
pub struct Shuffle<K> {
    /// Picks the reduce partition in `0..num_partitions`.
    pub partition: fn(&K, usize) -> usize,
    /// Total order of keys inside a partition.
    pub sort: fn(&K, &K) -> Ordering,
    /// Whether two adjacent sorted keys belong to the same reduce group.
    pub group: fn(&K, &K) -> bool,
}

impl<K> Clone for Shuffle<K> {
    fn clone(&self) -> Self { *self }
}

impl<K> Copy for Shuffle<K> {}

impl<K: Ord + Hash> Shuffle<K> {
    /// Hash partitioning, natural ordering, equality grouping.
    pub fn natural() -> Self {
        Self { partition: hash_to_partition::<K>, sort: <K as Ord>::cmp, group: |a: &K, b: &K| a == b }
    }
}

pub fn hash_to_partition<K: Hash>(key: &K, num_partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % num_partitions
}
