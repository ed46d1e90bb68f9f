//! Membership semi-join: keep the sessions whose url is in a reference set.
//!
//! Three strategies share one output contract (the selected sessions, as
//! `Any::session`), and differ in where membership is decided:
//!
//! - `SortedList`: every map task loads the whole reference set into a sorted
//!   list and filters sessions before emitting them. Reduce passes through.
//! - `HashJoin`: no filtering in the map stage. Sessions and reference urls
//!   meet in the reducer under `UrlHash::of(url)`.
//! - `Bloom`: map tasks prefilter sessions with a Bloom filter built from the
//!   reference set, and still forward every reference url so the reducer can
//!   drop false positives.
//!
//! Groups keyed by `UrlHash` are not semantic: unrelated urls can share a
//! hash, so the reducer always confirms membership by exact string equality.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use tracing::warn;
use xxhash_rust::xxh32::xxh32;

use crate::api::{ExecutablePipeline, Mapper, Reducer, Shuffle};
use crate::bloom::{BloomConfig, BloomFilter};
use crate::counters::{Counter, CounterSink};
use crate::error::{FormatError, JoinError};
use crate::record::{Any, Session};
use crate::reference::{ReferenceSource, SortedUrls};
use crate::runtime::{JobOutput, LocalRuntime};
use crate::stats::JobStats;
use crate::wire::{Wire, WireReader};

const URL_HASH_SEED: u32 = 0x6a6e_7279;

/// Routing key for the semi-join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UrlHash(pub u32);

impl UrlHash {
    pub fn of(url: &str) -> Self { UrlHash(xxh32(url.as_bytes(), URL_HASH_SEED)) }

    pub fn shuffle() -> Shuffle<UrlHash> {
        Shuffle { partition: partition_by_hash, sort: sort_by_hash, group: |a, b| a == b }
    }
}

fn partition_by_hash(key: &UrlHash, num_partitions: usize) -> usize { key.0 as usize % num_partitions }

fn sort_by_hash(a: &UrlHash, b: &UrlHash) -> Ordering { a.0.cmp(&b.0) }

impl Wire for UrlHash {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), FormatError> { self.0.write_to(out) }

    fn read_from(reader: &mut WireReader<'_>) -> Result<Self, FormatError> { Ok(UrlHash(reader.read_u32()?)) }
}

// ========== Variant 1: sorted list, filter in map ==========

#[derive(Clone, Debug)]
pub struct SortedListSelectMapper {
    pub reference: ReferenceSource,
}

impl Mapper for SortedListSelectMapper {
    type Key = UrlHash;
    type Value = Any;
    type State = SortedUrls;

    fn setup(&self, _counters: &dyn CounterSink) -> Result<SortedUrls, JoinError> {
        let urls = self.reference.load_sorted()?;
        if urls.is_empty() {
            warn!("reference set is empty; every session will be skipped");
        }
        Ok(urls)
    }

    fn do_map<I, F>(&self, urls: &SortedUrls, input: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(UrlHash, Any),
    {
        for rec in input {
            let Some(session) = rec.session else { continue };
            counters.incr(Counter::InputSession, 1);
            if urls.contains(&session.url) {
                counters.incr(Counter::SessionSelected, 1);
                emit(UrlHash::of(&session.url), Any::session(session));
            } else {
                counters.incr(Counter::SessionSkipped, 1);
            }
        }
        Ok(())
    }
}

/// Emits every session it is handed, unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughReducer;

impl Reducer for PassThroughReducer {
    type Key = UrlHash;
    type ValueIn = Any;
    type Out = Any;

    fn do_reduce<I, F>(&self, _key: &UrlHash, values: I, _counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(Any),
    {
        values.into_iter().filter_map(|v| v.session).for_each(|s| emit(Any::session(s)));
        Ok(())
    }
}

// ========== Variant 2: hash-partitioned join ==========

#[derive(Clone, Copy, Debug, Default)]
pub struct HashJoinSelectMapper;

impl Mapper for HashJoinSelectMapper {
    type Key = UrlHash;
    type Value = Any;
    type State = ();

    fn setup(&self, _counters: &dyn CounterSink) -> Result<(), JoinError> { Ok(()) }

    fn do_map<I, F>(&self, _state: &(), input: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(UrlHash, Any),
    {
        for rec in input {
            if let Some(session) = rec.session {
                counters.incr(Counter::InputSession, 1);
                emit(UrlHash::of(&session.url), Any::session(session));
            }
            if let Some(url) = rec.url {
                emit_reference_url(url, counters, emit);
            }
        }
        Ok(())
    }
}

// ========== Variant 3: Bloom filter prefilter ==========

#[derive(Clone, Debug)]
pub struct BloomSelectMapper {
    pub reference: ReferenceSource,
    pub bloom: BloomConfig,
}

impl Mapper for BloomSelectMapper {
    type Key = UrlHash;
    type Value = Any;
    type State = BloomFilter;

    fn setup(&self, _counters: &dyn CounterSink) -> Result<BloomFilter, JoinError> { self.reference.load_bloom(self.bloom) }

    fn do_map<I, F>(&self, filter: &BloomFilter, input: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(UrlHash, Any),
    {
        for rec in input {
            if let Some(session) = rec.session {
                counters.incr(Counter::InputSession, 1);
                if filter.contains(session.url.as_bytes()) {
                    emit(UrlHash::of(&session.url), Any::session(session));
                } else {
                    counters.incr(Counter::SessionSkipped, 1);
                }
            }
            // forwarded even though the filter holds them; the reducer needs exact strings
            if let Some(url) = rec.url {
                emit_reference_url(url, counters, emit);
            }
        }
        Ok(())
    }
}

fn emit_reference_url<F: FnMut(UrlHash, Any)>(url: String, counters: &dyn CounterSink, emit: &mut F) {
    counters.incr(Counter::InputUrl, 1);
    emit(UrlHash::of(&url), Any::url(url));
}

/// Confirms membership by exact url within one hash group.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectReducer;

impl Reducer for SelectReducer {
    type Key = UrlHash;
    type ValueIn = Any;
    type Out = Any;

    fn do_reduce<I, F>(&self, _key: &UrlHash, values: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(Any),
    {
        let mut urls: HashSet<String> = HashSet::new();
        let mut sessions: Vec<Session> = Vec::new();
        for value in values {
            if let Some(url) = value.url {
                urls.insert(url);
            }
            if let Some(session) = value.session {
                sessions.push(session);
            }
        }
        for session in sessions {
            if urls.contains(&session.url) {
                counters.incr(Counter::SessionSelected, 1);
                emit(Any::session(session));
            } else {
                counters.incr(Counter::SessionSkipped, 1);
            }
        }
        Ok(())
    }
}

// ========== Strategy selection ==========

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectStrategy {
    SortedList,
    HashJoin,
    #[default]
    Bloom,
}

impl SelectStrategy {
    pub const ALL: [SelectStrategy; 3] = [SelectStrategy::SortedList, SelectStrategy::HashJoin, SelectStrategy::Bloom];

    pub fn name(self) -> &'static str {
        match self {
            SelectStrategy::SortedList => "sorted-list",
            SelectStrategy::HashJoin => "hash-join",
            SelectStrategy::Bloom => "bloom",
        }
    }

    /// Whether reference urls must be fed through the map stage as input.
    pub fn shuffles_reference(self) -> bool { !matches!(self, SelectStrategy::SortedList) }
}

impl fmt::Display for SelectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for SelectStrategy {
    type Err = JoinError;

    fn from_str(s: &str) -> Result<Self, JoinError> {
        SelectStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| JoinError::Config(format!("unknown select strategy {s:?}; expected sorted-list, hash-join or bloom")))
    }
}

/// Runs the semi-join over in-memory session splits.
///
/// For strategies that shuffle the reference set, its urls become one extra
/// map split.
pub fn run_select(
    runtime: &LocalRuntime,
    strategy: SelectStrategy,
    mut splits: Vec<Vec<Any>>,
    reference: &ReferenceSource,
    bloom: BloomConfig,
    counters: &dyn CounterSink,
) -> Result<JobOutput<Any>> {
    if strategy.shuffles_reference() {
        splits.push(reference.load_urls()?.into_iter().map(Any::url).collect());
    }
    let shuffle = UrlHash::shuffle();
    match strategy {
        SelectStrategy::SortedList => {
            runtime.run(splits, &SortedListSelectMapper { reference: reference.clone() }, &PassThroughReducer, shuffle, counters)
        }
        SelectStrategy::HashJoin => runtime.run(splits, &HashJoinSelectMapper, &SelectReducer, shuffle, counters),
        SelectStrategy::Bloom => {
            runtime.run(splits, &BloomSelectMapper { reference: reference.clone(), bloom }, &SelectReducer, shuffle, counters)
        }
    }
}

/// Runs the semi-join on a file pipeline whose inputs are already registered.
/// Reference files must be among the inputs when `strategy.shuffles_reference()`.
pub fn run_select_pipeline<P: ExecutablePipeline>(
    pipeline: &mut P,
    strategy: SelectStrategy,
    reference: &ReferenceSource,
    bloom: BloomConfig,
    counters: &dyn CounterSink,
) -> Result<JobStats> {
    let shuffle = UrlHash::shuffle();
    match strategy {
        SelectStrategy::SortedList => {
            pipeline.map_reduce(SortedListSelectMapper { reference: reference.clone() }, PassThroughReducer, shuffle, counters)
        }
        SelectStrategy::HashJoin => pipeline.map_reduce(HashJoinSelectMapper, SelectReducer, shuffle, counters),
        SelectStrategy::Bloom => {
            pipeline.map_reduce(BloomSelectMapper { reference: reference.clone(), bloom }, SelectReducer, shuffle, counters)
        }
    }
}
