//! Enrichment join: attach each uid's single user record to all of its sessions.
//!
//! Two strategies produce the same records:
//!
//! - `SecondarySort`: keys are `JoinKey`s installed with `JoinKey::shuffle()`,
//!   so each reduce group holds one uid and yields its user record (if any)
//!   before its sessions. The reducer keeps only that one user and streams
//!   sessions through without buffering them.
//! - `Buffered`: keys are the bare uid with natural ordering. The reducer sees
//!   users and sessions in arrival order, so it buffers a group's sessions
//!   until the whole group has been read.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;

use crate::api::{ExecutablePipeline, Mapper, Reducer, Shuffle};
use crate::counters::{Counter, CounterSink};
use crate::error::JoinError;
use crate::join_key::{JoinKey, ValueKind};
use crate::record::{Any, Session, User};
use crate::runtime::{JobOutput, LocalRuntime};
use crate::stats::JobStats;

/// Keys sessions and users by uid, tagged with their kind.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnrichMapper;

impl Mapper for EnrichMapper {
    type Key = JoinKey;
    type Value = Any;
    type State = ();

    fn setup(&self, _counters: &dyn CounterSink) -> Result<(), JoinError> { Ok(()) }

    fn do_map<I, F>(&self, _state: &(), input: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(JoinKey, Any),
    {
        for rec in input {
            split_record(rec, counters, |uid, kind, value| emit(JoinKey { uid, kind }, value));
        }
        Ok(())
    }
}

/// Splits an envelope into its session and user parts, tagged with uid and kind.
fn split_record<F: FnMut(i64, ValueKind, Any)>(rec: Any, counters: &dyn CounterSink, mut emit: F) {
    if let Some(session) = rec.session {
        counters.incr(Counter::InputSession, 1);
        emit(session.uid, ValueKind::Session, Any::session(session));
    }
    if let Some(user) = rec.user {
        counters.incr(Counter::InputUser, 1);
        emit(user.uid, ValueKind::User, Any::user(user));
    }
}

/// Pairs every session in a uid group with the group's user.
///
/// - The first user becomes the group's user; later users before any session
///   are duplicates (`DuplicateUser`) and are ignored.
/// - Sessions with no user are emitted unpaired (`SessionWithoutUser`).
/// - A user arriving after a session means the sort and group comparators
///   disagree; the group aborts with `InvariantViolation`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnrichReducer;

impl Reducer for EnrichReducer {
    type Key = JoinKey;
    type ValueIn = Any;
    type Out = Any;

    fn do_reduce<I, F>(&self, key: &JoinKey, values: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(Any),
    {
        let mut user: Option<User> = None;
        let mut seen_session = false;
        for value in values {
            if let Some(next) = value.user {
                if seen_session {
                    return Err(JoinError::InvariantViolation {
                        uid: key.uid,
                        detail: format!("user uid={} arrived after a session; sort and group comparators disagree", next.uid),
                    });
                }
                match user {
                    None => user = Some(next),
                    Some(_) => counters.incr(Counter::DuplicateUser, 1),
                }
            }
            if let Some(session) = value.session {
                seen_session = true;
                match &user {
                    Some(u) => {
                        counters.incr(Counter::SessionEnriched, 1);
                        emit(Any::enriched(session, Some(u.clone())));
                    }
                    None => {
                        counters.incr(Counter::SessionWithoutUser, 1);
                        emit(Any::enriched(session, None));
                    }
                }
            }
        }
        Ok(())
    }
}

// ========== Buffered join on the bare uid ==========

/// Keys sessions and users by uid alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct BufferedEnrichMapper;

impl Mapper for BufferedEnrichMapper {
    type Key = i64;
    type Value = Any;
    type State = ();

    fn setup(&self, _counters: &dyn CounterSink) -> Result<(), JoinError> { Ok(()) }

    fn do_map<I, F>(&self, _state: &(), input: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(i64, Any),
    {
        for rec in input {
            split_record(rec, counters, |uid, _, value| emit(uid, value));
        }
        Ok(())
    }
}

/// Holds every session of a uid group in memory, then pairs them with the
/// group's first user. Users may arrive anywhere in the group.
#[derive(Clone, Copy, Debug, Default)]
pub struct BufferedEnrichReducer;

impl Reducer for BufferedEnrichReducer {
    type Key = i64;
    type ValueIn = Any;
    type Out = Any;

    fn do_reduce<I, F>(&self, _key: &i64, values: I, counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
    where
        I: IntoIterator<Item = Any>,
        F: FnMut(Any),
    {
        let mut user: Option<User> = None;
        let mut sessions: Vec<Session> = Vec::new();
        for value in values {
            if let Some(session) = value.session {
                sessions.push(session);
            }
            if let Some(next) = value.user {
                match user {
                    None => user = Some(next),
                    Some(_) => counters.incr(Counter::DuplicateUser, 1),
                }
            }
        }
        match &user {
            Some(_) => counters.incr(Counter::SessionEnriched, sessions.len() as u64),
            None => counters.incr(Counter::SessionWithoutUser, sessions.len() as u64),
        }
        for session in sessions {
            emit(Any::enriched(session, user.clone()));
        }
        Ok(())
    }
}

// ========== Strategy selection ==========

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EnrichStrategy {
    Buffered,
    #[default]
    SecondarySort,
}

impl EnrichStrategy {
    pub const ALL: [EnrichStrategy; 2] = [EnrichStrategy::Buffered, EnrichStrategy::SecondarySort];

    pub fn name(self) -> &'static str {
        match self {
            EnrichStrategy::Buffered => "buffered",
            EnrichStrategy::SecondarySort => "secondary-sort",
        }
    }
}

impl fmt::Display for EnrichStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for EnrichStrategy {
    type Err = JoinError;

    fn from_str(s: &str) -> Result<Self, JoinError> {
        EnrichStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| JoinError::Config(format!("unknown enrich strategy {s:?}; expected buffered or secondary-sort")))
    }
}

/// Mapper, reducer and shuffle wiring for one secondary-sort enrichment job.
pub fn job() -> (EnrichMapper, EnrichReducer, Shuffle<JoinKey>) { (EnrichMapper, EnrichReducer, JoinKey::shuffle()) }

/// Runs the enrichment join over users and sessions, in any split layout.
pub fn run_enrich(runtime: &LocalRuntime, strategy: EnrichStrategy, splits: Vec<Vec<Any>>, counters: &dyn CounterSink) -> Result<JobOutput<Any>> {
    match strategy {
        EnrichStrategy::Buffered => runtime.run(splits, &BufferedEnrichMapper, &BufferedEnrichReducer, Shuffle::natural(), counters),
        EnrichStrategy::SecondarySort => {
            let (mapper, reducer, shuffle) = job();
            runtime.run(splits, &mapper, &reducer, shuffle, counters)
        }
    }
}

/// Runs the enrichment join on a file pipeline whose inputs are already registered.
pub fn run_enrich_pipeline<P: ExecutablePipeline>(pipeline: &mut P, strategy: EnrichStrategy, counters: &dyn CounterSink) -> Result<JobStats> {
    match strategy {
        EnrichStrategy::Buffered => pipeline.map_reduce(BufferedEnrichMapper, BufferedEnrichReducer, Shuffle::natural(), counters),
        EnrichStrategy::SecondarySort => {
            let (mapper, reducer, shuffle) = job();
            pipeline.map_reduce(mapper, reducer, shuffle, counters)
        }
    }
}
