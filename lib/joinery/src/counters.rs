use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Named job counters. Observability only; never read back by job logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    InputSession,
    InputUser,
    InputUrl,
    SessionSelected,
    SessionSkipped,
    DuplicateUser,
    SessionWithoutUser,
    SessionEnriched,
}

impl Counter {
    pub const COUNT: usize = 8;

    pub const ALL: [Counter; Counter::COUNT] = [
        Counter::InputSession,
        Counter::InputUser,
        Counter::InputUrl,
        Counter::SessionSelected,
        Counter::SessionSkipped,
        Counter::DuplicateUser,
        Counter::SessionWithoutUser,
        Counter::SessionEnriched,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::InputSession => "InputSession",
            Counter::InputUser => "InputUser",
            Counter::InputUrl => "InputUrl",
            Counter::SessionSelected => "SessionSelected",
            Counter::SessionSkipped => "SessionSkipped",
            Counter::DuplicateUser => "DuplicateUser",
            Counter::SessionWithoutUser => "SessionWithoutUser",
            Counter::SessionEnriched => "SessionEnriched",
        }
    }

    fn index(self) -> usize { self as usize }
}

/// Where mappers and reducers report counter increments.
pub trait CounterSink: Sync {
    fn incr(&self, counter: Counter, by: u64);
}

/// Discards every increment.
#[derive(Default, Clone, Copy, Debug)]
pub struct NoopCounters;

impl CounterSink for NoopCounters {
    fn incr(&self, _counter: Counter, _by: u64) {}
}

/// Lock-free counters shared by every task of a job.
#[derive(Debug, Default)]
pub struct Counters {
    values: [AtomicU64; Counter::COUNT],
}

impl Counters {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, counter: Counter) -> u64 { self.values[counter.index()].load(Ordering::Relaxed) }

    pub fn report(&self) -> CounterReport {
        CounterReport { counters: Counter::ALL.iter().map(|&c| (c.name(), self.get(c))).collect() }
    }
}

impl CounterSink for Counters {
    fn incr(&self, counter: Counter, by: u64) {
        self.values[counter.index()].fetch_add(by, Ordering::Relaxed);
    }
}

/// Final counter values, serialised into the job report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterReport {
    pub counters: BTreeMap<&'static str, u64>,
}

impl CounterReport {
    pub fn get(&self, name: &str) -> u64 { self.counters.get(name).copied().unwrap_or(0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_accumulate() {
        let counters = Counters::new();
        counters.incr(Counter::DuplicateUser, 1);
        counters.incr(Counter::DuplicateUser, 2);
        assert_eq!(counters.get(Counter::DuplicateUser), 3);
        assert_eq!(counters.get(Counter::SessionSkipped), 0);
    }

    #[test]
    fn report_lists_every_counter() {
        let counters = Counters::new();
        counters.incr(Counter::SessionSelected, 4);
        let report = counters.report();
        assert_eq!(report.counters.len(), Counter::ALL.len());
        assert_eq!(report.get("SessionSelected"), 4);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"SessionSelected\":4"));
    }
}
