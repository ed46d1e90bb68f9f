use crate::api::{ExecutablePipeline, Mapper, Reducer, Shuffle};
use crate::constants::{DEFAULT_NUM_REDUCERS, ENV_KEEP_EMPTY_PARTS, ENV_NUM_REDUCERS, ENV_THREADS, MAP_BUFFER_BYTES};
use crate::counters::CounterSink;
use crate::error::JoinError;
use crate::io::{ensure_dir, list_files_recursive, read_container_values, read_frame, write_container, write_frame};
use crate::record::Any;
use crate::stats::{JobStats, MapStats, MapTaskStats, ReduceStats, ReduceTaskStats};
use crate::utils::{env_parse, env_var_truthy};
use crate::wire::Wire;
use anyhow::{anyhow, bail, Context, Result};
use rayon::prelude::*;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of partitions, and therefore reduce tasks.
    pub num_reducers: usize,
    /// Worker threads shared by map and reduce tasks.
    pub threads: usize,
    /// Write a part file for partitions that produced no output.
    pub keep_empty_parts: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { num_reducers: DEFAULT_NUM_REDUCERS, threads: num_cpus::get().max(1), keep_empty_parts: false }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            num_reducers: env_parse(ENV_NUM_REDUCERS).unwrap_or(defaults.num_reducers),
            threads: env_parse(ENV_THREADS).unwrap_or(defaults.threads),
            keep_empty_parts: env_var_truthy(ENV_KEEP_EMPTY_PARTS),
        }
    }

    pub fn with_reducers(mut self, num_reducers: usize) -> Self {
        self.num_reducers = num_reducers;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn validate(&self) -> Result<(), JoinError> {
        if self.num_reducers == 0 {
            return Err(JoinError::Config("num_reducers must be positive".into()));
        }
        if self.threads == 0 {
            return Err(JoinError::Config("threads must be positive".into()));
        }
        Ok(())
    }
}

/// Reduce output, one vector per partition, plus phase statistics.
#[derive(Debug)]
pub struct JobOutput<T> {
    pub partitions: Vec<Vec<T>>,
    pub stats: JobStats,
}

impl<T> JobOutput<T> {
    pub fn len(&self) -> usize { self.partitions.iter().map(Vec::len).sum() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// All records, partition by partition.
    pub fn into_records(self) -> Vec<T> { self.partitions.into_iter().flatten().collect() }
}

/// Runs map -> partition -> sort -> group -> reduce in-process on a rayon pool.
#[derive(Debug)]
pub struct LocalRuntime {
    config: RuntimeConfig,
    pool: rayon::ThreadPool,
}

struct MapTaskOutput {
    partitions: Vec<Vec<u8>>,
    stats: MapTaskStats,
}

struct SortEntry<K> {
    key: K,
    segment: usize,
    value: Range<usize>,
}

impl LocalRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("joinery-worker-{i}"))
            .build()
            .context("build worker pool")?;
        Ok(Self { config, pool })
    }

    pub fn from_env() -> Result<Self> { Self::new(RuntimeConfig::from_env()) }

    pub fn config(&self) -> &RuntimeConfig { &self.config }

    /// Runs one job over in-memory splits; each split is one map task.
    pub fn run<M, R>(&self, splits: Vec<Vec<Any>>, mapper: &M, reducer: &R, shuffle: Shuffle<M::Key>, counters: &dyn CounterSink) -> Result<JobOutput<R::Out>>
    where
        M: Mapper + Sync,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Sync,
    {
        let num_reducers = self.config.num_reducers;
        info!(map_tasks = splits.len(), num_reducers, threads = self.config.threads, "starting map phase");

        self.pool.install(|| {
            // Map phase
            let map_phase_start = Instant::now();
            let map_outputs: Vec<MapTaskOutput> = splits
                .into_par_iter()
                .enumerate()
                .map(|(task_id, split)| {
                    self.run_map_task(task_id, split, mapper, shuffle, counters).inspect_err(|e| error!(task_id, "map task failed: {:#}", e))
                })
                .collect::<Result<_>>()?;
            let map_task_stats: Vec<MapTaskStats> = map_outputs.iter().map(|o| o.stats.clone()).collect();
            let map_stats = MapStats::aggregate(&map_task_stats, map_phase_start.elapsed().as_millis() as u64);
            info!(phase = "map",
                  tasks = map_stats.tasks, total_records_in = map_stats.total_records_in,
                  total_emits = map_stats.total_emits, total_bytes_out = map_stats.total_bytes_out,
                  min_task_ms = map_stats.min_task_ms, max_task_ms = map_stats.max_task_ms,
                  wall_ms = map_stats.wall_ms,
                  "Map phase complete");

            // Shuffle: gather every task's segment for each partition
            let mut per_partition: Vec<Vec<Vec<u8>>> = (0..num_reducers).map(|_| Vec::with_capacity(map_outputs.len())).collect();
            for output in map_outputs {
                for (part, segment) in output.partitions.into_iter().enumerate() {
                    if !segment.is_empty() {
                        per_partition[part].push(segment);
                    }
                }
            }

            // Sort + reduce phase
            let reduce_phase_start = Instant::now();
            let reduced: Vec<(Vec<R::Out>, ReduceTaskStats)> = per_partition
                .into_par_iter()
                .enumerate()
                .map(|(r, segments)| {
                    self.run_reduce_task(r, segments, reducer, shuffle, counters).inspect_err(|e| error!(reducer = r, "reduce task failed: {:#}", e))
                })
                .collect::<Result<_>>()?;
            let reduce_task_stats: Vec<ReduceTaskStats> = reduced.iter().map(|(_, s)| s.clone()).collect();
            let reduce_stats = ReduceStats::aggregate(&reduce_task_stats, reduce_phase_start.elapsed().as_millis() as u64);
            info!(phase = "reduce",
                  reducers = reduce_stats.reducers, total_records_in = reduce_stats.total_records_in,
                  total_groups = reduce_stats.total_groups, total_records_out = reduce_stats.total_records_out,
                  min_reducer_ms = reduce_stats.min_reducer_ms, max_reducer_ms = reduce_stats.max_reducer_ms,
                  wall_ms = reduce_stats.wall_ms,
                  "Reduce phase complete");

            Ok(JobOutput {
                partitions: reduced.into_iter().map(|(out, _)| out).collect(),
                stats: JobStats { map: map_stats, reduce: reduce_stats },
            })
        })
    }

    fn run_map_task<M: Mapper>(&self, task_id: usize, split: Vec<Any>, mapper: &M, shuffle: Shuffle<M::Key>, counters: &dyn CounterSink) -> Result<MapTaskOutput> {
        let task_start = Instant::now();
        let num_reducers = self.config.num_reducers;
        let records_in = split.len() as u64;
        debug!(task_id, records_in, "map task starting");

        let state = mapper.setup(counters).with_context(|| format!("map task {task_id} setup"))?;
        let mut partitions: Vec<Vec<u8>> = (0..num_reducers).map(|_| Vec::with_capacity(MAP_BUFFER_BYTES)).collect();
        let mut emits: u64 = 0;
        let mut failure: Option<anyhow::Error> = None;
        {
            let mut emit = |k: M::Key, v: M::Value| {
                if failure.is_some() {
                    return;
                }
                let part = (shuffle.partition)(&k, num_reducers);
                if part >= num_reducers {
                    failure = Some(anyhow!("partitioner returned {part} for {num_reducers} partitions"));
                    return;
                }
                match write_frame(&mut partitions[part], &k, &v) {
                    Ok(()) => emits += 1,
                    Err(e) => failure = Some(anyhow::Error::from(e).context("encode map output")),
                }
            };
            mapper.do_map(&state, split, counters, &mut emit).with_context(|| format!("map task {task_id}"))?;
        }
        if let Some(e) = failure {
            return Err(e.context(format!("map task {task_id}")));
        }

        let stats = MapTaskStats {
            task_id,
            records_in,
            emits,
            bytes_out: partitions.iter().map(|p| p.len() as u64).sum(),
            wall_ms: task_start.elapsed().as_millis() as u64,
        };
        Ok(MapTaskOutput { partitions, stats })
    }

    fn run_reduce_task<R: Reducer>(&self, r: usize, segments: Vec<Vec<u8>>, reducer: &R, shuffle: Shuffle<R::Key>, counters: &dyn CounterSink) -> Result<(Vec<R::Out>, ReduceTaskStats)> {
        let reducer_start = Instant::now();

        // Index every record by its decoded key
        let mut entries: Vec<SortEntry<R::Key>> = Vec::new();
        for (segment, bytes) in segments.iter().enumerate() {
            let mut off = 0usize;
            while let Some(frame) = read_frame(bytes, off).with_context(|| format!("reduce {r}: shuffle frame"))? {
                let key = <R::Key as Wire>::decode(frame.key).with_context(|| format!("reduce {r}: shuffle key"))?;
                entries.push(SortEntry { key, segment, value: frame.value_range.clone() });
                off = frame.next;
            }
        }

        let sort_start = Instant::now();
        // stable: equal keys keep map emission order
        entries.par_sort_by(|a, b| (shuffle.sort)(&a.key, &b.key));
        let sort_ms = sort_start.elapsed().as_millis() as u64;

        let reduce_start = Instant::now();
        let mut out: Vec<R::Out> = Vec::new();
        let mut groups: u64 = 0;
        let mut start = 0usize;
        while start < entries.len() {
            let mut end = start + 1;
            while end < entries.len() && (shuffle.group)(&entries[end - 1].key, &entries[end].key) {
                end += 1;
            }
            let values = entries[start..end]
                .iter()
                .map(|e| <R::ValueIn as Wire>::decode(&segments[e.segment][e.value.clone()]))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("reduce {r}: shuffle value"))?;
            reducer
                .do_reduce(&entries[start].key, values, counters, &mut |o| out.push(o))
                .with_context(|| format!("reduce task {r}"))?;
            groups += 1;
            start = end;
        }

        let stats = ReduceTaskStats {
            reducer: r,
            records_in: entries.len() as u64,
            groups,
            records_out: out.len() as u64,
            sort_ms,
            reduce_ms: reduce_start.elapsed().as_millis() as u64,
            wall_ms: reducer_start.elapsed().as_millis() as u64,
        };
        debug!(reducer = r, records_in = stats.records_in, groups, sort_ms, "reduce task done");
        Ok((out, stats))
    }
}

/// File-backed pipeline: container files in, `part-NNNNN.jnr` containers out.
pub struct RuntimePipeline {
    runtime: LocalRuntime,
    inputs: Vec<String>,
    output: Option<String>,
}

impl RuntimePipeline {
    pub fn new(runtime: LocalRuntime) -> Self { Self { runtime, inputs: vec![], output: None } }

    fn load_splits(&self) -> Result<Vec<Vec<Any>>> {
        let mut splits = Vec::new();
        for input in &self.inputs {
            let files = list_files_recursive(input).with_context(|| format!("list input {input}"))?;
            if files.is_empty() {
                bail!("input {input} contains no files");
            }
            for file in files {
                let values = read_container_values(&file).with_context(|| format!("read {}", file.display()))?;
                debug!(file = %file.display(), records = values.len(), "loaded input split");
                splits.push(values);
            }
        }
        Ok(splits)
    }
}

impl ExecutablePipeline for RuntimePipeline {
    fn add_input(&mut self, input_path: impl Into<String>) { self.inputs.push(input_path.into()); }

    fn add_output(&mut self, output_path: impl Into<String>) { self.output = Some(output_path.into()); }

    fn map_reduce<M, R>(&mut self, mapper: M, reducer: R, shuffle: Shuffle<M::Key>, counters: &dyn CounterSink) -> Result<JobStats>
    where
        M: Mapper + Sync,
        R: Reducer<Key = M::Key, ValueIn = M::Value, Out = Any> + Sync,
    {
        let output_dir = self.output.clone().context("output not set")?;
        let splits = self.load_splits()?;
        let output = self.runtime.run(splits, &mapper, &reducer, shuffle, counters)?;
        if output.is_empty() {
            warn!(output = %output_dir, "job produced no records");
        }

        // Prepare output directory (clean it before writing)
        if Path::new(&output_dir).exists() {
            fs::remove_dir_all(&output_dir).with_context(|| format!("clear {output_dir}"))?;
        }
        ensure_dir(&output_dir)?;
        let keep_empty = self.runtime.config().keep_empty_parts;
        for (r, records) in output.partitions.iter().enumerate() {
            if records.is_empty() && !keep_empty {
                continue;
            }
            let path = format!("{}/part-{:05}.jnr", output_dir, r);
            write_container(&path, records)?;
        }
        info!(output = %output_dir, records = output.len(), "output written");
        Ok(output.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{Counter, Counters, NoopCounters};
    use crate::record::Session;

    /// Emits (uid, url) per session.
    struct UidMapper;

    impl Mapper for UidMapper {
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
                if let Some(s) = rec.session {
                    counters.incr(Counter::InputSession, 1);
                    emit(s.uid, Any::url(s.url));
                }
            }
            Ok(())
        }
    }

    /// Emits "uid:url1,url2" per group.
    struct ConcatReducer;

    impl Reducer for ConcatReducer {
        type Key = i64;
        type ValueIn = Any;
        type Out = String;

        fn do_reduce<I, F>(&self, key: &i64, values: I, _counters: &dyn CounterSink, emit: &mut F) -> Result<(), JoinError>
        where
            I: IntoIterator<Item = Any>,
            F: FnMut(String),
        {
            let urls: Vec<String> = values.into_iter().filter_map(|v| v.url).collect();
            emit(format!("{}:{}", key, urls.join(",")));
            Ok(())
        }
    }

    fn runtime(reducers: usize) -> LocalRuntime {
        LocalRuntime::new(RuntimeConfig::default().with_reducers(reducers).with_threads(2)).unwrap()
    }

    fn sessions(items: &[(i64, &str)]) -> Vec<Any> {
        items.iter().map(|(uid, url)| Any::session(Session::new(*uid, *url, vec![]))).collect()
    }

    #[test]
    fn groups_by_key_across_splits() {
        let counters = Counters::new();
        let splits = vec![sessions(&[(1, "a"), (2, "b")]), sessions(&[(1, "c")]), vec![]];
        let out = runtime(3).run(splits, &UidMapper, &ConcatReducer, Shuffle::natural(), &counters).unwrap();
        assert_eq!(out.partitions.len(), 3);
        let mut records = out.into_records();
        records.sort();
        assert_eq!(records, vec!["1:a,c".to_string(), "2:b".to_string()]);
        assert_eq!(counters.get(Counter::InputSession), 3);
    }

    #[test]
    fn stats_track_records() {
        let splits = vec![sessions(&[(1, "a"), (2, "b"), (2, "c")])];
        let out = runtime(2).run(splits, &UidMapper, &ConcatReducer, Shuffle::natural(), &NoopCounters).unwrap();
        assert_eq!(out.stats.map.tasks, 1);
        assert_eq!(out.stats.map.total_emits, 3);
        assert_eq!(out.stats.reduce.total_records_in, 3);
        assert_eq!(out.stats.reduce.total_groups, 2);
        assert_eq!(out.stats.reduce.total_records_out, 2);
    }

    #[test]
    fn custom_group_comparator_merges_keys() {
        // group keys by parity: 1 and 3 share a group, 2 and 4 share another
        let shuffle = Shuffle::<i64> {
            partition: |_, _| 0,
            sort: |a, b| (a % 2).cmp(&(b % 2)).then(a.cmp(b)),
            group: |a, b| a % 2 == b % 2,
        };
        let splits = vec![sessions(&[(3, "c"), (2, "b"), (1, "a"), (4, "d")])];
        let out = runtime(1).run(splits, &UidMapper, &ConcatReducer, shuffle, &NoopCounters).unwrap();
        assert_eq!(out.into_records(), vec!["2:b,d".to_string(), "1:a,c".to_string()]);
    }

    #[test]
    fn out_of_range_partition_aborts() {
        let shuffle = Shuffle::<i64> { partition: |_, n| n, sort: |a, b| a.cmp(b), group: |a, b| a == b };
        let err = runtime(2).run(vec![sessions(&[(1, "a")])], &UidMapper, &ConcatReducer, shuffle, &NoopCounters).unwrap_err();
        assert!(format!("{err:#}").contains("partitioner returned 2"));
    }

    #[test]
    fn zero_reducers_rejected() {
        for config in [RuntimeConfig::default().with_reducers(0), RuntimeConfig::default().with_threads(0)] {
            let err = LocalRuntime::new(config).unwrap_err();
            assert!(matches!(err.downcast_ref::<JoinError>(), Some(JoinError::Config(_))), "{err:#}");
        }
    }
}
