use serde::Serialize;

#[derive(Clone, Debug)]
pub struct MapTaskStats {
    pub task_id: usize,
    pub records_in: u64,
    pub emits: u64,
    pub bytes_out: u64,
    pub wall_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ReduceTaskStats {
    pub reducer: usize,
    pub records_in: u64,
    pub groups: u64,
    pub records_out: u64,
    pub sort_ms: u64,
    pub reduce_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct MapStats {
    pub tasks: usize,
    pub total_records_in: u64,
    pub total_emits: u64,
    pub total_bytes_out: u64,
    pub min_task_ms: u64,
    pub max_task_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct ReduceStats {
    pub reducers: usize,
    pub total_records_in: u64,
    pub total_groups: u64,
    pub total_records_out: u64,
    pub min_reducer_ms: u64,
    pub max_reducer_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct JobStats {
    pub map: MapStats,
    pub reduce: ReduceStats,
}

impl MapStats {
    pub fn aggregate(per_task: &[MapTaskStats], wall_ms: u64) -> Self {
        Self {
            tasks: per_task.len(),
            total_records_in: per_task.iter().map(|t| t.records_in).sum(),
            total_emits: per_task.iter().map(|t| t.emits).sum(),
            total_bytes_out: per_task.iter().map(|t| t.bytes_out).sum(),
            min_task_ms: per_task.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_task_ms: per_task.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        }
    }
}

impl ReduceStats {
    pub fn aggregate(per_reducer: &[ReduceTaskStats], wall_ms: u64) -> Self {
        Self {
            reducers: per_reducer.len(),
            total_records_in: per_reducer.iter().map(|r| r.records_in).sum(),
            total_groups: per_reducer.iter().map(|r| r.groups).sum(),
            total_records_out: per_reducer.iter().map(|r| r.records_out).sum(),
            min_reducer_ms: per_reducer.iter().map(|r| r.wall_ms).min().unwrap_or(0),
            max_reducer_ms: per_reducer.iter().map(|r| r.wall_ms).max().unwrap_or(0),
            wall_ms,
        }
    }
}
