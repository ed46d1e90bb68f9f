pub mod api;
pub mod bloom;
pub mod constants;
pub mod counters;
pub mod enrich;
pub mod error;
pub mod io;
pub mod join_key;
pub mod record;
pub mod reference;
pub mod runtime;
pub mod select;
pub mod stats;
pub mod utils;
pub mod wire;

pub use api::{ExecutablePipeline, Mapper, Reducer, Shuffle};
pub use bloom::{BloomConfig, BloomFilter};
pub use counters::{Counter, CounterReport, CounterSink, Counters, NoopCounters};
pub use enrich::{run_enrich, run_enrich_pipeline, BufferedEnrichReducer, EnrichMapper, EnrichReducer, EnrichStrategy};
pub use error::{FormatError, JoinError};
pub use join_key::{JoinKey, ValueKind};
pub use record::{Any, Session, User};
pub use reference::{ReferenceSource, SortedUrls};
pub use runtime::{JobOutput, LocalRuntime, RuntimeConfig, RuntimePipeline};
pub use select::{run_select, run_select_pipeline, SelectStrategy, UrlHash};
pub use stats::JobStats;
pub use wire::Wire;
