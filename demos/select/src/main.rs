use anyhow::Result;
use clap::Parser;
use joinery::{run_select_pipeline, BloomConfig, Counters, ExecutablePipeline, LocalRuntime, ReferenceSource, RuntimeConfig, RuntimePipeline, SelectStrategy};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Keep the sessions whose url appears in a reference set.
#[derive(Parser, Debug)]
struct Args {
    /// Session container file or directory
    #[arg(long)]
    sessions: String,
    /// Reference url container file or directory
    #[arg(long)]
    urls: String,
    /// Output directory
    #[arg(long)]
    output: String,
    /// sorted-list, hash-join or bloom
    #[arg(long, default_value = "bloom")]
    strategy: SelectStrategy,
    /// Reduce partitions (overrides JOINERY_NUM_REDUCERS)
    #[arg(long)]
    reducers: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut config = RuntimeConfig::from_env();
    if let Some(reducers) = args.reducers {
        config = config.with_reducers(reducers);
    }
    let bloom = BloomConfig::from_env();
    info!(strategy = %args.strategy, num_bits = bloom.num_bits, num_hashes = bloom.num_hashes, "starting select");

    let mut pipeline = RuntimePipeline::new(LocalRuntime::new(config)?);
    pipeline.add_input(&args.sessions);
    if args.strategy.shuffles_reference() {
        pipeline.add_input(&args.urls);
    }
    pipeline.add_output(&args.output);

    let counters = Counters::new();
    let reference = ReferenceSource::file(&args.urls);
    let result = run_select_pipeline(&mut pipeline, args.strategy, &reference, bloom, &counters);
    println!("{}", serde_json::to_string_pretty(&counters.report())?);
    let stats = result.inspect_err(|e| error!("select failed: {:#}", e))?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
