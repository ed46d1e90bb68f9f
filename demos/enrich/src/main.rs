use anyhow::Result;
use clap::Parser;
use joinery::{run_enrich_pipeline, Counters, EnrichStrategy, ExecutablePipeline, LocalRuntime, RuntimeConfig, RuntimePipeline};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Attach each user record to every session sharing its uid.
#[derive(Parser, Debug)]
struct Args {
    /// Session container file or directory
    #[arg(long)]
    sessions: String,
    /// User container file or directory
    #[arg(long)]
    users: String,
    /// Output directory
    #[arg(long)]
    output: String,
    /// buffered or secondary-sort
    #[arg(long, default_value = "secondary-sort")]
    strategy: EnrichStrategy,
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
    info!(strategy = %args.strategy, "starting enrich");

    let mut pipeline = RuntimePipeline::new(LocalRuntime::new(config)?);
    pipeline.add_input(&args.sessions);
    pipeline.add_input(&args.users);
    pipeline.add_output(&args.output);

    let counters = Counters::new();
    let result = run_enrich_pipeline(&mut pipeline, args.strategy, &counters);
    println!("{}", serde_json::to_string_pretty(&counters.report())?);
    let stats = result.inspect_err(|e| error!("enrich failed: {:#}", e))?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
