//! Routewise CLI - adaptive routing engine configuration and simulation

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use rand::prelude::*;
use rand_distr::LogNormal;
use routewise_core::config::Config;
use routewise_core::routing::{
    Candidate, ExecutionOutcome, Executor, RequestFeatures, RouteRequest, RoutingEngine,
    RoutingEngineBuilder,
};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "routewise")]
#[command(author, version, about = "Adaptive routing engine for interchangeable backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run the engine against simulated backends
    Simulate {
        /// Number of requests to route
        #[arg(short, long, default_value_t = 200)]
        requests: usize,
        /// Seed for exploration and simulated backends
        #[arg(short, long)]
        seed: Option<u64>,
        /// Task type used to key learned scores
        #[arg(short, long, default_value = "chat")]
        task_type: String,
        /// Override every backend's failure probability (0.0 to 1.0)
        #[arg(long)]
        failure_rate: Option<f64>,
        /// Requests dispatched concurrently per batch
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("routewise=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => cmd_config(action, cli.format, cli.quiet),
        Commands::Simulate {
            requests,
            seed,
            task_type,
            failure_rate,
            concurrency,
        } => {
            let options = SimulateOptions {
                requests,
                seed,
                task_type,
                failure_rate,
                concurrency,
            };
            cmd_simulate(options, cli.format, cli.quiet).await
        }
    }
}

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "key": key, "value": value }));
            } else {
                println!("{}", value);
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if format == OutputFormat::Json {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::String(value)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

struct SimulateOptions {
    requests: usize,
    seed: Option<u64>,
    task_type: String,
    failure_rate: Option<f64>,
    concurrency: usize,
}

/// Behaviour of one simulated backend
#[derive(Debug, Clone)]
struct BackendProfile {
    median_latency_ms: f64,
    latency_sigma: f64,
    cost_usd: f64,
    failure_probability: f64,
}

/// Executor that draws outcomes from per-backend distributions
struct SimulatedExecutor {
    backends: HashMap<Candidate, (BackendProfile, LogNormal<f64>)>,
    rng: Mutex<StdRng>,
}

impl SimulatedExecutor {
    fn new(profiles: Vec<(Candidate, BackendProfile)>, seed: Option<u64>) -> anyhow::Result<Self> {
        let mut backends = HashMap::new();
        for (candidate, profile) in profiles {
            let latency = LogNormal::new(profile.median_latency_ms.ln(), profile.latency_sigma)
                .map_err(|e| anyhow::anyhow!("Invalid latency profile for {}: {}", candidate, e))?;
            backends.insert(candidate, (profile, latency));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            backends,
            rng: Mutex::new(rng),
        })
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(
        &self,
        candidate: &Candidate,
        _request: &RouteRequest,
    ) -> routewise_core::Result<ExecutionOutcome> {
        let (profile, latency) = self.backends.get(candidate).ok_or_else(|| {
            routewise_core::Error::ExecutionFailed(format!("unknown backend {}", candidate))
        })?;

        let mut rng = self
            .rng
            .lock()
            .map_err(|_| routewise_core::Error::Other("simulation rng poisoned".to_string()))?;

        let latency_ms = latency.sample(&mut *rng).round() as u64;
        if rng.r#gen::<f64>() < profile.failure_probability {
            debug!(candidate = %candidate, latency_ms, "Simulated failure");
            return Ok(ExecutionOutcome::failure(latency_ms));
        }

        let cost = profile.cost_usd * rng.gen_range(0.8..1.2);
        Ok(ExecutionOutcome::success(latency_ms, cost))
    }
}

fn default_backends(failure_rate: Option<f64>) -> Vec<(Candidate, BackendProfile)> {
    let profile = |median_latency_ms, latency_sigma, cost_usd, failure_probability: f64| {
        BackendProfile {
            median_latency_ms,
            latency_sigma,
            cost_usd,
            failure_probability: failure_rate.unwrap_or(failure_probability),
        }
    };

    vec![
        (
            Candidate::new("anthropic", "claude-3-5-haiku"),
            profile(450.0, 0.35, 0.0012, 0.02),
        ),
        (
            Candidate::new("openai", "gpt-4o-mini"),
            profile(380.0, 0.5, 0.0009, 0.04),
        ),
        (
            Candidate::new("local", "llama-3-8b"),
            profile(900.0, 0.6, 0.0001, 0.08),
        ),
    ]
}

#[derive(Serialize)]
struct SimulationSummary {
    requests: usize,
    served: usize,
    failed: usize,
    failovers: usize,
    exploration_rate: f64,
    served_by: Vec<(String, usize)>,
    circuits: Vec<CircuitSummary>,
    metrics: routewise_core::tracker::BusinessMetrics,
}

#[derive(Serialize)]
struct CircuitSummary {
    candidate: String,
    phase: String,
    failure_count: u32,
}

async fn cmd_simulate(
    options: SimulateOptions,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    if let Some(rate) = options.failure_rate {
        if !(0.0..=1.0).contains(&rate) {
            anyhow::bail!("--failure-rate must be between 0.0 and 1.0, got {}", rate);
        }
    }
    if options.concurrency == 0 {
        anyhow::bail!("--concurrency must be at least 1");
    }

    let config = Config::load()?;
    let mut builder = RoutingEngineBuilder::new().config(config);
    if let Some(seed) = options.seed {
        builder = builder.seed(seed);
    }
    let engine = Arc::new(builder.build());

    let backends = default_backends(options.failure_rate);
    let candidates: Vec<Candidate> = backends.iter().map(|(c, _)| c.clone()).collect();
    let executor = SimulatedExecutor::new(backends, options.seed)?;

    info!(
        requests = options.requests,
        task_type = %options.task_type,
        backends = candidates.len(),
        "Starting simulation"
    );

    let mut served_by: HashMap<Candidate, usize> = HashMap::new();
    let mut failed = 0;
    let mut failovers = 0;

    let mut remaining = options.requests;
    let mut index = 0;
    while remaining > 0 {
        let batch = remaining.min(options.concurrency);
        let dispatches = (0..batch).map(|offset| {
            let request = simulated_request(&options.task_type, index + offset);
            let engine = Arc::clone(&engine);
            let executor = &executor;
            let candidates = &candidates;
            async move { engine.dispatch(executor, candidates, &request).await }
        });

        for result in join_all(dispatches).await {
            match result {
                Ok(dispatch) => {
                    *served_by.entry(dispatch.candidate).or_default() += 1;
                    if dispatch.failed_over {
                        failovers += 1;
                    }
                }
                Err(err) => {
                    debug!(error = %err, code = err.code(), "Simulated request failed");
                    failed += 1;
                }
            }
        }

        remaining -= batch;
        index += batch;
    }

    let trained = engine.train_predictor();
    debug!(examples = trained, "Trained predictor after simulation");

    let summary = summarize(&engine, &candidates, options.requests, served_by, failed, failovers);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text if !quiet => print_summary(&engine, &summary),
        OutputFormat::Text => {}
    }
    Ok(())
}

/// Request features vary with the request index so every multiplier gets exercised
fn simulated_request(task_type: &str, index: usize) -> RouteRequest {
    let prompt_length = 200 + (index * 137) % 2400;
    let complexity = ((index * 31) % 100) as f64 / 100.0;
    let hour_of_day = (index % 24) as u32;
    RouteRequest::new(task_type).with_features(RequestFeatures::new(
        prompt_length,
        complexity,
        hour_of_day,
    ))
}

fn summarize(
    engine: &RoutingEngine,
    candidates: &[Candidate],
    requests: usize,
    served_by: HashMap<Candidate, usize>,
    failed: usize,
    failovers: usize,
) -> SimulationSummary {
    let status = engine.circuit_breaker().status();
    let circuits = candidates
        .iter()
        .map(|candidate| CircuitSummary {
            candidate: candidate.to_string(),
            phase: engine.circuit_breaker().phase(candidate).to_string(),
            failure_count: status.get(candidate).map(|s| s.failure_count).unwrap_or(0),
        })
        .collect();

    let served_by = candidates
        .iter()
        .map(|c| (c.to_string(), served_by.get(c).copied().unwrap_or(0)))
        .collect();

    SimulationSummary {
        requests,
        served: requests - failed,
        failed,
        failovers,
        exploration_rate: engine.optimizer().exploration_rate(),
        served_by,
        circuits,
        metrics: engine.tracker().metrics(),
    }
}

fn print_summary(engine: &RoutingEngine, summary: &SimulationSummary) {
    println!("Simulation Summary:");
    println!("  Requests: {}", summary.requests);
    println!("  Served: {}", summary.served);
    println!("  Failed: {}", summary.failed);
    println!("  Failovers: {}", summary.failovers);
    println!("  Exploration rate: {:.4}", summary.exploration_rate);
    println!();

    println!("Served By:");
    for (candidate, count) in &summary.served_by {
        println!("  {}: {}", candidate, count);
    }
    println!();

    println!("Circuit Status:");
    for circuit in &summary.circuits {
        println!(
            "  {}: {} ({} recent failures)",
            circuit.candidate, circuit.phase, circuit.failure_count
        );
    }
    println!();

    println!("{}", engine.tracker().generate_business_impact_report());
}
