//! Workload driver for the event pipeline.
//!
//! Spawns worker threads hammering one gauge, then reports how many events
//! the aggregator processed and where the queue ended up.

use clap::Parser;
use handystats::chrono::{tsc_clock, TimeUnit};
use std::process::ExitCode;
use std::thread;

const DEFAULT_CONFIG: &str = r#"{ "enable": true, "events": { "values": { "tags": ["count"] } } }"#;

/// Event throughput workload for handystats.
#[derive(Parser, Debug)]
#[command(name = "handystats-bench")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Number of worker threads
    #[arg(long, default_value_t = 1)]
    threads: u64,

    /// Number of events emitted by each thread
    #[arg(long, default_value_t = 1)]
    events: u64,

    /// Handystats configuration (in JSON format)
    #[arg(long = "handystats-config")]
    handystats_config: Option<String>,
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .try_init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            eprintln!("ERROR: {error}");
            return ExitCode::from(1);
        },
    };

    init_logging();

    if cli.threads == 0 {
        eprintln!("ERROR: number of threads must be greater than 0");
        return ExitCode::from(1);
    }
    if cli.events == 0 {
        eprintln!("ERROR: number of events must be greater than 0");
        return ExitCode::from(1);
    }

    let config = cli.handystats_config.as_deref().unwrap_or(DEFAULT_CONFIG);
    if let Err(error) = handystats::config_json(config) {
        eprintln!("ERROR: {error}");
        return ExitCode::from(1);
    }
    if let Err(error) = handystats::initialize() {
        eprintln!("ERROR: {error}");
        return ExitCode::from(1);
    }

    let events = cli.events;
    let start = tsc_clock::now();

    let workers: Vec<_> = (1..=cli.threads)
        .map(|id| {
            thread::spawn(move || {
                let mut value = id as f64;
                for i in 1..=events {
                    value *= (i + id) as f64;
                    handystats::gauge_set("events", value);
                }
            })
        })
        .collect();

    for worker in workers {
        if worker.join().is_err() {
            eprintln!("ERROR: worker thread panicked");
            return ExitCode::from(1);
        }
    }

    let end = tsc_clock::now();

    // Drains the queue and publishes the final snapshot.
    handystats::finalize();

    let elapsed_ms = end.elapsed_since(&start).count_as(TimeUnit::Millisecond);
    println!("Workers time: {:.3}s", elapsed_ms as f64 / 1_000.0);
    println!("Total events: {}", cli.threads * cli.events);

    let dump = handystats::metrics_dump();
    match dump.get("events").and_then(|metric| metric.values().count()) {
        Ok(count) => println!("Processed events: {count}"),
        Err(error) => println!("Processed events: unavailable ({error})"),
    }
    match dump
        .get(handystats::QUEUE_SIZE_METRIC)
        .and_then(|metric| metric.values().value())
    {
        Ok(size) => println!("Queue size: {size}"),
        Err(error) => println!("Queue size: unavailable ({error})"),
    }

    ExitCode::SUCCESS
}
