use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use regionpace::config::RegionPaceConfig;
use regionpace::ratelimit::{parse_descriptor, Clock, ManualClock, RegionHistory, SystemClock};

/// Plan and check request pacing against multi-tier API quotas.
#[derive(Parser, Debug)]
#[command(name = "regionpace", version, about)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, default_value = "regionpace.yaml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate a burst of requests and print when each one may be sent
    Plan {
        /// Region to simulate
        #[arg(short, long)]
        region: String,

        /// Endpoint identifier
        #[arg(short, long)]
        endpoint: String,

        /// Endpoint limits descriptor, e.g. "2000:10"
        #[arg(short, long)]
        method_limits: String,

        /// Number of requests to the endpoint
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: u32,

        /// Print the schedule as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a limits descriptor
    CheckDescriptor {
        /// Descriptor such as "20:1,100:120"
        descriptor: String,
    },
}

#[derive(Debug, Serialize)]
struct PlannedRequest {
    index: u32,
    offset_secs: i64,
    waited_secs: u64,
}

/// Send `requests` requests to `endpoint` as early as the quotas allow.
///
/// Time only moves through `clock`, so the result is the earliest schedule
/// the tracker would permit. The region's seed request is not part of it.
fn plan_schedule(
    history: &mut RegionHistory,
    clock: &ManualClock,
    endpoint: &str,
    method_limits: &str,
    requests: u32,
) -> regionpace::error::Result<Vec<PlannedRequest>> {
    let start = clock.now();
    let mut schedule = Vec::with_capacity(requests as usize);
    for index in 1..=requests {
        let mut waited_secs = 0;
        loop {
            let wait = history.validate_request(endpoint);
            if wait == 0 {
                break;
            }
            clock.advance(wait);
            waited_secs += wait;
        }
        history.insert_request(clock.now(), endpoint, method_limits)?;
        schedule.push(PlannedRequest {
            index,
            offset_secs: clock.now() - start,
            waited_secs,
        });
    }
    Ok(schedule)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Command::CheckDescriptor { descriptor } => {
            let tiers = parse_descriptor(&descriptor)?;
            for tier in tiers {
                println!("{} requests per {}s", tier.limit, tier.duration);
            }
        }
        Command::Plan {
            region,
            endpoint,
            method_limits,
            requests,
            json,
        } => {
            let config = RegionPaceConfig::load(&cli.config)?;
            let tiers = config.region(&region)?.tiers()?;
            let method_tiers = parse_descriptor(&method_limits)?;
            if tiers.iter().chain(&method_tiers).any(|tier| tier.limit == 0) {
                anyhow::bail!("cannot plan against a tier with a zero limit");
            }

            let start = SystemClock.now();
            let clock = Arc::new(ManualClock::new(start));
            let mut history = RegionHistory::from_tiers(region.as_str(), &tiers, start, clock.clone());
            info!(region = %region, endpoint = %endpoint, requests, "Planning schedule");

            let schedule = plan_schedule(&mut history, &clock, &endpoint, &method_limits, requests)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&schedule)?);
            } else {
                println!("application tiers seeded at t+0");
                for request in &schedule {
                    println!(
                        "#{:<4} t+{:>6}s  (waited {}s)",
                        request.index, request.offset_secs, request.waited_secs
                    );
                }
            }
        }
    }

    Ok(())
}
