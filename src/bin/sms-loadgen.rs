//! Fires fixed test messages at the relay from a number of virtual users and
//! prints a latency/status summary.

use std::time::Duration;

use clap::Parser;
use log::info;

use sms_relay::loadgen::{self, Emitter, Plan, Profile, Stop};

#[derive(Parser, Debug)]
#[command(name = "sms-loadgen")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Target endpoint
    #[arg(long, default_value = loadgen::DEFAULT_URL)]
    url: String,

    /// Recipient set to send per iteration
    #[arg(long, value_enum, default_value_t = Profile::Burst)]
    profile: Profile,

    /// Concurrent virtual users
    #[arg(long, default_value_t = 1)]
    vus: usize,

    /// Iterations per virtual user
    #[arg(long, default_value_t = 1, conflicts_with = "duration")]
    iterations: usize,

    /// Run for this many seconds instead of a fixed iteration count
    #[arg(long)]
    duration: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init_timed();

    let cli = Cli::parse();

    let stop = match cli.duration {
        Some(secs) if secs.is_finite() && secs > 0.0 => Stop::After(Duration::from_secs_f64(secs)),
        Some(secs) => anyhow::bail!("--duration must be a positive number of seconds, got {}", secs),
        None => Stop::Iterations(cli.iterations),
    };
    let plan = Plan { vus: cli.vus, stop };

    info!(
        "{} virtual user(s), profile {:?}, {:?} against {}",
        plan.vus, cli.profile, plan.stop, cli.url
    );

    let emitter = Emitter::new(cli.url);
    let report = loadgen::run(&emitter, plan, cli.profile).await;

    print!("{}", report);

    Ok(())
}
