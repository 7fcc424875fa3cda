//! Probe a running server

use anyhow::Result;
use apphost_harness::{HarnessConfig, HttpProbe};
use clap::Args;

#[derive(Args)]
pub struct ProbeArgs {
    /// URL to GET
    pub url: String,

    /// Total attempts (default from configuration)
    #[arg(long)]
    pub attempts: Option<usize>,

    /// Delay between attempts in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

pub async fn execute(args: ProbeArgs, config: HarnessConfig) -> Result<()> {
    let mut policy = config.probe;
    if let Some(delay_ms) = args.delay_ms {
        policy.delay_ms = delay_ms;
    }
    let attempts = args.attempts.unwrap_or(policy.max_attempts);

    let body = HttpProbe::new(policy)?.get_with_retry(&args.url, attempts).await?;
    println!("{}", body);
    Ok(())
}
