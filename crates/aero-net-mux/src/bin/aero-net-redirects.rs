//! Prints the redirects a NAT session would register for a backend and redirect configuration.
//!
//! ```text
//! aero-net-redirects --backend slirp_inbound --redirect tcp::2222 --redirect udp:5353:53
//! AERO_NET_REDIRECTS=tcp:8080:80 aero-net-redirects --json
//! ```
#![forbid(unsafe_code)]

use std::path::PathBuf;

use aero_net_mux::config::REDIRECTS_ENV;
use aero_net_mux::{
    plan_redirects, BackendDescriptor, NetConfig, RedirectRule, DEFAULT_GUEST_ADDR,
};
use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "aero-net-redirects", version, about)]
struct Args {
    /// NAT backend name (`slirp` or `slirp_inbound`, case-insensitive).
    #[arg(long, default_value = "slirp_inbound")]
    backend: String,

    /// JSON network config (`{"redirects": [...]}`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra redirect rule, `proto:[host_port]:guest_port[:guest_addr]`. Repeatable.
    #[arg(long = "redirect")]
    redirects: Vec<RedirectRule>,

    /// Print the plan as JSON.
    #[arg(long)]
    json: bool,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `AERO_NET_LOG_LEVEL`.
    #[arg(long, env = "AERO_NET_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> anyhow::Result<NetConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            NetConfig::from_json_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => NetConfig::from_env().with_context(|| format!("parsing {REDIRECTS_ENV}"))?,
    };
    for rule in &args.redirects {
        config.redirects.try_push(*rule)?;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let descriptor = [BackendDescriptor::nat_outbound(), BackendDescriptor::nat_inbound()]
        .into_iter()
        .find(|d| d.matches_name(&args.backend));
    let Some(descriptor) = descriptor else {
        bail!("`{}` is not a NAT backend", args.backend);
    };

    let config = load_config(&args)?;
    tracing::info!(
        backend = descriptor.name(),
        rules = config.redirects.len(),
        "planning redirects"
    );

    let plan = plan_redirects(config.redirects.rules(), descriptor.kind(), DEFAULT_GUEST_ADDR);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    if plan.is_empty() {
        println!("{}: no redirects", descriptor.name());
    }
    for r in &plan {
        println!(
            "{:?} host:{} -> {}:{} ({:?})",
            r.transport, r.host_port, r.guest_addr, r.guest_port, r.origin
        );
    }
    Ok(())
}
