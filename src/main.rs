//! siga-notify: the SIGA notification bell as a background process.
//!
//! Usage: `siga-notify [run|list|dismiss <id>]`
//! Reads ~/.siga/config.json and keeps dismissals and sent slots in
//! ~/.siga/storage.json.

use env_logger::Env;

use siga_notify_lib::build_aggregator;
use siga_notify_lib::notifications::LoadOutcome;
use siga_notify_lib::state::load_config;

enum Command {
    Run,
    List,
    Dismiss(String),
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Command> {
    match args.next().as_deref() {
        None | Some("run") => Ok(Command::Run),
        Some("list") => Ok(Command::List),
        Some("dismiss") => match args.next() {
            Some(id) if !id.trim().is_empty() => Ok(Command::Dismiss(id)),
            _ => anyhow::bail!("usage: siga-notify dismiss <id>"),
        },
        Some(other) => anyhow::bail!("unknown command '{other}' (expected run, list or dismiss <id>)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let command = parse_args(std::env::args().skip(1))?;
    let config = load_config().map_err(|e| {
        anyhow::anyhow!("Failed to load SIGA config: {e}. {}", e.recovery_suggestion())
    })?;
    let aggregator = build_aggregator(&config)?;

    match command {
        Command::Run => {
            aggregator.start().await;
            if let Some(at) = aggregator.next_push_at() {
                log::info!("Next scheduled push at {}", at);
            }
            tokio::signal::ctrl_c().await?;
            aggregator.stop();
        }
        Command::List => {
            if let LoadOutcome::Failed = aggregator.open_dialog().await {
                log::warn!("Every notification source failed");
            }
            print!("{}", aggregator.render_dialog());
        }
        Command::Dismiss(id) => {
            aggregator.dismiss_notification(&id);
            println!("Dismissed {} for 30 days", id.trim());
        }
    }

    Ok(())
}
