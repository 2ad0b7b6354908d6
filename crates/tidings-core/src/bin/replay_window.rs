use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tidings_core::replay::{describe, replay, Fixture};
use tidings_core::tracing_setup::init_tracing;

#[derive(Parser)]
#[command(name = "replay-window")]
#[command(about = "Replay a message window against a JSON fixture")]
struct Cli {
    /// Fixture with params, hot messages, archives and events
    #[arg(long, short = 'f')]
    fixture: PathBuf,

    /// Print each window's messages as JSON instead of a summary line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let fixture = Fixture::from_path(&cli.fixture)?;
    println!(
        "Replaying {} hot messages, {} archives, {} events",
        fixture.messages.len(),
        fixture.archives.len(),
        fixture.events.len()
    );

    let windows = replay(&fixture).await;
    for (i, window) in windows.iter().enumerate() {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(window.items())?);
        } else {
            println!("#{} {}", i + 1, describe(window));
        }
    }

    Ok(())
}
