//! Connect to Telegram, discover the DC table and ping the main DC.
//!
//! # What this does
//!
//! 1. Load a saved session state (auth keys, salts) if one exists
//! 2. Start an [`Instance`]: the main DC negotiates an auth key if it has none,
//!    then answers `help.getConfig`
//! 3. Print the DC table and ping the main DC
//! 4. Save the session state for the next run
//!
//! # Run
//! ```text
//! cargo run -p mtp-connect -- --test --state connect.session
//! ```

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use mtp_sender::{Config, Instance, Target, TransportKind};
use mtp_session::PersistedState;
use mtp_tl::{enums, functions};

// ── Command line ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq, Parser)]
#[command(name = "connect", about = "Connect to Telegram, print the DC table and ping the main DC")]
struct Options {
    /// Use the test DCs
    #[arg(long = "test")]
    test_mode:  bool,
    /// Main DC id
    #[arg(long = "dc", value_name = "ID")]
    main_dc:    Option<i32>,
    /// Session state file, read on start and written on exit
    #[arg(long, value_name = "PATH")]
    state:      Option<PathBuf>,
    /// Use the obfuscated transport
    #[arg(long)]
    obfuscated: bool,
}

impl Options {
    async fn config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = Config { test_mode: self.test_mode, ..Default::default() };
        if let Some(dc) = self.main_dc {
            config.main_dc = dc;
        }
        if self.obfuscated {
            config.transport = TransportKind::Obfuscated { secret: None };
        }
        if let Some(path) = &self.state {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let state = PersistedState::from_bytes(&bytes)?;
                    log::info!("loaded state for {} DCs from {}", state.dcs.len(), path.display());
                    config.state = Some(state);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(config)
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("mtp_sender=info,connect=info"))
        .init();
    if let Err(e) = run().await {
        eprintln!("✗ {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Options::parse();
    let config = opts.config().await?;

    println!("Connecting…");
    let started = Instant::now();
    let instance = Instance::connect(config).await?;
    println!("✓ Connected in {:?}", started.elapsed());

    let dcs = instance.current_config();
    println!("  {} addresses ({:?})", dcs.addresses.len(), dcs.source);
    for addr in dcs.addresses.iter().take(8) {
        let media = if addr.media_only { " (media)" } else { "" };
        println!("    DC{} {}{media}", addr.dc_id, addr.addr);
    }

    let sent = Instant::now();
    let enums::Pong::Pong(pong) = instance
        .invoke(&functions::Ping { ping_id: 0x6d7470 }, Target::Main)
        .await?;
    println!("✓ Pong {:#x} in {:?}", pong.ping_id, sent.elapsed());

    let state = instance.export_state().await?;
    if let Some(path) = &opts.state {
        tokio::fs::write(path, state.to_bytes()).await?;
        println!("✓ Saved state for {} DCs to {}", state.dcs.len(), path.display());
    }

    instance.shutdown();
    Ok(())
}
