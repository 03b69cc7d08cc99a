// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coreflash_cli::commands::{erase, flash, info, init, inspect, verify};

#[derive(Parser)]
#[command(name = "coreflash")]
#[command(about = "Slot-based flash reprogramming tool for multi-core FPGA devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show device geometry and per-slot core headers
    Info {
        /// Path to the flash image file
        flash: PathBuf,

        /// Slot size in MiB
        #[arg(long, default_value_t = 1)]
        slot_mib: u32,
    },
    /// Check a core file's header and checksum without touching flash
    Verify {
        core: PathBuf,

        /// Emit a machine-readable report
        #[arg(long)]
        json: bool,
    },
    /// Create a blank flash image file
    Init {
        flash: PathBuf,

        /// Device size in MiB
        #[arg(long, default_value_t = 8)]
        size_mib: u32,
    },
    /// Load, verify and flash a core file into a slot
    Flash {
        flash: PathBuf,
        core: PathBuf,

        /// Target slot (0 is the recovery slot)
        #[arg(long, short)]
        slot: u8,

        /// Slot size in MiB
        #[arg(long, default_value_t = 1)]
        slot_mib: u32,

        /// Stage through a 64 KiB window instead of a full buffer
        #[arg(long)]
        streaming: bool,
    },
    /// Erase a slot
    Erase {
        flash: PathBuf,

        /// Target slot (0 is the recovery slot)
        #[arg(long, short)]
        slot: u8,

        /// Slot size in MiB
        #[arg(long, default_value_t = 1)]
        slot_mib: u32,
    },
    /// Dump raw flash contents (recovery fallback)
    Inspect {
        flash: PathBuf,

        /// Start address, decimal or 0x-prefixed hex
        #[arg(long, default_value = "0", value_parser = parse_addr)]
        addr: u32,

        /// Bytes to dump
        #[arg(long, default_value_t = 256)]
        len: u32,
    },
}

fn parse_addr(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "coreflash=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { flash, slot_mib } => info::run(&flash, slot_mib),
        Commands::Verify { core, json } => verify::run(&core, json),
        Commands::Init { flash, size_mib } => init::run(&flash, size_mib),
        Commands::Flash {
            flash: flash_path,
            core,
            slot,
            slot_mib,
            streaming,
        } => flash::run(&flash_path, &core, slot, slot_mib, streaming),
        Commands::Erase {
            flash,
            slot,
            slot_mib,
        } => erase::run(&flash, slot, slot_mib),
        Commands::Inspect { flash, addr, len } => inspect::run(&flash, addr, len),
    }
}
