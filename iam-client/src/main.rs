//! # BlockIAM CLI
//!
//! Command-line tool for device identity and access management:
//! - Register devices, grant and revoke access, assign roles
//! - Check access and read device records from the contract
//! - Mirror access events into the local cache and query them offline
//!
//! ## Usage
//!
//! ```bash
//! export RPC_URL=http://127.0.0.1:8545
//! export CONTRACT_ADDRESS=0x...
//! export ACCOUNT_ADDRESS=0x...
//!
//! blockiam register 0xDevice... thermo sensor --metadata "floor 2"
//! blockiam grant 0xDevice... --expiry 1767225600
//! blockiam check 0xDevice...
//! blockiam sync
//! blockiam cache --limit 20
//! blockiam devices
//! ```

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use iam_client::{BlockTag, IamClient, JsonRpcLedger, LogStore};
use shared::{
    config::IamConfig,
    constants::DEFAULT_DISPLAY_LIMIT,
    error::IamError,
    types::{AccessLogEntry, CacheStats, Device, Envelope, Status},
    utils::{format_timestamp, to_checksum_address, truncate_address, truncate_text},
};

#[derive(Parser)]
#[command(name = "blockiam")]
#[command(about = "On-chain identity and access management for IoT devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Print the raw result envelope as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Ledger(LedgerCommand),

    #[command(flatten)]
    Cache(CacheCommand),
}

/// Commands that talk to the contract
#[derive(Subcommand)]
enum LedgerCommand {
    /// Register a device on the contract
    Register {
        /// Device address
        address: String,
        /// Device name
        name: String,
        /// Device role (sensor, actuator, gateway, ...)
        role: String,
        /// Free-form metadata
        #[arg(long, short = 'm', default_value = "")]
        metadata: String,
    },

    /// Grant access to a device
    Grant {
        address: String,
        /// Expiry as unix seconds (0 = never)
        #[arg(long, short = 'e', default_value_t = 0)]
        expiry: u64,
    },

    /// Revoke a device's access
    Revoke { address: String },

    /// Assign a new role to a device
    AssignRole { address: String, role: String },

    /// Check whether a device has access
    Check { address: String },

    /// Show the on-chain device record
    Info { address: String },

    /// Record an access event on-chain
    Log { reason: String },

    /// Show access events straight from the ledger
    Logs {
        #[arg(long, short = 'l', default_value_t = DEFAULT_DISPLAY_LIMIT)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        from_block: u64,
        /// Last block (default: latest)
        #[arg(long)]
        to_block: Option<u64>,
    },

    /// Mirror access events (or one device record) into the local cache
    Sync {
        /// Refresh this device's record instead of the access log
        #[arg(long, short = 'd')]
        device: Option<String>,
    },
}

/// Commands served from the local cache alone
#[derive(Subcommand)]
enum CacheCommand {
    /// Show cached access logs
    Cache {
        #[arg(long, short = 'l', default_value_t = DEFAULT_DISPLAY_LIMIT)]
        limit: i64,
    },

    /// Show cached access logs of one device
    DeviceLogs {
        address: String,
        #[arg(long, short = 'l', default_value_t = DEFAULT_DISPLAY_LIMIT)]
        limit: i64,
    },

    /// Show cached device records
    Devices,

    /// Show cache row counts
    Stats,

    /// Delete all cached rows
    Clear,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging (stderr, so stdout carries only command output)
    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = IamConfig::from_env().context("Failed to load configuration")?;
    config.cache.validate().context("Invalid cache configuration")?;
    debug!(version = shared::VERSION, config = ?config, "Configuration loaded");

    let output = Output { json: cli.json };

    let ok = match cli.command {
        Commands::Cache(command) => run_cache_command(&config, &output, command)?,
        Commands::Ledger(command) => {
            let client = match IamClient::connect(&config).await {
                Ok(client) => client,
                Err(e) if e.is_fatal() => {
                    return Err(anyhow::Error::new(e).context("Invalid configuration"))
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context("Failed to connect to the ledger"))
                }
            };
            let ok = run_ledger_command(&client, &output, command).await?;
            client.close().context("Failed to close the local cache")?;
            ok
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn open_cache(config: &IamConfig) -> Result<LogStore, IamError> {
    if !config.cache.enabled {
        return Err(IamError::CacheDisabled);
    }
    LogStore::open(&config.cache)
}

fn run_cache_command(config: &IamConfig, output: &Output, command: CacheCommand) -> Result<bool> {
    match command {
        CacheCommand::Cache { limit } => {
            let result = open_cache(config).and_then(|s| s.fetch_recent_logs(limit));
            output.logs(Envelope::from(result).with_count())
        }
        CacheCommand::DeviceLogs { address, limit } => {
            let result = to_checksum_address(&address)
                .and_then(|a| open_cache(config)?.fetch_logs_for_device(&a, limit));
            output.logs(Envelope::from(result).with_count())
        }
        CacheCommand::Devices => {
            let result = open_cache(config).and_then(|s| s.fetch_devices());
            output.devices(Envelope::from(result).with_count())
        }
        CacheCommand::Stats => {
            let result = open_cache(config).and_then(|s| s.stats());
            output.stats("Cache statistics", result.into())
        }
        CacheCommand::Clear => {
            let result = open_cache(config).and_then(|s| s.clear_all());
            output.stats("Removed from cache", result.into())
        }
    }
}

async fn run_ledger_command(
    client: &IamClient<JsonRpcLedger>,
    output: &Output,
    command: LedgerCommand,
) -> Result<bool> {
    match command {
        LedgerCommand::Register {
            address,
            name,
            role,
            metadata,
        } => output.transaction(
            "Device registered",
            client.register_device(&address, &name, &role, &metadata).await,
        ),
        LedgerCommand::Grant { address, expiry } => {
            output.transaction("Access granted", client.grant_access(&address, expiry).await)
        }
        LedgerCommand::Revoke { address } => {
            output.transaction("Access revoked", client.revoke_access(&address).await)
        }
        LedgerCommand::AssignRole { address, role } => {
            output.transaction("Role assigned", client.assign_role(&address, &role).await)
        }
        LedgerCommand::Log { reason } => {
            output.transaction("Access logged", client.log_access(&reason).await)
        }
        LedgerCommand::Check { address } => {
            let envelope = client.check_access(&address).await;
            output.render(&envelope, |allowed| {
                if *allowed {
                    println!("✓ Access GRANTED for {address}");
                } else {
                    println!("✗ Access DENIED for {address}");
                }
            })
        }
        LedgerCommand::Info { address } => {
            let envelope = client.get_device_info(&address).await;
            output.render(&envelope, |info| {
                if !info.is_registered {
                    println!("Device {} is not registered", info.address);
                    return;
                }
                println!("\nDevice Info:");
                println!("  Address:    {}", info.address);
                println!("  Name:       {}", info.name);
                println!("  Role:       {}", info.role);
                println!("  Metadata:   {}", info.metadata);
                println!("  Registered: {}", format_timestamp(info.registered_at));
            })
        }
        LedgerCommand::Logs {
            limit,
            from_block,
            to_block,
        } => {
            let to = to_block.map_or(BlockTag::Latest, BlockTag::Number);
            let envelope = client.get_logs(BlockTag::Number(from_block), to).await;
            output.render(&envelope, |events| {
                let shown = usize::try_from(limit).unwrap_or(0).min(events.len());
                println!("\nAccess events ({} of {}):", shown, events.len());
                println!("{:<8} {:<22} {:<8} {:<20} {}", "Block", "Device", "Result", "Time", "Reason");
                for e in &events[..shown] {
                    println!(
                        "{:<8} {:<22} {:<8} {:<20} {}",
                        e.block_number,
                        truncate_address(&e.device, 10),
                        if e.success { "OK" } else { "DENIED" },
                        format_timestamp(e.timestamp),
                        truncate_text(&e.reason, 40)
                    );
                }
            })
        }
        LedgerCommand::Sync { device: Some(address) } => {
            let envelope = client.sync_device(&address).await;
            output.render(&envelope, |device| match device {
                Some(d) => println!("✓ Cached device {} ({}, {})", d.address, d.name, d.role),
                None => println!("Device {address} is not registered; cache unchanged"),
            })
        }
        LedgerCommand::Sync { device: None } => {
            let envelope = client.sync_cache().await;
            output.render(&envelope, |report| {
                println!("✓ Sync complete");
                println!("  Fetched:    {}", report.fetched);
                println!("  New:        {}", report.inserted);
                println!("  Duplicates: {}", report.duplicates);
            })
        }
    }
}

// =============================================================================
// OUTPUT
// =============================================================================

struct Output {
    json: bool,
}

impl Output {
    /// Print an envelope, using `human` for successful data
    ///
    /// Returns whether the status was `success`.
    fn render<T: Serialize>(&self, envelope: &Envelope<T>, human: impl FnOnce(&T)) -> Result<bool> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(envelope)?);
            return Ok(envelope.is_success());
        }

        match (&envelope.status, &envelope.data) {
            (Status::Success, Some(data)) => human(data),
            (Status::Success, None) => {}
            (status, _) => {
                let marker = if *status == Status::Failed { "✗" } else { "Error:" };
                println!("{} {}", marker, envelope.message.as_deref().unwrap_or("unknown error"));
                if let Some(tx) = &envelope.transaction_id {
                    println!("  Transaction: {tx}");
                }
            }
        }
        Ok(envelope.is_success())
    }

    fn transaction(&self, done: &str, envelope: Envelope<()>) -> Result<bool> {
        if envelope.is_success() && !self.json {
            println!("✓ {done}");
            if let Some(tx) = &envelope.transaction_id {
                println!("  Transaction: {tx}");
            }
            return Ok(true);
        }
        self.render(&envelope, |_| {})
    }

    fn logs(&self, envelope: Envelope<Vec<AccessLogEntry>>) -> Result<bool> {
        self.render(&envelope, |logs| {
            if logs.is_empty() {
                println!("No cached access logs. Run 'blockiam sync' first.");
                return;
            }
            println!("\nCached access logs ({}):", logs.len());
            println!("{:<6} {:<22} {:<8} {:<20} {}", "ID", "Device", "Result", "Time", "Reason");
            for log in logs {
                println!(
                    "{:<6} {:<22} {:<8} {:<20} {}",
                    log.id,
                    truncate_address(&log.device, 10),
                    if log.success { "OK" } else { "DENIED" },
                    format_timestamp(log.timestamp),
                    truncate_text(&log.reason, 40)
                );
            }
        })
    }

    fn devices(&self, envelope: Envelope<Vec<Device>>) -> Result<bool> {
        self.render(&envelope, |devices| {
            if devices.is_empty() {
                println!("No cached devices. Run 'blockiam sync --device <address>' first.");
                return;
            }
            println!("\nCached devices ({}):", devices.len());
            println!("{:<44} {:<20} {:<12} {}", "Address", "Name", "Role", "Updated");
            for d in devices {
                println!(
                    "{:<44} {:<20} {:<12} {}",
                    d.address,
                    truncate_text(&d.name, 20),
                    truncate_text(&d.role, 12),
                    format_timestamp(d.updated_at)
                );
            }
        })
    }

    fn stats(&self, title: &str, envelope: Envelope<CacheStats>) -> Result<bool> {
        self.render(&envelope, |stats| {
            println!("\n{title}:");
            println!("  Devices: {}", stats.total_devices);
            println!("  Logs:    {}", stats.total_logs);
        })
    }
}
