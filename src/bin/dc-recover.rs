//! CLI entry point (spec.md §6). Parses options with `clap`, assembles a
//! `RecoveryConfig`, and hands off to the driver. `merge` runs the full
//! cross-datacenter recovery; `dc` runs the same engine with corrupted-
//! replica removal disabled by default, for operators recovering within a
//! single datacenter who don't want the tool deleting anything.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dc_recovery::backend::UnimplementedBackend;
use dc_recovery::config::RecoveryConfig;
use dc_recovery::driver;
use dc_recovery::replica::Timestamp;
use dc_recovery::stats::StatsMode;

#[derive(Parser)]
#[clap(name = "dc-recover", about = "Cross-datacenter key recovery engine")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recover keys across all configured groups, removing corrupted
    /// replicas as they're found.
    Merge(RunArgs),
    /// Recover keys without ever issuing a remove (safe single-dc mode).
    Dc(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Pre-sorted, length-prefixed merge file to read keys from.
    #[clap(long)]
    input: PathBuf,

    #[clap(long = "remote", required = true)]
    remotes: Vec<SocketAddr>,

    #[clap(long = "group", required = true)]
    groups: Vec<u32>,

    #[clap(long = "read-only-group")]
    read_only_groups: Vec<u32>,

    #[clap(long, default_value = "16")]
    window: usize,

    #[clap(long, default_value = "4")]
    net_threads: usize,

    #[clap(long, default_value = "24")]
    io_threads: usize,

    #[clap(long, default_value = "5")]
    max_attempts: u32,

    #[clap(long, default_value = "1048576")]
    chunk_size: u64,

    /// Expected transfer rate in bytes/sec; each I/O's timeout is derived
    /// from this and the bytes it expects to move, floored at 60s.
    #[clap(long, default_value = "1048576")]
    data_flow_rate: u64,

    /// Only replicas older than this (seconds since the epoch) are
    /// removed by REMOVING_CORRUPTED; defaults to "remove regardless of
    /// age".
    #[clap(long = "prepare-timeout", default_value = "9223372036854775807")]
    prepare_timeout_secs: i64,

    /// Skip merge-file keys whose authoritative replica is older than
    /// this (seconds since the epoch).
    #[clap(long)]
    timestamp_cutoff_secs: Option<i64>,

    #[clap(long, default_value = "/var/tmp/dc-recovery")]
    temp_dir: PathBuf,

    #[clap(long)]
    dump_file: Option<PathBuf>,

    #[clap(long, default_value = "/var/run/dc-recovery.lock")]
    lock_file: PathBuf,

    #[clap(long, default_value = "60")]
    lock_timeout_secs: u64,

    #[clap(long, arg_enum, default_value = "json")]
    stats_mode: StatsModeArg,

    #[clap(long, default_value = "4096")]
    stats_queue_depth: usize,

    #[clap(long, default_value = "1")]
    stats_update_interval_secs: u64,

    #[clap(long)]
    monitor_port: Option<u16>,

    #[clap(long)]
    no_verify_checksum: bool,

    #[clap(long)]
    safe: bool,

    #[clap(long)]
    dry_run: bool,

    /// For interface compatibility with the upstream merge tool; this
    /// engine never sends anything to a central server, so the flag is
    /// accepted and otherwise ignored.
    #[clap(long)]
    no_server_send: bool,

    #[clap(long)]
    user_flags_filter: Option<u64>,

    #[clap(long)]
    trace_id: Option<String>,

    /// Overrides RUST_LOG when set.
    #[clap(long)]
    log_level: Option<String>,
}

#[derive(clap::ArgEnum, Clone, Copy)]
enum StatsModeArg {
    Plain,
    Json,
}

fn build_config(args: RunArgs, default_remove_corrupted: bool) -> RecoveryConfig {
    if args.no_server_send {
        log::debug!("--no-server-send given; this engine never talks to a central server, ignoring");
    }

    let groups: BTreeSet<u32> = args.groups.into_iter().collect();
    let temp_dir = args.temp_dir;

    RecoveryConfig {
        remotes: args.remotes,
        groups,
        read_only_groups: args.read_only_groups.into_iter().collect(),
        window: args.window,
        net_threads: args.net_threads,
        io_threads: args.io_threads,
        max_attempts: args.max_attempts,
        chunk_size: args.chunk_size,
        data_flow_rate: args.data_flow_rate,
        prepare_timeout_watermark: Timestamp { secs: args.prepare_timeout_secs, nanos: 0 },
        timestamp_cutoff: args.timestamp_cutoff_secs.map(|secs| Timestamp { secs, nanos: 0 }),
        dump_file: args.dump_file.unwrap_or_else(|| temp_dir.join("dump.json")),
        temp_dir: temp_dir.clone(),
        lock_file: args.lock_file,
        lock_timeout: Duration::from_secs(args.lock_timeout_secs),
        stats_mode: match args.stats_mode {
            StatsModeArg::Plain => StatsMode::Plain,
            StatsModeArg::Json => StatsMode::Json,
        },
        stats_queue_depth: args.stats_queue_depth,
        stats_update_interval: Duration::from_secs(args.stats_update_interval_secs),
        monitor_port: args.monitor_port,
        verify_checksum: !args.no_verify_checksum,
        remove_corrupted: if args.safe { false } else { default_remove_corrupted },
        dry_run: args.dry_run,
        user_flags_filter: args.user_flags_filter,
        trace_id: args.trace_id,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let (args, default_remove_corrupted) = match cli.command {
        Command::Merge(args) => (args, true),
        Command::Dc(args) => (args, false),
    };

    if let Some(level) = &args.log_level {
        std::env::set_var("RUST_LOG", level);
    }
    env_logger::init();

    let input_path = args.input.clone();
    let config = build_config(args, default_remove_corrupted);

    let input_file = match tokio::fs::File::open(&input_path).await {
        Ok(file) => file,
        Err(err) => {
            log::error!("failed to open input file {:?}: {}", input_path, err);
            return ExitCode::FAILURE;
        }
    };

    let backend: std::sync::Arc<dyn dc_recovery::backend::StorageBackend> = std::sync::Arc::new(UnimplementedBackend);

    match driver::run(&config, backend, input_file).await {
        Ok(result) if result.success => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("recovery run failed: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
