mod cli;
mod error_fmt;
mod fill;

use std::path::Path;

use clap::Parser;
use eyre::{Result, WrapErr};
use filler_config::{Config, ZoneRow};
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let result = run(cli);
    if let Err(err) = &result {
        tracing::error!(error = %err, "command failed");
    }
    flush_log_file();
    if let Err(err) = result {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

/// Drop the file writer guard so buffered lines reach disk before exit.
fn flush_log_file() {
    if let Ok(mut g) = FILE_GUARD.lock() {
        drop(g.take());
    }
}

fn run(cli: Cli) -> Result<()> {
    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {}", cli.config.display()))?;
    let cfg = filler_config::load_toml(&text).wrap_err("parse config TOML")?;
    cfg.validate().wrap_err("invalid configuration")?;

    init_tracing(&cli, &cfg)?;
    let zones = resolve_zones(&cli.config, &cfg)?;
    tracing::debug!(config = %cli.config.display(), zones = zones.len(), "config loaded");

    match cli.cmd {
        Commands::Fill {
            target,
            mode,
            count,
        } => fill::fill_cmd(&cfg, &zones, target, mode.map(Into::into), count, cli.json),
        Commands::Autotune { save } => fill::autotune_cmd(&cfg, &zones, save, cli.json),
        Commands::SelfCheck { scale_device } => {
            fill::self_check_cmd(&cfg, &zones, scale_device.as_deref())
        }
        Commands::ShowConfig => {
            show_config(&cfg, &zones, cli.json);
            Ok(())
        }
    }
}

/// Zone table from the CSV file (relative to the config file) or `[[zones]]`.
fn resolve_zones(config_path: &Path, cfg: &Config) -> Result<Vec<ZoneRow>> {
    let Some(csv) = cfg.zones_csv.as_deref() else {
        return Ok(cfg.zones.clone());
    };
    let csv = Path::new(csv);
    let path = if csv.is_relative() {
        config_path
            .parent()
            .map_or_else(|| csv.to_path_buf(), |dir| dir.join(csv))
    } else {
        csv.to_path_buf()
    };
    filler_config::load_zone_csv(&path)
        .wrap_err_with(|| format!("load zone table {}", path.display()))
}

/// Console layer (pretty or JSON) plus an optional non-blocking file layer.
fn init_tracing(cli: &Cli, cfg: &Config) -> Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .wrap_err("invalid --log-level")?;

    let mut layers = Vec::new();
    if cli.json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(file) = cfg.logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let appender = match cfg.logging.rotation.as_deref().unwrap_or("never") {
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if let Ok(mut g) = FILE_GUARD.lock() {
            *g = Some(guard);
        }
        let file_filter = EnvFilter::try_new(cfg.logging.level.as_deref().unwrap_or("info"))
            .wrap_err("invalid logging.level")?;
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(file_filter)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| eyre::eyre!("init tracing: {e}"))
}

fn show_config(cfg: &Config, zones: &[ZoneRow], json: bool) {
    let zone_rows: Vec<_> = zones
        .iter()
        .enumerate()
        .map(|(i, z)| {
            serde_json::json!({
                "end_percent": z.end_percent,
                "base_pressure_pct": z.base_pressure_pct,
                "pid_range_pct": z.pid_range_pct,
                "gain_multiplier": z.gain_multiplier,
                "target_flow": z.target_flow_or_default(i),
            })
        })
        .collect();
    let mode = filler_core::ControlMode::from(cfg.fill.mode);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "mode": mode.as_str(),
                "default_target": cfg.fill.default_target,
                "target_range": [cfg.fill.min_target, cfg.fill.max_target],
                "pid": { "kp": cfg.pid.kp, "ki": cfg.pid.ki, "kd": cfg.pid.kd },
                "tick_ms": cfg.control.tick_ms,
                "stage_timeout_ms": cfg.safety.stage_timeout_ms,
                "zones": zone_rows,
            })
        );
        return;
    }

    println!("mode: {}", mode.as_str());
    println!(
        "target: default {} in [{}, {}]",
        cfg.fill.default_target, cfg.fill.min_target, cfg.fill.max_target
    );
    println!(
        "pid: kp={} ki={} kd={}",
        cfg.pid.kp, cfg.pid.ki, cfg.pid.kd
    );
    println!("tick: {} ms", cfg.control.tick_ms);
    println!("safety stage timeout: {} ms", cfg.safety.stage_timeout_ms);
    println!("zones:");
    for (i, z) in zones.iter().enumerate() {
        println!(
            "  {}: up to {}% base {}% band ±{}% gain x{} flow {}",
            i + 1,
            z.end_percent,
            z.base_pressure_pct,
            z.pid_range_pct,
            z.gain_multiplier,
            z.target_flow_or_default(i),
        );
    }
}
