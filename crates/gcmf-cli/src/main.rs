//! gcmf: encrypt or decrypt a file with chunked AES-256-GCM
//!
//! Usage:
//!   gcmf -e -K <HEX> --iv <HEX> --in <PATH> --out <PATH>
//!   gcmf -d -K <HEX> --iv <HEX> --in <PATH> --out <PATH> [--parallel]
//!
//! The key may come from GCMF_KEY instead of the command line. The
//! single-dash spellings `-in` and `-out` are accepted as well.

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{info, warn};

use gcmf_core::config::GcmfConfig;
use gcmf_core::material::{parse_aad_hex, parse_key_hex, parse_nonce_hex};
use gcmf_crypto::{FileOptions, FileReport, ProgressFn, StreamParams};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "gcmf",
    version,
    about = "Chunked AES-256-GCM file encryption",
    long_about = "gcmf: encrypt or decrypt files of any size in 1 MiB authenticated chunks"
)]
struct Cli {
    #[command(flatten)]
    mode: ModeArgs,

    /// Hex-encoded 32-byte key
    #[arg(long, short = 'K', env = "GCMF_KEY", hide_env_values = true)]
    key: String,

    /// Hex-encoded base nonce, at least 12 bytes
    #[arg(long, visible_alias = "nonce")]
    iv: String,

    /// Input file
    #[arg(long = "in", value_name = "PATH")]
    input: PathBuf,

    /// Output file
    #[arg(long = "out", value_name = "PATH")]
    output: PathBuf,

    /// Hex-encoded additional authenticated data (overrides config and built-in AAD)
    #[arg(long)]
    aad: Option<String>,

    /// Path to gcmf.toml configuration file
    #[arg(long, short = 'c', env = "GCMF_CONFIG", default_value = "gcmf.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error) [default: config or info]
    #[arg(long, env = "GCMF_LOG")]
    log: Option<String>,

    /// Log format [default: config or text]
    #[arg(long, env = "GCMF_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Decrypt with ranged reads on a worker pool
    #[arg(long)]
    parallel: bool,

    /// Worker threads for --parallel (0 = one per CPU)
    #[arg(long)]
    workers: Option<usize>,

    /// Show a progress bar on stderr
    #[arg(long)]
    progress: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ModeArgs {
    /// Encrypt the input file
    #[arg(long, short = 'e')]
    encrypt: bool,

    /// Decrypt the input file
    #[arg(long, short = 'd')]
    decrypt: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse_from(single_dash_paths(std::env::args_os()));
    let config = GcmfConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = match cli.log_format {
        Some(format) => format,
        None => LogFormat::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("invalid log.format in config: {e}"))?,
    };
    init_logging(level, format);

    run(&cli, &config)
}

/// Rewrite `-in`/`-out` (and their `=value` forms) to the long flags clap
/// understands. Arguments after `--` are left alone.
fn single_dash_paths<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut operands = false;
    args.into_iter()
        .map(|arg| {
            if operands {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                operands = true;
                return arg;
            }
            for flag in ["-in", "-out"] {
                if let Some(rest) = text.strip_prefix(flag) {
                    if rest.is_empty() || rest.starts_with('=') {
                        return OsString::from(format!("-{text}"));
                    }
                }
            }
            arg
        })
        .collect()
}

/// Initialise tracing on stderr; `RUST_LOG` overrides `level`.
fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, config: &GcmfConfig) -> Result<()> {
    let params = stream_params(cli, config)?;
    let options = FileOptions {
        overwrite: config.output.overwrite,
        atomic: config.output.atomic,
    };
    let parallel = cli.parallel || config.stream.parallel;
    let workers = cli.workers.unwrap_or(config.stream.workers);

    let pb = if cli.progress {
        Some(make_progress_bar(if cli.mode.encrypt { "encrypt" } else { "decrypt" })?)
    } else {
        None
    };
    let progress: Option<ProgressFn> = pb.clone().map(|pb| -> ProgressFn {
        Box::new(move |done, total| {
            pb.set_length(total);
            pb.set_position(done);
        })
    });

    let report = if cli.mode.encrypt {
        if cli.parallel {
            warn!("--parallel only applies to decryption; encrypting sequentially");
        }
        gcmf_crypto::encrypt_file(&cli.input, &cli.output, &params, &options, progress.as_ref())
    } else if parallel {
        gcmf_crypto::decrypt_file_parallel(
            &cli.input,
            &cli.output,
            &params,
            &options,
            workers,
            progress.as_ref(),
        )
    } else {
        gcmf_crypto::decrypt_file(&cli.input, &cli.output, &params, &options, progress.as_ref())
    };

    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    let report = report.with_context(|| describe(cli))?;
    log_report(cli, &report);
    Ok(())
}

/// Decode key, nonce and AAD. Flags win over config, config over the
/// built-in AAD.
fn stream_params(cli: &Cli, config: &GcmfConfig) -> Result<StreamParams> {
    let key = parse_key_hex(&cli.key).context("invalid --key")?;
    let nonce = parse_nonce_hex(&cli.iv).context("invalid --iv")?;
    let aad = match &cli.aad {
        Some(hex) => parse_aad_hex(hex).context("invalid --aad")?,
        None => parse_aad_hex(config.aad_hex()).context("invalid stream.aad")?,
    };
    Ok(StreamParams::new(&key, &nonce, &aad)?)
}

fn describe(cli: &Cli) -> String {
    let verb = if cli.mode.encrypt { "encrypting" } else { "decrypting" };
    format!(
        "{verb} {} -> {}",
        cli.input.display(),
        cli.output.display()
    )
}

fn log_report(cli: &Cli, report: &FileReport) {
    info!(
        input = %cli.input.display(),
        output = %cli.output.display(),
        bytes_in = report.bytes_in,
        bytes_out = report.bytes_out,
        chunks = report.chunks,
        "{}",
        if cli.mode.encrypt { "encrypted" } else { "decrypted" }
    );
}

fn make_progress_bar(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )?
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    Ok(pb)
}
