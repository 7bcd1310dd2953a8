//! `chsink`: stream k6 JSON output into ClickHouse.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chsink_core::clock::SystemClock;
use chsink_core::exit_codes::ExitCode;
use chsink_core::harness::{run_harness, HarnessOptions, DEFAULT_CHUNK_SIZE};
use clap::{ArgAction, Parser};
use tracing::{error, warn};

mod logging;

use logging::{init_logging, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "chsink", version, about = "Stream k6 JSON output into ClickHouse")]
struct Cli {
    /// JSON configuration file ({"url": ..., "pushInterval": ...})
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store URL, overriding the configuration file
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// k6 JSON output to read (default: stdin)
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Keep samples in memory instead of writing to ClickHouse
    #[arg(long)]
    dry_run: bool,

    /// Samples per submitted batch
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.verbose);

    // Non-UTF-8 variables cannot be configuration values.
    let env: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();

    let options = HarnessOptions {
        config_path: cli.config,
        url: cli.url,
        input: cli.input,
        dry_run: cli.dry_run,
        chunk_size: cli.chunk_size,
    };

    let code = match run_harness(&options, &env, Arc::new(SystemClock)) {
        Ok(report) => {
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to render run report"),
            }
            report.exit_code()
        }
        Err(e) => {
            error!(code = e.code(), error = %e, "chsink failed");
            ExitCode::from(&e)
        }
    };
    std::process::exit(code.as_i32());
}
