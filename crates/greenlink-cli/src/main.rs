//! greenlink smoke runner.
//!
//! Drives a wallet session through connect, login, reconnect and watch-only
//! login against the in-process backend and reports pass, skip or fail.

mod harness;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use greenlink_core::simulated::SimulatedBackend;
use greenlink_core::NetworkTarget;

use harness::{HarnessOptions, Outcome};

/// Environment variable naming the transcript directory.
const LOG_DIR_ENV: &str = "GREENLINK_LOG_DIR";

#[derive(Parser, Debug)]
#[command(name = "greenlink-smoke", about = "Wallet session smoke test")]
struct Args {
    /// Use the localtest network instead of testnet
    #[arg(short = 'l')]
    localtest: bool,

    /// Do not print notifications
    #[arg(short = 'q')]
    quiet: bool,
}

impl Args {
    fn target(&self) -> NetworkTarget {
        if self.localtest {
            NetworkTarget::Localtest
        } else {
            NetworkTarget::Testnet
        }
    }
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.quiet);

    let mut options = HarnessOptions::new(args.target(), args.quiet);
    options.transcript_dir = std::env::var_os(LOG_DIR_ENV).map(PathBuf::from);

    log::info!("Running smoke test against {}", options.target);
    let backend = Arc::new(SimulatedBackend::default());

    match harness::run(backend, &options).await {
        Ok(Outcome::Passed) => println!("PASS"),
        Ok(Outcome::Skipped(reason)) => println!("SKIP: {}", reason),
        Err(e) => {
            eprintln!("FAIL: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_testnet() {
        let args = Args::try_parse_from(["greenlink-smoke"]).unwrap();
        assert_eq!(args.target(), NetworkTarget::Testnet);
        assert!(!args.quiet);
    }

    #[test]
    fn short_flags() {
        let args = Args::try_parse_from(["greenlink-smoke", "-l", "-q"]).unwrap();
        assert_eq!(args.target(), NetworkTarget::Localtest);
        assert!(args.quiet);

        let args = Args::try_parse_from(["greenlink-smoke", "-lq"]).unwrap();
        assert!(args.localtest && args.quiet);
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(Args::try_parse_from(["greenlink-smoke", "--network", "testnet"]).is_err());
        assert!(Args::try_parse_from(["greenlink-smoke", "-x"]).is_err());
    }
}
