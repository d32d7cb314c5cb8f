#![windows_subsystem = "windows"]
use std::io::{self, BufRead, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod model;
mod parsers;
mod protocol;
mod services;

use config::EngineConfig;
use services::fetch::{Fetcher, HttpFetcher};
use services::session::Session;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();

    let cfg = EngineConfig::from_env();
    let fetcher: Arc<dyn Fetcher> = match HttpFetcher::new() {
        Ok(f) => Arc::new(f),
        Err(e) => {
            error!(error = %e, "failed to build http client");
            let _ = writeln!(
                io::stdout(),
                "{}",
                serde_json::json!({ "status": "error", "message": e.to_string() })
            );
            return;
        }
    };

    info!(api = %cfg.api_base_url, storage = %cfg.storage_dir().display(), "overlaylex-core starting");
    let mut session = Session::new(cfg, fetcher);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };

        if line.trim().is_empty() {
            continue;
        }

        let result = catch_unwind(AssertUnwindSafe(|| protocol::handle(&mut session, &line)));

        let response = match result {
            Ok(resp) => resp,
            Err(_) => serde_json::json!({
                "status": "error",
                "message": "internal core error"
            })
            .to_string(),
        };

        if writeln!(stdout, "{response}").is_err() {
            break;
        }

        let _ = stdout.flush();
    }
}
