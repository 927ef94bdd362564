mod calendar;
mod cascade;
mod clock;
mod config;
mod db;
mod error;
mod generate;
mod ipc;
mod model;
mod rr;

use std::io::{self, BufRead, Write};

use log::{error, info, warn};

fn main() {
    let cfg = config::Config::from_env();
    // stdout carries the protocol, so logs must stay on stderr.
    env_logger::Builder::from_env(env_logger::Env::default().filter_or(config::LOG_ENV, &cfg.log_filter))
        .target(env_logger::Target::Stderr)
        .init();

    for msg in &cfg.rejected {
        warn!("{msg}");
    }

    let mut state = ipc::AppState::new(&cfg);
    info!(
        "ecoled {} ready (cascade timeout {} ms, fixed clock: {})",
        env!("CARGO_PKG_VERSION"),
        cfg.cascade_timeout.as_millis(),
        cfg.fixed_now.is_some()
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!("stdin closed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
