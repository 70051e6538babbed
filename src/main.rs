mod calc;
mod db;
mod ipc;
mod logging;
mod model;
mod plan;
mod store;
mod upsert;

use log::{info, warn};
use std::io::{self, BufRead, Write};

fn main() {
    if let Err(e) = logging::init_from_env() {
        eprintln!("attendanced: logging disabled: {}", e);
    }

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!("event=ipc_request module=ipc status=error reason=bad_json error={}", e);
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
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

    info!("event=app_stop module=core status=ok");
}
