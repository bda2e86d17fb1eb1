//! Isolated bundle worker.
//!
//! Reads one JSON `BundleJob` from stdin, bundles it, and writes a
//! `WorkerReply` to stdout. Spawned by `ProcessIsolate`.

use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match smart_css::worker::serve_stdio().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("smart-css-worker: {e}");
            ExitCode::from(2)
        }
    }
}
