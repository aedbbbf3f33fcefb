//! MindTape sync server binary.
//! Run with: cargo run --bin mindtape-server

use std::process::ExitCode;

use mindtape_sync::start_mindtape;

fn main() -> ExitCode {
    start_mindtape::run()
}
