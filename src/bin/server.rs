//! Geo agent server binary.
//! Run with: cargo run --bin geoagent-server

use std::process::ExitCode;

use geo_agent::start_geo_agent;

fn main() -> ExitCode {
    start_geo_agent::run()
}
