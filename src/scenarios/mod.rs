use anyhow::{Result, bail};
use candle_core::Device;

use crate::args::Params;
use crate::engine::Engine;

pub mod deathmatch;

pub use deathmatch::RunSummary;

/// Scenarios the runner knows how to play.
pub const SCENARIOS: [&str; 1] = ["deathmatch"];

pub fn run<E: Engine>(params: &Params, engine: E, device: &Device) -> Result<RunSummary> {
    match params.scenario.as_str() {
        "deathmatch" => deathmatch::main(params, engine, device),
        other => bail!("unknown scenario: {other}"),
    }
}
