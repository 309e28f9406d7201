// =============================================================================
// Arnold: ViZDoom deathmatch DQN agent
// =============================================================================
// Run:
//   cargo run --release -- --wad full_deathmatch --exp-name eval \
//       --evaluate 1 --reload model.safetensors --engine-bridge ./vizdoom_bridge.py

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

use anyhow::Result;
use clap::Parser;

use arnold::args::Params;
use arnold::bridge::BridgeEngine;
use arnold::scenarios;
use arnold::utils::{get_dump_path, init_logging, select_device};

fn main() -> Result<()> {
    let mut params = Params::parse();
    params.validate()?;

    params.dump_path = get_dump_path(&params.main_dump_path, &params.exp_name)?;
    init_logging(&params.dump_path)?;
    tracing::info!("Experiment folder: {}", params.dump_path.display());

    let device = select_device(params.gpu_id)?;
    tracing::info!(?device, "Using device");

    let engine = BridgeEngine::spawn(&params.engine_bridge, &params.engine_bridge_args)?;
    let summary = scenarios::run(&params, engine, &device)?;
    tracing::info!("Done after {} actions", summary.iterations);
    Ok(())
}
