use anyhow::{Context, Result, ensure};
use candle_core::Device;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::time::{Duration, Instant};

use crate::actions::ActionBuilder;
use crate::args::{Params, ResolvedParams};
use crate::dqn::Dqn;
use crate::engine::{Engine, GameVariable, Mode};
use crate::game::{Game, GameConfig};
use crate::observation::StateHistory;
use crate::stats::Statistics;

/// Game variables fed to the network, with their number of values.
pub const GAME_VARIABLES: [(&str, usize); 2] = [("health", 101), ("sel_ammo", 301)];

const PLAYER_NAME: &str = "Arnold4";

/// Actions between two timing reports.
const TIMING_INTERVAL: u64 = 100;

pub struct RunSummary {
    pub iterations: u64,
    pub statistics: BTreeMap<u32, Statistics>,
}

#[derive(Serialize)]
struct ParamsDump<'a> {
    params: &'a Params,
    resolved: &'a ResolvedParams,
}

fn dump_params(params: &Params, resolved: &ResolvedParams) -> Result<()> {
    let path = params.dump_path.join("params.json");
    let file =
        File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &ParamsDump { params, resolved })?;

    let value = serde_json::to_value(params)?;
    if let serde_json::Value::Object(map) = value {
        for (k, v) in map {
            tracing::info!("{k}: {v}");
        }
    }
    tracing::info!("resolved: {}", serde_json::to_string(resolved)?);
    Ok(())
}

fn game_config(params: &Params, resolved: &ResolvedParams) -> GameConfig {
    GameConfig {
        scenario: params.wad.clone(),
        resources_dir: params.resources_dir.clone(),
        score_variable: GameVariable::User(2),
        freedoom: params.freedoom,
        observation: params.observation_config(),
        game_features: resolved.features,
        mode: Mode::Player,
        player_rank: params.player_rank,
        players_per_game: params.players_per_game,
        render_hud: params.render_hud,
        render_crosshair: params.render_crosshair,
        render_weapon: params.render_weapon,
        freelook: params.freelook,
        visible: params.visualize,
        n_bots: params.n_bots,
        use_scripted_marines: Some(true),
        name: PLAYER_NAME.to_string(),
        ..Default::default()
    }
}

/// Respawn a dead player with a fresh recurrent state. Returns whether
/// the player had died.
pub fn respawn_if_dead<E: Engine>(game: &mut Game<E>, network: &mut Dqn) -> Result<bool> {
    let died = game.is_player_dead()?;
    if died {
        game.respawn_player()?;
        network.reset();
    }
    game.respawn_until_alive()?;
    Ok(died)
}

/// Evaluate a (reloaded) network in a deathmatch against scripted marines.
pub fn main<E: Engine>(params: &Params, engine: E, device: &Device) -> Result<RunSummary> {
    ensure!(!params.wad.is_empty(), "the deathmatch scenario needs --wad");
    let resolved = params.finalize(&GAME_VARIABLES)?;
    dump_params(params, &resolved)?;

    let action_builder = ActionBuilder::new(&params.action_params())?;
    let n_actions = action_builder.n_actions();
    let mut game = Game::new(game_config(params, &resolved), action_builder, engine)?;

    let mut network = Dqn::new(params.model_config(&resolved, n_actions), device)?;
    if !params.reload.is_empty() {
        let model_path = params.dump_path.join(&params.reload);
        tracing::info!("Reloading model from {}...", model_path.display());
        network.load(&model_path)?;
    }
    ensure!(
        resolved.n_features == network.n_features(),
        "the network predicts {} game features, {} are configured",
        network.n_features(),
        resolved.n_features
    );

    tracing::info!("Evaluating the model...");
    game.start(params.map_id, None)?;
    network.reset();

    let sleep = params.evaluate.then_some(Duration::ZERO);
    let log_frequency = Duration::from_secs(params.log_frequency);
    let mut history = StateHistory::new(params.hist_size)?;
    let mut n_iter = 0u64;
    let mut start_time = Instant::now();
    let mut last_report = Instant::now();

    while params.max_iters == 0 || n_iter < params.max_iters {
        n_iter += 1;

        respawn_if_dead(&mut game, &mut network)?;

        // observe the game state / select the next action
        game.observe_state(&resolved.variables, &mut history)?;
        let action = network.next_action(&history)?;

        if n_iter.is_multiple_of(TIMING_INTERVAL) {
            tracing::info!(
                "{TIMING_INTERVAL} actions in {:.3}s",
                start_time.elapsed().as_secs_f64()
            );
            start_time = Instant::now();
        }

        game.make_action(action, params.frame_skip, sleep)?;

        if last_report.elapsed() >= log_frequency {
            for (map_id, stats) in game.statistics() {
                tracing::info!("map{map_id:02}: {}", stats.summary());
            }
            last_report = Instant::now();
        }
    }

    game.close()?;

    let statistics = game.statistics().clone();
    let path = params.dump_path.join("statistics.json");
    let file =
        File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &statistics)?;
    for (map_id, stats) in &statistics {
        tracing::info!("map{map_id:02} final: {}", stats.summary());
    }

    Ok(RunSummary {
        iterations: n_iter,
        statistics,
    })
}
