use anyhow::{Result, ensure};
use clap::{ArgAction, Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

use crate::actions::{ActionParams, ButtonMode};
use crate::dqn::{ModelConfig, NetworkType, Recurrence, VariableEmbedding};
use crate::game::VariableSpec;
use crate::observation::{GameFeatures, ObservationConfig, parse_game_features};
use crate::scenarios::SCENARIOS;
use crate::utils::{bcast_json_list, parse_bool_flag};

/// An empty `--recurrence` means no recurrent cell.
fn parse_recurrence(s: &str) -> Result<Option<Recurrence>, String> {
    if s.is_empty() {
        Ok(None)
    } else {
        Recurrence::from_str(s, true).map(Some)
    }
}

/// Run a trained Arnold agent in a ViZDoom scenario.
#[derive(Parser, Debug, Clone, Serialize)]
#[command(name = "arnold", about = "Arnold: ViZDoom deathmatch DQN agent")]
pub struct Params {
    // ----- game -----
    /// Doom scenario
    #[arg(long, default_value = "deathmatch")]
    pub scenario: String,
    #[arg(long, default_value_t = 1)]
    pub map_id: u32,
    /// Use freedoom2.wad (as opposed to Doom2.wad)
    #[arg(long, default_value = "1", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub freedoom: bool,
    #[arg(long, default_value_t = 60)]
    pub height: usize,
    #[arg(long, default_value_t = 108)]
    pub width: usize,
    #[arg(long, default_value = "0", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub gray: bool,
    #[arg(long, default_value = "1", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub use_screen_buffer: bool,
    #[arg(long, default_value = "0", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub use_depth_buffer: bool,
    /// Map labels to different feature maps. Kept in the params dump for
    /// compatibility with trained models; evaluation does not read labels.
    #[arg(long, default_value = "0;1;2;3")]
    pub labels_mapping: String,
    /// Game features to detect, comma-separated
    #[arg(long, default_value = "enemy")]
    pub game_features: String,
    #[arg(long, default_value = "0", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub render_hud: bool,
    #[arg(long, default_value = "1", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub render_crosshair: bool,
    #[arg(long, default_value = "1", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub render_weapon: bool,
    #[arg(long, default_value_t = 4)]
    pub hist_size: usize,
    /// Number of tics each action is held for
    #[arg(long, default_value_t = 4)]
    pub frame_skip: u32,

    // ----- actions -----
    /// Allowed combinations of actions
    #[arg(long, default_value = "move_fb+turn_lr+move_lr+attack")]
    pub action_combinations: String,
    /// Allow the agent to look up and down
    #[arg(long, default_value = "0", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub freelook: bool,
    #[arg(long, value_enum, default_value = "off")]
    pub speed: ButtonMode,
    #[arg(long, value_enum, default_value = "off")]
    pub crouch: ButtonMode,

    // ----- players -----
    #[arg(long, default_value_t = 1)]
    pub players_per_game: usize,
    #[arg(long, default_value_t = 0)]
    pub player_rank: usize,

    // ----- miscellaneous -----
    /// Experiment folder, set by the runner
    #[arg(skip)]
    pub dump_path: PathBuf,
    #[arg(long, default_value = "0", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub visualize: bool,
    /// Fast evaluation of the model
    #[arg(long, default_value = "0", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub evaluate: bool,
    /// Model weights to reload, relative to the dump path
    #[arg(long, default_value = "")]
    pub reload: String,
    /// Dump every X iterations (0 to disable). Accepted for compatibility
    /// with training command lines; evaluation never dumps models.
    #[arg(long, default_value_t = 0)]
    pub dump_freq: u64,
    /// Negative for CPU
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub gpu_id: i32,
    /// Seconds between two statistics reports
    #[arg(long, default_value_t = 100)]
    pub log_frequency: u64,

    // ----- model -----
    #[arg(long, value_enum, default_value = "dqn_ff")]
    pub network_type: NetworkType,
    #[arg(long, default_value_t = 512)]
    pub hidden_dim: usize,
    #[arg(long, default_value = "0", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub dueling_network: bool,
    /// Recurrent cell of `dqn_rnn` (empty for none)
    #[arg(long, default_value = "", value_parser = parse_recurrence)]
    pub recurrence: std::option::Option<Recurrence>,
    #[arg(long, default_value_t = 1)]
    pub n_rec_layers: usize,
    /// Carry the recurrent state between actions
    #[arg(long, default_value = "1", value_parser = parse_bool_flag, action = ArgAction::Set)]
    pub remember: bool,
    #[arg(long, default_value_t = 0.0)]
    pub dropout: f32,
    /// Game variable embedding dimensions (JSON integer or list)
    #[arg(long, default_value = "32")]
    pub variable_dim: String,
    /// Game variable bucket sizes (JSON integer or list)
    #[arg(long, default_value = "1")]
    pub bucket_size: String,

    // ----- scenario -----
    /// Number of bots in the game
    #[arg(long, default_value_t = 8)]
    pub n_bots: usize,
    /// WAD scenario filename, without extension
    #[arg(long, default_value = "")]
    pub wad: String,

    // ----- runner -----
    #[arg(long, default_value = "./dumped")]
    pub main_dump_path: PathBuf,
    #[arg(long, default_value = "default")]
    pub exp_name: String,
    /// Folder holding the IWADs and `scenarios/*.wad`
    #[arg(long, default_value = "resources")]
    pub resources_dir: PathBuf,
    /// Program that exposes the engine over stdin/stdout
    #[arg(long, default_value = "vizdoom-bridge")]
    pub engine_bridge: String,
    #[arg(long = "engine-bridge-arg", allow_hyphen_values = true)]
    pub engine_bridge_args: Vec<String>,
    /// Stop after this many actions (0 to play forever)
    #[arg(long, default_value_t = 0)]
    pub max_iters: u64,
}

/// Parameters derived once the scenario has chosen its game variables.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedParams {
    pub game_variables: Vec<(String, usize)>,
    pub n_variables: usize,
    pub n_features: usize,
    pub n_fm: usize,
    pub variable_dim: Vec<usize>,
    pub bucket_size: Vec<usize>,
    #[serde(skip)]
    pub variables: Vec<VariableSpec>,
    #[serde(skip)]
    pub features: GameFeatures,
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.scenario.is_empty(), "scenario must not be empty");
        ensure!(
            SCENARIOS.contains(&self.scenario.as_str()),
            "unknown scenario: {}",
            self.scenario
        );
        ensure!(self.map_id >= 1, "map ids start at 1");
        ensure!(
            self.freelook == self.action_combinations.contains("look_ud"),
            "freelook must be enabled exactly when `look_ud` is in the action combinations"
        );
        ensure!(!self.visualize || self.evaluate, "visualize requires evaluate");
        ensure!(!self.evaluate || !self.reload.is_empty(), "evaluate requires reload");
        ensure!(self.hist_size >= 1, "hist size must be at least 1");
        ensure!(self.frame_skip >= 1, "frame skip must be at least 1");
        ensure!(self.height > 0 && self.width > 0, "empty observation size");
        ensure!(
            self.use_screen_buffer || self.use_depth_buffer,
            "at least one of the screen / depth buffers must be used"
        );
        ensure!(
            self.players_per_game >= 1,
            "players per game must be at least 1"
        );
        match (self.network_type, self.recurrence) {
            (NetworkType::DqnRnn, None) => anyhow::bail!("dqn_rnn requires --recurrence"),
            (NetworkType::DqnFf, Some(_)) => anyhow::bail!("dqn_ff takes no --recurrence"),
            _ => {}
        }
        ensure!(
            (0.0..1.0).contains(&self.dropout),
            "dropout must be in [0, 1)"
        );
        ensure!(self.n_rec_layers >= 1, "at least one recurrent layer");
        parse_game_features(&self.game_features)?;
        Ok(())
    }

    /// Resolve the derived parameters for `game_variables`
    /// (property name, number of values).
    pub fn finalize(&self, game_variables: &[(&str, usize)]) -> Result<ResolvedParams> {
        let n_variables = game_variables.len();
        let variables = game_variables
            .iter()
            .map(|&(name, n_values)| Ok(VariableSpec::new(name.parse()?, n_values)))
            .collect::<Result<Vec<_>>>()?;
        let features = parse_game_features(&self.game_features)?;
        let variable_dim = bcast_json_list(&self.variable_dim, n_variables)?;
        let bucket_size = bcast_json_list(&self.bucket_size, n_variables)?;
        ensure!(
            bucket_size.iter().all(|&b| b >= 1),
            "bucket sizes must be positive"
        );
        Ok(ResolvedParams {
            game_variables: game_variables
                .iter()
                .map(|&(name, n)| (name.to_string(), n))
                .collect(),
            n_variables,
            n_features: features.count(),
            n_fm: self.observation_config().n_feature_maps(),
            variable_dim,
            bucket_size,
            variables,
            features,
        })
    }

    pub fn observation_config(&self) -> ObservationConfig {
        ObservationConfig {
            height: self.height,
            width: self.width,
            gray: self.gray,
            use_screen_buffer: self.use_screen_buffer,
            use_depth_buffer: self.use_depth_buffer,
        }
    }

    pub fn action_params(&self) -> ActionParams<'_> {
        ActionParams {
            action_combinations: &self.action_combinations,
            speed: self.speed,
            crouch: self.crouch,
        }
    }

    pub fn model_config(&self, resolved: &ResolvedParams, n_actions: usize) -> ModelConfig {
        ModelConfig {
            network_type: self.network_type,
            n_fm: resolved.n_fm,
            height: self.height,
            width: self.width,
            hist_size: self.hist_size,
            n_actions,
            variables: resolved
                .variables
                .iter()
                .zip(resolved.variable_dim.iter().zip(&resolved.bucket_size))
                .map(|(spec, (&dim, &bucket_size))| VariableEmbedding {
                    n_values: spec.n_values,
                    dim,
                    bucket_size,
                })
                .collect(),
            n_features: resolved.n_features,
            hidden_dim: self.hidden_dim,
            dueling_network: self.dueling_network,
            dropout: self.dropout,
            recurrence: self.recurrence,
            n_rec_layers: self.n_rec_layers,
            remember: self.remember,
        }
    }
}
