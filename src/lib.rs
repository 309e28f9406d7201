pub mod actions;
pub mod args;
pub mod bridge;
pub mod dqn;
pub mod engine;
pub mod game;
pub mod observation;
pub mod scenarios;
pub mod stats;
pub mod utils;

pub use actions::{ActionBuilder, ActionParams, ButtonMode};
pub use args::{Params, ResolvedParams};
pub use bridge::BridgeEngine;
pub use dqn::{Dqn, ModelConfig, NetworkType, Recurrence, VariableEmbedding};
pub use engine::{Buffer, Button, Engine, EngineConfig, EngineState, GameVariable};
pub use game::{Game, GameConfig, GameProperties, ManualControlConfig, Property, VariableSpec};
pub use observation::{ObservationConfig, ObservedState, StateHistory};
pub use stats::Statistics;
