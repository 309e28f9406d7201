#![allow(dead_code)]

use anyhow::{Result, bail};
use std::collections::HashMap;
use std::path::Path;

use arnold::engine::{Buffer, Engine, EngineConfig, EngineState, GameVariable};

/// Scripted engine: a pistol-wielding player that frags and dies on a
/// fixed schedule of `make_action` calls.
#[derive(Debug, Default)]
pub struct FakeEngine {
    pub config: Option<EngineConfig>,
    pub values: HashMap<GameVariable, f64>,
    pub dead: bool,
    pub episode_finished: bool,
    pub actions: Vec<(Vec<bool>, u32)>,
    pub advanced: Vec<u32>,
    pub commands: Vec<String>,
    pub respawns: usize,
    pub new_episodes: usize,
    pub closed: bool,
    /// Respawns that leave the player dead.
    pub stay_dead_respawns: usize,
    /// Frag once every N actions.
    pub kill_every: Option<usize>,
    /// Die once every N actions.
    pub die_every: Option<usize>,
}

impl FakeEngine {
    pub fn new() -> Self {
        let mut engine = Self::default();
        engine.spawn();
        engine
    }

    fn spawn(&mut self) {
        for (var, value) in [
            (GameVariable::Health, 100.0),
            (GameVariable::Armor, 0.0),
            (GameVariable::SelectedWeapon, 2.0),
            (GameVariable::SelectedWeaponAmmo, 50.0),
            (GameVariable::Ammo(2), 50.0),
            (GameVariable::Ammo(3), 0.0),
            (GameVariable::Ammo(5), 0.0),
            (GameVariable::Ammo(6), 0.0),
            (GameVariable::Weapon(1), 1.0),
            (GameVariable::Weapon(2), 1.0),
            (GameVariable::Weapon(3), 0.0),
            (GameVariable::Weapon(4), 0.0),
            (GameVariable::Weapon(5), 0.0),
            (GameVariable::Weapon(6), 0.0),
            (GameVariable::Weapon(7), 0.0),
        ] {
            self.values.insert(var, value);
        }
        self.dead = false;
    }

    pub fn set(&mut self, var: GameVariable, value: f64) {
        self.values.insert(var, value);
    }

    pub fn get(&self, var: GameVariable) -> f64 {
        self.values.get(&var).copied().unwrap_or(0.0)
    }

    pub fn kill_player(&mut self) {
        self.dead = true;
        self.set(GameVariable::Health, -20.0);
    }

    pub fn last_action(&self) -> &(Vec<bool>, u32) {
        self.actions.last().expect("no action played")
    }
}

impl Engine for FakeEngine {
    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn state(&mut self) -> Result<EngineState> {
        let Some(config) = &self.config else {
            bail!("engine not initialized");
        };
        let res = config.screen_resolution;
        let shade = (self.actions.len() % 256) as u8;
        Ok(EngineState {
            screen: Some(Buffer::filled(3, res.height, res.width, shade)),
            depth: config
                .depth_buffer
                .then(|| Buffer::filled(1, res.height, res.width, 128)),
        })
    }

    fn game_variables(&mut self, vars: &[GameVariable]) -> Result<Vec<f64>> {
        Ok(vars.iter().map(|v| self.get(*v)).collect())
    }

    fn make_action(&mut self, buttons: &[bool], tics: u32) -> Result<f64> {
        if let Some(config) = &self.config
            && buttons.len() != config.buttons.len()
        {
            bail!("got {} buttons, {} registered", buttons.len(), config.buttons.len());
        }
        self.actions.push((buttons.to_vec(), tics));
        let n = self.actions.len();
        if self.kill_every.is_some_and(|k| n % k == 0) {
            let frags = self.get(GameVariable::FragCount);
            self.set(GameVariable::FragCount, frags + 1.0);
        }
        if self.die_every.is_some_and(|k| n % k == 0) {
            self.kill_player();
        }
        Ok(0.0)
    }

    fn advance_action(&mut self, tics: u32) -> Result<()> {
        self.advanced.push(tics);
        Ok(())
    }

    fn is_player_dead(&mut self) -> Result<bool> {
        Ok(self.dead)
    }

    fn is_episode_finished(&mut self) -> Result<bool> {
        Ok(self.episode_finished)
    }

    fn new_episode(&mut self) -> Result<()> {
        self.new_episodes += 1;
        self.episode_finished = false;
        self.set(GameVariable::FragCount, 0.0);
        self.spawn();
        Ok(())
    }

    fn respawn_player(&mut self) -> Result<()> {
        self.respawns += 1;
        if self.stay_dead_respawns > 0 {
            self.stay_dead_respawns -= 1;
        } else {
            self.spawn();
        }
        Ok(())
    }

    fn send_game_command(&mut self, command: &str) -> Result<()> {
        self.commands.push(command.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Lay out empty WAD files the way the session expects them.
pub fn write_resources(root: &Path, scenario: &str) {
    std::fs::create_dir_all(root.join("scenarios")).unwrap();
    std::fs::write(root.join("scenarios").join(format!("{scenario}.wad")), b"").unwrap();
    std::fs::write(root.join("freedoom2.wad"), b"").unwrap();
}
