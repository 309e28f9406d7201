use anyhow::{Context, Result, anyhow, bail, ensure};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::actions::ActionBuilder;
use crate::engine::{
    Button, Engine, EngineConfig, EngineState, GameVariable, Mode, ScreenFormat, ScreenResolution,
};
use crate::observation::{
    GameFeatures, ObservationConfig, ObservedState, StateHistory, process_buffers,
};
use crate::stats::Statistics;

/// Tics to advance after a spawn, so initial weapon changes settle.
pub const SKIP_INITIAL_ACTIONS: u32 = 3;

/// Attempts to bring the player back before giving up.
const MAX_RESPAWN_ATTEMPTS: u32 = 100;

pub const WEAPON_NAMES: [&str; 8] = [
    "None",
    "Fist",
    "Pistol",
    "SuperShotgun",
    "Chaingun",
    "RocketLauncher",
    "PlasmaRifle",
    "BFG9000",
];

// =============================================================================
// Player Properties
// =============================================================================

/// Scalar player state read from the engine after every action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Property {
    FragCount,
    Health,
    Armor,
    SelectedWeapon,
    SelectedAmmo,
    Bullets,
    Shells,
    Rockets,
    Cells,
    Fist,
    Pistol,
    Shotgun,
    Chaingun,
    RocketLauncher,
    PlasmaRifle,
    Bfg9000,
    Score,
}

impl Property {
    pub const COUNT: usize = 17;

    pub const ALL: [Property; Self::COUNT] = [
        Property::FragCount,
        Property::Health,
        Property::Armor,
        Property::SelectedWeapon,
        Property::SelectedAmmo,
        Property::Bullets,
        Property::Shells,
        Property::Rockets,
        Property::Cells,
        Property::Fist,
        Property::Pistol,
        Property::Shotgun,
        Property::Chaingun,
        Property::RocketLauncher,
        Property::PlasmaRifle,
        Property::Bfg9000,
        Property::Score,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Property::FragCount => "frag_count",
            Property::Health => "health",
            Property::Armor => "armor",
            Property::SelectedWeapon => "sel_weapon",
            Property::SelectedAmmo => "sel_ammo",
            Property::Bullets => "bullets",
            Property::Shells => "shells",
            Property::Rockets => "rockets",
            Property::Cells => "cells",
            Property::Fist => "fist",
            Property::Pistol => "pistol",
            Property::Shotgun => "shotgun",
            Property::Chaingun => "chaingun",
            Property::RocketLauncher => "rocketlauncher",
            Property::PlasmaRifle => "plasmarifle",
            Property::Bfg9000 => "bfg9000",
            Property::Score => "score",
        }
    }

    /// Engine variable backing this property.
    pub fn variable(self, score_variable: GameVariable) -> GameVariable {
        match self {
            Property::FragCount => GameVariable::FragCount,
            Property::Health => GameVariable::Health,
            Property::Armor => GameVariable::Armor,
            Property::SelectedWeapon => GameVariable::SelectedWeapon,
            Property::SelectedAmmo => GameVariable::SelectedWeaponAmmo,
            Property::Bullets => GameVariable::Ammo(2),
            Property::Shells => GameVariable::Ammo(3),
            Property::Rockets => GameVariable::Ammo(5),
            Property::Cells => GameVariable::Ammo(6),
            Property::Fist => GameVariable::Weapon(1),
            Property::Pistol => GameVariable::Weapon(2),
            Property::Shotgun => GameVariable::Weapon(3),
            Property::Chaingun => GameVariable::Weapon(4),
            Property::RocketLauncher => GameVariable::Weapon(5),
            Property::PlasmaRifle => GameVariable::Weapon(6),
            Property::Bfg9000 => GameVariable::Weapon(7),
            Property::Score => score_variable,
        }
    }
}

impl FromStr for Property {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Property::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| anyhow!("unknown game property: {s}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameProperties {
    values: [i32; Property::COUNT],
}

impl GameProperties {
    pub fn get(&self, property: Property) -> i32 {
        self.values[property as usize]
    }

    pub fn set(&mut self, property: Property, value: i32) {
        self.values[property as usize] = value;
    }
}

/// A property fed to the network, embedded over `n_values` distinct values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableSpec {
    pub property: Property,
    pub n_values: usize,
}

impl VariableSpec {
    pub fn new(property: Property, n_values: usize) -> Self {
        Self { property, n_values }
    }
}

// =============================================================================
// Weapon Preferences
// =============================================================================

struct WeaponPreference {
    weapon: Property,
    ammo: Property,
    id: i32,
    min_ammo: i32,
}

/// Owned weapons are switched to in this order when they have enough ammo.
const WEAPON_PREFERENCES: [WeaponPreference; 6] = [
    WeaponPreference {
        weapon: Property::Bfg9000,
        ammo: Property::Cells,
        id: 7,
        min_ammo: 40,
    },
    WeaponPreference {
        weapon: Property::Shotgun,
        ammo: Property::Shells,
        id: 3,
        min_ammo: 1,
    },
    WeaponPreference {
        weapon: Property::Chaingun,
        ammo: Property::Bullets,
        id: 4,
        min_ammo: 1,
    },
    WeaponPreference {
        weapon: Property::PlasmaRifle,
        ammo: Property::Cells,
        id: 6,
        min_ammo: 1,
    },
    WeaponPreference {
        weapon: Property::Pistol,
        ammo: Property::Bullets,
        id: 2,
        min_ammo: 1,
    },
    WeaponPreference {
        weapon: Property::RocketLauncher,
        ammo: Property::Rockets,
        id: 5,
        min_ammo: 1,
    },
];

/// Owned-flag and ammo type of each weapon slot (1..=7).
const WEAPON_SLOTS: [(Property, Option<Property>); 7] = [
    (Property::Fist, None),
    (Property::Pistol, Some(Property::Bullets)),
    (Property::Shotgun, Some(Property::Shells)),
    (Property::Chaingun, Some(Property::Bullets)),
    (Property::RocketLauncher, Some(Property::Rockets)),
    (Property::PlasmaRifle, Some(Property::Cells)),
    (Property::Bfg9000, Some(Property::Cells)),
];

// =============================================================================
// Session Configuration
// =============================================================================

/// Takes over the controls when the agent stops moving forward or turning.
#[derive(Debug, Clone, Copy)]
pub struct ManualControlConfig {
    pub non_forward_limit: u32,
    pub non_turn_limit: u32,
    pub repeat: u32,
}

impl Default for ManualControlConfig {
    fn default() -> Self {
        Self {
            non_forward_limit: 30,
            non_turn_limit: 60,
            repeat: 40,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Scenario WAD name under `<resources_dir>/scenarios`.
    pub scenario: String,
    pub resources_dir: PathBuf,
    /// Where the player score lives (`FRAGCOUNT`, or `USERn` for ACS scores).
    pub score_variable: GameVariable,
    pub freedoom: bool,
    pub screen_resolution: ScreenResolution,
    pub screen_format: ScreenFormat,
    pub observation: ObservationConfig,
    pub game_features: GameFeatures,
    pub mode: Mode,
    pub player_rank: usize,
    pub players_per_game: usize,
    pub render_hud: bool,
    pub render_minimal_hud: bool,
    pub render_crosshair: bool,
    pub render_weapon: bool,
    pub render_decals: bool,
    pub render_particles: bool,
    pub render_effects_sprites: bool,
    pub respawn_protect: bool,
    pub spawn_farthest: bool,
    pub freelook: bool,
    pub name: String,
    /// 0 green, 1 gray, 2 brown, 3 red, 4 light gray, 5 light brown, 6 light red, 7 light blue
    pub color: u8,
    pub visible: bool,
    pub n_bots: usize,
    pub use_scripted_marines: Option<bool>,
    pub doom_skill: u8,
    pub manual_control: ManualControlConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            scenario: "deathmatch".to_string(),
            resources_dir: PathBuf::from("resources"),
            score_variable: GameVariable::FragCount,
            freedoom: true,
            screen_resolution: ScreenResolution {
                width: 400,
                height: 225,
            },
            screen_format: ScreenFormat::Crcgcb,
            observation: ObservationConfig {
                height: 60,
                width: 108,
                gray: false,
                use_screen_buffer: true,
                use_depth_buffer: false,
            },
            game_features: GameFeatures::default(),
            mode: Mode::Player,
            player_rank: 0,
            players_per_game: 1,
            render_hud: false,
            render_minimal_hud: false,
            render_crosshair: true,
            render_weapon: true,
            render_decals: false,
            render_particles: false,
            render_effects_sprites: false,
            respawn_protect: true,
            spawn_farthest: true,
            freelook: false,
            name: "no_name".to_string(),
            color: 1,
            visible: false,
            n_bots: 0,
            use_scripted_marines: None,
            doom_skill: 2,
            manual_control: ManualControlConfig::default(),
        }
    }
}

impl GameConfig {
    pub fn scenario_path(&self) -> PathBuf {
        self.resources_dir
            .join("scenarios")
            .join(format!("{}.wad", self.scenario))
    }

    pub fn game_path(&self) -> PathBuf {
        let iwad = if self.freedoom { "freedoom2" } else { "Doom2" };
        self.resources_dir.join(format!("{iwad}.wad"))
    }

    pub fn validate(&self) -> Result<()> {
        ensure_file(&self.scenario_path())?;
        ensure_file(&self.game_path())?;
        let obs = &self.observation;
        ensure!(
            obs.use_screen_buffer || obs.use_depth_buffer,
            "at least one of the screen / depth buffers must be enabled"
        );
        ensure!(
            !obs.use_screen_buffer || self.screen_format.channels() == 3 || obs.gray,
            "color observations need a CRCGCB screen"
        );
        ensure!(
            !(self.render_minimal_hud && !self.render_hud),
            "the minimal HUD requires the HUD"
        );
        ensure!(!self.name.trim().is_empty(), "player name must not be empty");
        ensure!(self.color < 8, "player color must be in 0..8, got {}", self.color);
        ensure!(
            self.use_scripted_marines.is_some() || self.n_bots == 0,
            "bots need an explicit scripted-marines setting"
        );
        ensure!(self.doom_skill <= 4, "doom skill must be in 0..=4");
        ensure!(self.players_per_game > 0, "players per game must be positive");
        Ok(())
    }
}

fn ensure_file(path: &Path) -> Result<()> {
    ensure!(path.is_file(), "missing game resource: {}", path.display());
    Ok(())
}

// =============================================================================
// Game Session
// =============================================================================

/// One agent's session with the engine: spawn / respawn / new-episode
/// transitions, player properties, buffers and statistics.
pub struct Game<E: Engine> {
    engine: E,
    config: GameConfig,
    action_builder: ActionBuilder,
    variables: Vec<GameVariable>,
    map_id: Option<u32>,
    episode_time: Option<f64>,
    buffers: EngineState,
    properties: Option<GameProperties>,
    prev_properties: Option<GameProperties>,
    statistics: BTreeMap<u32, Statistics>,
    count_non_forward_actions: u32,
    count_non_turn_actions: u32,
}

impl<E: Engine> Game<E> {
    pub fn new(config: GameConfig, action_builder: ActionBuilder, engine: E) -> Result<Self> {
        config.validate()?;
        let variables = Property::ALL
            .iter()
            .map(|p| p.variable(config.score_variable))
            .collect();
        Ok(Self {
            engine,
            config,
            action_builder,
            variables,
            map_id: None,
            episode_time: None,
            buffers: EngineState::default(),
            properties: None,
            prev_properties: None,
            statistics: BTreeMap::new(),
            count_non_forward_actions: 0,
            count_non_turn_actions: 0,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn action_builder(&self) -> &ActionBuilder {
        &self.action_builder
    }

    pub fn map_id(&self) -> Option<u32> {
        self.map_id
    }

    pub fn properties(&self) -> Option<&GameProperties> {
        self.properties.as_ref()
    }

    pub fn prev_properties(&self) -> Option<&GameProperties> {
        self.prev_properties.as_ref()
    }

    pub fn buffers(&self) -> &EngineState {
        &self.buffers
    }

    pub fn statistics(&self) -> &BTreeMap<u32, Statistics> {
        &self.statistics
    }

    pub fn manual_counters(&self) -> (u32, u32) {
        (self.count_non_forward_actions, self.count_non_turn_actions)
    }

    fn engine_config(&self, map_id: u32) -> EngineConfig {
        let c = &self.config;
        let game_args = vec![
            "-deathmatch".to_string(),
            format!("+sv_respawnprotect {}", u8::from(c.respawn_protect)),
            format!("+sv_spawnfarthest {}", u8::from(c.spawn_farthest)),
            format!("+freelook {}", u8::from(c.freelook)),
            format!("+name {}", c.name.trim()),
            format!("+colorset {}", c.color),
        ];
        EngineConfig {
            scenario_path: c.scenario_path(),
            game_path: c.game_path(),
            map: format!("map{map_id:02}"),
            screen_resolution: c.screen_resolution,
            screen_format: c.screen_format,
            depth_buffer: c.observation.use_depth_buffer,
            labels_buffer: c.game_features.any(),
            mode: c.mode,
            doom_skill: c.doom_skill + 1,
            render_hud: c.render_hud,
            render_minimal_hud: c.render_minimal_hud,
            render_crosshair: c.render_crosshair,
            render_weapon: c.render_weapon,
            render_decals: c.render_decals,
            render_particles: c.render_particles,
            render_effects_sprites: c.render_effects_sprites,
            game_args,
            window_visible: c.visible,
            buttons: self.action_builder.button_mapping().to_vec(),
            game_variables: self.variables.clone(),
        }
    }

    /// Start the game on `map_id`. With an `episode_time`, an episode ends
    /// when the agent dies instead of respawning it.
    pub fn start(&mut self, map_id: u32, episode_time: Option<f64>) -> Result<()> {
        ensure!(map_id > 0, "map ids start at 1");
        self.statistics.insert(map_id, Statistics::new());
        self.episode_time = episode_time;
        self.map_id = Some(map_id);

        let engine_config = self.engine_config(map_id);
        tracing::info!(
            scenario = %engine_config.scenario_path.display(),
            map = %engine_config.map,
            buttons = engine_config.buttons.len(),
            "starting game"
        );
        self.engine
            .init(&engine_config)
            .context("failed to initialize the engine")?;
        self.initialize_game()
    }

    fn current_statistics(&mut self) -> Option<&mut Statistics> {
        let map_id = self.map_id?;
        self.statistics.get_mut(&map_id)
    }

    /// Read the game variables, check they are consistent and shift them
    /// into the previous properties.
    pub fn update_game_variables(&mut self) -> Result<()> {
        let raw = self.engine.game_variables(&self.variables)?;
        ensure!(
            raw.len() == Property::COUNT,
            "engine returned {} game variables, expected {}",
            raw.len(),
            Property::COUNT
        );
        let mut new = GameProperties::default();
        for (&property, &value) in Property::ALL.iter().zip(&raw) {
            ensure!(
                value.fract() == 0.0,
                "game variable {} is not integral: {value}",
                property.name()
            );
            new.set(property, value as i32);
        }

        if new.get(Property::SelectedWeapon) == -1 {
            tracing::warn!("SELECTED WEAPON is -1!");
            new.set(Property::SelectedWeapon, 1);
        }
        if new.get(Property::SelectedAmmo) == -1 {
            tracing::warn!("SELECTED AMMO is -1!");
            new.set(Property::SelectedAmmo, 0);
        }
        self.check_properties(&new)?;

        self.prev_properties = self.properties.take();
        if let Some(prev) = self.prev_properties.clone()
            && let Some(stats) = self.current_statistics()
        {
            stats.update(&prev, &new);
        }
        self.properties = Some(new);
        Ok(())
    }

    fn check_properties(&mut self, p: &GameProperties) -> Result<()> {
        let sel_weapon = p.get(Property::SelectedWeapon);
        let sel_ammo = p.get(Property::SelectedAmmo);
        ensure!((1..=7).contains(&sel_weapon), "invalid selected weapon {sel_weapon}");
        ensure!(sel_ammo >= 0, "invalid selected ammo {sel_ammo}");
        for (weapon, _) in WEAPON_SLOTS {
            let owned = p.get(weapon);
            ensure!(
                (0..=2).contains(&owned),
                "invalid {} flag {owned}",
                weapon.name()
            );
        }

        let health = p.get(Property::Health);
        if !(0..=200).contains(&health) {
            ensure!(
                health < 0 && self.engine.is_player_dead()?,
                "invalid health {health}"
            );
        }
        let armor = p.get(Property::Armor);
        ensure!((0..=200).contains(&armor), "invalid armor {armor} (health {health})");
        for (property, max) in [
            (Property::Bullets, 200),
            (Property::Shells, 50),
            (Property::Rockets, 50),
            (Property::Cells, 300),
        ] {
            let v = p.get(property);
            ensure!((0..=max).contains(&v), "invalid {} count {v}", property.name());
        }

        let (weapon, ammo) = WEAPON_SLOTS[sel_weapon as usize - 1];
        match ammo {
            None => ensure!(sel_ammo == 0, "the fist has no ammo, got {sel_ammo}"),
            Some(ammo) => {
                ensure!(
                    p.get(weapon) > 0,
                    "selected {} is not owned",
                    WEAPON_NAMES[sel_weapon as usize]
                );
                ensure!(
                    sel_ammo == p.get(ammo),
                    "selected ammo {sel_ammo} does not match {} {}",
                    ammo.name(),
                    p.get(ammo)
                );
            }
        }
        Ok(())
    }

    /// Bring the game back to a playable state: respawn a dead player (or
    /// start a new episode when episodes are timed) and restart finished
    /// episodes.
    pub fn reset(&mut self) -> Result<()> {
        self.count_non_forward_actions = 0;
        self.count_non_turn_actions = 0;

        if self.is_player_dead()? {
            if self.episode_time.is_none() {
                self.respawn_player()?;
            } else {
                self.new_episode()?;
            }
        }
        if self.is_episode_finished()? {
            self.new_episode()?;
        }
        self.respawn_until_alive()
    }

    /// The engine sometimes keeps the player dead after a respawn.
    pub fn respawn_until_alive(&mut self) -> Result<()> {
        let mut attempts = 0;
        while self.is_player_dead()? {
            attempts += 1;
            if attempts > MAX_RESPAWN_ATTEMPTS {
                bail!(
                    "player {} is still dead after {MAX_RESPAWN_ATTEMPTS} respawns",
                    self.config.player_rank
                );
            }
            tracing::warn!(
                "Player {} is still dead after respawn.",
                self.config.player_rank
            );
            self.respawn()?;
        }
        Ok(())
    }

    /// Add built-in AI bots. Only the host of a game manages them.
    pub fn update_bots(&mut self) -> Result<()> {
        if self.config.n_bots == 0
            || self.config.player_rank % self.config.players_per_game != 0
        {
            return Ok(());
        }
        if self.config.use_scripted_marines == Some(true) {
            let command = format!("pukename set_value always 2 {}", self.config.n_bots);
            self.engine.send_game_command(&command)?;
        } else {
            self.engine.send_game_command("removebots")?;
            for _ in 0..self.config.n_bots {
                self.engine.send_game_command("addbot")?;
            }
        }
        Ok(())
    }

    pub fn is_player_dead(&mut self) -> Result<bool> {
        self.engine.is_player_dead()
    }

    /// Only true after the episode timeout.
    pub fn is_episode_finished(&mut self) -> Result<bool> {
        self.engine.is_episode_finished()
    }

    pub fn is_final(&mut self) -> Result<bool> {
        Ok(self.is_player_dead()? || self.is_episode_finished()?)
    }

    pub fn new_episode(&mut self) -> Result<()> {
        let dead = self.is_player_dead()?;
        ensure!(
            dead || self.is_episode_finished()?,
            "new episode requested while the episode is running"
        );
        if dead && let Some(stats) = self.current_statistics() {
            stats.record_death();
        }
        self.engine.new_episode()?;
        self.initialize_game()
    }

    pub fn respawn_player(&mut self) -> Result<()> {
        ensure!(self.is_player_dead()?, "respawn requested for a living player");
        if let Some(stats) = self.current_statistics() {
            stats.record_death();
        }
        self.respawn()
    }

    /// Respawn without counting a death. Retries of a failed respawn go
    /// through here.
    fn respawn(&mut self) -> Result<()> {
        self.engine.respawn_player()?;
        self.initialize_game()
    }

    /// Set up the session after a spawn, so that nothing from the previous
    /// life leaks into this one.
    pub fn initialize_game(&mut self) -> Result<()> {
        self.buffers = self.engine.state()?;
        self.prev_properties = None;
        self.properties = None;

        self.engine.advance_action(SKIP_INITIAL_ACTIONS)?;
        self.update_game_variables()?;
        self.update_bots()
    }

    /// Play `action_id` for `frame_skip` tics.
    ///
    /// In visible mode tics are played one by one, stopping early on death
    /// or episode end and sleeping `sleep` between tics.
    pub fn make_action(
        &mut self,
        action_id: usize,
        frame_skip: u32,
        sleep: Option<Duration>,
    ) -> Result<()> {
        ensure!(frame_skip >= 1, "frame skip must be at least 1");
        let mut action = self.action_builder.get_action(action_id)?;
        self.select_preferred_weapon(&mut action)?;

        let pressed = |button: Button| {
            self.action_builder
                .button_index(button)
                .is_some_and(|i| action[i])
        };
        let forward = pressed(Button::MoveForward);
        let turn = pressed(Button::TurnLeft) || pressed(Button::TurnRight);
        if forward {
            self.count_non_forward_actions = 0;
        } else {
            self.count_non_forward_actions += 1;
        }
        if turn {
            self.count_non_turn_actions = 0;
        } else {
            self.count_non_turn_actions += 1;
        }

        let manual = self.manual_action()?;

        if self.config.visible {
            if let Some(manual_action) = &manual {
                tracing::warn!("Activated manual control");
                for _ in 0..self.config.manual_control.repeat {
                    self.engine.make_action(manual_action, 1)?;
                }
            } else {
                for _ in 0..frame_skip {
                    self.engine.make_action(&action, 1)?;
                    if self.is_player_dead()? || self.is_episode_finished()? {
                        break;
                    }
                    if let Some(pause) = sleep {
                        std::thread::sleep(pause);
                    }
                }
            }
        } else if let Some(manual_action) = &manual {
            tracing::warn!("Activated manual control");
            self.engine
                .make_action(manual_action, self.config.manual_control.repeat)?;
        } else {
            self.engine.make_action(&action, frame_skip)?;
        }

        self.buffers = self.engine.state()?;
        self.update_game_variables()
    }

    fn select_preferred_weapon(&self, action: &mut [bool]) -> Result<()> {
        let props = self
            .properties
            .as_ref()
            .ok_or_else(|| anyhow!("the game has not been started"))?;
        for pref in &WEAPON_PREFERENCES {
            if props.get(pref.weapon) > 0 && props.get(pref.ammo) >= pref.min_ammo {
                let selected = props.get(Property::SelectedWeapon);
                if selected != pref.id {
                    let button = Button::select_weapon(pref.id as u8)
                        .ok_or_else(|| anyhow!("no button for weapon {}", pref.id))?;
                    let idx = self
                        .action_builder
                        .button_index(button)
                        .ok_or_else(|| anyhow!("{button} is not registered"))?;
                    action[idx] = true;
                    tracing::info!(
                        "Manual weapon change: {} -> {}",
                        WEAPON_NAMES
                            .get(selected as usize)
                            .copied()
                            .unwrap_or("unknown"),
                        pref.weapon.name()
                    );
                }
                break;
            }
        }
        Ok(())
    }

    /// Recovery action when the agent has been stuck for too long.
    fn manual_action(&mut self) -> Result<Option<Vec<bool>>> {
        let limits = self.config.manual_control;
        let non_forward = self.count_non_forward_actions >= limits.non_forward_limit;
        let non_turn = self.count_non_turn_actions >= limits.non_turn_limit;
        if !non_forward && !non_turn {
            return Ok(None);
        }
        if non_forward {
            tracing::info!("Manual control (non forward)");
        }
        if non_turn {
            tracing::info!("Manual control (non turn)");
        }

        let mut manual = self.action_builder.empty_action();
        let mut press = |button: Button| -> Result<()> {
            let idx = self
                .action_builder
                .button_index(button)
                .ok_or_else(|| anyhow!("{button} is not registered"))?;
            manual[idx] = true;
            Ok(())
        };
        press(Button::TurnRight)?;
        press(Button::Speed)?;
        if non_forward {
            press(Button::MoveForward)?;
        }
        self.count_non_forward_actions = 0;
        self.count_non_turn_actions = 0;
        Ok(Some(manual))
    }

    /// Process the current buffers and push the observation into `history`.
    pub fn observe_state(
        &self,
        variables: &[VariableSpec],
        history: &mut StateHistory,
    ) -> Result<()> {
        let props = self
            .properties
            .as_ref()
            .ok_or_else(|| anyhow!("the game has not been started"))?;
        let screen = process_buffers(&self.buffers, &self.config.observation)?;
        let variables = variables
            .iter()
            .map(|spec| props.get(spec.property) as i64)
            .collect();
        history.push(ObservedState {
            screen,
            variables,
            features: None,
        });
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.engine.close()
    }
}
