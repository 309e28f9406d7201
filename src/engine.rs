use anyhow::{Result, anyhow, bail, ensure};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// =============================================================================
// Buttons
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Button {
    MoveForward,
    MoveBackward,
    MoveLeft,
    MoveRight,
    TurnLeft,
    TurnRight,
    LookUp,
    LookDown,
    Attack,
    Speed,
    Crouch,
    #[serde(rename = "SELECT_WEAPON1")]
    SelectWeapon1,
    #[serde(rename = "SELECT_WEAPON2")]
    SelectWeapon2,
    #[serde(rename = "SELECT_WEAPON3")]
    SelectWeapon3,
    #[serde(rename = "SELECT_WEAPON4")]
    SelectWeapon4,
    #[serde(rename = "SELECT_WEAPON5")]
    SelectWeapon5,
    #[serde(rename = "SELECT_WEAPON6")]
    SelectWeapon6,
    #[serde(rename = "SELECT_WEAPON7")]
    SelectWeapon7,
}

impl Button {
    pub const SELECT_WEAPONS: [Button; 7] = [
        Button::SelectWeapon1,
        Button::SelectWeapon2,
        Button::SelectWeapon3,
        Button::SelectWeapon4,
        Button::SelectWeapon5,
        Button::SelectWeapon6,
        Button::SelectWeapon7,
    ];

    /// `SELECT_WEAPON<id>` for weapon slots 1..=7.
    pub fn select_weapon(id: u8) -> Option<Button> {
        match id {
            1..=7 => Some(Self::SELECT_WEAPONS[id as usize - 1]),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Button::MoveForward => "MOVE_FORWARD",
            Button::MoveBackward => "MOVE_BACKWARD",
            Button::MoveLeft => "MOVE_LEFT",
            Button::MoveRight => "MOVE_RIGHT",
            Button::TurnLeft => "TURN_LEFT",
            Button::TurnRight => "TURN_RIGHT",
            Button::LookUp => "LOOK_UP",
            Button::LookDown => "LOOK_DOWN",
            Button::Attack => "ATTACK",
            Button::Speed => "SPEED",
            Button::Crouch => "CROUCH",
            Button::SelectWeapon1 => "SELECT_WEAPON1",
            Button::SelectWeapon2 => "SELECT_WEAPON2",
            Button::SelectWeapon3 => "SELECT_WEAPON3",
            Button::SelectWeapon4 => "SELECT_WEAPON4",
            Button::SelectWeapon5 => "SELECT_WEAPON5",
            Button::SelectWeapon6 => "SELECT_WEAPON6",
            Button::SelectWeapon7 => "SELECT_WEAPON7",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Game Variables
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum GameVariable {
    KillCount,
    ItemCount,
    SecretCount,
    FragCount,
    DeathCount,
    Health,
    Armor,
    Dead,
    OnGround,
    AttackReady,
    SelectedWeapon,
    SelectedWeaponAmmo,
    Ammo(u8),
    Weapon(u8),
    User(u8),
}

impl FromStr for GameVariable {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let slot = |prefix: &str, max: u8| -> Option<u8> {
            s.strip_prefix(prefix)
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|&n| n <= max)
        };
        let var = match s {
            "KILLCOUNT" => GameVariable::KillCount,
            "ITEMCOUNT" => GameVariable::ItemCount,
            "SECRETCOUNT" => GameVariable::SecretCount,
            "FRAGCOUNT" => GameVariable::FragCount,
            "DEATHCOUNT" => GameVariable::DeathCount,
            "HEALTH" => GameVariable::Health,
            "ARMOR" => GameVariable::Armor,
            "DEAD" => GameVariable::Dead,
            "ON_GROUND" => GameVariable::OnGround,
            "ATTACK_READY" => GameVariable::AttackReady,
            "SELECTED_WEAPON" => GameVariable::SelectedWeapon,
            "SELECTED_WEAPON_AMMO" => GameVariable::SelectedWeaponAmmo,
            _ => {
                if let Some(n) = slot("AMMO", 9) {
                    GameVariable::Ammo(n)
                } else if let Some(n) = slot("WEAPON", 9) {
                    GameVariable::Weapon(n)
                } else if let Some(n) = slot("USER", 60).filter(|&n| n >= 1) {
                    GameVariable::User(n)
                } else {
                    bail!("unknown game variable: {s}");
                }
            }
        };
        Ok(var)
    }
}

impl fmt::Display for GameVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameVariable::KillCount => f.write_str("KILLCOUNT"),
            GameVariable::ItemCount => f.write_str("ITEMCOUNT"),
            GameVariable::SecretCount => f.write_str("SECRETCOUNT"),
            GameVariable::FragCount => f.write_str("FRAGCOUNT"),
            GameVariable::DeathCount => f.write_str("DEATHCOUNT"),
            GameVariable::Health => f.write_str("HEALTH"),
            GameVariable::Armor => f.write_str("ARMOR"),
            GameVariable::Dead => f.write_str("DEAD"),
            GameVariable::OnGround => f.write_str("ON_GROUND"),
            GameVariable::AttackReady => f.write_str("ATTACK_READY"),
            GameVariable::SelectedWeapon => f.write_str("SELECTED_WEAPON"),
            GameVariable::SelectedWeaponAmmo => f.write_str("SELECTED_WEAPON_AMMO"),
            GameVariable::Ammo(n) => write!(f, "AMMO{n}"),
            GameVariable::Weapon(n) => write!(f, "WEAPON{n}"),
            GameVariable::User(n) => write!(f, "USER{n}"),
        }
    }
}

impl From<GameVariable> for String {
    fn from(var: GameVariable) -> Self {
        var.to_string()
    }
}

impl TryFrom<String> for GameVariable {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

// =============================================================================
// Screen Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ScreenResolution {
    pub width: usize,
    pub height: usize,
}

impl FromStr for ScreenResolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let dims = s
            .strip_prefix("RES_")
            .ok_or_else(|| anyhow!("unknown screen resolution: {s}"))?;
        let (w, h) = dims
            .split_once('X')
            .ok_or_else(|| anyhow!("unknown screen resolution: {s}"))?;
        let width: usize = w.parse().map_err(|_| anyhow!("bad width in {s}"))?;
        let height: usize = h.parse().map_err(|_| anyhow!("bad height in {s}"))?;
        ensure!(width > 0 && height > 0, "empty screen resolution: {s}");
        Ok(Self { width, height })
    }
}

impl fmt::Display for ScreenResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RES_{}X{}", self.width, self.height)
    }
}

impl From<ScreenResolution> for String {
    fn from(res: ScreenResolution) -> Self {
        res.to_string()
    }
}

impl TryFrom<String> for ScreenResolution {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Planar screen layouts the observation pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenFormat {
    #[serde(rename = "CRCGCB")]
    Crcgcb,
    #[serde(rename = "GRAY8")]
    Gray8,
}

impl ScreenFormat {
    pub fn channels(self) -> usize {
        match self {
            ScreenFormat::Crcgcb => 3,
            ScreenFormat::Gray8 => 1,
        }
    }
}

impl FromStr for ScreenFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CRCGCB" => Ok(ScreenFormat::Crcgcb),
            "GRAY8" => Ok(ScreenFormat::Gray8),
            _ => bail!("unsupported screen format: {s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Player,
    Spectator,
    AsyncPlayer,
    AsyncSpectator,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PLAYER" => Ok(Mode::Player),
            "SPECTATOR" => Ok(Mode::Spectator),
            "ASYNC_PLAYER" => Ok(Mode::AsyncPlayer),
            "ASYNC_SPECTATOR" => Ok(Mode::AsyncSpectator),
            _ => bail!("unknown mode: {s}"),
        }
    }
}

// =============================================================================
// Engine Session
// =============================================================================

/// Everything the engine needs before `init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub scenario_path: PathBuf,
    pub game_path: PathBuf,
    pub map: String,
    pub screen_resolution: ScreenResolution,
    pub screen_format: ScreenFormat,
    pub depth_buffer: bool,
    pub labels_buffer: bool,
    pub mode: Mode,
    pub doom_skill: u8,
    pub render_hud: bool,
    pub render_minimal_hud: bool,
    pub render_crosshair: bool,
    pub render_weapon: bool,
    pub render_decals: bool,
    pub render_particles: bool,
    pub render_effects_sprites: bool,
    pub game_args: Vec<String>,
    pub window_visible: bool,
    pub buttons: Vec<Button>,
    pub game_variables: Vec<GameVariable>,
}

/// Planar `channels x height x width` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<u8>,
}

impl Buffer {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<u8>) -> Result<Self> {
        ensure!(
            data.len() == channels * height * width,
            "buffer of {} bytes does not match shape ({channels}, {height}, {width})",
            data.len()
        );
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    pub fn filled(channels: usize, height: usize, width: usize, value: u8) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![value; channels * height * width],
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    pub fn plane(&self, c: usize) -> &[u8] {
        let size = self.height * self.width;
        &self.data[c * size..(c + 1) * size]
    }
}

/// Buffers produced by the engine for the current tic.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub screen: Option<Buffer>,
    pub depth: Option<Buffer>,
}

/// A running game-engine session.
pub trait Engine {
    fn init(&mut self, config: &EngineConfig) -> Result<()>;

    fn state(&mut self) -> Result<EngineState>;

    /// Current values of `vars`, in order.
    fn game_variables(&mut self, vars: &[GameVariable]) -> Result<Vec<f64>>;

    /// Hold `buttons` (in registration order) for `tics` tics; returns the reward.
    fn make_action(&mut self, buttons: &[bool], tics: u32) -> Result<f64>;

    /// Advance `tics` tics with the last action.
    fn advance_action(&mut self, tics: u32) -> Result<()>;

    fn is_player_dead(&mut self) -> Result<bool>;

    fn is_episode_finished(&mut self) -> Result<bool>;

    fn new_episode(&mut self) -> Result<()>;

    fn respawn_player(&mut self) -> Result<()>;

    fn send_game_command(&mut self, command: &str) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

impl<E: Engine + ?Sized> Engine for &mut E {
    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        (**self).init(config)
    }

    fn state(&mut self) -> Result<EngineState> {
        (**self).state()
    }

    fn game_variables(&mut self, vars: &[GameVariable]) -> Result<Vec<f64>> {
        (**self).game_variables(vars)
    }

    fn make_action(&mut self, buttons: &[bool], tics: u32) -> Result<f64> {
        (**self).make_action(buttons, tics)
    }

    fn advance_action(&mut self, tics: u32) -> Result<()> {
        (**self).advance_action(tics)
    }

    fn is_player_dead(&mut self) -> Result<bool> {
        (**self).is_player_dead()
    }

    fn is_episode_finished(&mut self) -> Result<bool> {
        (**self).is_episode_finished()
    }

    fn new_episode(&mut self) -> Result<()> {
        (**self).new_episode()
    }

    fn respawn_player(&mut self) -> Result<()> {
        (**self).respawn_player()
    }

    fn send_game_command(&mut self, command: &str) -> Result<()> {
        (**self).send_game_command(command)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
