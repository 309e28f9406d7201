mod common;

use std::path::Path;
use std::time::Duration;

use arnold::actions::{ActionBuilder, ActionParams, ButtonMode};
use arnold::engine::{Button, GameVariable};
use arnold::game::{Game, GameConfig, Property, VariableSpec};
use arnold::observation::StateHistory;
use common::{FakeEngine, write_resources};
use tempfile::TempDir;

fn resources() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_resources(dir.path(), "deathmatch");
    dir
}

fn config(root: &Path) -> GameConfig {
    GameConfig {
        scenario: "deathmatch".to_string(),
        resources_dir: root.to_path_buf(),
        score_variable: GameVariable::User(2),
        name: "Arnold4".to_string(),
        ..Default::default()
    }
}

fn builder() -> ActionBuilder {
    ActionBuilder::new(&ActionParams {
        action_combinations: "move_fb+turn_lr+move_lr+attack",
        speed: ButtonMode::Off,
        crouch: ButtonMode::Off,
    })
    .unwrap()
}

fn action_with(builder: &ActionBuilder, buttons: &[Button]) -> usize {
    (0..builder.n_actions())
        .find(|&i| builder.action_buttons(i) == Some(buttons))
        .unwrap()
}

fn pressed(game: &Game<&mut FakeEngine>, button: Button) -> bool {
    let idx = game.action_builder().button_index(button).unwrap();
    game.engine().last_action().0[idx]
}

#[test]
fn missing_wads_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = FakeEngine::new();
    assert!(Game::new(config(dir.path()), builder(), &mut engine).is_err());
}

#[test]
fn start_configures_the_engine() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let action_builder = builder();
    let mapping = action_builder.button_mapping().to_vec();
    {
        let mut game = Game::new(config(dir.path()), action_builder, &mut engine).unwrap();
        game.start(3, None).unwrap();
        assert_eq!(game.map_id(), Some(3));
        let props = game.properties().unwrap();
        assert_eq!(props.get(Property::Health), 100);
        assert_eq!(props.get(Property::SelectedAmmo), 50);
        assert!(game.prev_properties().is_none());
        assert!(game.buffers().screen.is_some());
    }

    let config = engine.config.as_ref().unwrap();
    assert_eq!(config.map, "map03");
    assert!(config.scenario_path.ends_with("scenarios/deathmatch.wad"));
    assert!(config.game_path.ends_with("freedoom2.wad"));
    for arg in ["-deathmatch", "+freelook 0", "+name Arnold4", "+colorset 1"] {
        assert!(config.game_args.iter().any(|a| a == arg), "missing {arg}");
    }
    assert_eq!(config.buttons, mapping);
    assert_eq!(config.game_variables.last(), Some(&GameVariable::User(2)));
    assert_eq!(engine.advanced, vec![3]);
}

#[test]
fn unknown_selection_is_replaced() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
    game.start(1, None).unwrap();

    game.engine_mut().set(GameVariable::SelectedWeapon, -1.0);
    game.engine_mut().set(GameVariable::SelectedWeaponAmmo, -1.0);
    game.update_game_variables().unwrap();
    let props = game.properties().unwrap();
    assert_eq!(props.get(Property::SelectedWeapon), 1);
    assert_eq!(props.get(Property::SelectedAmmo), 0);
    assert!(game.prev_properties().is_some());
}

#[test]
fn inconsistent_variables_are_errors() {
    let cases: [(GameVariable, f64); 6] = [
        (GameVariable::SelectedWeaponAmmo, 10.0),
        (GameVariable::Health, 99.5),
        (GameVariable::Health, 250.0),
        (GameVariable::Ammo(2), 250.0),
        (GameVariable::SelectedWeapon, 3.0),
        (GameVariable::Weapon(4), 3.0),
    ];
    for (var, value) in cases {
        let dir = resources();
        let mut engine = FakeEngine::new();
        let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
        game.start(1, None).unwrap();
        game.engine_mut().set(var, value);
        assert!(game.update_game_variables().is_err(), "{var} = {value}");
    }
}

#[test]
fn best_weapon_is_selected() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
    game.start(1, None).unwrap();

    // pistol already selected: nothing to do
    game.make_action(0, 4, None).unwrap();
    assert!(!Button::SELECT_WEAPONS.iter().any(|&b| pressed(&game, b)));

    // BFG without enough cells is skipped in favour of the shotgun
    game.engine_mut().set(GameVariable::Weapon(7), 1.0);
    game.engine_mut().set(GameVariable::Ammo(6), 30.0);
    game.engine_mut().set(GameVariable::Weapon(3), 1.0);
    game.engine_mut().set(GameVariable::Ammo(3), 8.0);
    game.update_game_variables().unwrap();
    game.make_action(0, 4, None).unwrap();
    assert!(pressed(&game, Button::SelectWeapon3));
    assert!(!pressed(&game, Button::SelectWeapon7));

    game.engine_mut().set(GameVariable::Ammo(6), 40.0);
    game.update_game_variables().unwrap();
    game.make_action(0, 4, None).unwrap();
    assert!(pressed(&game, Button::SelectWeapon7));
    assert!(!pressed(&game, Button::SelectWeapon3));
}

#[test]
fn idle_agent_gets_manual_control() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
    game.start(1, None).unwrap();

    for _ in 0..29 {
        game.make_action(0, 4, None).unwrap();
        assert_eq!(game.engine().last_action().1, 4);
    }
    game.make_action(0, 4, None).unwrap();
    assert_eq!(game.engine().last_action().1, 40);
    assert!(pressed(&game, Button::TurnRight));
    assert!(pressed(&game, Button::Speed));
    assert!(pressed(&game, Button::MoveForward));
    assert_eq!(game.manual_counters(), (0, 0));
}

#[test]
fn non_turning_agent_is_turned_around() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let action_builder = builder();
    let forward = action_with(&action_builder, &[Button::MoveForward]);
    let mut game = Game::new(config(dir.path()), action_builder, &mut engine).unwrap();
    game.start(1, None).unwrap();

    for _ in 0..59 {
        game.make_action(forward, 4, None).unwrap();
    }
    assert_eq!(game.manual_counters(), (0, 59));
    game.make_action(forward, 4, None).unwrap();
    assert_eq!(game.engine().last_action().1, 40);
    assert!(pressed(&game, Button::TurnRight));
    assert!(!pressed(&game, Button::MoveForward));
}

#[test]
fn visible_mode_plays_tic_by_tic() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    engine.die_every = Some(2);
    let mut cfg = config(dir.path());
    cfg.visible = true;
    let mut game = Game::new(cfg, builder(), &mut engine).unwrap();
    game.start(1, None).unwrap();

    game.make_action(0, 4, Some(Duration::ZERO)).unwrap();
    // stops at the death on the second tic
    let tics: Vec<u32> = game.engine().actions.iter().map(|a| a.1).collect();
    assert_eq!(tics, vec![1, 1]);
    assert!(game.is_player_dead().unwrap());
}

#[test]
fn reset_respawns_dead_player() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    {
        let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
        game.start(1, None).unwrap();
        game.engine_mut().kill_player();
        game.reset().unwrap();
        assert!(!game.is_player_dead().unwrap());
        assert_eq!(game.statistics()[&1].deaths, 1);
        assert_eq!(game.properties().unwrap().get(Property::Health), 100);
    }
    assert_eq!(engine.respawns, 1);
    assert_eq!(engine.new_episodes, 0);
    assert_eq!(engine.advanced, vec![3, 3]);
}

#[test]
fn timed_episodes_restart_instead_of_respawning() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    {
        let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
        game.start(1, Some(60.0)).unwrap();
        game.engine_mut().kill_player();
        game.reset().unwrap();
        assert_eq!(game.statistics()[&1].deaths, 1);

        game.engine_mut().episode_finished = true;
        game.reset().unwrap();
        assert_eq!(game.statistics()[&1].deaths, 1);
    }
    assert_eq!(engine.respawns, 0);
    assert_eq!(engine.new_episodes, 2);
}

#[test]
fn stubborn_death_is_retried() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    engine.stay_dead_respawns = 2;
    {
        let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
        game.start(1, None).unwrap();
        game.engine_mut().kill_player();
        game.reset().unwrap();
        assert!(!game.is_player_dead().unwrap());
        assert_eq!(game.statistics()[&1].deaths, 1);
    }
    assert_eq!(engine.respawns, 3);
}

#[test]
fn transitions_require_a_final_state() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
    game.start(1, None).unwrap();
    assert!(game.respawn_player().is_err());
    assert!(game.new_episode().is_err());
    assert!(!game.is_final().unwrap());
}

#[test]
fn host_adds_scripted_marines() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let mut cfg = config(dir.path());
    cfg.n_bots = 3;
    cfg.use_scripted_marines = Some(true);
    {
        let mut game = Game::new(cfg, builder(), &mut engine).unwrap();
        game.start(1, None).unwrap();
    }
    assert_eq!(engine.commands, vec!["pukename set_value always 2 3"]);
}

#[test]
fn host_adds_builtin_bots() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let mut cfg = config(dir.path());
    cfg.n_bots = 2;
    cfg.use_scripted_marines = Some(false);
    {
        let mut game = Game::new(cfg, builder(), &mut engine).unwrap();
        game.start(1, None).unwrap();
    }
    assert_eq!(engine.commands, vec!["removebots", "addbot", "addbot"]);
}

#[test]
fn only_the_host_manages_bots() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let mut cfg = config(dir.path());
    cfg.n_bots = 2;
    cfg.use_scripted_marines = Some(true);
    cfg.player_rank = 1;
    cfg.players_per_game = 2;
    {
        let mut game = Game::new(cfg, builder(), &mut engine).unwrap();
        game.start(1, None).unwrap();
    }
    assert!(engine.commands.is_empty());

    let mut cfg = config(dir.path());
    cfg.n_bots = 2;
    assert!(Game::new(cfg, builder(), &mut engine).is_err());
}

#[test]
fn observations_fill_the_history() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
    game.start(1, None).unwrap();

    let variables = [
        VariableSpec::new(Property::Health, 101),
        VariableSpec::new(Property::SelectedAmmo, 301),
    ];
    let mut history = StateHistory::new(4).unwrap();
    game.observe_state(&variables, &mut history).unwrap();
    assert_eq!(history.len(), 4);
    let latest = history.latest().unwrap();
    assert_eq!(latest.variables, vec![100, 50]);
    assert_eq!(latest.screen.shape(), (3, 60, 108));
    assert!(latest.features.is_none());

    game.make_action(0, 4, None).unwrap();
    game.observe_state(&variables, &mut history).unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history.latest().unwrap().screen.data[0], 1);
}

#[test]
fn frags_are_counted_per_map() {
    let dir = resources();
    let mut engine = FakeEngine::new();
    engine.kill_every = Some(1);
    {
        let mut game = Game::new(config(dir.path()), builder(), &mut engine).unwrap();
        game.start(2, None).unwrap();
        for _ in 0..3 {
            game.make_action(0, 4, None).unwrap();
        }
        let stats = &game.statistics()[&2];
        assert_eq!(stats.kills, 3);
        assert_eq!(stats.frags, 3);
        assert_eq!(stats.deaths, 0);
        game.close().unwrap();
    }
    assert!(engine.closed);
}
