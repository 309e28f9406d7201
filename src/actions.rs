use anyhow::{Result, anyhow, bail, ensure};
use serde::Serialize;
use std::collections::HashMap;

use crate::engine::Button;

// =============================================================================
// Action Categories
// =============================================================================

/// How a modifier button (speed / crouch) is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ButtonMode {
    On,
    Off,
    Manual,
}

fn category_buttons(name: &str) -> Option<&'static [Button]> {
    let buttons: &'static [Button] = match name {
        "move_fb" => &[Button::MoveForward, Button::MoveBackward],
        "move_lr" => &[Button::MoveLeft, Button::MoveRight],
        "turn_lr" => &[Button::TurnLeft, Button::TurnRight],
        "look_ud" => &[Button::LookUp, Button::LookDown],
        "attack" => &[Button::Attack],
        "speed" => &[Button::Speed],
        "crouch" => &[Button::Crouch],
        _ => return None,
    };
    Some(buttons)
}

/// Buttons the session presses on its own (recovery turns).
const RECOVERY_BUTTONS: [Button; 3] = [Button::MoveForward, Button::TurnRight, Button::Speed];

pub struct ActionParams<'a> {
    pub action_combinations: &'a str,
    pub speed: ButtonMode,
    pub crouch: ButtonMode,
}

// =============================================================================
// Action Builder
// =============================================================================

/// Maps action indices chosen by the network to engine button vectors.
///
/// `action_combinations` is a `;`-separated list of groups. Inside a group,
/// `+` joins categories; the group expands to every combination where each
/// category contributes one of its buttons or nothing.
#[derive(Debug, Clone)]
pub struct ActionBuilder {
    action_set: Vec<Vec<Button>>,
    available_buttons: Vec<Button>,
    always_on: Vec<Button>,
    mapping: Vec<Button>,
    index: HashMap<Button, usize>,
}

impl ActionBuilder {
    pub fn new(params: &ActionParams<'_>) -> Result<Self> {
        let action_set = create_action_set(params.action_combinations)?;
        ensure!(!action_set.is_empty(), "empty action set");

        for (name, mode, button) in [
            ("speed", params.speed, Button::Speed),
            ("crouch", params.crouch, Button::Crouch),
        ] {
            let used = action_set.iter().any(|a| a.contains(&button));
            ensure!(
                !used || mode == ButtonMode::Manual,
                "`{name}` appears in the action combinations but {name} is not manual"
            );
        }

        let mut available_buttons = Vec::new();
        for action in &action_set {
            for &button in action {
                if !available_buttons.contains(&button) {
                    available_buttons.push(button);
                }
            }
        }
        let mut always_on = Vec::new();
        for (mode, button) in [(params.speed, Button::Speed), (params.crouch, Button::Crouch)] {
            if mode == ButtonMode::On {
                always_on.push(button);
                if !available_buttons.contains(&button) {
                    available_buttons.push(button);
                }
            }
        }

        let mut mapping = available_buttons.clone();
        for button in RECOVERY_BUTTONS.into_iter().chain(Button::SELECT_WEAPONS) {
            if !mapping.contains(&button) {
                mapping.push(button);
            }
        }
        let index = mapping.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        Ok(Self {
            action_set,
            available_buttons,
            always_on,
            mapping,
            index,
        })
    }

    pub fn n_actions(&self) -> usize {
        self.action_set.len()
    }

    pub fn available_buttons(&self) -> &[Button] {
        &self.available_buttons
    }

    /// Buttons in the order they are registered with the engine.
    pub fn button_mapping(&self) -> &[Button] {
        &self.mapping
    }

    pub fn button_index(&self, button: Button) -> Option<usize> {
        self.index.get(&button).copied()
    }

    pub fn action_buttons(&self, action_id: usize) -> Option<&[Button]> {
        self.action_set.get(action_id).map(Vec::as_slice)
    }

    pub fn empty_action(&self) -> Vec<bool> {
        vec![false; self.mapping.len()]
    }

    /// Engine button vector for `action_id`.
    pub fn get_action(&self, action_id: usize) -> Result<Vec<bool>> {
        let buttons = self.action_set.get(action_id).ok_or_else(|| {
            anyhow!(
                "action {action_id} out of range ({} actions)",
                self.action_set.len()
            )
        })?;
        let mut action = self.empty_action();
        for button in buttons.iter().chain(&self.always_on) {
            action[self.index[button]] = true;
        }
        Ok(action)
    }
}

fn create_action_set(action_combinations: &str) -> Result<Vec<Vec<Button>>> {
    let mut action_set: Vec<Vec<Button>> = Vec::new();
    for group in action_combinations.split(';').filter(|g| !g.trim().is_empty()) {
        let mut combos: Vec<Vec<Button>> = vec![Vec::new()];
        for name in group.split('+').map(str::trim) {
            let Some(buttons) = category_buttons(name) else {
                bail!("unknown action category `{name}` in `{action_combinations}`");
            };
            let mut next = Vec::with_capacity(combos.len() * (buttons.len() + 1));
            for combo in &combos {
                next.push(combo.clone());
                for &button in buttons {
                    let mut with = combo.clone();
                    with.push(button);
                    next.push(with);
                }
            }
            combos = next;
        }
        for combo in combos {
            if !action_set.contains(&combo) {
                action_set.push(combo);
            }
        }
    }
    Ok(action_set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(combos: &str, speed: ButtonMode, crouch: ButtonMode) -> ActionBuilder {
        ActionBuilder::new(&ActionParams {
            action_combinations: combos,
            speed,
            crouch,
        })
        .unwrap()
    }

    #[test]
    fn default_combinations_form_full_product() {
        let b = builder(
            "move_fb+turn_lr+move_lr+attack",
            ButtonMode::Off,
            ButtonMode::Off,
        );
        assert_eq!(b.n_actions(), 3 * 3 * 3 * 2);
        assert_eq!(b.action_buttons(0), Some(&[][..]));
        assert_eq!(b.available_buttons().len(), 7);
        // recovery SPEED + 7 weapon slots follow the available buttons
        assert_eq!(b.button_mapping().len(), 7 + 1 + 7);
        assert_eq!(b.button_index(Button::SelectWeapon1), Some(8));
    }

    #[test]
    fn groups_are_unioned_without_duplicates() {
        let b = builder("attack;turn_lr+attack", ButtonMode::Off, ButtonMode::Off);
        // [], [ATTACK] from the first group; the second adds 4 new ones
        assert_eq!(b.n_actions(), 2 + 4);
    }

    #[test]
    fn always_on_buttons_are_pressed() {
        let b = builder("attack", ButtonMode::On, ButtonMode::Off);
        let speed = b.button_index(Button::Speed).unwrap();
        let attack = b.button_index(Button::Attack).unwrap();
        let noop = b.get_action(0).unwrap();
        assert!(noop[speed]);
        assert!(!noop[attack]);
        let fire = b.get_action(1).unwrap();
        assert!(fire[speed] && fire[attack]);
    }

    #[test]
    fn manual_buttons_require_manual_mode() {
        assert!(
            ActionBuilder::new(&ActionParams {
                action_combinations: "attack+speed",
                speed: ButtonMode::Off,
                crouch: ButtonMode::Off,
            })
            .is_err()
        );
        let b = builder("attack+speed", ButtonMode::Manual, ButtonMode::Off);
        assert_eq!(b.n_actions(), 4);
    }

    #[test]
    fn unknown_categories_and_ids_fail() {
        assert!(create_action_set("move_fb+jump").is_err());
        let b = builder("attack", ButtonMode::Off, ButtonMode::Off);
        assert!(b.get_action(2).is_err());
    }
}
