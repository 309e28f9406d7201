use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;

use crate::game::{GameProperties, Property};

const WEAPONS: [(Property, &str); 6] = [
    (Property::Pistol, "pistol"),
    (Property::Shotgun, "shotgun"),
    (Property::Chaingun, "chaingun"),
    (Property::RocketLauncher, "rocketlauncher"),
    (Property::PlasmaRifle, "plasmarifle"),
    (Property::Bfg9000, "bfg9000"),
];

const AMMO: [(Property, &str); 4] = [
    (Property::Bullets, "bullets"),
    (Property::Shells, "shells"),
    (Property::Rockets, "rockets"),
    (Property::Cells, "cells"),
];

/// Per-map game statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub kills: u64,
    pub deaths: u64,
    pub suicides: u64,
    pub frags: i64,
    pub medikits: u64,
    pub armors: u64,
    pub weapons: BTreeMap<&'static str, u64>,
    pub ammo: BTreeMap<&'static str, u64>,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            weapons: WEAPONS.iter().map(|&(_, name)| (name, 0)).collect(),
            ammo: AMMO.iter().map(|&(_, name)| (name, 0)).collect(),
            ..Default::default()
        }
    }

    /// Kill / death ratio; kills when the agent never died.
    pub fn kill_death_ratio(&self) -> f64 {
        self.kills as f64 / self.deaths.max(1) as f64
    }

    pub fn record_death(&mut self) {
        self.deaths += 1;
    }

    /// Account for what changed between two consecutive snapshots of the same life.
    pub fn update(&mut self, prev: &GameProperties, cur: &GameProperties) {
        let frag_delta = cur.get(Property::FragCount) - prev.get(Property::FragCount);
        if frag_delta > 0 {
            self.kills += frag_delta as u64;
        } else if frag_delta < 0 {
            self.suicides += (-frag_delta) as u64;
        }
        self.frags += frag_delta as i64;

        if cur.get(Property::Health) > prev.get(Property::Health) {
            self.medikits += 1;
        }
        if cur.get(Property::Armor) > prev.get(Property::Armor) {
            self.armors += 1;
        }
        for (property, name) in WEAPONS {
            if prev.get(property) == 0 && cur.get(property) > 0 {
                *self.weapons.entry(name).or_default() += 1;
            }
        }
        for (property, name) in AMMO {
            if cur.get(property) > prev.get(property) {
                *self.ammo.entry(name).or_default() += 1;
            }
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "kills={} deaths={} suicides={} frags={} k/d={:.2} medikits={} armors={}",
            self.kills,
            self.deaths,
            self.suicides,
            self.frags,
            self.kill_death_ratio(),
            self.medikits,
            self.armors,
        )
    }
}

/// Dumped with the derived `k/d` ratio next to the counters.
impl Serialize for Statistics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Statistics", 9)?;
        s.serialize_field("kills", &self.kills)?;
        s.serialize_field("deaths", &self.deaths)?;
        s.serialize_field("suicides", &self.suicides)?;
        s.serialize_field("frags", &self.frags)?;
        s.serialize_field("k/d", &self.kill_death_ratio())?;
        s.serialize_field("medikits", &self.medikits)?;
        s.serialize_field("armors", &self.armors)?;
        s.serialize_field("weapons", &self.weapons)?;
        s.serialize_field("ammo", &self.ammo)?;
        s.end()
    }
}
