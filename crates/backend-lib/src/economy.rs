//! Wager odds and payouts.
//!
//! All randomness comes from a [`RandomSource`] handed in by the caller, so odds can be
//! pinned in tests and replayed exactly.
use std::collections::VecDeque;
use std::sync::Arc;

use aura_common::Role;
use parking_lot::Mutex;
use rand::Rng;

use crate::config::EconomySettings;

/// Source of uniform draws
pub trait RandomSource: Send + Sync {
    /// Uniform draw from `[0, 1)`
    fn unit(&self) -> f64;
    /// Uniform integer from `low..=high`
    fn between(&self, low: u64, high: u64) -> u64;
}

/// Thread-local OS-seeded generator
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn unit(&self) -> f64 {
        rand::rng().random::<f64>()
    }

    fn between(&self, low: u64, high: u64) -> u64 {
        if low >= high {
            return low;
        }
        rand::rng().random_range(low..=high)
    }
}

/// Replays queued draws in order.
///
/// Once a queue runs dry, `unit` returns `0.0` and `between` returns `low`.
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    units: Mutex<VecDeque<f64>>,
    integers: Mutex<VecDeque<u64>>,
}

impl ScriptedRandom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_units(units: impl IntoIterator<Item = f64>) -> Self {
        let source = Self::new();
        source.push_units(units);
        source
    }

    pub fn push_units(&self, units: impl IntoIterator<Item = f64>) {
        self.units.lock().extend(units);
    }

    pub fn push_integers(&self, integers: impl IntoIterator<Item = u64>) {
        self.integers.lock().extend(integers);
    }
}

impl RandomSource for ScriptedRandom {
    fn unit(&self) -> f64 {
        self.units.lock().pop_front().unwrap_or(0.0)
    }

    fn between(&self, low: u64, high: u64) -> u64 {
        self.integers
            .lock()
            .pop_front()
            .map_or(low, |n| n.clamp(low, high.max(low)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceRoll {
    pub face: u32,
    pub win: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllInRoll {
    pub win: bool,
    /// `0` on a loss
    pub multiplier: u64,
}

/// Map a unit draw onto `1..=faces`
fn face_for(unit: f64, faces: u32) -> u32 {
    let index = (unit * f64::from(faces)) as u32;
    index.min(faces.saturating_sub(1)) + 1
}

/// Map a unit draw onto the faces other than `win_face`
fn losing_face(unit: f64, faces: u32, win_face: u32) -> u32 {
    let face = face_for(unit, faces.saturating_sub(1));
    if face >= win_face {
        face + 1
    } else {
        face
    }
}

/// Roll the die for `role`.
///
/// Members win only on the designated face. Privileged callers win whenever the draw
/// falls below `privileged_win_probability`.
pub fn roll_dice(settings: &EconomySettings, role: Role, rng: &dyn RandomSource) -> DiceRoll {
    let unit = rng.unit();
    let faces = settings.dice_faces;
    let win_face = settings.dice_win_face;

    if role.is_privileged() {
        let win = unit < settings.privileged_win_probability;
        let face = if win {
            win_face
        } else {
            losing_face(unit, faces, win_face)
        };
        return DiceRoll { face, win };
    }

    let face = face_for(unit, faces);
    DiceRoll {
        face,
        win: face == win_face,
    }
}

/// Roll an all-in for `role`. A win draws the multiplier from `1..=allin_max_multiplier`.
pub fn roll_allin(settings: &EconomySettings, role: Role, rng: &dyn RandomSource) -> AllInRoll {
    let threshold = if role.is_privileged() {
        settings.privileged_win_probability
    } else {
        settings.allin_win_probability
    };

    if rng.unit() < threshold {
        AllInRoll {
            win: true,
            multiplier: rng.between(1, settings.allin_max_multiplier),
        }
    } else {
        AllInRoll {
            win: false,
            multiplier: 0,
        }
    }
}

/// Odds plus the random source they draw from
#[derive(Clone)]
pub struct Economy {
    settings: EconomySettings,
    rng: Arc<dyn RandomSource>,
}

impl Economy {
    pub fn new(settings: EconomySettings, rng: Arc<dyn RandomSource>) -> Self {
        Self { settings, rng }
    }

    pub fn settings(&self) -> &EconomySettings {
        &self.settings
    }

    pub fn roll_dice(&self, role: Role) -> DiceRoll {
        roll_dice(&self.settings, role, self.rng.as_ref())
    }

    pub fn roll_allin(&self, role: Role) -> AllInRoll {
        roll_allin(&self.settings, role, self.rng.as_ref())
    }
}
