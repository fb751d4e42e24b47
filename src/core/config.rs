//! Tunables for the engine, the generator, the agent and the episode controller.
//!
//! Every struct has a `Default` matching the reference reward table and a
//! `validate()` that rejects values the engine cannot honor.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

/// Extra penalty for stepping back onto a cell of an abandoned timeline.
pub const REVISIT_PENALTY: i32 = -10;
/// Extra penalty for re-entering a lethal cell that is already known.
pub const RE_ENTER_POISON_PENALTY: i32 = -20;
pub const INITIAL_REWIND_BUDGET: u32 = 5;
pub const MAX_HEALTH: i32 = 100;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {got}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        got: String,
    },
    #[error("{0} must be a penalty (<= 0)")]
    NotAPenalty(&'static str),
    #[error("{0} must be a reward (>= 0)")]
    NotAReward(&'static str),
    #[error("failure_limits must not be empty")]
    EmptyFailureLimits,
}

fn out_of_range(field: &'static str, expected: &'static str, got: impl ToString) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        expected,
        got: got.to_string(),
    }
}

/// Reward table and rule constants for [`crate::engine::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimConfig {
    pub rewind_cost: i32,
    /// How many snapshots a rewind goes back.
    pub rewind_steps: usize,
    /// Health lost on a spike.
    pub trap_damage: i32,
    pub trap_penalty: i32,
    pub goal_reward: i32,
    pub step_penalty: i32,
    pub coin_reward: i32,
    pub revisit_penalty: i32,
    pub re_enter_poison_penalty: i32,
    pub initial_rewind_budget: u32,
    pub max_health: i32,
    /// Ring capacity of the rewind history.
    pub history_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rewind_cost: -5,
            rewind_steps: 5,
            trap_damage: 30,
            trap_penalty: -50,
            goal_reward: 100,
            step_penalty: -1,
            coin_reward: 10,
            revisit_penalty: REVISIT_PENALTY,
            re_enter_poison_penalty: RE_ENTER_POISON_PENALTY,
            initial_rewind_budget: INITIAL_REWIND_BUDGET,
            max_health: MAX_HEALTH,
            history_capacity: 512,
        }
    }
}

impl SimConfig {
    pub fn with_rewind_budget(mut self, budget: u32) -> Self {
        self.initial_rewind_budget = budget;
        self
    }

    pub fn with_rewind_steps(mut self, steps: usize) -> Self {
        self.rewind_steps = steps;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [
            ("rewind_cost", self.rewind_cost),
            ("trap_penalty", self.trap_penalty),
            ("step_penalty", self.step_penalty),
            ("revisit_penalty", self.revisit_penalty),
            ("re_enter_poison_penalty", self.re_enter_poison_penalty),
        ] {
            if v > 0 {
                return Err(ConfigError::NotAPenalty(name));
            }
        }
        for (name, v) in [
            ("goal_reward", self.goal_reward),
            ("coin_reward", self.coin_reward),
            ("trap_damage", self.trap_damage),
        ] {
            if v < 0 {
                return Err(ConfigError::NotAReward(name));
            }
        }
        if self.rewind_steps == 0 {
            return Err(out_of_range("rewind_steps", ">= 1", self.rewind_steps));
        }
        if self.max_health <= 0 || self.max_health > MAX_HEALTH {
            return Err(out_of_range("max_health", "in 1..=100", self.max_health));
        }
        if self.history_capacity < self.rewind_steps {
            return Err(out_of_range(
                "history_capacity",
                ">= rewind_steps",
                self.history_capacity,
            ));
        }
        Ok(())
    }
}

/// Difficulty knobs derived from the level number.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LevelProfile {
    pub level: u32,
    pub size: u32,
    pub trap_density: f32,
    pub branching_factor: f32,
}

impl LevelProfile {
    pub fn for_level(level: u32) -> Self {
        let level = level.max(1);
        let l = level as f32;
        Self {
            level,
            size: (12 + 2 * (level - 1)).min(22),
            trap_density: (0.2 + 0.12 * l).min(0.8),
            branching_factor: (0.4 + 0.05 * l).min(0.9),
        }
    }

    /// Longest dead-end branch dug from an open cell.
    pub fn max_branch_len(&self) -> u32 {
        6 + self.level
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GeneratorConfig {
    /// Open-cell fraction of the total area the branching phase aims for.
    pub target_open_fraction: f32,
    /// Flood-fill the result and regenerate when the goal is cut off.
    pub verify_connectivity: bool,
    pub max_regenerations: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            target_open_fraction: 0.65,
            verify_connectivity: true,
            max_regenerations: 8,
        }
    }
}

impl GeneratorConfig {
    /// Ship the first carve as-is, even if the goal ended up disconnected.
    pub fn unchecked() -> Self {
        Self {
            verify_connectivity: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.target_open_fraction) {
            return Err(out_of_range(
                "target_open_fraction",
                "in [0, 1]",
                self.target_open_fraction,
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AgentConfig {
    /// Learning rate.
    pub alpha: f32,
    /// Discount factor.
    pub gamma: f32,
    /// Probability of keeping the reverse of the previous move in the random pick.
    pub allow_reverse_prob: f32,
    pub min_epsilon: f32,
    pub epsilon_decay: f32,
    pub conservative_epsilon: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            gamma: 0.9,
            allow_reverse_prob: 0.3,
            min_epsilon: 0.01,
            epsilon_decay: 0.6,
            conservative_epsilon: 0.01,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(out_of_range("alpha", "in (0, 1]", self.alpha));
        }
        if !(0.0..1.0).contains(&self.gamma) {
            return Err(out_of_range("gamma", "in [0, 1)", self.gamma));
        }
        for (name, v) in [
            ("allow_reverse_prob", self.allow_reverse_prob),
            ("min_epsilon", self.min_epsilon),
            ("epsilon_decay", self.epsilon_decay),
            ("conservative_epsilon", self.conservative_epsilon),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(out_of_range(name, "in [0, 1]", v));
            }
        }
        Ok(())
    }
}

/// Episode/level policy for [`crate::session::Session`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    pub sim: SimConfig,
    pub generator: GeneratorConfig,
    pub agent: AgentConfig,
    /// Allowed attempts per level before the policy is frozen; levels past
    /// the end reuse the last entry.
    pub failure_limits: Vec<u32>,
    /// Difficulty of the fixed evaluation map used in Test mode.
    pub test_level: u32,
    pub win_delay_ms: u64,
    pub loss_delay_ms: u64,
    pub rewind_pause_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sim: SimConfig::default(),
            generator: GeneratorConfig::default(),
            agent: AgentConfig::default(),
            failure_limits: vec![5, 4, 3, 2, 1],
            test_level: 3,
            win_delay_ms: 3_500,
            loss_delay_ms: 1_000,
            rewind_pause_ms: 600,
        }
    }
}

impl SessionConfig {
    pub fn failure_limit(&self, level: u32) -> u32 {
        let i = (level.max(1) - 1) as usize;
        self.failure_limits
            .get(i)
            .or_else(|| self.failure_limits.last())
            .copied()
            .unwrap_or(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sim.validate()?;
        self.generator.validate()?;
        self.agent.validate()?;
        if self.failure_limits.is_empty() {
            return Err(ConfigError::EmptyFailureLimits);
        }
        if self.test_level == 0 {
            return Err(out_of_range("test_level", ">= 1", self.test_level));
        }
        Ok(())
    }
}
