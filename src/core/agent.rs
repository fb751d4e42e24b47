//! Tabular Q-learning agent.
//!
//! The agent is an owned object: the controller passes it agent states and
//! grids, it never reaches into the simulation. Its table survives level
//! changes (curriculum continuity); only [`QAgent::reset_hard`] clears it.

use core::fmt;

use hashbrown::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::engine::{AgentAction, AgentState, StatusEffect};
use crate::grid::Grid;
use crate::pathfind;
use crate::prng::Prng;

/// Initial value of `Rewind` in an unseen state.
pub const INIT_REWIND_VALUE: f32 = -5.0;
/// Initial value of `Wait` in an unseen state.
pub const INIT_WAIT_VALUE: f32 = -10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Mode {
    /// Epsilon-greedy with table updates.
    #[default]
    Training,
    /// Greedy, frozen table.
    Inference,
    /// Deterministic shortest-safe-path play, frozen table.
    Test,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Training => "training",
            Mode::Inference => "inference",
            Mode::Test => "test",
        }
    }

    pub fn from_name(v: &str) -> Option<Self> {
        match v {
            "training" | "train" => Some(Mode::Training),
            "inference" | "infer" => Some(Mode::Inference),
            "test" | "eval" => Some(Mode::Test),
            _ => None,
        }
    }
}

/// Compact state encoding: position, status, and whether a rewind is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StateKey {
    pub x: i32,
    pub y: i32,
    pub status: StatusEffect,
    pub has_rewind: bool,
}

impl StateKey {
    pub fn of(agent: &AgentState) -> Self {
        Self {
            x: agent.position.x,
            y: agent.position.y,
            status: agent.status_effect,
            has_rewind: agent.rewind_budget > 0,
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.x,
            self.y,
            self.status.as_str(),
            if self.has_rewind {
                "HAS_REWIND"
            } else {
                "NO_REWIND"
            }
        )
    }
}

/// Per-action values of one state, indexed by [`AgentAction::index`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActionValues([f32; 6]);

impl Default for ActionValues {
    fn default() -> Self {
        let mut v = [0.0; 6];
        v[AgentAction::Rewind.index()] = INIT_REWIND_VALUE;
        v[AgentAction::Wait.index()] = INIT_WAIT_VALUE;
        Self(v)
    }
}

impl ActionValues {
    pub fn get(&self, action: AgentAction) -> f32 {
        self.0[action.index()]
    }

    pub fn set(&mut self, action: AgentAction, value: f32) {
        self.0[action.index()] = value;
    }

    pub fn max(&self) -> f32 {
        self.0.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Every action holding the maximum, in table order.
    pub fn argmax(&self) -> Vec<AgentAction> {
        let best = self.max();
        AgentAction::ALL
            .into_iter()
            .filter(|a| self.get(*a) == best)
            .collect()
    }
}

pub type QTable = HashMap<StateKey, ActionValues>;

#[derive(Debug, Clone)]
pub struct QAgent {
    cfg: AgentConfig,
    table: QTable,
    epsilon: f32,
    mode: Mode,
    last_action: Option<AgentAction>,
    rng: Prng,
}

impl QAgent {
    pub fn new(cfg: AgentConfig, seed: u64) -> Self {
        let mut agent = Self {
            cfg,
            table: QTable::new(),
            epsilon: 0.0,
            mode: Mode::Training,
            last_action: None,
            rng: Prng::new(seed ^ 0x51_A6_E4_70),
        };
        agent.reset_hard(1);
        agent
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Override exploration (e.g. from a settings file).
    pub fn set_epsilon(&mut self, epsilon: f32) {
        self.epsilon = epsilon.clamp(0.0, 1.0);
    }

    pub fn last_action(&self) -> Option<AgentAction> {
        self.last_action
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// Values for `agent`'s state, without creating an entry.
    pub fn q_values(&self, agent: &AgentState) -> ActionValues {
        self.table
            .get(&StateKey::of(agent))
            .copied()
            .unwrap_or_default()
    }

    fn row_mut(&mut self, key: StateKey) -> &mut ActionValues {
        self.table.entry(key).or_default()
    }

    /// Wipe the table and every counter; exploration restarts high.
    pub fn reset_hard(&mut self, level: u32) {
        self.table.clear();
        self.epsilon = (0.9 - 0.18 * level as f32).max(0.15);
        self.last_action = None;
        self.mode = Mode::Training;
    }

    /// Keep the table, restart exploration for `level`.
    pub fn reset_for_next_level(&mut self, level: u32) {
        self.epsilon = (0.8 - 0.1 * level as f32).max(0.1);
        self.last_action = None;
    }

    /// After a lost episode; a no-op outside training.
    pub fn decay_epsilon(&mut self) {
        if self.mode != Mode::Training {
            return;
        }
        self.epsilon = (self.epsilon * self.cfg.epsilon_decay).max(self.cfg.min_epsilon);
    }

    /// Freeze exploration once a level has eaten its retry budget.
    pub fn force_conservative_policy(&mut self) {
        self.epsilon = self.cfg.conservative_epsilon;
    }

    pub fn select_action(&mut self, agent: &AgentState, grid: Option<&Grid>) -> AgentAction {
        if agent.is_trapped() {
            return AgentAction::Rewind;
        }

        if self.mode == Mode::Test {
            if let Some(grid) = grid {
                return pathfind::first_step_to_goal(grid, agent.position)
                    .unwrap_or_else(|| self.smart_random_move());
            }
        }

        let epsilon = match self.mode {
            Mode::Training => self.epsilon,
            Mode::Inference | Mode::Test => 0.0,
        };
        if self.rng.chance(epsilon) {
            return self.smart_random_move();
        }

        let best = self.q_values(agent).argmax();
        match self.rng.pick(&best) {
            Some(a) => *a,
            None => self.smart_random_move(),
        }
    }

    /// Uniform over the four moves, but drops the reverse of the previous move
    /// most of the time to damp oscillation.
    pub fn smart_random_move(&mut self) -> AgentAction {
        let reverse = self.last_action.and_then(AgentAction::reverse);
        if let Some(rev) = reverse {
            if !self.rng.chance(self.cfg.allow_reverse_prob) {
                let forward: Vec<AgentAction> = AgentAction::MOVES
                    .into_iter()
                    .filter(|a| *a != rev)
                    .collect();
                if let Some(a) = self.rng.pick(&forward) {
                    return *a;
                }
            }
        }
        AgentAction::MOVES[self.rng.gen_range_usize(0, AgentAction::MOVES.len())]
    }

    /// One-step Bellman backup. Only learns in training, and never from `Wait`.
    pub fn update(&mut self, prev: &AgentState, action: AgentAction, reward: i32, next: &AgentState) {
        self.last_action = Some(action);
        if self.mode != Mode::Training || action == AgentAction::Wait {
            return;
        }

        let next_max = self.row_mut(StateKey::of(next)).max();
        let alpha = self.cfg.alpha;
        let gamma = self.cfg.gamma;
        let row = self.row_mut(StateKey::of(prev));
        let q = row.get(action);
        row.set(action, q + alpha * (reward as f32 + gamma * next_max - q));
    }
}

impl Default for QAgent {
    fn default() -> Self {
        Self::new(AgentConfig::default(), 0)
    }
}
