//! The transition function.
//!
//! [`step`] takes a [`SimulationState`] by value and returns the next one with
//! the reward it earned. Nothing else is touched: no RNG, no clock, no I/O, so
//! the same `(state, action)` always yields the same outcome.

use std::sync::Arc;

use hashbrown::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::grid::{CellKind, Grid, ItemKind, Position, TrapKind};
use crate::history::{HistoryStore, Snapshot};

/// Reward for asking to rewind with no hazard pending.
pub const REWIND_DENIED_PENALTY: i32 = -10;
/// Reward for a rewind that cannot be honored (no budget, no history).
pub const REWIND_FAILED_PENALTY: i32 = -5;
/// Reward for trying to move while locked in a lethal trap.
pub const LOCKED_PENALTY: i32 = -5;
/// Extra cost of walking into a wall.
pub const BUMP_PENALTY: i32 = -2;
/// Extra cost of stepping back onto the live path.
pub const BACKTRACK_PENALTY: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AgentAction {
    Up,
    Down,
    Left,
    Right,
    Rewind,
    Wait,
}

impl AgentAction {
    /// Every action, in value-table order.
    pub const ALL: [AgentAction; 6] = [
        AgentAction::Up,
        AgentAction::Down,
        AgentAction::Left,
        AgentAction::Right,
        AgentAction::Rewind,
        AgentAction::Wait,
    ];

    pub const MOVES: [AgentAction; 4] = [
        AgentAction::Up,
        AgentAction::Down,
        AgentAction::Left,
        AgentAction::Right,
    ];

    pub fn index(self) -> usize {
        match self {
            AgentAction::Up => 0,
            AgentAction::Down => 1,
            AgentAction::Left => 2,
            AgentAction::Right => 3,
            AgentAction::Rewind => 4,
            AgentAction::Wait => 5,
        }
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            AgentAction::Up => (0, -1),
            AgentAction::Down => (0, 1),
            AgentAction::Left => (-1, 0),
            AgentAction::Right => (1, 0),
            AgentAction::Rewind | AgentAction::Wait => (0, 0),
        }
    }

    pub fn is_move(self) -> bool {
        !matches!(self, AgentAction::Rewind | AgentAction::Wait)
    }

    /// The move that undoes this one.
    pub fn reverse(self) -> Option<AgentAction> {
        match self {
            AgentAction::Up => Some(AgentAction::Down),
            AgentAction::Down => Some(AgentAction::Up),
            AgentAction::Left => Some(AgentAction::Right),
            AgentAction::Right => Some(AgentAction::Left),
            AgentAction::Rewind | AgentAction::Wait => None,
        }
    }

    pub fn from_action_str(action: &str) -> Option<Self> {
        match action {
            "up" => Some(AgentAction::Up),
            "down" => Some(AgentAction::Down),
            "left" => Some(AgentAction::Left),
            "right" => Some(AgentAction::Right),
            "rewind" => Some(AgentAction::Rewind),
            "wait" => Some(AgentAction::Wait),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentAction::Up => "up",
            AgentAction::Down => "down",
            AgentAction::Left => "left",
            AgentAction::Right => "right",
            AgentAction::Rewind => "rewind",
            AgentAction::Wait => "wait",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StatusEffect {
    #[default]
    None,
    Poisoned,
    Fallen,
    /// Standing in a lethal trap with budget left: only `Rewind` is accepted.
    TrappedWaitingRewind,
}

impl StatusEffect {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusEffect::None => "NONE",
            StatusEffect::Poisoned => "POISONED",
            StatusEffect::Fallen => "FALLEN",
            StatusEffect::TrappedWaitingRewind => "TRAPPED_WAITING_REWIND",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GameResult {
    Win,
    Loss,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AgentState {
    pub position: Position,
    pub health: i32,
    pub rewind_budget: u32,
    pub steps_taken: u32,
    pub keys_collected: u32,
    pub coins: u32,
    /// Cells of abandoned timelines the agent has walked back into.
    pub visited_traps: HashSet<Position>,
    pub traps_triggered: u32,
    pub status_effect: StatusEffect,
}

impl AgentState {
    pub fn new(position: Position, health: i32, rewind_budget: u32) -> Self {
        Self {
            position,
            health,
            rewind_budget,
            steps_taken: 0,
            keys_collected: 0,
            coins: 0,
            visited_traps: HashSet::new(),
            traps_triggered: 0,
            status_effect: StatusEffect::None,
        }
    }

    pub fn is_trapped(&self) -> bool {
        self.status_effect == StatusEffect::TrappedWaitingRewind
    }
}

/// `SimulationState::default()` sits on the empty 0×0 grid and holds no
/// snapshots; it is cheap to swap in while the live state goes through [`step`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimulationState {
    pub grid: Arc<Grid>,
    pub agent: AgentState,
    pub score: i32,
    pub history: HistoryStore,
    pub episode: u32,
    pub is_game_over: bool,
    pub game_result: Option<GameResult>,
    pub active_path: Vec<Position>,
    pub abandoned_paths: Vec<Vec<Position>>,
    /// Lethal cells already discovered on this map (survives retries).
    pub global_known_traps: HashSet<Position>,
}

impl SimulationState {
    /// Fresh episode on `grid`, agent on the start cell.
    pub fn new(grid: Grid, cfg: &SimConfig, episode: u32) -> Self {
        let start = grid.start().unwrap_or(Position::new(1, 1));
        Self {
            grid: Arc::new(grid),
            agent: AgentState::new(start, cfg.max_health, cfg.initial_rewind_budget),
            score: 0,
            history: HistoryStore::new(cfg.history_capacity),
            episode,
            is_game_over: false,
            game_result: None,
            active_path: vec![start],
            abandoned_paths: Vec::new(),
            global_known_traps: HashSet::new(),
        }
    }

    pub fn with_known_traps(mut self, known: HashSet<Position>) -> Self {
        self.global_known_traps = known;
        self
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            grid: Arc::clone(&self.grid),
            agent: self.agent.clone(),
            score: self.score,
            path_len: self.active_path.len(),
        }
    }

    fn finish(&mut self, result: GameResult) {
        self.is_game_over = true;
        self.game_result = Some(result);
    }
}

/// What a transition did, for logs and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StepEvent {
    /// The episode was already over.
    Ignored,
    Moved,
    Bumped,
    Waited,
    CoinCollected,
    ItemCollected,
    SpikeHit,
    /// First time on this lethal cell; movement is now locked.
    LethalTrap,
    /// Re-entered a lethal cell already known on this map.
    KnownLethalTrap,
    Died,
    /// Walked through a closed door, spending a key.
    DoorUnlocked,
    /// Stepped on a trigger plate; the nearest door flipped.
    TriggerSprung,
    ReachedGoal,
    Rewound,
    RewindDenied,
    RewindFailed,
    Locked,
}

impl StepEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            StepEvent::Ignored => "ignored",
            StepEvent::Moved => "moved",
            StepEvent::Bumped => "bumped",
            StepEvent::Waited => "waited",
            StepEvent::CoinCollected => "coin_collected",
            StepEvent::ItemCollected => "item_collected",
            StepEvent::SpikeHit => "spike_hit",
            StepEvent::LethalTrap => "lethal_trap",
            StepEvent::KnownLethalTrap => "known_lethal_trap",
            StepEvent::Died => "died",
            StepEvent::DoorUnlocked => "door_unlocked",
            StepEvent::TriggerSprung => "trigger_sprung",
            StepEvent::ReachedGoal => "reached_goal",
            StepEvent::Rewound => "rewound",
            StepEvent::RewindDenied => "rewind_denied",
            StepEvent::RewindFailed => "rewind_failed",
            StepEvent::Locked => "locked",
        }
    }

    /// Rejections leave the state untouched.
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            StepEvent::Ignored | StepEvent::RewindDenied | StepEvent::RewindFailed | StepEvent::Locked
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub state: SimulationState,
    pub reward: i32,
    pub event: StepEvent,
}

impl StepOutcome {
    fn unchanged(state: SimulationState, reward: i32, event: StepEvent) -> Self {
        Self {
            state,
            reward,
            event,
        }
    }
}

/// Apply `action` to `state`.
pub fn step(mut state: SimulationState, action: AgentAction, cfg: &SimConfig) -> StepOutcome {
    if state.is_game_over {
        return StepOutcome::unchanged(state, 0, StepEvent::Ignored);
    }

    let trapped = state.agent.is_trapped();
    if action == AgentAction::Rewind {
        if !trapped {
            return StepOutcome::unchanged(state, REWIND_DENIED_PENALTY, StepEvent::RewindDenied);
        }
        return rewind(state, cfg);
    }
    if trapped {
        return StepOutcome::unchanged(state, LOCKED_PENALTY, StepEvent::Locked);
    }

    let pre = state.snapshot();
    state.history.push(pre);
    state.agent.steps_taken += 1;

    if action == AgentAction::Wait {
        state.score += cfg.step_penalty;
        return StepOutcome {
            state,
            reward: cfg.step_penalty,
            event: StepEvent::Waited,
        };
    }

    let (dx, dy) = action.delta();
    let target = state.agent.position.offset(dx, dy);
    let kind = state.grid.kind(target);

    let unlocks = kind == CellKind::Door { open: false } && state.agent.keys_collected > 0;
    if !kind.is_passable() && !unlocks {
        let reward = cfg.step_penalty + BUMP_PENALTY;
        state.score += reward;
        return StepOutcome {
            state,
            reward,
            event: StepEvent::Bumped,
        };
    }

    let mut reward = cfg.step_penalty;
    let mut event = StepEvent::Moved;

    if state.abandoned_paths.iter().any(|seg| seg.contains(&target)) {
        reward += cfg.revisit_penalty;
        state.agent.visited_traps.insert(target);
    }
    if state.active_path.contains(&target) {
        reward += BACKTRACK_PENALTY;
    }

    state.agent.position = target;
    state.active_path.push(target);

    match kind {
        CellKind::Item { kind: item, value } => {
            match item {
                ItemKind::Coin => {
                    reward += cfg.coin_reward;
                    state.agent.coins += 1;
                    event = StepEvent::CoinCollected;
                }
                ItemKind::Key => {
                    state.agent.keys_collected += 1;
                    event = StepEvent::ItemCollected;
                }
                ItemKind::MoneyBag => {
                    state.agent.coins += value.unwrap_or(1);
                    event = StepEvent::ItemCollected;
                }
            }
            Arc::make_mut(&mut state.grid).set(target, CellKind::Empty);
        }
        CellKind::Trap(trap) => {
            state.agent.traps_triggered += 1;
            if trap.is_lethal() {
                if state.global_known_traps.contains(&target) {
                    reward += cfg.trap_penalty + cfg.re_enter_poison_penalty;
                    event = StepEvent::KnownLethalTrap;
                } else {
                    reward += cfg.trap_penalty;
                    state.global_known_traps.insert(target);
                    event = StepEvent::LethalTrap;
                }

                if state.agent.rewind_budget > 0 {
                    state.agent.status_effect = StatusEffect::TrappedWaitingRewind;
                } else {
                    state.agent.status_effect = if trap == TrapKind::Poison {
                        StatusEffect::Poisoned
                    } else {
                        StatusEffect::Fallen
                    };
                    state.finish(GameResult::Loss);
                    event = StepEvent::Died;
                }
            } else if trap == TrapKind::Trigger {
                if let Some(door) = state.grid.nearest_door(target) {
                    Arc::make_mut(&mut state.grid).toggle_door(door);
                }
                event = StepEvent::TriggerSprung;
            } else if trap == TrapKind::Spike {
                state.agent.health = (state.agent.health - cfg.trap_damage).max(0);
                reward += cfg.trap_penalty / 2;
                event = StepEvent::SpikeHit;
                if state.agent.health <= 0 {
                    state.finish(GameResult::Loss);
                    event = StepEvent::Died;
                }
            }
        }
        CellKind::Goal => {
            reward += cfg.goal_reward;
            state.finish(GameResult::Win);
            event = StepEvent::ReachedGoal;
        }
        CellKind::Door { open: false } => {
            state.agent.keys_collected -= 1;
            Arc::make_mut(&mut state.grid).set(target, CellKind::Door { open: true });
            event = StepEvent::DoorUnlocked;
        }
        CellKind::Empty | CellKind::Start | CellKind::Door { open: true } | CellKind::Wall => {}
    }

    state.score += reward;
    StepOutcome {
        state,
        reward,
        event,
    }
}

fn rewind(mut state: SimulationState, cfg: &SimConfig) -> StepOutcome {
    let target = if state.agent.rewind_budget > 0 {
        state.history.rewind_target(cfg.rewind_steps)
    } else {
        None
    };
    let Some(past) = target.and_then(|t| state.history.get(t)).cloned() else {
        return StepOutcome::unchanged(state, REWIND_FAILED_PENALTY, StepEvent::RewindFailed);
    };
    let target = target.unwrap_or(0);

    let rewind_budget = state.agent.rewind_budget - 1;
    let traps_triggered = state.agent.traps_triggered;
    state.grid = past.grid;
    state.agent = AgentState {
        rewind_budget,
        traps_triggered,
        status_effect: StatusEffect::None,
        ..past.agent
    };

    let keep = past
        .path_len
        .clamp(1, state.active_path.len().max(1))
        .min(state.active_path.len());
    let mut abandoned = state.active_path.split_off(keep);
    if !abandoned.is_empty() {
        // The restore point belongs to both timelines.
        if let Some(&restore) = state.active_path.last() {
            abandoned.insert(0, restore);
        }
        state.abandoned_paths.push(abandoned);
    }
    state.history.truncate(target);
    state.score += cfg.rewind_cost;

    StepOutcome {
        state,
        reward: cfg.rewind_cost,
        event: StepEvent::Rewound,
    }
}
