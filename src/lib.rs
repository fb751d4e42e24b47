//! Grid dungeon with a rewind meta-action, and a tabular Q-learning agent that
//! learns to cross it level by level.

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/grid.rs"]
pub mod grid;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/dungeon.rs"]
pub mod dungeon;

#[path = "core/history.rs"]
pub mod history;

#[path = "core/engine.rs"]
pub mod engine;

#[path = "core/pathfind.rs"]
pub mod pathfind;

#[path = "core/agent.rs"]
pub mod agent;

#[path = "core/stats.rs"]
pub mod stats;

#[path = "core/session.rs"]
pub mod session;

pub mod observer;

pub mod prelude {
    pub use crate::agent::{Mode, QAgent, StateKey};
    pub use crate::config::{ConfigError, GeneratorConfig, SessionConfig, SimConfig};
    pub use crate::dungeon::DungeonGenerator;
    pub use crate::engine::{step, AgentAction, AgentState, GameResult, SimulationState, StepEvent};
    pub use crate::grid::{CellKind, Grid, Position};
    pub use crate::session::{Session, Transition};
}
