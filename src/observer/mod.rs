use hashbrown::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::agent::{Mode, QAgent};
use crate::engine::{GameResult, SimulationState, StatusEffect};
use crate::grid::Position;
use crate::session::Session;

/// A read-only picture of one moment of play.
///
/// Observers cannot steer the session; snapshots are taken on demand and may
/// allocate, the tick loop never does this on its own.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameSnapshot {
    pub episode: u32,
    pub level: u32,
    pub attempt: u32,
    pub mode: Mode,
    pub epsilon: f32,
    pub q_states: usize,

    pub position: Position,
    pub health: i32,
    pub rewind_budget: u32,
    pub steps_taken: u32,
    pub coins: u32,
    pub status: StatusEffect,
    pub score: i32,
    pub cumulative_score: i64,
    pub game_result: Option<GameResult>,

    pub history_len: usize,
    pub active_path_len: usize,
    pub abandoned_segments: usize,
    pub known_traps: usize,
}

pub struct SessionAdapter<'a> {
    session: &'a Session,
}

impl<'a> SessionAdapter<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        let s = self.session;
        let state = s.state();
        let agent: &QAgent = s.agent();

        FrameSnapshot {
            episode: state.episode,
            level: s.level(),
            attempt: s.attempt(),
            mode: agent.mode(),
            epsilon: agent.epsilon(),
            q_states: agent.table_len(),

            position: state.agent.position,
            health: state.agent.health,
            rewind_budget: state.agent.rewind_budget,
            steps_taken: state.agent.steps_taken,
            coins: state.agent.coins,
            status: state.agent.status_effect,
            score: state.score,
            cumulative_score: s.cumulative_score(),
            game_result: state.game_result,

            history_len: state.history.len(),
            active_path_len: state.active_path.len(),
            abandoned_segments: state.abandoned_paths.len(),
            known_traps: state.global_known_traps.len(),
        }
    }

    pub fn render(&self) -> String {
        render(self.session.state())
    }
}

/// Draw the grid with the agent (`@`), the live path (`*`) and abandoned
/// timelines (`x`) laid over the cell glyphs.
pub fn render(state: &SimulationState) -> String {
    let grid = &state.grid;
    let size = grid.size() as i32;
    let live: HashSet<Position> = state.active_path.iter().copied().collect();
    let dead: HashSet<Position> = state.abandoned_paths.iter().flatten().copied().collect();

    let mut out = String::with_capacity(((size + 1) * size) as usize);
    for y in 0..size {
        for x in 0..size {
            let p = Position::new(x, y);
            let glyph = grid.kind(p).glyph();
            let ch = if p == state.agent.position {
                '@'
            } else if glyph != '.' {
                glyph
            } else if live.contains(&p) {
                '*'
            } else if dead.contains(&p) {
                'x'
            } else {
                glyph
            };
            out.push(ch);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, SimConfig};
    use crate::engine::{self, AgentAction};
    use crate::grid::Grid;

    #[test]
    fn render_marks_agent_and_timelines() {
        let cfg = SimConfig::default().with_rewind_steps(2);
        let grid = Grid::from_ascii(&["######", "#S..p#", "#....#", "#....#", "#...G#", "######"]);
        let mut s = SimulationState::new(grid, &cfg, 1);
        for a in [
            AgentAction::Down,
            AgentAction::Right,
            AgentAction::Right,
            AgentAction::Up,
            AgentAction::Right,
            AgentAction::Rewind,
        ] {
            s = engine::step(s, a, &cfg).state;
        }
        assert_eq!(render(&s), "######\n#S.xp#\n#**@.#\n#....#\n#...G#\n######\n");
    }

    #[test]
    fn snapshot_reflects_the_session() {
        let session = Session::new(SessionConfig::default(), 3).expect("valid config");
        let snap = SessionAdapter::new(&session).snapshot();
        assert_eq!(snap.episode, 1);
        assert_eq!(snap.level, 1);
        assert_eq!(snap.mode, Mode::Training);
        assert_eq!(snap.position, Position::new(1, 1));
        assert_eq!(snap.health, 100);
        assert_eq!(snap.rewind_budget, 5);
        assert_eq!(snap.active_path_len, 1);
        assert_eq!(snap.game_result, None);
    }
}
