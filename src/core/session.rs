//! Episode and level controller.
//!
//! A [`Session`] owns the live simulation, the agent and the level's pristine
//! grid. It drives one transition per [`Session::tick`], and once an episode
//! ends it decides between advancing and retrying. It never sleeps: pacing hints
//! (`pause`, `delay`) are returned for the caller to honor.

use std::time::Duration;

use hashbrown::HashSet;
use tracing::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::agent::{Mode, QAgent};
use crate::config::{ConfigError, SessionConfig};
use crate::dungeon::DungeonGenerator;
use crate::engine::{self, AgentAction, GameResult, SimulationState, StepEvent};
use crate::grid::Grid;
use crate::stats::{EpisodeLog, EpisodeStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Transition {
    /// Next level, fresh map.
    Advance,
    /// Same map, coins re-scattered.
    Retry,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Advance => "advance",
            Transition::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub action: AgentAction,
    pub reward: i32,
    pub event: StepEvent,
    /// Extra pause to take before the next tick.
    pub pause: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conclusion {
    pub transition: Transition,
    /// How long to show the outcome before applying the transition.
    pub delay: Duration,
    pub stats: EpisodeStats,
}

#[derive(Debug, Clone)]
pub struct Session {
    cfg: SessionConfig,
    agent: QAgent,
    generator: DungeonGenerator,
    /// The level's map as generated; retries start from it.
    level_grid: Grid,
    state: SimulationState,
    level: u32,
    attempt: u32,
    cumulative_score: i64,
    log: EpisodeLog,
    /// Set once the finished episode has been recorded.
    concluded: Option<Conclusion>,
}

impl Session {
    pub fn new(cfg: SessionConfig, seed: u64) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let agent = QAgent::new(cfg.agent, seed);
        let mut generator = DungeonGenerator::with_config(seed, cfg.generator);
        let level_grid = generator.generate(1);
        let state = SimulationState::new(level_grid.clone(), &cfg.sim, 1);
        Ok(Self {
            cfg,
            agent,
            generator,
            level_grid,
            state,
            level: 1,
            attempt: 1,
            cumulative_score: 0,
            log: EpisodeLog::new(),
            concluded: None,
        })
    }

    /// Swap in a hand-made map for the current level and restart the episode on it.
    pub fn with_level_grid(mut self, grid: Grid) -> Self {
        self.level_grid = grid;
        self.state = SimulationState::new(self.level_grid.clone(), &self.cfg.sim, self.state.episode);
        self.concluded = None;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn agent(&self) -> &QAgent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut QAgent {
        &mut self.agent
    }

    pub fn level_grid(&self) -> &Grid {
        &self.level_grid
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn episode(&self) -> u32 {
        self.state.episode
    }

    /// Scores of every advanced-from level, the live episode excluded.
    pub fn cumulative_score(&self) -> i64 {
        self.cumulative_score
    }

    pub fn log(&self) -> &EpisodeLog {
        &self.log
    }

    pub fn is_game_over(&self) -> bool {
        self.state.is_game_over
    }

    pub fn is_test_mode(&self) -> bool {
        self.agent.mode() == Mode::Test
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.agent.set_mode(mode);
    }

    /// Let the agent pick an action and apply it. `None` once the game is over.
    pub fn tick(&mut self) -> Option<TickReport> {
        if self.state.is_game_over {
            return None;
        }
        let action = self.agent.select_action(&self.state.agent, Some(self.state.grid.as_ref()));
        Some(self.act(action))
    }

    /// Apply a chosen action and let the agent learn from it.
    pub fn act(&mut self, action: AgentAction) -> TickReport {
        let prev = self.state.agent.clone();
        let state = std::mem::take(&mut self.state);
        let outcome = engine::step(state, action, &self.cfg.sim);
        self.state = outcome.state;

        if outcome.event != StepEvent::Ignored {
            self.agent.update(&prev, action, outcome.reward, &self.state.agent);
        }

        debug!(
            episode = self.state.episode,
            action = action.as_str(),
            event = outcome.event.as_str(),
            reward = outcome.reward,
            score = self.state.score,
            "step"
        );

        let pause = if outcome.event == StepEvent::Rewound {
            Duration::from_millis(self.cfg.rewind_pause_ms)
        } else {
            Duration::ZERO
        };
        TickReport {
            action,
            reward: outcome.reward,
            event: outcome.event,
            pause,
        }
    }

    /// Record the finished episode and decide what comes next. `None` while the
    /// episode is still running; repeated calls return the same conclusion.
    pub fn conclude_episode(&mut self) -> Option<Conclusion> {
        if !self.state.is_game_over {
            return None;
        }
        if let Some(done) = self.concluded {
            return Some(done);
        }

        let result = self.state.game_result.unwrap_or(GameResult::Loss);
        let agent = &self.state.agent;
        let stats = EpisodeStats {
            episode: self.state.episode,
            level: self.level,
            steps: agent.steps_taken,
            total_reward: self.state.score,
            result,
            rewinds_used: self.cfg.sim.initial_rewind_budget.saturating_sub(agent.rewind_budget),
            trap_count: agent.traps_triggered,
            coins: agent.coins,
        };
        self.log.record(stats);

        let (transition, delay_ms) = match result {
            GameResult::Win => (Transition::Advance, self.cfg.win_delay_ms),
            GameResult::Loss => {
                if !self.is_test_mode() {
                    self.agent.decay_epsilon();
                }
                if self.attempt >= self.cfg.failure_limit(self.level) {
                    self.agent.force_conservative_policy();
                }
                (Transition::Retry, self.cfg.loss_delay_ms)
            }
        };

        info!(
            episode = stats.episode,
            level = self.level,
            attempt = self.attempt,
            result = ?result,
            reward = stats.total_reward,
            steps = stats.steps,
            epsilon = self.agent.epsilon(),
            next = transition.as_str(),
            "episode finished"
        );

        let done = Conclusion {
            transition,
            delay: Duration::from_millis(delay_ms),
            stats,
        };
        self.concluded = Some(done);
        Some(done)
    }

    /// Give up on the running episode (e.g. it hit a step cap). It is recorded
    /// and concluded as a loss, so the loss bookkeeping still applies.
    pub fn abandon_episode(&mut self) -> Option<Conclusion> {
        if !self.state.is_game_over {
            self.state.is_game_over = true;
            self.state.game_result = Some(GameResult::Loss);
            debug!(episode = self.state.episode, level = self.level, "episode abandoned");
        }
        self.conclude_episode()
    }

    pub fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::Advance => self.advance_level(),
            Transition::Retry => self.retry(),
        }
    }

    /// Bank the score and move on to a fresh map of the next level. In test
    /// mode the next map is another evaluation map.
    pub fn advance_level(&mut self) {
        self.cumulative_score += self.state.score as i64;
        let episode = self.state.episode + 1;

        if self.is_test_mode() {
            self.level_grid = self.generator.generate(self.cfg.test_level);
        } else {
            self.level += 1;
            self.agent.reset_for_next_level(self.level);
            self.level_grid = self.generator.generate(self.level);
        }
        self.attempt = 1;
        self.state = SimulationState::new(self.level_grid.clone(), &self.cfg.sim, episode);
        self.concluded = None;

        info!(
            level = self.level,
            episode,
            cumulative_score = self.cumulative_score,
            size = self.level_grid.size(),
            "level advanced"
        );
    }

    /// Same geometry and hazards, new coins. Known lethal cells carry over.
    pub fn retry(&mut self) {
        let known: HashSet<_> = std::mem::take(&mut self.state.global_known_traps);
        let episode = self.state.episode + 1;

        let mut grid = self.level_grid.clone();
        self.generator.reshuffle_coins(&mut grid);
        self.attempt += 1;
        self.state = SimulationState::new(grid, &self.cfg.sim, episode).with_known_traps(known);
        self.concluded = None;

        debug!(level = self.level, attempt = self.attempt, episode, "retrying level");
    }

    /// Back to level 1 with an untrained agent.
    pub fn reset(&mut self) {
        self.agent.reset_hard(1);
        self.level = 1;
        self.attempt = 1;
        self.cumulative_score = 0;
        self.log.clear();
        self.level_grid = self.generator.generate(1);
        self.state = SimulationState::new(self.level_grid.clone(), &self.cfg.sim, 1);
        self.concluded = None;
        info!("session reset");
    }

    /// Evaluate the frozen agent on a fixed-difficulty map, starting at episode 1.
    pub fn enter_test_mode(&mut self) {
        self.agent.set_mode(Mode::Test);
        self.level_grid = self.generator.generate(self.cfg.test_level);
        self.attempt = 1;
        self.state = SimulationState::new(self.level_grid.clone(), &self.cfg.sim, 1);
        self.concluded = None;
        info!(test_level = self.cfg.test_level, "test mode on");
    }

    /// Leaving evaluation restarts training from scratch.
    pub fn exit_test_mode(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::grid::{CellKind, Position, COIN_MAX, COIN_MIN};

    const NEXT_TO_GOAL: [&str; 5] = ["#####", "#SG.#", "#...#", "#...#", "#####"];
    const POISON_RIGHT: [&str; 5] = ["#####", "#Sp.#", "#...#", "#..G#", "#####"];
    const OPEN_ROOM: [&str; 8] = [
        "########",
        "#S.....#",
        "#..p...#",
        "#......#",
        "#...o..#",
        "#......#",
        "#.....G#",
        "########",
    ];

    fn session(cfg: SessionConfig, rows: &[&str]) -> Session {
        Session::new(cfg, 7)
            .expect("valid config")
            .with_level_grid(Grid::from_ascii(rows))
    }

    fn no_rewinds() -> SessionConfig {
        SessionConfig {
            sim: SimConfig::default().with_rewind_budget(0),
            ..Default::default()
        }
    }

    #[test]
    fn starts_on_level_one() {
        let s = Session::new(SessionConfig::default(), 1).expect("valid config");
        assert_eq!((s.level(), s.attempt(), s.episode()), (1, 1, 1));
        assert_eq!(s.level_grid().size(), 12);
        assert_eq!(s.state().agent.position, Position::new(1, 1));
        assert!(!s.is_game_over());
        assert!(s.log().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = SessionConfig {
            failure_limits: vec![],
            ..Default::default()
        };
        assert!(Session::new(cfg, 1).is_err());
    }

    #[test]
    fn win_advances_and_keeps_the_table() {
        let mut s = session(SessionConfig::default(), &NEXT_TO_GOAL);
        let report = s.act(AgentAction::Right);
        assert_eq!(report.event, StepEvent::ReachedGoal);
        assert!(s.conclude_episode().is_some());

        let done = s.conclude_episode().expect("game over");
        assert_eq!(done.transition, Transition::Advance);
        assert_eq!(done.delay, Duration::from_millis(3_500));
        assert_eq!(done.stats.result, GameResult::Win);
        assert_eq!(s.log().len(), 1, "concluding twice records once");

        let score = s.state().score as i64;
        let table = s.agent().table_len();
        s.apply(done.transition);
        assert_eq!((s.level(), s.attempt(), s.episode()), (2, 1, 2));
        assert_eq!(s.cumulative_score(), score);
        assert_eq!(s.level_grid().size(), 14);
        assert_eq!(s.agent().table_len(), table);
        assert!((s.agent().epsilon() - 0.6).abs() < 1e-6);
        assert!(s.state().global_known_traps.is_empty());
        assert!(!s.is_game_over());
    }

    #[test]
    fn loss_retries_the_same_map_with_known_traps() {
        let mut s = session(no_rewinds(), &POISON_RIGHT);
        let eps = s.agent().epsilon();
        assert_eq!(s.act(AgentAction::Right).event, StepEvent::Died);

        let done = s.conclude_episode().expect("game over");
        assert_eq!(done.transition, Transition::Retry);
        assert_eq!(done.delay, Duration::from_millis(1_000));
        assert!((s.agent().epsilon() - eps * 0.6).abs() < 1e-6);

        s.apply(done.transition);
        assert_eq!((s.level(), s.attempt(), s.episode()), (1, 2, 2));
        assert_eq!(s.state().score, 0);
        assert_eq!(s.state().agent.position, Position::new(1, 1));
        assert!(s.state().global_known_traps.contains(&Position::new(2, 1)));
        assert_eq!(s.state().grid.kind(Position::new(2, 1)), s.level_grid().kind(Position::new(2, 1)));
        assert_eq!(s.cumulative_score(), 0);
    }

    #[test]
    fn retry_only_moves_coins() {
        let mut s = session(no_rewinds(), &OPEN_ROOM);
        s.act(AgentAction::Right);
        s.act(AgentAction::Down);
        assert_eq!(s.act(AgentAction::Right).event, StepEvent::Died);
        for _ in 0..4 {
            let done = s.conclude_episode().expect("game over");
            s.apply(done.transition);

            let live = s.state().grid.as_ref();
            let level = s.level_grid();
            assert_eq!(live.size(), level.size());
            let mut coins = 0;
            for (cell, original) in live.cells().iter().zip(level.cells()) {
                if cell.kind.is_coin() {
                    coins += 1;
                    assert_eq!(original.kind, CellKind::Empty, "coin landed on {}", cell.position);
                } else {
                    assert_eq!(cell.kind, original.kind, "cell {} changed", cell.position);
                }
            }
            assert!((COIN_MIN..=COIN_MAX).contains(&coins), "{coins} coins");

            // Die on the known poison again to force the next retry.
            s.act(AgentAction::Right);
            s.act(AgentAction::Down);
            s.act(AgentAction::Right);
            assert!(s.is_game_over());
        }
    }

    #[test]
    fn abandoned_episode_counts_as_a_loss() {
        let mut s = session(SessionConfig::default(), &OPEN_ROOM);
        let eps = s.agent().epsilon();
        s.act(AgentAction::Down);

        let done = s.abandon_episode().expect("abandoned");
        assert!(s.is_game_over());
        assert_eq!(done.transition, Transition::Retry);
        assert_eq!(done.stats.result, GameResult::Loss);
        assert_eq!(done.stats.steps, 1);
        assert_eq!((s.log().wins, s.log().losses), (0, 1));
        assert!((s.agent().epsilon() - eps * 0.6).abs() < 1e-6);
        assert_eq!(s.abandon_episode(), Some(done), "abandoning twice records once");
        assert_eq!(s.log().len(), 1);

        s.apply(done.transition);
        assert_eq!((s.level(), s.attempt(), s.episode()), (1, 2, 2));
        assert!(!s.is_game_over());
    }

    #[test]
    fn exhausted_attempts_freeze_exploration() {
        let cfg = SessionConfig {
            failure_limits: vec![1],
            ..no_rewinds()
        };
        let mut s = session(cfg, &POISON_RIGHT);
        s.act(AgentAction::Right);
        s.conclude_episode();
        assert!((s.agent().epsilon() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_mode_loss_keeps_epsilon() {
        let mut s = session(no_rewinds(), &POISON_RIGHT);
        s.set_mode(Mode::Test);
        let eps = s.agent().epsilon();
        s.act(AgentAction::Right);
        s.conclude_episode();
        assert_eq!(s.agent().epsilon(), eps);
    }

    #[test]
    fn wait_is_not_learned_from() {
        let mut s = session(SessionConfig::default(), &NEXT_TO_GOAL);
        s.act(AgentAction::Wait);
        assert_eq!(s.agent().table_len(), 0);
        assert_eq!(s.agent().last_action(), Some(AgentAction::Wait));

        s.act(AgentAction::Down);
        assert_eq!(s.agent().table_len(), 2);
    }

    #[test]
    fn rewind_asks_for_a_pause() {
        let mut s = session(SessionConfig::default(), &POISON_RIGHT);
        assert_eq!(s.act(AgentAction::Right).event, StepEvent::LethalTrap);
        // A trapped agent always picks Rewind.
        let report = s.tick().expect("still running");
        assert_eq!(report.action, AgentAction::Rewind);
        assert_eq!(report.event, StepEvent::Rewound);
        assert_eq!(report.pause, Duration::from_millis(600));
    }

    #[test]
    fn tick_in_test_mode_walks_to_the_goal() {
        let mut s = session(SessionConfig::default(), &["######", "#S..G#", "#....#", "#....#", "######"]);
        s.set_mode(Mode::Test);
        let mut ticks = 0;
        while let Some(report) = s.tick() {
            assert_eq!(report.action, AgentAction::Right);
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert_eq!(s.state().game_result, Some(GameResult::Win));
        assert!(s.conclude_episode().is_some());
        assert!(s.tick().is_none());
    }

    #[test]
    fn running_episode_has_no_conclusion() {
        let mut s = session(SessionConfig::default(), &NEXT_TO_GOAL);
        assert!(s.conclude_episode().is_none());
        assert!(s.log().is_empty());
    }

    #[test]
    fn test_mode_round_trip() {
        let mut s = session(SessionConfig::default(), &NEXT_TO_GOAL);
        s.act(AgentAction::Down);

        s.enter_test_mode();
        assert!(s.is_test_mode());
        assert_eq!(s.episode(), 1);
        assert_eq!(s.level_grid().size(), 16);

        s.exit_test_mode();
        assert_eq!(s.agent().mode(), Mode::Training);
        assert_eq!(s.agent().table_len(), 0);
        assert_eq!((s.level(), s.attempt(), s.episode()), (1, 1, 1));
    }
}
