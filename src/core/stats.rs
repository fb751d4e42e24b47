use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::GameResult;

/// Outcomes kept for the rolling rates.
const RECENT_WINDOW: usize = 200;

/// One finished episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EpisodeStats {
    pub episode: u32,
    pub level: u32,
    pub steps: u32,
    pub total_reward: i32,
    pub result: GameResult,
    pub rewinds_used: u32,
    pub trap_count: u32,
    pub coins: u32,
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EpisodeLog {
    pub wins: u32,
    pub losses: u32,
    /// Highest level reached (won or not).
    pub best_level: u32,
    /// Episode at which the rolling win rate first reached 0.7, once at least
    /// 20 episodes were played.
    pub proficient_at_episode: Option<u32>,
    episodes: Vec<EpisodeStats>,
    recent: VecDeque<bool>,
}

impl EpisodeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stats: EpisodeStats) {
        let won = stats.result == GameResult::Win;
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.best_level = self.best_level.max(stats.level);

        self.recent.push_back(won);
        if self.recent.len() > RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.episodes.push(stats);

        if self.proficient_at_episode.is_none() && self.len() >= 20 && self.last_100_rate() >= 0.7 {
            self.proficient_at_episode = Some(stats.episode);
        }
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn episodes(&self) -> &[EpisodeStats] {
        &self.episodes
    }

    pub fn last(&self) -> Option<&EpisodeStats> {
        self.episodes.last()
    }

    pub fn win_rate(&self) -> f32 {
        let total = self.wins + self.losses;
        if total == 0 {
            0.0
        } else {
            self.wins as f32 / total as f32
        }
    }

    /// Win rate over the rolling window.
    pub fn recent_rate(&self) -> f32 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let won = self.recent.iter().filter(|&&w| w).count();
        won as f32 / self.recent.len() as f32
    }

    pub fn last_100_rate(&self) -> f32 {
        if self.recent.len() < 10 {
            return self.recent_rate();
        }
        let skip = self.recent.len().saturating_sub(100);
        let window = self.recent.len() - skip;
        let won = self.recent.iter().skip(skip).filter(|&&w| w).count();
        won as f32 / window as f32
    }

    pub fn mean_reward(&self) -> f32 {
        if self.episodes.is_empty() {
            return 0.0;
        }
        let sum: i64 = self.episodes.iter().map(|e| e.total_reward as i64).sum();
        sum as f32 / self.episodes.len() as f32
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(episode: u32, level: u32, result: GameResult, total_reward: i32) -> EpisodeStats {
        EpisodeStats {
            episode,
            level,
            steps: 10,
            total_reward,
            result,
            rewinds_used: 0,
            trap_count: 0,
            coins: 0,
        }
    }

    #[test]
    fn empty_log_is_zeroed() {
        let log = EpisodeLog::new();
        assert!(log.is_empty());
        assert_eq!(log.win_rate(), 0.0);
        assert_eq!(log.recent_rate(), 0.0);
        assert_eq!(log.last_100_rate(), 0.0);
        assert_eq!(log.mean_reward(), 0.0);
    }

    #[test]
    fn counts_and_rates() {
        let mut log = EpisodeLog::new();
        log.record(ep(1, 1, GameResult::Loss, -60));
        log.record(ep(2, 1, GameResult::Win, 80));
        log.record(ep(3, 2, GameResult::Win, 90));
        log.record(ep(4, 3, GameResult::Loss, -30));

        assert_eq!((log.wins, log.losses), (2, 2));
        assert_eq!(log.best_level, 3);
        assert_eq!(log.win_rate(), 0.5);
        assert_eq!(log.mean_reward(), 20.0);
        assert_eq!(log.last().map(|e| e.episode), Some(4));
    }

    #[test]
    fn last_100_only_sees_the_tail() {
        let mut log = EpisodeLog::new();
        for i in 0..100 {
            log.record(ep(i, 1, GameResult::Loss, 0));
        }
        for i in 100..200 {
            log.record(ep(i, 1, GameResult::Win, 0));
        }
        assert_eq!(log.last_100_rate(), 1.0);
        assert_eq!(log.recent_rate(), 0.5);

        // Rolling window holds 200 outcomes.
        log.record(ep(200, 1, GameResult::Win, 0));
        assert!(log.recent_rate() > 0.5);
        assert_eq!(log.len(), 201);
    }

    #[test]
    fn proficiency_needs_enough_episodes() {
        let mut log = EpisodeLog::new();
        for i in 1..=19 {
            log.record(ep(i, 1, GameResult::Win, 100));
        }
        assert_eq!(log.proficient_at_episode, None);
        log.record(ep(20, 1, GameResult::Win, 100));
        assert_eq!(log.proficient_at_episode, Some(20));
    }
}
