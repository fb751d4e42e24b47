//! Paced headless tick loop.

use std::future::Future;
use std::time::Duration;

use rewind::agent::Mode;
use rewind::config::ConfigError;
use rewind::engine::GameResult;
use rewind::session::{Session, Transition};
use rewind::stats::EpisodeStats;
use serde::Serialize;
use tokio::time;
use tracing::{debug, info, warn};

use crate::settings::RunnerSettings;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub seed: u64,
    pub mode: Mode,
    pub ticks: u64,
    /// Episodes abandoned for running too long. Each is also counted in `losses`.
    pub timeouts: u32,
    pub interrupted: bool,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f32,
    pub last_100_rate: f32,
    pub best_level: u32,
    pub final_level: u32,
    pub cumulative_score: i64,
    pub q_states: usize,
    pub epsilon: f32,
    pub episodes: Vec<EpisodeStats>,
}

impl RunReport {
    fn new(settings: &RunnerSettings, session: &Session, ticks: u64, timeouts: u32, interrupted: bool) -> Self {
        let log = session.log();
        Self {
            seed: settings.seed,
            mode: session.agent().mode(),
            ticks,
            timeouts,
            interrupted,
            wins: log.wins,
            losses: log.losses,
            win_rate: log.win_rate(),
            last_100_rate: log.last_100_rate(),
            best_level: log.best_level,
            final_level: session.level(),
            cumulative_score: session.cumulative_score(),
            q_states: session.agent().table_len(),
            epsilon: session.agent().epsilon(),
            episodes: log.episodes().to_vec(),
        }
    }
}

/// Sleep for `d`, or return `false` as soon as `shutdown` resolves.
async fn wait<F: Future<Output = ()> + Unpin>(d: Duration, shutdown: &mut F) -> bool {
    tokio::select! {
        biased;
        _ = shutdown => false,
        _ = time::sleep(d) => true,
    }
}

/// Drive a session until a stop condition is met or `shutdown` fires.
pub async fn run<F>(settings: RunnerSettings, shutdown: F) -> Result<RunReport, ConfigError>
where
    F: Future<Output = ()>,
{
    let mut session = Session::new(settings.session.clone(), settings.seed)?;
    match settings.mode {
        Mode::Test => session.enter_test_mode(),
        m => session.set_mode(m),
    }

    let pace = |d: Duration| if settings.paced { d } else { Duration::ZERO };
    let tick_delay = pace(Duration::from_millis(settings.tick_ms));

    let mut shutdown = Box::pin(shutdown);
    let mut ticks = 0u64;
    let mut timeouts = 0u32;
    let mut ended = 0u32;
    let mut episode_ticks = 0u32;
    let mut interrupted = false;

    info!(
        seed = settings.seed,
        mode = settings.mode.name(),
        tick_ms = settings.tick_ms,
        paced = settings.paced,
        "runner started"
    );

    loop {
        if settings.max_episodes.is_some_and(|max| ended >= max) {
            break;
        }
        if !wait(tick_delay, &mut shutdown).await {
            interrupted = true;
            break;
        }

        if let Some(report) = session.tick() {
            ticks += 1;
            episode_ticks += 1;
            if !report.pause.is_zero() && !wait(pace(report.pause), &mut shutdown).await {
                interrupted = true;
                break;
            }
            if !session.is_game_over() && episode_ticks >= settings.max_steps_per_episode {
                warn!(
                    episode = session.episode(),
                    level = session.level(),
                    steps = episode_ticks,
                    "episode timed out; abandoning"
                );
                timeouts += 1;
                session.abandon_episode();
            }
            continue;
        }

        let Some(done) = session.conclude_episode() else {
            continue;
        };
        ended += 1;
        episode_ticks = 0;
        debug!(
            transition = done.transition.as_str(),
            delay_ms = done.delay.as_millis() as u64,
            "episode concluded"
        );

        let cleared_cap = done.stats.result == GameResult::Win
            && settings.max_level.is_some_and(|max| done.stats.level >= max);
        if cleared_cap {
            info!(level = done.stats.level, "level cap cleared");
            break;
        }

        if !wait(pace(done.delay), &mut shutdown).await {
            interrupted = true;
            break;
        }
        session.apply(done.transition);
        if done.transition == Transition::Advance {
            debug!(level = session.level(), "advanced");
        }
    }

    let report = RunReport::new(&settings, &session, ticks, timeouts, interrupted);
    info!(
        ticks = report.ticks,
        wins = report.wins,
        losses = report.losses,
        timeouts = report.timeouts,
        level = report.final_level,
        interrupted = report.interrupted,
        "runner stopped"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(max_episodes: u32) -> RunnerSettings {
        RunnerSettings {
            max_episodes: Some(max_episodes),
            max_steps_per_episode: 60,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_episodes() {
        let report = run(quick(3), std::future::pending()).await.expect("valid");
        assert!(!report.interrupted);
        assert_eq!(report.wins + report.losses, 3);
        assert_eq!(report.episodes.len(), 3);
        assert!(report.timeouts <= report.losses);
        assert!(report.ticks > 0);
        assert!(report.ticks <= 3 * 60);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_before_the_first_tick() {
        let report = run(quick(5), std::future::ready(())).await.expect("valid");
        assert!(report.interrupted);
        assert_eq!(report.ticks, 0);
        assert!(report.episodes.is_empty());
    }

    #[tokio::test]
    async fn unpaced_runs_without_sleeping() {
        let settings = RunnerSettings {
            paced: false,
            mode: Mode::Test,
            ..quick(2)
        };
        let report = run(settings, std::future::pending()).await.expect("valid");
        assert_eq!(report.mode, Mode::Test);
        assert_eq!(report.wins + report.losses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_logged_as_losses() {
        let settings = RunnerSettings {
            max_steps_per_episode: 1,
            ..quick(4)
        };
        let epsilon = Session::new(settings.session.clone(), settings.seed)
            .expect("valid")
            .agent()
            .epsilon();
        let report = run(settings, std::future::pending()).await.expect("valid");
        assert_eq!(report.ticks, 4);
        assert_eq!(report.timeouts, 4);
        assert_eq!((report.wins, report.losses), (0, 4));
        assert_eq!(report.episodes.len(), 4);
        assert!(report.episodes.iter().all(|e| e.result == GameResult::Loss));
        assert!(report.epsilon < epsilon);
    }
}
