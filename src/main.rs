//! `rewind`: generate, survey and play dungeons from the command line.
//!
//! Examples:
//!   rewind generate --level 4 --seed 9
//!   rewind survey --samples 200
//!   rewind play --episodes 50 --show

use std::process;

use rewind::agent::Mode;
use rewind::config::{GeneratorConfig, SessionConfig};
use rewind::dungeon::{self, DungeonGenerator};
use rewind::observer::SessionAdapter;
use rewind::session::Session;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(cmd) = args.first() else {
        print_help();
        process::exit(2);
    };
    let rest = &args[1..];

    let result = match cmd.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        "generate" => run_generate(rest),
        "survey" => run_survey(rest),
        "play" => run_play(rest),
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_help() {
    println!("rewind: dungeon generator and Q-learning playground\n");
    println!("Usage:");
    println!("  rewind generate [--level N] [--seed S] [--json]");
    println!("  rewind survey [--level N] [--samples N] [--seed S] [--unchecked]");
    println!("  rewind play [--episodes N] [--seed S] [--mode training|inference|test]");
    println!("              [--max-steps N] [--show] [--json]");
}

fn flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn value<T: std::str::FromStr>(args: &[String], name: &str, default: T) -> Result<T, String> {
    match args.iter().position(|a| a == name) {
        None => Ok(default),
        Some(i) => args
            .get(i + 1)
            .ok_or_else(|| format!("{name} needs a value"))?
            .parse()
            .map_err(|_| format!("{name}: not a valid value")),
    }
}

fn run_generate(args: &[String]) -> Result<(), String> {
    let level: u32 = value(args, "--level", 1)?;
    let seed: u64 = value(args, "--seed", 0)?;
    let grid = DungeonGenerator::new(seed).generate(level);

    if flag(args, "--json") {
        let json = serde_json::to_string_pretty(&grid).map_err(|e| format!("serialize: {e}"))?;
        println!("{json}");
    } else {
        print!("{}", grid.to_ascii());
        println!(
            "level={level} size={} open={} connected={}",
            grid.size(),
            grid.open_count(),
            grid.start_reaches_goal()
        );
    }
    Ok(())
}

fn run_survey(args: &[String]) -> Result<(), String> {
    let samples: u32 = value(args, "--samples", 100)?;
    let seed: u64 = value(args, "--seed", 1)?;
    let cfg = if flag(args, "--unchecked") {
        GeneratorConfig::unchecked()
    } else {
        GeneratorConfig::default()
    };
    let levels = match value::<u32>(args, "--level", 0)? {
        0 => 1..=10,
        l => l..=l,
    };

    for level in levels {
        let rate = dungeon::survey_connectivity(level, samples, seed, &cfg);
        println!("level={level:2} samples={samples} connected={:.1}%", rate * 100.0);
    }
    Ok(())
}

fn run_play(args: &[String]) -> Result<(), String> {
    let episodes: u32 = value(args, "--episodes", 20)?;
    let seed: u64 = value(args, "--seed", 0)?;
    let max_steps: u32 = value(args, "--max-steps", 2_000)?;
    let mode_name: String = value(args, "--mode", "training".to_string())?;
    let mode = Mode::from_name(&mode_name).ok_or_else(|| format!("unknown mode: {mode_name}"))?;
    let show = flag(args, "--show");

    let mut session = Session::new(SessionConfig::default(), seed).map_err(|e| e.to_string())?;
    match mode {
        Mode::Test => session.enter_test_mode(),
        m => session.set_mode(m),
    }

    for _ in 0..episodes {
        let mut ticks = 0;
        while session.tick().is_some() {
            ticks += 1;
            if ticks >= max_steps {
                break;
            }
        }

        if show {
            print!("{}", SessionAdapter::new(&session).render());
        }

        if !session.is_game_over() {
            println!(
                "episode={:4} level={:2} timed out after {max_steps} steps; counted as a loss",
                session.episode(),
                session.level()
            );
        }
        // Concludes a finished episode as is; a timed-out one as a loss.
        let Some(done) = session.abandon_episode() else {
            continue;
        };

        let s = done.stats;
        println!(
            "episode={:4} level={:2} attempt={} result={:?} reward={:+5} steps={:4} rewinds={} traps={} coins={} eps={:.3}",
            s.episode,
            s.level,
            session.attempt(),
            s.result,
            s.total_reward,
            s.steps,
            s.rewinds_used,
            s.trap_count,
            s.coins,
            session.agent().epsilon(),
        );
        session.apply(done.transition);
    }

    let log = session.log();
    if flag(args, "--json") {
        let json = serde_json::to_string_pretty(log).map_err(|e| format!("serialize: {e}"))?;
        println!("{json}");
    } else {
        println!(
            "wins={} losses={} win_rate={:.1}% last100={:.1}% best_level={} q_states={}",
            log.wins,
            log.losses,
            log.win_rate() * 100.0,
            log.last_100_rate() * 100.0,
            log.best_level,
            session.agent().table_len(),
        );
    }
    Ok(())
}
