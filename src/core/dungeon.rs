//! Procedural dungeon generation.
//!
//! Two biased random walks guarantee a corridor from start to goal, dead-end
//! branches are then dug off the open space as trap bait, and coins are
//! scattered last.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use tracing::warn;

use crate::config::{GeneratorConfig, LevelProfile};
use crate::grid::{CellKind, Grid, Position, TrapKind, DIRECTIONS};
use crate::prng::Prng;

/// Chance of offering every direction to the walk, not only goal-ward ones.
const WANDER_PROB: f32 = 0.4;
/// Chance (per axis) of offering the walk's fixed bias move.
const BIAS_PROB: f32 = 0.3;
/// Spike probability on non-dead-end bait, relative to the trap density.
const SPIKE_SCALE: f32 = 0.2;

/// Seeded generator that keeps its stream across calls.
#[derive(Debug, Clone)]
pub struct DungeonGenerator {
    rng: Prng,
    cfg: GeneratorConfig,
}

impl DungeonGenerator {
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, GeneratorConfig::default())
    }

    pub fn with_config(seed: u64, cfg: GeneratorConfig) -> Self {
        Self {
            rng: Prng::new(seed ^ 0xD0_6E_0E_A5),
            cfg,
        }
    }

    pub fn generate(&mut self, level: u32) -> Grid {
        generate(level, &mut self.rng, &self.cfg)
    }

    /// Re-scatter the coins of an existing map (retry of the same level).
    pub fn reshuffle_coins(&mut self, grid: &mut Grid) -> usize {
        grid.reshuffle_coins(&mut self.rng)
    }
}

/// Build a level. With `verify_connectivity`, regenerates until the goal is
/// reachable or the regeneration budget runs out.
pub fn generate(level: u32, rng: &mut Prng, cfg: &GeneratorConfig) -> Grid {
    let profile = LevelProfile::for_level(level);
    let mut grid = carve_level(&profile, rng, cfg);
    if !cfg.verify_connectivity {
        return grid;
    }

    let mut attempt = 0;
    while !grid.start_reaches_goal() {
        if attempt >= cfg.max_regenerations {
            warn!(
                level = profile.level,
                attempts = attempt + 1,
                "goal unreachable after regeneration budget; shipping last carve"
            );
            break;
        }
        attempt += 1;
        grid = carve_level(&profile, rng, cfg);
    }
    grid
}

fn carve_level(profile: &LevelProfile, rng: &mut Prng, cfg: &GeneratorConfig) -> Grid {
    let mut grid = Grid::walled(profile.size);
    let (start, goal) = carve_corridors(&mut grid, rng);

    let branches = dig_branches(&mut grid, rng, profile, cfg.target_open_fraction);
    place_traps(&mut grid, rng, profile, &branches.bait);

    // Stamped after every structural write so nothing can overwrite them.
    grid.set(goal, CellKind::Goal);
    grid.set(start, CellKind::Start);

    grid.scatter_coins(rng);
    grid
}

/// The three walks: start to goal, start to a south-west waypoint, waypoint
/// to goal. Returns `(start, goal)`.
fn carve_corridors(grid: &mut Grid, rng: &mut Prng) -> (Position, Position) {
    let size = grid.size() as i32;
    let start = Position::new(1, 1);
    let goal = Position::new(size - 2, size - 2);
    let waypoint = Position::new(3, size - 4);

    carve_walk(grid, rng, start, goal, (1, -1));
    carve_walk(grid, rng, start, waypoint, (-1, 1));
    carve_walk(grid, rng, waypoint, goal, (1, 1));
    (start, goal)
}

/// Biased random walk from `from` to `to`, opening every visited cell.
///
/// Gives up after `2·size²` steps; the target is opened regardless, which can
/// leave it disconnected.
fn carve_walk(grid: &mut Grid, rng: &mut Prng, from: Position, to: Position, bias: (i32, i32)) {
    let size = grid.size() as usize;
    let max_steps = size * size * 2;
    let mut cur = from;
    let mut steps = 0;
    let mut moves: Vec<(i32, i32)> = Vec::with_capacity(10);

    while cur != to && steps < max_steps {
        grid.set(cur, CellKind::Empty);

        moves.clear();
        let dx = to.x - cur.x;
        let dy = to.y - cur.y;
        if dx > 0 {
            moves.push((1, 0));
        }
        if dx < 0 {
            moves.push((-1, 0));
        }
        if dy > 0 {
            moves.push((0, 1));
        }
        if dy < 0 {
            moves.push((0, -1));
        }
        if rng.chance(WANDER_PROB) {
            moves.extend_from_slice(&[(1, 0), (-1, 0), (0, 1), (0, -1)]);
        }
        if bias.0 != 0 && rng.chance(BIAS_PROB) {
            moves.push((bias.0, 0));
        }
        if bias.1 != 0 && rng.chance(BIAS_PROB) {
            moves.push((0, bias.1));
        }
        moves.retain(|(mx, my)| grid.is_interior(cur.offset(*mx, *my)));

        let Some(&(mx, my)) = rng.pick(&moves) else {
            break;
        };
        cur = cur.offset(mx, my);
        steps += 1;
    }
    grid.set(to, CellKind::Empty);
}

struct Branches {
    /// Every dug cell, in digging order.
    bait: Vec<Position>,
    /// Root picks spent, at most `100 × size`.
    attempts: u32,
}

/// Dig dead-end branches until the open fraction reaches `target_fraction`
/// or the attempt budget runs out.
fn dig_branches(
    grid: &mut Grid,
    rng: &mut Prng,
    profile: &LevelProfile,
    target_fraction: f32,
) -> Branches {
    let size = grid.size() as i32;
    let total = (grid.size() * grid.size()) as f32;
    let max_attempts = profile.size * 100;
    let max_len = profile.max_branch_len();

    let mut open = grid.open_count();
    let mut bait = Vec::new();
    let mut attempts = 0;

    while (open as f32) / total < target_fraction && attempts < max_attempts {
        attempts += 1;
        let root = Position::new(rng.gen_range_i32(1, size - 1), rng.gen_range_i32(1, size - 1));
        if !(grid.is_interior(root) && grid.is_open(root)) {
            continue;
        }

        let dir = DIRECTIONS[rng.gen_range_usize(0, DIRECTIONS.len())];
        let mut at = root.offset(dir.0, dir.1);
        let mut len = 0;
        while len < max_len {
            if !(grid.is_interior(at) && grid.kind(at) == CellKind::Wall) {
                break;
            }
            // Touching more than the cell we came from means we would reconnect.
            if grid.open_neighbors(at) > 1 {
                break;
            }

            grid.set(at, CellKind::Empty);
            bait.push(at);
            open += 1;
            len += 1;

            let step = if rng.chance(profile.branching_factor) {
                dir
            } else {
                DIRECTIONS[rng.gen_range_usize(0, DIRECTIONS.len())]
            };
            at = at.offset(step.0, step.1);
        }
    }
    Branches { bait, attempts }
}

fn place_traps(grid: &mut Grid, rng: &mut Prng, profile: &LevelProfile, bait: &[Position]) {
    for &p in bait {
        if grid.open_neighbors(p) == 1 {
            if rng.chance(profile.trap_density) {
                grid.set(p, CellKind::Trap(TrapKind::Poison));
            }
        } else if rng.chance(profile.trap_density * SPIKE_SCALE) {
            grid.set(p, CellKind::Trap(TrapKind::Spike));
        }
    }
}

/// Fraction of `samples` maps for `level` whose goal is reachable, generated
/// from consecutive seeds starting at `seed`.
pub fn survey_connectivity(level: u32, samples: u32, seed: u64, cfg: &GeneratorConfig) -> f32 {
    if samples == 0 {
        return 0.0;
    }
    let connected = |i: u32| {
        let mut rng = Prng::new(seed.wrapping_add(i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        generate(level, &mut rng, cfg).start_reaches_goal()
    };

    #[cfg(feature = "parallel")]
    let ok = (0..samples).into_par_iter().filter(|i| connected(*i)).count();
    #[cfg(not(feature = "parallel"))]
    let ok = (0..samples).filter(|i| connected(*i)).count();

    ok as f32 / samples as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{COIN_MAX, COIN_MIN};

    #[test]
    fn same_seed_same_dungeon() {
        let a = DungeonGenerator::new(123).generate(2);
        let b = DungeonGenerator::new(123).generate(2);
        assert_eq!(a, b);

        let c = DungeonGenerator::new(124).generate(2);
        assert_ne!(a, c);
    }

    #[test]
    fn one_start_one_goal_at_fixed_corners() {
        let mut gen = DungeonGenerator::new(5);
        for level in 1..=10 {
            let g = gen.generate(level);
            let size = LevelProfile::for_level(level).size as i32;
            assert_eq!(g.size() as i32, size);
            assert_eq!(g.count(|k| k == CellKind::Start), 1, "level {level}");
            assert_eq!(g.count(|k| k == CellKind::Goal), 1, "level {level}");
            assert_eq!(g.start(), Some(Position::new(1, 1)));
            assert_eq!(g.goal(), Some(Position::new(size - 2, size - 2)));
        }
    }

    #[test]
    fn outer_ring_stays_walled() {
        let g = DungeonGenerator::new(77).generate(4);
        for c in g.cells() {
            if !g.is_interior(c.position) {
                assert_eq!(c.kind, CellKind::Wall, "border cell {}", c.position);
            }
        }
    }

    #[test]
    fn coins_and_traps_are_placed() {
        let mut gen = DungeonGenerator::new(9);
        let mut saw_poison = false;
        for _ in 0..10 {
            let g = gen.generate(3);
            let coins = g.count(|k| k.is_coin());
            assert!((COIN_MIN..=COIN_MAX).contains(&coins), "coins = {coins}");
            saw_poison |= g.count(|k| k == CellKind::Trap(TrapKind::Poison)) > 0;
        }
        assert!(saw_poison);
    }

    #[test]
    fn traps_never_sit_on_start_or_goal() {
        let mut gen = DungeonGenerator::new(31);
        for level in [1, 5, 9] {
            let g = gen.generate(level);
            let size = g.size() as i32;
            assert_eq!(g.kind(Position::new(1, 1)), CellKind::Start);
            assert_eq!(g.kind(Position::new(size - 2, size - 2)), CellKind::Goal);
        }
    }

    fn open_fraction(grid: &Grid) -> f32 {
        grid.open_count() as f32 / (grid.size() * grid.size()) as f32
    }

    #[test]
    fn poison_only_in_dead_ends() {
        let mut seen = 0;
        for seed in 0..5 {
            let mut gen = DungeonGenerator::new(seed);
            for level in 1..=10 {
                let g = gen.generate(level);
                for c in g.cells() {
                    if c.kind == CellKind::Trap(TrapKind::Poison) {
                        seen += 1;
                        assert_eq!(g.open_neighbors(c.position), 1, "seed {seed} level {level} at {}", c.position);
                    }
                }
            }
        }
        assert!(seen > 0);
    }

    #[test]
    fn traps_only_on_branch_cells() {
        let cfg = GeneratorConfig::default();
        let mut traps = 0;
        for seed in 1..=8u64 {
            for level in [1, 4, 8] {
                let profile = LevelProfile::for_level(level);
                let mut rng = Prng::new(seed);
                let mut grid = Grid::walled(profile.size);
                carve_corridors(&mut grid, &mut rng);
                let corridor: Vec<Position> = grid
                    .cells()
                    .iter()
                    .filter(|c| c.kind != CellKind::Wall)
                    .map(|c| c.position)
                    .collect();

                let branches = dig_branches(&mut grid, &mut rng, &profile, cfg.target_open_fraction);
                place_traps(&mut grid, &mut rng, &profile, &branches.bait);

                for c in grid.cells() {
                    if matches!(c.kind, CellKind::Trap(_)) {
                        traps += 1;
                        assert!(branches.bait.contains(&c.position), "trap off branch at {}", c.position);
                        assert!(!corridor.contains(&c.position), "trap on corridor at {}", c.position);
                    }
                }
            }
        }
        assert!(traps > 0);
    }

    #[test]
    fn branches_reach_target_or_spend_the_budget() {
        for seed in 1..=6u64 {
            for level in [1, 3, 6, 10] {
                let profile = LevelProfile::for_level(level);
                let mut rng = Prng::new(seed);
                let mut grid = Grid::walled(profile.size);
                carve_corridors(&mut grid, &mut rng);

                let branches = dig_branches(&mut grid, &mut rng, &profile, 0.65);
                let fraction = open_fraction(&grid);
                assert!(branches.attempts <= profile.size * 100);
                assert!(
                    fraction >= 0.65 || branches.attempts == profile.size * 100,
                    "seed {seed} level {level}: {fraction} after {} attempts",
                    branches.attempts
                );
            }
        }
    }

    #[test]
    fn branch_budget_edges() {
        let profile = LevelProfile::for_level(2);
        let mut rng = Prng::new(11);
        let mut grid = Grid::walled(profile.size);
        carve_corridors(&mut grid, &mut rng);
        let before = grid.clone();

        let none = dig_branches(&mut grid, &mut rng, &profile, 0.0);
        assert!(none.bait.is_empty());
        assert_eq!(none.attempts, 0);
        assert_eq!(grid, before);

        // The wall ring alone makes a fully open map impossible.
        let all = dig_branches(&mut grid, &mut rng, &profile, 1.0);
        assert_eq!(all.attempts, profile.size * 100);
        assert!(open_fraction(&grid) < 1.0);
        assert!(all.bait.iter().all(|p| grid.is_interior(*p)));
    }

    #[test]
    fn levels_one_to_ten_are_connected() {
        let cfg = GeneratorConfig::default();
        for level in 1..=10 {
            let rate = survey_connectivity(level, 40, 1_000 + level as u64, &cfg);
            assert!(rate >= 0.95, "level {level}: {rate}");
        }
    }

    #[test]
    fn unchecked_carving_is_still_mostly_connected() {
        let rate = survey_connectivity(3, 100, 42, &GeneratorConfig::unchecked());
        assert!(rate >= 0.95, "rate = {rate}");
    }
}
