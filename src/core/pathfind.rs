//! A* over the dungeon for the deterministic evaluation mode.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::engine::AgentAction;
use crate::grid::{CellKind, Grid, Position};

/// Cells the planner refuses to enter.
fn blocked(kind: CellKind) -> bool {
    !kind.is_passable() || kind.is_lethal_trap()
}

/// First move of a shortest path from `from` to the goal, avoiding walls and
/// lethal traps (Manhattan heuristic). `None` when no such path exists or the
/// grid has no goal. Standing on the goal yields `Wait`.
pub fn first_step_to_goal(grid: &Grid, from: Position) -> Option<AgentAction> {
    let goal = grid.goal()?;
    first_step(grid, from, goal)
}

pub fn first_step(grid: &Grid, from: Position, to: Position) -> Option<AgentAction> {
    if from == to {
        return Some(AgentAction::Wait);
    }
    if !grid.in_bounds(from) || !grid.in_bounds(to) {
        return None;
    }

    let n = (grid.size() * grid.size()) as usize;
    let idx = |p: Position| (p.y as usize) * (grid.size() as usize) + (p.x as usize);

    // Best known cost and the first move that achieved it.
    let mut g_cost = vec![u32::MAX; n];
    let mut first = vec![None::<AgentAction>; n];
    let mut closed = vec![false; n];

    // (f, g, tie, position); `tie` keeps pops deterministic.
    let mut open = BinaryHeap::new();
    let mut tie = 0u32;
    g_cost[idx(from)] = 0;
    open.push(Reverse((from.manhattan(to), 0u32, tie, from.x, from.y)));

    while let Some(Reverse((_, g, _, x, y))) = open.pop() {
        let cur = Position::new(x, y);
        let ci = idx(cur);
        if closed[ci] {
            continue;
        }
        closed[ci] = true;
        if cur == to {
            return first[ci];
        }

        for action in AgentAction::MOVES {
            let (dx, dy) = action.delta();
            let next = cur.offset(dx, dy);
            if !grid.in_bounds(next) || blocked(grid.kind(next)) {
                continue;
            }
            let ni = idx(next);
            let ng = g + 1;
            if closed[ni] || ng >= g_cost[ni] {
                continue;
            }
            g_cost[ni] = ng;
            first[ni] = if cur == from { Some(action) } else { first[ci] };
            tie += 1;
            open.push(Reverse((ng + next.manhattan(to), ng, tie, next.x, next.y)));
        }
    }
    None
}

/// Length of the shortest safe path, if any. Used by tests and the CLI.
pub fn safe_distance(grid: &Grid, from: Position, to: Position) -> Option<u32> {
    let mut pos = from;
    let mut steps = 0u32;
    let limit = grid.size() * grid.size();
    while pos != to {
        let action = first_step(grid, pos, to)?;
        let (dx, dy) = action.delta();
        pos = pos.offset(dx, dy);
        steps += 1;
        if steps > limit {
            return None;
        }
    }
    Some(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heads_for_the_goal() {
        let g = Grid::from_ascii(&["#####", "#S..#", "###.#", "#G..#", "#####"]);
        assert_eq!(first_step_to_goal(&g, Position::new(1, 1)), Some(AgentAction::Right));
        assert_eq!(safe_distance(&g, Position::new(1, 1), Position::new(1, 3)), Some(6));
    }

    #[test]
    fn routes_around_poison_but_through_spikes() {
        let g = Grid::from_ascii(&[
            "#######",
            "#Sp..G#",
            "#.###.#",
            "#.....#",
            "#######",
        ]);
        // Straight right is poisoned; the detour goes down.
        assert_eq!(first_step_to_goal(&g, Position::new(1, 1)), Some(AgentAction::Down));

        let spikes = Grid::from_ascii(&[
            "#######",
            "#S^..G#",
            "#.###.#",
            "#.....#",
            "#######",
        ]);
        assert_eq!(first_step_to_goal(&spikes, Position::new(1, 1)), Some(AgentAction::Right));
    }

    #[test]
    fn no_path_is_none() {
        let g = Grid::from_ascii(&["#####", "#Sp.#", "#p###", "#..G#", "#####"]);
        assert_eq!(first_step_to_goal(&g, Position::new(1, 1)), None);
    }

    #[test]
    fn on_goal_waits() {
        let g = Grid::from_ascii(&["####", "#SG#", "#..#", "####"]);
        assert_eq!(first_step_to_goal(&g, Position::new(2, 1)), Some(AgentAction::Wait));
    }
}
