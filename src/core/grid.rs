use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::prng::Prng;

/// Number of coins scattered on a fresh or retried map: `COIN_MIN..=COIN_MAX`.
pub const COIN_MIN: usize = 5;
pub const COIN_MAX: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn manhattan(self, other: Position) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// The `"x,y"` cell key used in logs and reports.
    pub fn key(self) -> String {
        format!("{},{}", self.x, self.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TrapKind {
    /// Damage only.
    Spike,
    Poison,
    Pit,
    /// Structural: toggles a door.
    Trigger,
}

impl TrapKind {
    /// Poison and Pit force the rewind-or-die flow.
    pub fn is_lethal(self) -> bool {
        matches!(self, TrapKind::Poison | TrapKind::Pit)
    }

    pub fn name(self) -> &'static str {
        match self {
            TrapKind::Spike => "spike",
            TrapKind::Poison => "poison",
            TrapKind::Pit => "pit",
            TrapKind::Trigger => "trigger",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ItemKind {
    Key,
    MoneyBag,
    Coin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CellKind {
    #[default]
    Empty,
    Wall,
    Start,
    Goal,
    Trap(TrapKind),
    Item {
        kind: ItemKind,
        value: Option<u32>,
    },
    Door {
        open: bool,
    },
}

impl CellKind {
    pub const COIN: CellKind = CellKind::Item {
        kind: ItemKind::Coin,
        value: None,
    };

    /// Whether the agent may stand on this cell.
    pub fn is_passable(self) -> bool {
        !matches!(self, CellKind::Wall | CellKind::Door { open: false })
    }

    pub fn is_lethal_trap(self) -> bool {
        matches!(self, CellKind::Trap(t) if t.is_lethal())
    }

    pub fn is_coin(self) -> bool {
        matches!(
            self,
            CellKind::Item {
                kind: ItemKind::Coin,
                ..
            }
        )
    }

    /// One-character glyph for ASCII dumps.
    pub fn glyph(self) -> char {
        match self {
            CellKind::Empty => '.',
            CellKind::Wall => '#',
            CellKind::Start => 'S',
            CellKind::Goal => 'G',
            CellKind::Trap(TrapKind::Spike) => '^',
            CellKind::Trap(TrapKind::Poison) => 'p',
            CellKind::Trap(TrapKind::Pit) => 'o',
            CellKind::Trap(TrapKind::Trigger) => 't',
            CellKind::Item {
                kind: ItemKind::Coin,
                ..
            } => '$',
            CellKind::Item {
                kind: ItemKind::Key,
                ..
            } => 'k',
            CellKind::Item {
                kind: ItemKind::MoneyBag,
                ..
            } => 'm',
            CellKind::Door { open: true } => '/',
            CellKind::Door { open: false } => '+',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Cell {
    pub position: Position,
    pub kind: CellKind,
}

/// Square dungeon map, stored row-major.
///
/// `Grid::default()` is the empty 0×0 map; it allocates nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Grid {
    size: u32,
    cells: Vec<Cell>,
}

impl Grid {
    /// A fully walled `size × size` grid.
    pub fn walled(size: u32) -> Self {
        let size = size.max(3);
        let mut cells = Vec::with_capacity((size as usize) * (size as usize));
        for y in 0..size as i32 {
            for x in 0..size as i32 {
                cells.push(Cell {
                    position: Position::new(x, y),
                    kind: CellKind::Wall,
                });
            }
        }
        Self { size, cells }
    }

    /// Build from rows of glyphs (see [`CellKind::glyph`]); handy for fixtures.
    ///
    /// The grid is square: short or missing rows are padded with walls.
    /// Unknown glyphs become `Empty`.
    pub fn from_ascii(rows: &[&str]) -> Self {
        let width = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0);
        let size = width.max(rows.len()) as u32;
        let mut grid = Self::walled(size);
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                let kind = match ch {
                    '#' => CellKind::Wall,
                    'S' => CellKind::Start,
                    'G' => CellKind::Goal,
                    '^' => CellKind::Trap(TrapKind::Spike),
                    'p' => CellKind::Trap(TrapKind::Poison),
                    'o' => CellKind::Trap(TrapKind::Pit),
                    't' => CellKind::Trap(TrapKind::Trigger),
                    '$' => CellKind::COIN,
                    'k' => CellKind::Item {
                        kind: ItemKind::Key,
                        value: None,
                    },
                    'm' => CellKind::Item {
                        kind: ItemKind::MoneyBag,
                        value: None,
                    },
                    '/' => CellKind::Door { open: true },
                    '+' => CellKind::Door { open: false },
                    _ => CellKind::Empty,
                };
                grid.set(Position::new(x as i32, y as i32), kind);
            }
        }
        grid
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn in_bounds(&self, p: Position) -> bool {
        p.x >= 0 && p.y >= 0 && (p.x as u32) < self.size && (p.y as u32) < self.size
    }

    /// Strictly inside the outer wall ring.
    pub fn is_interior(&self, p: Position) -> bool {
        p.x > 0 && p.y > 0 && (p.x as u32) < self.size.saturating_sub(1)
            && (p.y as u32) < self.size.saturating_sub(1)
    }

    fn idx(&self, p: Position) -> usize {
        (p.y as usize) * (self.size as usize) + (p.x as usize)
    }

    pub fn get(&self, p: Position) -> Option<&Cell> {
        if !self.in_bounds(p) {
            return None;
        }
        self.cells.get(self.idx(p))
    }

    /// Kind at `p`; out-of-bounds reads as `Wall`.
    pub fn kind(&self, p: Position) -> CellKind {
        self.get(p).map(|c| c.kind).unwrap_or(CellKind::Wall)
    }

    pub fn set(&mut self, p: Position, kind: CellKind) {
        if self.in_bounds(p) {
            let i = self.idx(p);
            self.cells[i].kind = kind;
        }
    }

    pub fn is_open(&self, p: Position) -> bool {
        self.in_bounds(p) && self.kind(p) != CellKind::Wall
    }

    pub fn open_neighbors(&self, p: Position) -> usize {
        DIRECTIONS
            .iter()
            .filter(|(dx, dy)| self.is_open(p.offset(*dx, *dy)))
            .count()
    }

    pub fn find(&self, kind: CellKind) -> Option<Position> {
        self.cells.iter().find(|c| c.kind == kind).map(|c| c.position)
    }

    pub fn count(&self, pred: impl Fn(CellKind) -> bool) -> usize {
        self.cells.iter().filter(|c| pred(c.kind)).count()
    }

    /// Closest door to `from` by Manhattan distance; ties go to the first in row-major order.
    pub fn nearest_door(&self, from: Position) -> Option<Position> {
        self.cells
            .iter()
            .filter(|c| matches!(c.kind, CellKind::Door { .. }))
            .min_by_key(|c| from.manhattan(c.position))
            .map(|c| c.position)
    }

    /// Flip the door at `p` between open and closed. Other cells are left alone.
    pub fn toggle_door(&mut self, p: Position) {
        if let CellKind::Door { open } = self.kind(p) {
            self.set(p, CellKind::Door { open: !open });
        }
    }

    pub fn start(&self) -> Option<Position> {
        self.find(CellKind::Start)
    }

    pub fn goal(&self) -> Option<Position> {
        self.find(CellKind::Goal)
    }

    pub fn open_count(&self) -> usize {
        self.count(|k| k != CellKind::Wall)
    }

    /// Flood fill over non-wall cells: is the goal reachable from the start?
    pub fn start_reaches_goal(&self) -> bool {
        let (Some(start), Some(goal)) = (self.start(), self.goal()) else {
            return false;
        };
        let mut seen = vec![false; self.cells.len()];
        let mut stack = vec![start];
        seen[self.idx(start)] = true;
        while let Some(p) = stack.pop() {
            if p == goal {
                return true;
            }
            for (dx, dy) in DIRECTIONS {
                let n = p.offset(dx, dy);
                if self.is_open(n) && !seen[self.idx(n)] {
                    seen[self.idx(n)] = true;
                    stack.push(n);
                }
            }
        }
        false
    }

    /// Scatter `COIN_MIN..=COIN_MAX` coins over `Empty` cells (shuffle-and-take).
    pub fn scatter_coins(&mut self, rng: &mut Prng) -> usize {
        let mut empties: Vec<Position> = self
            .cells
            .iter()
            .filter(|c| c.kind == CellKind::Empty)
            .map(|c| c.position)
            .collect();
        rng.shuffle(&mut empties);
        let want = rng.gen_range_usize(COIN_MIN, COIN_MAX + 1);
        let placed = want.min(empties.len());
        for p in &empties[..placed] {
            self.set(*p, CellKind::COIN);
        }
        placed
    }

    /// Clear every coin and scatter a fresh set. Geometry and hazards are untouched.
    pub fn reshuffle_coins(&mut self, rng: &mut Prng) -> usize {
        for cell in &mut self.cells {
            if cell.kind.is_coin() {
                cell.kind = CellKind::Empty;
            }
        }
        self.scatter_coins(rng)
    }

    pub fn to_ascii(&self) -> String {
        if self.size == 0 {
            return String::new();
        }
        let mut out = String::with_capacity(self.cells.len() + self.size as usize);
        for row in self.cells.chunks(self.size as usize) {
            out.extend(row.iter().map(|c| c.kind.glyph()));
            out.push('\n');
        }
        out
    }
}

/// Unit moves in Up, Down, Left, Right order.
pub const DIRECTIONS: [(i32, i32); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];
