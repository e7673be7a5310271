//! Discrete-grid Tetris duel: two boards under one shared gravity clock

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;

use crate::ws::protocol::{
    BoardSnapshot, GameKind, GameSnapshot, PieceKind, PieceView, Side, TetrisSnapshot,
};

use super::{InputState, SideInputs, Simulation};

pub const BOARD_WIDTH: usize = 10;
pub const BOARD_HEIGHT: usize = 20;

/// Gravity interval at level 0, in ticks
pub const BASE_GRAVITY_TICKS: u32 = 48;
/// Fastest gravity interval
pub const MIN_GRAVITY_TICKS: u32 = 3;
const GRAVITY_TICKS_PER_LEVEL: u32 = 5;
const LINES_PER_LEVEL: u32 = 10;

/// Points for 0..=4 lines cleared at once, multiplied by (level + 1)
const LINE_SCORES: [u32; 5] = [0, 40, 100, 300, 1200];

/// Horizontal offsets tried when a rotation collides
const ROTATION_KICKS: [i32; 5] = [0, -1, 1, -2, 2];

/// Gravity interval for a player who has cleared `lines` lines
pub fn gravity_interval_for(lines: u32) -> u32 {
    let level = lines / LINES_PER_LEVEL;
    BASE_GRAVITY_TICKS
        .saturating_sub(level.saturating_mul(GRAVITY_TICKS_PER_LEVEL))
        .max(MIN_GRAVITY_TICKS)
}

/// Size of the rotation box and the cells of the spawn orientation
fn shape(kind: PieceKind) -> (i32, [(i32, i32); 4]) {
    match kind {
        PieceKind::I => (4, [(0, 1), (1, 1), (2, 1), (3, 1)]),
        PieceKind::O => (2, [(0, 0), (1, 0), (0, 1), (1, 1)]),
        PieceKind::T => (3, [(1, 0), (0, 1), (1, 1), (2, 1)]),
        PieceKind::S => (3, [(1, 0), (2, 0), (0, 1), (1, 1)]),
        PieceKind::Z => (3, [(0, 0), (1, 0), (1, 1), (2, 1)]),
        PieceKind::J => (3, [(0, 0), (0, 1), (1, 1), (2, 1)]),
        PieceKind::L => (3, [(2, 0), (0, 1), (1, 1), (2, 1)]),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    kind: PieceKind,
    /// Clockwise quarter turns, 0..4
    rotation: u8,
    /// Column of the rotation box's left edge
    x: i32,
    /// Row of the rotation box's top edge
    y: i32,
}

impl Piece {
    fn spawn(kind: PieceKind) -> Self {
        let (size, _) = shape(kind);
        Self {
            kind,
            rotation: 0,
            x: (BOARD_WIDTH as i32 - size) / 2,
            y: 0,
        }
    }

    /// Board coordinates (column, row) of the four cells
    fn cells(&self) -> [(i32, i32); 4] {
        let (size, base) = shape(self.kind);
        base.map(|(mut c, mut r)| {
            for _ in 0..self.rotation {
                (c, r) = (size - 1 - r, c);
            }
            (self.x + c, self.y + r)
        })
    }

    fn shifted(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..self
        }
    }

    fn rotated(self) -> Self {
        Self {
            rotation: (self.rotation + 1) % 4,
            ..self
        }
    }
}

/// 7-bag randomiser
struct PieceBag {
    rng: ChaCha8Rng,
    queue: Vec<PieceKind>,
}

impl PieceBag {
    fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            queue: Vec::with_capacity(PieceKind::ALL.len()),
        }
    }

    fn next(&mut self) -> PieceKind {
        if self.queue.is_empty() {
            self.queue.extend_from_slice(&PieceKind::ALL);
            self.queue.shuffle(&mut self.rng);
        }
        self.queue.pop().unwrap_or(PieceKind::T)
    }
}

/// One player's board
struct Board {
    cells: [[u8; BOARD_WIDTH]; BOARD_HEIGHT],
    active: Option<Piece>,
    next: PieceKind,
    bag: PieceBag,
    score: u32,
    lines: u32,
    pieces: u32,
    gravity_interval: u32,
    game_over: bool,
}

impl Board {
    fn new(seed: u64) -> Self {
        let mut bag = PieceBag::new(seed);
        let first = bag.next();
        let next = bag.next();
        Self {
            cells: [[0; BOARD_WIDTH]; BOARD_HEIGHT],
            active: Some(Piece::spawn(first)),
            next,
            bag,
            score: 0,
            lines: 0,
            pieces: 0,
            gravity_interval: BASE_GRAVITY_TICKS,
            game_over: false,
        }
    }

    fn level(&self) -> u32 {
        self.lines / LINES_PER_LEVEL
    }

    fn fits(&self, piece: &Piece) -> bool {
        piece.cells().iter().all(|&(c, r)| {
            (0..BOARD_WIDTH as i32).contains(&c)
                && (0..BOARD_HEIGHT as i32).contains(&r)
                && self.cells[r as usize][c as usize] == 0
        })
    }

    /// Move the active piece if the target position is free
    fn try_move(&mut self, candidate: Piece) -> bool {
        if self.fits(&candidate) {
            self.active = Some(candidate);
            true
        } else {
            false
        }
    }

    fn apply_input(&mut self, input: &InputState) {
        let Some(piece) = self.active else {
            return;
        };

        if input.rotate {
            let rotated = piece.rotated();
            for dx in ROTATION_KICKS {
                if self.try_move(rotated.shifted(dx, 0)) {
                    break;
                }
            }
        }

        if input.left != input.right {
            let dx = if input.left { -1 } else { 1 };
            if let Some(piece) = self.active {
                self.try_move(piece.shifted(dx, 0));
            }
        }

        if input.drop {
            self.hard_drop();
        } else if input.down {
            self.fall();
        }
    }

    /// One row down, locking when blocked
    fn fall(&mut self) {
        let Some(piece) = self.active else {
            return;
        };
        if !self.try_move(piece.shifted(0, 1)) {
            self.lock();
        }
    }

    fn hard_drop(&mut self) {
        while let Some(piece) = self.active {
            if !self.try_move(piece.shifted(0, 1)) {
                break;
            }
        }
        self.lock();
    }

    fn lock(&mut self) {
        let Some(piece) = self.active.take() else {
            return;
        };
        for (c, r) in piece.cells() {
            if (0..BOARD_WIDTH as i32).contains(&c) && (0..BOARD_HEIGHT as i32).contains(&r) {
                self.cells[r as usize][c as usize] = piece.kind.cell();
            }
        }
        self.pieces += 1;

        let cleared = self.clear_lines();
        if cleared > 0 {
            self.score += LINE_SCORES[cleared.min(4) as usize] * (self.level() + 1);
            self.lines += cleared;
            self.gravity_interval = self.gravity_interval.min(gravity_interval_for(self.lines));
        }

        let spawned = Piece::spawn(self.next);
        self.next = self.bag.next();
        if self.fits(&spawned) {
            self.active = Some(spawned);
        } else {
            self.game_over = true;
        }
    }

    /// Remove full rows, shifting everything above down
    fn clear_lines(&mut self) -> u32 {
        let remaining: Vec<[u8; BOARD_WIDTH]> = self
            .cells
            .iter()
            .filter(|row| row.iter().any(|cell| *cell == 0))
            .copied()
            .collect();
        let cleared = BOARD_HEIGHT - remaining.len();
        if cleared == 0 {
            return 0;
        }

        let mut cells = [[0; BOARD_WIDTH]; BOARD_HEIGHT];
        for (row, kept) in cells[cleared..].iter_mut().zip(remaining) {
            *row = kept;
        }
        self.cells = cells;
        cleared as u32
    }

    fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            cells: self.cells.iter().map(|row| row.to_vec()).collect(),
            active: self.active.map(|piece| PieceView {
                kind: piece.kind,
                cells: piece.cells().iter().map(|&(c, r)| [c, r]).collect(),
            }),
            next: self.next,
            score: self.score,
            lines: self.lines,
            level: self.level(),
            game_over: self.game_over,
        }
    }
}

/// Canonical state of a Tetris duel
pub struct TetrisSimulation {
    rng: ChaCha8Rng,
    boards: [Board; 2],
    /// Match-wide interval: the minimum of both players' intervals
    gravity_interval: u32,
    gravity_counter: u32,
}

impl TetrisSimulation {
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let board_seed: u64 = rng.gen();
        Self {
            rng,
            boards: [Board::new(board_seed), Board::new(board_seed)],
            gravity_interval: BASE_GRAVITY_TICKS,
            gravity_counter: 0,
        }
    }

    pub fn gravity_interval(&self) -> u32 {
        self.gravity_interval
    }

    pub fn player_gravity_interval(&self, side: Side) -> u32 {
        self.boards[side.index()].gravity_interval
    }

    pub fn is_game_over(&self, side: Side) -> bool {
        self.boards[side.index()].game_over
    }
}

impl Simulation for TetrisSimulation {
    fn kind(&self) -> GameKind {
        GameKind::Tetris
    }

    fn reset(&mut self) {
        // Both players get the same piece sequence
        let board_seed: u64 = self.rng.gen();
        self.boards = [Board::new(board_seed), Board::new(board_seed)];
        self.gravity_interval = BASE_GRAVITY_TICKS;
        self.gravity_counter = 0;
    }

    fn step(&mut self, inputs: &SideInputs) {
        for (board, input) in self.boards.iter_mut().zip(inputs) {
            if !board.game_over {
                board.apply_input(input);
            }
        }

        self.gravity_counter += 1;
        if self.gravity_counter >= self.gravity_interval {
            self.gravity_counter = 0;
            for board in self.boards.iter_mut().filter(|b| !b.game_over) {
                board.fall();
            }
        }

        let fastest = self
            .boards
            .iter()
            .map(|b| b.gravity_interval)
            .min()
            .unwrap_or(BASE_GRAVITY_TICKS);
        self.gravity_interval = self.gravity_interval.min(fastest);
    }

    fn public_snapshot(&self) -> GameSnapshot {
        GameSnapshot::Tetris(TetrisSnapshot {
            width: BOARD_WIDTH,
            height: BOARD_HEIGHT,
            gravity_interval: self.gravity_interval,
            a: self.boards[0].snapshot(),
            b: self.boards[1].snapshot(),
        })
    }

    fn defeated(&self) -> [bool; 2] {
        [self.boards[0].game_over, self.boards[1].game_over]
    }

    fn stats(&self) -> serde_json::Value {
        let board = |b: &Board| {
            json!({
                "score": b.score,
                "lines": b.lines,
                "level": b.level(),
                "pieces": b.pieces,
            })
        };
        json!({ "a": board(&self.boards[0]), "b": board(&self.boards[1]) })
    }

    fn consumes_input(&self) -> bool {
        true
    }
}
