use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// A direction to slide/merge tiles.
///
/// The discriminants are the environment's action indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Move {
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
}

impl Move {
    /// All moves in action-index order.
    pub const ALL: [Move; 4] = [Move::Up, Move::Right, Move::Down, Move::Left];

    #[inline]
    pub fn index(self) -> usize { self as usize }

    /// Map an action index back to a move; `None` for indices >= 4.
    #[inline]
    pub fn from_index(idx: usize) -> Option<Move> { Move::ALL.get(idx).copied() }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Move::Up => "up",
            Move::Right => "right",
            Move::Down => "down",
            Move::Left => "left",
        };
        f.write_str(s)
    }
}

const LINE_TABLE_SIZE: usize = 0x1_0000; // 65,536 possible 16-bit lines

/// Largest exponent a nibble can hold (tile 32768). Tiles at this exponent do not merge.
pub const MAX_EXPONENT: u8 = 15;

struct Stores {
    shift_left: Box<[u64]>,
    shift_right: Box<[u64]>,
    shift_up: Box<[u64]>,
    shift_down: Box<[u64]>,
    reward: Box<[u32]>,
    score: Box<[u64]>,
}

type BoardRaw = u64;
type Line = u64;

/// Packed 4x4 2048 board as 16 4-bit exponents in a `u64`.
///
/// Cell 0 (top-left) lives in the most significant nibble; cells run
/// row-major. Exponent 0 is an empty cell, exponent `e` is the tile `2^e`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Board(BoardRaw);

impl Board {
    /// A constant empty board (all zeros).
    pub const EMPTY: Board = Board(0);

    #[inline]
    pub fn from_raw(raw: BoardRaw) -> Self { Board(raw) }

    #[inline]
    pub fn raw(&self) -> BoardRaw { self.0 }

    /// Build a board from a row-major grid of exponents. Values above 15 are clamped.
    ///
    /// ```
    /// use env_2048::engine::Board;
    /// let b = Board::from_exponents([[1, 0, 0, 0], [0; 4], [0; 4], [0, 0, 0, 2]]);
    /// assert_eq!(b.raw(), 0x1000_0000_0000_0002);
    /// ```
    pub fn from_exponents(grid: [[u8; 4]; 4]) -> Self {
        let mut raw = 0u64;
        for (row, line) in grid.iter().enumerate() {
            for (col, &e) in line.iter().enumerate() {
                raw |= (e.min(MAX_EXPONENT) as u64) << (60 - 4 * (row * 4 + col));
            }
        }
        Board(raw)
    }

    /// Row-major grid of exponents.
    pub fn to_exponents(self) -> [[u8; 4]; 4] {
        let mut grid = [[0u8; 4]; 4];
        for (row, line) in grid.iter_mut().enumerate() {
            for (col, slot) in line.iter_mut().enumerate() {
                *slot = self.exponent(row, col);
            }
        }
        grid
    }

    /// Exponent stored at `(row, col)`.
    #[inline]
    pub fn exponent(self, row: usize, col: usize) -> u8 { extract_tile(self, row * 4 + col) as u8 }

    /// Return the board resulting from sliding/merging tiles in `dir` (no random insert).
    ///
    /// ```
    /// use env_2048::engine::{Board, Move};
    /// let b = Board::from_raw(0x1100_0000_0000_0000);
    /// assert_eq!(b.shift(Move::Left).raw(), 0x2000_0000_0000_0000);
    /// ```
    #[inline]
    pub fn shift(self, dir: Move) -> Self {
        match dir {
            Move::Left | Move::Right => shift_rows(self, dir),
            Move::Up | Move::Down => shift_cols(self, dir),
        }
    }

    /// Like [`Board::shift`], also returning the merge reward: the sum of
    /// the values of every tile created by a merge.
    ///
    /// ```
    /// use env_2048::engine::{Board, Move};
    /// // [2, 2, 4, 4] -> [4, 8, _, _] earns 4 + 8
    /// let b = Board::from_raw(0x1122_0000_0000_0000);
    /// let (next, reward) = b.shift_with_reward(Move::Left);
    /// assert_eq!(next.raw(), 0x2300_0000_0000_0000);
    /// assert_eq!(reward, 12);
    /// ```
    #[inline]
    pub fn shift_with_reward(self, dir: Move) -> (Self, u32) {
        (self.shift(dir), merge_reward(self, dir))
    }

    /// True when `dir` changes the board.
    #[inline]
    pub fn can_move(self, dir: Move) -> bool { self.shift(dir) != self }

    /// Insert a random 2 (90%) or 4 (10%) tile into a uniformly chosen empty cell.
    ///
    /// A full board is returned unchanged.
    ///
    /// ```
    /// use env_2048::engine::Board;
    /// use rand::{SeedableRng, rngs::StdRng};
    /// let mut rng = StdRng::seed_from_u64(123);
    /// let b = Board::EMPTY.with_random_tile(&mut rng).with_random_tile(&mut rng);
    /// assert_eq!(b.count_empty(), 14);
    /// ```
    #[inline]
    pub fn with_random_tile<R: Rng + ?Sized>(self, rng: &mut R) -> Self {
        let empty = count_empty(self);
        if empty == 0 {
            return self;
        }
        let mut index = rng.gen_range(0..empty);
        let mut tmp = self.0;
        let mut tile = generate_random_tile(rng);
        loop {
            while (tmp & 0xf) != 0 {
                tmp >>= 4;
                tile <<= 4;
            }
            if index == 0 { break; }
            index -= 1;
            tmp >>= 4;
            tile <<= 4;
        }
        Board(self.0 | tile)
    }

    /// Perform a move then insert a random tile if the move changed the board.
    #[inline]
    pub fn make_move<R: Rng + ?Sized>(self, direction: Move, rng: &mut R) -> Self {
        let moved = self.shift(direction);
        if moved != self { moved.with_random_tile(rng) } else { self }
    }

    /// Score a game would have reached to build this board, assuming every spawn was a 2.
    #[inline]
    pub fn score(self) -> u64 { get_score(self) }

    /// Return true if no legal moves remain.
    ///
    /// ```
    /// use env_2048::engine::Board;
    /// // Nothing slides on an empty board.
    /// assert!(Board::EMPTY.is_game_over());
    /// ```
    #[inline]
    pub fn is_game_over(self) -> bool { is_game_over(self) }

    /// Highest tile value on the board, 0 when empty.
    #[inline]
    pub fn highest_tile(self) -> u32 { get_highest_tile_val(self) }

    #[inline]
    pub fn count_empty(self) -> u64 { count_empty(self) }

    /// Value at a row-major index in `0..16` (0 if empty).
    #[inline]
    pub fn tile_value(self, idx: usize) -> u32 { get_tile_val(self, idx) }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Board({:#018x})", self.0)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<String> = (0..16).map(|idx| format_val(extract_tile(*self, idx) as u8)).collect();
        writeln!(f)?;
        for (row, chunk) in cells.chunks(4).enumerate() {
            if row > 0 {
                writeln!(f, "-------------------------------")?;
            }
            writeln!(f, "{}", chunk.join("|"))?;
        }
        Ok(())
    }
}

impl From<BoardRaw> for Board { fn from(v: BoardRaw) -> Self { Board::from_raw(v) } }
impl From<Board> for BoardRaw { fn from(b: Board) -> Self { b.raw() } }

/// Build the lookup tables now instead of on first use. Safe to call multiple times.
pub fn new() {
    let _ = stores();
}

/// Total reconstructed score for a board.
pub fn get_score(board: Board) -> u64 {
    let score_table = &stores().score;
    (0..4).fold(0, |acc, idx| acc + score_table[extract_line(board.0, idx) as usize])
}

/// Merge reward for sliding `board` in `direction`.
pub fn merge_reward(board: Board, direction: Move) -> u32 {
    let reward = &stores().reward;
    let raw = match direction {
        Move::Left | Move::Right => board.0,
        Move::Up | Move::Down => transpose(board.0),
    };
    (0..4).fold(0, |acc, idx| acc + reward[extract_line(raw, idx) as usize])
}

// Credit to Nneonneo
pub(crate) fn transpose(x: BoardRaw) -> BoardRaw {
    let a1 = x & 0xF0F00F0FF0F00F0F;
    let a2 = x & 0x0000F0F00000F0F0;
    let a3 = x & 0x0F0F00000F0F0000;
    let a = a1 | (a2 << 12) | (a3 >> 12);
    let b1 = a & 0xFF00FF0000FF00FF;
    let b2 = a & 0x00FF00FF00000000;
    let b3 = a & 0x00000000FF00FF00;
    b1 | (b2 >> 24) | (b3 << 24)
}

pub(crate) fn extract_line(board: BoardRaw, line_idx: u64) -> Line {
    (board >> ((3 - line_idx) * 16)) & 0xffff
}

/// Value at a row-major index (0 if empty), e.g. 2, 4, 8, ...
pub fn get_tile_val(board: Board, idx: usize) -> u32 {
    match extract_tile(board, idx) {
        0 => 0,
        e => 1 << e,
    }
}

pub(crate) fn line_to_tiles(line: Line) -> [u8; 4] {
    let mut tiles = [0u8; 4];
    for (tile_idx, slot) in tiles.iter_mut().enumerate() {
        *slot = ((line >> ((3 - tile_idx) * 4)) & 0xf) as u8;
    }
    tiles
}

/// True if no move in any direction changes the board.
pub fn is_game_over(board: Board) -> bool {
    Move::ALL.iter().all(|&dir| board.shift(dir) == board)
}

// https://stackoverflow.com/questions/38225571/count-number-of-zero-nibbles-in-an-unsigned-64-bit-integer
/// Count the number of zero tiles.
pub fn count_empty(board: Board) -> u64 {
    16 - count_non_empty(board)
}

static STORES: OnceLock<Stores> = OnceLock::new();

fn create_stores() -> Stores {
    // Allocate on the heap to avoid large stack frames
    let mut shift_left = vec![0u64; LINE_TABLE_SIZE];
    let mut shift_right = vec![0u64; LINE_TABLE_SIZE];
    let mut shift_up = vec![0u64; LINE_TABLE_SIZE];
    let mut shift_down = vec![0u64; LINE_TABLE_SIZE];
    let mut reward = vec![0u32; LINE_TABLE_SIZE];
    let mut score = vec![0u64; LINE_TABLE_SIZE];

    for val in 0..LINE_TABLE_SIZE {
        let tiles = line_to_tiles(val as u64);
        let (left, line_reward) = slide_left(tiles);
        let right = slide_right(tiles);
        shift_left[val] = tiles_to_row(left);
        shift_right[val] = tiles_to_row(right);
        shift_up[val] = tiles_to_col(left);
        shift_down[val] = tiles_to_col(right);
        reward[val] = line_reward;
        score[val] = calc_score(tiles);
    }

    Stores {
        shift_left: shift_left.into_boxed_slice(),
        shift_right: shift_right.into_boxed_slice(),
        shift_up: shift_up.into_boxed_slice(),
        shift_down: shift_down.into_boxed_slice(),
        reward: reward.into_boxed_slice(),
        score: score.into_boxed_slice(),
    }
}

#[inline(always)]
fn stores() -> &'static Stores {
    STORES.get_or_init(create_stores)
}

fn generate_random_tile<R: Rng + ?Sized>(rng: &mut R) -> u64 { if rng.gen_range(0..10) < 9 { 1 } else { 2 } }

fn shift_rows(board: Board, move_dir: Move) -> Board {
    let s = stores();
    let table: &[u64] = if move_dir == Move::Left { &s.shift_left } else { &s.shift_right };
    let res = (0..4).fold(0, |new_board, row_idx| {
        let row_val = extract_line(board.0, row_idx) as usize;
        new_board | (table[row_val] << (48 - (16 * row_idx)))
    });
    Board(res)
}

fn shift_cols(board: Board, move_dir: Move) -> Board {
    let transpose_board = transpose(board.0);
    let s = stores();
    let table: &[u64] = if move_dir == Move::Up { &s.shift_up } else { &s.shift_down };
    let res = (0..4).fold(0, |new_board, col_idx| {
        let col_val = extract_line(transpose_board, col_idx) as usize;
        new_board | (table[col_val] << (12 - (4 * col_idx)))
    });
    Board(res)
}

fn tiles_to_row(tiles: [u8; 4]) -> Line {
    (tiles[0] as u64) << 12 | (tiles[1] as u64) << 8 | (tiles[2] as u64) << 4 | tiles[3] as u64
}

fn tiles_to_col(tiles: [u8; 4]) -> Line {
    (tiles[0] as u64) << 48 | (tiles[1] as u64) << 32 | (tiles[2] as u64) << 16 | tiles[3] as u64
}

/// Slide a line towards index 0, merging each equal pair once.
fn slide_left(tiles: [u8; 4]) -> ([u8; 4], u32) {
    let mut out = [0u8; 4];
    let mut len = 0;
    let mut reward = 0u32;
    let mut merged_last = false;
    for &tile in tiles.iter().filter(|&&t| t != 0) {
        if len > 0 && !merged_last && out[len - 1] == tile && tile < MAX_EXPONENT {
            out[len - 1] += 1;
            reward += 1 << out[len - 1];
            merged_last = true;
        } else {
            out[len] = tile;
            len += 1;
            merged_last = false;
        }
    }
    (out, reward)
}

fn slide_right(mut tiles: [u8; 4]) -> [u8; 4] {
    tiles.reverse();
    let (mut out, _) = slide_left(tiles);
    out.reverse();
    out
}

// Credit to Nneonneo
fn calc_score(tiles: [u8; 4]) -> u64 {
    tiles
        .iter()
        .filter(|&&e| e >= 2)
        // the tile plus every intermediate tile merged to build it
        .map(|&e| (e as u64 - 1) * (1u64 << e))
        .sum()
}

fn count_non_empty(board: Board) -> u64 {
    let mut board_copy = board.0;
    board_copy |= board_copy >> 1;
    board_copy |= board_copy >> 2;
    board_copy &= 0x1111111111111111;
    board_copy.count_ones() as u64
}

fn extract_tile(board: Board, idx: usize) -> u64 {
    (board.0 >> ((15 - idx) * 4)) & 0xf
}

fn format_val(exp: u8) -> String {
    match exp {
        0 => " ".repeat(7),
        e => format!("{:^7}", 1u32 << e),
    }
}

/// Highest tile value on the board, 0 when empty.
pub fn get_highest_tile_val(board: Board) -> u32 {
    match (0..16).map(|idx| extract_tile(board, idx)).max().unwrap_or(0) {
        0 => 0,
        e => 1 << e,
    }
}
