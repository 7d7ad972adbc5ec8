use std::collections::HashMap;

use crate::engine::{Board, Move};

use super::heuristic::{self, board_value, count_distinct_tiles};

/// Knobs for [`ExpectimaxPolicy`].
///
/// - `prob_cutoff`: stop expanding chance branches once their cumulative probability drops below this.
/// - `depth_cap`: optional hard cap on the search depth; the depth otherwise grows with the number of distinct tiles.
/// - `cache_enabled`: reuse evaluations of chance nodes reached twice within one search.
#[derive(Debug, Clone, Copy)]
pub struct ExpectimaxConfig {
    pub prob_cutoff: f32,
    pub depth_cap: Option<u32>,
    pub cache_enabled: bool,
}

impl Default for ExpectimaxConfig {
    fn default() -> Self {
        Self { prob_cutoff: 1e-4, depth_cap: None, cache_enabled: true }
    }
}

/// Node counts for the most recent search.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    pub nodes: u64,
    pub peak_nodes: u64,
}

enum Node { Max, Chance }

#[derive(Clone, Copy)]
struct CacheEntry { value: f64, depth: u32 }

struct Search<'a> {
    cfg: &'a ExpectimaxConfig,
    cache: HashMap<Board, CacheEntry>,
    nodes: u64,
}

/// Expectimax search over the tile spawns, scored by a line-table heuristic.
///
/// Deterministic: the same board always yields the same move.
///
/// ```
/// use env_2048::engine::Board;
/// use env_2048::policy::{ExpectimaxConfig, ExpectimaxPolicy};
/// let mut ex = ExpectimaxPolicy::with_config(ExpectimaxConfig { depth_cap: Some(1), ..Default::default() });
/// let b = Board::from_raw(0x1100_0000_0000_0000);
/// assert!(ex.best_move(b).is_some());
/// assert!(ex.last_stats().nodes > 0);
/// ```
pub struct ExpectimaxPolicy {
    cfg: ExpectimaxConfig,
    stats: SearchStats,
}

impl ExpectimaxPolicy {
    pub fn new() -> Self { Self::with_config(ExpectimaxConfig::default()) }

    pub fn with_config(cfg: ExpectimaxConfig) -> Self {
        crate::engine::new();
        heuristic::warm();
        Self { cfg, stats: SearchStats::default() }
    }

    #[inline]
    pub fn config(&self) -> &ExpectimaxConfig { &self.cfg }

    /// Best move for `board`, or `None` when nothing moves.
    pub fn best_move(&mut self, board: Board) -> Option<Move> {
        let values = self.move_values(board);
        let mut best: Option<(Move, f64)> = None;
        for (dir, value) in Move::ALL.into_iter().zip(values) {
            if let Some(v) = value {
                if best.map_or(true, |(_, b)| v > b) {
                    best = Some((dir, v));
                }
            }
        }
        best.map(|(dir, _)| dir)
    }

    /// Expected value of each move in action order; `None` for moves that change nothing.
    pub fn move_values(&mut self, board: Board) -> [Option<f64>; 4] {
        let depth = self.depth_for(board);
        let mut search = Search { cfg: &self.cfg, cache: HashMap::new(), nodes: 0 };
        let values = Move::ALL.map(|dir| {
            let next = board.shift(dir);
            (next != board).then(|| search.expectimax(next, Node::Chance, depth, 1.0))
        });
        self.stats.nodes = search.nodes;
        self.stats.peak_nodes = self.stats.peak_nodes.max(search.nodes);
        values
    }

    /// Statistics from the last [`best_move`](Self::best_move) or [`move_values`](Self::move_values) call.
    #[inline]
    pub fn last_stats(&self) -> SearchStats { self.stats }

    fn depth_for(&self, board: Board) -> u32 {
        let dyn_depth = 3.max(count_distinct_tiles(board).saturating_sub(2));
        match self.cfg.depth_cap { Some(cap) => dyn_depth.min(cap), None => dyn_depth }
    }
}

impl Default for ExpectimaxPolicy { fn default() -> Self { Self::new() } }

impl Search<'_> {
    fn expectimax(&mut self, board: Board, node: Node, depth: u32, cum_prob: f32) -> f64 {
        self.nodes += 1;
        match node {
            Node::Max => self.evaluate_max(board, depth, cum_prob),
            Node::Chance => self.evaluate_chance(board, depth, cum_prob),
        }
    }

    fn evaluate_max(&mut self, board: Board, depth: u32, cum_prob: f32) -> f64 {
        let mut best = 0.0;
        for dir in Move::ALL {
            let next = board.shift(dir);
            if next != board {
                best = f64::max(best, self.expectimax(next, Node::Chance, depth, cum_prob));
            }
        }
        best
    }

    fn evaluate_chance(&mut self, board: Board, depth: u32, cum_prob: f32) -> f64 {
        if depth == 0 || cum_prob < self.cfg.prob_cutoff {
            return board_value(board);
        }
        if self.cfg.cache_enabled {
            if let Some(entry) = self.cache.get(&board) {
                if entry.depth >= depth {
                    return entry.value;
                }
            }
        }
        let num_empty = board.count_empty();
        let base_prob = cum_prob / num_empty as f32;
        let mut value = 0.0;
        let mut tmp = board.raw();
        let mut insert_tile = 1u64;
        let mut searched = 0;
        while searched < num_empty {
            if (tmp & 0xf) == 0 {
                let two = Board::from_raw(board.raw() | insert_tile);
                value += self.expectimax(two, Node::Max, depth - 1, base_prob * 0.9) * 0.9;
                let four = Board::from_raw(board.raw() | (insert_tile << 1));
                value += self.expectimax(four, Node::Max, depth - 1, base_prob * 0.1) * 0.1;
                searched += 1;
            }
            tmp >>= 4;
            insert_tile <<= 4;
        }
        value /= num_empty as f64;
        if self.cfg.cache_enabled {
            self.cache.insert(board, CacheEntry { value, depth });
        }
        value
    }
}
