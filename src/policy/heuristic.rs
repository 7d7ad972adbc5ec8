use std::sync::OnceLock;

use crate::engine::{self, Board};

static HEURISTIC_SCORES: OnceLock<Box<[f64]>> = OnceLock::new();

pub(crate) fn warm() {
    let _ = heuristic_scores();
}

fn heuristic_scores() -> &'static [f64] {
    HEURISTIC_SCORES
        .get_or_init(|| {
            (0..0x1_0000u64)
                .map(|line| calc_heuristic_score(&engine::line_to_tiles(line)))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        })
        .as_ref()
}

/// Static evaluation of a board: the sum of per-line scores over all rows and columns.
#[inline]
pub(crate) fn board_value(board: Board) -> f64 {
    let scores = heuristic_scores();
    let transposed = engine::transpose(board.raw());
    (0..4).fold(0., |score, line_idx| {
        let row = engine::extract_line(board.raw(), line_idx) as usize;
        let col = engine::extract_line(transposed, line_idx) as usize;
        score + scores[row] + scores[col]
    })
}

// Credit to Nneonneo for heuristic structure
fn calc_heuristic_score(line: &[u8; 4]) -> f64 {
    const LOST_PENALTY: f64 = 200_000.0;
    LOST_PENALTY + calc_empty(line) + calc_merges(line) - calc_monotonicity(line) - calc_sum(line)
}

fn calc_sum(line: &[u8; 4]) -> f64 {
    const SUM_POWER: f64 = 3.5;
    const SUM_WEIGHT: f64 = 11.0;
    line.iter().map(|&e| (e as f64).powf(SUM_POWER)).sum::<f64>() * SUM_WEIGHT
}

fn calc_empty(line: &[u8; 4]) -> f64 {
    const EMPTY_WEIGHT: f64 = 270.0;
    line.iter().filter(|&&e| e == 0).count() as f64 * EMPTY_WEIGHT
}

fn calc_merges(line: &[u8; 4]) -> f64 {
    const MERGES_WEIGHT: f64 = 700.0;
    let mut prev = 0;
    let mut counter = 0.;
    let mut merges = 0.;
    for &e in line {
        if prev == e && e != 0 {
            counter += 1.;
        } else if counter > 0. {
            merges += 1. + counter;
            counter = 0.;
        }
        prev = e;
    }
    if counter > 0. {
        merges += 1. + counter;
    }
    merges * MERGES_WEIGHT
}

fn calc_monotonicity(line: &[u8; 4]) -> f64 {
    const MONOTONICITY_POWER: f64 = 4.0;
    const MONOTONICITY_WEIGHT: f64 = 47.0;
    let mut towards_left = 0.;
    let mut towards_right = 0.;
    for pair in line.windows(2) {
        let (a, b) = ((pair[0] as f64).powf(MONOTONICITY_POWER), (pair[1] as f64).powf(MONOTONICITY_POWER));
        if a > b {
            towards_left += a - b;
        } else {
            towards_right += b - a;
        }
    }
    towards_left.min(towards_right) * MONOTONICITY_WEIGHT
}

/// Number of distinct non-empty exponents on the board.
// Credit to Nneonneo
pub(crate) fn count_distinct_tiles(board: Board) -> u32 {
    let mut bitset = 0u32;
    let mut raw = board.raw();
    while raw != 0 {
        bitset |= 1 << (raw & 0xf);
        raw >>= 4;
    }
    (bitset >> 1).count_ones()
}
