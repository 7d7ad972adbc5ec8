//! Agents that pick an action from an [`Observation`].
//!
//! - [`RandomPolicy`]: uniform over the legal actions.
//! - [`GreedyPolicy`]: best immediate merge reward.
//! - [`ExpectimaxPolicy`]: expectimax search over tile spawns.
//!
//! ```
//! use env_2048::env::{Game2048, Key};
//! use env_2048::policy::{Policy, RandomPolicy};
//!
//! let env = Game2048::new();
//! let (state, _) = env.reset(Key::new(1));
//! let mut rng = Key::new(2).rng();
//! let action = RandomPolicy.select(&state.observation(), &mut rng).unwrap();
//! assert!(state.action_mask.is_legal(action));
//! ```

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::engine::Move;
use crate::env::Observation;

mod expectimax;
mod heuristic;

pub use expectimax::{ExpectimaxConfig, ExpectimaxPolicy, SearchStats};

/// Chooses an action for an observation.
pub trait Policy: Send {
    fn name(&self) -> &'static str;

    /// A legal action, or `None` only when the mask allows nothing.
    fn select(&mut self, obs: &Observation, rng: &mut dyn RngCore) -> Option<Move>;
}

/// Masked-uniform random agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPolicy;

impl Policy for RandomPolicy {
    fn name(&self) -> &'static str { "random" }

    fn select(&mut self, obs: &Observation, rng: &mut dyn RngCore) -> Option<Move> {
        let legal: Vec<Move> = obs.action_mask.legal_moves().collect();
        legal.choose(rng).copied()
    }
}

/// One-step lookahead: most merge reward, then most empty cells, then lowest action index.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyPolicy;

impl Policy for GreedyPolicy {
    fn name(&self) -> &'static str { "greedy" }

    fn select(&mut self, obs: &Observation, _rng: &mut dyn RngCore) -> Option<Move> {
        let mut best: Option<(Move, (u32, u64))> = None;
        for dir in obs.action_mask.legal_moves() {
            let (next, reward) = obs.board.shift_with_reward(dir);
            let key = (reward, next.count_empty());
            if best.map_or(true, |(_, k)| key > k) {
                best = Some((dir, key));
            }
        }
        best.map(|(dir, _)| dir)
    }
}

impl Policy for ExpectimaxPolicy {
    fn name(&self) -> &'static str { "expectimax" }

    fn select(&mut self, obs: &Observation, _rng: &mut dyn RngCore) -> Option<Move> {
        if !obs.action_mask.any() {
            return None;
        }
        self.best_move(obs.board)
    }
}

/// Policy selector for command-line use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    #[default]
    Random,
    Greedy,
    Expectimax,
}

impl PolicyKind {
    /// Build a fresh policy. `depth_cap` only applies to expectimax.
    pub fn build(self, depth_cap: Option<u32>) -> Box<dyn Policy> {
        match self {
            PolicyKind::Random => Box::new(RandomPolicy),
            PolicyKind::Greedy => Box::new(GreedyPolicy),
            PolicyKind::Expectimax => {
                Box::new(ExpectimaxPolicy::with_config(ExpectimaxConfig { depth_cap, ..Default::default() }))
            }
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown policy `{0}` (expected random, greedy or expectimax)")]
pub struct UnknownPolicy(String);

impl FromStr for PolicyKind {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(PolicyKind::Random),
            "greedy" => Ok(PolicyKind::Greedy),
            "expectimax" => Ok(PolicyKind::Expectimax),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyKind::Random => "random",
            PolicyKind::Greedy => "greedy",
            PolicyKind::Expectimax => "expectimax",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Board;
    use crate::env::{ActionMask, Key};

    fn obs(board: Board) -> Observation {
        Observation { board, action_mask: ActionMask::from_board(board) }
    }

    #[test]
    fn random_only_picks_legal_moves() {
        let o = obs(Board::from_raw(0x1000_0000_0000_0000));
        let mut rng = Key::new(0).rng();
        let mut seen = [0usize; 4];
        for _ in 0..400 {
            let m = RandomPolicy.select(&o, &mut rng).unwrap();
            assert!(o.action_mask.is_legal(m));
            seen[m.index()] += 1;
        }
        assert!(seen[Move::Right.index()] > 100);
        assert!(seen[Move::Down.index()] > 100);
    }

    #[test]
    fn policies_return_none_without_legal_moves() {
        let dead = obs(Board::from_exponents([[1, 2, 1, 2], [2, 1, 2, 1], [1, 2, 1, 2], [2, 1, 2, 1]]));
        let mut rng = Key::new(0).rng();
        assert_eq!(RandomPolicy.select(&dead, &mut rng), None);
        assert_eq!(GreedyPolicy.select(&dead, &mut rng), None);
        assert_eq!(PolicyKind::Expectimax.build(Some(1)).select(&dead, &mut rng), None);
    }

    #[test]
    fn greedy_takes_the_merge() {
        // Column merge (4 + 4) beats the row merge (2 + 2).
        let b = Board::from_exponents([[1, 1, 0, 0], [0, 0, 0, 2], [0, 0, 0, 2], [0; 4]]);
        let mut rng = Key::new(0).rng();
        // Up and Down tie on reward and empty cells; the lower index wins.
        assert_eq!(GreedyPolicy.select(&obs(b), &mut rng), Some(Move::Up));
    }

    #[test]
    fn greedy_prefers_more_empty_cells_on_equal_reward() {
        // Every move earns 8: two 2+2 merges sideways, one 4+4 merge vertically.
        let b = Board::from_exponents([[1, 1, 1, 1], [0, 0, 0, 2], [0, 0, 0, 2], [0; 4]]);
        let mut rng = Key::new(0).rng();
        for dir in Move::ALL {
            assert_eq!(b.shift_with_reward(dir).1, 8);
        }
        assert_eq!(b.shift(Move::Right).count_empty(), 12);
        assert_eq!(b.shift(Move::Up).count_empty(), 11);
        // Right and Left both leave 12 empty cells; Right has the lower index.
        assert_eq!(GreedyPolicy.select(&obs(b), &mut rng), Some(Move::Right));
    }

    #[test]
    fn policy_kind_parses() {
        assert_eq!("Greedy".parse::<PolicyKind>().unwrap(), PolicyKind::Greedy);
        assert_eq!("expectimax".parse::<PolicyKind>().unwrap().to_string(), "expectimax");
        assert!("minimax".parse::<PolicyKind>().is_err());
        assert_eq!(PolicyKind::Random.build(None).name(), "random");
    }
}
