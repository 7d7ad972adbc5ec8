//! The 2048 environment with a functional `reset`/`step` interface.
//!
//! Every call is a pure function of its inputs: the randomness lives in the
//! [`Key`] carried by [`State`], so replaying the same key and actions
//! reproduces an episode exactly.
//!
//! ```
//! use env_2048::env::{Game2048, Key, StepType};
//!
//! let env = Game2048::new();
//! let (mut state, ts) = env.reset(Key::new(0));
//! assert_eq!(ts.step_type, StepType::First);
//! while let Some(action) = state.action_mask.legal_moves().next() {
//!     let (next, ts) = env.step(&state, action);
//!     state = next;
//!     if ts.is_last() { break; }
//! }
//! assert!(state.step_count > 0);
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::engine::{Board, Move};

/// Side of the square board.
pub const BOARD_SIZE: usize = 4;
/// Number of discrete actions.
pub const NUM_ACTIONS: usize = 4;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("invalid action index {0}, expected 0..{NUM_ACTIONS}")]
    InvalidAction(usize),
    #[error("expected {expected} actions, got {got}")]
    BatchSize { expected: usize, got: usize },
}

/// A 64-bit PRNG key, split to derive independent streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(u64);

impl Key {
    #[inline]
    pub fn new(seed: u64) -> Self { Key(seed) }

    #[inline]
    pub fn raw(self) -> u64 { self.0 }

    /// Derive two new keys. The same key always splits the same way.
    pub fn split(self) -> (Key, Key) {
        let mut rng = self.rng();
        (Key(rng.gen()), Key(rng.gen()))
    }

    /// Derive `n` keys.
    pub fn split_n(self, n: usize) -> Vec<Key> {
        let mut rng = self.rng();
        (0..n).map(|_| Key(rng.gen())).collect()
    }

    /// A generator seeded from this key.
    #[inline]
    pub fn rng(self) -> StdRng { StdRng::seed_from_u64(self.0) }
}

/// Legality of each action, indexed by [`Move::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionMask(pub [bool; NUM_ACTIONS]);

impl ActionMask {
    pub fn from_board(board: Board) -> Self {
        ActionMask(Move::ALL.map(|m| board.can_move(m)))
    }

    #[inline]
    pub fn is_legal(&self, action: Move) -> bool { self.0[action.index()] }

    #[inline]
    pub fn any(&self) -> bool { self.0.iter().any(|&b| b) }

    #[inline]
    pub fn count(&self) -> usize { self.0.iter().filter(|&&b| b).count() }

    /// Legal moves in action-index order.
    pub fn legal_moves(self) -> impl Iterator<Item = Move> {
        Move::ALL.into_iter().filter(move |&m| self.is_legal(m))
    }
}

/// Full environment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub board: Board,
    pub step_count: u32,
    pub action_mask: ActionMask,
    pub key: Key,
    /// Sum of merge rewards collected so far.
    pub score: u64,
}

impl State {
    pub fn observation(&self) -> Observation {
        Observation { board: self.board, action_mask: self.action_mask }
    }
}

/// What an agent sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub board: Board,
    pub action_mask: ActionMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    First,
    Mid,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extras {
    pub highest_tile: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeStep {
    pub step_type: StepType,
    pub reward: f32,
    pub discount: f32,
    pub observation: Observation,
    pub extras: Extras,
}

impl TimeStep {
    fn new(step_type: StepType, reward: f32, discount: f32, observation: Observation) -> Self {
        let extras = Extras { highest_tile: observation.board.highest_tile() };
        TimeStep { step_type, reward, discount, observation, extras }
    }

    pub fn restart(observation: Observation) -> Self { Self::new(StepType::First, 0.0, 1.0, observation) }

    pub fn transition(reward: f32, observation: Observation) -> Self { Self::new(StepType::Mid, reward, 1.0, observation) }

    pub fn termination(reward: f32, observation: Observation) -> Self { Self::new(StepType::Last, reward, 0.0, observation) }

    /// Episode cut short by a time limit; bootstrapping is still valid.
    pub fn truncation(reward: f32, observation: Observation) -> Self { Self::new(StepType::Last, reward, 1.0, observation) }

    #[inline]
    pub fn is_first(&self) -> bool { self.step_type == StepType::First }

    #[inline]
    pub fn is_mid(&self) -> bool { self.step_type == StepType::Mid }

    #[inline]
    pub fn is_last(&self) -> bool { self.step_type == StepType::Last }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscreteSpec {
    pub name: &'static str,
    pub num_values: usize,
}

impl DiscreteSpec {
    #[inline]
    pub fn contains(&self, value: usize) -> bool { value < self.num_values }
}

/// Shape and inclusive bounds of an array-valued field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedArraySpec {
    pub name: &'static str,
    pub shape: Vec<usize>,
    pub minimum: u32,
    pub maximum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationSpec {
    pub board: BoundedArraySpec,
    pub action_mask: BoundedArraySpec,
}

impl ObservationSpec {
    /// Check an observation against the board bounds.
    pub fn contains(&self, obs: &Observation) -> bool {
        obs.board
            .to_exponents()
            .iter()
            .flatten()
            .all(|&e| (self.board.minimum..=self.board.maximum).contains(&(e as u32)))
    }
}

/// Environment knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Truncate episodes after this many steps.
    pub time_limit: Option<u32>,
}

/// The 2048 environment.
#[derive(Debug, Clone, Default)]
pub struct Game2048 {
    config: EnvConfig,
}

impl Game2048 {
    pub fn new() -> Self { Self::with_config(EnvConfig::default()) }

    pub fn with_config(config: EnvConfig) -> Self {
        crate::engine::new();
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &EnvConfig { &self.config }

    /// Start an episode: one random tile on an empty board.
    pub fn reset(&self, key: Key) -> (State, TimeStep) {
        let (key, board_key) = key.split();
        let board = Board::EMPTY.with_random_tile(&mut board_key.rng());
        let action_mask = ActionMask::from_board(board);
        let state = State { board, step_count: 0, action_mask, key, score: 0 };
        (state, TimeStep::restart(state.observation()))
    }

    /// Apply `action` to `state`.
    ///
    /// An action that is illegal under `state.action_mask` leaves the board
    /// as it is and earns nothing, but still counts as a step.
    pub fn step(&self, state: &State, action: Move) -> (State, TimeStep) {
        let (moved, reward) = state.board.shift_with_reward(action);
        let (cell_key, next_key) = state.key.split();
        let (board, reward) = if state.action_mask.is_legal(action) {
            (moved.with_random_tile(&mut cell_key.rng()), reward)
        } else {
            (state.board, 0)
        };
        let action_mask = ActionMask::from_board(board);
        let next = State {
            board,
            step_count: state.step_count + 1,
            action_mask,
            key: next_key,
            score: state.score + reward as u64,
        };
        let reward = reward as f32;
        let obs = next.observation();
        let timestep = if !action_mask.any() {
            TimeStep::termination(reward, obs)
        } else if self.config.time_limit.is_some_and(|limit| next.step_count >= limit) {
            TimeStep::truncation(reward, obs)
        } else {
            TimeStep::transition(reward, obs)
        };
        (next, timestep)
    }

    /// [`Game2048::step`] with a raw action index.
    pub fn step_index(&self, state: &State, action: usize) -> Result<(State, TimeStep), EnvError> {
        let action = Move::from_index(action).ok_or(EnvError::InvalidAction(action))?;
        Ok(self.step(state, action))
    }

    pub fn action_spec(&self) -> DiscreteSpec {
        DiscreteSpec { name: "action", num_values: NUM_ACTIONS }
    }

    pub fn observation_spec(&self) -> ObservationSpec {
        ObservationSpec {
            board: BoundedArraySpec {
                name: "board",
                shape: vec![BOARD_SIZE, BOARD_SIZE],
                minimum: 0,
                maximum: crate::engine::MAX_EXPONENT as u32,
            },
            action_mask: BoundedArraySpec { name: "action_mask", shape: vec![NUM_ACTIONS], minimum: 0, maximum: 1 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(board: Board) -> State {
        State { board, step_count: 0, action_mask: ActionMask::from_board(board), key: Key::new(3), score: 0 }
    }

    #[test]
    fn reset_places_one_tile() {
        let env = Game2048::new();
        let (state, ts) = env.reset(Key::new(42));
        assert_eq!(state.board.count_empty(), 15);
        assert_eq!(state.step_count, 0);
        assert_eq!(state.score, 0);
        assert!(ts.is_first());
        assert_eq!(ts.reward, 0.0);
        assert_eq!(ts.discount, 1.0);
        assert!(matches!(ts.extras.highest_tile, 2 | 4));
        // A lone tile can always slide somewhere.
        assert!(state.action_mask.count() >= 2);
    }

    #[test]
    fn reset_is_deterministic_per_key() {
        let env = Game2048::new();
        assert_eq!(env.reset(Key::new(9)).0, env.reset(Key::new(9)).0);
        let boards: std::collections::HashSet<u64> = (0..32).map(|s| env.reset(Key::new(s)).0.board.raw()).collect();
        assert!(boards.len() > 1);
    }

    #[test]
    fn key_split_is_stable_and_distinct() {
        let k = Key::new(7);
        let (a, b) = k.split();
        assert_eq!((a, b), k.split());
        assert_ne!(a, b);
        assert_eq!(k.split_n(5).len(), 5);
    }

    #[test]
    fn legal_step_merges_and_spawns() {
        let env = Game2048::new();
        let state = state_with(Board::from_raw(0x1100_0000_0000_0000));
        let (next, ts) = env.step(&state, Move::Left);
        assert_eq!(ts.reward, 4.0);
        assert!(ts.is_mid());
        assert_eq!(next.score, 4);
        assert_eq!(next.step_count, 1);
        assert_eq!(next.board.exponent(0, 0), 2);
        assert_eq!(next.board.count_empty(), 14);
        assert_ne!(next.key, state.key);
    }

    #[test]
    fn illegal_step_keeps_board() {
        let env = Game2048::new();
        let state = state_with(Board::from_raw(0x1000_0000_0000_0000));
        assert!(!state.action_mask.is_legal(Move::Up));
        let (next, ts) = env.step(&state, Move::Up);
        assert_eq!(next.board, state.board);
        assert_eq!(ts.reward, 0.0);
        assert_eq!(next.step_count, 1);
        assert!(ts.is_mid());
    }

    #[test]
    fn mask_reflects_single_mergeable_row() {
        let env = Game2048::new();
        // Only the last row can merge: [2, 2, 8, 4].
        let board = Board::from_exponents([[2, 1, 2, 1], [1, 2, 1, 2], [2, 3, 2, 1], [1, 1, 3, 2]]);
        let state = state_with(board);
        assert_eq!(state.action_mask.0, [false, true, false, true]);
        let (next, ts) = env.step(&state, Move::Left);
        assert_eq!(ts.reward, 4.0);
        assert_eq!(next.board.exponent(3, 0), 2);
    }

    #[test]
    fn termination_when_no_moves_remain() {
        let env = Game2048::new();
        let dead = state_with(Board::from_exponents([[1, 2, 1, 2], [2, 1, 2, 1], [1, 2, 1, 2], [2, 1, 2, 1]]));
        assert!(!dead.action_mask.any());
        let (after, ts) = env.step(&dead, Move::Up);
        assert!(ts.is_last());
        assert_eq!(ts.discount, 0.0);
        assert_eq!(ts.reward, 0.0);
        assert_eq!(after.board, dead.board);
    }

    #[test]
    fn time_limit_truncates() {
        let env = Game2048::with_config(EnvConfig { time_limit: Some(2) });
        let (s0, _) = env.reset(Key::new(1));
        let a = s0.action_mask.legal_moves().next().unwrap();
        let (s1, ts1) = env.step(&s0, a);
        assert!(ts1.is_mid());
        let a = s1.action_mask.legal_moves().next().unwrap();
        let (_, ts2) = env.step(&s1, a);
        assert!(ts2.is_last());
        assert_eq!(ts2.discount, 1.0);
    }

    #[test]
    fn step_index_rejects_out_of_range() {
        let env = Game2048::new();
        let (s, _) = env.reset(Key::new(0));
        assert_eq!(env.step_index(&s, 4).unwrap_err(), EnvError::InvalidAction(4));
        assert!(env.step_index(&s, 3).is_ok());
    }

    #[test]
    fn specs_describe_the_board() {
        let env = Game2048::new();
        assert_eq!(env.action_spec().num_values, 4);
        assert!(env.action_spec().contains(3));
        assert!(!env.action_spec().contains(4));
        let spec = env.observation_spec();
        assert_eq!(spec.board.shape, vec![4, 4]);
        let (s, _) = env.reset(Key::new(2));
        assert!(spec.contains(&s.observation()));
    }

    #[test]
    fn score_tracks_rewards() {
        let env = Game2048::new();
        let (mut s, _) = env.reset(Key::new(5));
        let mut total = 0.0f32;
        for _ in 0..200 {
            let Some(a) = s.action_mask.legal_moves().next() else { break };
            let (n, ts) = env.step(&s, a);
            total += ts.reward;
            s = n;
            if ts.is_last() { break; }
        }
        assert_eq!(s.score as f32, total);
    }
}
