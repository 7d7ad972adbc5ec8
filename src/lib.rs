//! env-2048: the 2048 game as a reinforcement-learning environment
//!
//! This crate provides:
//! - A compact packed `Board` with table-driven moves and merge rewards (`engine` module)
//! - A functional environment, `reset(key)` / `step(&state, action)`, with action masks (`env` module)
//! - Parallel batches of environments with optional auto-reset (`batch` module)
//! - Random, greedy and expectimax agents (`policy` module) and episode runners (`rollout` module)
//! - PNG/GIF rendering of states and episodes (`viewer` module)
//! - A checksummed binary trace of played episodes (`trace` module)
//!
//! Quick start:
//! ```
//! use env_2048::env::{Game2048, Key};
//! use env_2048::policy::{Policy, RandomPolicy};
//!
//! let env = Game2048::new();
//! let (mut state, _) = env.reset(Key::new(42));
//! let mut rng = Key::new(7).rng();
//! let mut returns = 0.0;
//! while let Some(action) = RandomPolicy.select(&state.observation(), &mut rng) {
//!     let (next, ts) = env.step(&state, action);
//!     returns += ts.reward;
//!     state = next;
//!     if ts.is_last() { break; }
//! }
//! assert_eq!(returns as u64, state.score);
//! ```
//!
pub mod engine;
pub mod env;
pub mod batch;
pub mod policy;
pub mod rollout;
pub mod trace;
pub mod viewer;
