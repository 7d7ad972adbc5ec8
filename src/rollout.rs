//! Running whole episodes with a [`Policy`].

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::engine::Move;
use crate::env::{Game2048, Key, State};
use crate::policy::Policy;

/// Per-episode outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    pub steps: u32,
    pub total_reward: f64,
    pub score: u64,
    pub highest_tile: u32,
}

/// A played episode.
///
/// `states` holds every state from the reset onwards (`actions.len() + 1`
/// entries) when recording was requested, and is empty otherwise.
#[derive(Debug, Clone, Default)]
pub struct Episode {
    pub states: Vec<State>,
    pub actions: Vec<Move>,
    pub rewards: Vec<u32>,
    pub stats: EpisodeStats,
}

/// Play one episode from `key` until it ends.
///
/// ```
/// use env_2048::env::{Game2048, Key};
/// use env_2048::policy::GreedyPolicy;
/// use env_2048::rollout::run_episode;
///
/// let ep = run_episode(&Game2048::new(), &mut GreedyPolicy, Key::new(7), true);
/// assert_eq!(ep.states.len(), ep.actions.len() + 1);
/// assert!(ep.stats.highest_tile >= 4);
/// ```
pub fn run_episode(env: &Game2048, policy: &mut dyn Policy, key: Key, record: bool) -> Episode {
    let (env_key, policy_key) = key.split();
    let mut rng = policy_key.rng();
    let (mut state, _) = env.reset(env_key);
    let mut episode = Episode::default();
    if record {
        episode.states.push(state);
    }
    while let Some(action) = policy.select(&state.observation(), &mut rng) {
        let (next, ts) = env.step(&state, action);
        episode.actions.push(action);
        episode.rewards.push(ts.reward as u32);
        episode.stats.total_reward += ts.reward as f64;
        state = next;
        if record {
            episode.states.push(state);
        }
        if ts.is_last() {
            break;
        }
    }
    episode.stats.steps = state.step_count;
    episode.stats.score = state.score;
    episode.stats.highest_tile = state.board.highest_tile();
    log::debug!(
        "{} episode done: {} steps, score {}, highest tile {}",
        policy.name(),
        episode.stats.steps,
        episode.stats.score,
        episode.stats.highest_tile
    );
    episode
}

/// Play `episodes` episodes in parallel, one key per episode, results in episode order.
///
/// `on_done` is called once per finished episode from worker threads.
pub fn run_many<F, P>(env: &Game2048, make_policy: F, key: Key, episodes: usize, on_done: P) -> Vec<EpisodeStats>
where
    F: Fn() -> Box<dyn Policy> + Sync,
    P: Fn(&EpisodeStats) + Sync,
{
    key.split_n(episodes)
        .into_par_iter()
        .map_init(&make_policy, |policy, k| {
            let stats = run_episode(env, policy.as_mut(), k, false).stats;
            on_done(&stats);
            stats
        })
        .collect()
}

/// Aggregate over many episodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub episodes: usize,
    pub mean_score: f64,
    pub max_score: u64,
    pub mean_steps: f64,
    /// Highest tile reached -> number of episodes.
    pub highest_tiles: BTreeMap<u32, usize>,
}

impl Summary {
    pub fn from_stats(stats: &[EpisodeStats]) -> Self {
        if stats.is_empty() {
            return Summary::default();
        }
        let n = stats.len() as f64;
        let mut highest_tiles = BTreeMap::new();
        for s in stats {
            *highest_tiles.entry(s.highest_tile).or_insert(0) += 1;
        }
        Summary {
            episodes: stats.len(),
            mean_score: stats.iter().map(|s| s.score as f64).sum::<f64>() / n,
            max_score: stats.iter().map(|s| s.score).max().unwrap_or(0),
            mean_steps: stats.iter().map(|s| s.steps as f64).sum::<f64>() / n,
            highest_tiles,
        }
    }

    /// Fraction of episodes whose highest tile reached `tile`.
    pub fn reach_rate(&self, tile: u32) -> f64 {
        if self.episodes == 0 {
            return 0.0;
        }
        let reached: usize = self.highest_tiles.range(tile..).map(|(_, &c)| c).sum();
        reached as f64 / self.episodes as f64
    }
}
