//! A batch of independent environments stepped together.
//!
//! States are stepped in parallel with rayon; each lane owns its own key, so
//! results do not depend on thread scheduling.
//!
//! ```
//! use env_2048::batch::BatchEnv;
//! use env_2048::env::{Game2048, Key};
//! use env_2048::engine::Move;
//!
//! let mut batch = BatchEnv::new(Game2048::new(), 8, Key::new(0)).auto_reset(true);
//! let actions = vec![Move::Left; batch.len()];
//! let timesteps = batch.step(&actions).unwrap();
//! assert_eq!(timesteps.len(), 8);
//! ```

use rayon::prelude::*;

use crate::engine::Move;
use crate::env::{EnvError, Game2048, Key, Observation, State, TimeStep};

pub struct BatchEnv {
    env: Game2048,
    states: Vec<State>,
    auto_reset: bool,
}

impl BatchEnv {
    /// Create `size` environments, reset from keys split off `key`.
    pub fn new(env: Game2048, size: usize, key: Key) -> Self {
        let mut batch = BatchEnv { env, states: Vec::with_capacity(size), auto_reset: false };
        batch.states = batch.reset_states(key, size).0;
        batch
    }

    /// Replace a finished episode with a fresh one on the next step.
    ///
    /// The returned timestep keeps the terminal reward and discount but
    /// carries the first observation of the new episode.
    pub fn auto_reset(mut self, enabled: bool) -> Self {
        self.auto_reset = enabled;
        self
    }

    #[inline]
    pub fn len(&self) -> usize { self.states.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.states.is_empty() }

    #[inline]
    pub fn states(&self) -> &[State] { &self.states }

    pub fn observations(&self) -> Vec<Observation> {
        self.states.iter().map(State::observation).collect()
    }

    /// Reset every lane.
    pub fn reset(&mut self, key: Key) -> Vec<TimeStep> {
        let (states, timesteps) = self.reset_states(key, self.states.len());
        self.states = states;
        timesteps
    }

    /// Step lane `i` with `actions[i]`.
    pub fn step(&mut self, actions: &[Move]) -> Result<Vec<TimeStep>, EnvError> {
        if actions.len() != self.states.len() {
            return Err(EnvError::BatchSize { expected: self.states.len(), got: actions.len() });
        }
        let env = &self.env;
        let auto_reset = self.auto_reset;
        let timesteps: Vec<TimeStep> = self
            .states
            .par_iter_mut()
            .zip(actions.par_iter())
            .map(|(state, &action)| {
                let (next, mut ts) = env.step(state, action);
                if auto_reset && ts.is_last() {
                    let (fresh, first) = env.reset(next.key);
                    *state = fresh;
                    ts.observation = first.observation;
                    ts.extras = first.extras;
                } else {
                    *state = next;
                }
                ts
            })
            .collect();
        if log::log_enabled!(log::Level::Trace) {
            let finished = timesteps.iter().filter(|ts| ts.is_last()).count();
            log::trace!("batch step: {} lanes, {} finished", timesteps.len(), finished);
        }
        Ok(timesteps)
    }

    fn reset_states(&self, key: Key, size: usize) -> (Vec<State>, Vec<TimeStep>) {
        key.split_n(size).into_par_iter().map(|k| self.env.reset(k)).unzip()
    }
}
