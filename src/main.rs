use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_2048::env::{EnvConfig, Game2048, Key};
use env_2048::policy::PolicyKind;
use env_2048::rollout::{run_episode, run_many, Summary};
use env_2048::trace::{self, Trace};
use env_2048::viewer::Viewer;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Parser)]
#[command(name = "env-2048", version, about = "Play, benchmark and render the 2048 environment")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Play one episode and optionally save it as PNG, GIF or trace
    Play {
        /// Agent: random, greedy or expectimax
        #[arg(long, default_value = "random")]
        policy: PolicyKind,
        /// Episode key (defaults to the current time)
        #[arg(long)]
        seed: Option<u64>,
        /// Truncate the episode after this many steps
        #[arg(long)]
        time_limit: Option<u32>,
        /// Cap the expectimax search depth
        #[arg(long)]
        depth: Option<u32>,
        /// Do not print the board after every step
        #[arg(long)]
        quiet: bool,
        /// Save the final state as a PNG
        #[arg(long)]
        png: Option<PathBuf>,
        /// Save the whole episode as an animated GIF
        #[arg(long)]
        gif: Option<PathBuf>,
        /// Delay between GIF frames in milliseconds
        #[arg(long, default_value_t = 200)]
        interval: u32,
        /// Write a binary trace of the episode
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Play many episodes in parallel and print summary statistics
    Bench {
        #[arg(long, default_value = "random")]
        policy: PolicyKind,
        #[arg(long)]
        seed: Option<u64>,
        /// Number of episodes
        #[arg(long, default_value_t = 1000)]
        episodes: usize,
        /// Worker threads (defaults to the number of cores)
        #[arg(long)]
        threads: Option<usize>,
        #[arg(long)]
        time_limit: Option<u32>,
        #[arg(long)]
        depth: Option<u32>,
        /// Suppress the progress bar
        #[arg(long)]
        quiet: bool,
    },
    /// Render or check a recorded trace
    Replay {
        /// Trace file written by `play --trace`
        #[arg(long)]
        trace: PathBuf,
        #[arg(long)]
        gif: Option<PathBuf>,
        /// Save the final board as a PNG
        #[arg(long)]
        png: Option<PathBuf>,
        #[arg(long, default_value_t = 200)]
        interval: u32,
        /// Re-simulate the episode from its key and compare boards
        #[arg(long)]
        verify: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Play { policy, seed, time_limit, depth, quiet, png, gif, interval, trace: trace_out } => {
            let env = Game2048::with_config(EnvConfig { time_limit });
            let key = Key::new(seed.unwrap_or_else(trace::now_unix_seconds));
            let start_wall = trace::now_unix_seconds();
            let mut agent = policy.build(depth);
            let episode = run_episode(&env, agent.as_mut(), key, true);
            if !quiet {
                for (state, action) in episode.states.iter().zip(episode.actions.iter()) {
                    println!("{}", state.board);
                    println!("step {} -> {}", state.step_count, action);
                }
                if let Some(last) = episode.states.last() {
                    println!("{}", last.board);
                }
            }
            println!(
                "Moves made: {}, score: {}, highest tile: {}",
                episode.stats.steps, episode.stats.score, episode.stats.highest_tile
            );

            let viewer = Viewer::default();
            if let (Some(path), Some(last)) = (png, episode.states.last()) {
                viewer.save_png(last, &path).with_context(|| format!("writing {}", path.display()))?;
            }
            if let Some(path) = gif {
                viewer.animate(&episode.states, interval, &path).with_context(|| format!("writing {}", path.display()))?;
            }
            if let Some(path) = trace_out {
                let record = Trace::from_episode(&episode, key, Some(agent.name()), start_wall)?;
                trace::write_trace(&path, &record).with_context(|| format!("writing {}", path.display()))?;
            }
        }
        Command::Bench { policy, seed, episodes, threads, time_limit, depth, quiet } => {
            if let Some(n) = threads {
                rayon::ThreadPoolBuilder::new().num_threads(n).build_global()?;
            }
            let env = Game2048::with_config(EnvConfig { time_limit });
            let key = Key::new(seed.unwrap_or_else(trace::now_unix_seconds));
            let pb = if quiet { ProgressBar::hidden() } else { ProgressBar::new(episodes as u64) };
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} episodes ({eta})")?
                    .progress_chars("=>-"),
            );
            pb.enable_steady_tick(Duration::from_millis(120));
            let start = Instant::now();
            let stats = run_many(&env, || policy.build(depth), key, episodes, |_| pb.inc(1));
            pb.finish_and_clear();
            let elapsed = start.elapsed().as_secs_f64().max(1e-6);
            let summary = Summary::from_stats(&stats);
            let total_steps: u64 = stats.iter().map(|s| s.steps as u64).sum();
            println!(
                "{} episodes of {} in {:.2}s | {:.1} episodes/sec | {:.0} steps/sec",
                summary.episodes,
                policy,
                elapsed,
                summary.episodes as f64 / elapsed,
                total_steps as f64 / elapsed
            );
            println!(
                "mean score: {:.1} | max score: {} | mean length: {:.1}",
                summary.mean_score, summary.max_score, summary.mean_steps
            );
            for (tile, count) in &summary.highest_tiles {
                println!("  {:>6}: {:>6} ({:.1}% reached)", tile, count, 100.0 * summary.reach_rate(*tile));
            }
        }
        Command::Replay { trace: path, gif, png, interval, verify } => {
            let record = trace::read_trace(&path).with_context(|| format!("reading {}", path.display()))?;
            println!(
                "{} steps by {} | score: {} | highest tile: {}",
                record.meta.steps,
                record.meta.policy.as_deref().unwrap_or("unknown policy"),
                record.meta.score,
                record.meta.highest_tile
            );
            if verify {
                record.verify(&Game2048::new())?;
                println!("replay matches the recorded boards");
            }
            let viewer = Viewer::default();
            let states = record.replay_states()?;
            if let Some(out) = gif {
                viewer.animate(&states, interval, &out).with_context(|| format!("writing {}", out.display()))?;
            }
            if let (Some(out), Some(last)) = (png, states.last()) {
                viewer.save_png(last, &out).with_context(|| format!("writing {}", out.display()))?;
            }
        }
    }
    Ok(())
}
