//! Binary trace of one episode, for replay and rendering.
//!
//! Layout (little-endian):
//! `G2E1` magic, version, endianness, steps (u32), start time (u64),
//! episode key (u64), score (u64), highest tile (u32), policy name length
//! (u16) and bytes, `steps + 1` boards (u64), `steps` actions (u8),
//! `steps` rewards (u32), then a CRC32C of everything before it.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::engine::{Board, Move};
use crate::env::{ActionMask, Game2048, Key, State};
use crate::rollout::Episode;

const MAGIC: &[u8; 4] = b"G2E1";
const VERSION: u8 = 1;
const ENDIAN_LE: u8 = 0;
// magic + version + endian + steps + start + key + score + highest_tile + policy_len
const HEADER_LEN: usize = 4 + 1 + 1 + 4 + 8 + 8 + 8 + 4 + 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub steps: u32,
    pub start_unix_s: u64,
    /// Raw key the episode was played from.
    pub key: u64,
    pub score: u64,
    pub highest_tile: u32,
    pub policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub meta: Meta,
    pub boards: Vec<u64>,  // length = steps + 1
    pub actions: Vec<u8>,  // length = steps
    pub rewards: Vec<u32>, // length = steps
}

#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid magic or version")]
    MagicOrVersion,
    #[error("unsupported endianness")]
    Endianness,
    #[error("file too short or malformed")]
    Malformed,
    #[error("checksum mismatch")]
    Checksum,
    #[error("inconsistent lengths: {steps} steps, {boards} boards, {actions} actions, {rewards} rewards")]
    LengthMismatch { steps: u32, boards: usize, actions: usize, rewards: usize },
    #[error("policy name longer than {} bytes", u16::MAX)]
    PolicyName,
    #[error("episode was not recorded")]
    NotRecorded,
    #[error("replay diverged at step {0}")]
    Diverged(u32),
}

impl Trace {
    /// Build a trace from a recorded episode played from `key`.
    pub fn from_episode(episode: &Episode, key: Key, policy: Option<&str>, start_unix_s: u64) -> Result<Self, TraceError> {
        if episode.states.len() != episode.actions.len() + 1 {
            return Err(TraceError::NotRecorded);
        }
        Ok(Trace {
            meta: Meta {
                steps: episode.actions.len() as u32,
                start_unix_s,
                key: key.raw(),
                score: episode.stats.score,
                highest_tile: episode.stats.highest_tile,
                policy: policy.map(str::to_string),
            },
            boards: episode.states.iter().map(|s| s.board.raw()).collect(),
            actions: episode.actions.iter().map(|&m| m as u8).collect(),
            rewards: episode.rewards.clone(),
        })
    }

    /// Boards paired with the running score after each step.
    pub fn frames(&self) -> Result<Vec<(Board, u64)>, TraceError> {
        self.check_lengths()?;
        let gains = std::iter::once(0).chain(self.rewards.iter().copied());
        let frames = self
            .boards
            .iter()
            .zip(gains)
            .scan(0u64, |score, (&raw, gain)| {
                *score += gain as u64;
                Some((Board::from_raw(raw), *score))
            })
            .collect();
        Ok(frames)
    }

    /// Rebuild the episode's states without re-simulating it.
    ///
    /// Keys follow the same split chain as [`Game2048::reset`] and
    /// [`Game2048::step`], so a faithful trace yields the states exactly as played.
    pub fn replay_states(&self) -> Result<Vec<State>, TraceError> {
        let (env_key, _) = Key::new(self.meta.key).split();
        let mut key = env_key.split().0;
        let mut states = Vec::with_capacity(self.boards.len());
        for (step_count, (board, score)) in self.frames()?.into_iter().enumerate() {
            if step_count > 0 {
                key = key.split().1;
            }
            states.push(State {
                board,
                step_count: step_count as u32,
                action_mask: ActionMask::from_board(board),
                key,
                score,
            });
        }
        Ok(states)
    }

    /// Re-run the recorded actions from the episode key and check every board matches.
    pub fn verify(&self, env: &Game2048) -> Result<(), TraceError> {
        let (env_key, _) = Key::new(self.meta.key).split();
        let (mut state, _) = env.reset(env_key);
        if self.boards.first() != Some(&state.board.raw()) {
            return Err(TraceError::Diverged(0));
        }
        for (i, &a) in self.actions.iter().enumerate() {
            let action = Move::from_index(a as usize).ok_or(TraceError::Malformed)?;
            state = env.step(&state, action).0;
            if self.boards.get(i + 1) != Some(&state.board.raw()) {
                return Err(TraceError::Diverged(i as u32 + 1));
            }
        }
        Ok(())
    }

    fn check_lengths(&self) -> Result<(), TraceError> {
        let steps = self.meta.steps as usize;
        if self.boards.len() != steps + 1 || self.actions.len() != steps || self.rewards.len() != steps {
            return Err(TraceError::LengthMismatch {
                steps: self.meta.steps,
                boards: self.boards.len(),
                actions: self.actions.len(),
                rewards: self.rewards.len(),
            });
        }
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], TraceError> {
        let end = self.off.checked_add(n).ok_or(TraceError::Malformed)?;
        let out = self.bytes.get(self.off..end).ok_or(TraceError::Malformed)?;
        self.off = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TraceError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8, TraceError> { Ok(self.array::<1>()?[0]) }
    fn u16(&mut self) -> Result<u16, TraceError> { Ok(u16::from_le_bytes(self.array()?)) }
    fn u32(&mut self) -> Result<u32, TraceError> { Ok(u32::from_le_bytes(self.array()?)) }
    fn u64(&mut self) -> Result<u64, TraceError> { Ok(u64::from_le_bytes(self.array()?)) }
}

pub fn encode_trace(trace: &Trace) -> Result<Vec<u8>, TraceError> {
    trace.check_lengths()?;
    let policy_bytes = trace.meta.policy.as_deref().map(str::as_bytes).unwrap_or(&[]);
    let policy_len: u16 = policy_bytes.len().try_into().map_err(|_| TraceError::PolicyName)?;

    let payload_len = policy_bytes.len() + trace.boards.len() * 8 + trace.actions.len() + trace.rewards.len() * 4;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload_len + 4);

    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.push(ENDIAN_LE);
    buf.extend_from_slice(&trace.meta.steps.to_le_bytes());
    buf.extend_from_slice(&trace.meta.start_unix_s.to_le_bytes());
    buf.extend_from_slice(&trace.meta.key.to_le_bytes());
    buf.extend_from_slice(&trace.meta.score.to_le_bytes());
    buf.extend_from_slice(&trace.meta.highest_tile.to_le_bytes());
    buf.extend_from_slice(&policy_len.to_le_bytes());
    buf.extend_from_slice(policy_bytes);

    for &b in &trace.boards { buf.extend_from_slice(&b.to_le_bytes()); }
    buf.extend_from_slice(&trace.actions);
    for &r in &trace.rewards { buf.extend_from_slice(&r.to_le_bytes()); }

    let checksum = crc32c::crc32c(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

pub fn parse_trace_bytes(bytes: &[u8]) -> Result<Trace, TraceError> {
    if bytes.len() < HEADER_LEN + 4 {
        return Err(TraceError::Malformed);
    }
    // Checksum first so field reads only ever see intact data.
    let (content, trailer) = bytes.split_at(bytes.len() - 4);
    let file_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if file_crc != crc32c::crc32c(content) {
        return Err(TraceError::Checksum);
    }

    let mut r = Reader { bytes: content, off: 0 };
    if r.take(4)? != MAGIC || r.u8()? != VERSION {
        return Err(TraceError::MagicOrVersion);
    }
    if r.u8()? != ENDIAN_LE {
        return Err(TraceError::Endianness);
    }
    let steps = r.u32()?;
    let start_unix_s = r.u64()?;
    let key = r.u64()?;
    let score = r.u64()?;
    let highest_tile = r.u32()?;
    let policy_len = r.u16()? as usize;
    let policy = match policy_len {
        0 => None,
        n => Some(std::str::from_utf8(r.take(n)?).map_err(|_| TraceError::Malformed)?.to_string()),
    };

    let n = steps as usize;
    let boards = (0..=n).map(|_| r.u64()).collect::<Result<Vec<_>, _>>()?;
    let actions = r.take(n)?.to_vec();
    let rewards = (0..n).map(|_| r.u32()).collect::<Result<Vec<_>, _>>()?;
    if r.off != content.len() {
        return Err(TraceError::Malformed);
    }

    Ok(Trace {
        meta: Meta { steps, start_unix_s, key, score, highest_tile, policy },
        boards,
        actions,
        rewards,
    })
}

pub fn write_trace<P: AsRef<Path>>(path: P, trace: &Trace) -> Result<(), TraceError> {
    let data = encode_trace(trace)?;
    fs::write(path.as_ref(), &data)?;
    log::info!("wrote trace ({} steps, {} bytes) to {}", trace.meta.steps, data.len(), path.as_ref().display());
    Ok(())
}

pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Trace, TraceError> {
    let data = fs::read(path)?;
    parse_trace_bytes(&data)
}

pub fn now_unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RandomPolicy;
    use crate::rollout::run_episode;
    use tempfile::NamedTempFile;

    fn small_trace() -> Trace {
        Trace {
            meta: Meta {
                steps: 2,
                start_unix_s: 1_700_000_000,
                key: 42,
                score: 4,
                highest_tile: 4,
                policy: Some("random".to_string()),
            },
            boards: vec![0x1000_0000_0000_0000, 0x0001_0000_0000_0001, 0x2000_0000_0001_0000],
            actions: vec![Move::Right as u8, Move::Up as u8],
            rewards: vec![0, 4],
        }
    }

    #[test]
    fn file_round_trip() {
        let trace = small_trace();
        let tmp = NamedTempFile::new().unwrap();
        write_trace(tmp.path(), &trace).unwrap();
        assert_eq!(read_trace(tmp.path()).unwrap(), trace);
    }

    #[test]
    fn checksum_mismatch() {
        let mut bytes = encode_trace(&small_trace()).unwrap();
        bytes[HEADER_LEN + 1] ^= 0xFF;
        assert!(matches!(parse_trace_bytes(&bytes), Err(TraceError::Checksum)));
    }

    #[test]
    fn truncated_file() {
        let mut bytes = encode_trace(&small_trace()).unwrap();
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(parse_trace_bytes(&bytes), Err(TraceError::Checksum)));
        assert!(matches!(parse_trace_bytes(&bytes[..10]), Err(TraceError::Malformed)));
    }

    #[test]
    fn bad_magic() {
        let mut bytes = encode_trace(&small_trace()).unwrap();
        bytes[0] = b'X';
        resign(&mut bytes);
        assert!(matches!(parse_trace_bytes(&bytes), Err(TraceError::MagicOrVersion)));
    }

    #[test]
    fn rejects_inconsistent_lengths() {
        let mut trace = small_trace();
        trace.rewards.pop();
        assert!(matches!(encode_trace(&trace), Err(TraceError::LengthMismatch { .. })));
    }

    fn resign(bytes: &mut [u8]) {
        let len = bytes.len();
        let crc = crc32c::crc32c(&bytes[..len - 4]);
        bytes[len - 4..].copy_from_slice(&crc.to_le_bytes());
    }

    #[test]
    fn big_endian_flag_is_rejected() {
        let mut bytes = encode_trace(&small_trace()).unwrap();
        bytes[5] = 1;
        resign(&mut bytes);
        assert!(matches!(parse_trace_bytes(&bytes), Err(TraceError::Endianness)));
    }

    #[test]
    fn policy_name_must_be_utf8() {
        let mut bytes = encode_trace(&small_trace()).unwrap();
        bytes[HEADER_LEN] = 0xFF;
        resign(&mut bytes);
        assert!(matches!(parse_trace_bytes(&bytes), Err(TraceError::Malformed)));
    }

    #[test]
    fn frames_accumulate_score() {
        let frames = small_trace().frames().unwrap();
        assert_eq!(frames.iter().map(|f| f.1).collect::<Vec<_>>(), vec![0, 0, 4]);
    }

    #[test]
    fn frames_reject_short_rewards() {
        let mut trace = small_trace();
        trace.rewards.clear();
        assert!(matches!(trace.frames(), Err(TraceError::LengthMismatch { rewards: 0, .. })));
        assert!(matches!(trace.replay_states(), Err(TraceError::LengthMismatch { .. })));
    }

    #[test]
    fn replay_states_match_played_episode() {
        let env = Game2048::new();
        let key = Key::new(21);
        let ep = run_episode(&env, &mut RandomPolicy, key, true);
        let trace = Trace::from_episode(&ep, key, Some("random"), 0).unwrap();
        let states = trace.replay_states().unwrap();
        assert_eq!(states.len(), trace.meta.steps as usize + 1);
        assert_eq!(states.last().unwrap().score, trace.meta.score);
        assert_eq!(states.last().unwrap().step_count, trace.meta.steps);
        assert_eq!(states, ep.states);
    }

    #[test]
    fn recorded_episode_verifies() {
        let env = Game2048::new();
        let key = Key::new(8);
        let ep = run_episode(&env, &mut RandomPolicy, key, true);
        let trace = Trace::from_episode(&ep, key, Some("random"), 0).unwrap();
        trace.verify(&env).unwrap();
        let decoded = parse_trace_bytes(&encode_trace(&trace).unwrap()).unwrap();
        assert_eq!(decoded.frames().unwrap().last().unwrap().1, ep.stats.score);

        let mut tampered = trace.clone();
        tampered.boards[3] ^= 1;
        assert!(matches!(tampered.verify(&env), Err(TraceError::Diverged(3))));

        let unrecorded = run_episode(&env, &mut RandomPolicy, key, false);
        assert!(matches!(Trace::from_episode(&unrecorded, key, None, 0), Err(TraceError::NotRecorded)));
    }
}
