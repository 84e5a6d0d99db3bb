//! Per-call state: `Call`, its transcript log, and turn identity.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bot,
    System,
}

/// One entry in a call's transcript.
///
/// The wire shape used by the log receiver names these fields `name`
/// and `transcription` (see `original_source/routes/call.py`); this
/// struct keeps the internal field names aligned with the data model's
/// own vocabulary and carries the wire names only on the shipper's
/// payload type (`crate::transcript::WireEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Whether the call is currently driven by the LLM or a human operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Ai,
    Operator,
}

/// A monotonically increasing per-call counter, advanced on every
/// barge-in (SPEC_FULL.md §3.1's redesign away from a mutable
/// "interrupted" boolean). Server messages are processed one at a time
/// in arrival order, so the suppression `TurnId` exists to express —
/// audio belonging to an interrupted turn never reaching egress — falls
/// out of `llm::apply_rules` handling the interruption and the stale
/// audio within the same synchronous call; `current_turn` is the
/// durable record of "how many times has this call been interrupted",
/// not a tag compared per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl TurnId {
    pub const fn initial() -> Self {
        TurnId(0)
    }

    #[must_use]
    pub fn next(self) -> Self {
        TurnId(self.0.wrapping_add(1))
    }
}

/// Caller-provided metadata attached at `start`, immutable thereafter.
pub type CustomParams = HashMap<String, String>;

/// Per-call state owned by the session-loop task. Only `mode` is ever
/// touched from another task (the operator-takeover path), and that
/// touch goes through `CallHandle`'s atomic, not through this struct.
pub struct Call {
    pub call_uuid: String,
    pub stream_id: String,
    pub custom_params: CustomParams,
    pub recording_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub transcripts: Vec<TranscriptEntry>,
    pub last_shipped_index: usize,
    pub bot_buffer: String,
    pub current_turn: TurnId,
}

impl Call {
    pub fn new(
        call_uuid: String,
        stream_id: String,
        custom_params: CustomParams,
        recording_path: PathBuf,
    ) -> Self {
        Self {
            call_uuid,
            stream_id,
            custom_params,
            recording_path,
            started_at: Utc::now(),
            transcripts: Vec::new(),
            last_shipped_index: 0,
            bot_buffer: String::new(),
            current_turn: TurnId::initial(),
        }
    }

    /// Flush `bot_buffer` as a `bot` transcript entry if non-empty.
    /// No-op when the buffer is empty (§8 boundary behavior: an
    /// interruption with no bot speech active produces no entry).
    pub fn flush_bot_buffer(&mut self, suffix: Option<&str>) {
        if self.bot_buffer.is_empty() {
            return;
        }
        let mut text = std::mem::take(&mut self.bot_buffer);
        if let Some(suffix) = suffix {
            text.push_str(suffix);
        }
        self.transcripts.push(TranscriptEntry {
            speaker: Speaker::Bot,
            text,
        });
    }

    pub fn append_user(&mut self, text: String) {
        self.transcripts.push(TranscriptEntry {
            speaker: Speaker::User,
            text,
        });
    }

    pub fn append_bot_fragment(&mut self, fragment: &str) {
        if !self.bot_buffer.is_empty() {
            self.bot_buffer.push(' ');
        }
        self.bot_buffer.push_str(fragment);
    }

    /// Begin a new turn, invalidating any audio chunks tagged with the
    /// previous turn still in flight toward egress.
    pub fn advance_turn(&mut self) -> TurnId {
        self.current_turn = self.current_turn.next();
        self.current_turn
    }

    pub fn unshipped(&self) -> &[TranscriptEntry] {
        &self.transcripts[self.last_shipped_index..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_empty_buffer_is_a_no_op() {
        let mut call = Call::new("u".into(), "s".into(), CustomParams::new(), "x.wav".into());
        call.flush_bot_buffer(Some("[interrupted]"));
        assert!(call.transcripts.is_empty());
    }

    #[test]
    fn flush_appends_suffix_and_clears_buffer() {
        let mut call = Call::new("u".into(), "s".into(), CustomParams::new(), "x.wav".into());
        call.append_bot_fragment("I was about to");
        call.flush_bot_buffer(Some(" [interrupted]"));
        assert_eq!(call.transcripts.len(), 1);
        assert_eq!(call.transcripts[0].text, "I was about to [interrupted]");
        assert!(call.bot_buffer.is_empty());
    }

    #[test]
    fn turn_id_advances_monotonically() {
        let mut call = Call::new("u".into(), "s".into(), CustomParams::new(), "x.wav".into());
        let t0 = call.current_turn;
        let t1 = call.advance_turn();
        assert!(t1 > t0);
    }

    #[test]
    fn append_bot_fragment_joins_with_single_space() {
        let mut call = Call::new("u".into(), "s".into(), CustomParams::new(), "x.wav".into());
        call.append_bot_fragment("Hi");
        call.append_bot_fragment("there.");
        assert_eq!(call.bot_buffer, "Hi there.");
    }
}
