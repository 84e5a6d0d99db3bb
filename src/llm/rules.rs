//! The six ordered per-message processing rules of C2 (§4.2), as a
//! pure function over `Call` state. Kept separate from the networking
//! in `session.rs` so the rules can be exercised deterministically
//! against synthetic `ServerEvent`s (§8.1) without a live LLM
//! connection.

use serde_json::Value;

use crate::call::Call;

/// One function call surfaced by the LLM on a server message.
#[derive(Debug, Clone)]
pub struct ToolCallEvent {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A decoded server message. Any subset of these fields may be present
/// at once — the six rules below each act on whichever fields are set.
#[derive(Debug, Clone, Default)]
pub struct ServerEvent {
    pub interrupted: bool,
    /// Raw PCM16/24kHz audio samples, if this message carries audio out.
    pub audio_pcm24k: Option<Vec<i16>>,
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub turn_complete: bool,
    pub tool_calls: Vec<ToolCallEvent>,
}

/// What the session-loop glue must do in response to one server
/// message, after `apply_rules` has mutated `call` in place.
#[derive(Debug, Default)]
pub struct RuleOutcome {
    pub emit_clear: bool,
    pub audio_pcm24k: Option<Vec<i16>>,
    pub forward_to_egress: bool,
    pub tool_calls: Vec<ToolCallEvent>,
    pub begin_transfer: Option<String>,
    pub ship_trigger: bool,
}

/// Apply the six ordered rules from §4.2 to one server message.
/// `mode_is_ai` is read once from the call's atomic mode flag (§5);
/// rules never mutate it — only C7 does.
pub fn apply_rules(call: &mut Call, event: ServerEvent, mode_is_ai: bool) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();

    // Rule 1: interruption, checked first so the remaining rules on
    // this same message are suppressed/adjusted correctly.
    let mut interrupted_this_message = false;
    if event.interrupted {
        interrupted_this_message = true;
        outcome.emit_clear = true;
        call.flush_bot_buffer(Some(" [interrupted]"));
        call.advance_turn();
    }

    // Rule 2: tool calls. `transfer_to_human_operator` begins the
    // terminal phase immediately and is not forwarded to the generic
    // dispatcher; any other call is queued for a single batched reply.
    for tool_call in event.tool_calls {
        if tool_call.name == "transfer_to_human_operator" {
            let reason = tool_call
                .arguments
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            outcome.begin_transfer = Some(reason);
            break;
        }
        outcome.tool_calls.push(tool_call);
    }

    // Rule 3: audio out. Always recorded; forwarded to egress only if
    // the call is AI-driven and this message was not an interruption.
    if let Some(pcm) = event.audio_pcm24k {
        outcome.forward_to_egress = mode_is_ai && !interrupted_this_message;
        outcome.audio_pcm24k = Some(pcm);
    }

    // Rule 4: input transcription — flush any pending bot speech first
    // so a `user` entry never interleaves inside an open bot buffer
    // (invariant 4), then append the user entry.
    if let Some(text) = event.input_transcription {
        call.flush_bot_buffer(None);
        call.append_user(text);
        outcome.ship_trigger = true;
    }

    // Rule 5: output transcription — accumulate into the bot buffer.
    if let Some(fragment) = event.output_transcription {
        call.append_bot_fragment(&fragment);
    }

    // Rule 6: model-turn boundary.
    if event.turn_complete {
        call.flush_bot_buffer(None);
        outcome.ship_trigger = true;
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CustomParams, Speaker};

    fn call() -> Call {
        Call::new(
            "u".into(),
            "s".into(),
            CustomParams::new(),
            "call_u.wav".into(),
        )
    }

    fn tool_call(name: &str) -> ToolCallEvent {
        ToolCallEvent {
            id: "1".into(),
            name: name.into(),
            arguments: serde_json::json!({}),
        }
    }

    /// Scenario 1 (§8): happy path, one turn.
    #[test]
    fn happy_path_one_turn() {
        let mut c = call();
        apply_rules(
            &mut c,
            ServerEvent {
                input_transcription: Some("hello".into()),
                ..Default::default()
            },
            true,
        );
        apply_rules(
            &mut c,
            ServerEvent {
                output_transcription: Some("Hi".into()),
                ..Default::default()
            },
            true,
        );
        apply_rules(
            &mut c,
            ServerEvent {
                output_transcription: Some(" there.".into()),
                audio_pcm24k: Some(vec![0; 480]),
                turn_complete: true,
                ..Default::default()
            },
            true,
        );

        assert_eq!(c.transcripts.len(), 2);
        assert_eq!(c.transcripts[0].speaker, Speaker::User);
        assert_eq!(c.transcripts[0].text, "hello");
        assert_eq!(c.transcripts[1].speaker, Speaker::Bot);
        assert_eq!(c.transcripts[1].text, "Hi there.");
    }

    /// Scenario 2 (§8): barge-in.
    #[test]
    fn barge_in_flushes_interrupted_suffix_and_suppresses_egress() {
        let mut c = call();
        apply_rules(
            &mut c,
            ServerEvent {
                output_transcription: Some("I was about to".into()),
                ..Default::default()
            },
            true,
        );

        let outcome = apply_rules(
            &mut c,
            ServerEvent {
                interrupted: true,
                audio_pcm24k: Some(vec![1, 2, 3]),
                ..Default::default()
            },
            true,
        );
        assert!(outcome.emit_clear);
        assert!(!outcome.forward_to_egress, "interrupted audio must not reach egress");
        assert!(outcome.audio_pcm24k.is_some(), "still recorded");

        let outcome2 = apply_rules(
            &mut c,
            ServerEvent {
                input_transcription: Some("stop".into()),
                ..Default::default()
            },
            true,
        );
        assert!(outcome2.ship_trigger);

        assert_eq!(c.transcripts.len(), 2);
        assert_eq!(c.transcripts[0].text, "I was about to [interrupted]");
        assert_eq!(c.transcripts[1].speaker, Speaker::User);
        assert_eq!(c.transcripts[1].text, "stop");
    }

    /// Boundary behavior (§8): interruption with no bot speech active.
    #[test]
    fn interruption_with_no_pending_speech_is_a_no_op_on_transcripts() {
        let mut c = call();
        let outcome = apply_rules(
            &mut c,
            ServerEvent {
                interrupted: true,
                ..Default::default()
            },
            true,
        );
        assert!(outcome.emit_clear);
        assert!(c.transcripts.is_empty());
    }

    /// Scenario 3 (§8): tool call is queued, not executed by the rules.
    #[test]
    fn non_transfer_tool_call_is_queued_for_dispatch() {
        let mut c = call();
        let outcome = apply_rules(
            &mut c,
            ServerEvent {
                tool_calls: vec![tool_call("get_branch_details")],
                ..Default::default()
            },
            true,
        );
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.begin_transfer.is_none());
    }

    /// Scenario 5 (§8): transfer_to_human_operator begins the terminal phase.
    #[test]
    fn transfer_tool_call_begins_transfer_and_is_not_dispatched() {
        let mut c = call();
        let mut call_event = tool_call("transfer_to_human_operator");
        call_event.arguments = serde_json::json!({ "reason": "wants a human" });
        let outcome = apply_rules(
            &mut c,
            ServerEvent {
                tool_calls: vec![call_event],
                ..Default::default()
            },
            true,
        );
        assert_eq!(outcome.begin_transfer, Some("wants a human".to_string()));
        assert!(outcome.tool_calls.is_empty());
    }

    #[test]
    fn audio_dropped_from_egress_when_operator_mode() {
        let mut c = call();
        let outcome = apply_rules(
            &mut c,
            ServerEvent {
                audio_pcm24k: Some(vec![1, 2, 3]),
                ..Default::default()
            },
            false,
        );
        assert!(!outcome.forward_to_egress);
        assert!(outcome.audio_pcm24k.is_some(), "still recorded during takeover");
    }
}
