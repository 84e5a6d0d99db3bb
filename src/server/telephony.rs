//! axum WS handler for the customer leg: C1 ingress + C3 egress, wired
//! to C2 (LLM session), C4 (recorder), C5 (transcript shipper), and C6
//! (tool dispatcher) for the lifetime of one call.
//!
//! Grounded on `server/voice_ws.rs::handle_voice_socket` (message-loop
//! shape: `while let Some(Ok(msg)) = receiver.next().await` matching on
//! `Message::Text`/`Message::Close`) and
//! `server/realtime_voice.rs::handle_voice_session` (the
//! `sender_task`/`OutboundMessage` mpsc pattern, here adapted from an
//! outbound-message queue to an outbound-telephony-frame queue so C2,
//! C3, and the operator-takeover path can all write through one
//! channel without sharing the raw WS sink — SPEC_FULL.md §4.2.2).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::audio::{ulaw, StatefulResampler};
use crate::call::{Call, CallHandle, CustomParams};
use crate::error::CallError;
use crate::llm::{self, LlmSession};
use crate::tools::ToolContext;

use super::AppState;

/// Maximum consecutive malformed frames before the call is terminated
/// (§4.1's "three consecutive malformed frames are treated as fatal").
const MAX_CONSECUTIVE_MALFORMED: u8 = 3;

/// A frame destined for the customer telephony WebSocket. C2 (audio
/// out), C3 (the same audio, post-encode), and the operator-takeover
/// path all write into this channel rather than sharing the raw sink
/// (§4.2.2, §5's single-writer discipline).
#[derive(Debug)]
pub enum OutboundFrame {
    Media { payload: Vec<u8> },
    Clear,
    Mark { name: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum IngressFrame {
    Start { start: StartPayload },
    Media { media: MediaPayload },
    Stop,
    Mark { mark: MarkPayload },
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: String,
    #[serde(rename = "callSid")]
    call_sid: String,
    #[serde(rename = "customParameters", default)]
    custom_parameters: CustomParams,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct MarkPayload {
    #[allow(dead_code)]
    name: String,
}

/// A close frame carrying the failing resource's identity (§7.1:
/// construction-time resource failures close the telephony WS "with a
/// diagnostic"), rather than a bare close with no payload. 1011 is the
/// WS close code for "unexpected condition prevented the server from
/// fulfilling the request".
fn close_with_diagnostic(e: &CallError) -> Message {
    Message::Close(Some(CloseFrame {
        code: 1011,
        reason: e.to_string().into(),
    }))
}

pub async fn telephony_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(|socket| handle_telephony_socket(socket, state))
}

async fn handle_telephony_socket(socket: WebSocket, state: AppState) {
    let (ws_tx, mut ws_rx) = socket.split();

    // §8 boundary behavior: first frame is not `start` → terminate
    // gracefully without creating a registry entry.
    let first = match ws_rx.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            info!("telephony socket closed before a start frame arrived");
            return;
        }
    };
    let start = match serde_json::from_str::<IngressFrame>(&first) {
        Ok(IngressFrame::Start { start }) => start,
        _ => {
            warn!("first telephony frame was not `start`; closing without registering a call");
            return;
        }
    };

    let call_uuid = uuid::Uuid::new_v4().to_string();
    let recording_path = state.config.recordings_dir.join(format!("call_{call_uuid}.wav"));

    if let Err(e) = run_call(
        &state,
        call_uuid,
        start,
        recording_path,
        ws_tx,
        ws_rx,
    )
    .await
    {
        warn!("call construction failed: {e}");
    }
}

#[instrument(skip(state, ws_tx, ws_rx, start, recording_path), fields(call_uuid = %call_uuid))]
async fn run_call(
    state: &AppState,
    call_uuid: String,
    start: StartPayload,
    recording_path: PathBuf,
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
) -> anyhow::Result<()> {
    // §7 resource failures (recording file, system instruction) are
    // fatal at construction, before a registry entry exists.
    let (recorder_tx, recorder_handle) = crate::audio::wav::spawn_recorder(&recording_path)
        .map_err(|e| anyhow::anyhow!("cannot open recording file: {e}"))?;

    let system_instruction =
        match llm::fetch_system_instruction(&state.http, &state.config.sys_inst_endpoint).await {
            Ok(text) => text,
            Err(e) => {
                warn!("system instruction fetch failed, closing telephony socket: {e}");
                let _ = ws_tx.send(close_with_diagnostic(&e)).await;
                drop(recorder_tx);
                let _ = recorder_handle.await;
                return Err(anyhow::anyhow!(e));
            }
        };

    let mut llm_session = match LlmSession::connect(
        &state.config.llm_ws_url(),
        &state.config.gemini_key,
        &system_instruction,
        &state.config.voice_name,
        state.tool_table.declarations(),
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!("llm session construction failed, closing telephony socket: {e}");
            let _ = ws_tx.send(close_with_diagnostic(&e)).await;
            drop(recorder_tx);
            let _ = recorder_handle.await;
            return Err(anyhow::anyhow!(e));
        }
    };

    let (egress_tx, mut egress_rx) = mpsc::channel::<OutboundFrame>(256);
    let stream_sid = start.stream_sid.clone();
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = egress_rx.recv().await {
            let json = match frame {
                OutboundFrame::Media { payload } => serde_json::json!({
                    "event": "media",
                    "streamSid": stream_sid,
                    "media": { "payload": BASE64.encode(payload) },
                }),
                OutboundFrame::Clear => serde_json::json!({
                    "event": "clear",
                    "streamSid": stream_sid,
                }),
                OutboundFrame::Mark { name } => serde_json::json!({
                    "event": "mark",
                    "streamSid": stream_sid,
                    "mark": { "name": name },
                }),
            };
            if ws_tx
                .send(Message::Text(json.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let handle = Arc::new(CallHandle::new(
        call_uuid.clone(),
        start.custom_parameters.clone(),
        egress_tx.clone(),
        recorder_tx.clone(),
    ));
    state.registry.register(handle.clone()).await;

    let shipper = crate::transcript::LogShipper::new(
        state.http.clone(),
        state.config.log_endpoint.clone(),
        Duration::from_secs(state.config.log_post_timeout_secs),
    );
    shipper
        .initialize(
            &call_uuid,
            &start.call_sid,
            &recording_path.to_string_lossy(),
            chrono::Utc::now(),
            &start.custom_parameters,
        )
        .await;

    let mut call = Call::new(
        call_uuid.clone(),
        start.stream_sid.clone(),
        start.custom_parameters,
        recording_path,
    );

    let tool_ctx = Arc::new(ToolContext {
        http: state.http.clone(),
        aldar_base_api_url: state.config.aldar_base_api_url.clone(),
        tool_timeout: Duration::from_secs(state.config.tool_timeout_secs),
    });

    let result = session_loop(
        &state,
        &mut call,
        &handle,
        &mut llm_session,
        &mut ws_rx,
        &egress_tx,
        &recorder_tx,
        &shipper,
        &tool_ctx,
    )
    .await;

    if let Err(e) = &result {
        warn!("session loop ended with error: {e}");
    }

    // Terminal phase (§7): idempotent — close recorder if open, ship
    // final chunk, remove from registry. `drop`/final-await are no-ops
    // if already gone.
    llm_session.close().await;
    shipper.maybe_ship(&mut call, state.config.log_chunk_size, true).await;
    state.registry.unregister(&call_uuid).await;
    drop(recorder_tx);
    let _ = recorder_handle.await;
    sender_task.abort();

    result
}

#[allow(clippy::too_many_arguments)]
async fn session_loop(
    state: &AppState,
    call: &mut Call,
    handle: &Arc<CallHandle>,
    llm_session: &mut LlmSession,
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
    egress_tx: &mpsc::Sender<OutboundFrame>,
    recorder_tx: &mpsc::Sender<Vec<i16>>,
    shipper: &crate::transcript::LogShipper,
    tool_ctx: &Arc<ToolContext>,
) -> anyhow::Result<()> {
    let mut ingress_resampler = StatefulResampler::new(8_000, 16_000);
    let mut egress_resampler = StatefulResampler::new(24_000, 8_000);
    let mut recorder_resampler = StatefulResampler::new(24_000, 16_000);
    let mut consecutive_malformed: u8 = 0;
    let mut transferred = false;

    loop {
        tokio::select! {
            ingress = ws_rx.next() => {
                match ingress {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<IngressFrame>(&text) {
                            Ok(IngressFrame::Media { media }) => {
                                consecutive_malformed = 0;
                                if let Err(e) = handle_media_frame(
                                    &media, call, handle, llm_session,
                                    &mut ingress_resampler, recorder_tx, transferred,
                                ).await {
                                    warn!("media frame handling failed: {e}");
                                }
                            }
                            Ok(IngressFrame::Stop) => {
                                info!("telephony stop frame received");
                                break;
                            }
                            Ok(IngressFrame::Mark { .. }) => {
                                // echo of our own egress marks; ignored (§4.1).
                            }
                            Ok(IngressFrame::Start { .. }) => {
                                // a second start on an active stream is malformed in context
                                consecutive_malformed += 1;
                            }
                            Err(e) => {
                                warn!("malformed telephony frame skipped: {e}");
                                consecutive_malformed += 1;
                            }
                        }
                        if consecutive_malformed >= MAX_CONSECUTIVE_MALFORMED {
                            return Err(anyhow::anyhow!("three consecutive malformed frames"));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("telephony websocket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        return Err(anyhow::anyhow!("telephony websocket error: {e}"));
                    }
                    _ => {}
                }
            }

            server_event = llm_session.recv(), if !transferred => {
                match server_event {
                    Some(Ok(event)) => {
                        let mode_is_ai = handle.mode() == crate::call::CallMode::Ai;
                        let outcome = llm::apply_rules(call, event, mode_is_ai);

                        if outcome.emit_clear {
                            let _ = egress_tx.send(OutboundFrame::Clear).await;
                        }

                        if let Some(pcm24k) = outcome.audio_pcm24k {
                            let for_recorder = recorder_resampler.process(&pcm24k);
                            let _ = recorder_tx.send(for_recorder).await;
                            if outcome.forward_to_egress {
                                let pcm8k = egress_resampler.process(&pcm24k);
                                let ulaw_bytes = ulaw::encode_buffer(&pcm8k);
                                let _ = egress_tx.send(OutboundFrame::Media { payload: ulaw_bytes }).await;
                            }
                        }

                        if !outcome.tool_calls.is_empty() {
                            let mut responses = Vec::with_capacity(outcome.tool_calls.len());
                            for call_event in outcome.tool_calls {
                                let response = state
                                    .tool_table
                                    .dispatch(&call_event.name, call_event.arguments, tool_ctx.clone())
                                    .await;
                                responses.push(crate::llm::session::FunctionResponse {
                                    id: call_event.id,
                                    name: call_event.name,
                                    response,
                                });
                            }
                            if let Err(e) = llm_session.send_tool_responses(responses).await {
                                warn!("failed to send tool responses: {e}");
                            }
                        }

                        if outcome.ship_trigger {
                            shipper.maybe_ship(call, state.config.log_chunk_size, false).await;
                        }

                        if let Some(reason) = outcome.begin_transfer {
                            info!("transfer_to_human_operator requested: {reason}");
                            // §4.2 rule 2: begin the terminal phase of the
                            // *session*, not the call — close the LLM leg now,
                            // leave the telephony WS open for an operator to
                            // join, and stop reading further LLM events.
                            llm_session.close().await;
                            transferred = true;
                        }
                    }
                    Some(Err(e)) => {
                        return Err(anyhow::anyhow!("llm session failure: {e}"));
                    }
                    None => {
                        return Err(anyhow::anyhow!("llm session closed"));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Decode, resample, and fan out one customer `media` frame: the
/// recorder always gets it; an attached operator gets it whenever
/// `mode = OPERATOR` (§4.7: customer audio flows to the operator
/// throughout a takeover, independent of how the takeover began); the
/// LLM session keeps receiving it as long as the LLM leg is still open
/// (`!transferred`) so transcription keeps working during a takeover
/// (§4.7: "The LLM session loop continues to receive input") — these
/// two are concurrent, not mutually exclusive branches.
async fn handle_media_frame(
    media: &MediaPayload,
    call: &Call,
    handle: &Arc<CallHandle>,
    llm_session: &mut LlmSession,
    ingress_resampler: &mut StatefulResampler,
    recorder_tx: &mpsc::Sender<Vec<i16>>,
    transferred: bool,
) -> anyhow::Result<()> {
    let ulaw_bytes = BASE64
        .decode(media.payload.as_bytes())
        .map_err(|e| anyhow::anyhow!("bad base64 media payload: {e}"))?;
    let pcm8k = ulaw::decode_buffer(&ulaw_bytes);
    let pcm16k = ingress_resampler.process(&pcm8k);

    let _ = recorder_tx.send(pcm16k.clone()).await;

    if handle.mode() == crate::call::CallMode::Operator {
        let bytes: Vec<u8> = pcm16k.iter().flat_map(|s| s.to_le_bytes()).collect();
        handle.forward_to_operator(bytes).await;
    }

    if !transferred {
        llm_session.send_audio(&pcm16k).await?;
    }
    let _ = call; // call state mutated only by the session loop, not here

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_frame_parses_start() {
        let json = r#"{"event":"start","start":{"streamSid":"s1","callSid":"c1","customParameters":{"from":"+1555"}}}"#;
        let frame: IngressFrame = serde_json::from_str(json).unwrap();
        match frame {
            IngressFrame::Start { start } => {
                assert_eq!(start.stream_sid, "s1");
                assert_eq!(start.custom_parameters.get("from").unwrap(), "+1555");
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn ingress_frame_parses_media() {
        let json = r#"{"event":"media","media":{"payload":"AAAA"}}"#;
        let frame: IngressFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, IngressFrame::Media { .. }));
    }

    #[test]
    fn ingress_frame_parses_stop_and_mark() {
        assert!(matches!(
            serde_json::from_str::<IngressFrame>(r#"{"event":"stop"}"#).unwrap(),
            IngressFrame::Stop
        ));
        assert!(matches!(
            serde_json::from_str::<IngressFrame>(r#"{"event":"mark","mark":{"name":"m1"}}"#).unwrap(),
            IngressFrame::Mark { .. }
        ));
    }
}
