//! axum WS handler for the operator leg (C7's human-facing half, §6.2).
//!
//! Grounded on `server/device.rs`'s device-WS handler scaffolding
//! (`device_ws_handler`/`handle_device_socket`): accept the upgrade,
//! loop on `Message::Text` control frames, look up state in a shared
//! registry — adapted here from device-capability negotiation to
//! `list_calls`/`join_call`/`admin_audio`/`end_takeover`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::call::CallMode;

use super::telephony::OutboundFrame;
use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ControlMessage {
    ListCalls,
    JoinCall { call_uuid: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MediaMessage {
    AdminAudio { audio: String },
    EndTakeover,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OperatorInbound {
    Control(ControlMessage),
    Media(MediaMessage),
}

#[derive(Debug, Serialize)]
struct ActiveCallSummary {
    call_uuid: String,
    custom_params: crate::call::CustomParams,
    mode: &'static str,
}

pub async fn operator_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_operator_socket(socket, state))
}

async fn handle_operator_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut joined: Option<(String, Arc<crate::call::CallHandle>)> = None;
    let (customer_audio_tx, mut customer_audio_rx) = mpsc::channel::<Vec<u8>>(64);

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                let Some(Ok(Message::Text(text))) = inbound else {
                    info!("operator websocket closed");
                    break;
                };

                match serde_json::from_str::<OperatorInbound>(&text) {
                    Ok(OperatorInbound::Control(ControlMessage::ListCalls)) => {
                        let calls: Vec<ActiveCallSummary> = state
                            .registry
                            .list()
                            .await
                            .into_iter()
                            .map(|c| ActiveCallSummary {
                                call_uuid: c.call_uuid,
                                custom_params: c.custom_params,
                                mode: match c.mode {
                                    CallMode::Ai => "AI",
                                    CallMode::Operator => "OPERATOR",
                                },
                            })
                            .collect();
                        let reply = serde_json::json!({ "type": "active_calls", "calls": calls });
                        if ws_tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(OperatorInbound::Control(ControlMessage::JoinCall { call_uuid })) => {
                        match state
                            .registry
                            .request_takeover(&call_uuid, customer_audio_tx.clone())
                            .await
                        {
                            Ok(handle) => {
                                let reply = serde_json::json!({
                                    "type": "takeover_success",
                                    "call_uuid": call_uuid,
                                    "customer_info": handle.custom_params,
                                });
                                joined = Some((call_uuid, handle));
                                if ws_tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => {
                                // §8 boundary behavior: unknown call_uuid → {type: "error"}, no state change.
                                let reply = serde_json::json!({
                                    "type": "error",
                                    "message": "unknown call_uuid",
                                });
                                if ws_tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(OperatorInbound::Media(MediaMessage::AdminAudio { audio })) => {
                        let Some((_, handle)) = joined.as_ref() else { continue };
                        let Ok(bytes) = BASE64.decode(audio.as_bytes()) else { continue };
                        let pcm16k: Vec<i16> = bytes
                            .chunks_exact(2)
                            .map(|c| i16::from_le_bytes([c[0], c[1]]))
                            .collect();
                        let _ = handle.recorder_tx.send(pcm16k.clone()).await;
                        let pcm8k = downsample_16k_to_8k(&pcm16k);
                        let ulaw_bytes = crate::audio::ulaw::encode_buffer(&pcm8k);
                        let _ = handle
                            .egress_tx
                            .send(OutboundFrame::Media { payload: ulaw_bytes })
                            .await;
                    }
                    Ok(OperatorInbound::Media(MediaMessage::EndTakeover)) => {
                        if let Some((call_uuid, _)) = joined.take() {
                            let _ = state.registry.end_takeover(&call_uuid).await;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("unrecognized operator message: {e}");
                    }
                }
            }

            // Customer audio arrives here while this operator is attached
            // to a call (§4.7: "customer audio flows to operator").
            Some(customer_audio) = customer_audio_rx.recv() => {
                let reply = serde_json::json!({
                    "type": "customer_audio",
                    "audio": BASE64.encode(&customer_audio),
                });
                if ws_tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // §7 operator-channel failure: revert mode to AI so LLM output
    // resumes immediately if the operator disconnects mid-takeover.
    if let Some((call_uuid, _)) = joined {
        let _ = state.registry.end_takeover(&call_uuid).await;
    }
}

/// One-off 16kHz→8kHz resample for operator media frames, independent
/// of any per-call resampler state (operator audio is not part of the
/// continuous ingress/egress stream C1/C3 own).
fn downsample_16k_to_8k(pcm16k: &[i16]) -> Vec<i16> {
    let mut resampler = crate::audio::StatefulResampler::new(16_000, 8_000);
    resampler.process(pcm16k)
}
