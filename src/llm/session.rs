//! C2 connection and wire shape.
//!
//! Grounded on `provider/openai_realtime.rs`'s connection pattern
//! (`IntoClientRequest` + bearer header, `connect_async`, `.split()`
//! into sink/stream, a session-configuration message sent first, then
//! a `read.next().await` loop deserializing tagged JSON frames) — see
//! SPEC_FULL.md §4.2.1. The wire shape itself (`setup`/`server_content`/
//! `tool_call`) is a bidirectional multimodal-model session; the six
//! processing rules that act on a decoded `ServerEvent` are spec-
//! original (§4.2) and live in `rules.rs`, not here.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::CallError;

use super::rules::{ServerEvent, ToolCallEvent};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// `GET {SYS_INST_ENDPOINT}` (§6.4). Non-200 is a fatal construction
/// error for the call (§7/§9.1 — this expansion follows the stricter
/// reading over the lenient draft in `original_source/ws-app.py`).
pub async fn fetch_system_instruction(
    http: &reqwest::Client,
    endpoint: &str,
) -> Result<String, CallError> {
    let resp = http
        .get(endpoint)
        .send()
        .await
        .map_err(|e| CallError::resource(format!("system-instruction fetch failed: {e}")))?;
    if !resp.status().is_success() {
        return Err(CallError::resource(format!(
            "system-instruction endpoint returned {}",
            resp.status()
        )));
    }
    resp.text()
        .await
        .map_err(|e| CallError::resource(format!("system-instruction body read failed: {e}")))
}

// ---- outbound wire shapes ----

#[derive(Serialize)]
struct SetupMessage {
    setup: SetupConfig,
}

#[derive(Serialize)]
struct SetupConfig {
    response_modalities: &'static [&'static str],
    system_instruction: SystemInstruction,
    speech_config: SpeechConfig,
    input_audio_transcription: serde_json::Map<String, Value>,
    output_audio_transcription: serde_json::Map<String, Value>,
    tools: Vec<Value>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<TextPart>,
}

#[derive(Serialize)]
struct TextPart {
    text: String,
}

#[derive(Serialize)]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize)]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Serialize)]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize)]
struct MediaChunk {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
struct ToolResponseMessage {
    tool_response: ToolResponseBody,
}

#[derive(Serialize)]
struct ToolResponseBody {
    function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

// ---- inbound wire shapes ----

#[derive(Deserialize, Default)]
struct WireEvent {
    #[serde(default)]
    server_content: Option<WireServerContent>,
    #[serde(default)]
    tool_call: Option<WireToolCall>,
}

#[derive(Deserialize, Default)]
struct WireServerContent {
    #[serde(default)]
    model_turn: Option<WireModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    input_transcription: Option<WireTranscription>,
    #[serde(default)]
    output_transcription: Option<WireTranscription>,
}

#[derive(Deserialize, Default)]
struct WireModelTurn {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize, Default)]
struct WirePart {
    #[serde(default)]
    inline_data: Option<WireInlineData>,
}

#[derive(Deserialize, Default)]
struct WireInlineData {
    #[serde(default)]
    data: String,
}

#[derive(Deserialize, Default)]
struct WireTranscription {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct WireToolCall {
    #[serde(default)]
    function_calls: Vec<WireFunctionCall>,
}

#[derive(Deserialize)]
struct WireFunctionCall {
    id: String,
    name: String,
    #[serde(default)]
    args: Value,
}

/// One live connection to the cloud multimodal LLM (§4.2). `C2` is the
/// sole writer to this socket (§4.2.1's "a dedicated outbound channel
/// is not required on the LLM leg"), so no mpsc indirection here,
/// unlike the telephony leg (§4.2.2).
pub struct LlmSession {
    write: WsSink,
    read: WsSource,
}

impl LlmSession {
    /// Connect and send the session-configuration message (§4.2.1).
    pub async fn connect(
        ws_url: &str,
        api_key: &str,
        system_instruction: &str,
        voice: &str,
        tool_declarations: Vec<Value>,
    ) -> Result<Self, CallError> {
        let mut request = ws_url
            .into_client_request()
            .map_err(|e| CallError::resource(format!("invalid LLM websocket url: {e}")))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {api_key}")
                .parse()
                .map_err(|e| CallError::resource(format!("invalid api key header: {e}")))?,
        );

        let (stream, _response) = connect_async(request)
            .await
            .map_err(CallError::LlmSession)?;
        let (mut write, read) = stream.split();

        let setup = SetupMessage {
            setup: SetupConfig {
                response_modalities: &["AUDIO"],
                system_instruction: SystemInstruction {
                    parts: vec![TextPart {
                        text: system_instruction.to_string(),
                    }],
                },
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
                input_audio_transcription: serde_json::Map::new(),
                output_audio_transcription: serde_json::Map::new(),
                tools: tool_declarations,
            },
        };
        let payload = serde_json::to_string(&setup)
            .map_err(|e| CallError::resource(format!("failed to serialize session setup: {e}")))?;
        write
            .send(Message::Text(payload.into()))
            .await
            .map_err(CallError::LlmSession)?;

        Ok(Self { write, read })
    }

    /// Send one chunk of PCM16/16kHz input audio (§4.2: "feed the
    /// PCM16/16 kHz sequence from C1").
    pub async fn send_audio(&mut self, pcm16: &[i16]) -> Result<(), CallError> {
        let bytes: Vec<u8> = pcm16.iter().flat_map(|s| s.to_le_bytes()).collect();
        let msg = RealtimeInputMessage {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: "audio/pcm;rate=16000",
                    data: BASE64.encode(bytes),
                }],
            },
        };
        let payload = serde_json::to_string(&msg)
            .map_err(|e| CallError::resource(format!("failed to serialize audio chunk: {e}")))?;
        self.write
            .send(Message::Text(payload.into()))
            .await
            .map_err(CallError::LlmSession)
    }

    /// Reply to one or more tool calls in a single batched message
    /// (§4.2 rule 2: "reply with the function responses in a single
    /// batched tool-response message").
    pub async fn send_tool_responses(
        &mut self,
        responses: Vec<FunctionResponse>,
    ) -> Result<(), CallError> {
        let msg = ToolResponseMessage {
            tool_response: ToolResponseBody {
                function_responses: responses,
            },
        };
        let payload = serde_json::to_string(&msg)
            .map_err(|e| CallError::resource(format!("failed to serialize tool response: {e}")))?;
        self.write
            .send(Message::Text(payload.into()))
            .await
            .map_err(CallError::LlmSession)
    }

    /// Receive and decode the next server message, if any. `None` means
    /// the connection closed (§4.2: "lazy sequence of server messages,
    /// finite, not restartable").
    pub async fn recv(&mut self) -> Option<Result<ServerEvent, CallError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(decode_event(&text));
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue, // ping/pong/binary frames carry no event
                Err(e) => return Some(Err(CallError::LlmSession(e))),
            }
        }
    }

    pub async fn close(&mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}

fn decode_event(text: &str) -> Result<ServerEvent, CallError> {
    let wire: WireEvent = serde_json::from_str(text)
        .map_err(|e| CallError::framing(format!("malformed LLM server message: {e}")))?;

    let mut event = ServerEvent::default();

    if let Some(content) = wire.server_content {
        event.interrupted = content.interrupted;
        event.turn_complete = content.turn_complete;

        if let Some(turn) = content.model_turn {
            let mut pcm = Vec::new();
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    if !inline.data.is_empty() {
                        let bytes = BASE64
                            .decode(inline.data.as_bytes())
                            .map_err(|e| CallError::framing(format!("bad audio base64: {e}")))?;
                        pcm.extend(
                            bytes
                                .chunks_exact(2)
                                .map(|c| i16::from_le_bytes([c[0], c[1]])),
                        );
                    }
                }
            }
            if !pcm.is_empty() {
                event.audio_pcm24k = Some(pcm);
            }
        }

        if let Some(t) = content.input_transcription {
            if !t.text.is_empty() {
                event.input_transcription = Some(t.text);
            }
        }
        if let Some(t) = content.output_transcription {
            if !t.text.is_empty() {
                event.output_transcription = Some(t.text);
            }
        }
    }

    if let Some(tool_call) = wire.tool_call {
        event.tool_calls = tool_call
            .function_calls
            .into_iter()
            .map(|f| ToolCallEvent {
                id: f.id,
                name: f.name,
                arguments: f.args,
            })
            .collect();
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_event_extracts_audio_and_turn_complete() {
        let raw = serde_json::json!({
            "server_content": {
                "model_turn": {
                    "parts": [{"inline_data": {"mime_type": "audio/pcm;rate=24000", "data": BASE64.encode([0u8,0,1,0])}}]
                },
                "turn_complete": true
            }
        })
        .to_string();
        let event = decode_event(&raw).unwrap();
        assert!(event.turn_complete);
        assert_eq!(event.audio_pcm24k, Some(vec![0, 1]));
    }

    #[test]
    fn decode_event_extracts_tool_calls() {
        let raw = serde_json::json!({
            "tool_call": {
                "function_calls": [{"id": "1", "name": "get_branch_details", "args": {}}]
            }
        })
        .to_string();
        let event = decode_event(&raw).unwrap();
        assert_eq!(event.tool_calls.len(), 1);
        assert_eq!(event.tool_calls[0].name, "get_branch_details");
    }

    #[test]
    fn decode_event_extracts_interruption_and_transcriptions() {
        let raw = serde_json::json!({
            "server_content": {
                "interrupted": true,
                "input_transcription": {"text": "stop"},
                "output_transcription": {"text": "Hi"}
            }
        })
        .to_string();
        let event = decode_event(&raw).unwrap();
        assert!(event.interrupted);
        assert_eq!(event.input_transcription, Some("stop".to_string()));
        assert_eq!(event.output_transcription, Some("Hi".to_string()));
    }

    #[test]
    fn decode_event_rejects_malformed_json() {
        assert!(decode_event("not json").is_err());
    }
}
