//! C5: Transcript Chunker & Log Shipper.
//!
//! Wire field names (`name`, `transcription`) are grounded on
//! `original_source/routes/call.py`'s receiver-side payload shape;
//! policy (threshold, contiguous shipping, at-most-once retry) is
//! grounded on spec §4.5 directly.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::call::{Call, CustomParams, Speaker, TranscriptEntry};

/// The wire shape of one transcript entry, as the log receiver expects
/// it — distinct from `TranscriptEntry` so the internal field names
/// (`speaker`/`text`) stay aligned with the data model's own vocabulary.
#[derive(Debug, Serialize)]
struct WireEntry {
    name: &'static str,
    transcription: String,
}

impl From<&TranscriptEntry> for WireEntry {
    fn from(entry: &TranscriptEntry) -> Self {
        WireEntry {
            name: match entry.speaker {
                Speaker::User => "user",
                Speaker::Bot => "bot",
                Speaker::System => "system",
            },
            transcription: entry.text.clone(),
        }
    }
}

pub struct LogShipper {
    http: reqwest::Client,
    log_endpoint: String,
    timeout: Duration,
}

impl LogShipper {
    pub fn new(http: reqwest::Client, log_endpoint: String, timeout: Duration) -> Self {
        Self {
            http,
            log_endpoint,
            timeout,
        }
    }

    /// `POST {LOG_ENDPOINT}/{call_uuid}` — call initialization (§6.3).
    pub async fn initialize(
        &self,
        call_uuid: &str,
        call_sid: &str,
        file_name: &str,
        started_at: DateTime<Utc>,
        custom_params: &CustomParams,
    ) {
        let url = format!("{}/{}", self.log_endpoint, call_uuid);
        let payload = json!({
            "call_uuid": call_uuid,
            "call_sid": call_sid,
            "file_name": file_name,
            "started_at": started_at.to_rfc3339(),
            "custom_params": custom_params,
        });

        if let Err(e) = self
            .http
            .post(&url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
        {
            tracing::warn!("call-init POST to {url} failed: {e}");
        }
    }

    /// Ship the unshipped transcript tail if it meets the threshold, or
    /// unconditionally if `force_final` is set (terminal phase, §4.5).
    /// Returns `true` iff `last_shipped_index` should advance (i.e. the
    /// receiver accepted the chunk with HTTP 200).
    pub async fn maybe_ship(&self, call: &mut Call, threshold: usize, force_final: bool) {
        let unshipped_len = call.unshipped().len();
        if !force_final && unshipped_len < threshold {
            return;
        }
        self.ship(call, force_final).await;
    }

    async fn ship(&self, call: &mut Call, is_final: bool) {
        let chunk_index = call.last_shipped_index;
        let entries: Vec<WireEntry> = call.unshipped().iter().map(WireEntry::from).collect();
        let url = format!("{}/{}/send_chunk", self.log_endpoint, call.call_uuid);
        let payload = json!({
            "call_uuid": call.call_uuid,
            "file_name": call.recording_path.to_string_lossy(),
            "transcription": entries,
            "is_final": is_final,
            "chunk_index": chunk_index,
        });

        let result = self
            .http
            .post(&url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                // Advance only after success, per §4.5's ordering guarantee:
                // never ahead of what the receiver actually acknowledged.
                call.last_shipped_index = call.transcripts.len();
            }
            Ok(resp) => {
                tracing::warn!(
                    "log chunk POST to {url} returned {}; will retry on next trigger",
                    resp.status()
                );
            }
            Err(e) => {
                tracing::warn!("log chunk POST to {url} failed: {e}; will retry on next trigger");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest_stub::*;

    // A minimal stand-in for a mock HTTP server: exercises the
    // chunking-policy logic (index bookkeeping) against a loopback
    // listener that always returns 200, since the pack carries no
    // dedicated HTTP-mocking crate.
    mod httptest_stub {
        use std::convert::Infallible;
        use std::net::SocketAddr;

        pub async fn spawn_always_200() -> SocketAddr {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            use tokio::net::TcpListener;

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                loop {
                    let Ok((mut stream, _)) = listener.accept().await else {
                        break;
                    };
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = stream.read(&mut buf).await;
                        let body = b"{}";
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let _: Result<(), Infallible> = async {
                            let _ = stream.write_all(response.as_bytes()).await;
                            let _ = stream.write_all(body).await;
                            Ok(())
                        }
                        .await;
                    });
                }
            });
            addr
        }
    }

    fn sample_call() -> Call {
        Call::new(
            "uuid-1".into(),
            "stream-1".into(),
            CustomParams::new(),
            "recordings/call_uuid-1.wav".into(),
        )
    }

    #[tokio::test]
    async fn threshold_gates_shipping_until_k_new_entries() {
        let addr = spawn_always_200().await;
        let shipper = LogShipper::new(
            reqwest::Client::new(),
            format!("http://{addr}"),
            Duration::from_secs(2),
        );
        let mut call = sample_call();

        call.append_user("a".into());
        call.append_user("b".into());
        shipper.maybe_ship(&mut call, 3, false).await;
        assert_eq!(call.last_shipped_index, 0, "below threshold, no ship");

        call.append_user("c".into());
        shipper.maybe_ship(&mut call, 3, false).await;
        assert_eq!(call.last_shipped_index, 3, "threshold met, advances to len");
    }

    #[tokio::test]
    async fn final_ship_happens_even_with_empty_unshipped_set() {
        let addr = spawn_always_200().await;
        let shipper = LogShipper::new(
            reqwest::Client::new(),
            format!("http://{addr}"),
            Duration::from_secs(2),
        );
        let mut call = sample_call();
        shipper.maybe_ship(&mut call, 5, true).await;
        assert_eq!(call.last_shipped_index, 0);
    }

    #[tokio::test]
    async fn failed_post_does_not_advance_index() {
        // Port 0 with no listener: connection refused.
        let shipper = LogShipper::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(200),
        );
        let mut call = sample_call();
        call.append_user("a".into());
        shipper.maybe_ship(&mut call, 1, false).await;
        assert_eq!(call.last_shipped_index, 0);
    }
}
