//! C4: the single-writer WAV recorder.
//!
//! Grounded on `voice/audio.rs`'s `save_wav`/`load_wav` use of
//! `hound::WavSpec`, and on the teacher's sender-task/mpsc pattern
//! (`server/realtime_voice.rs`) adapted here from an outbound-message
//! queue to an inbound-audio-chunk queue: customer, LLM, and operator
//! producers all send already-16kHz PCM16 chunks into one channel; only
//! the recorder task touches the `hound::WavWriter`.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use tokio::sync::mpsc;
use tracing::{error, info};

fn spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Spawns the recorder task and returns a sender for PCM16/16kHz
/// chunks. The returned join handle resolves once the channel is
/// closed and the WAV file has been finalized exactly once.
pub fn spawn_recorder(
    path: impl AsRef<Path>,
) -> anyhow::Result<(mpsc::Sender<Vec<i16>>, tokio::task::JoinHandle<()>)> {
    let path = path.as_ref().to_path_buf();
    let mut writer = WavWriter::create(&path, spec())
        .map_err(|e| anyhow::anyhow!("failed to open recording file {path:?}: {e}"))?;

    let (tx, mut rx) = mpsc::channel::<Vec<i16>>(256);

    let handle = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            for sample in chunk {
                if let Err(e) = writer.write_sample(sample) {
                    error!("recorder write failed for {path:?}: {e}");
                    return;
                }
            }
        }
        match writer.finalize() {
            Ok(()) => info!("recording finalized: {path:?}"),
            Err(e) => error!("recording finalize failed for {path:?}: {e}"),
        }
    });

    Ok((tx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorder_opens_writes_and_closes_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("call_test.wav");

        let (tx, handle) = spawn_recorder(&path).unwrap();
        tx.send(vec![0, 1000, -1000, 0]).await.unwrap();
        tx.send(vec![500, -500]).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 6);
    }

    #[tokio::test]
    async fn recorder_on_nonexistent_directory_fails_at_construction() {
        let result = spawn_recorder("/nonexistent-dir-xyz/call.wav");
        assert!(result.is_err());
    }
}
