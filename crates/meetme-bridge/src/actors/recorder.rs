//! Recording sidecar - one task per recorded conference.
//!
//! The sidecar drains the room's announce stream into a file until the
//! conference requests termination (its cancellation token) or the stream
//! ends. It reports completion over a `watch` channel, so conference
//! teardown can wait for the file to be closed before the room is freed.

use crate::audio::{AudioFrame, SAMPLE_RATE};
use crate::mixer::AnnounceStream;
use crate::observability::metrics;
use bytes::{BufMut, BytesMut};
use common::types::ConferenceId;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter, SeekFrom};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Size of the RIFF/WAVE header written ahead of the samples.
const WAV_HEADER_LEN: u32 = 44;

/// Container written by the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingFormat {
    /// 16-bit PCM WAVE.
    #[default]
    Wav,
    /// Headerless signed linear.
    Sln,
}

impl RecordingFormat {
    /// Parse a format name; unknown names fall back to WAV.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "wav" => RecordingFormat::Wav,
            "sln" | "slin" | "raw" => RecordingFormat::Sln,
            other => {
                warn!(target: "bridge.recording", format = %other, "Unknown recording format, using wav");
                RecordingFormat::Wav
            }
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            RecordingFormat::Wav => "wav",
            RecordingFormat::Sln => "sln",
        }
    }
}

/// Where a conference is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingTarget {
    /// Path without extension.
    pub base: PathBuf,
    pub format: RecordingFormat,
}

impl RecordingTarget {
    /// Default target: `meetme-conf-rec-<room>-<unique id>` in `dir`.
    #[must_use]
    pub fn default_for(
        dir: &Path,
        conference_id: &ConferenceId,
        unique_id: &str,
        format: RecordingFormat,
    ) -> Self {
        Self {
            base: dir.join(format!("meetme-conf-rec-{conference_id}-{unique_id}")),
            format,
        }
    }

    /// Full file path including the extension.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        let mut name = self.base.clone().into_os_string();
        name.push(".");
        name.push(self.format.extension());
        PathBuf::from(name)
    }
}

/// Recording state of a conference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Off,
    Active,
    TerminateRequested,
}

/// Handle to a running sidecar, owned by its conference.
#[derive(Debug)]
pub struct RecordingHandle {
    file: String,
    cancel: CancellationToken,
    running: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl RecordingHandle {
    /// Start recording `stream` into `target`.
    pub fn spawn(
        conference_id: ConferenceId,
        stream: Box<dyn AnnounceStream>,
        target: &RecordingTarget,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (status, running) = watch::channel(true);
        let path = target.path();
        let file = path.display().to_string();

        let task = tokio::spawn(run(
            conference_id,
            stream,
            path,
            target.format,
            cancel.clone(),
            status,
        ));

        Self {
            file,
            cancel,
            running,
            task,
        }
    }

    /// Destination file.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    #[must_use]
    pub fn state(&self) -> RecordingState {
        if !*self.running.borrow() {
            RecordingState::Off
        } else if self.cancel.is_cancelled() {
            RecordingState::TerminateRequested
        } else {
            RecordingState::Active
        }
    }

    /// Request termination and wait until the file is closed.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if self.running.wait_for(|running| !*running).await.is_err() {
            // Sender dropped without reporting: the task ended abnormally
            warn!(target: "bridge.recording", file = %self.file, "Recording task ended without reporting");
        }
        if let Err(e) = self.task.await {
            error!(target: "bridge.recording", file = %self.file, error = %e, "Recording task failed");
        }
    }
}

#[instrument(skip_all, name = "bridge.recording", fields(conference_id = %conference_id, file = %path.display()))]
async fn run(
    conference_id: ConferenceId,
    mut stream: Box<dyn AnnounceStream>,
    path: PathBuf,
    format: RecordingFormat,
    cancel: CancellationToken,
    status: watch::Sender<bool>,
) {
    metrics::recording_started();
    info!(target: "bridge.recording", "Recording started");

    match record(stream.as_mut(), &path, format, &cancel).await {
        Ok(samples) => info!(
            target: "bridge.recording",
            samples,
            terminated = cancel.is_cancelled(),
            "Recording finished"
        ),
        Err(e) => error!(target: "bridge.recording", error = %e, "Recording failed"),
    }

    metrics::recording_stopped();
    status.send_replace(false);
}

async fn record(
    stream: &mut dyn AnnounceStream,
    path: &Path,
    format: RecordingFormat,
    cancel: &CancellationToken,
) -> std::io::Result<u64> {
    let file = File::create(path).await?;
    let mut writer = RecordingWriter::new(file, format).await?;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(target: "bridge.recording", "Terminate requested");
                break;
            }

            frame = stream.next_frame() => match frame {
                Some(frame) => writer.write_frame(&frame).await?,
                None => {
                    debug!(target: "bridge.recording", "Announce stream ended");
                    break;
                }
            }
        }
    }

    writer.finish().await
}

/// Sample writer with an optional WAVE header patched on close.
struct RecordingWriter {
    out: BufWriter<File>,
    format: RecordingFormat,
    data_len: u32,
}

impl RecordingWriter {
    async fn new(file: File, format: RecordingFormat) -> std::io::Result<Self> {
        let mut out = BufWriter::new(file);
        if format == RecordingFormat::Wav {
            out.write_all(&wav_header(0)).await?;
        }
        Ok(Self {
            out,
            format,
            data_len: 0,
        })
    }

    async fn write_frame(&mut self, frame: &AudioFrame) -> std::io::Result<()> {
        let bytes = frame.as_bytes();
        self.out.write_all(bytes).await?;
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.data_len = self.data_len.saturating_add(len);
        Ok(())
    }

    /// Flush, fix up the header and return the number of samples written.
    async fn finish(mut self) -> std::io::Result<u64> {
        if self.format == RecordingFormat::Wav {
            self.out.flush().await?;
            self.out.seek(SeekFrom::Start(0)).await?;
            self.out.write_all(&wav_header(self.data_len)).await?;
        }
        self.out.flush().await?;
        self.out.get_mut().sync_all().await?;
        Ok(u64::from(self.data_len / 2))
    }
}

/// Mono 16-bit PCM header for `data_len` bytes of samples.
fn wav_header(data_len: u32) -> BytesMut {
    let mut header = BytesMut::with_capacity(WAV_HEADER_LEN as usize);
    header.put_slice(b"RIFF");
    header.put_u32_le(data_len.saturating_add(WAV_HEADER_LEN - 8));
    header.put_slice(b"WAVE");
    header.put_slice(b"fmt ");
    header.put_u32_le(16);
    header.put_u16_le(1); // PCM
    header.put_u16_le(1); // mono
    header.put_u32_le(SAMPLE_RATE);
    header.put_u32_le(SAMPLE_RATE * 2);
    header.put_u16_le(2);
    header.put_u16_le(16);
    header.put_slice(b"data");
    header.put_u32_le(data_len);
    header
}
