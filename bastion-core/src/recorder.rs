//! Asciicast v2 terminal replay writer (spec.md §4.7). Grounded in this
//! codebase's `recordings/writer.rs` channel-fed async-writer task idiom;
//! the wire format itself (asciicast v2 JSON lines) is written fresh since
//! nothing in this codebase's lineage produces that format.

use std::io::Write;
use std::path::{Path, PathBuf};

use bastion_common::model::ReplayHeader;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};
use uuid::Uuid;

enum Message {
    Chunk(Bytes),
    End(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct Recorder {
    tx: Option<mpsc::Sender<Message>>,
}

impl Recorder {
    /// A no-op recorder, used when `DisableRecorder` is set (spec.md §4.7):
    /// replay must never break a live session, so the off switch is a
    /// stub rather than a conditional sprinkled through the Bridge.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn start(
        replay_root: &Path,
        username: &str,
        asset_name: &str,
        session_id: Uuid,
        width: u32,
        height: u32,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let now = chrono::Local::now();
        let day_dir = replay_root.join(now.format("%Y%m%d").to_string());
        let file_name = format!(
            "{username}_{asset_name}_{}_{}.cast",
            now.format("%H%M%S"),
            &session_id.to_string()[..8]
        );
        let path = day_dir.join(file_name);
        let title = format!("{username} -> {asset_name}");

        tokio::spawn(Self::run(rx, path, ReplayHeader::new(width, height, title)));

        Self { tx: Some(tx) }
    }

    /// Records a chunk of bytes read from the server side of the bridge,
    /// before they are written to the user. Errors are swallowed:
    /// recording degrades to best-effort rather than risking the live
    /// session.
    pub async fn record(&self, data: Bytes) {
        if let Some(tx) = &self.tx {
            if tx.send(Message::Chunk(data)).await.is_err() {
                warn!("recorder task gone, dropping chunk");
            }
        }
    }

    pub async fn end(&self) {
        if let Some(tx) = &self.tx {
            let (reply, rx) = oneshot::channel();
            if tx.send(Message::End(reply)).await.is_ok() {
                let _ = rx.await;
            }
        }
    }

    async fn run(mut rx: mpsc::Receiver<Message>, path: PathBuf, header: ReplayHeader) {
        let start = std::time::Instant::now();
        let mut file: Option<File> = None;
        let mut wrote_any = false;

        while let Some(message) = rx.recv().await {
            match message {
                Message::Chunk(data) => {
                    if data.is_empty() {
                        continue;
                    }
                    if file.is_none() {
                        match Self::open(&path, &header).await {
                            Ok(f) => file = Some(f),
                            Err(err) => {
                                error!(%err, ?path, "recorder failed to open replay file");
                                continue;
                            }
                        }
                    }
                    if let Some(f) = file.as_mut() {
                        let elapsed = start.elapsed().as_secs_f64();
                        let line = serde_json::json!([elapsed, "o", String::from_utf8_lossy(&data)]);
                        if let Err(err) = Self::write_line(f, &line).await {
                            error!(%err, "recorder write failed");
                        } else {
                            wrote_any = true;
                        }
                    }
                }
                Message::End(reply) => {
                    if let Some(mut f) = file.take() {
                        let _ = f.flush().await;
                        drop(f);
                        if wrote_any {
                            Self::finish(path.clone()).await;
                        } else {
                            let _ = tokio::fs::remove_file(&path).await;
                        }
                    }
                    let _ = reply.send(());
                    return;
                }
            }
        }
    }

    async fn open(path: &Path, header: &ReplayHeader) -> std::io::Result<File> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(path).await?;
        let header_json = serde_json::to_string(header).unwrap_or_default();
        file.write_all(header_json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(file)
    }

    async fn write_line(file: &mut File, value: &serde_json::Value) -> std::io::Result<()> {
        let line = serde_json::to_string(value).unwrap_or_default();
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await
    }

    /// Gzips the finished `.cast` file to `.cast.gz` and removes the
    /// original, off the hot path, in a blocking task.
    async fn finish(path: PathBuf) {
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let data = std::fs::read(&path)?;
            let gz_path = path.with_extension("cast.gz");
            let gz_file = std::fs::File::create(&gz_path)?;
            let mut encoder = flate2::write::GzEncoder::new(gz_file, flate2::Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()?;
            std::fs::remove_file(&path)?;
            Ok(())
        })
        .await;

        if let Ok(Err(err)) = result {
            error!(%err, "recorder gzip failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_round_trip_concatenates_bytes() {
        let dir = std::env::temp_dir().join(format!("bastion-recorder-test-{}", Uuid::new_v4()));
        let recorder = Recorder::start(&dir, "rick", "elastic2", Uuid::new_v4(), 80, 24);
        recorder.record(Bytes::from_static(b"hello ")).await;
        recorder.record(Bytes::from_static(b"world")).await;
        recorder.end().await;

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let mut found = None;
        while let Some(day) = entries.next_entry().await.unwrap() {
            let mut files = tokio::fs::read_dir(day.path()).await.unwrap();
            while let Some(f) = files.next_entry().await.unwrap() {
                found = Some(f.path());
            }
        }
        let gz_path = found.expect("a .cast.gz file should exist");
        assert!(gz_path.to_string_lossy().ends_with(".cast.gz"));

        let bytes = std::fs::read(&gz_path).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut text = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut text).unwrap();
        let mut lines = text.lines();

        let header: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(header["version"], 2);

        let mut concatenated = String::new();
        for line in lines {
            let row: serde_json::Value = serde_json::from_str(line).unwrap();
            concatenated.push_str(row[2].as_str().unwrap());
        }
        assert_eq!(concatenated, "hello world");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
