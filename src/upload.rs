use crate::session::SessionSnapshot;
use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Uploads one clip file to the configured endpoint as a multipart POST.
///
/// One form field named "file", file name `recording.<ext>`, MIME
/// `audio/<ext>`. The response body is not interpreted; the status code is
/// only logged.
#[derive(Clone)]
pub struct Uploader {
    client: reqwest::Client,
    url: String,
}

impl Uploader {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub async fn upload_clip(&self, path: &Path) -> Result<()> {
        let ext = clip_extension(path);
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read clip {:?}", path))?;

        let part = Part::bytes(bytes)
            .file_name(clip_file_name(&ext))
            .mime_str(&clip_mime(&ext))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .context("Upload request failed")?;

        tracing::info!(
            "Upload response: {} {}",
            response.status().as_u16(),
            response.status().canonical_reason().unwrap_or("")
        );
        Ok(())
    }
}

fn clip_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("wav")
        .to_string()
}

fn clip_file_name(ext: &str) -> String {
    format!("recording.{}", ext)
}

fn clip_mime(ext: &str) -> String {
    format!("audio/{}", ext)
}

/// Periodically snapshots the session and, while a recording is in progress,
/// fires one upload attempt per tick.
///
/// Ticks are fire-and-forget: a slow or failed attempt is logged and
/// swallowed and never delays or cancels the next tick. No recording means a
/// no-op tick. The cadence runs until `stop()`.
pub struct UploadSidecar {
    stop_tx: Option<mpsc::Sender<()>>,
}

impl UploadSidecar {
    pub fn start(
        mut snapshot_rx: watch::Receiver<SessionSnapshot>,
        uploader: Uploader,
        interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let path = snapshot_rx.borrow_and_update().recording_path.clone();
                        let Some(path) = path else {
                            continue;
                        };
                        let uploader = uploader.clone();
                        tokio::spawn(async move {
                            if let Err(e) = uploader.upload_clip(&path).await {
                                tracing::warn!("Upload failed: {:#}", e);
                            }
                        });
                    }
                    _ = stop_rx.recv() => {
                        tracing::debug!("Upload sidecar stopped");
                        break;
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}
