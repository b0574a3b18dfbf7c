//! Patch download
//!
//! Streams the archive to disk chunk by chunk so large patches never sit in RAM.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::host::PatchInstaller;

/// File in the patch directory holding the label of the installed patch
const INSTALLED_MARKER: &str = "installed";

/// Downloads patches from `<base_url>/<zipfile>` into `dir/<label>.zip`
#[derive(Clone)]
pub struct HttpPatchInstaller {
    client: Client,
    base_url: String,
    dir: PathBuf,
}

impl HttpPatchInstaller {
    pub fn new(client: Client, base_url: &str, dir: PathBuf) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            dir,
        }
    }

    fn url(&self, zipfile: &str) -> String {
        format!("{}/{}", self.base_url, zipfile)
    }
}

#[async_trait]
impl PatchInstaller for HttpPatchInstaller {
    async fn install(&self, zipfile: &str, label: &str) -> Result<bool> {
        let url = self.url(zipfile);
        info!("Downloading patch {} from {}", label, url);

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to request patch")?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!("Patch {} not found on server", zipfile);
            return Ok(false);
        }
        if !response.status().is_success() {
            warn!("Patch download returned {}", response.status());
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create patch directory: {:?}", self.dir))?;

        let path = self.dir.join(format!("{}.zip", label));
        let partial = path.with_extension("zip.part");
        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create patch file: {:?}", partial))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.context("Patch download interrupted")? {
            file.write_all(&chunk)
                .await
                .context("Failed to write patch file")?;
            written += chunk.len() as u64;
        }
        file.flush().await.context("Failed to flush patch file")?;

        if written == 0 {
            let _ = tokio::fs::remove_file(&partial).await;
            warn!("Patch {} was empty", zipfile);
            return Ok(false);
        }

        tokio::fs::rename(&partial, &path)
            .await
            .with_context(|| format!("Failed to move patch into place: {:?}", path))?;

        let marker = self.dir.join(INSTALLED_MARKER);
        tokio::fs::write(&marker, label)
            .await
            .with_context(|| format!("Failed to record installed patch: {:?}", marker))?;

        debug!("Patch stored at {:?}", path);
        info!(
            "Downloaded patch {} ({:.2} MB)",
            label,
            written as f64 / (1024.0 * 1024.0)
        );
        Ok(true)
    }

    async fn installed(&self) -> Option<String> {
        let marker = self.dir.join(INSTALLED_MARKER);
        match tokio::fs::read_to_string(&marker).await {
            Ok(label) => Some(label.trim().to_string()).filter(|label| !label.is_empty()),
            Err(e) => {
                debug!("No installed patch recorded ({})", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Answer a single request with `status` and `body`
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        address
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!(
            "media-sync-patches-{}",
            uuid::Uuid::new_v4().simple()
        ))
    }

    #[tokio::test]
    async fn test_install_records_label_across_restarts() {
        let address = serve_once("200 OK", "PK-archive").await;
        let dir = scratch_dir();
        let installer = HttpPatchInstaller::new(Client::new(), &address, dir.clone());
        assert_eq!(installer.installed().await, None);

        assert!(installer.install("objects_189.zip", "171076031").await.unwrap());
        assert!(dir.join("171076031.zip").exists());
        assert!(!dir.join("171076031.zip.part").exists());

        let reopened = HttpPatchInstaller::new(Client::new(), &address, dir.clone());
        assert_eq!(reopened.installed().await.as_deref(), Some("171076031"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_missing_patch_is_not_installed() {
        let address = serve_once("404 Not Found", "").await;
        let dir = scratch_dir();
        let installer = HttpPatchInstaller::new(Client::new(), &address, dir.clone());

        assert!(!installer.install("objects_189.zip", "171076031").await.unwrap());
        assert_eq!(installer.installed().await, None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_url_joins_base_and_zipfile() {
        let installer = HttpPatchInstaller::new(
            Client::new(),
            "http://kodi.emby.media/Public%20testing/Dependencies/",
            PathBuf::from("/tmp"),
        );
        assert_eq!(
            installer.url("objects_189.zip"),
            "http://kodi.emby.media/Public%20testing/Dependencies/objects_189.zip"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let installer = HttpPatchInstaller::new(
            Client::new(),
            "http://127.0.0.1:9",
            std::env::temp_dir().join("media-sync-patches-test"),
        );
        assert!(installer.install("objects.zip", "1").await.is_err());
    }
}
