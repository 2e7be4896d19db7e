use crate::retry::with_retry;
use crate::runner::write_atomically;
use anyhow::{anyhow, Result};
use dma_toolkit_core::Tool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Downloads tool archives from `{download_base}/{id}-{version}.zip` into `dir`.
#[derive(Debug, Clone)]
pub struct ToolStore {
    http: reqwest::Client,
    download_base: String,
    dir: PathBuf,
}

impl ToolStore {
    pub fn new(dir: PathBuf, download_base: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("dma-toolkit/0.2")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            download_base: download_base.into(),
            dir,
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn artifact_url(&self, tool: &Tool) -> String {
        format!(
            "{}/{}",
            self.download_base.trim_end_matches('/'),
            tool.artifact_name()
        )
    }

    pub fn path_for(&self, tool: &Tool) -> Result<PathBuf> {
        let name = tool.artifact_name();
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(anyhow!("Refusing to save {:?} outside {}", name, self.dir.display()));
        }
        Ok(self.dir.join(name))
    }

    pub async fn download(&self, tool: &Tool) -> Result<PathBuf> {
        let path = self.path_for(tool)?;
        let url = self.artifact_url(tool);
        info!(tool = %tool.id, %url, "Downloading tool");

        let bytes = with_retry(|| {
            let url = url.clone();
            async move {
                let response = self.http.get(&url).send().await?.error_for_status()?;
                Ok(response.bytes().await?)
            }
        })
        .await?;
        if bytes.is_empty() {
            return Err(anyhow!("{url} returned an empty file"));
        }

        write_atomically(&path, &bytes).await?;
        info!(tool = %tool.id, path = %path.display(), bytes = bytes.len(), "Tool downloaded");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use dma_toolkit_core::tools::default_catalog;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}/tools")
    }

    fn pcileech() -> Tool {
        default_catalog()
            .into_iter()
            .find(|t| t.id == "pcileech")
            .expect("pcileech")
    }

    #[tokio::test]
    async fn saves_archive_under_tool_dir() {
        let base = serve(Router::new().route(
            "/tools/pcileech-v6.0.2.zip",
            get(|| async { "PK-archive" }),
        ))
        .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ToolStore::new(dir.path().join("tools"), base);

        let path = store.download(&pcileech()).await.expect("download");
        assert_eq!(path, dir.path().join("tools").join("pcileech-v6.0.2.zip"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "PK-archive");
    }

    #[tokio::test]
    async fn missing_archive_is_an_error() {
        let base = serve(
            Router::new().fallback(|| async { (StatusCode::NOT_FOUND, "missing") }),
        )
        .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ToolStore::new(dir.path().to_path_buf(), base);

        assert!(store.download(&pcileech()).await.is_err());
        assert!(!dir.path().join("pcileech-v6.0.2.zip").exists());
    }

    #[test]
    fn tool_names_cannot_escape_the_directory() {
        let store = ToolStore::new(PathBuf::from("/tmp/tools"), "https://example.test");
        let tool = Tool::new("../evil", "Evil", "", "v1", "1 MB");
        assert!(store.path_for(&tool).is_err());
        assert_eq!(
            store.artifact_url(&pcileech()),
            "https://example.test/pcileech-v6.0.2.zip"
        );
    }
}
