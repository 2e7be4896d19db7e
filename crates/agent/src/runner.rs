use crate::gateway::GatewayClient;
use crate::retry::calculate_backoff;
use anyhow::{anyhow, Context, Result};
use dma_toolkit_core::Platform;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub install_dir: PathBuf,
    pub binary_name: String,
    pub download_base: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

/// Owns the agent binary on disk and the `serve` child process.
pub struct AgentRunner {
    config: RunnerConfig,
    http: reqwest::Client,
    child: Mutex<Option<Child>>,
}

impl AgentRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("dma-toolkit/0.2")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            http,
            child: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn binary_path(&self) -> PathBuf {
        let mut name = self.config.binary_name.clone();
        name.push_str(Platform::current().executable_suffix());
        self.config.install_dir.join(name)
    }

    pub fn artifact_url(&self, platform: Platform) -> String {
        format!(
            "{}/{}-{}{}",
            self.config.download_base.trim_end_matches('/'),
            self.config.binary_name,
            platform.slug(),
            platform.executable_suffix()
        )
    }

    /// Fetches the agent build for `platform` into the install directory.
    /// Only the build for the running platform can be installed, so any
    /// other choice is refused before anything is written.
    pub async fn download(&self, platform: Platform) -> Result<PathBuf> {
        let host = Platform::current();
        if platform != host {
            return Err(anyhow!(
                "The {platform} agent cannot run on this {host} machine; choose {host}"
            ));
        }
        let url = self.artifact_url(platform);
        info!(%url, "Downloading agent");

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("{} returned {}", url, response.status()));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(anyhow!("{url} returned an empty file"));
        }

        let path = self.binary_path();
        write_atomically(&path, &bytes).await?;
        info!(path = %path.display(), bytes = bytes.len(), "Agent downloaded");
        Ok(path)
    }

    /// Marks the downloaded binary executable and checks that it runs,
    /// returning the version it reports.
    pub async fn install(&self) -> Result<String> {
        let path = self.binary_path();
        if !path.exists() {
            return Err(anyhow!("Agent binary not found at {}", path.display()));
        }
        mark_executable(&path).await?;

        let output = Command::new(&path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Cannot run {}", path.display()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} --version exited with {}",
                path.display(),
                output.status
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = parse_version(&stdout)
            .ok_or_else(|| anyhow!("Unrecognised version output: {}", stdout.trim()))?;
        info!(%version, "Agent installed");
        Ok(version)
    }

    /// Spawns `serve --port N` unless a child is already running, then waits
    /// for the health endpoint to answer.
    pub async fn start(&self) -> Result<(GatewayClient, String)> {
        let gateway = GatewayClient::for_port(self.config.port)?;

        if !self.is_running() {
            let path = self.binary_path();
            info!(port = self.config.port, "Starting agent");
            let mut child = Command::new(&path)
                .arg("serve")
                .arg("--port")
                .arg(self.config.port.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("Cannot start {}", path.display()))?;

            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!("agent stderr: {}", line);
                    }
                });
            }

            if let Ok(mut slot) = self.child.lock() {
                *slot = Some(child);
            }
        }

        let version = wait_until_healthy(&gateway, self.config.connect_timeout).await?;
        Ok((gateway, version))
    }

    pub fn is_running(&self) -> bool {
        let Ok(mut slot) = self.child.lock() else {
            return false;
        };
        match slot.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                warn!(%status, "Agent process exited");
                *slot = None;
                false
            }
            Some(Err(e)) => {
                warn!("Cannot query agent process: {}", e);
                false
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let child = self.child.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut child) = child {
            let _ = child.kill().await;
            let _ = child.wait().await;
            info!("Agent stopped");
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        if let Ok(slot) = self.child.get_mut() {
            if let Some(mut child) = slot.take() {
                let _ = child.start_kill();
            }
        }
    }
}

/// Polls `/health` with growing delays until it answers or `limit` elapses.
pub async fn wait_until_healthy(gateway: &GatewayClient, limit: Duration) -> Result<String> {
    let deadline = Instant::now() + limit;
    let mut attempt = 0;

    loop {
        let last_error = match gateway.health().await {
            Ok(health) => return Ok(health.version),
            Err(e) => e,
        };
        let delay = calculate_backoff(attempt);
        if Instant::now() + delay >= deadline {
            return Err(anyhow!(
                "Agent did not become healthy within {}s: {}",
                limit.as_secs(),
                last_error
            ));
        }
        debug!(attempt, ?delay, "Agent not healthy yet");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Writes through a `.part` file so a partial download never sits at `path`.
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    let partial = path.with_extension("part");
    tokio::fs::write(&partial, bytes)
        .await
        .with_context(|| format!("Cannot write {}", partial.display()))?;
    tokio::fs::rename(&partial, path).await?;
    Ok(())
}

pub fn parse_version(output: &str) -> Option<String> {
    let re = Regex::new(r"(\d+)\.(\d+)\.(\d+)").ok()?;
    re.captures(output).map(|caps| caps[0].to_string())
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn runner_config(dir: &Path, base: String) -> RunnerConfig {
        RunnerConfig {
            install_dir: dir.to_path_buf(),
            binary_name: "dma-agent".to_string(),
            download_base: base,
            port: 7420,
            connect_timeout: Duration::from_millis(600),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn parses_semver_from_version_output() {
        assert_eq!(
            parse_version("dma-agent 1.4.2 (linux-x86_64)\n").as_deref(),
            Some("1.4.2")
        );
        assert_eq!(parse_version("dma-agent dev build"), None);
    }

    #[test]
    fn artifact_url_is_platform_specific() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = AgentRunner::new(runner_config(
            dir.path(),
            "https://downloads.example.test/agent/latest/".to_string(),
        ));
        assert_eq!(
            runner.artifact_url(Platform::Windows),
            "https://downloads.example.test/agent/latest/dma-agent-windows.exe"
        );
        assert_eq!(
            runner.artifact_url(Platform::Linux),
            "https://downloads.example.test/agent/latest/dma-agent-linux"
        );
    }

    #[tokio::test]
    async fn download_writes_binary_into_install_dir() {
        let host = Platform::current();
        let route = format!("/dma-agent-{}{}", host.slug(), host.executable_suffix());
        let router = Router::new().route(&route, get(|| async { "#!/bin/sh\necho ok\n" }));
        let base = serve(router).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = AgentRunner::new(runner_config(&dir.path().join("bin"), base));

        let path = runner.download(host).await.expect("download");
        assert_eq!(path, runner.binary_path());
        let body = std::fs::read_to_string(&path).expect("read");
        assert!(body.contains("echo ok"));
    }

    #[tokio::test]
    async fn download_reports_missing_artifact() {
        let router = Router::new().fallback(|| async { (StatusCode::NOT_FOUND, "missing") });
        let base = serve(router).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = AgentRunner::new(runner_config(dir.path(), base));

        assert!(runner.download(Platform::current()).await.is_err());
        assert!(!runner.binary_path().exists());
    }

    #[tokio::test]
    async fn foreign_platform_build_is_refused_before_saving() {
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        let router = Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                "MZ-foreign-binary"
            }
        });
        let base = serve(router).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = AgentRunner::new(runner_config(dir.path(), base));

        let foreign = Platform::current().next();
        let err = runner.download(foreign).await.expect_err("foreign build");
        assert!(err.to_string().contains("cannot run"));
        assert!(!runner.binary_path().exists());
        assert_eq!(served.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn install_fails_without_download() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = AgentRunner::new(runner_config(dir.path(), String::new()));
        let err = runner.install().await.expect_err("missing binary");
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn install_reads_version_from_binary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = AgentRunner::new(runner_config(dir.path(), String::new()));
        std::fs::write(
            runner.binary_path(),
            "#!/bin/sh\necho \"dma-agent 2.0.1\"\n",
        )
        .expect("write script");

        let version = runner.install().await.expect("install");
        assert_eq!(version, "2.0.1");
    }

    #[tokio::test]
    async fn health_wait_returns_agent_version() {
        let router = Router::new().route(
            "/health",
            get(|| async { Json(serde_json::json!({ "version": "3.1.0" })) }),
        );
        let base = serve(router).await;
        let gateway = GatewayClient::new(url::Url::parse(&format!("{base}/")).expect("url"));
        let version = wait_until_healthy(&gateway, Duration::from_secs(2))
            .await
            .expect("healthy");
        assert_eq!(version, "3.1.0");
    }

    #[tokio::test]
    async fn health_wait_gives_up_at_deadline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let gateway = GatewayClient::for_port(port).expect("client");
        let started = std::time::Instant::now();
        let err = wait_until_healthy(&gateway, Duration::from_millis(500))
            .await
            .expect_err("nothing listening");
        assert!(err.to_string().contains("did not become healthy"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
