//! Opening the runtime connection shared by a run.
//!
//! A run either spawns its own runtime server (and owns it until the handle is
//! closed) or attaches to one that somebody else started (and never closes it).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use super::client::AgentRuntime;
use super::http::HttpRuntime;
use crate::error::{EngineError, Result};
use crate::timeout::with_timeout;

/// Subdirectories of the runtime's global config that it loads at startup.
const RUNTIME_CONFIG_SUBDIRS: [&str; 2] = ["plugins", "commands"];

/// Something that must be shut down when the run releases its connection.
pub trait ServerGuard: Send {
    fn shutdown(&mut self);
}

/// A live runtime connection plus, when owned, the server behind it.
pub struct RuntimeHandle {
    pub client: Arc<dyn AgentRuntime>,
    pub url: String,
    /// True when connected to a server this run did not start
    pub attached: bool,
    server: Option<Box<dyn ServerGuard>>,
}

impl RuntimeHandle {
    /// Connection to an externally managed server.
    pub fn attached(client: Arc<dyn AgentRuntime>) -> Self {
        let url = client.base_url().to_string();
        Self {
            client,
            url,
            attached: true,
            server: None,
        }
    }

    /// Connection to a server owned by this run.
    pub fn owned(client: Arc<dyn AgentRuntime>, server: Box<dyn ServerGuard>) -> Self {
        let url = client.base_url().to_string();
        Self {
            client,
            url,
            attached: false,
            server: Some(server),
        }
    }

    /// Shut down the owned server, if any. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut server) = self.server.take() {
            info!("Shutting down runtime server at {}", self.url);
            server.shutdown();
        }
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("url", &self.url)
            .field("attached", &self.attached)
            .field("owns_server", &self.server.is_some())
            .finish()
    }
}

/// Strategy for obtaining a run's runtime connection.
#[async_trait]
pub trait RuntimeLauncher: Send + Sync {
    async fn launch(&self) -> Result<RuntimeHandle>;
}

/// Starts `<command> serve` on an ephemeral local port.
#[derive(Debug, Clone)]
pub struct SpawnLauncher {
    pub command: String,
    pub startup_timeout: Duration,
    /// Root of the runtime's global config, checked for broken symlinks
    pub config_root: Option<PathBuf>,
}

impl SpawnLauncher {
    pub fn new(command: impl Into<String>, startup_timeout: Duration) -> Self {
        Self {
            command: command.into(),
            startup_timeout,
            config_root: runtime_config_dir(),
        }
    }
}

struct ServerProcess {
    child: Child,
}

impl ServerGuard for ServerProcess {
    fn shutdown(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to stop runtime server: {}", e);
        }
    }
}

#[async_trait]
impl RuntimeLauncher for SpawnLauncher {
    async fn launch(&self) -> Result<RuntimeHandle> {
        if let Some(root) = &self.config_root {
            let fixed = check_broken_symlinks(root, true);
            if !fixed.is_empty() {
                info!("Removed {} broken symlink(s) under {}", fixed.len(), root.display());
            }
        }

        info!("Starting runtime server: {} serve", self.command);
        let mut child = Command::new(&self.command)
            .args(["serve", "--hostname=127.0.0.1", "--port=0"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Transport(format!("Failed to start {}: {}", self.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Transport("Runtime server stdout not captured".to_string()))?;

        // Dropping `child` on any error below kills the process.
        let url = with_timeout(
            read_listen_url(stdout),
            self.startup_timeout,
            format!(
                "Timeout waiting for runtime server to start after {}s",
                self.startup_timeout.as_secs()
            ),
        )
        .await?;

        let runtime = HttpRuntime::new(url.clone())?;
        if let Err(e) = runtime.health().await {
            return Err(EngineError::Transport(format!(
                "Runtime server started but not responding: {}",
                e
            )));
        }

        info!("Runtime server listening at {}", url);
        Ok(RuntimeHandle::owned(Arc::new(runtime), Box::new(ServerProcess { child })))
    }
}

/// Connects to an already running server.
#[derive(Debug, Clone)]
pub struct AttachLauncher {
    pub url: String,
}

impl AttachLauncher {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RuntimeLauncher for AttachLauncher {
    async fn launch(&self) -> Result<RuntimeHandle> {
        let runtime = HttpRuntime::new(self.url.clone())?;
        runtime
            .health()
            .await
            .map_err(|e| EngineError::Transport(format!("Cannot connect to runtime server at {}: {}", self.url, e)))?;
        info!("Attached to runtime server at {}", self.url);
        Ok(RuntimeHandle::attached(Arc::new(runtime)))
    }
}

/// Read server output until it announces its URL. Output after that keeps
/// being drained so the server never blocks on a full pipe.
async fn read_listen_url(stdout: ChildStdout) -> Result<String> {
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = parse_listen_url(&line) {
            tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });
            return Ok(url);
        }
    }
    Err(EngineError::Transport(
        "Runtime server exited before reporting its URL".to_string(),
    ))
}

/// Extract the first http(s) URL from a line of server output.
pub fn parse_listen_url(line: &str) -> Option<String> {
    let start = line.find("http://").or_else(|| line.find("https://"))?;
    let url: String = line[start..].chars().take_while(|c| !c.is_whitespace()).collect();
    Some(url.trim_end_matches('/').to_string())
}

/// `~/.config/opencode`
pub fn runtime_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("opencode"))
}

/// Find symlinks whose target is missing under the runtime's plugin and
/// command directories. With `fix`, they are removed as they are found.
pub fn check_broken_symlinks(config_root: &Path, fix: bool) -> Vec<PathBuf> {
    let mut broken = Vec::new();
    for sub in RUNTIME_CONFIG_SUBDIRS {
        let dir = config_root.join(sub);
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_broken = match fs::symlink_metadata(&path) {
                Ok(meta) => meta.file_type().is_symlink() && fs::metadata(&path).is_err(),
                Err(_) => true,
            };
            if !is_broken {
                continue;
            }
            if fix {
                match fs::remove_file(&path) {
                    Ok(()) => info!("Removed broken symlink: {}", path.display()),
                    Err(e) => warn!("Failed to remove broken symlink {}: {}", path.display(), e),
                }
            }
            broken.push(path);
        }
    }
    broken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGuard(Arc<AtomicUsize>);

    impl ServerGuard for CountingGuard {
        fn shutdown(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_parse_listen_url() {
        assert_eq!(
            parse_listen_url("opencode server listening on http://127.0.0.1:40123"),
            Some("http://127.0.0.1:40123".to_string())
        );
        assert_eq!(
            parse_listen_url("ready at https://localhost:8080/ (press ctrl-c)"),
            Some("https://localhost:8080".to_string())
        );
        assert_eq!(parse_listen_url("starting up..."), None);
    }

    #[test]
    fn test_owned_handle_shuts_down_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut handle = RuntimeHandle::owned(Arc::new(MockRuntime::new()), Box::new(CountingGuard(count.clone())));
        assert!(!handle.attached);
        handle.close();
        handle.close();
        drop(handle);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_owned_handle_shuts_down_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = RuntimeHandle::owned(Arc::new(MockRuntime::new()), Box::new(CountingGuard(count.clone())));
        drop(handle);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attached_handle_has_nothing_to_close() {
        let mut handle = RuntimeHandle::attached(Arc::new(MockRuntime::new()));
        assert!(handle.attached);
        assert_eq!(handle.url, MockRuntime::URL);
        handle.close();
    }

    #[cfg(unix)]
    #[test]
    fn test_check_broken_symlinks() {
        use std::os::unix::fs::symlink;

        let temp = tempfile::TempDir::new().unwrap();
        let plugins = temp.path().join("plugins");
        let commands = temp.path().join("commands");
        fs::create_dir_all(&plugins).unwrap();
        fs::create_dir_all(&commands).unwrap();

        let target = temp.path().join("real.js");
        fs::write(&target, "x").unwrap();
        symlink(&target, plugins.join("good.js")).unwrap();
        symlink(temp.path().join("missing.js"), plugins.join("bad.js")).unwrap();
        symlink(temp.path().join("gone.md"), commands.join("bad.md")).unwrap();
        fs::write(commands.join("plain.md"), "y").unwrap();

        let found = check_broken_symlinks(temp.path(), false);
        assert_eq!(found.len(), 2);
        assert!(plugins.join("bad.js").symlink_metadata().is_ok());

        let fixed = check_broken_symlinks(temp.path(), true);
        assert_eq!(fixed.len(), 2);
        assert!(plugins.join("bad.js").symlink_metadata().is_err());
        assert!(plugins.join("good.js").exists());
        assert!(check_broken_symlinks(temp.path(), false).is_empty());
    }

    #[test]
    fn test_check_broken_symlinks_missing_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(check_broken_symlinks(temp.path(), true).is_empty());
    }

    #[tokio::test]
    async fn test_spawn_launcher_missing_binary() {
        let launcher = SpawnLauncher {
            command: "phaseloop-definitely-not-installed".to_string(),
            startup_timeout: Duration::from_secs(1),
            config_root: None,
        };
        let err = launcher.launch().await.unwrap_err();
        assert!(matches!(err, EngineError::Transport(ref m) if m.contains("Failed to start")));
    }
}
