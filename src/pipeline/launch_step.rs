//! Dev server launch step.
//!
//! Picks the first recognized run script from the package manifest,
//! launches it detached, waits a short grace period, then verifies the
//! process survived and the exposed URL actually answers before reporting
//! it. Everything here is best-effort: a missing script or a dead server
//! degrades the response, never fails it.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{SandboxConfig, TimeoutConfig};
use crate::pipeline::clone_step::ProjectInfo;
use crate::sandbox::SandboxHandle;

/// Run scripts recognized in the package manifest, in priority order.
pub const RUN_SCRIPT_PRIORITY: [&str; 3] = ["dev", "start", "serve"];

const PID_FILE: &str = "/tmp/drydock-dev.pid";
const LOG_FILE: &str = "/tmp/drydock-dev.log";

/// What the launch step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// No package manifest or no recognized run script; not a failure.
    NoServer,
    /// The server is up and answered the readiness probe.
    Started { url: String },
    /// Launch was attempted but the server is not confirmed reachable.
    Warning(String),
}

impl LaunchOutcome {
    /// The reachable URL, if the server is confirmed up.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Started { url } => Some(url),
            _ => None,
        }
    }
}

/// Checks whether a URL answers at all. One attempt; the launch step owns
/// the retry schedule.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn check(&self, url: &str) -> bool;
}

/// HTTP GET probe. Any response, including an error status, counts as
/// reachable; only connection failures and timeouts do not.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn check(&self, url: &str) -> bool {
        self.client.get(url).send().await.is_ok()
    }
}

/// Selects the first recognized run script declared in `package.json`.
pub fn pick_run_script(package_json: &str) -> Option<String> {
    let manifest: serde_json::Value = serde_json::from_str(package_json).ok()?;
    let scripts = manifest.get("scripts")?.as_object()?;
    RUN_SCRIPT_PRIORITY
        .iter()
        .find(|name| scripts.contains_key(**name))
        .map(|name| (*name).to_string())
}

/// Launches the project's dev server and derives its public URL.
pub async fn run_launch(
    handle: &dyn SandboxHandle,
    project_path: &str,
    info: &ProjectInfo,
    sandbox_config: &SandboxConfig,
    timeouts: &TimeoutConfig,
    probe: &dyn ReadinessProbe,
) -> LaunchOutcome {
    if !info.has_package_json {
        return LaunchOutcome::NoServer;
    }

    let manifest = match handle
        .exec(
            &format!("cat {}/package.json", shell_words::quote(project_path)),
            timeouts.exec_timeout(),
        )
        .await
    {
        Ok(output) if output.success() => output.stdout,
        Ok(output) => {
            return LaunchOutcome::Warning(format!(
                "could not read package manifest: {}",
                output.stderr.trim()
            ));
        }
        Err(e) => {
            return LaunchOutcome::Warning(format!("could not read package manifest: {e}"));
        }
    };

    let Some(script) = pick_run_script(&manifest) else {
        debug!("No recognized run script in package manifest");
        return LaunchOutcome::NoServer;
    };

    info!(script = %script, "Launching dev server");
    let launch = format!(
        "cd {} && nohup npm run {script} > {LOG_FILE} 2>&1 & echo $! > {PID_FILE}",
        shell_words::quote(project_path),
    );
    if let Err(e) = handle.exec_detached(&launch).await {
        return LaunchOutcome::Warning(format!("failed to launch dev server: {e}"));
    }

    // Give the process a moment before checking it survived startup.
    tokio::time::sleep(timeouts.launch_grace()).await;

    let alive = handle
        .exec(
            &format!("kill -0 \"$(cat {PID_FILE})\" 2>/dev/null"),
            timeouts.exec_timeout(),
        )
        .await;
    match alive {
        Ok(output) if output.success() => {}
        Ok(_) => {
            return LaunchOutcome::Warning(format!(
                "dev server `npm run {script}` exited during startup"
            ));
        }
        Err(e) => {
            return LaunchOutcome::Warning(format!("could not verify dev server: {e}"));
        }
    }

    let Some(url) = resolve_url(handle, &sandbox_config.candidate_ports).await else {
        return LaunchOutcome::Warning(format!(
            "dev server `npm run {script}` is running but no known port is exposed"
        ));
    };

    // A surviving process is a weak signal; require the URL to answer
    // before reporting it as usable.
    let mut delay = Duration::from_millis(timeouts.probe_base_delay_ms);
    for attempt in 1..=timeouts.probe_attempts.max(1) {
        if probe.check(&url).await {
            info!(url = %url, "Dev server is reachable");
            return LaunchOutcome::Started { url };
        }
        if attempt < timeouts.probe_attempts {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    warn!(url = %url, "Dev server process is up but the URL never answered");
    LaunchOutcome::Warning(format!(
        "dev server `npm run {script}` is running but {url} is not responding yet"
    ))
}

/// First candidate port the provider exposes, in configured order.
async fn resolve_url(handle: &dyn SandboxHandle, ports: &[u16]) -> Option<String> {
    for port in ports {
        match handle.expose_port(*port).await {
            Ok(Some(url)) => return Some(url),
            Ok(None) => {}
            Err(e) => {
                warn!(port, error = %e, "Port exposure lookup failed");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clone_step::inspect_listing;
    use crate::sandbox::mock::{MockExec, MockSandbox};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted probe for tests.
    struct MockProbe {
        ready: bool,
        calls: Arc<AtomicUsize>,
    }

    impl MockProbe {
        fn ready() -> Self {
            Self {
                ready: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn unreachable() -> Self {
            Self {
                ready: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ReadinessProbe for MockProbe {
        async fn check(&self, _url: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ready
        }
    }

    fn fast_timeouts() -> TimeoutConfig {
        TimeoutConfig {
            launch_grace_secs: 0,
            probe_attempts: 2,
            probe_base_delay_ms: 1,
            ..TimeoutConfig::default()
        }
    }

    fn node_info() -> ProjectInfo {
        inspect_listing("./package.json\n./src/index.js\n")
    }

    const DEV_MANIFEST: &str = r#"{"scripts": {"dev": "vite", "start": "node ."}}"#;

    #[test]
    fn test_pick_run_script_priority() {
        assert_eq!(pick_run_script(DEV_MANIFEST).as_deref(), Some("dev"));
        assert_eq!(
            pick_run_script(r#"{"scripts": {"start": "node .", "serve": "x"}}"#).as_deref(),
            Some("start")
        );
        assert_eq!(
            pick_run_script(r#"{"scripts": {"serve": "x"}}"#).as_deref(),
            Some("serve")
        );
    }

    #[test]
    fn test_pick_run_script_none() {
        assert_eq!(pick_run_script(r#"{"scripts": {"test": "jest"}}"#), None);
        assert_eq!(pick_run_script(r#"{"name": "widgets"}"#), None);
        assert_eq!(pick_run_script("not json"), None);
    }

    #[tokio::test]
    async fn test_no_package_manifest_is_noop() {
        let sandbox = MockSandbox::always_succeed("sbx-1");
        let info = inspect_listing("./main.py\n");

        let outcome = run_launch(
            &sandbox,
            "/workspace/widgets",
            &info,
            &SandboxConfig::default(),
            &fast_timeouts(),
            &MockProbe::ready(),
        )
        .await;

        assert_eq!(outcome, LaunchOutcome::NoServer);
        assert_eq!(sandbox.exec_count(), 0);
        assert_eq!(sandbox.detached_count(), 0);
    }

    #[tokio::test]
    async fn test_no_recognized_script_is_noop() {
        let sandbox = MockSandbox::new(
            "sbx-1",
            vec![MockExec::Success(
                r#"{"scripts": {"test": "jest"}}"#.to_string(),
            )],
        );

        let outcome = run_launch(
            &sandbox,
            "/workspace/widgets",
            &node_info(),
            &SandboxConfig::default(),
            &fast_timeouts(),
            &MockProbe::ready(),
        )
        .await;

        assert_eq!(outcome, LaunchOutcome::NoServer);
        assert_eq!(sandbox.detached_count(), 0);
    }

    #[tokio::test]
    async fn test_started_when_alive_and_reachable() {
        let sandbox = MockSandbox::new(
            "sbx-1",
            vec![
                MockExec::Success(DEV_MANIFEST.to_string()),
                MockExec::Success(String::new()), // liveness
            ],
        )
        .with_exposed_port(3000, "http://127.0.0.1:49152");

        let outcome = run_launch(
            &sandbox,
            "/workspace/widgets",
            &node_info(),
            &SandboxConfig::default(),
            &fast_timeouts(),
            &MockProbe::ready(),
        )
        .await;

        assert_eq!(outcome.url(), Some("http://127.0.0.1:49152"));
        assert_eq!(sandbox.detached_count(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_secondary_port() {
        let sandbox = MockSandbox::new(
            "sbx-1",
            vec![
                MockExec::Success(DEV_MANIFEST.to_string()),
                MockExec::Success(String::new()),
            ],
        )
        .with_exposed_port(5173, "http://127.0.0.1:49200");

        let outcome = run_launch(
            &sandbox,
            "/workspace/widgets",
            &node_info(),
            &SandboxConfig::default(),
            &fast_timeouts(),
            &MockProbe::ready(),
        )
        .await;

        assert_eq!(outcome.url(), Some("http://127.0.0.1:49200"));
    }

    #[tokio::test]
    async fn test_dead_process_is_warning() {
        let sandbox = MockSandbox::new(
            "sbx-1",
            vec![
                MockExec::Success(DEV_MANIFEST.to_string()),
                MockExec::Failure {
                    exit_code: 1,
                    stderr: String::new(),
                }, // liveness check fails
            ],
        );

        let outcome = run_launch(
            &sandbox,
            "/workspace/widgets",
            &node_info(),
            &SandboxConfig::default(),
            &fast_timeouts(),
            &MockProbe::ready(),
        )
        .await;

        match outcome {
            LaunchOutcome::Warning(msg) => assert!(msg.contains("exited during startup")),
            other => panic!("expected warning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_url_is_warning_after_retries() {
        let probe = MockProbe::unreachable();
        let calls = probe.calls.clone();
        let sandbox = MockSandbox::new(
            "sbx-1",
            vec![
                MockExec::Success(DEV_MANIFEST.to_string()),
                MockExec::Success(String::new()),
            ],
        )
        .with_exposed_port(3000, "http://127.0.0.1:49152");

        let outcome = run_launch(
            &sandbox,
            "/workspace/widgets",
            &node_info(),
            &SandboxConfig::default(),
            &fast_timeouts(),
            &probe,
        )
        .await;

        match outcome {
            LaunchOutcome::Warning(msg) => assert!(msg.contains("not responding")),
            other => panic!("expected warning, got {other:?}"),
        }
        // Bounded retries, not a single attempt.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_exposed_port_is_warning() {
        let sandbox = MockSandbox::new(
            "sbx-1",
            vec![
                MockExec::Success(DEV_MANIFEST.to_string()),
                MockExec::Success(String::new()),
            ],
        );

        let outcome = run_launch(
            &sandbox,
            "/workspace/widgets",
            &node_info(),
            &SandboxConfig::default(),
            &fast_timeouts(),
            &MockProbe::ready(),
        )
        .await;

        match outcome {
            LaunchOutcome::Warning(msg) => assert!(msg.contains("no known port is exposed")),
            other => panic!("expected warning, got {other:?}"),
        }
    }
}
