//! Mock sandbox for testing.
//!
//! Returns scripted command results and records every interaction so
//! pipeline and reaper tests can assert on remote-call counts without a
//! Docker daemon.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ExecOutput, SandboxError, SandboxHandle, SandboxProvider};

/// A single scripted command result.
#[derive(Debug, Clone)]
pub enum MockExec {
    /// Exit zero with the given stdout.
    Success(String),
    /// Non-zero exit with the given code and stderr.
    Failure { exit_code: i64, stderr: String },
    /// The command times out.
    Timeout,
    /// A transport-level failure.
    Transport,
}

/// A scripted sandbox handle.
///
/// Responses are returned in order and cycle when exhausted. All clones
/// share the same interaction log, so a test can keep one copy while the
/// pipeline consumes another.
#[derive(Clone)]
pub struct MockSandbox {
    id: String,
    responses: Arc<Vec<MockExec>>,
    call_index: Arc<AtomicUsize>,
    exec_log: Arc<Mutex<Vec<String>>>,
    detached_log: Arc<Mutex<Vec<String>>>,
    exposed: HashMap<u16, String>,
    closed: Arc<AtomicBool>,
    fail_close: bool,
}

impl MockSandbox {
    /// Creates a mock handle that returns the given responses in order.
    pub fn new(id: &str, responses: Vec<MockExec>) -> Self {
        Self {
            id: id.to_string(),
            responses: Arc::new(responses),
            call_index: Arc::new(AtomicUsize::new(0)),
            exec_log: Arc::new(Mutex::new(Vec::new())),
            detached_log: Arc::new(Mutex::new(Vec::new())),
            exposed: HashMap::new(),
            closed: Arc::new(AtomicBool::new(false)),
            fail_close: false,
        }
    }

    /// Creates a mock where every command succeeds with empty output.
    pub fn always_succeed(id: &str) -> Self {
        Self::new(id, vec![MockExec::Success(String::new())])
    }

    /// Registers an exposed port and the URL it resolves to.
    pub fn with_exposed_port(mut self, port: u16, url: &str) -> Self {
        self.exposed.insert(port, url.to_string());
        self
    }

    /// Makes `close` fail with a transport error.
    pub fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Number of blocking commands executed.
    pub fn exec_count(&self) -> usize {
        self.exec_log.lock().unwrap().len()
    }

    /// Number of detached commands launched.
    pub fn detached_count(&self) -> usize {
        self.detached_log.lock().unwrap().len()
    }

    /// All blocking commands, in order.
    pub fn commands(&self) -> Vec<String> {
        self.exec_log.lock().unwrap().clone()
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxHandle for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, SandboxError> {
        self.exec_log.lock().unwrap().push(command.to_string());

        if self.responses.is_empty() {
            return Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let index = self.call_index.fetch_add(1, Ordering::SeqCst);
        match &self.responses[index % self.responses.len()] {
            MockExec::Success(stdout) => Ok(ExecOutput {
                exit_code: 0,
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            MockExec::Failure { exit_code, stderr } => Ok(ExecOutput {
                exit_code: *exit_code,
                stdout: String::new(),
                stderr: stderr.clone(),
            }),
            MockExec::Timeout => Err(SandboxError::timeout(timeout)),
            MockExec::Transport => Err(SandboxError::transport("mock transport failure")),
        }
    }

    async fn exec_detached(&self, command: &str) -> Result<(), SandboxError> {
        self.detached_log.lock().unwrap().push(command.to_string());
        Ok(())
    }

    async fn expose_port(&self, port: u16) -> Result<Option<String>, SandboxError> {
        Ok(self.exposed.get(&port).cloned())
    }

    async fn close(&self) -> Result<(), SandboxError> {
        if self.fail_close {
            return Err(SandboxError::transport("mock close failure"));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A provider that hands out clones of a template [`MockSandbox`].
#[derive(Clone)]
pub struct MockProvider {
    template: MockSandbox,
    create_count: Arc<AtomicUsize>,
    fail_create: bool,
    stale_ids: Arc<Vec<String>>,
}

impl MockProvider {
    /// Every created or connected handle shares the template's logs.
    pub fn new(template: MockSandbox) -> Self {
        Self {
            template,
            create_count: Arc::new(AtomicUsize::new(0)),
            fail_create: false,
            stale_ids: Arc::new(Vec::new()),
        }
    }

    /// Makes `create` fail with a provisioning error.
    pub fn with_failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Marks ids as stale: `connect` against them fails.
    pub fn with_stale_ids(mut self, ids: &[&str]) -> Self {
        self.stale_ids = Arc::new(ids.iter().map(|s| (*s).to_string()).collect());
        self
    }

    /// Number of times `create` was called.
    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    async fn create(&self) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(SandboxError::provision_failed("mock create failure"));
        }
        Ok(Box::new(self.template.clone()))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        if self.stale_ids.iter().any(|id| id == sandbox_id) {
            return Err(SandboxError::stale_handle(sandbox_id));
        }
        let mut handle = self.template.clone();
        handle.id = sandbox_id.to_string();
        Ok(Box::new(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_cycles_responses() {
        let sandbox = MockSandbox::new(
            "sbx-1",
            vec![
                MockExec::Success("one".to_string()),
                MockExec::Failure {
                    exit_code: 2,
                    stderr: "bad".to_string(),
                },
            ],
        );

        let timeout = Duration::from_secs(1);
        let first = sandbox.exec("a", timeout).await.unwrap();
        assert!(first.success());
        assert_eq!(first.stdout, "one");

        let second = sandbox.exec("b", timeout).await.unwrap();
        assert_eq!(second.exit_code, 2);

        // Cycles back to the first response.
        let third = sandbox.exec("c", timeout).await.unwrap();
        assert_eq!(third.stdout, "one");

        assert_eq!(sandbox.exec_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_timeout_response() {
        let sandbox = MockSandbox::new("sbx-1", vec![MockExec::Timeout]);
        let err = sandbox
            .exec("git clone", Duration::from_secs(300))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_mock_exposed_ports() {
        let sandbox =
            MockSandbox::always_succeed("sbx-1").with_exposed_port(3000, "http://127.0.0.1:49152");
        assert_eq!(
            sandbox.expose_port(3000).await.unwrap().as_deref(),
            Some("http://127.0.0.1:49152")
        );
        assert_eq!(sandbox.expose_port(5173).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_provider_stale_connect() {
        let provider =
            MockProvider::new(MockSandbox::always_succeed("sbx-1")).with_stale_ids(&["sbx-gone"]);
        assert!(provider.connect("sbx-1").await.is_ok());
        let err = provider.connect("sbx-gone").await.err().unwrap();
        assert!(err.is_stale_handle());
    }

    #[tokio::test]
    async fn test_provider_shares_template_state() {
        let template = MockSandbox::always_succeed("sbx-1");
        let provider = MockProvider::new(template.clone());

        let handle = provider.create().await.unwrap();
        handle.exec("ls", Duration::from_secs(1)).await.unwrap();

        assert_eq!(provider.create_count(), 1);
        assert_eq!(template.exec_count(), 1);
    }
}
