//! The systemd transport the activator drives: a trait so the activation
//! pipeline can be exercised without a real systemd instance.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{EngineError, Result};

#[async_trait]
pub trait SystemdManager: Send + Sync {
    async fn reload_daemon(&self) -> Result<()>;
    async fn start_unit(&self, name: &str) -> Result<()>;
    async fn stop_unit(&self, name: &str) -> Result<()>;
    async fn restart_unit(&self, name: &str) -> Result<()>;
    async fn reload_unit(&self, name: &str) -> Result<()>;
}

/// Shells out to `systemctl`. A job is successful only if its terminal
/// status, reported on stdout/stderr by `systemctl`'s own exit code, is
/// `"done"`; any non-zero exit is reported as `SystemdJobFailed`.
#[derive(Debug, Clone, Default)]
pub struct SystemctlManager;

impl SystemctlManager {
    async fn run(&self, verb: &str, args: &[&str]) -> Result<()> {
        let output = tokio::process::Command::new("systemctl")
            .arg(verb)
            .args(args)
            .output()
            .await?;
        if output.status.success() {
            return Ok(());
        }
        Err(EngineError::SystemdJobFailed {
            unit: args.first().unwrap_or(&"").to_string(),
            verb: verb.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl SystemdManager for SystemctlManager {
    async fn reload_daemon(&self) -> Result<()> {
        self.run("daemon-reload", &[]).await
    }

    async fn start_unit(&self, name: &str) -> Result<()> {
        self.run("start", &[name]).await
    }

    async fn stop_unit(&self, name: &str) -> Result<()> {
        self.run("stop", &[name]).await
    }

    async fn restart_unit(&self, name: &str) -> Result<()> {
        self.run("restart", &[name]).await
    }

    async fn reload_unit(&self, name: &str) -> Result<()> {
        self.run("reload", &[name]).await
    }
}

/// Records every invocation as `"<verb>:<unit>"` (or bare `"daemon-reload"`)
/// into a shared ordered log, for asserting pipeline ordering in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingSystemdManager {
    pub log: Arc<Mutex<Vec<String>>>,
}

impl RecordingSystemdManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, entry: String) {
        self.log.lock().expect("log mutex poisoned").push(entry);
    }
}

#[async_trait]
impl SystemdManager for RecordingSystemdManager {
    async fn reload_daemon(&self) -> Result<()> {
        self.record("daemon-reload".to_string());
        Ok(())
    }

    async fn start_unit(&self, name: &str) -> Result<()> {
        self.record(format!("start:{name}"));
        Ok(())
    }

    async fn stop_unit(&self, name: &str) -> Result<()> {
        self.record(format!("stop:{name}"));
        Ok(())
    }

    async fn restart_unit(&self, name: &str) -> Result<()> {
        self.record(format!("restart:{name}"));
        Ok(())
    }

    async fn reload_unit(&self, name: &str) -> Result<()> {
        self.record(format!("reload:{name}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_manager_logs_in_call_order() {
        let mgr = RecordingSystemdManager::new();
        mgr.stop_unit("a.service").await.unwrap();
        mgr.reload_daemon().await.unwrap();
        mgr.start_unit("b.service").await.unwrap();

        let log = mgr.log.lock().unwrap().clone();
        assert_eq!(log, vec!["stop:a.service", "daemon-reload", "start:b.service"]);
    }
}
