//! UI artifact collaborator contract.
//!
//! Artifact creation is asynchronous on the host side: the host returns a
//! one-shot channel and sends exactly one completion when the artifact is
//! up. The interpreter waits on that channel with a hard timeout so a
//! stuck host cannot hang the script thread forever.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;

use smol_str::SmolStr;

use crate::db::HostResult;
use crate::Value;

/// How long the script thread waits for artifact creation.
pub const CREATE_TIMEOUT: Duration = Duration::from_secs(10);

pub trait UiHost: Send + Sync {
    /// Begin creating an artifact. The host must send exactly one
    /// completion on the returned channel, from whatever thread it uses.
    fn create_artifact(&self, name: &SmolStr, spec: &str) -> Receiver<HostResult<()>>;

    fn set_property(&self, artifact: &str, property: &str, value: &Value) -> HostResult<()>;

    fn get_property(&self, artifact: &str, property: &str) -> HostResult<Value>;
}

/// Wait for a creation completion. Timeout and a dropped sender both come
/// back as recoverable errors, not panics.
pub fn await_artifact(rx: Receiver<HostResult<()>>, timeout: Duration) -> HostResult<()> {
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(format!(
            "Artifact creation timed out after {} seconds.",
            timeout.as_secs()
        )),
        Err(RecvTimeoutError::Disconnected) => {
            Err("Artifact creation was interrupted.".to_string())
        }
    }
}

/// Host used when no UI is wired. Creation completes immediately;
/// property access fails.
#[derive(Debug, Default)]
pub struct NoopUiHost;

impl UiHost for NoopUiHost {
    fn create_artifact(&self, _name: &SmolStr, _spec: &str) -> Receiver<HostResult<()>> {
        let (tx, rx) = channel();
        let _ = tx.send(Ok(()));
        rx
    }

    fn set_property(&self, artifact: &str, _property: &str, _value: &Value) -> HostResult<()> {
        Err(format!("No UI host configured for artifact '{}'.", artifact))
    }

    fn get_property(&self, artifact: &str, _property: &str) -> HostResult<Value> {
        Err(format!("No UI host configured for artifact '{}'.", artifact))
    }
}
