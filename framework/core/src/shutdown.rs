use std::sync::Arc;

use tokio::sync::watch;

/// Broadcasts the run-wide stop signal.
///
/// Cloned freely; every clone controls the same signal. Firing it is idempotent and listeners
/// created after the fact still observe it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(watch::channel(false).0),
        }
    }

    pub fn shutdown(&self) {
        self.sender.send_replace(true);
        log::debug!("Shutdown signal raised");
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }
}

/// One observer of the stop signal. Virtual users poll it between iterations; orchestration
/// loops await it.
#[derive(Debug, Clone)]
pub struct DelegatedShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl DelegatedShutdownListener {
    /// Point-in-time check. Once this returns true, work should stop so the run can wind down.
    pub fn should_shutdown(&mut self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when the signal fires. Safe to race against other futures; a dropped
    /// [`ShutdownHandle`] counts as a shutdown.
    pub async fn wait_for_shutdown(&mut self) {
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listeners_observe_the_signal() {
        let handle = ShutdownHandle::new();
        let mut before = handle.new_listener();
        assert!(!before.should_shutdown());

        handle.shutdown();

        let mut after = handle.new_listener();
        assert!(before.should_shutdown());
        assert!(after.should_shutdown());
        before.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn dropped_handle_releases_waiters() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        drop(handle);
        // Must not hang.
        listener.wait_for_shutdown().await;
    }
}
