use anyhow::Result;
use tracing::info;

use otapush_state::SettingsStore;

/// Performs the actual process restart. The gate decides *whether* a
/// restart may happen now; the host decides *how*.
pub trait RestartHandler {
    fn restart(&mut self) -> Result<()>;
}

/// Serializes restart requests: restarts can be temporarily disallowed
/// (e.g. while the host shows a critical flow), and requests made in the
/// meantime queue up and replay in order once re-allowed. A conditional
/// request (`only_if_update_is_pending`) fires only when a pending update
/// is actually waiting for a restart to apply.
pub struct RestartGate<H> {
    settings: SettingsStore,
    handler: H,
    allowed: bool,
    restart_in_progress: bool,
    queue: Vec<bool>,
}

impl<H: RestartHandler> RestartGate<H> {
    pub fn new(settings: SettingsStore, handler: H) -> Self {
        Self {
            settings,
            handler,
            allowed: true,
            restart_in_progress: false,
            queue: Vec::new(),
        }
    }

    pub fn allow(&mut self, instance: &str) -> Result<()> {
        info!("re-allowing restarts");
        self.allowed = true;

        if !self.queue.is_empty() {
            info!("executing pending restart");
            let next = self.queue.remove(0);
            self.restart_app(next, instance)?;
        }
        Ok(())
    }

    pub fn disallow(&mut self) {
        info!("disallowing restarts");
        self.allowed = false;
    }

    pub fn clear_pending_restarts(&mut self) {
        self.queue.clear();
    }

    /// Returns true when the handler restarted the app. A request that
    /// cannot run now (restart in progress, or restarts disallowed) is
    /// queued; a conditional request without a pending update is dropped
    /// and the next queued request runs instead.
    pub fn restart_app(&mut self, only_if_update_is_pending: bool, instance: &str) -> Result<bool> {
        if self.restart_in_progress {
            info!("restart request queued until the current restart is completed");
            self.queue.push(only_if_update_is_pending);
            return Ok(false);
        }
        if !self.allowed {
            info!("restart request queued until restarts are re-allowed");
            self.queue.push(only_if_update_is_pending);
            return Ok(false);
        }

        self.restart_in_progress = true;
        if !only_if_update_is_pending || self.settings.is_pending_update(None, instance)? {
            self.handler.restart()?;
            info!("restarting app");
            // Leave the in-progress flag set: the process is going away,
            // and any requests racing in behind this one should queue.
            return Ok(true);
        }

        self.restart_in_progress = false;
        if !self.queue.is_empty() {
            let next = self.queue.remove(0);
            return self.restart_app(next, instance);
        }
        Ok(false)
    }
}
