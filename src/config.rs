//! Runtime settings that operators can change while the service is running.

use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_AUTO_REFUND_MINUTES: u32 = 30;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub auto_refund_enabled: bool,
    pub auto_refund_timeout_minutes: u32,
    /// When off, success/failure notifications produced by transitions are
    /// suppressed. Operator notifications are always delivered.
    pub auto_notifications_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_refund_enabled: true,
            auto_refund_timeout_minutes: DEFAULT_AUTO_REFUND_MINUTES,
            auto_notifications_enabled: true,
        }
    }
}

impl Settings {
    /// Refund timeout in milliseconds. A zero timeout falls back to the default.
    pub fn auto_refund_timeout_ms(&self) -> i64 {
        let minutes = match self.auto_refund_timeout_minutes {
            0 => DEFAULT_AUTO_REFUND_MINUTES,
            m => m,
        };
        i64::from(minutes) * 60_000
    }
}

/// Hot-reloadable settings shared by every component.
///
/// Readers always observe the latest published value.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: watch::Sender<Settings>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { tx }
    }

    pub fn current(&self) -> Settings {
        *self.tx.borrow()
    }

    pub fn update(&self, apply: impl FnOnce(&mut Settings)) {
        self.tx.send_modify(apply);
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
