//! Remote settings reconciliation
//!
//! The device exposes exactly one remotely tunable value: the loop delay in
//! seconds. Updates arrive on the transport's context and are funneled
//! through an mpsc channel into [`run_settings_service`], which validates
//! them against [`SettingsReconciler`] and reports the outcome upstream.
//!
//! The live value sits in an `AtomicU32` shared with the work loop via
//! [`SettingsHandle`]; an accepted change additionally fires a wake signal so
//! an in-progress sleep is cut short and the new delay takes effect on the
//! very next cycle.

use crate::protocol::{SettingReport, SettingStatus, SettingUpdate};
use crate::transport::Transport;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// The one setting key this device recognizes
pub const LOOP_DELAY_KEY: &str = "LOOP_DELAY_S";
/// Minimum accepted loop delay, seconds
pub const LOOP_DELAY_MIN_S: u32 = 1;
/// Maximum accepted loop delay, seconds (12 hours)
pub const LOOP_DELAY_MAX_S: u32 = 43_200;
/// Initial loop delay before any remote update
pub const LOOP_DELAY_DEFAULT_S: u32 = 5;

struct Shared {
    // Single-word value; no ordering dependency with other state
    loop_delay_s: AtomicU32,
    wake: Notify,
}

/// How one interruptible sleep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full configured delay elapsed
    Elapsed,
    /// A settings change preempted the sleep
    Woken,
}

/// Shared view of the loop delay plus the wake signal
///
/// Cloned freely; all clones observe the same value. The work loop reads the
/// delay once per cycle at sleep time, the reconciler is the only writer.
#[derive(Clone)]
pub struct SettingsHandle {
    shared: Arc<Shared>,
}

impl SettingsHandle {
    pub fn new(initial_delay_s: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                loop_delay_s: AtomicU32::new(initial_delay_s),
                wake: Notify::new(),
            }),
        }
    }

    pub fn loop_delay_secs(&self) -> u32 {
        self.shared.loop_delay_s.load(Ordering::Relaxed)
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.loop_delay_secs()))
    }

    /// Sleep for the currently configured delay, or until a wake arrives.
    ///
    /// A wake fired while nobody was sleeping leaves a stored permit, so the
    /// next call returns immediately; either way the changed delay governs
    /// the next cycle, never a stale remainder.
    pub async fn sleep_one_cycle(&self) -> SleepOutcome {
        let delay = self.loop_delay();
        tokio::select! {
            _ = self.shared.wake.notified() => SleepOutcome::Woken,
            _ = tokio::time::sleep(delay) => SleepOutcome::Elapsed,
        }
    }

    fn store_delay(&self, delay_s: u32) -> u32 {
        self.shared.loop_delay_s.swap(delay_s, Ordering::Relaxed)
    }

    fn wake_sleeper(&self) {
        self.shared.wake.notify_one();
    }
}

/// Validates remote setting updates and applies accepted ones
pub struct SettingsReconciler {
    handle: SettingsHandle,
}

impl SettingsReconciler {
    pub fn new(handle: SettingsHandle) -> Self {
        Self { handle }
    }

    /// Apply one remote update, returning the report for the remote caller.
    ///
    /// Rejections never mutate local state; an idempotent same-value update
    /// is accepted without firing the wake signal.
    pub fn apply(&self, update: &SettingUpdate) -> SettingReport {
        if update.key != LOOP_DELAY_KEY {
            debug!(key = %update.key, "rejecting unrecognized setting key");
            return SettingReport::with_message(
                &update.key,
                SettingStatus::KeyNotRecognized,
                "unrecognized setting key",
            );
        }

        let value = match update.value.as_i64() {
            Some(v) => v,
            // A u64 beyond i64 is still an integer, just absurdly large
            None if update.value.is_u64() => {
                return self.reject_out_of_range();
            }
            None => {
                debug!(value = %update.value, "rejecting non-integer loop delay");
                return SettingReport::with_message(
                    LOOP_DELAY_KEY,
                    SettingStatus::FormatInvalid,
                    "expected an integer value",
                );
            }
        };

        if value < i64::from(LOOP_DELAY_MIN_S) || value > i64::from(LOOP_DELAY_MAX_S) {
            return self.reject_out_of_range();
        }
        let value = value as u32;

        if value == self.handle.loop_delay_secs() {
            debug!(delay_s = value, "loop delay unchanged, no wake");
            return SettingReport::new(LOOP_DELAY_KEY, SettingStatus::Success);
        }

        let previous = self.handle.store_delay(value);
        info!(
            previous_s = previous,
            delay_s = value,
            "loop delay updated, waking work loop"
        );
        self.handle.wake_sleeper();
        SettingReport::new(LOOP_DELAY_KEY, SettingStatus::Success)
    }

    fn reject_out_of_range(&self) -> SettingReport {
        SettingReport::with_message(
            LOOP_DELAY_KEY,
            SettingStatus::OutOfRange,
            format!("value must be within [{LOOP_DELAY_MIN_S}, {LOOP_DELAY_MAX_S}] seconds"),
        )
    }
}

/// Drain setting updates from the transport and report each outcome upstream.
///
/// Runs until the transport drops its sender side. Report publish failures
/// are logged and skipped; the applied state is already committed locally.
pub async fn run_settings_service<T: Transport>(
    mut updates: mpsc::Receiver<SettingUpdate>,
    reconciler: SettingsReconciler,
    transport: Arc<T>,
) {
    while let Some(update) = updates.recv().await {
        let report = reconciler.apply(&update);
        if let Err(e) = transport.publish_settings_status(&report).await {
            warn!(key = %report.key, error = %e, "failed to report setting outcome");
        }
    }
    debug!("settings channel closed, reconciler service stopping");
}
