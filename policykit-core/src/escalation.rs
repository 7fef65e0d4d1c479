//! Privileged escalation to a settings screen the regular UI cannot open.
//!
//! The flow is `Idle -> CommandDispatched -> OverlayShown -> Idle`. The
//! command is fired through the privileged channel on a worker thread with a
//! bounded wait; what the command does on the device is never observed. A
//! dispatch that times out is cancelled and never writes. The overlay is then shown
//! unconditionally and stays until the user dismisses it.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::{PolicyError, PolicyResult};
use crate::platform::{
    OverlayHandle, OverlayPermission, OverlaySpec, OverlaySurface, PrivilegedExecutionChannel,
};

/// Where the escalation flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum EscalationState {
    /// No escalation in progress.
    Idle,
    /// The command is being written to the privileged channel.
    CommandDispatched,
    /// The overlay is on screen.
    OverlayShown {
        /// Live overlay.
        handle: OverlayHandle,
    },
}

/// Serialises escalation attempts; at most one overlay is ever live.
pub struct EscalationOrchestrator {
    command: String,
    dispatch_timeout: Duration,
    dismiss_label: String,
    state: Mutex<EscalationState>,
}

impl EscalationOrchestrator {
    /// Creates an idle orchestrator that dispatches `command`.
    #[must_use]
    pub fn new(command: &str, dispatch_timeout: Duration, dismiss_label: &str) -> Self {
        Self {
            command: command.to_string(),
            dispatch_timeout,
            dismiss_label: dismiss_label.to_string(),
            state: Mutex::new(EscalationState::Idle),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EscalationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EscalationState {
        *self.lock_state()
    }

    /// Runs the escalation flow and returns the live overlay.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::AlreadyEscalating`] unless idle; nothing is dispatched.
    /// - [`PolicyError::EscalationDenied`] if the channel is unavailable, the
    ///   write fails or the dispatch exceeds the timeout.
    /// - [`PolicyError::OverlayPermissionMissing`] if the overlay could not be
    ///   shown for lack of permission (a grant request has been issued).
    /// - [`PolicyError::OverlayUnavailable`] if the overlay failed otherwise.
    ///
    /// Every error leaves the orchestrator idle.
    pub fn escalate(
        &self,
        channel: &Arc<dyn PrivilegedExecutionChannel>,
        overlay: &Arc<dyn OverlaySurface>,
        permission: &Arc<dyn OverlayPermission>,
    ) -> PolicyResult<OverlayHandle> {
        {
            let mut state = self.lock_state();
            if *state != EscalationState::Idle {
                log::warn!("escalation rejected, state {:?}", *state);
                return Err(PolicyError::AlreadyEscalating);
            }
            *state = EscalationState::CommandDispatched;
        }

        if let Err(err) = self.dispatch(channel) {
            log::warn!("privileged dispatch failed: {err}");
            *self.lock_state() = EscalationState::Idle;
            return Err(err);
        }

        let permitted = permission.can_draw_overlays();
        if !permitted {
            log::info!("overlay permission missing, requesting grant");
            permission.request_overlay_permission();
        }

        match overlay.show(self.overlay_spec()) {
            Ok(handle) => {
                *self.lock_state() = EscalationState::OverlayShown { handle };
                log::info!("escalation overlay {handle} shown");
                Ok(handle)
            }
            Err(err) => {
                *self.lock_state() = EscalationState::Idle;
                log::warn!("overlay not shown: {err}");
                if permitted {
                    Err(PolicyError::OverlayUnavailable(err.to_string()))
                } else {
                    Err(PolicyError::OverlayPermissionMissing)
                }
            }
        }
    }

    /// Tears down the live overlay after the user pressed its dismiss control.
    ///
    /// Does nothing when no overlay is shown.
    pub fn dismiss(&self, overlay: &Arc<dyn OverlaySurface>) {
        let mut state = self.lock_state();
        if let EscalationState::OverlayShown { handle } = *state {
            if let Err(err) = overlay.dismiss(handle) {
                log::warn!("overlay {handle} removal failed: {err}");
            }
            *state = EscalationState::Idle;
            log::debug!("escalation overlay {handle} dismissed");
        }
    }

    fn overlay_spec(&self) -> OverlaySpec {
        OverlaySpec {
            full_screen: true,
            focusable: false,
            translucent: true,
            dismiss_label: self.dismiss_label.clone(),
        }
    }

    /// Writes the command on a worker thread, waiting at most the dispatch timeout.
    ///
    /// A worker that outlives the timeout is cancelled: it closes its session
    /// without writing, so a denied escalation never fires the command later.
    fn dispatch(&self, channel: &Arc<dyn PrivilegedExecutionChannel>) -> PolicyResult<()> {
        let channel = Arc::clone(channel);
        let command = self.command.clone();
        let phase = Arc::new(Mutex::new(DispatchPhase::Pending));
        let worker_phase = Arc::clone(&phase);
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("policykit-escalation".to_string())
            .spawn(move || {
                let _ = tx.send(fire(channel.as_ref(), command, &worker_phase));
            })
            .map_err(|err| PolicyError::EscalationDenied(err.to_string()))?;

        match rx.recv_timeout(self.dispatch_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let mut phase = phase.lock().unwrap_or_else(PoisonError::into_inner);
                if *phase == DispatchPhase::Written {
                    log::debug!("command written, session close still pending");
                    return Ok(());
                }
                *phase = DispatchPhase::Cancelled;
                Err(PolicyError::EscalationDenied(format!(
                    "dispatch timed out after {} ms",
                    self.dispatch_timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PolicyError::EscalationDenied(
                "dispatch worker exited".to_string(),
            )),
        }
    }
}

/// Progress of one dispatch, shared between the caller and its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchPhase {
    Pending,
    Written,
    Cancelled,
}

fn fire(
    channel: &dyn PrivilegedExecutionChannel,
    command: String,
    phase: &Mutex<DispatchPhase>,
) -> PolicyResult<()> {
    let denied = |err: crate::error::PlatformError| PolicyError::EscalationDenied(err.to_string());
    let session = channel.open().map_err(denied)?;
    {
        // Held across the write so the caller cannot time out mid-write.
        let mut phase = phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == DispatchPhase::Cancelled {
            log::info!("dispatch cancelled after timeout, command not written");
            if let Err(err) = session.close() {
                log::debug!("cancelled session close failed: {err}");
            }
            return Err(PolicyError::EscalationDenied(
                "dispatch cancelled".to_string(),
            ));
        }
        session.write_command(command).map_err(denied)?;
        *phase = DispatchPhase::Written;
    }
    session.close().map_err(denied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryPlatform;

    const COMMAND: &str = "am start -n com.android.settings/.Settings$IccLockSettingsActivity";

    struct Fixture {
        platform: MemoryPlatform,
        channel: Arc<dyn PrivilegedExecutionChannel>,
        overlay: Arc<dyn OverlaySurface>,
        permission: Arc<dyn OverlayPermission>,
        orchestrator: EscalationOrchestrator,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let platform = MemoryPlatform::new();
        Fixture {
            channel: platform.channel.clone(),
            overlay: platform.overlay.clone(),
            permission: platform.permission.clone(),
            orchestrator: EscalationOrchestrator::new(COMMAND, timeout, "Close"),
            platform,
        }
    }

    impl Fixture {
        fn escalate(&self) -> PolicyResult<OverlayHandle> {
            self.orchestrator
                .escalate(&self.channel, &self.overlay, &self.permission)
        }
    }

    #[test]
    fn escalation_dispatches_then_shows_overlay() {
        let f = fixture(Duration::from_secs(2));
        let handle = f.escalate().unwrap();

        assert_eq!(f.platform.channel.commands(), vec![COMMAND.to_string()]);
        assert_eq!(f.platform.overlay.live(), vec![handle]);
        assert_eq!(
            f.orchestrator.state(),
            EscalationState::OverlayShown { handle }
        );
        let spec = f.platform.overlay.last_spec().unwrap();
        assert!(spec.full_screen && spec.translucent && !spec.focusable);
    }

    #[test]
    fn second_escalation_is_rejected_while_overlay_live() {
        let f = fixture(Duration::from_secs(2));
        f.escalate().unwrap();

        let err = f.escalate().unwrap_err();

        assert!(matches!(err, PolicyError::AlreadyEscalating));
        assert_eq!(f.platform.overlay.live().len(), 1);
        assert_eq!(f.platform.channel.commands().len(), 1);
    }

    #[test]
    fn dismiss_returns_to_idle_and_allows_another_escalation() {
        let f = fixture(Duration::from_secs(2));
        f.escalate().unwrap();
        f.orchestrator.dismiss(&f.overlay);

        assert_eq!(f.orchestrator.state(), EscalationState::Idle);
        assert!(f.platform.overlay.live().is_empty());
        f.escalate().unwrap();
    }

    #[test]
    fn dismiss_without_overlay_is_a_no_op() {
        let f = fixture(Duration::from_secs(2));
        f.orchestrator.dismiss(&f.overlay);
        assert_eq!(f.orchestrator.state(), EscalationState::Idle);
    }

    #[test]
    fn unavailable_channel_is_denied_without_overlay() {
        let f = fixture(Duration::from_secs(2));
        f.platform.channel.set_available(false);

        let err = f.escalate().unwrap_err();

        assert!(matches!(err, PolicyError::EscalationDenied(_)));
        assert!(f.platform.overlay.live().is_empty());
        assert_eq!(f.orchestrator.state(), EscalationState::Idle);
    }

    #[test]
    fn slow_channel_times_out() {
        let f = fixture(Duration::from_millis(20));
        f.platform
            .channel
            .set_open_delay(Some(Duration::from_millis(500)));

        let err = f.escalate().unwrap_err();

        assert!(matches!(err, PolicyError::EscalationDenied(ref m) if m.contains("timed out")));
        assert_eq!(f.orchestrator.state(), EscalationState::Idle);
    }

    #[test]
    fn timed_out_dispatch_never_writes_later() {
        let f = fixture(Duration::from_millis(20));
        f.platform
            .channel
            .set_open_delay(Some(Duration::from_millis(200)));

        assert!(matches!(f.escalate(), Err(PolicyError::EscalationDenied(_))));
        assert!(matches!(f.escalate(), Err(PolicyError::EscalationDenied(_))));
        thread::sleep(Duration::from_millis(600));

        assert!(f.platform.channel.commands().is_empty());
        assert!(f.platform.overlay.live().is_empty());

        f.platform.channel.set_open_delay(None);
        f.escalate().unwrap();
        assert_eq!(f.platform.channel.commands(), vec![COMMAND.to_string()]);
    }

    #[test]
    fn missing_permission_requests_grant_and_reports() {
        let f = fixture(Duration::from_secs(2));
        f.platform.permission.set_granted(false);

        let err = f.escalate().unwrap_err();

        assert!(matches!(err, PolicyError::OverlayPermissionMissing));
        assert_eq!(f.platform.permission.requests(), 1);
        assert_eq!(f.platform.channel.commands().len(), 1);
        assert_eq!(f.orchestrator.state(), EscalationState::Idle);
    }

    #[test]
    fn overlay_failure_with_permission_is_unavailable() {
        let f = fixture(Duration::from_secs(2));
        f.platform.overlay.set_failing(true);

        let err = f.escalate().unwrap_err();

        assert!(matches!(err, PolicyError::OverlayUnavailable(_)));
        assert_eq!(f.platform.permission.requests(), 0);
    }
}
