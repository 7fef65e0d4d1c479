//! The policy state machine: managed-mode transitions and gated device actions.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::config::PolicyConfig;
use crate::credential::CredentialResetManager;
use crate::error::{ErrorKind, PolicyError, PolicyResult};
use crate::escalation::{EscalationOrchestrator, EscalationState};
use crate::kiosk::KioskController;
use crate::platform::{
    DevicePolicySurface, OverlayPermission, OverlaySurface, PlatformProvider,
    PrivilegedExecutionChannel, SecureRandomSource,
};
use crate::restrictions::{RestrictionRegistry, RestrictionSet};

/// Whether the managed policy set is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ManagedModeState {
    /// No restrictions, no kiosk pinning, no preferred home.
    Unmanaged,
    /// Restrictions applied and the agent pinned as home.
    Managed,
}

/// A request from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum AgentCommand {
    /// Transition to [`ManagedModeState::Managed`].
    EnableManagedMode,
    /// Transition to [`ManagedModeState::Unmanaged`].
    DisableManagedMode,
    /// Lock the screen now.
    LockNow,
    /// Reset the device credential. `None` uses the configured fixed credential.
    ResetCredential {
        /// Replacement credential.
        new_credential: Option<String>,
    },
    /// Open the restricted settings screen through the privileged channel.
    EscalateToRestrictedSurface,
    /// The user dismissed the escalation overlay.
    DismissOverlay,
}

/// Display-ready result of an [`AgentCommand`].
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum ActionOutcome {
    /// The action took effect.
    Completed {
        /// Confirmation for the user.
        message: String,
    },
    /// The action was refused or failed; the device is still operable.
    Failed {
        /// Error category.
        kind: ErrorKind,
        /// Error description.
        message: String,
    },
}

impl ActionOutcome {
    fn from_result(result: PolicyResult<String>) -> Self {
        match result {
            Ok(message) => Self::Completed { message },
            Err(err) => Self::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Device-owner agent composing restrictions, kiosk pinning, credential reset
/// and escalation.
///
/// The device-owner flag is polled once, by [`PolicyAgent::start`] or on the
/// first transition. Admin-active status is checked on every gated action.
#[derive(uniffi::Object)]
pub struct PolicyAgent {
    config: PolicyConfig,
    policy: Arc<dyn DevicePolicySurface>,
    random: Arc<dyn SecureRandomSource>,
    privileged: Arc<dyn PrivilegedExecutionChannel>,
    overlay: Arc<dyn OverlaySurface>,
    overlay_permission: Arc<dyn OverlayPermission>,
    restrictions: RestrictionRegistry,
    kiosk: KioskController,
    credentials: CredentialResetManager,
    escalation: EscalationOrchestrator,
    device_owner: OnceLock<bool>,
    state: Mutex<ManagedModeState>,
}

#[uniffi::export]
impl PolicyAgent {
    /// Creates an agent in [`ManagedModeState::Unmanaged`]. No OS call is made.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidConfig`] if `config` does not validate.
    #[uniffi::constructor]
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: PolicyConfig, platform: Arc<dyn PlatformProvider>) -> PolicyResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            restrictions: RestrictionRegistry::new(
                RestrictionSet::new(&config.restrictions),
                config.restriction_failure_mode,
            ),
            kiosk: KioskController::new(&config.package_name, &config.launcher_activity),
            credentials: CredentialResetManager::new(),
            escalation: EscalationOrchestrator::new(
                &config.escalation_command,
                config.dispatch_timeout(),
                &config.overlay_dismiss_label,
            ),
            policy: platform.policy(),
            random: platform.random(),
            privileged: platform.privileged(),
            overlay: platform.overlay(),
            overlay_permission: platform.overlay_permission(),
            device_owner: OnceLock::new(),
            state: Mutex::new(ManagedModeState::Unmanaged),
            config,
        }))
    }

    /// Startup: polls device-owner status and, if owner, enters managed mode.
    ///
    /// # Errors
    ///
    /// Returns the transition error if entering managed mode fails.
    pub fn start(&self) -> PolicyResult<ManagedModeState> {
        if self.is_device_owner() {
            log::info!("device owner, entering managed mode");
            self.transition(ManagedModeState::Managed)?;
        } else {
            log::info!("not device owner, staying unmanaged");
        }
        Ok(self.state())
    }

    /// Cached device-owner status.
    pub fn is_device_owner(&self) -> bool {
        *self
            .device_owner
            .get_or_init(|| self.policy.is_device_owner())
    }

    /// Current managed-mode state.
    pub fn state(&self) -> ManagedModeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current escalation state.
    pub fn escalation_state(&self) -> EscalationState {
        self.escalation.state()
    }

    /// Moves the device to `target`.
    ///
    /// Every step is idempotent, so the full sequence is always applied and a
    /// retry after a failure converges on the same end state. Leaving managed
    /// mode runs the steps in reverse: kiosk unpinned first, restrictions
    /// cleared last.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::NotDeviceOwner`] with no mutation.
    /// - [`PolicyError::TransitionFailed`] naming the failing step; the cached
    ///   state is left unchanged and the steps already applied are undone.
    pub fn transition(&self, target: ManagedModeState) -> PolicyResult<()> {
        if !self.is_device_owner() {
            return Err(PolicyError::NotDeviceOwner);
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.run_steps(*state, target);

        match result {
            Ok(()) => {
                log::info!("managed mode {:?} -> {target:?}", *state);
                *state = target;
                Ok(())
            }
            Err(err) => {
                log::error!("transition to {target:?} failed: {err}");
                Err(err)
            }
        }
    }

    /// Locks the screen immediately.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::AdminNotActive`] if the admin is inactive; no lock is
    ///   attempted.
    /// - [`PolicyError::LockRefused`] if the OS refuses the lock.
    pub fn lock_now(&self) -> PolicyResult<()> {
        if !self.policy.is_admin_active() {
            log::warn!("lock requested without active admin");
            return Err(PolicyError::AdminNotActive);
        }
        self.policy.lock_now().map_err(|err| {
            log::warn!("lock refused: {err}");
            PolicyError::LockRefused(err.to_string())
        })
    }

    /// Resets the device credential to `new_credential`.
    ///
    /// # Errors
    ///
    /// See [`CredentialResetManager::reset_credential`].
    #[allow(clippy::needless_pass_by_value)]
    pub fn reset_credential(&self, new_credential: String) -> PolicyResult<()> {
        self.credentials
            .reset_credential(&self.policy, &self.random, &new_credential)
    }

    /// Resets the device credential to the configured fixed credential.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidConfig`] when none is configured, otherwise
    /// see [`CredentialResetManager::reset_credential`].
    pub fn reset_to_fixed_credential(&self) -> PolicyResult<()> {
        let credential = self.fixed_credential()?;
        self.reset_credential(credential)
    }

    /// Dispatches the privileged command and shows the overlay.
    ///
    /// # Errors
    ///
    /// See [`EscalationOrchestrator::escalate`].
    pub fn escalate(&self) -> PolicyResult<()> {
        self.escalation
            .escalate(&self.privileged, &self.overlay, &self.overlay_permission)
            .map(|_| ())
    }

    /// Called when the user activates the overlay's dismiss control.
    pub fn dismiss_overlay(&self) {
        self.escalation.dismiss(&self.overlay);
    }

    /// Runs `command` and reports a display-ready outcome.
    pub fn execute(&self, command: AgentCommand) -> ActionOutcome {
        let result = match command {
            AgentCommand::EnableManagedMode => self
                .transition(ManagedModeState::Managed)
                .map(|()| "managed mode enabled".to_string()),
            AgentCommand::DisableManagedMode => self
                .transition(ManagedModeState::Unmanaged)
                .map(|()| "managed mode disabled".to_string()),
            AgentCommand::LockNow => self.lock_now().map(|()| "device locked".to_string()),
            AgentCommand::ResetCredential { new_credential } => new_credential
                .map_or_else(|| self.fixed_credential(), Ok)
                .and_then(|credential| {
                    self.reset_credential(credential.clone())
                        .map(|()| format!("credential changed to: {credential}"))
                }),
            AgentCommand::EscalateToRestrictedSurface => self
                .escalate()
                .map(|()| "restricted settings requested".to_string()),
            AgentCommand::DismissOverlay => {
                self.dismiss_overlay();
                Ok("overlay dismissed".to_string())
            }
        };
        ActionOutcome::from_result(result)
    }
}

impl PolicyAgent {
    /// The configuration the agent was created with.
    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    fn fixed_credential(&self) -> PolicyResult<String> {
        self.config.fixed_reset_credential.clone().ok_or_else(|| {
            PolicyError::InvalidConfig("fixed_reset_credential is not set".to_string())
        })
    }

    /// Applies every step towards `target` in order. If a step fails and the
    /// device was in the other mode, the completed steps are undone in reverse.
    fn run_steps(&self, previous: ManagedModeState, target: ManagedModeState) -> PolicyResult<()> {
        let active = target == ManagedModeState::Managed;
        let mut order = ManagedStep::ENTER_ORDER;
        if !active {
            order.reverse();
        }

        for (done, step) in order.iter().enumerate() {
            if let Err(err) = self.apply_step(*step, active) {
                if previous != target {
                    for undo in order[..done].iter().rev() {
                        if let Err(undo_err) = self.apply_step(*undo, !active) {
                            log::error!("undo of {undo:?} failed: {undo_err}");
                        }
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn apply_step(&self, step: ManagedStep, active: bool) -> PolicyResult<()> {
        match step {
            ManagedStep::Restrictions => self.restrictions.apply_all(&self.policy, active),
            ManagedStep::Keyguard => self
                .policy
                .set_keyguard_disabled(active)
                .map_err(|err| PolicyError::transition("keyguard", &err)),
            ManagedStep::StatusBar => self
                .policy
                .set_status_bar_disabled(active)
                .map_err(|err| PolicyError::transition("status_bar", &err)),
            ManagedStep::SystemUpdatePolicy => self
                .policy
                .set_system_update_policy(active.then_some(self.config.system_update_window))
                .map_err(|err| PolicyError::transition("system_update_policy", &err)),
            ManagedStep::Kiosk => self.kiosk.set_pinning(&self.policy, active),
        }
    }
}

/// One unit of a managed-mode transition.
#[derive(Debug, Clone, Copy)]
enum ManagedStep {
    Restrictions,
    Keyguard,
    StatusBar,
    SystemUpdatePolicy,
    Kiosk,
}

impl ManagedStep {
    /// Order used when entering managed mode; leaving runs it backwards.
    const ENTER_ORDER: [Self; 5] = [
        Self::Restrictions,
        Self::Keyguard,
        Self::StatusBar,
        Self::SystemUpdatePolicy,
        Self::Kiosk,
    ];
}
