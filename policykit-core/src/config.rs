//! Agent configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};
use crate::platform::SystemUpdateWindow;
use crate::restrictions::{FailureMode, Restriction};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Static configuration of a [`crate::PolicyAgent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(default)]
pub struct PolicyConfig {
    /// Package of the agent app; the only package allowed in kiosk mode.
    pub package_name: String,
    /// Activity registered as the locked home screen.
    pub launcher_activity: String,
    /// Restrictions applied while managed, in application order.
    pub restrictions: Vec<Restriction>,
    /// Handling of a failure on one restriction.
    pub restriction_failure_mode: FailureMode,
    /// Daily system-update install window.
    pub system_update_window: SystemUpdateWindow,
    /// Command written to the privileged channel on escalation.
    pub escalation_command: String,
    /// Upper bound on the privileged dispatch.
    pub dispatch_timeout_ms: u64,
    /// Label of the overlay's dismiss control.
    pub overlay_dismiss_label: String,
    /// Credential used by the fixed-reset workflow, when the caller supplies none.
    pub fixed_reset_credential: Option<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            package_name: "br.com.gtb.simplemdm".to_string(),
            launcher_activity: "br.com.gtb.simplemdm.PersistentPreferredActivity".to_string(),
            restrictions: Restriction::managed_set(),
            restriction_failure_mode: FailureMode::Transactional,
            system_update_window: SystemUpdateWindow {
                start_minute: 60,
                end_minute: 120,
            },
            escalation_command: "am start -a android.intent.action.MAIN -n com.android.settings/.Settings$IccLockSettingsActivity".to_string(),
            dispatch_timeout_ms: 5_000,
            overlay_dismiss_label: "Close".to_string(),
            fixed_reset_credential: None,
        }
    }
}

impl PolicyConfig {
    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidConfig`] if the document is malformed or
    /// fails [`PolicyConfig::validate`].
    pub fn from_json(json: &str) -> PolicyResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| PolicyError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> PolicyResult<()> {
        let invalid =
            |msg: &str| -> PolicyResult<()> { Err(PolicyError::InvalidConfig(msg.to_string())) };

        if self.package_name.trim().is_empty() {
            return invalid("package_name is empty");
        }
        if self.launcher_activity.trim().is_empty() {
            return invalid("launcher_activity is empty");
        }
        if self.restrictions.is_empty() {
            return invalid("restrictions is empty");
        }
        let SystemUpdateWindow {
            start_minute,
            end_minute,
        } = self.system_update_window;
        if start_minute >= MINUTES_PER_DAY || end_minute >= MINUTES_PER_DAY {
            return invalid("system_update_window minutes must be below 1440");
        }
        if start_minute == end_minute {
            return invalid("system_update_window is empty");
        }
        if self.escalation_command.trim().is_empty() || self.escalation_command.contains('\n') {
            return invalid("escalation_command must be a single non-empty line");
        }
        if self.dispatch_timeout_ms == 0 {
            return invalid("dispatch_timeout_ms must be positive");
        }
        Ok(())
    }

    pub(crate) const fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

/// The default configuration.
#[uniffi::export]
#[must_use]
pub fn default_policy_config() -> PolicyConfig {
    PolicyConfig::default()
}
