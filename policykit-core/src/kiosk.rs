//! Kiosk pinning: the lock-task allow-list and the preferred home binding.

use std::sync::Arc;

use crate::error::{PolicyError, PolicyResult};
use crate::platform::{ComponentName, DevicePolicySurface, IntentFilter};

/// Keeps the kiosk allow-list and the preferred-home binding in step.
pub struct KioskController {
    package_name: String,
    launcher: ComponentName,
}

impl KioskController {
    /// Creates a controller pinning `package_name`, with `launcher_activity`
    /// (a class in that package) as the locked home screen.
    #[must_use]
    pub fn new(package_name: &str, launcher_activity: &str) -> Self {
        Self {
            package_name: package_name.to_string(),
            launcher: ComponentName {
                package_name: package_name.to_string(),
                class_name: launcher_activity.to_string(),
            },
        }
    }

    /// Allow-list for the given pinning state.
    #[must_use]
    pub fn allow_list(&self, active: bool) -> Vec<String> {
        if active {
            vec![self.package_name.clone()]
        } else {
            Vec::new()
        }
    }

    /// The locked launcher activity.
    #[must_use]
    pub const fn launcher(&self) -> &ComponentName {
        &self.launcher
    }

    /// Enables or disables pinning.
    ///
    /// Enabling sets the allow-list before registering the home binding; if
    /// the binding fails the allow-list is emptied again. Disabling empties
    /// the allow-list, then clears every binding owned by the package.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::TransitionFailed`] naming the failing step.
    pub fn set_pinning(&self, surface: &Arc<dyn DevicePolicySurface>, active: bool) -> PolicyResult<()> {
        surface
            .set_lock_task_packages(self.allow_list(active))
            .map_err(|err| PolicyError::transition("lock_task_packages", &err))?;

        if !active {
            return surface
                .clear_persistent_preferred_activities(self.package_name.clone())
                .map_err(|err| PolicyError::transition("preferred_home", &err));
        }

        if let Err(err) =
            surface.add_persistent_preferred_activity(IntentFilter::home(), self.launcher.clone())
        {
            log::error!("preferred home binding failed, unpinning: {err}");
            if let Err(revert) = surface.set_lock_task_packages(Vec::new()) {
                log::error!("allow-list revert failed: {revert}");
            }
            return Err(PolicyError::transition("preferred_home", &err));
        }

        log::debug!(
            "pinned {} with home {}",
            self.package_name,
            self.launcher.class_name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::{MemoryDevice, Operation};

    const PACKAGE: &str = "br.com.gtb.simplemdm";
    const LAUNCHER: &str = "br.com.gtb.simplemdm.PersistentPreferredActivity";

    fn setup() -> (Arc<MemoryDevice>, Arc<dyn DevicePolicySurface>, KioskController) {
        let device = Arc::new(MemoryDevice::new());
        let surface: Arc<dyn DevicePolicySurface> = device.clone();
        (device, surface, KioskController::new(PACKAGE, LAUNCHER))
    }

    #[test]
    fn pinning_allows_self_and_binds_home() {
        let (device, surface, kiosk) = setup();
        kiosk.set_pinning(&surface, true).unwrap();

        let snapshot = device.snapshot();
        assert_eq!(snapshot.lock_task_packages, vec![PACKAGE.to_string()]);
        assert_eq!(snapshot.preferred_home, vec![format!("{PACKAGE}/{LAUNCHER}")]);
    }

    #[test]
    fn pinning_twice_keeps_a_single_binding() {
        let (device, surface, kiosk) = setup();
        kiosk.set_pinning(&surface, true).unwrap();
        kiosk.set_pinning(&surface, true).unwrap();
        assert_eq!(device.snapshot().preferred_home.len(), 1);
    }

    #[test]
    fn unpinning_clears_allow_list_and_binding() {
        let (device, surface, kiosk) = setup();
        kiosk.set_pinning(&surface, true).unwrap();
        kiosk.set_pinning(&surface, false).unwrap();

        let snapshot = device.snapshot();
        assert!(snapshot.lock_task_packages.is_empty());
        assert!(snapshot.preferred_home.is_empty());
    }

    #[test]
    fn failed_binding_reverts_allow_list() {
        let (device, surface, kiosk) = setup();
        device.fail_operation(Operation::PreferredActivity);

        let err = kiosk.set_pinning(&surface, true).unwrap_err();

        assert!(matches!(err, PolicyError::TransitionFailed { ref step, .. } if step == "preferred_home"));
        assert!(device.snapshot().lock_task_packages.is_empty());
    }

    #[test]
    fn failed_allow_list_registers_no_binding() {
        let (device, surface, kiosk) = setup();
        device.fail_operation(Operation::LockTaskPackages);

        kiosk.set_pinning(&surface, true).unwrap_err();
        assert!(device.snapshot().preferred_home.is_empty());
    }
}
