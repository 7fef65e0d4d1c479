//! Platform collaborators consumed by the policy core.
//!
//! Every OS interaction goes through one of these traits. On Android they are
//! implemented in Kotlin on top of `DevicePolicyManager`, `WindowManager` and
//! `Settings`, then handed to [`crate::PolicyAgent`] through a
//! [`PlatformProvider`].
//!
//! - [`DevicePolicySurface`]: restrictions, keyguard, status bar, update
//!   policy, lock task, preferred activities, lock and credential reset
//! - [`SecureRandomSource`]: reset-token generation
//! - [`PrivilegedExecutionChannel`]: elevated shell, usually unavailable
//! - [`OverlaySurface`] and [`OverlayPermission`]: the escalation overlay
//!
//! Native implementations live in [`native`]; in-memory ones for tests and
//! simulation in [`memory`].

use std::sync::Arc;

use crate::error::PlatformError;

pub mod memory;
pub mod native;

/// Result type for collaborator calls.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Intent action of the home filter.
pub const ACTION_MAIN: &str = "android.intent.action.MAIN";
/// Home category.
pub const CATEGORY_HOME: &str = "android.intent.category.HOME";
/// Default category.
pub const CATEGORY_DEFAULT: &str = "android.intent.category.DEFAULT";

/// Fully qualified activity reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, uniffi::Record)]
pub struct ComponentName {
    /// Owning package.
    pub package_name: String,
    /// Fully qualified class name.
    pub class_name: String,
}

/// Intent filter used for the preferred-home binding.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct IntentFilter {
    /// Intent action.
    pub action: String,
    /// Required categories.
    pub categories: Vec<String>,
}

impl IntentFilter {
    /// `MAIN` with `HOME` and `DEFAULT`, the filter the launcher resolves.
    #[must_use]
    pub fn home() -> Self {
        Self {
            action: ACTION_MAIN.to_string(),
            categories: vec![CATEGORY_HOME.to_string(), CATEGORY_DEFAULT.to_string()],
        }
    }
}

/// Daily window in which system updates may install, in minutes after midnight.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, uniffi::Record,
)]
pub struct SystemUpdateWindow {
    /// Window start.
    pub start_minute: u32,
    /// Window end.
    pub end_minute: u32,
}

/// Presentation parameters for the escalation overlay.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct OverlaySpec {
    /// Covers the whole screen.
    pub full_screen: bool,
    /// Whether the overlay takes input focus. Always `false` so the settings
    /// screen underneath keeps receiving input.
    pub focusable: bool,
    /// Translucent pixel format.
    pub translucent: bool,
    /// Label of the single dismiss control.
    pub dismiss_label: String,
}

/// Identifier of a live overlay returned by [`OverlaySurface::show`].
pub type OverlayHandle = u64;

/// Device policy operations. Mirrors the subset of `DevicePolicyManager` the
/// core needs, scoped to the app's admin component.
#[uniffi::export(with_foreign)]
pub trait DevicePolicySurface: Send + Sync {
    /// Adds `key` to the user's disallow-set.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the restriction.
    fn add_restriction(&self, key: String) -> PlatformResult<()>;

    /// Removes `key` from the user's disallow-set.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the change.
    fn clear_restriction(&self, key: String) -> PlatformResult<()>;

    /// Whether `key` is currently set by this admin.
    ///
    /// # Errors
    ///
    /// Returns an error if restrictions cannot be read.
    fn has_restriction(&self, key: String) -> PlatformResult<bool>;

    /// Disables or re-enables the keyguard.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the change.
    fn set_keyguard_disabled(&self, disabled: bool) -> PlatformResult<()>;

    /// Disables or re-enables the status bar.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the change.
    fn set_status_bar_disabled(&self, disabled: bool) -> PlatformResult<()>;

    /// Installs a windowed update policy, or clears it with `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the policy.
    fn set_system_update_policy(&self, window: Option<SystemUpdateWindow>) -> PlatformResult<()>;

    /// Replaces the lock-task (kiosk) allow-list.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the list.
    fn set_lock_task_packages(&self, packages: Vec<String>) -> PlatformResult<()>;

    /// Registers `target` as the persistent preferred activity for `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding cannot be registered.
    fn add_persistent_preferred_activity(
        &self,
        filter: IntentFilter,
        target: ComponentName,
    ) -> PlatformResult<()>;

    /// Clears every persistent preferred activity owned by `package_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bindings cannot be cleared.
    fn clear_persistent_preferred_activities(&self, package_name: String) -> PlatformResult<()>;

    /// Whether this app is the device owner.
    fn is_device_owner(&self) -> bool;

    /// Whether this app's admin component is active.
    fn is_admin_active(&self) -> bool;

    /// Locks the screen immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to lock.
    fn lock_now(&self) -> PlatformResult<()>;

    /// Registers a credential reset token. Returns whether the OS accepted it.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential subsystem is unreachable.
    fn set_reset_token(&self, token: Vec<u8>) -> PlatformResult<bool>;

    /// Drops any registered reset token.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential subsystem is unreachable.
    fn clear_reset_token(&self) -> PlatformResult<()>;

    /// Resets the credential using a registered token. Returns whether the
    /// reset took effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential subsystem is unreachable.
    fn reset_credential_with_token(
        &self,
        new_credential: String,
        token: Vec<u8>,
        flags: u32,
    ) -> PlatformResult<bool>;
}

/// Cryptographically secure random bytes.
#[uniffi::export(with_foreign)]
pub trait SecureRandomSource: Send + Sync {
    /// Returns exactly `length` random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Unavailable`] if no secure source exists.
    fn generate_token(&self, length: u32) -> PlatformResult<Vec<u8>>;
}

/// An open elevated shell.
#[uniffi::export(with_foreign)]
pub trait PrivilegedSession: Send + Sync {
    /// Writes one command line.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_command(&self, command: String) -> PlatformResult<()>;

    /// Flushes and closes the session. Does not wait for the command to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn close(&self) -> PlatformResult<()>;
}

/// Source of privileged sessions. Most devices have none.
#[uniffi::export(with_foreign)]
pub trait PrivilegedExecutionChannel: Send + Sync {
    /// Opens a session.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Unavailable`] on unprivileged devices.
    fn open(&self) -> PlatformResult<Arc<dyn PrivilegedSession>>;
}

/// Window manager surface drawing above other apps.
#[uniffi::export(with_foreign)]
pub trait OverlaySurface: Send + Sync {
    /// Shows an overlay and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the window manager refuses the view.
    fn show(&self, spec: OverlaySpec) -> PlatformResult<OverlayHandle>;

    /// Removes the overlay identified by `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the view cannot be removed.
    fn dismiss(&self, handle: OverlayHandle) -> PlatformResult<()>;
}

/// The draw-over-other-apps permission.
#[uniffi::export(with_foreign)]
pub trait OverlayPermission: Send + Sync {
    /// Whether the permission is currently granted.
    fn can_draw_overlays(&self) -> bool;

    /// Opens the system grant screen. The result is observed out-of-band.
    fn request_overlay_permission(&self);
}

/// Bundles the collaborators for one device.
#[uniffi::export(with_foreign)]
pub trait PlatformProvider: Send + Sync {
    /// Device policy operations.
    fn policy(&self) -> Arc<dyn DevicePolicySurface>;

    /// Reset-token random source.
    fn random(&self) -> Arc<dyn SecureRandomSource>;

    /// Privileged shell access.
    fn privileged(&self) -> Arc<dyn PrivilegedExecutionChannel>;

    /// Overlay window surface.
    fn overlay(&self) -> Arc<dyn OverlaySurface>;

    /// Overlay permission state.
    fn overlay_permission(&self) -> Arc<dyn OverlayPermission>;
}
