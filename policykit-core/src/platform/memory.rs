//! In-memory implementations of the platform collaborators.
//!
//! These simulate a device for tests and for the developer CLI. They keep the
//! observable policy state in memory and support failure injection; they do
//! not touch any real OS facility.

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use zeroize::Zeroize;

use super::{
    ComponentName, DevicePolicySurface, IntentFilter, OverlayHandle, OverlayPermission,
    OverlaySpec, OverlaySurface, PlatformProvider, PlatformResult, PrivilegedExecutionChannel,
    PrivilegedSession, SecureRandomSource, SystemUpdateWindow,
};
use crate::error::PlatformError;
use crate::restrictions::Restriction;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Device policy surface
// =============================================================================

/// Device policy operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `set_keyguard_disabled`
    Keyguard,
    /// `set_status_bar_disabled`
    StatusBar,
    /// `set_system_update_policy`
    SystemUpdatePolicy,
    /// `set_lock_task_packages`
    LockTaskPackages,
    /// `add_persistent_preferred_activity`
    PreferredActivity,
    /// `lock_now`
    LockNow,
    /// `set_reset_token` answers `false`
    SetResetToken,
    /// `reset_credential_with_token` answers `false`
    ResetCredential,
}

/// Observable policy state of a [`MemoryDevice`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    /// Restriction keys in the disallow-set.
    pub disallowed: BTreeSet<String>,
    /// Keyguard disabled.
    pub keyguard_disabled: bool,
    /// Status bar disabled.
    pub status_bar_disabled: bool,
    /// Installed update window, if any.
    pub system_update_window: Option<SystemUpdateWindow>,
    /// Kiosk allow-list.
    pub lock_task_packages: Vec<String>,
    /// Preferred-home bindings as `package/class`.
    pub preferred_home: Vec<String>,
    /// Screen was locked by `lock_now`.
    pub locked: bool,
    /// Current device credential.
    pub credential: Option<String>,
    /// A reset token is registered.
    pub reset_token_registered: bool,
}

#[derive(Default)]
struct DeviceState {
    snapshot: DeviceSnapshot,
    preferred: Vec<(IntentFilter, ComponentName)>,
    registered_token: Option<Vec<u8>>,
    seen_tokens: Vec<Vec<u8>>,
    failing_restrictions: HashSet<String>,
    failing: HashSet<Operation>,
}

/// Simulated device policy surface.
pub struct MemoryDevice {
    device_owner: AtomicBool,
    admin_active: AtomicBool,
    mutations: AtomicUsize,
    state: Mutex<DeviceState>,
}

impl MemoryDevice {
    /// A device where this app is device owner with an active admin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            device_owner: AtomicBool::new(true),
            admin_active: AtomicBool::new(true),
            mutations: AtomicUsize::new(0),
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Sets the device-owner flag.
    pub fn set_device_owner(&self, owner: bool) {
        self.device_owner.store(owner, Ordering::SeqCst);
    }

    /// Sets the admin-active flag.
    pub fn set_admin_active(&self, active: bool) {
        self.admin_active.store(active, Ordering::SeqCst);
    }

    /// Makes every change to `restriction` fail.
    pub fn fail_restriction(&self, restriction: Restriction) {
        lock(&self.state).failing_restrictions.insert(restriction.key());
    }

    /// Makes `operation` fail (or answer `false`).
    pub fn fail_operation(&self, operation: Operation) {
        lock(&self.state).failing.insert(operation);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.failing.clear();
        state.failing_restrictions.clear();
    }

    /// Current observable state.
    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        let state = lock(&self.state);
        let mut snapshot = state.snapshot.clone();
        snapshot.preferred_home = state
            .preferred
            .iter()
            .filter(|(filter, _)| *filter == IntentFilter::home())
            .map(|(_, target)| format!("{}/{}", target.package_name, target.class_name))
            .collect();
        snapshot.reset_token_registered = state.registered_token.is_some();
        snapshot
    }

    /// Number of state-changing calls received.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Every token passed to `set_reset_token`, in order.
    #[must_use]
    pub fn seen_tokens(&self) -> Vec<Vec<u8>> {
        lock(&self.state).seen_tokens.clone()
    }

    fn mutate<R>(
        &self,
        operation: Option<Operation>,
        f: impl FnOnce(&mut DeviceState) -> R,
    ) -> PlatformResult<R> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if let Some(op) = operation {
            if state.failing.contains(&op) {
                return Err(PlatformError::Rejected(format!("{op:?} refused")));
            }
        }
        Ok(f(&mut state))
    }

    fn restriction_change(&self, key: &str, add: bool) -> PlatformResult<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if state.failing_restrictions.contains(key) {
            return Err(PlatformError::Rejected(format!("restriction {key} refused")));
        }
        if add {
            state.snapshot.disallowed.insert(key.to_string());
        } else {
            state.snapshot.disallowed.remove(key);
        }
        Ok(())
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DevicePolicySurface for MemoryDevice {
    fn add_restriction(&self, key: String) -> PlatformResult<()> {
        self.restriction_change(&key, true)
    }

    fn clear_restriction(&self, key: String) -> PlatformResult<()> {
        self.restriction_change(&key, false)
    }

    fn has_restriction(&self, key: String) -> PlatformResult<bool> {
        Ok(lock(&self.state).snapshot.disallowed.contains(&key))
    }

    fn set_keyguard_disabled(&self, disabled: bool) -> PlatformResult<()> {
        self.mutate(Some(Operation::Keyguard), |s| {
            s.snapshot.keyguard_disabled = disabled;
        })
    }

    fn set_status_bar_disabled(&self, disabled: bool) -> PlatformResult<()> {
        self.mutate(Some(Operation::StatusBar), |s| {
            s.snapshot.status_bar_disabled = disabled;
        })
    }

    fn set_system_update_policy(&self, window: Option<SystemUpdateWindow>) -> PlatformResult<()> {
        self.mutate(Some(Operation::SystemUpdatePolicy), |s| {
            s.snapshot.system_update_window = window;
        })
    }

    fn set_lock_task_packages(&self, packages: Vec<String>) -> PlatformResult<()> {
        self.mutate(Some(Operation::LockTaskPackages), |s| {
            s.snapshot.lock_task_packages = packages;
        })
    }

    fn add_persistent_preferred_activity(
        &self,
        filter: IntentFilter,
        target: ComponentName,
    ) -> PlatformResult<()> {
        self.mutate(Some(Operation::PreferredActivity), |s| {
            // The OS keeps one binding per filter.
            s.preferred.retain(|(existing, _)| *existing != filter);
            s.preferred.push((filter, target));
        })
    }

    fn clear_persistent_preferred_activities(&self, package_name: String) -> PlatformResult<()> {
        self.mutate(None, |s| {
            s.preferred
                .retain(|(_, target)| target.package_name != package_name);
        })
    }

    fn is_device_owner(&self) -> bool {
        self.device_owner.load(Ordering::SeqCst)
    }

    fn is_admin_active(&self) -> bool {
        self.admin_active.load(Ordering::SeqCst)
    }

    fn lock_now(&self) -> PlatformResult<()> {
        self.mutate(Some(Operation::LockNow), |s| s.snapshot.locked = true)
    }

    fn set_reset_token(&self, token: Vec<u8>) -> PlatformResult<bool> {
        self.mutate(None, |s| {
            s.seen_tokens.push(token.clone());
            if s.failing.contains(&Operation::SetResetToken) {
                return false;
            }
            s.registered_token = Some(token);
            true
        })
    }

    fn clear_reset_token(&self) -> PlatformResult<()> {
        self.mutate(None, |s| {
            if let Some(mut token) = s.registered_token.take() {
                token.zeroize();
            }
        })
    }

    fn reset_credential_with_token(
        &self,
        new_credential: String,
        token: Vec<u8>,
        flags: u32,
    ) -> PlatformResult<bool> {
        self.mutate(None, |s| {
            let token_matches = s.registered_token.as_deref() == Some(token.as_slice());
            if !token_matches || flags != 0 || s.failing.contains(&Operation::ResetCredential) {
                return false;
            }
            s.snapshot.credential = Some(new_credential);
            true
        })
    }
}

// =============================================================================
// Random source
// =============================================================================

/// Deterministic token source: every call returns a token filled with a new
/// counter value. Not secure.
#[derive(Default)]
pub struct MemoryRandomSource {
    counter: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryRandomSource {
    /// Creates an available source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a missing algorithm.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Tokens produced so far.
    #[must_use]
    pub fn generated(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl SecureRandomSource for MemoryRandomSource {
    fn generate_token(&self, length: u32) -> PlatformResult<Vec<u8>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("SHA1PRNG".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let seed = n.to_le_bytes();
        Ok((0..length as usize).map(|i| seed[i % seed.len()]).collect())
    }
}

// =============================================================================
// Privileged channel
// =============================================================================

/// Records commands instead of executing them.
pub struct MemoryPrivilegedChannel {
    available: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl MemoryPrivilegedChannel {
    /// A rooted device.
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            open_delay: Mutex::new(None),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Toggles whether `open` succeeds.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes `open` block for `delay` first.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        *lock(&self.open_delay) = delay;
    }

    /// Commands written and closed so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }
}

impl Default for MemoryPrivilegedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegedExecutionChannel for MemoryPrivilegedChannel {
    fn open(&self) -> PlatformResult<Arc<dyn PrivilegedSession>> {
        let delay = *lock(&self.open_delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("su not found".to_string()));
        }
        Ok(Arc::new(MemorySession {
            pending: Mutex::new(Vec::new()),
            sink: Arc::clone(&self.commands),
        }))
    }
}

struct MemorySession {
    pending: Mutex<Vec<String>>,
    sink: Arc<Mutex<Vec<String>>>,
}

impl PrivilegedSession for MemorySession {
    fn write_command(&self, command: String) -> PlatformResult<()> {
        lock(&self.pending).push(command);
        Ok(())
    }

    fn close(&self) -> PlatformResult<()> {
        let pending = std::mem::take(&mut *lock(&self.pending));
        lock(&self.sink).extend(pending);
        Ok(())
    }
}

// =============================================================================
// Overlay
// =============================================================================

/// Tracks live overlays by handle.
#[derive(Default)]
pub struct MemoryOverlaySurface {
    next: AtomicU64,
    live: Mutex<BTreeSet<OverlayHandle>>,
    last_spec: Mutex<Option<OverlaySpec>>,
    failing: AtomicBool,
    requires_permission: Mutex<Option<Arc<MemoryOverlayPermission>>>,
}

impl MemoryOverlaySurface {
    /// Creates an empty surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `show` fail whenever `permission` is not granted.
    pub fn require_permission(&self, permission: Arc<MemoryOverlayPermission>) {
        *lock(&self.requires_permission) = Some(permission);
    }

    /// Makes `show` fail unconditionally.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Handles of the overlays currently shown.
    #[must_use]
    pub fn live(&self) -> Vec<OverlayHandle> {
        lock(&self.live).iter().copied().collect()
    }

    /// Overlay settings of the most recently shown overlay.
    #[must_use]
    pub fn last_spec(&self) -> Option<OverlaySpec> {
        lock(&self.last_spec).clone()
    }
}

impl OverlaySurface for MemoryOverlaySurface {
    fn show(&self, spec: OverlaySpec) -> PlatformResult<OverlayHandle> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlatformError::Rejected("window manager refused view".to_string()));
        }
        let permitted = lock(&self.requires_permission)
            .as_ref()
            .map_or(true, |p| p.can_draw_overlays());
        if !permitted {
            return Err(PlatformError::Rejected("permission denied for window type".to_string()));
        }
        let handle = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.live).insert(handle);
        *lock(&self.last_spec) = Some(spec);
        Ok(handle)
    }

    fn dismiss(&self, handle: OverlayHandle) -> PlatformResult<()> {
        if lock(&self.live).remove(&handle) {
            Ok(())
        } else {
            Err(PlatformError::Rejected(format!("overlay {handle} not attached")))
        }
    }
}

/// Overlay permission flag plus a count of grant requests.
pub struct MemoryOverlayPermission {
    granted: AtomicBool,
    requests: AtomicUsize,
}

impl MemoryOverlayPermission {
    /// Creates the permission in the given state.
    #[must_use]
    pub const fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
            requests: AtomicUsize::new(0),
        }
    }

    /// Grants or revokes the permission.
    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    /// Number of grant requests issued.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl OverlayPermission for MemoryOverlayPermission {
    fn can_draw_overlays(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn request_overlay_permission(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Provider
// =============================================================================

/// A complete simulated device.
///
/// Defaults to device owner, admin active, rooted and overlay permission
/// granted. The overlay surface honours the permission flag.
pub struct MemoryPlatform {
    /// Policy surface.
    pub device: Arc<MemoryDevice>,
    /// Token source.
    pub random: Arc<MemoryRandomSource>,
    /// Privileged channel.
    pub channel: Arc<MemoryPrivilegedChannel>,
    /// Overlay surface.
    pub overlay: Arc<MemoryOverlaySurface>,
    /// Overlay permission.
    pub permission: Arc<MemoryOverlayPermission>,
}

impl MemoryPlatform {
    /// Creates the simulated device.
    #[must_use]
    pub fn new() -> Self {
        let permission = Arc::new(MemoryOverlayPermission::new(true));
        let overlay = Arc::new(MemoryOverlaySurface::new());
        overlay.require_permission(Arc::clone(&permission));
        Self {
            device: Arc::new(MemoryDevice::new()),
            random: Arc::new(MemoryRandomSource::new()),
            channel: Arc::new(MemoryPrivilegedChannel::new()),
            overlay,
            permission,
        }
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformProvider for MemoryPlatform {
    fn policy(&self) -> Arc<dyn DevicePolicySurface> {
        self.device.clone()
    }

    fn random(&self) -> Arc<dyn SecureRandomSource> {
        self.random.clone()
    }

    fn privileged(&self) -> Arc<dyn PrivilegedExecutionChannel> {
        self.channel.clone()
    }

    fn overlay(&self) -> Arc<dyn OverlaySurface> {
        self.overlay.clone()
    }

    fn overlay_permission(&self) -> Arc<dyn OverlayPermission> {
        self.permission.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_requires_the_registered_token() {
        let device = MemoryDevice::new();
        assert!(device.set_reset_token(vec![1; 32]).unwrap());
        assert!(!device
            .reset_credential_with_token("1111".to_string(), vec![2; 32], 0)
            .unwrap());
        assert!(device
            .reset_credential_with_token("1111".to_string(), vec![1; 32], 0)
            .unwrap());
        assert_eq!(device.snapshot().credential.as_deref(), Some("1111"));
    }

    #[test]
    fn cleared_token_no_longer_resets() {
        let device = MemoryDevice::new();
        assert!(device.set_reset_token(vec![1; 32]).unwrap());
        device.clear_reset_token().unwrap();

        assert!(!device.snapshot().reset_token_registered);
        assert!(!device
            .reset_credential_with_token("1111".to_string(), vec![1; 32], 0)
            .unwrap());
    }

    #[test]
    fn preferred_home_is_cleared_per_package() {
        let device = MemoryDevice::new();
        let target = ComponentName {
            package_name: "com.example".to_string(),
            class_name: "com.example.Home".to_string(),
        };
        device
            .add_persistent_preferred_activity(IntentFilter::home(), target)
            .unwrap();
        assert_eq!(device.snapshot().preferred_home, vec!["com.example/com.example.Home"]);

        device
            .clear_persistent_preferred_activities("com.other".to_string())
            .unwrap();
        assert_eq!(device.snapshot().preferred_home.len(), 1);

        device
            .clear_persistent_preferred_activities("com.example".to_string())
            .unwrap();
        assert!(device.snapshot().preferred_home.is_empty());
    }

    #[test]
    fn random_tokens_are_distinct() {
        let random = MemoryRandomSource::new();
        let a = random.generate_token(32).unwrap();
        let b = random.generate_token(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn overlay_show_honours_permission() {
        let platform = MemoryPlatform::new();
        platform.permission.set_granted(false);
        let spec = OverlaySpec {
            full_screen: true,
            focusable: false,
            translucent: true,
            dismiss_label: "Close".to_string(),
        };
        assert!(platform.overlay.show(spec.clone()).is_err());

        platform.permission.set_granted(true);
        let handle = platform.overlay.show(spec).unwrap();
        assert_eq!(platform.overlay.live(), vec![handle]);
        platform.overlay.dismiss(handle).unwrap();
        assert!(platform.overlay.dismiss(handle).is_err());
    }
}
