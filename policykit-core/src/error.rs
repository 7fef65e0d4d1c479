//! Error types for the policy enforcement core.

use thiserror::Error;

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors raised by platform collaborators (policy surface, random source,
/// privileged channel, overlay surface).
///
/// These never reach callers of [`crate::PolicyAgent`] directly; each call site
/// converts them into a [`PolicyError`].
#[derive(Debug, Error, uniffi::Error)]
pub enum PlatformError {
    /// The capability does not exist on this device (no root, missing algorithm, ...).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The platform refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Unexpected `UniFFI` callback error.
    #[error("unexpected uniffi callback error: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl From<uniffi::UnexpectedUniFFICallbackError> for PlatformError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}

/// Errors surfaced by the policy agent.
///
/// None of these are fatal: a managed device must remain operable when a
/// single privileged action is denied.
#[derive(Debug, Error, uniffi::Error)]
pub enum PolicyError {
    /// The app does not hold device-owner status.
    #[error("not_device_owner")]
    NotDeviceOwner,

    /// The device admin component is not active.
    #[error("admin_not_active")]
    AdminNotActive,

    /// The secure random source could not produce a reset token.
    #[error("token_generation_failed: {0}")]
    TokenGenerationFailed(String),

    /// The OS refused to register the token or to reset the credential.
    #[error("reset_rejected: {0}")]
    ResetRejected(String),

    /// The admin is active but the OS refused to lock the screen.
    #[error("lock_refused: {0}")]
    LockRefused(String),

    /// The privileged execution channel is unavailable or the write failed.
    #[error("escalation_denied: {0}")]
    EscalationDenied(String),

    /// An overlay from a previous escalation is still live.
    #[error("already_escalating")]
    AlreadyEscalating,

    /// Overlay permission has not been granted; a request was issued.
    #[error("overlay_permission_missing")]
    OverlayPermissionMissing,

    /// The overlay surface failed even though permission was granted.
    #[error("overlay_unavailable: {0}")]
    OverlayUnavailable(String),

    /// A managed-mode transition step failed.
    #[error("transition_failed at {step}: {reason}")]
    TransitionFailed {
        /// Name of the failing step.
        step: String,
        /// Platform reason.
        reason: String,
    },

    /// The supplied configuration is not usable.
    #[error("invalid_config: {0}")]
    InvalidConfig(String),
}

impl PolicyError {
    pub(crate) fn transition(step: &str, err: &PlatformError) -> Self {
        Self::TransitionFailed {
            step: step.to_string(),
            reason: err.to_string(),
        }
    }

    /// Returns the flat kind of this error, for presentation layers.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotDeviceOwner => ErrorKind::NotDeviceOwner,
            Self::AdminNotActive => ErrorKind::AdminNotActive,
            Self::TokenGenerationFailed(_) => ErrorKind::TokenGenerationFailed,
            Self::ResetRejected(_) => ErrorKind::ResetRejected,
            Self::LockRefused(_) => ErrorKind::LockRefused,
            Self::EscalationDenied(_) => ErrorKind::EscalationDenied,
            Self::AlreadyEscalating => ErrorKind::AlreadyEscalating,
            Self::OverlayPermissionMissing => ErrorKind::OverlayPermissionMissing,
            Self::OverlayUnavailable(_) => ErrorKind::OverlayUnavailable,
            Self::TransitionFailed { .. } => ErrorKind::TransitionFailed,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}

/// Payload-free discriminant of [`PolicyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// See [`PolicyError::NotDeviceOwner`].
    NotDeviceOwner,
    /// See [`PolicyError::AdminNotActive`].
    AdminNotActive,
    /// See [`PolicyError::TokenGenerationFailed`].
    TokenGenerationFailed,
    /// See [`PolicyError::ResetRejected`].
    ResetRejected,
    /// See [`PolicyError::LockRefused`].
    LockRefused,
    /// See [`PolicyError::EscalationDenied`].
    EscalationDenied,
    /// See [`PolicyError::AlreadyEscalating`].
    AlreadyEscalating,
    /// See [`PolicyError::OverlayPermissionMissing`].
    OverlayPermissionMissing,
    /// See [`PolicyError::OverlayUnavailable`].
    OverlayUnavailable,
    /// See [`PolicyError::TransitionFailed`].
    TransitionFailed,
    /// See [`PolicyError::InvalidConfig`].
    InvalidConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_carries_step_and_reason() {
        let err = PolicyError::transition(
            "status_bar",
            &PlatformError::Rejected("policy locked".to_string()),
        );
        assert_eq!(err.kind(), ErrorKind::TransitionFailed);
        assert_eq!(
            err.to_string(),
            "transition_failed at status_bar: rejected: policy locked"
        );
    }

    #[test]
    fn kind_renders_snake_case() {
        assert_eq!(ErrorKind::AdminNotActive.to_string(), "admin_not_active");
        assert_eq!(
            PolicyError::AlreadyEscalating.kind().to_string(),
            "already_escalating"
        );
        assert_eq!(
            PolicyError::LockRefused("keyguard busy".to_string()).to_string(),
            "lock_refused: keyguard busy"
        );
    }
}
