//! Credential reset through a single-use token.
//!
//! Every attempt generates a fresh token, registers it, spends it on the
//! reset call and then drops it from the OS and from memory. A failed attempt
//! is never retried with the same token.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::error::{PolicyError, PolicyResult};
use crate::platform::{DevicePolicySurface, SecureRandomSource};

/// Length of a reset token in bytes.
pub const RESET_TOKEN_LEN: u32 = 32;

/// No extra constraints on the reset call.
const RESET_FLAGS: u32 = 0;

/// Token bytes, wiped on drop.
struct ResetToken(Zeroizing<Vec<u8>>);

impl ResetToken {
    fn generate(random: &dyn SecureRandomSource) -> PolicyResult<Self> {
        let bytes = Zeroizing::new(
            random
                .generate_token(RESET_TOKEN_LEN)
                .map_err(|err| PolicyError::TokenGenerationFailed(err.to_string()))?,
        );
        if bytes.len() != RESET_TOKEN_LEN as usize {
            return Err(PolicyError::TokenGenerationFailed(format!(
                "expected {RESET_TOKEN_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Copy handed across the platform boundary.
    ///
    /// The surface takes the bytes by value, so ownership of the copy moves to
    /// the callee (for a foreign surface, into the lowered buffer) and it cannot
    /// be wiped from here. The registered copy is dropped by
    /// `clear_reset_token` after every attempt; this local one by `Zeroizing`.
    fn handoff(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// Resets the device credential without knowledge of the current one.
#[derive(Debug, Default)]
pub struct CredentialResetManager;

impl CredentialResetManager {
    /// Creates the manager.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Replaces the device credential with `new_credential`.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::AdminNotActive`] before any token is generated.
    /// - [`PolicyError::TokenGenerationFailed`] if the random source fails.
    /// - [`PolicyError::ResetRejected`] if the OS refuses the token or the reset.
    pub fn reset_credential(
        &self,
        surface: &Arc<dyn DevicePolicySurface>,
        random: &Arc<dyn SecureRandomSource>,
        new_credential: &str,
    ) -> PolicyResult<()> {
        if !surface.is_admin_active() {
            return Err(PolicyError::AdminNotActive);
        }

        let token = ResetToken::generate(random.as_ref())?;
        let outcome = Self::spend(surface, &token, new_credential);

        if let Err(err) = surface.clear_reset_token() {
            log::warn!("reset token not cleared: {err}");
        }
        drop(token);

        match &outcome {
            Ok(()) => log::info!("device credential reset"),
            Err(err) => log::warn!("credential reset failed: {err}"),
        }
        outcome
    }

    /// Registers `token` and immediately uses it for the reset.
    fn spend(
        surface: &Arc<dyn DevicePolicySurface>,
        token: &ResetToken,
        new_credential: &str,
    ) -> PolicyResult<()> {
        let accepted = surface
            .set_reset_token(token.handoff())
            .map_err(|err| PolicyError::ResetRejected(err.to_string()))?;
        if !accepted {
            return Err(PolicyError::ResetRejected(
                "reset token not accepted".to_string(),
            ));
        }

        let reset = surface
            .reset_credential_with_token(new_credential.to_string(), token.handoff(), RESET_FLAGS)
            .map_err(|err| PolicyError::ResetRejected(err.to_string()))?;
        if reset {
            Ok(())
        } else {
            Err(PolicyError::ResetRejected(
                "credential reset refused".to_string(),
            ))
        }
    }
}
