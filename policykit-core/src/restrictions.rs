//! User restrictions applied as one unit while the device is managed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

use crate::error::{PolicyError, PolicyResult};
use crate::platform::DevicePolicySurface;

/// A user restriction understood by the OS policy surface.
///
/// The string form is the OS restriction key.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    EnumIter,
    uniffi::Enum,
)]
pub enum Restriction {
    /// Master volume and stream volumes cannot be changed.
    #[serde(rename = "no_adjust_volume")]
    #[strum(serialize = "no_adjust_volume")]
    AdjustVolume,
    /// Wi-Fi access points cannot be reconfigured.
    #[serde(rename = "no_config_wifi")]
    #[strum(serialize = "no_config_wifi")]
    ConfigWifi,
    /// Booting into safe mode is blocked.
    #[serde(rename = "no_safe_boot")]
    #[strum(serialize = "no_safe_boot")]
    SafeBoot,
    /// Factory reset from settings is blocked.
    #[serde(rename = "no_factory_reset")]
    #[strum(serialize = "no_factory_reset")]
    FactoryReset,
}

impl Restriction {
    /// OS key for this restriction.
    #[must_use]
    pub fn key(self) -> String {
        self.as_ref().to_string()
    }

    /// The full managed-mode set, in application order.
    #[must_use]
    pub fn managed_set() -> Vec<Self> {
        Self::iter().collect()
    }
}

/// How a failure on one member of the set is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Members changed by the failing pass are reverted and the error reported.
    #[default]
    Transactional,
    /// Each failure is logged and the remaining members are still applied.
    BestEffort,
}

/// Ordered, duplicate-free set of restrictions that transition together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionSet(Vec<Restriction>);

impl RestrictionSet {
    /// Builds a set keeping the first occurrence of each member.
    #[must_use]
    pub fn new(members: &[Restriction]) -> Self {
        let mut ordered = Vec::with_capacity(members.len());
        for member in members {
            if !ordered.contains(member) {
                ordered.push(*member);
            }
        }
        Self(ordered)
    }

    /// Members in application order.
    #[must_use]
    pub fn members(&self) -> &[Restriction] {
        &self.0
    }
}

/// Applies and clears the restriction set against the device policy surface.
pub struct RestrictionRegistry {
    set: RestrictionSet,
    mode: FailureMode,
}

impl RestrictionRegistry {
    /// Creates a registry for `set`.
    #[must_use]
    pub const fn new(set: RestrictionSet, mode: FailureMode) -> Self {
        Self { set, mode }
    }

    /// The managed restriction set.
    #[must_use]
    pub const fn set(&self) -> &RestrictionSet {
        &self.set
    }

    /// Adds every member to the disallow-set when `active`, removes them otherwise.
    ///
    /// Members already in the requested state are left untouched, so
    /// re-applying the same value performs no mutation.
    ///
    /// # Errors
    ///
    /// In [`FailureMode::Transactional`] the first failing member aborts the
    /// pass, members already changed by it are reverted and
    /// [`PolicyError::TransitionFailed`] is returned. In
    /// [`FailureMode::BestEffort`] failures are logged and `Ok` is returned.
    pub fn apply_all(&self, surface: &Arc<dyn DevicePolicySurface>, active: bool) -> PolicyResult<()> {
        let mut changed = Vec::new();

        for restriction in self.set.members() {
            match set_one(surface, *restriction, active) {
                Ok(true) => changed.push(*restriction),
                Ok(false) => {}
                Err(err) => match self.mode {
                    FailureMode::BestEffort => {
                        log::warn!(
                            "restriction {} not {}: {err}",
                            restriction.as_ref(),
                            if active { "added" } else { "cleared" }
                        );
                    }
                    FailureMode::Transactional => {
                        log::error!(
                            "restriction {} failed, reverting {} member(s): {err}",
                            restriction.as_ref(),
                            changed.len()
                        );
                        rollback(surface, &changed, active);
                        return Err(err);
                    }
                },
            }
        }

        log::debug!(
            "restrictions {}: {} changed",
            if active { "applied" } else { "cleared" },
            changed.len()
        );
        Ok(())
    }
}

/// Moves one restriction to the requested state. Returns whether it changed.
fn set_one(
    surface: &Arc<dyn DevicePolicySurface>,
    restriction: Restriction,
    disallow: bool,
) -> PolicyResult<bool> {
    let step = restriction.as_ref();
    let current = surface
        .has_restriction(restriction.key())
        .map_err(|err| PolicyError::transition(step, &err))?;
    if current == disallow {
        return Ok(false);
    }

    let result = if disallow {
        surface.add_restriction(restriction.key())
    } else {
        surface.clear_restriction(restriction.key())
    };
    result.map_err(|err| PolicyError::transition(step, &err))?;
    Ok(true)
}

fn rollback(surface: &Arc<dyn DevicePolicySurface>, changed: &[Restriction], active: bool) {
    for restriction in changed.iter().rev() {
        let result = if active {
            surface.clear_restriction(restriction.key())
        } else {
            surface.add_restriction(restriction.key())
        };
        if let Err(err) = result {
            log::error!("rollback of {} failed: {err}", restriction.as_ref());
        }
    }
}
