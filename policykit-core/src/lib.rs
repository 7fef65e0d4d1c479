//! Device policy enforcement core for device-owner agents.
//!
//! [`PolicyAgent`] moves a device between [`ManagedModeState::Unmanaged`] and
//! [`ManagedModeState::Managed`] (restrictions, keyguard, status bar, update
//! window, kiosk pinning and preferred home), locks the screen, resets the
//! credential through a single-use token and runs the privileged escalation
//! flow. All OS access goes through the traits in [`platform`], which the host
//! app implements.
//!
//! ```rust
//! use std::sync::Arc;
//! use policykit_core::platform::memory::MemoryPlatform;
//! use policykit_core::{ManagedModeState, PolicyAgent, PolicyConfig};
//!
//! let platform = Arc::new(MemoryPlatform::new());
//! let agent = PolicyAgent::new(PolicyConfig::default(), platform.clone()).unwrap();
//! assert_eq!(agent.start().unwrap(), ManagedModeState::Managed);
//! assert_eq!(platform.device.snapshot().disallowed.len(), 4);
//! ```

mod agent;
pub use agent::*;

mod config;
pub use config::*;

mod credential;
pub use credential::{CredentialResetManager, RESET_TOKEN_LEN};

mod error;
pub use error::*;

mod escalation;
pub use escalation::{EscalationOrchestrator, EscalationState};

mod kiosk;
pub use kiosk::KioskController;

mod restrictions;
pub use restrictions::{FailureMode, Restriction, RestrictionRegistry, RestrictionSet};

/// Forwarding of `log` records to a host-provided logger.
pub mod logger;

pub mod platform;

uniffi::setup_scaffolding!("policykit_core");
