//! End-to-end behaviour of the policy agent against the in-memory platform.

use std::collections::BTreeSet;
use std::sync::Arc;

use policykit_core::platform::memory::{DeviceSnapshot, MemoryPlatform, Operation};
use policykit_core::{
    ActionOutcome, AgentCommand, ErrorKind, EscalationState, FailureMode, ManagedModeState,
    PolicyAgent, PolicyConfig, PolicyError, Restriction,
};

const LOCKED_LAUNCHER: &str = "br.com.gtb.simplemdm/br.com.gtb.simplemdm.PersistentPreferredActivity";

fn setup() -> (Arc<MemoryPlatform>, Arc<PolicyAgent>) {
    setup_with(PolicyConfig::default())
}

fn setup_with(config: PolicyConfig) -> (Arc<MemoryPlatform>, Arc<PolicyAgent>) {
    let platform = Arc::new(MemoryPlatform::new());
    let agent = PolicyAgent::new(config, platform.clone()).unwrap();
    (platform, agent)
}

fn managed_keys() -> BTreeSet<String> {
    [
        "no_adjust_volume",
        "no_config_wifi",
        "no_safe_boot",
        "no_factory_reset",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[test]
fn enabling_managed_mode_applies_the_full_policy() {
    let (platform, agent) = setup();

    agent.transition(ManagedModeState::Managed).unwrap();

    let snapshot = platform.device.snapshot();
    assert_eq!(snapshot.disallowed, managed_keys());
    assert_eq!(snapshot.lock_task_packages, vec!["br.com.gtb.simplemdm"]);
    assert_eq!(snapshot.preferred_home, vec![LOCKED_LAUNCHER]);
    assert!(snapshot.keyguard_disabled);
    assert!(snapshot.status_bar_disabled);
    assert!(snapshot.system_update_window.is_some());
    assert_eq!(agent.state(), ManagedModeState::Managed);
}

#[test]
fn enabling_managed_mode_twice_is_idempotent() {
    let (platform, agent) = setup();

    agent.transition(ManagedModeState::Managed).unwrap();
    let once = platform.device.snapshot();
    agent.transition(ManagedModeState::Managed).unwrap();

    assert_eq!(platform.device.snapshot(), once);
}

#[test]
fn disabling_managed_mode_undoes_every_effect() {
    let (platform, agent) = setup();
    let before = platform.device.snapshot();

    agent.transition(ManagedModeState::Managed).unwrap();
    agent.transition(ManagedModeState::Unmanaged).unwrap();

    let after = platform.device.snapshot();
    assert!(after.disallowed.is_empty());
    assert!(after.lock_task_packages.is_empty());
    assert!(after.preferred_home.is_empty());
    assert_eq!(after, before);
    assert_eq!(agent.state(), ManagedModeState::Unmanaged);
}

#[test]
fn kiosk_is_released_before_restrictions_on_disable() {
    let (platform, agent) = setup();
    agent.transition(ManagedModeState::Managed).unwrap();
    platform.device.fail_operation(Operation::LockTaskPackages);

    let err = agent.transition(ManagedModeState::Unmanaged).unwrap_err();

    // Unpinning failed first, so nothing was relaxed.
    assert!(matches!(err, PolicyError::TransitionFailed { .. }));
    let snapshot = platform.device.snapshot();
    assert_eq!(snapshot.disallowed, managed_keys());
    assert!(snapshot.keyguard_disabled);
    assert_eq!(agent.state(), ManagedModeState::Managed);
}

#[test]
fn restriction_failure_leaves_no_partial_set() {
    let (platform, agent) = setup();
    platform.device.fail_restriction(Restriction::FactoryReset);

    let err = agent.transition(ManagedModeState::Managed).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransitionFailed);
    let snapshot = platform.device.snapshot();
    assert!(snapshot.disallowed.is_empty());
    assert!(snapshot.lock_task_packages.is_empty());
    assert!(!snapshot.keyguard_disabled);
}

#[test]
fn late_step_failure_leaves_device_unmanaged() {
    let (platform, agent) = setup();
    let before = platform.device.snapshot();
    platform.device.fail_operation(Operation::PreferredActivity);

    let err = agent.transition(ManagedModeState::Managed).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransitionFailed);
    assert_eq!(agent.state(), ManagedModeState::Unmanaged);
    let snapshot = platform.device.snapshot();
    assert!(snapshot.disallowed.is_empty());
    assert!(!snapshot.keyguard_disabled);
    assert!(!snapshot.status_bar_disabled);
    assert!(snapshot.system_update_window.is_none());
    assert_eq!(snapshot, before);
}

#[test]
fn best_effort_mode_continues_past_a_failing_restriction() {
    let (platform, agent) = setup_with(PolicyConfig {
        restriction_failure_mode: FailureMode::BestEffort,
        ..PolicyConfig::default()
    });
    platform.device.fail_restriction(Restriction::SafeBoot);

    agent.transition(ManagedModeState::Managed).unwrap();

    let snapshot = platform.device.snapshot();
    assert_eq!(snapshot.disallowed.len(), 3);
    assert_eq!(snapshot.preferred_home, vec![LOCKED_LAUNCHER]);
}

#[test]
fn non_owner_cannot_transition() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.device.set_device_owner(false);
    let agent = PolicyAgent::new(PolicyConfig::default(), platform.clone()).unwrap();

    assert_eq!(agent.start().unwrap(), ManagedModeState::Unmanaged);
    let outcome = agent.execute(AgentCommand::EnableManagedMode);

    assert!(matches!(
        outcome,
        ActionOutcome::Failed {
            kind: ErrorKind::NotDeviceOwner,
            ..
        }
    ));
    assert_eq!(platform.device.snapshot(), DeviceSnapshot::default());
}

#[test]
fn lock_without_admin_is_refused_and_device_stays_unlocked() {
    let (platform, agent) = setup();
    platform.device.set_admin_active(false);

    assert!(matches!(agent.lock_now(), Err(PolicyError::AdminNotActive)));
    assert!(!platform.device.snapshot().locked);
}

#[test]
fn reset_without_admin_touches_nothing() {
    let (platform, agent) = setup();
    platform.device.set_admin_active(false);

    let err = agent.reset_credential("4321".to_string()).unwrap_err();

    assert!(matches!(err, PolicyError::AdminNotActive));
    assert_eq!(platform.device.mutation_count(), 0);
    assert_eq!(platform.random.generated(), 0);
    assert!(platform.device.seen_tokens().is_empty());
}

#[test]
fn sequential_resets_never_share_a_token() {
    let (platform, agent) = setup();

    agent.reset_credential("1111".to_string()).unwrap();
    agent.reset_credential("2222".to_string()).unwrap();

    let tokens = platform.device.seen_tokens();
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1]);
    assert_eq!(platform.device.snapshot().credential.as_deref(), Some("2222"));
}

#[test]
fn rejected_reset_is_not_retried() {
    let (platform, agent) = setup();
    platform.device.fail_operation(Operation::ResetCredential);

    let err = agent.reset_credential("4321".to_string()).unwrap_err();

    assert!(matches!(err, PolicyError::ResetRejected(_)));
    assert_eq!(platform.device.seen_tokens().len(), 1);
    assert!(!platform.device.snapshot().reset_token_registered);
}

#[test]
fn second_escalation_while_overlay_live_is_rejected() {
    let (platform, agent) = setup();

    agent.escalate().unwrap();
    let err = agent.escalate().unwrap_err();

    assert!(matches!(err, PolicyError::AlreadyEscalating));
    assert_eq!(platform.overlay.live().len(), 1);
    assert_eq!(platform.channel.commands().len(), 1);
}

#[test]
fn escalation_on_unprivileged_device_degrades_gracefully() {
    let (platform, agent) = setup();
    platform.channel.set_available(false);

    let outcome = agent.execute(AgentCommand::EscalateToRestrictedSurface);

    assert!(matches!(
        outcome,
        ActionOutcome::Failed {
            kind: ErrorKind::EscalationDenied,
            ..
        }
    ));
    assert_eq!(agent.escalation_state(), EscalationState::Idle);
    assert!(platform.overlay.live().is_empty());
}

#[test]
fn escalation_dispatches_configured_command_and_waits_for_dismiss() {
    let (platform, agent) = setup();

    agent.escalate().unwrap();
    assert_eq!(
        platform.channel.commands(),
        vec![PolicyConfig::default().escalation_command]
    );
    assert!(matches!(
        agent.escalation_state(),
        EscalationState::OverlayShown { .. }
    ));

    agent.dismiss_overlay();
    assert_eq!(agent.escalation_state(), EscalationState::Idle);
    assert!(platform.overlay.live().is_empty());
}

#[test]
fn full_session_from_startup() {
    let (platform, agent) = setup_with(PolicyConfig {
        fixed_reset_credential: Some("4321".to_string()),
        ..PolicyConfig::default()
    });

    assert_eq!(agent.start().unwrap(), ManagedModeState::Managed);
    let outcomes = [
        AgentCommand::LockNow,
        AgentCommand::ResetCredential {
            new_credential: None,
        },
        AgentCommand::EscalateToRestrictedSurface,
        AgentCommand::DismissOverlay,
        AgentCommand::DisableManagedMode,
    ]
    .into_iter()
    .map(|command| agent.execute(command))
    .collect::<Vec<_>>();

    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ActionOutcome::Completed { .. })));
    assert_eq!(
        outcomes[1],
        ActionOutcome::Completed {
            message: "credential changed to: 4321".to_string()
        }
    );
    let snapshot = platform.device.snapshot();
    assert!(snapshot.locked);
    assert!(snapshot.disallowed.is_empty());
    assert!(snapshot.preferred_home.is_empty());
}
