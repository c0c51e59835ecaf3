//! Migration state machine transitions

use network_operator::migration::state_machine::{
    FeatureEvent, FeatureState, FeatureStateMachine, MigrationContext, MigrationEvent,
    MigrationPhase, MigrationStateMachine, TransitionResult, determine_event,
};

fn live_intent() -> MigrationContext {
    MigrationContext {
        live_intent: true,
        target_differs: true,
        ..Default::default()
    }
}

fn all_met() -> MigrationContext {
    MigrationContext {
        mtu_ready: true,
        target_cni_available: true,
        target_cni_in_use: true,
        original_cni_purged: true,
        ..live_intent()
    }
}

/// Drive the machine the way a pass does: pick an event, then transition
fn step(
    sm: &MigrationStateMachine,
    phase: MigrationPhase,
    ctx: &MigrationContext,
) -> MigrationPhase {
    let event = determine_event(phase, ctx);
    if event == MigrationEvent::Idle {
        return phase;
    }
    sm.transition(phase, event, ctx).state()
}

mod global {
    use super::*;

    #[test]
    fn test_lifecycle_walk() {
        let sm = MigrationStateMachine::new();
        let mut ctx = live_intent();

        let phase = step(&sm, MigrationPhase::NotStarted, &ctx);
        assert_eq!(phase, MigrationPhase::InProgress);

        ctx.mtu_ready = true;
        ctx.target_cni_available = true;
        let phase = step(&sm, phase, &ctx);
        assert_eq!(phase, MigrationPhase::InProgress);

        let phase = step(&sm, phase, &all_met());
        assert_eq!(phase, MigrationPhase::Completed);

        // Once the type is switched the target no longer differs
        let settled = MigrationContext {
            target_differs: false,
            ..all_met()
        };
        assert_eq!(step(&sm, phase, &settled), MigrationPhase::Completed);
    }

    #[test]
    fn test_cancel_returns_to_not_started() {
        let sm = MigrationStateMachine::new();
        let withdrawn = MigrationContext::default();

        assert_eq!(
            determine_event(MigrationPhase::InProgress, &withdrawn),
            MigrationEvent::MigrationCancelled
        );
        assert_eq!(
            step(&sm, MigrationPhase::InProgress, &withdrawn),
            MigrationPhase::NotStarted
        );
    }

    #[test]
    fn test_offline_intent_stays_idle() {
        let sm = MigrationStateMachine::new();
        let offline = MigrationContext {
            target_differs: true,
            ..Default::default()
        };

        assert_eq!(
            determine_event(MigrationPhase::NotStarted, &offline),
            MigrationEvent::Idle
        );
        let result = sm.transition(
            MigrationPhase::NotStarted,
            MigrationEvent::MigrationRequested,
            &offline,
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
        assert_eq!(result.state(), MigrationPhase::NotStarted);
    }

    #[test]
    fn test_completed_migration_can_restart() {
        let sm = MigrationStateMachine::new();
        assert!(sm.can_transition(
            MigrationPhase::Completed,
            MigrationEvent::MigrationRequested,
        ));
        assert_eq!(
            step(&sm, MigrationPhase::Completed, &live_intent()),
            MigrationPhase::InProgress
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = MigrationStateMachine::new();
        let ctx = all_met();

        for (phase, event) in [
            (MigrationPhase::NotStarted, MigrationEvent::AllConditionsMet),
            (MigrationPhase::NotStarted, MigrationEvent::MigrationCancelled),
            (MigrationPhase::Completed, MigrationEvent::ConditionsProgressed),
            (MigrationPhase::InProgress, MigrationEvent::MigrationRequested),
        ] {
            let result = sm.transition(phase, event, &ctx);
            assert_eq!(
                result,
                TransitionResult::InvalidTransition {
                    current: phase,
                    event
                }
            );
        }
    }
}

mod feature {
    use super::*;

    #[test]
    fn test_retranslation_from_translated() {
        let sm = FeatureStateMachine::new();
        let state = sm
            .transition(FeatureState::Translated, FeatureEvent::TranslationStarted)
            .state();
        assert_eq!(state, FeatureState::Translating);
    }

    #[test]
    fn test_invalid_feature_transitions() {
        let sm = FeatureStateMachine::new();
        for (state, event) in [
            (FeatureState::NotMigrating, FeatureEvent::PreconditionUnmet),
            (FeatureState::Translated, FeatureEvent::TranslationSucceeded),
            (FeatureState::WaitingForNodeReadiness, FeatureEvent::TranslationSucceeded),
            (FeatureState::Translating, FeatureEvent::TranslationStarted),
        ] {
            let result = sm.transition(state, event);
            assert!(matches!(result, TransitionResult::InvalidTransition { .. }));
            assert_eq!(result.state(), state);
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(
            FeatureState::WaitingForNodeReadiness.to_string(),
            "WaitingForNodeReadiness"
        );
        assert_eq!(MigrationPhase::InProgress.to_string(), "InProgress");
        assert_eq!(
            MigrationEvent::MigrationCancelled.to_string(),
            "MigrationCancelled"
        );
    }
}
