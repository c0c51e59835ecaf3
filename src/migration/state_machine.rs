//! Finite state machines for network-type migration
//!
//! Two machines share one transition-table shape: a per-feature machine
//! tracking a single translation within a pass, and the global machine
//! tracking the overall type migration across passes.

use std::fmt;

/// A state transition definition
#[derive(Debug)]
pub struct Transition<S, E> {
    pub from: S,
    pub to: S,
    pub event: E,
    pub description: &'static str,
}

impl<S, E> Transition<S, E> {
    const fn new(from: S, to: S, event: E, description: &'static str) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq)]
pub enum TransitionResult<S, E> {
    /// Transition was successful
    Success {
        from: S,
        to: S,
        event: E,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition { current: S, event: E },
    /// Guard condition prevented the transition
    GuardFailed {
        from: S,
        to: S,
        event: E,
        reason: String,
    },
}

impl<S: Copy, E> TransitionResult<S, E> {
    /// State after the attempt; unchanged unless the transition succeeded
    pub fn state(&self) -> S {
        match self {
            TransitionResult::Success { to, .. } => *to,
            TransitionResult::InvalidTransition { current, .. } => *current,
            TransitionResult::GuardFailed { from, .. } => *from,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-feature translation
// ---------------------------------------------------------------------------

/// Progress of one feature's translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureState {
    NotMigrating,
    Translating,
    WaitingForNodeReadiness,
    Translated,
}

impl fmt::Display for FeatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureState::NotMigrating => write!(f, "NotMigrating"),
            FeatureState::Translating => write!(f, "Translating"),
            FeatureState::WaitingForNodeReadiness => write!(f, "WaitingForNodeReadiness"),
            FeatureState::Translated => write!(f, "Translated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureEvent {
    /// Translation for this pass begins
    TranslationStarted,
    /// The target representation needs nodes or namespaces that are not ready
    PreconditionUnmet,
    /// Every source object was translated
    TranslationSucceeded,
}

impl fmt::Display for FeatureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureEvent::TranslationStarted => write!(f, "TranslationStarted"),
            FeatureEvent::PreconditionUnmet => write!(f, "PreconditionUnmet"),
            FeatureEvent::TranslationSucceeded => write!(f, "TranslationSucceeded"),
        }
    }
}

pub struct FeatureStateMachine {
    transitions: Vec<Transition<FeatureState, FeatureEvent>>,
}

impl Default for FeatureStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureStateMachine {
    pub fn new() -> Self {
        use FeatureEvent::*;
        use FeatureState::*;
        Self {
            transitions: vec![
                Transition::new(
                    NotMigrating,
                    Translating,
                    TranslationStarted,
                    "Translation started",
                ),
                Transition::new(
                    WaitingForNodeReadiness,
                    Translating,
                    TranslationStarted,
                    "Retrying translation after waiting",
                ),
                Transition::new(
                    Translated,
                    Translating,
                    TranslationStarted,
                    "Re-running translation",
                ),
                Transition::new(
                    Translating,
                    WaitingForNodeReadiness,
                    PreconditionUnmet,
                    "Target representation is not ready yet",
                ),
                Transition::new(
                    Translating,
                    Translated,
                    TranslationSucceeded,
                    "Translation finished",
                ),
            ],
        }
    }

    pub fn transition(
        &self,
        current: FeatureState,
        event: FeatureEvent,
    ) -> TransitionResult<FeatureState, FeatureEvent> {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }
}

// ---------------------------------------------------------------------------
// Global type migration
// ---------------------------------------------------------------------------

/// Phase of the overall network-type migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationPhase {
    NotStarted,
    InProgress,
    Completed,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationPhase::NotStarted => write!(f, "NotStarted"),
            MigrationPhase::InProgress => write!(f, "InProgress"),
            MigrationPhase::Completed => write!(f, "Completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationEvent {
    /// A live migration to a different plugin was requested
    MigrationRequested,
    /// Some but not all sub-conditions are satisfied
    ConditionsProgressed,
    /// Every sub-condition is satisfied
    AllConditionsMet,
    /// The migration intent was withdrawn while in progress
    MigrationCancelled,
    /// Nothing to do
    Idle,
}

impl fmt::Display for MigrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationEvent::MigrationRequested => write!(f, "MigrationRequested"),
            MigrationEvent::ConditionsProgressed => write!(f, "ConditionsProgressed"),
            MigrationEvent::AllConditionsMet => write!(f, "AllConditionsMet"),
            MigrationEvent::MigrationCancelled => write!(f, "MigrationCancelled"),
            MigrationEvent::Idle => write!(f, "Idle"),
        }
    }
}

/// Facts the global machine's guards look at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationContext {
    /// A live-mode migration intent is present
    pub live_intent: bool,
    /// The intent's target differs from the running network type
    pub target_differs: bool,
    pub mtu_ready: bool,
    pub target_cni_available: bool,
    pub target_cni_in_use: bool,
    pub original_cni_purged: bool,
}

impl MigrationContext {
    pub fn all_conditions_met(&self) -> bool {
        self.mtu_ready
            && self.target_cni_available
            && self.target_cni_in_use
            && self.original_cni_purged
    }
}

pub struct MigrationStateMachine {
    transitions: Vec<Transition<MigrationPhase, MigrationEvent>>,
}

impl Default for MigrationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationStateMachine {
    pub fn new() -> Self {
        use MigrationEvent::*;
        use MigrationPhase::*;
        Self {
            transitions: vec![
                // === NotStarted ===
                Transition::new(
                    NotStarted,
                    InProgress,
                    MigrationRequested,
                    "Live migration started",
                ),
                // === InProgress ===
                Transition::new(
                    InProgress,
                    InProgress,
                    ConditionsProgressed,
                    "Waiting for migration conditions",
                ),
                Transition::new(
                    InProgress,
                    Completed,
                    AllConditionsMet,
                    "All migration conditions met",
                ),
                Transition::new(
                    InProgress,
                    NotStarted,
                    MigrationCancelled,
                    "Migration intent withdrawn",
                ),
                // === Completed ===
                Transition::new(
                    Completed,
                    InProgress,
                    MigrationRequested,
                    "New live migration started",
                ),
            ],
        }
    }

    pub fn transition(
        &self,
        current: MigrationPhase,
        event: MigrationEvent,
        ctx: &MigrationContext,
    ) -> TransitionResult<MigrationPhase, MigrationEvent> {
        let Some(t) = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        else {
            return TransitionResult::InvalidTransition { current, event };
        };

        match self.check_guard(t, ctx) {
            Some(reason) => TransitionResult::GuardFailed {
                from: t.from,
                to: t.to,
                event,
                reason,
            },
            None => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: MigrationPhase, event: MigrationEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    fn check_guard(
        &self,
        transition: &Transition<MigrationPhase, MigrationEvent>,
        ctx: &MigrationContext,
    ) -> Option<String> {
        match transition.event {
            MigrationEvent::MigrationRequested if !ctx.live_intent => {
                Some("no live migration intent".to_string())
            }
            MigrationEvent::MigrationRequested if !ctx.target_differs => {
                Some("target network type is already running".to_string())
            }
            MigrationEvent::AllConditionsMet if !ctx.all_conditions_met() => {
                Some("not all migration conditions are met".to_string())
            }
            _ => None,
        }
    }
}

/// Pick the event for the current phase and facts
pub fn determine_event(current: MigrationPhase, ctx: &MigrationContext) -> MigrationEvent {
    match current {
        MigrationPhase::InProgress if !ctx.live_intent => MigrationEvent::MigrationCancelled,
        MigrationPhase::InProgress if ctx.all_conditions_met() => MigrationEvent::AllConditionsMet,
        MigrationPhase::InProgress => MigrationEvent::ConditionsProgressed,
        _ if ctx.live_intent && ctx.target_differs => MigrationEvent::MigrationRequested,
        _ => MigrationEvent::Idle,
    }
}
