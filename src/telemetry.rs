//! Rule violations and invariant checks.
//!
//! A session never panics over its own bookkeeping. When something it relies on turns out false
//! (state failing validation at a round boundary, a listener panicking, a countdown firing for a
//! phase already left) it builds a [`RuleViolation`] and hands it to a [`ViolationObserver`].
//! The registry's observer is used when one was configured, [`TracingObserver`] otherwise.
//!
//! ```
//! use spark_engine::telemetry::{CollectingObserver, ViolationKind};
//!
//! let observer = CollectingObserver::new();
//! assert!(observer.is_empty());
//! assert!(!observer.has_violation(ViolationKind::GameState));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::SessionId;

/// How bad a violation is. Ordered from mildest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// The session recovered and carried on.
    Warning,
    /// The session carried on, but an operation was dropped.
    Error,
    /// Session state can no longer be trusted.
    Critical,
}

impl ViolationSeverity {
    /// Lowercase label used in logs and JSON.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the engine noticed the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// A countdown or transition that does not fit the current phase.
    PhaseTransition,
    /// [`GameState`](crate::GameState) failed validation when a round began.
    GameState,
    /// A [`GameEventListener`](crate::GameEventListener) panicked.
    Listener,
    /// Misuse of an internal helper.
    InternalError,
    /// A [`debug_check_invariants!`](crate::debug_check_invariants) check failed.
    ///
    /// Only raised in debug builds or with the `paranoid` feature.
    Invariant,
}

impl ViolationKind {
    /// Lowercase label used in logs and JSON.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PhaseTransition => "phase_transition",
            Self::GameState => "game_state",
            Self::Listener => "listener",
            Self::InternalError => "internal_error",
            Self::Invariant => "invariant",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported violation.
///
/// ```
/// use spark_engine::telemetry::{RuleViolation, ViolationKind, ViolationSeverity};
/// use spark_engine::SessionId;
///
/// let violation = RuleViolation::new(
///     ViolationSeverity::Critical,
///     ViolationKind::GameState,
///     "alive actor missing from participants",
///     "session.rs:42",
/// )
/// .with_session(SessionId::new(3))
/// .with_context("round", "4");
///
/// assert_eq!(violation.session, Some(SessionId::new(3)));
/// assert!(violation.to_string().contains("game_state"));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct RuleViolation {
    /// How bad it is.
    pub severity: ViolationSeverity,
    /// Which subsystem reported it.
    pub kind: ViolationKind,
    /// What went wrong.
    pub message: String,
    /// `file:line` of the report.
    pub location: &'static str,
    /// Session the violation belongs to, when known.
    pub session: Option<SessionId>,
    /// Extra key/value details, sorted by key.
    pub context: BTreeMap<String, String>,
}

impl RuleViolation {
    /// A violation with no session and no context.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            session: None,
            context: BTreeMap::new(),
        }
    }

    /// Attributes the violation to `session`.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Adds a context entry, replacing an earlier one with the same key.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// JSON form of the violation.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    fn context_summary(&self) -> String {
        let pairs: Vec<String> = self
            .context
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        pairs.join(" ")
    }
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.severity, self.kind, self.message)?;
        write!(f, " (at {}", self.location)?;
        if let Some(session) = self.session {
            write!(f, ", {session}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", {}", self.context_summary())?;
        }
        f.write_str(")")
    }
}

/// Receives violations.
///
/// Observers are shared by every session of a registry and may be called from a ticker task.
///
/// ```
/// use spark_engine::telemetry::{RuleViolation, ViolationObserver};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct Counter(AtomicUsize);
///
/// impl ViolationObserver for Counter {
///     fn on_violation(&self, _violation: &RuleViolation) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait ViolationObserver: Send + Sync {
    /// Handles one violation.
    fn on_violation(&self, violation: &RuleViolation);
}

/// Logs violations through `tracing`: warnings at `warn`, everything else at `error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &RuleViolation) {
        let session = violation.session.map(SessionId::as_u64);
        let context = violation.context_summary();
        if violation.severity == ViolationSeverity::Warning {
            tracing::warn!(
                kind = violation.kind.as_str(),
                location = violation.location,
                session,
                context = %context,
                "{}",
                violation.message
            );
        } else {
            tracing::error!(
                severity = violation.severity.as_str(),
                kind = violation.kind.as_str(),
                location = violation.location,
                session,
                context = %context,
                "{}",
                violation.message
            );
        }
    }
}

/// Keeps every violation in memory. Meant for tests.
///
/// ```
/// use spark_engine::telemetry::{
///     CollectingObserver, RuleViolation, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
///
/// let observer = CollectingObserver::new();
/// observer.on_violation(&RuleViolation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::Listener,
///     "listener panicked",
///     "events.rs:1",
/// ));
/// assert_eq!(observer.len(), 1);
/// assert!(observer.has_violation(ViolationKind::Listener));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    seen: Mutex<Vec<RuleViolation>>,
}

impl CollectingObserver {
    /// An observer that has seen nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything collected so far, oldest first.
    #[must_use]
    pub fn violations(&self) -> Vec<RuleViolation> {
        self.seen.lock().clone()
    }

    /// Number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    /// Whether a violation of `kind` was collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.seen.lock().iter().any(|violation| violation.kind == kind)
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &RuleViolation) {
        self.seen.lock().push(violation.clone());
    }
}

/// Fans every violation out to several observers, in order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ViolationObserver>>,
}

impl CompositeObserver {
    /// Forwards to `observers`.
    #[must_use]
    pub fn from_observers(observers: Vec<Arc<dyn ViolationObserver>>) -> Self {
        Self { observers }
    }
}

impl ViolationObserver for CompositeObserver {
    fn on_violation(&self, violation: &RuleViolation) {
        self.observers
            .iter()
            .for_each(|observer| observer.on_violation(violation));
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Sends `violation` to `observer`, or to [`TracingObserver`] when there is none.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &RuleViolation,
) {
    match observer {
        Some(observer) => observer.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Logs a [`RuleViolation`] stamped with the caller's `file:line` through [`TracingObserver`].
///
/// Used where no session observer is in reach.
///
/// ```text
/// report_violation!(severity, kind, "message {}", args);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $($message:tt)+) => {{
        let violation = $crate::telemetry::RuleViolation::new(
            $severity,
            $kind,
            format!($($message)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer(
            None::<&::std::sync::Arc<$crate::telemetry::TracingObserver>>,
            &violation,
        );
    }};
}

/// Fails the test when a [`CollectingObserver`] holds any violation, listing them.
#[macro_export]
macro_rules! assert_no_violations {
    ($observer:expr) => {{
        let collected = $observer.violations();
        assert!(
            collected.is_empty(),
            "{} unexpected violation(s): {:#?}",
            collected.len(),
            collected
        );
    }};
}

/// Fails the test unless a [`CollectingObserver`] holds a violation of the given kind.
#[macro_export]
macro_rules! assert_violation {
    ($observer:expr, $kind:expr) => {{
        let kind = $kind;
        assert!(
            $observer.has_violation(kind),
            "no {} violation among {:#?}",
            kind,
            $observer.violations()
        );
    }};
}

// ------------------------------------------------------------------
// Invariants
// ------------------------------------------------------------------

/// A broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantViolation {
    /// Type that owns the invariant.
    pub type_name: &'static str,
    /// The invariant that no longer holds.
    pub invariant: String,
    /// Which values broke it.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// A violation of `invariant` on `type_name`.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Records the offending values.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.invariant)?;
        match &self.details {
            Some(details) => write!(f, " ({details})"),
            None => Ok(()),
        }
    }
}

/// Types that can check their own structural invariants.
pub trait InvariantChecker {
    /// `Ok` when every invariant holds, otherwise the first one found broken.
    ///
    /// # Errors
    ///
    /// The first [`InvariantViolation`] found.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Runs [`InvariantChecker::check_invariants`] and reports a critical violation on failure.
///
/// Compiles to nothing in release builds unless the `paranoid` feature is on.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($subject:expr, $during:expr) => {{
        if let Err(broken) = $crate::telemetry::InvariantChecker::check_invariants(&$subject) {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{} during {}",
                broken,
                $during
            );
        }
    }};
}

/// Release build without `paranoid`: checks are skipped.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($subject:expr, $during:expr) => {{}};
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn violation(kind: ViolationKind, message: &str) -> RuleViolation {
        RuleViolation::new(ViolationSeverity::Warning, kind, message, "test.rs:1")
    }

    #[test]
    fn severities_are_ordered() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn display_includes_location_session_and_context() {
        let violation = RuleViolation::new(
            ViolationSeverity::Error,
            ViolationKind::PhaseTransition,
            "countdown fired twice",
            "test.rs:10",
        )
        .with_session(SessionId::new(5))
        .with_context("round", "2")
        .with_context("phase", "voting");

        assert_eq!(
            violation.to_string(),
            "[error/phase_transition] countdown fired twice \
             (at test.rs:10, session#5, phase=voting round=2)"
        );
    }

    #[test]
    fn collecting_observer_keeps_everything_in_order() {
        let observer = CollectingObserver::new();
        observer.on_violation(&violation(ViolationKind::Listener, "first"));
        observer.on_violation(&violation(ViolationKind::GameState, "second"));

        assert_eq!(observer.len(), 2);
        assert!(observer.has_violation(ViolationKind::GameState));
        assert!(!observer.has_violation(ViolationKind::Invariant));
        let messages: Vec<String> = observer.violations().into_iter().map(|v| v.message).collect();
        assert_eq!(messages, ["first", "second"]);
    }

    #[test]
    fn composite_observer_forwards_to_every_child() {
        let a = Arc::new(CollectingObserver::new());
        let b = Arc::new(CollectingObserver::new());
        let composite = CompositeObserver::from_observers(vec![a.clone(), b.clone()]);

        composite.on_violation(&violation(ViolationKind::PhaseTransition, "late countdown"));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert!(format!("{composite:?}").contains("observers: 2"));
    }

    #[test]
    fn report_to_observer_falls_back_to_tracing() {
        let observer = Arc::new(CollectingObserver::new());
        let stray = violation(ViolationKind::GameState, "stray alive actor");
        report_to_observer(Some(&observer), &stray);
        report_to_observer(None::<&Arc<CollectingObserver>>, &stray);
        assert_eq!(observer.len(), 1);
    }

    #[test]
    fn invariant_violation_display() {
        let broken = InvariantViolation::new("GameState", "alive ⊆ participating")
            .with_details("actor#4 alive but not participating");
        assert_eq!(
            broken.to_string(),
            "GameState: alive ⊆ participating (actor#4 alive but not participating)"
        );
    }

    #[test]
    fn violation_serializes_with_session() {
        let violation = violation(ViolationKind::Listener, "boom").with_session(SessionId::new(12));
        let json = serde_json::to_string(&violation).unwrap();
        assert!(json.contains(r#""severity":"warning""#));
        assert!(json.contains(r#""kind":"listener""#));
        assert!(json.contains(r#""session":12"#));
    }
}
