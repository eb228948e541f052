//! One-vote-per-voter tally for a single voting phase.

use std::collections::BTreeMap;

use crate::error::{IneligibleReason, SparkError};
use crate::state::GameState;
use crate::{ActorId, ActorList};

/// Votes of the current voting phase.
///
/// # Example
///
/// ```
/// # use std::collections::BTreeMap;
/// use spark_engine::{ActorId, GameState, Role, VoteTally};
///
/// let mut state = GameState::new("demo");
/// let roles: BTreeMap<_, _> = (1..=4)
///     .map(|raw| (ActorId::new(raw), if raw == 1 { Role::Spark } else { Role::Innocent }))
///     .collect();
/// state.populate("demo", roles);
///
/// let mut tally = VoteTally::new();
/// tally.register_vote(&state, Some(ActorId::new(2)), Some(ActorId::new(1))).unwrap();
/// tally.register_vote(&state, Some(ActorId::new(3)), Some(ActorId::new(1))).unwrap();
/// assert_eq!(tally.most_voted(), Some(ActorId::new(1)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    votes: BTreeMap<ActorId, ActorId>,
    counts: BTreeMap<ActorId, u32>,
}

impl VoteTally {
    /// Creates an empty tally.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `voter`'s vote against `target` and returns the target's new vote count.
    ///
    /// # Errors
    ///
    /// Returns [`SparkError::IneligibleAction`] without recording anything when either side is
    /// missing or dead, when the voter already voted, or when the voter targets themselves.
    pub fn register_vote(
        &mut self,
        state: &GameState,
        voter: Option<ActorId>,
        target: Option<ActorId>,
    ) -> Result<u32, SparkError> {
        let voter = voter.ok_or(IneligibleReason::MissingActor)?;
        let target = target.ok_or(IneligibleReason::MissingTarget)?;
        if !state.is_alive(voter) {
            return Err(IneligibleReason::ActorNotAlive(voter).into());
        }
        if !state.is_alive(target) {
            return Err(IneligibleReason::TargetNotAlive(target).into());
        }
        if self.votes.contains_key(&voter) {
            return Err(IneligibleReason::AlreadyVoted(voter).into());
        }
        if voter == target {
            return Err(IneligibleReason::SelfTarget.into());
        }

        self.votes.insert(voter, target);
        let count = self.counts.entry(target).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }

    /// The unique most-voted target, or `None` when nobody voted or the top is tied.
    #[must_use]
    pub fn most_voted(&self) -> Option<ActorId> {
        match self.leaders().as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Every target sharing the highest vote count, in ascending id order.
    #[must_use]
    pub fn leaders(&self) -> ActorList {
        let Some(max) = self.counts.values().copied().max() else {
            return ActorList::new();
        };
        self.counts
            .iter()
            .filter(|(_, count)| **count == max)
            .map(|(target, _)| *target)
            .collect()
    }

    /// Votes received by `target`.
    #[must_use]
    pub fn votes_for(&self, target: ActorId) -> u32 {
        self.counts.get(&target).copied().unwrap_or(0)
    }

    /// Vote counts per target.
    #[must_use]
    pub fn vote_counts(&self) -> &BTreeMap<ActorId, u32> {
        &self.counts
    }

    /// Whom `voter` voted for, if anyone.
    #[must_use]
    pub fn vote_of(&self, voter: ActorId) -> Option<ActorId> {
        self.votes.get(&voter).copied()
    }

    /// Whether `voter` already voted.
    #[must_use]
    pub fn has_voted(&self, voter: ActorId) -> bool {
        self.votes.contains_key(&voter)
    }

    /// Number of votes cast.
    #[must_use]
    pub fn total_votes(&self) -> usize {
        self.votes.len()
    }

    /// Forgets every vote.
    pub fn clear(&mut self) {
        self.votes.clear();
        self.counts.clear();
    }

    /// Drops the vote cast by `actor` and every vote cast against them.
    ///
    /// Voters whose target was removed may vote again.
    pub fn remove_actor(&mut self, actor: ActorId) {
        if let Some(target) = self.votes.remove(&actor) {
            if let Some(count) = self.counts.get_mut(&target) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.counts.remove(&target);
                }
            }
        }
        self.votes.retain(|_, target| *target != actor);
        self.counts.remove(&actor);
    }
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
    use crate::Role;

    fn a(raw: u64) -> ActorId {
        ActorId::new(raw)
    }

    fn state(n: u64) -> GameState {
        let roles = (1..=n)
            .map(|raw| {
                let role = if raw == 1 { Role::Spark } else { Role::Innocent };
                (a(raw), role)
            })
            .collect();
        let mut state = GameState::new("votes");
        state.populate("votes", roles);
        state
    }

    fn rejection(err: SparkError) -> IneligibleReason {
        match err {
            SparkError::IneligibleAction { reason } => reason,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn counts_accumulate_per_target() {
        let state = state(5);
        let mut tally = VoteTally::new();
        assert_eq!(tally.register_vote(&state, Some(a(2)), Some(a(1))).unwrap(), 1);
        assert_eq!(tally.register_vote(&state, Some(a(3)), Some(a(1))).unwrap(), 2);
        assert_eq!(tally.register_vote(&state, Some(a(4)), Some(a(5))).unwrap(), 1);

        assert_eq!(tally.votes_for(a(1)), 2);
        assert_eq!(tally.total_votes(), 3);
        assert_eq!(tally.vote_of(a(4)), Some(a(5)));
        assert_eq!(tally.most_voted(), Some(a(1)));
    }

    #[test]
    fn rejected_votes_leave_no_trace() {
        let mut state = state(4);
        state.eliminate(a(4));
        let mut tally = VoteTally::new();
        tally.register_vote(&state, Some(a(2)), Some(a(1))).unwrap();
        let before = tally.clone();

        let cases = [
            (None, Some(a(1)), IneligibleReason::MissingActor),
            (Some(a(3)), None, IneligibleReason::MissingTarget),
            (Some(a(4)), Some(a(1)), IneligibleReason::ActorNotAlive(a(4))),
            (Some(a(3)), Some(a(4)), IneligibleReason::TargetNotAlive(a(4))),
            (Some(a(2)), Some(a(3)), IneligibleReason::AlreadyVoted(a(2))),
            (Some(a(3)), Some(a(3)), IneligibleReason::SelfTarget),
            (Some(a(9)), Some(a(1)), IneligibleReason::ActorNotAlive(a(9))),
        ];
        for (voter, target, expected) in cases {
            let err = tally.register_vote(&state, voter, target).unwrap_err();
            assert_eq!(rejection(err), expected);
            assert_eq!(tally, before);
        }
    }

    #[test]
    fn tie_has_no_winner() {
        let state = state(5);
        let mut tally = VoteTally::new();
        tally.register_vote(&state, Some(a(1)), Some(a(2))).unwrap();
        tally.register_vote(&state, Some(a(2)), Some(a(3))).unwrap();

        assert_eq!(tally.most_voted(), None);
        assert_eq!(tally.leaders().as_slice(), &[a(2), a(3)]);
    }

    #[test]
    fn empty_tally_has_no_winner() {
        let tally = VoteTally::new();
        assert_eq!(tally.most_voted(), None);
        assert!(tally.leaders().is_empty());
    }

    #[test]
    fn clear_allows_voting_again() {
        let state = state(3);
        let mut tally = VoteTally::new();
        tally.register_vote(&state, Some(a(2)), Some(a(1))).unwrap();
        tally.clear();
        assert!(!tally.has_voted(a(2)));
        assert!(tally.register_vote(&state, Some(a(2)), Some(a(3))).is_ok());
    }

    #[test]
    fn remove_actor_drops_votes_by_and_for_them() {
        let state = state(5);
        let mut tally = VoteTally::new();
        tally.register_vote(&state, Some(a(1)), Some(a(2))).unwrap();
        tally.register_vote(&state, Some(a(3)), Some(a(2))).unwrap();
        tally.register_vote(&state, Some(a(2)), Some(a(4))).unwrap();
        tally.register_vote(&state, Some(a(5)), Some(a(4))).unwrap();

        tally.remove_actor(a(2));

        assert_eq!(tally.votes_for(a(2)), 0);
        assert_eq!(tally.votes_for(a(4)), 1);
        assert!(!tally.has_voted(a(1)));
        assert!(!tally.has_voted(a(2)));
        assert_eq!(tally.most_voted(), Some(a(4)));
        assert!(!tally.vote_counts().contains_key(&a(2)));
    }
}
