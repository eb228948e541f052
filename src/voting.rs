//! Voting: who voted for whom, and how many votes an elimination needs.
//!
//! [`tally::VoteTally`] enforces one vote per alive voter per voting phase.
//! [`threshold::DynamicVotingThreshold`] turns the alive count and the recent stalemate streak
//! into a required vote count.

pub mod tally;
pub mod threshold;
