//! Player-facing membership operations
//!
//! Joining the matchmaking queue, submitting scores and reading leaderboards
//! all go through [`MembershipService`].

pub mod service;

pub use service::{MembershipService, MembershipStats};
