// ============================================================================
// Assignment Domain - binding delivery partners to shop orders
// ============================================================================

pub mod matcher;
pub mod offer;
pub mod partners;

pub use matcher::{AssignmentMatcher, MatcherConfig};
pub use offer::{rank_candidates, AssignmentOffer, Candidate};
pub use partners::{InMemoryPartnerDirectory, PartnerDirectory, PartnerPosition};
