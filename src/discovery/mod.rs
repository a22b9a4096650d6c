//! Player discovery modules

pub mod engine;
pub mod geo;

pub use engine::{AgeBand, Candidate, CandidateAction, DiscoveryEngine, DiscoveryFilter};
