pub mod activities;
pub mod orchestrator;
pub mod request;
pub mod strategy;

pub use activities::{ActivityError, ActivityName, IssuanceActivities};
pub use orchestrator::{issue_certificate, ActivityProxy, IssuanceInput};
pub use strategy::{select_strategy, ChallengeStrategy};
