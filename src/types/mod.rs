//! Core domain types shared by the ingestion, acknowledgement and health
//! components.

pub mod ids;
pub mod outcome;
pub mod time_group;

pub use ids::TimeGroupId;
pub use outcome::{Outcome, UNEXPECTED_ERROR_MESSAGE};
pub use time_group::{TimeGroup, TimeGroupTag};
