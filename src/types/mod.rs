//! Core data types for subjects, actors, action kinds, and stat rows.

pub mod action;
pub mod keys;
pub mod stats;
pub mod subject;

pub use action::ActionKind;
pub use stats::{DailyStats, FlushSummary, KindFlush, PostTotals};
pub use subject::{ActorFingerprint, SubjectId};
