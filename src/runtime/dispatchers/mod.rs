//! Worker loops for Runtime
//!
//! - `decision`: polls decision tasks for one workflow type and dispatches their events
//! - `activity`: polls activity tasks for one activity type and runs its handler

mod activity;
mod decision;

pub(crate) use activity::ActivityWorker;
pub(crate) use decision::DecisionWorker;
