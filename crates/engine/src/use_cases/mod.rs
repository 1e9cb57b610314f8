//! Use cases: the injection algorithm and the trigger orchestration.

pub mod inject;
pub mod trigger;

pub use inject::{inject, InjectionOutcome};
pub use trigger::{trigger_workflow, TriggerError, TriggerOutcome, WorkflowSource};
