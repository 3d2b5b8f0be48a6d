// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-agent worker loop (spec §4.7-§4.11): claim a task, invoke the
//! engine, enforce the review and quality gates, close with an idempotent
//! receipt, and dispatch any follow-ups.
//!
//! [`supervisor::run_pending`] is the crate's single entry point for a
//! worker binary; everything else here is a building block it composes.

pub mod attempt;
pub mod closure;
pub mod engine;
pub mod prompt;
pub mod supervisor;

pub use attempt::{run_attempt, AttemptOutcome};
pub use closure::{close, close_vanished, CloseOutcome, CloseRequest};
pub use engine::{CommandEngineLauncher, EngineLauncher, EngineSpec};
pub use prompt::{build_prompt_envelope, EngineFollowUp, EngineOutput};
pub use supervisor::{run_pending, TaskResult, WorkerConfig};
