// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-ratelimit
//!
//! Two file-backed concurrency primitives shared by every worker process
//! (spec §4.5, "C5"):
//!
//! - [`cooldown`] — a single global timestamp all workers observe. Any
//!   worker may extend it; extensions only ever move it further into the
//!   future (monotonic merge), so a slow writer can never shorten a
//!   cooldown another worker just set.
//! - [`semaphore`] — a bounded pool of N slots, one file per slot, claimed
//!   with `O_EXCL` create. A slot held by a process that no longer exists
//!   is detected via pid liveness and reclaimed.

/// The global rate-limit cooldown barrier.
pub mod cooldown;
/// The bounded N-slot process semaphore.
pub mod semaphore;

pub use cooldown::Cooldown;
pub use semaphore::{Semaphore, SemaphoreGuard};
