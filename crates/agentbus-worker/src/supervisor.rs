// SPDX-License-Identifier: MIT OR Apache-2.0
//! The worker's task loop (spec §4.7): enumerate an agent's backlog,
//! `in_progress` first so a crash mid-attempt resumes instead of stalling,
//! then `new`/`seen`, and run each through claim, git preflight, the engine
//! race, the review and quality gates, follow-up dispatch, and closure.
//!
//! Every suspension point in the inner loop — the cooldown wait, the
//! semaphore acquire, the engine race itself — is a place another worker's
//! `update` can land; the loop always re-reads the packet from disk before
//! acting on it rather than trusting what it read at the top of the
//! iteration.

use crate::attempt::{run_attempt, AttemptOutcome};
use crate::closure::{close, close_vanished, CloseRequest};
use crate::engine::{EngineLauncher, EngineSpec};
use crate::prompt::{build_prompt_envelope, EngineOutput};

use agentbus_bus::{dispatch_follow_ups, BusStorage, FollowUpSpec, TaskState};
use agentbus_codec::suspicious::SuspiciousPolicy;
use agentbus_config::BusSettings;
use agentbus_core::error::{BusError, BusErrorCode};
use agentbus_core::{GitContract, Outcome, PacketHeader, PacketKind, ReceiptExtra};
use agentbus_quality_gate::QualityGateConfig;
use agentbus_ratelimit::{Cooldown, Semaphore};
use agentbus_receipt::ReceiptStore;
use agentbus_retry::{BackoffPolicy, FailureClass};
use agentbus_review_gate::ReviewEvidence;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the supervisor needs beyond the bus/receipt/roster handles
/// every crate in this workspace already threads through: which agent this
/// process is working on behalf of, where its git checkout lives, and how
/// to invoke its engine.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Agent name this process works on behalf of.
    pub agent: String,
    /// Git working tree the engine runs in.
    pub repo_path: PathBuf,
    /// Engine executable.
    pub engine_program: String,
    /// Engine arguments.
    pub engine_args: Vec<String>,
    /// Names of every known agent, for delivery validation.
    pub known_agents: Vec<String>,
    /// Name of the distinguished orchestrator agent.
    pub orchestrator_name: String,
    /// Name of the distinguished autopilot agent.
    pub autopilot_name: String,
}

/// How one task's processing ended, for the caller's logging/metrics.
#[derive(Debug)]
pub enum TaskResult {
    /// The task was closed with this outcome.
    Closed(Outcome),
    /// The task vanished from every inbox state before it could be claimed
    /// or mid-attempt; closed as [`Outcome::Skipped`] via [`close_vanished`].
    Cancelled,
    /// Another worker already claimed or processed it; nothing to do.
    AlreadyTaken,
}

/// Run every pending task for `config.agent` to closure, one at a time.
///
/// Enumerates `in_progress` (resumed attempts) first, then `new`, then
/// `seen`, de-duplicated by id so a task already resumed from `in_progress`
/// is never processed twice in the same pass.
///
/// # Errors
///
/// Returns a [`BusError`] only for failures the loop cannot itself resolve
/// into a task closure (bus/filesystem unavailability). Per-task failures
/// are resolved into a closed receipt, not propagated here.
pub async fn run_pending(
    bus: &BusStorage,
    receipts: &ReceiptStore,
    settings: &BusSettings,
    config: &WorkerConfig,
    launcher: &dyn EngineLauncher,
) -> Result<Vec<(String, TaskResult)>, BusError> {
    let mut seen_ids = BTreeSet::new();
    let mut ordered_ids = Vec::new();
    for state in [TaskState::InProgress, TaskState::New, TaskState::Seen] {
        for id in bus.list_inbox_task_ids(&config.agent, state)? {
            if seen_ids.insert(id.clone()) {
                ordered_ids.push(id);
            }
        }
    }

    let mut results = Vec::with_capacity(ordered_ids.len());
    for id in ordered_ids {
        let outcome = process_one(bus, receipts, settings, config, launcher, &id).await?;
        results.push((id, outcome));
    }
    Ok(results)
}

async fn process_one(
    bus: &BusStorage,
    receipts: &ReceiptStore,
    settings: &BusSettings,
    config: &WorkerConfig,
    launcher: &dyn EngineLauncher,
    id: &str,
) -> Result<TaskResult, BusError> {
    let policy = settings.suspicious_content_policy;

    let (state, _) = match bus.find_task_path(&config.agent, id) {
        Ok(found) => found,
        Err(e) if e.code == BusErrorCode::TaskNotFound => return Ok(TaskResult::AlreadyTaken),
        Err(e) => return Err(e),
    };
    if state == TaskState::New || state == TaskState::Seen {
        match bus.claim_task(&config.agent, id) {
            Ok(_) => {}
            Err(e) if matches!(e.code, BusErrorCode::AlreadyClaimed | BusErrorCode::AlreadyProcessed) => {
                return Ok(TaskResult::AlreadyTaken);
            }
            Err(e) => return Err(e),
        }
    }

    let (packet, _) = bus.open_task(&config.agent, id, false)?;
    let captured_header = packet.header.clone();

    let cooldown = Cooldown::new(bus.root().join("state/global-cooldown.json"));
    let semaphore = Semaphore::new(
        bus.root().join("state/codex-global-semaphore"),
        settings.semaphore_slots as usize,
        Duration::from_secs(settings.semaphore_stale_after_secs),
    );
    let backoff = BackoffPolicy {
        base: Duration::from_secs(settings.retry_base_delay_secs),
        max: Duration::from_secs(settings.retry_max_delay_secs),
        max_attempts: settings.max_retry_attempts,
    };
    let watchdog_timeout = Duration::from_secs(settings.watchdog_timeout_secs);
    let watchdog_grace = Duration::from_secs(settings.watchdog_grace_secs);

    let strict_git = captured_header.signals.kind == Some(PacketKind::Execute);
    let git_contract = captured_header.references.git.clone().unwrap_or_default();
    if let Err(e) = agentbus_git::preflight(&config.repo_path, &git_contract, strict_git) {
        let outcome = close_gate_failure(
            bus,
            receipts,
            config,
            id,
            &captured_header,
            Outcome::Blocked,
            BusErrorCode::GitPreflightBlocked,
            format!("git preflight blocked: {e}"),
        )?;
        return Ok(TaskResult::Closed(outcome));
    }

    let mut engine_attempt: u32 = 0;
    let mut review_retry_used = false;
    let mut retry_reason: Option<String> = None;

    loop {
        if bus.find_task_path(&config.agent, id).is_err() {
            close_vanished(
                bus,
                receipts,
                &config.agent,
                &captured_header,
                Some("task packet vanished before closure".into()),
                &config.orchestrator_name,
                &config.known_agents,
                policy,
            )?;
            return Ok(TaskResult::Cancelled);
        }

        let wait = cooldown.remaining(chrono::Utc::now())?;
        if wait > Duration::ZERO {
            tokio::time::sleep(wait).await;
        }

        let guard = semaphore.acquire(&config.agent)?;
        let attempt_outcome = run_one_attempt(
            bus,
            launcher,
            config,
            id,
            retry_reason.as_deref(),
            watchdog_timeout,
            watchdog_grace,
        )
        .await;
        guard.release()?;
        let attempt_outcome = attempt_outcome?;

        match attempt_outcome {
            AttemptOutcome::Superseded => {
                retry_reason = None;
                continue;
            }
            AttemptOutcome::TimedOut => {
                let outcome = close_gate_failure(
                    bus,
                    receipts,
                    config,
                    id,
                    &captured_header,
                    Outcome::Blocked,
                    BusErrorCode::EngineTimeout,
                    "engine watchdog timeout elapsed".into(),
                )?;
                return Ok(TaskResult::Closed(outcome));
            }
            AttemptOutcome::EngineFailed { class, retry_after_hint, combined_output } => {
                match class {
                    FailureClass::RateLimited => {
                        let delay = retry_after_hint
                            .unwrap_or_else(|| backoff.delay_for_attempt(engine_attempt, jitter_unit()));
                        if let Ok(span) = chrono::Duration::from_std(delay) {
                            cooldown.extend(chrono::Utc::now() + span)?;
                        }
                        if backoff.should_retry(BusErrorCode::EngineRateLimited, engine_attempt) {
                            engine_attempt += 1;
                            retry_reason = Some(format!("engine was rate-limited: {combined_output}"));
                            continue;
                        }
                        let outcome = close_gate_failure(
                            bus,
                            receipts,
                            config,
                            id,
                            &captured_header,
                            Outcome::Blocked,
                            BusErrorCode::EngineRateLimited,
                            format!("rate limited after {} attempts: {combined_output}", engine_attempt + 1),
                        )?;
                        return Ok(TaskResult::Closed(outcome));
                    }
                    FailureClass::StreamDisconnected => {
                        if backoff.should_retry(BusErrorCode::EngineStreamDisconnected, engine_attempt) {
                            tokio::time::sleep(backoff.delay_for_attempt(engine_attempt, jitter_unit())).await;
                            engine_attempt += 1;
                            retry_reason = Some(format!("engine stream disconnected: {combined_output}"));
                            continue;
                        }
                        let outcome = close_gate_failure(
                            bus,
                            receipts,
                            config,
                            id,
                            &captured_header,
                            Outcome::Blocked,
                            BusErrorCode::EngineStreamDisconnected,
                            format!("stream disconnected after {} attempts: {combined_output}", engine_attempt + 1),
                        )?;
                        return Ok(TaskResult::Closed(outcome));
                    }
                    FailureClass::SandboxPermission => {
                        let outcome = close_gate_failure(
                            bus,
                            receipts,
                            config,
                            id,
                            &captured_header,
                            Outcome::Blocked,
                            BusErrorCode::SandboxPermission,
                            format!("sandbox denied a required permission: {combined_output}"),
                        )?;
                        return Ok(TaskResult::Closed(outcome));
                    }
                    FailureClass::Other => {
                        let outcome = close_gate_failure(
                            bus,
                            receipts,
                            config,
                            id,
                            &captured_header,
                            Outcome::Failed,
                            BusErrorCode::OutputSchemaInvalid,
                            format!("engine exited without a usable result: {combined_output}"),
                        )?;
                        return Ok(TaskResult::Closed(outcome));
                    }
                }
            }
            AttemptOutcome::Completed(value) => {
                let engine_output: EngineOutput = match serde_json::from_value(value) {
                    Ok(out) => out,
                    Err(e) => {
                        let outcome = close_gate_failure(
                            bus,
                            receipts,
                            config,
                            id,
                            &captured_header,
                            Outcome::Failed,
                            BusErrorCode::OutputSchemaInvalid,
                            format!("engine artifact did not match the output contract: {e}"),
                        )?;
                        return Ok(TaskResult::Closed(outcome));
                    }
                };

                let (packet, _) = bus.open_task(&config.agent, id, false)?;
                let header = &packet.header;

                if agentbus_review_gate::is_review_required(header, &config.autopilot_name) {
                    let rejection = match &engine_output.review {
                        None => Some("review-required task produced no review evidence".to_string()),
                        Some(evidence) => {
                            let expected = header
                                .signals
                                .review_target
                                .as_ref()
                                .and_then(|t| t.commit_sha.clone())
                                .unwrap_or_default();
                            match agentbus_review_gate::evaluate(evidence, &expected, bus.root()) {
                                Ok(()) => None,
                                Err(e) => Some(e.to_string()),
                            }
                        }
                    };
                    if let Some(reason) = rejection {
                        if !review_retry_used {
                            review_retry_used = true;
                            retry_reason = Some(format!("review evidence rejected: {reason}"));
                            continue;
                        }
                        let outcome = close_gate_failure(
                            bus,
                            receipts,
                            config,
                            id,
                            &captured_header,
                            Outcome::Failed,
                            BusErrorCode::ReviewGateFailure,
                            reason,
                        )?;
                        return Ok(TaskResult::Closed(outcome));
                    }
                }

                let mut receipt_extra = ReceiptExtra::new();
                if let Some(review) = &engine_output.review {
                    if let Ok(v) = serde_json::to_value(review) {
                        receipt_extra.insert("review".into(), v);
                    }
                    let rendered =
                        agentbus_review_gate::render_review_artifact(&config.agent, id, review, &[]);
                    let relative = agentbus_review_gate::artifact::artifact_path(&config.agent, id);
                    let artifact_path = bus.root().join(&relative);
                    if let Some(parent) = artifact_path.parent() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                    match std::fs::write(&artifact_path, rendered) {
                        Ok(()) => {
                            receipt_extra.insert("reviewArtifactPath".into(), relative.into());
                        }
                        Err(e) => {
                            tracing::warn!(
                                task_id = id,
                                error = %e,
                                "failed to write review artifact to disk"
                            );
                        }
                    }
                }

                let mut final_outcome = engine_output.outcome;
                if header.signals.kind == Some(PacketKind::Execute) {
                    match agentbus_quality_gate::run_quality_gate(
                        &config.repo_path,
                        None,
                        None,
                        &QualityGateConfig::default(),
                    ) {
                        Ok(report) => {
                            let _ = agentbus_quality_gate::write_report(&config.repo_path, id, &report);
                            if let Ok(v) = serde_json::to_value(&report) {
                                receipt_extra.insert("qualityGate".into(), v);
                            }
                            if agentbus_quality_gate::failure_code(&report).is_some() {
                                final_outcome = Outcome::NeedsReview;
                            }
                        }
                        Err(e) => {
                            // The gate could not even run (e.g. no git repo, detached
                            // HEAD); a task that changes code must never close `done`
                            // with zero gate evidence, so this fails closed.
                            let outcome = close_gate_failure(
                                bus,
                                receipts,
                                config,
                                id,
                                &captured_header,
                                Outcome::NeedsReview,
                                BusErrorCode::QualityGateFailure,
                                format!("quality gate could not be run: {e}"),
                            )?;
                            return Ok(TaskResult::Closed(outcome));
                        }
                    }
                }

                let follow_up_specs: Vec<FollowUpSpec> = engine_output
                    .follow_ups
                    .iter()
                    .map(|f| FollowUpSpec {
                        to: f.to.clone(),
                        title: f.title.clone(),
                        body: f.body.clone(),
                        signals: agentbus_core::Signals {
                            kind: f.kind,
                            phase: f.phase.clone(),
                            ..Default::default()
                        },
                        references: agentbus_core::References::default(),
                        priority: f.priority.clone(),
                    })
                    .collect();
                if !follow_up_specs.is_empty() {
                    let dispatch = dispatch_follow_ups(
                        bus,
                        header,
                        &follow_up_specs,
                        &config.known_agents,
                        policy,
                        settings.follow_up_cap as usize,
                    );
                    if let Ok(v) = serde_json::to_value(dispatch.dispatched_ids.clone()) {
                        receipt_extra.insert("followUpIds".into(), v);
                    }
                    if dispatch.truncated > 0 {
                        receipt_extra.insert("followUpsTruncated".into(), dispatch.truncated.into());
                    }
                }

                let request = CloseRequest {
                    agent: &config.agent,
                    id,
                    outcome: final_outcome,
                    note: engine_output.note,
                    commit_sha: engine_output.commit_sha,
                    receipt_extra,
                    notify_orchestrator: header.signals.should_notify_orchestrator(),
                };
                close(
                    bus,
                    receipts,
                    request,
                    &config.orchestrator_name,
                    &config.known_agents,
                    policy,
                )?;
                return Ok(TaskResult::Closed(final_outcome));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one_attempt(
    bus: &BusStorage,
    launcher: &dyn EngineLauncher,
    config: &WorkerConfig,
    id: &str,
    retry_reason: Option<&str>,
    watchdog_timeout: Duration,
    watchdog_grace: Duration,
) -> Result<AttemptOutcome, BusError> {
    let (_, packet_path) = bus.find_task_path(&config.agent, id)?;
    let raw = std::fs::read_to_string(&packet_path)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("read {}: {e}", packet_path.display())))?;
    let baseline_mtime = std::fs::metadata(&packet_path)
        .and_then(|m| m.modified())
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("stat {}: {e}", packet_path.display())))?;

    let artifact_dir = bus.root().join("artifacts").join(&config.agent);
    std::fs::create_dir_all(&artifact_dir)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("create {}: {e}", artifact_dir.display())))?;
    let artifact_path = artifact_dir.join(format!("{id}.json"));
    let _ = std::fs::remove_file(&artifact_path);

    let spec = EngineSpec {
        program: config.engine_program.clone(),
        args: config.engine_args.clone(),
        cwd: config.repo_path.clone(),
        env: Default::default(),
        stdin: build_prompt_envelope(&raw, retry_reason),
    };

    run_attempt(
        launcher,
        &spec,
        &artifact_path,
        &packet_path,
        baseline_mtime,
        watchdog_timeout,
        watchdog_grace,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
fn close_gate_failure(
    bus: &BusStorage,
    receipts: &ReceiptStore,
    config: &WorkerConfig,
    id: &str,
    header: &PacketHeader,
    outcome: Outcome,
    code: BusErrorCode,
    message: String,
) -> Result<Outcome, BusError> {
    tracing::warn!(agent = %config.agent, id, code = %code, "{message}");
    let mut receipt_extra = ReceiptExtra::new();
    receipt_extra.insert("errorCode".into(), code.tag().into());
    receipt_extra.insert("errorMessage".into(), message.clone().into());

    let request = CloseRequest {
        agent: &config.agent,
        id,
        outcome,
        note: Some(message),
        commit_sha: None,
        receipt_extra,
        notify_orchestrator: header.signals.should_notify_orchestrator(),
    };
    close(bus, receipts, request, &config.orchestrator_name, &config.known_agents, SuspiciousPolicy::Block)?;
    Ok(outcome)
}

/// A jitter source for [`BackoffPolicy::delay_for_attempt`] drawn from the
/// low bits of the current time, not a PRNG — this crate's dependency set
/// deliberately has no `rand`, and wall-clock jitter is adequate for a
/// backoff that only needs to avoid a thundering herd across workers.
fn jitter_unit() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}
