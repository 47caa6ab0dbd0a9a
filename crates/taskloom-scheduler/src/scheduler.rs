// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::approval::{AlwaysApprove, Approver};
use crate::executor::{LiveOutputSink, ToolExecutor};
use crate::types::{
    ApprovalMode, ResponseKind, SchedulerEvent, ToolCallRequest, ToolCallResponse,
    ToolCallSnapshot, ToolCallStatus,
};

/// Errors the scheduler surfaces to its caller. Per-call failures never
/// reach here — they are reported as a terminal `Error` status inside the
/// call's own snapshot instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("duplicate call_id {0:?}: a call with this id is already tracked")]
    DuplicateCallId(String),
}

/// Default per-call timeout, overridable per tool by the executor's own
/// internal bookkeeping; the scheduler applies this uniformly as a floor.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded-parallelism state machine driving a batch of tool calls from
/// `Scheduled` through to a terminal status. Owns a `{callId → snapshot}`
/// map for the lifetime of the process; callers obtain progress only
/// through the `SchedulerEvent` channel returned by [`Scheduler::new`].
pub struct Scheduler {
    calls: Mutex<HashMap<String, ToolCallSnapshot>>,
    semaphore: Arc<Semaphore>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    approval_mode: ApprovalMode,
    approver: Arc<dyn Approver>,
    executor: Arc<dyn ToolExecutor>,
    call_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        executor: Arc<dyn ToolExecutor>,
        max_parallel: usize,
        approval_mode: ApprovalMode,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SchedulerEvent>) {
        Self::with_approver(executor, max_parallel, approval_mode, Arc::new(AlwaysApprove))
    }

    pub fn with_approver(
        executor: Arc<dyn ToolExecutor>,
        max_parallel: usize,
        approval_mode: ApprovalMode,
        approver: Arc<dyn Approver>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            calls: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
            events: tx,
            approval_mode,
            approver,
            executor,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        });
        (scheduler, rx)
    }

    /// Schedule one batch of requests. Every request is inserted as
    /// `Scheduled` before any of them advance; a duplicate `call_id` (either
    /// within this batch or against a call still tracked from a previous
    /// batch) rejects the whole batch, so a duplicate `call_id` never
    /// produces two independent lifecycles.
    ///
    /// Returns once every request in the batch has reached a terminal
    /// status; `SchedulerEvent::AllToolCallsComplete` fires exactly once,
    /// immediately before this call returns, carrying every call in the
    /// batch (not just this batch — carrying exactly this batch).
    #[instrument(skip(self, requests, cancel))]
    pub async fn schedule(
        self: &Arc<Self>,
        requests: Vec<ToolCallRequest>,
        cancel: CancellationToken,
    ) -> Result<Vec<ToolCallSnapshot>, SchedulerError> {
        if requests.is_empty() {
            return Ok(vec![]);
        }

        {
            let mut seen = std::collections::HashSet::new();
            let mut calls = self.calls.lock().await;
            for r in &requests {
                if calls.contains_key(&r.call_id) || !seen.insert(r.call_id.clone()) {
                    return Err(SchedulerError::DuplicateCallId(r.call_id.clone()));
                }
            }
            for r in &requests {
                calls.insert(r.call_id.clone(), ToolCallSnapshot::scheduled(r.clone()));
            }
        }
        self.broadcast_update().await;

        let total = requests.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let batch_ids: Vec<String> = requests.iter().map(|r| r.call_id.clone()).collect();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel::<(String, String)>();

        // Drain live-output updates into the tracked snapshot (so
        // `ToolCallsUpdate`/`AllToolCallsComplete` always reflect the latest
        // chunk, per SPEC_FULL §4.5) and then the event channel.
        let this = self.clone();
        let live_drain = tokio::spawn(async move {
            while let Some((call_id, chunk)) = live_rx.recv().await {
                this.record_live_output(&call_id, chunk).await;
            }
        });

        let handles = requests.into_iter().map(|request| {
            let this = self.clone();
            let cancel = cancel.clone();
            let completed = completed.clone();
            let live_tx = live_tx.clone();
            let batch_ids = batch_ids.clone();
            tokio::spawn(async move {
                this.drive_call(request, cancel, live_tx).await;
                let n = completed.fetch_add(1, Ordering::SeqCst) + 1;
                this.broadcast_update().await;
                if n == total {
                    let calls = this.calls.lock().await;
                    let snapshot: Vec<ToolCallSnapshot> =
                        batch_ids.iter().filter_map(|id| calls.get(id).cloned()).collect();
                    drop(calls);
                    let _ = this.events.send(SchedulerEvent::AllToolCallsComplete(snapshot));
                }
            })
        });

        futures::future::join_all(handles).await;
        drop(live_tx);
        let _ = live_drain.await;

        let calls = self.calls.lock().await;
        Ok(batch_ids.iter().filter_map(|id| calls.get(id).cloned()).collect())
    }

    /// Drive a single call from `Scheduled` through to a terminal state,
    /// bounded by `self.semaphore` and racing `cancel` at every suspension
    /// point.
    async fn drive_call(
        self: &Arc<Self>,
        request: ToolCallRequest,
        cancel: CancellationToken,
        live_tx: mpsc::UnboundedSender<(String, String)>,
    ) {
        let call_id = request.call_id.clone();

        if cancel.is_cancelled() {
            self.terminate(&call_id, ToolCallResponse::cancelled("cancelled before start")).await;
            return;
        }

        self.set_status(&call_id, ToolCallStatus::Validating).await;
        if let Err(msg) = self.executor.validate(&request).await {
            self.terminate(&call_id, ToolCallResponse::error(format!("invalid arguments: {msg}"))).await;
            return;
        }

        let destructive = self.executor.is_destructive(&request.tool_name);
        let needs_confirmation = match self.approval_mode {
            ApprovalMode::Auto => false,
            ApprovalMode::Interactive => true,
            ApprovalMode::DefaultOnlyDestructive => destructive,
        };

        if needs_confirmation {
            self.set_status(&call_id, ToolCallStatus::AwaitingApproval).await;
            let approved = tokio::select! {
                a = self.approver.confirm(&request) => a,
                _ = cancel.cancelled() => false,
            };
            if !approved {
                self.terminate(&call_id, ToolCallResponse::cancelled("rejected by approval policy")).await;
                return;
            }
        }

        // Bound parallelism; waiting here still honours cancellation so a
        // queued-but-never-run call ends as Cancelled rather than hanging.
        let permit = tokio::select! {
            p = self.semaphore.clone().acquire_owned() => p,
            _ = cancel.cancelled() => {
                self.terminate(&call_id, ToolCallResponse::cancelled("cancelled while queued")).await;
                return;
            }
        };
        let Ok(_permit) = permit else {
            self.terminate(&call_id, ToolCallResponse::error("scheduler shut down")).await;
            return;
        };

        self.set_status(&call_id, ToolCallStatus::Executing).await;
        let live = LiveOutputSink::new(call_id.clone(), live_tx);
        let child_cancel = cancel.child_token();

        let response = tokio::select! {
            r = tokio::time::timeout(self.call_timeout, self.executor.execute(&request, live, child_cancel.clone())) => {
                match r {
                    Ok(resp) => resp,
                    Err(_elapsed) => {
                        child_cancel.cancel();
                        ToolCallResponse::error(format!("timed out after {:?}", self.call_timeout))
                    }
                }
            }
            _ = cancel.cancelled() => {
                child_cancel.cancel();
                ToolCallResponse::cancelled("cancelled while executing")
            }
        };

        self.terminate(&call_id, response).await;
    }

    async fn set_status(&self, call_id: &str, status: ToolCallStatus) {
        {
            let mut calls = self.calls.lock().await;
            if let Some(c) = calls.get_mut(call_id) {
                c.status = status;
            }
        }
        self.broadcast_update().await;
    }

    async fn terminate(&self, call_id: &str, response: ToolCallResponse) {
        {
            let mut calls = self.calls.lock().await;
            if let Some(c) = calls.get_mut(call_id) {
                // A call already terminal (e.g. abandoned after cancellation
                // raced a late executor result) never re-enters the map.
                if c.status.is_terminal() {
                    return;
                }
                c.status = match response.kind {
                    ResponseKind::Success => ToolCallStatus::Success,
                    ResponseKind::Error => ToolCallStatus::Error,
                    ResponseKind::Cancelled => ToolCallStatus::Cancelled,
                };
                c.response_submitted = true;
                c.response = Some(response);
            }
        }
        self.broadcast_update().await;
    }

    async fn broadcast_update(&self) {
        let calls = self.calls.lock().await;
        let mut snapshot: Vec<ToolCallSnapshot> = calls.values().cloned().collect();
        snapshot.sort_by(|a, b| a.request.call_id.cmp(&b.request.call_id));
        let _ = self.events.send(SchedulerEvent::ToolCallsUpdate(snapshot));
    }

    /// Append a live-output chunk to the tracked snapshot and broadcast it.
    /// This is the sink the batch's live-output drain task (see
    /// [`Scheduler::schedule`]) feeds into for every [`LiveOutputSink::push`];
    /// also callable directly by executors that do not hold a
    /// `LiveOutputSink`, e.g. replaying recorded output in tests.
    pub async fn record_live_output(&self, call_id: &str, chunk: impl Into<String>) {
        let chunk = chunk.into();
        {
            let mut calls = self.calls.lock().await;
            if let Some(c) = calls.get_mut(call_id) {
                let buf = c.live_output.get_or_insert_with(String::new);
                buf.push_str(&chunk);
            }
        }
        let _ = self.events.send(SchedulerEvent::OutputUpdate { call_id: call_id.to_string(), chunk });
    }

    /// Snapshot of every call currently tracked, regardless of batch.
    pub async fn snapshot(&self) -> Vec<ToolCallSnapshot> {
        self.calls.lock().await.values().cloned().collect()
    }

    pub async fn get(&self, call_id: &str) -> Option<ToolCallSnapshot> {
        self.calls.lock().await.get(call_id).cloned()
    }
}
