//! Run monitor: drives one run handle to a terminal status.
//!
//! The monitor polls sequentially, waits the policy cooldown between
//! non-terminal observations, and fetches the result collection at most once
//! after a successful run. The cancellation token is checked before each poll,
//! after each response arrives, after the cooldown, and around the result
//! fetch. Once cancellation is observed nothing more is published.

use crate::engine::clock::Clock;
use crate::error::RunError;
use crate::model::{
    MonitorEnd, MonitorEvent, MonitorReport, PollCycle, PollPolicy, ResultSet, RunHandle,
    RunStatus,
};
use crate::platform::ActorPlatform;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

pub struct RunMonitor {
    platform: Arc<dyn ActorPlatform>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
    cancel: CancellationToken,
    run_id: String,
    status: RunStatus,
    result_pointer: Option<String>,
    results: Option<ResultSet>,
    polls: u32,
}

impl RunMonitor {
    /// Every monitor starts from the handle alone; nothing carries over from
    /// a monitor previously watching another run.
    pub fn new(
        platform: Arc<dyn ActorPlatform>,
        clock: Arc<dyn Clock>,
        policy: PollPolicy,
        handle: RunHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            platform,
            clock,
            policy,
            cancel,
            run_id: handle.run_id,
            status: handle.status,
            result_pointer: handle.result_pointer,
            results: None,
            polls: 0,
        }
    }

    pub async fn run(mut self, event_tx: UnboundedSender<MonitorEvent>) -> MonitorReport {
        let started = self.clock.now();
        let deadline = self.policy.max_wait.map(|w| started + w);
        tracing::debug!(run_id = %self.run_id, status = %self.status, "monitor started");

        // A handle that is already terminal needs no polling.
        while !self.status.is_terminal() {
            if self.cancel.is_cancelled() {
                return self.cancelled();
            }

            let fetched = self.platform.run_status(&self.run_id).await;
            if self.cancel.is_cancelled() {
                tracing::debug!(run_id = %self.run_id, "dropping status response after cancel");
                return self.cancelled();
            }
            self.polls += 1;

            let snapshot = match fetched {
                Ok(s) => s,
                Err(e) => {
                    let err = RunError::Poll(e);
                    tracing::warn!(
                        run_id = %self.run_id,
                        last_status = %self.status,
                        error = %err,
                        "status poll failed; monitoring stopped"
                    );
                    let _ = event_tx.send(MonitorEvent::PollFailed {
                        run_id: self.run_id.clone(),
                        last_status: self.status,
                        message: err.to_string(),
                    });
                    return self.report(MonitorEnd::Failed(err.to_failure()), None);
                }
            };

            self.adopt(snapshot.status);
            if self.result_pointer.is_none() {
                self.result_pointer = snapshot.result_pointer;
            }
            let _ = event_tx.send(MonitorEvent::Status {
                run_id: self.run_id.clone(),
                cycle: PollCycle {
                    observed: self.status,
                    seq: self.polls,
                },
            });
            if self.status.is_terminal() {
                break;
            }

            let mut pause = self.policy.cooldown;
            if let Some(deadline) = deadline {
                let now = self.clock.now();
                if now >= deadline {
                    let err = RunError::WatchDeadline {
                        last_status: self.status,
                        waited: now.saturating_sub(started),
                    };
                    tracing::warn!(run_id = %self.run_id, error = %err, "watch deadline reached");
                    let _ = event_tx.send(MonitorEvent::DeadlineExceeded {
                        run_id: self.run_id.clone(),
                        last_status: self.status,
                    });
                    return self.report(MonitorEnd::Failed(err.to_failure()), None);
                }
                // The last look at the run lands on the deadline, not past it.
                pause = pause.min(deadline - now);
            }

            let interrupted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = self.clock.sleep(pause) => false,
            };
            if interrupted {
                return self.cancelled();
            }
        }

        tracing::info!(
            run_id = %self.run_id,
            status = %self.status,
            polls = self.polls,
            "run reached terminal status"
        );
        self.resolve_results(&event_tx).await
    }

    /// Take `observed` as current unless it would move the run backwards.
    fn adopt(&mut self, observed: RunStatus) {
        if observed.rank() < self.status.rank() {
            tracing::debug!(
                run_id = %self.run_id,
                current = %self.status,
                %observed,
                "ignoring status regression"
            );
            return;
        }
        if observed != self.status {
            tracing::debug!(run_id = %self.run_id, from = %self.status, to = %observed, "status changed");
        }
        self.status = observed;
    }

    async fn resolve_results(mut self, event_tx: &UnboundedSender<MonitorEvent>) -> MonitorReport {
        if self.status != RunStatus::Succeeded {
            return self.report(MonitorEnd::Terminal, None);
        }
        let Some(pointer) = self.result_pointer.clone() else {
            return self.report(MonitorEnd::Terminal, None);
        };
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }

        let fetched = self.platform.result_items(&pointer).await;
        if self.cancel.is_cancelled() {
            tracing::debug!(run_id = %self.run_id, "dropping results after cancel");
            return self.cancelled();
        }

        match fetched {
            Ok(items) => {
                tracing::info!(run_id = %self.run_id, items = items.len(), "results fetched");
                let results = ResultSet { items };
                let _ = event_tx.send(MonitorEvent::Results {
                    run_id: self.run_id.clone(),
                    results: results.clone(),
                });
                self.results = Some(results);
                self.report(MonitorEnd::Terminal, None)
            }
            Err(e) => {
                let err = RunError::ResultFetch(e);
                tracing::warn!(run_id = %self.run_id, %pointer, error = %err, "result fetch failed");
                let _ = event_tx.send(MonitorEvent::ResultsUnavailable {
                    run_id: self.run_id.clone(),
                    message: err.to_string(),
                });
                self.report(MonitorEnd::Terminal, Some(err))
            }
        }
    }

    fn cancelled(self) -> MonitorReport {
        tracing::debug!(run_id = %self.run_id, polls = self.polls, "monitor cancelled");
        self.report(MonitorEnd::Cancelled, None)
    }

    fn report(self, end: MonitorEnd, result_error: Option<RunError>) -> MonitorReport {
        MonitorReport {
            finished_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            run_id: self.run_id,
            status: self.status,
            result_pointer: self.result_pointer,
            results: self.results,
            polls: self.polls,
            end,
            result_error: result_error.map(|e| e.to_failure()),
        }
    }
}
