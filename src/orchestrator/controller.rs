//! Watch lifecycle controller.
//!
//! Owns the active run monitor, serializes switching between runs, and emits
//! events for presentation layers.

use crate::engine::{Clock, RunMonitor};
use crate::model::{MonitorEvent, MonitorReport, PollPolicy, RunHandle};
use crate::platform::ActorPlatform;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Commands from presentation layers.
#[derive(Debug, Clone)]
pub(crate) enum WatchCommand {
    /// Watch another run, replacing the current one.
    Watch(RunHandle),
    /// Stop watching the current run.
    Stop,
    Quit,
}

/// Collaborators shared by every monitor the controller starts.
#[derive(Clone)]
pub(crate) struct WatchDeps {
    pub platform: Arc<dyn ActorPlatform>,
    pub clock: Arc<dyn Clock>,
    pub policy: PollPolicy,
}

/// Internal handle for a running monitor task.
struct WatchCtx {
    run_id: String,
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<MonitorReport>>,
}

impl WatchCtx {
    fn request_stop(&self, event_tx: &UnboundedSender<MonitorEvent>) {
        self.cancel.cancel();
        let _ = event_tx.send(MonitorEvent::Info(format!(
            "Stopping watch of {}…",
            self.run_id
        )));
    }
}

/// Spawn a monitor for `handle`. Each one gets its own token so cancelling it
/// never touches another watch.
fn start_watch(
    deps: &WatchDeps,
    handle: RunHandle,
    event_tx: UnboundedSender<MonitorEvent>,
) -> WatchCtx {
    let cancel = CancellationToken::new();
    let run_id = handle.run_id.clone();
    tracing::info!(%run_id, "watching run");
    let _ = event_tx.send(MonitorEvent::Info(format!("Watching run {run_id}")));
    let monitor = RunMonitor::new(
        deps.platform.clone(),
        deps.clock.clone(),
        deps.policy,
        handle,
        cancel.clone(),
    );
    let handle = tokio::spawn(monitor.run(event_tx));
    WatchCtx {
        run_id,
        cancel,
        handle: Some(handle),
    }
}

/// Drive monitors from commands until quit, returning the last report that
/// reached an end other than cancellation.
///
/// With `exit_when_idle` the controller also returns as soon as a watch ends
/// and nothing else is queued.
pub(crate) async fn run_controller(
    deps: &WatchDeps,
    initial: Option<RunHandle>,
    exit_when_idle: bool,
    event_tx: UnboundedSender<MonitorEvent>,
    mut cmd_rx: UnboundedReceiver<WatchCommand>,
) -> Option<MonitorReport> {
    let mut run_ctx = initial.map(|h| start_watch(deps, h, event_tx.clone()));
    let mut pending: Option<RunHandle> = None;
    let mut quit_pending = false;
    let mut cmd_open = true;
    let mut last_report: Option<MonitorReport> = None;
    // If a cancel waits on an in-flight request for too long, say so.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    if run_ctx.is_none() && exit_when_idle {
        return None;
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if cmd_open => {
                if cmd.is_none() {
                    cmd_open = false;
                }
                match cmd {
                    Some(WatchCommand::Watch(handle)) => {
                        // Switching is serialized: the old monitor must return
                        // before the new one starts, so two never overlap.
                        if let Some(ctx) = &run_ctx {
                            ctx.request_stop(&event_tx);
                            pending = Some(handle);
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            run_ctx = Some(start_watch(deps, handle, event_tx.clone()));
                        }
                    }
                    Some(WatchCommand::Stop) => {
                        pending = None;
                        if let Some(ctx) = &run_ctx {
                            ctx.request_stop(&event_tx);
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        }
                    }
                    Some(WatchCommand::Quit) | None => {
                        quit_pending = true;
                        pending = None;
                        if let Some(ctx) = &run_ctx {
                            ctx.request_stop(&event_tx);
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            break;
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(ctx) = &mut run_ctx {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    if let Some(ctx) = &mut run_ctx {
                        ctx.handle.take();
                    }
                    match join_res {
                        Ok(report) if report.is_cancelled() => {
                            tracing::debug!(run_id = %report.run_id, "watch cancelled");
                        }
                        Ok(report) => {
                            let _ = event_tx.send(MonitorEvent::Finished {
                                report: Box::new(report.clone()),
                            });
                            last_report = Some(report);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "monitor task failed");
                            let _ = event_tx.send(MonitorEvent::Info(format!(
                                "Monitor task failed: {e}"
                            )));
                        }
                    }
                    run_ctx = None;
                    cancel_deadline = None;
                    if quit_pending {
                        break;
                    }
                    if let Some(next) = pending.take() {
                        run_ctx = Some(start_watch(deps, next, event_tx.clone()));
                    } else if exit_when_idle {
                        break;
                    }
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline && run_ctx.is_some() {
                        let _ = event_tx.send(MonitorEvent::Info(
                            "Still cancelling (waiting on an in-flight request)…".into(),
                        ));
                        cancel_deadline = None;
                    }
                }
            }
        }
    }

    last_report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{ScriptedPlatform, Step};
    use crate::engine::TokioClock;
    use crate::model::{MonitorEnd, RunStatus};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn deps(platform: &Arc<ScriptedPlatform>) -> WatchDeps {
        WatchDeps {
            platform: platform.clone(),
            clock: Arc::new(TokioClock::new()),
            policy: PollPolicy::default(),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn finished(events: &[MonitorEvent]) -> Vec<&MonitorReport> {
        events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Finished { report } => Some(report.as_ref()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn switching_runs_starts_a_clean_monitor() {
        let platform = Arc::new(
            ScriptedPlatform::new()
                .script("r2", vec![Step::WithPointer(RunStatus::Succeeded, "ds2")])
                .items("ds2", vec![json!({"from": "r2"})]),
        );
        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        cmd_tx
            .send(WatchCommand::Watch(RunHandle::pending("r2")))
            .unwrap();

        let report = run_controller(
            &deps(&platform),
            Some(RunHandle::pending("r1")),
            true,
            evt_tx,
            cmd_rx,
        )
        .await
        .expect("r2 report");

        assert_eq!(report.run_id, "r2");
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.polls, 1);
        assert_eq!(report.result_pointer.as_deref(), Some("ds2"));
        assert_eq!(
            report.results.map(|r| r.items),
            Some(vec![json!({"from": "r2"})])
        );
        assert_eq!(platform.result_fetches(), vec!["ds2".to_string()]);

        let events = drain(&mut evt_rx);
        let done = finished(&events);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].run_id, "r2");
        let first_r2_poll = events.iter().find_map(|e| match e {
            MonitorEvent::Status { run_id, cycle } if run_id == "r2" => Some(*cycle),
            _ => None,
        });
        assert_eq!(first_r2_poll.map(|c| c.seq), Some(1));
        assert!(!events.iter().any(|e| matches!(
            e,
            MonitorEvent::Results { run_id, .. } if run_id == "r1"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_quit_publishes_no_report() {
        let platform = Arc::new(ScriptedPlatform::new());
        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let d = deps(&platform);
        let controller = tokio::spawn(async move {
            run_controller(&d, Some(RunHandle::pending("r1")), false, evt_tx, cmd_rx).await
        });

        // Let a few polls happen.
        tokio::time::sleep(Duration::from_secs(12)).await;
        let polls_before_stop = platform.polls_for("r1");
        assert!(polls_before_stop >= 2);

        cmd_tx.send(WatchCommand::Stop).unwrap();
        cmd_tx.send(WatchCommand::Quit).unwrap();
        let report = controller.await.unwrap();

        assert!(report.is_none());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(platform.polls_for("r1"), polls_before_stop);
        assert!(finished(&drain(&mut evt_rx)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_run_ends_the_controller_when_idle() {
        let platform = Arc::new(
            ScriptedPlatform::new().script(
                "r1",
                vec![Step::Status(RunStatus::Running), Step::Status(RunStatus::Failed)],
            ),
        );
        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let report = run_controller(
            &deps(&platform),
            Some(RunHandle::pending("r1")),
            true,
            evt_tx,
            cmd_rx,
        )
        .await
        .expect("report");

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.end, MonitorEnd::Terminal);
        assert_eq!(platform.polls_for("r1"), 2);
        assert_eq!(finished(&drain(&mut evt_rx)).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_command_channel_quits() {
        let platform = Arc::new(ScriptedPlatform::new());
        let (evt_tx, _evt_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WatchCommand>();
        drop(cmd_tx);

        let report = run_controller(
            &deps(&platform),
            Some(RunHandle::pending("r1")),
            false,
            evt_tx,
            cmd_rx,
        )
        .await;

        assert!(report.is_none());
    }
}
