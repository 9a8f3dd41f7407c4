//! Text output for CLI mode.
//!
//! Progress lines for monitor events and the final human-readable summary.

use crate::error::ErrorKind;
use crate::model::{MonitorEnd, MonitorEvent, MonitorReport, RunStatus};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// One progress line for an event, if it deserves one.
pub(crate) fn describe_event(ev: &MonitorEvent) -> Option<String> {
    match ev {
        MonitorEvent::Status { run_id, cycle } => {
            let hint = match cycle.observed {
                RunStatus::Pending => " (waiting for actor to start…)",
                RunStatus::Running => " (actor is running…)",
                _ => "",
            };
            Some(format!("[{}] {run_id}: {}{hint}", cycle.seq, cycle.observed))
        }
        MonitorEvent::Results { results, .. } => {
            Some(format!("Fetched {} result items", results.items.len()))
        }
        MonitorEvent::ResultsUnavailable { message, .. } => Some(format!(
            "{}: {message}",
            ErrorKind::ResultFetch.headline()
        )),
        MonitorEvent::PollFailed {
            last_status,
            message,
            ..
        } => Some(format!(
            "{}: {message} (last known status {last_status})",
            ErrorKind::Poll.headline()
        )),
        MonitorEvent::DeadlineExceeded { last_status, .. } => Some(format!(
            "{} (last known status {last_status})",
            ErrorKind::WatchDeadline.headline()
        )),
        MonitorEvent::Info(msg) => Some(msg.clone()),
        MonitorEvent::Finished { .. } => None,
    }
}

fn terminal_line(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Failed => "Execution failed: the actor encountered an error during execution.",
        RunStatus::TimedOut => "Execution timed out: the actor exceeded its time limit.",
        RunStatus::Aborted => "Execution aborted: the run was stopped before finishing.",
        _ => "Run finished.",
    }
}

/// Build the final summary for a finished watch.
pub(crate) fn build_text_summary(report: &MonitorReport) -> TextSummary {
    let mut lines = vec![
        format!("Run: {}", report.run_id),
        format!("Status: {}", report.status),
        format!("Polls: {}", report.polls),
    ];
    if let Some(pointer) = report.result_pointer.as_deref() {
        lines.push(format!("Dataset: {pointer}"));
    }

    match &report.end {
        MonitorEnd::Failed(failure) => {
            lines.push(format!("{}: {}", failure.kind.headline(), failure.message));
            lines.push(format!("Last known status: {}", report.status));
        }
        MonitorEnd::Cancelled => {
            lines.push(format!(
                "Stopped watching before the run finished (last known status {}).",
                report.status
            ));
        }
        MonitorEnd::Terminal => match report.status {
            RunStatus::Succeeded => match (&report.results, &report.result_error) {
                (Some(results), _) => {
                    lines.push(format!("Results: {} items", results.items.len()));
                    let pretty = serde_json::to_string_pretty(&results.items)
                        .unwrap_or_else(|_| "[]".into());
                    lines.extend(pretty.lines().map(str::to_string));
                }
                (None, Some(failure)) => {
                    lines.push(format!("{}: {}", failure.kind.headline(), failure.message));
                }
                (None, None) => lines.push(
                    "No results: the actor completed successfully but didn't produce any output data."
                        .into(),
                ),
            },
            other => lines.push(terminal_line(other).into()),
        },
    }

    TextSummary { lines }
}
