//! Post-run processing utilities.
//!
//! Handles auto-save and exports after a watch finishes.

use crate::cli::WatchArgs;
use crate::model::MonitorReport;
use crate::storage;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<std::path::PathBuf>,
}

/// Save and export a finished report. Failures become messages; the watch
/// outcome itself is never changed by them.
pub(crate) fn process_run_completion(args: &WatchArgs, report: &MonitorReport) -> ProcessedRun {
    let mut export_messages = Vec::new();

    let auto_saved_path = if args.auto_save {
        match storage::save_run(report) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(error = %e, "auto-save failed");
                export_messages.push(format!("Auto-save failed: {e:#}"));
                None
            }
        }
    } else {
        None
    };

    if let Some(export_path) = args.export_json.as_deref() {
        match storage::export_json(export_path, report) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedRun {
        export_messages,
        auto_saved_path,
    }
}
