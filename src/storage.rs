//! Saved run reports.
//!
//! Reports are written as pretty JSON, one file per finished watch, under the
//! user's local data directory.

use crate::model::MonitorReport;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

fn runs_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory on this platform")?;
    Ok(base.join("actor-runner").join("runs"))
}

/// File name sorting chronologically: `<timestamp>-<run id>.json`.
fn report_file_name(report: &MonitorReport) -> String {
    let stamp = report.finished_utc.replace(':', "-");
    let run_id: String = report
        .run_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{stamp}-{run_id}.json")
}

pub fn save_run(report: &MonitorReport) -> Result<PathBuf> {
    save_run_in(&runs_dir()?, report)
}

fn save_run_in(dir: &Path, report: &MonitorReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(report_file_name(report));
    export_json(&path, report)?;
    Ok(path)
}

pub fn export_json(path: &Path, report: &MonitorReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("serialize run report")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Up to `limit` saved reports, newest first. Unreadable files are skipped.
pub fn load_recent(limit: usize) -> Result<Vec<MonitorReport>> {
    load_recent_from(&runs_dir()?, limit)
}

fn load_recent_from(dir: &Path, limit: usize) -> Result<Vec<MonitorReport>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    paths.reverse();

    let mut out = Vec::new();
    for p in paths {
        if out.len() >= limit {
            break;
        }
        let Ok(bytes) = std::fs::read(&p) else {
            continue;
        };
        match serde_json::from_slice::<MonitorReport>(&bytes) {
            Ok(r) => out.push(r),
            Err(e) => tracing::debug!(path = %p.display(), error = %e, "skipping unreadable report"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MonitorEnd, ResultSet, RunStatus};
    use serde_json::json;

    fn report(run_id: &str, finished: &str) -> MonitorReport {
        MonitorReport {
            finished_utc: finished.to_string(),
            run_id: run_id.to_string(),
            status: RunStatus::Succeeded,
            result_pointer: Some("ds".into()),
            results: Some(ResultSet {
                items: vec![json!({"k": 1})],
            }),
            polls: 3,
            end: MonitorEnd::Terminal,
            result_error: None,
        }
    }

    #[test]
    fn saved_reports_load_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        save_run_in(dir.path(), &report("old", "2026-01-01T10:00:00Z")).unwrap();
        save_run_in(dir.path(), &report("new", "2026-01-02T10:00:00Z")).unwrap();
        std::fs::write(dir.path().join("zzz-garbage.json"), b"{not json").unwrap();

        let loaded = load_recent_from(dir.path(), 10).unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(loaded[0].results.as_ref().unwrap().items, vec![json!({"k": 1})]);

        assert_eq!(load_recent_from(dir.path(), 1).unwrap().len(), 1);
    }

    #[test]
    fn missing_directory_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_recent_from(&dir.path().join("absent"), 5).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn file_names_are_filesystem_safe() {
        let name = report_file_name(&report("a/b c", "2026-01-01T10:00:00Z"));
        assert_eq!(name, "2026-01-01T10-00-00Z-a_b_c.json");
    }
}
