//! Application-level orchestration utilities.
//!
//! This module owns watch lifecycle control (start/switch/stop) and post-run
//! processing such as auto-save and exports. The CLI calls into this module to
//! keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{run_controller, WatchCommand, WatchDeps};
pub(crate) use post_process::process_run_completion;
