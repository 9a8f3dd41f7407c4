use crate::engine::{self, RunLauncher, TokioClock};
use crate::error::RunError;
use crate::model::{
    ClientConfig, MonitorEnd, MonitorEvent, MonitorReport, PollPolicy, RunHandle,
};
use crate::orchestrator::{process_run_completion, run_controller, WatchCommand, WatchDeps};
use crate::platform::{ActorPlatform, ApifyClient, Credential};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Where a line of output goes. Reports and summaries go to stdout; progress
/// and notices go to stderr so stdout stays pipeable.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Single writer thread for all watch output, fed from async tasks.
/// The returned handle resolves once every sender is gone and both streams
/// are flushed.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let mut stdout = std::io::LineWriter::new(std::io::stdout().lock());
        let mut stderr = std::io::LineWriter::new(std::io::stderr().lock());
        while let Some(line) = rx.blocking_recv() {
            let (sink, text): (&mut dyn Write, String) = match line {
                OutputLine::Stdout(text) => (&mut stdout, text),
                OutputLine::Stderr(text) => (&mut stderr, text),
            };
            // A closed pipe is not worth failing the watch over.
            let _ = writeln!(sink, "{text}");
        }
        let _ = stdout.flush();
        let _ = stderr.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "actor-runner",
    version,
    about = "Launch Apify actors and follow their runs to completion"
)]
pub struct Cli {
    /// API token for the platform
    #[arg(long, env = "APIFY_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Base URL of the platform API
    #[arg(long, default_value = "https://api.apify.com/v2", global = true)]
    pub base_url: String,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Timeout for each API request
    #[arg(long, default_value = "30s", global = true)]
    pub request_timeout: humantime::Duration,

    /// Log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Check that the API token is accepted
    Validate,
    /// List actors available to the account
    Actors,
    /// Show an actor's input fields and defaults
    Schema {
        /// Actor id or `owner/name`
        actor: String,
    },
    /// Start an actor run and follow it to completion
    Run(RunArgs),
    /// Follow an existing run. While watching, type `watch <run id>` to
    /// switch runs, `stop` or `quit` on stdin.
    Watch(WatchTarget),
    /// Show recently saved run reports
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Actor id or `owner/name`
    pub actor: String,

    /// Input as a JSON object, laid over the actor's schema defaults
    #[arg(long, conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Read the input JSON from a file
    #[arg(long)]
    pub input_file: Option<PathBuf>,

    /// Send the given input as-is instead of filling schema defaults
    #[arg(long)]
    pub no_defaults: bool,

    /// Print the run handle and exit without watching
    #[arg(long)]
    pub no_wait: bool,

    #[command(flatten)]
    pub watch: WatchArgs,
}

#[derive(Debug, Args, Clone)]
pub struct WatchTarget {
    /// Run id to follow
    pub run_id: String,

    /// Dataset holding the run's results, if already known
    #[arg(long)]
    pub dataset: Option<String>,

    #[command(flatten)]
    pub watch: WatchArgs,
}

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    /// Wait between status polls
    #[arg(long, default_value = "5s")]
    pub poll_interval: humantime::Duration,

    /// Give up watching after this long (the run itself is not stopped)
    #[arg(long)]
    pub max_wait: Option<humantime::Duration>,

    /// Export the final report as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,
}

impl WatchArgs {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            cooldown: Duration::from(self.poll_interval),
            max_wait: self.max_wait.map(Duration::from),
        }
    }
}

/// How a watch ended, as far as the process exit status is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchOutcome {
    Done,
    /// Monitoring itself failed; the report already describes why.
    Lost,
}

impl WatchOutcome {
    fn of(report: &MonitorReport) -> Self {
        match report.end {
            MonitorEnd::Failed(_) => WatchOutcome::Lost,
            _ => WatchOutcome::Done,
        }
    }

    fn exit_code(self) -> ExitCode {
        match self {
            WatchOutcome::Done => ExitCode::SUCCESS,
            WatchOutcome::Lost => ExitCode::FAILURE,
        }
    }
}

pub async fn run(args: Cli) -> Result<ExitCode> {
    let outcome = match &args.command {
        Command::Validate => validate(&args).await,
        Command::Actors => list_actors(&args).await,
        Command::Schema { actor } => show_schema(&args, actor).await,
        Command::Run(run_args) => return run_actor(&args, run_args).await,
        Command::Watch(target) => {
            let platform = connect(&args)?;
            let handle = RunHandle::pending(target.run_id.clone())
                .with_result_pointer(target.dataset.clone());
            return watch_run(&args, platform, handle, &target.watch)
                .await
                .map(WatchOutcome::exit_code);
        }
        Command::History { limit } => show_history(&args, *limit),
    };
    outcome.map(|()| ExitCode::SUCCESS)
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.base_url.clone(),
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("actor-runner/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Turn a run error into a message that names its kind.
fn user_error(e: RunError) -> anyhow::Error {
    anyhow::anyhow!("{}: {e}", e.kind().headline())
}

fn connect(args: &Cli) -> Result<Arc<dyn ActorPlatform>> {
    let credential = Credential::new(args.token.clone().unwrap_or_default())
        .map_err(|_| anyhow::anyhow!("an API token is required (--token or APIFY_TOKEN)"))?;
    let client = ApifyClient::new(&build_config(args), credential).map_err(user_error)?;
    Ok(Arc::new(client))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn validate(args: &Cli) -> Result<()> {
    let platform = connect(args)?;
    let check = engine::validate_credential(platform.as_ref())
        .await
        .map_err(user_error)?;
    if args.json {
        return print_json(&check);
    }
    if let Some(identity) = check.identity {
        let who = identity.username.as_deref().unwrap_or("(no username)");
        println!("Token valid: {who} ({})", identity.user_id);
    }
    Ok(())
}

async fn list_actors(args: &Cli) -> Result<()> {
    let platform = connect(args)?;
    let actors = platform
        .list_actors()
        .await
        .map_err(|e| user_error(e.into()))?;
    if args.json {
        return print_json(&actors);
    }
    if actors.is_empty() {
        println!("No actors found in this account.");
        return Ok(());
    }
    for a in &actors {
        let label = a.title.as_deref().unwrap_or(&a.name);
        println!("{}  {label}", a.id);
        if let Some(desc) = a.description.as_deref().filter(|d| !d.trim().is_empty()) {
            println!("    {}", desc.trim());
        }
    }
    println!("{} actors", actors.len());
    Ok(())
}

async fn show_schema(args: &Cli, actor: &str) -> Result<()> {
    let platform = connect(args)?;
    let schema = platform
        .actor_input_schema(actor)
        .await
        .map_err(|e| user_error(e.into()))?;
    if args.json {
        return print_json(&schema);
    }
    println!("{}", schema.title.as_deref().unwrap_or(actor));
    for (name, prop) in &schema.properties {
        let kind = prop.kind.as_deref().unwrap_or("any");
        let req = if schema.is_required(name) { " required" } else { "" };
        let mut line = format!("  {name} ({kind}{req})");
        if let Some(default) = &prop.default {
            line.push_str(&format!(" default={default}"));
        }
        println!("{line}");
        if let Some(title) = prop.title.as_deref() {
            println!("      {title}");
        }
    }
    Ok(())
}

fn read_user_input(run_args: &RunArgs) -> Result<Option<serde_json::Value>> {
    let raw = match (&run_args.input, &run_args.input_file) {
        (Some(s), _) => s.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("read input file {}", path.display()))?,
        (None, None) => return Ok(None),
    };
    let value = serde_json::from_str(&raw).context("input is not valid JSON")?;
    Ok(Some(value))
}

/// Lay `user` fields over schema `defaults`. User input must be an object.
fn merge_input(
    mut merged: serde_json::Map<String, serde_json::Value>,
    user: Option<serde_json::Value>,
) -> Result<serde_json::Value> {
    match user {
        None => {}
        Some(serde_json::Value::Object(fields)) => merged.extend(fields),
        Some(_) => anyhow::bail!("input must be a JSON object"),
    }
    Ok(serde_json::Value::Object(merged))
}

async fn prepare_input(
    platform: &dyn ActorPlatform,
    run_args: &RunArgs,
) -> Result<Option<serde_json::Value>> {
    let user = read_user_input(run_args)?;
    if run_args.no_defaults {
        return Ok(user);
    }
    match platform.actor_input_schema(&run_args.actor).await {
        Ok(schema) => merge_input(schema.default_input(), user).map(Some),
        Err(e) => {
            // Without a schema there are no defaults to fill.
            tracing::warn!(actor = %run_args.actor, error = %e, "input schema unavailable");
            Ok(user)
        }
    }
}

async fn run_actor(args: &Cli, run_args: &RunArgs) -> Result<ExitCode> {
    let platform = connect(args)?;
    let input = prepare_input(platform.as_ref(), run_args).await?;
    let launcher = RunLauncher::new(platform.clone());
    let handle = launcher
        .launch(&run_args.actor, input.as_ref())
        .await
        .map_err(user_error)?;

    if run_args.no_wait {
        if args.json {
            print_json(&handle)?;
            return Ok(ExitCode::SUCCESS);
        }
        println!("Run: {}", handle.run_id);
        println!("Status: {}", handle.status);
        if let Some(ds) = handle.result_pointer.as_deref() {
            println!("Dataset: {ds}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    eprintln!("Started run {} ({})", handle.run_id, handle.status);
    watch_run(args, platform, handle, &run_args.watch)
        .await
        .map(WatchOutcome::exit_code)
}

/// Parse a line typed while watching: `watch <run id> [dataset]`, `stop`
/// or `quit`.
fn parse_watch_command(line: &str) -> Result<Option<WatchCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let cmd = match (verb, words.next(), words.next(), words.next()) {
        ("watch" | "w", Some(run_id), dataset, None) => WatchCommand::Watch(
            RunHandle::pending(run_id).with_result_pointer(dataset.map(str::to_string)),
        ),
        ("stop" | "s", None, _, _) => WatchCommand::Stop,
        ("quit" | "q", None, _, _) => WatchCommand::Quit,
        _ => {
            return Err(format!(
                "unknown command `{}` (try: watch <run id> [dataset], stop, quit)",
                line.trim()
            ))
        }
    };
    Ok(Some(cmd))
}

/// Forward commands typed on stdin to the controller. Runs on a plain thread
/// so a pending read never holds up runtime shutdown; end of input just ends
/// the thread. The output sender is weak so the writer can close without it.
fn spawn_command_reader(
    cmd_tx: mpsc::UnboundedSender<WatchCommand>,
    out_tx: mpsc::WeakUnboundedSender<OutputLine>,
) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_watch_command(&line) {
                Ok(Some(cmd)) => {
                    if cmd_tx.send(cmd).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(msg) => {
                    let Some(out) = out_tx.upgrade() else { break };
                    let _ = out.send(OutputLine::Stderr(msg));
                }
            }
        }
    });
}

/// Final output for a report: the text summary, or one JSON document that
/// carries the failure when there is one.
fn report_lines(json: bool, report: &MonitorReport) -> Result<Vec<String>> {
    if json {
        return Ok(vec![serde_json::to_string_pretty(report)?]);
    }
    Ok(crate::text_summary::build_text_summary(report).lines)
}

async fn watch_run(
    args: &Cli,
    platform: Arc<dyn ActorPlatform>,
    handle: RunHandle,
    watch: &WatchArgs,
) -> Result<WatchOutcome> {
    let deps = WatchDeps {
        platform,
        clock: Arc::new(TokioClock::new()),
        policy: watch.poll_policy(),
    };
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<MonitorEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WatchCommand>();

    spawn_command_reader(cmd_tx.clone(), out_tx.downgrade());
    // Ctrl-C stops watching; the run keeps going on the platform.
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cmd_tx.send(WatchCommand::Quit);
        }
    });

    let controller =
        tokio::spawn(async move { run_controller(&deps, Some(handle), true, evt_tx, cmd_rx).await });

    while let Some(ev) = evt_rx.recv().await {
        if args.json {
            continue;
        }
        if let Some(line) = crate::text_summary::describe_event(&ev) {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
    }

    let report = controller.await.context("watch controller task failed")?;
    interrupt.abort();

    let Some(report) = report else {
        let _ = out_tx.send(OutputLine::Stderr(
            "Stopped watching; the run continues on the platform.".into(),
        ));
        drop(out_tx);
        let _ = out_handle.await;
        return Ok(WatchOutcome::Done);
    };

    let processed = process_run_completion(watch, &report);

    for line in report_lines(args.json, &report)? {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    if let Some(p) = processed.auto_saved_path {
        let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
    }
    drop(out_tx);
    let _ = out_handle.await;

    Ok(WatchOutcome::of(&report))
}

fn show_history(args: &Cli, limit: usize) -> Result<()> {
    let reports = crate::storage::load_recent(limit).context("failed to load saved runs")?;
    if args.json {
        return print_json(&reports);
    }
    if reports.is_empty() {
        println!("No saved runs.");
    }
    for r in &reports {
        let items = r
            .results
            .as_ref()
            .map(|rs| rs.items.len().to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {}  {}  items: {items}",
            r.finished_utc, r.run_id, r.status
        );
    }
    Ok(())
}
