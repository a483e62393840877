//! Ordered step execution.
//!
//! A run walks the selected step keys in the order given. Each step moves
//! `Pending -> Running -> Succeeded | Failed`. Once a fatal step fails,
//! every remaining step goes straight from `Pending` to `Skipped`. Errors
//! and panics inside a step are contained at the step boundary and recorded
//! as failures; only a configuration error ends the run early.

pub mod log;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::config::Settings;
use crate::error::{configuration_error, ReleaseError, Result};
use crate::manifest::iso_timestamp;
use crate::process::{Cmd, CommandOutput, CommandRunner, SystemRunner};
use crate::toolchain::{ResolvedToolchain, ToolchainResolver};

pub use self::log::{Level, RunLog};

/// Failure details in the summary are cut to this many characters.
pub const SUMMARY_DETAIL_CHARS: usize = 100;

/// Successful command output echoed into the run log is cut to this many
/// characters.
pub const OUTPUT_ECHO_CHARS: usize = 200;

pub type StepAction = Box<dyn Fn(&mut RunContext) -> anyhow::Result<()>>;

/// One named unit of pipeline work.
pub struct Step {
    pub key: String,
    pub name: String,
    pub fatal: bool,
    action: StepAction,
}

impl Step {
    pub fn new<F>(key: impl Into<String>, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut RunContext) -> anyhow::Result<()> + 'static,
    {
        Self {
            key: key.into(),
            name: name.into(),
            fatal: false,
            action: Box::new(action),
        }
    }

    /// A failure of this step halts the rest of the run.
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never attempted because an earlier fatal step failed.
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Key as selected.
    pub key: String,
    pub step_name: String,
    pub status: StepStatus,
    pub error_detail: Option<String>,
    pub duration: Duration,
}

impl StepOutcome {
    fn pending(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            step_name: name.to_string(),
            status: StepStatus::Pending,
            error_detail: None,
            duration: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Why a run stopped before working through its selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abort {
    /// Empty selection, or no selected key names a registered step.
    InvalidSelection(String),
    /// A step raised a configuration error.
    Configuration(String),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcomes: Vec<StepOutcome>,
    pub elapsed: Duration,
    pub abort: Option<Abort>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == StepStatus::Failed)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == StepStatus::Skipped)
    }

    pub fn statuses(&self) -> Vec<StepStatus> {
        self.outcomes.iter().map(|o| o.status).collect()
    }

    /// 0 when every selected step succeeded, 2 for an invalid selection or
    /// configuration error, 1 for anything else.
    pub fn exit_code(&self) -> i32 {
        if self.abort.is_some() {
            2
        } else if self.outcomes.iter().all(StepOutcome::succeeded) {
            0
        } else {
            1
        }
    }
}

/// State shared by the steps of one run. Created fresh per invocation.
pub struct RunContext {
    pub settings: Settings,
    pub log: RunLog,
    pub resolver: ToolchainResolver,
    runner: Rc<dyn CommandRunner>,
}

impl RunContext {
    pub fn new(settings: Settings, log: RunLog) -> Self {
        let resolver = ToolchainResolver::new(settings.tools_dir(), settings.env.clone())
            .with_cache_dir(settings.cache_dir())
            .with_platform(settings.platform.clone())
            .with_install_timeout(settings.long_timeout());
        Self {
            settings,
            log,
            resolver,
            runner: Rc::new(SystemRunner),
        }
    }

    pub fn with_runner(mut self, runner: Rc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_resolver(mut self, resolver: ToolchainResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Run `cmd`, recording the invocation and its result in the run log.
    pub fn run_command(&mut self, cmd: Cmd, description: &str) -> Result<CommandOutput> {
        self.log.info(format!("Running: {}", cmd.display()));
        if !description.is_empty() {
            self.log.info(format!("  ({description})"));
        }
        match self.runner.run(&cmd) {
            Ok(out) => {
                let echo = truncate(out.stdout.trim(), OUTPUT_ECHO_CHARS);
                if !echo.is_empty() {
                    self.log.info(format!("Output: {echo}"));
                }
                Ok(out)
            }
            Err(e) => {
                self.log.error(format!("FAILED: {e}"));
                Err(e)
            }
        }
    }

    /// Resolve a tool by id, once per run.
    pub fn resolve_tool(&mut self, id: &str) -> Result<ResolvedToolchain> {
        if let Some(hit) = self.resolver.cached(id) {
            return Ok(hit.clone());
        }
        let spec = self.settings.tool_spec(id)?;
        match self.resolver.resolve(&spec, self.runner.as_ref()) {
            Ok(tool) => {
                self.log.success(format!(
                    "✓ {} ({}): {}",
                    tool.tool_id,
                    tool.source_kind,
                    tool.root_path.display()
                ));
                Ok(tool)
            }
            Err(e) => {
                self.log.error(e.to_string());
                Err(e)
            }
        }
    }
}

/// The registered step table plus the execution loop.
#[derive(Debug, Default)]
pub struct StepPipeline {
    steps: Vec<Step>,
    /// Alternate key -> registered key.
    aliases: BTreeMap<String, String>,
}

impl StepPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. A later step with the same key replaces the earlier
    /// one in place.
    pub fn register(mut self, step: Step) -> Self {
        match self.steps.iter_mut().find(|s| s.key == step.key) {
            Some(slot) => *slot = step,
            None => self.steps.push(step),
        }
        self
    }

    /// Accept `alias` in selections as another name for `key`.
    pub fn alias(mut self, alias: impl Into<String>, key: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), key.into());
        self
    }

    /// Step registered under `key`, or under the key `key` is an alias of.
    pub fn get(&self, key: &str) -> Option<&Step> {
        let key = self.aliases.get(key).map(String::as_str).unwrap_or(key);
        self.steps.iter().find(|s| s.key == key)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn keys(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.key.as_str()).collect()
    }

    /// Run `selection` in order, then log the summary and save the run log.
    pub fn execute(&self, ctx: &mut RunContext, selection: &[String]) -> RunReport {
        let start = Instant::now();
        ctx.log.info(format!("Repository: {}", ctx.settings.repo_root.display()));
        ctx.log.info(format!(
            "Started: {}",
            iso_timestamp(self::log::local_now()).replacen('T', " ", 1)
        ));
        ctx.log.info(format!("Version: {}", ctx.settings.version()));
        ctx.log.info(format!("Steps: {}", selection.join(", ")));

        let mut outcomes: Vec<StepOutcome> = selection
            .iter()
            .map(|key| {
                let name = self.get(key).map(|s| s.name.as_str()).unwrap_or(key.as_str());
                StepOutcome::pending(key, name)
            })
            .collect();

        let mut abort = self.validate(selection);
        if let Some(Abort::InvalidSelection(reason)) = &abort {
            ctx.log.error(format!("Invalid step selection: {reason}"));
            for outcome in &mut outcomes {
                outcome.status = StepStatus::Failed;
                outcome.error_detail = Some(format!("unknown step '{}'", outcome.key));
            }
        }

        let mut halted = abort.is_some();
        let mut number = 0;
        for outcome in &mut outcomes {
            if halted {
                if outcome.status == StepStatus::Pending {
                    outcome.status = StepStatus::Skipped;
                }
                continue;
            }

            let Some(step) = self.get(&outcome.key) else {
                ctx.log.error(format!("Unknown step: {}", outcome.key));
                outcome.status = StepStatus::Failed;
                outcome.error_detail = Some(format!("unknown step '{}'", outcome.key));
                continue;
            };

            number += 1;
            ctx.log.section(&format!("STEP {number}: {}", step.name));
            outcome.status = StepStatus::Running;
            let step_start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| (step.action)(ctx)));
            outcome.duration = step_start.elapsed();

            let detail = match result {
                Ok(Ok(())) => None,
                Ok(Err(err)) => {
                    if let Some(config) = configuration_error(&err) {
                        abort = Some(Abort::Configuration(config.to_string()));
                        halted = true;
                    }
                    Some(format!("{err:#}"))
                }
                Err(payload) => Some(format!("step panicked: {}", panic_message(&*payload))),
            };

            match detail {
                None => {
                    outcome.status = StepStatus::Succeeded;
                    ctx.log.success(format!(
                        "✓ {} completed in {}",
                        step.name,
                        format_duration(outcome.duration)
                    ));
                }
                Some(detail) => {
                    outcome.status = StepStatus::Failed;
                    ctx.log.error(format!("✗ {} failed: {}", step.name, detail));
                    outcome.error_detail = Some(detail);
                    if step.fatal {
                        ctx.log.error(format!(
                            "{} is fatal; remaining steps will not run",
                            step.name
                        ));
                        halted = true;
                    }
                }
            }
        }

        let report = RunReport {
            outcomes,
            elapsed: start.elapsed(),
            abort,
        };
        write_summary(&report, &mut ctx.log, &ctx.settings.release_dir());

        let log_path = ctx.settings.log_path();
        match ctx.log.save(&log_path) {
            Ok(()) => ctx.log.info(format!("Build log saved: {}", log_path.display())),
            Err(e) => ctx.log.warn(format!("Could not save build log: {e}")),
        }
        report
    }

    fn validate(&self, selection: &[String]) -> Option<Abort> {
        if selection.is_empty() {
            return Some(Abort::InvalidSelection("no steps selected".to_string()));
        }
        if selection.iter().all(|k| self.get(k).is_none()) {
            return Some(Abort::InvalidSelection(format!(
                "none of [{}] is a known step (known: {})",
                selection.join(", "),
                self.keys().join(", ")
            )));
        }
        None
    }
}

/// Split a comma-separated step list, dropping blanks.
pub fn parse_selection(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn write_summary(report: &RunReport, log: &mut RunLog, release_dir: &Path) {
    log.section("BUILD SUMMARY");
    log.info(format!("Build completed in: {}", format_duration(report.elapsed)));

    match &report.abort {
        Some(Abort::InvalidSelection(reason)) => log.error(format!("Run aborted: {reason}")),
        Some(Abort::Configuration(reason)) => log.error(format!("Run aborted: {reason}")),
        None => {}
    }

    let failures: Vec<_> = report.failures().collect();
    let skipped: Vec<_> = report.skipped().collect();
    if failures.is_empty() && skipped.is_empty() {
        log.success("All steps completed successfully!");
    } else {
        if !failures.is_empty() {
            log.warn(format!("Failed steps: {}", failures.len()));
            for f in failures {
                let detail = f.error_detail.as_deref().unwrap_or("failed");
                log.warn(format!(
                    "  - {}: {}",
                    f.step_name,
                    truncate(&detail.replace('\n', " "), SUMMARY_DETAIL_CHARS)
                ));
            }
        }
        if !skipped.is_empty() {
            log.warn(format!("Skipped steps (not run): {}", skipped.len()));
            for s in skipped {
                log.warn(format!("  - {}", s.step_name));
            }
        }
    }

    if release_dir.is_dir() {
        let total: u64 = WalkDir::new(release_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();
        log.info(format!(
            "Release package size: {:.1} MB",
            total as f64 / (1024.0 * 1024.0)
        ));
        log.info(format!("Location: {}", release_dir.display()));
    }
}

/// `1h 2m 3s` or `2m 3s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else {
        format!("{m}m {s}s")
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Convenience for step code: a configuration error as an `anyhow` error.
pub fn config_error(detail: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(ReleaseError::config(detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Env, ReleaseConfig};
    use crate::process::testing::RecordingRunner;
    use crate::toolchain::ToolchainCandidate;
    use anyhow::{bail, Context};
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn context(root: &Path) -> RunContext {
        let settings = Settings::new(root, ReleaseConfig::default(), Env::default());
        RunContext::new(settings, RunLog::quiet())
    }

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Records which steps actually ran.
    fn tracking(trace: &Rc<RefCell<Vec<String>>>, key: &str, ok: bool) -> Step {
        let trace = Rc::clone(trace);
        let k = key.to_string();
        Step::new(key, format!("Step {key}"), move |_ctx| {
            trace.borrow_mut().push(k.clone());
            if ok {
                Ok(())
            } else {
                bail!("{k} broke")
            }
        })
    }

    #[test]
    fn fatal_tool_failure_skips_the_rest() {
        let tmp = TempDir::new().unwrap();
        let trace = Rc::new(RefCell::new(Vec::new()));

        let pipeline = StepPipeline::new()
            .register(
                Step::new("toolA-missing-fatal", "Tool A", |ctx| {
                    let spec = crate::toolchain::ToolSpec::new("toolA", "bin/toolA")
                        .candidate(ToolchainCandidate::env_var("TOOL_A_HOME"))
                        .candidate(ToolchainCandidate::system_path("definitely_not_a_tool_a"));
                    let runner = ctx.runner.clone();
                    ctx.resolver
                        .resolve(&spec, runner.as_ref())
                        .context("resolving tool A")?;
                    Ok(())
                })
                .fatal(),
            )
            .register(tracking(&trace, "toolB", true));

        let mut ctx = context(tmp.path());
        let report = pipeline.execute(&mut ctx, &keys(&["toolA-missing-fatal", "toolB"]));

        assert_eq!(report.statuses(), vec![StepStatus::Failed, StepStatus::Skipped]);
        assert_eq!(report.exit_code(), 1);
        assert!(trace.borrow().is_empty());
        let detail = report.outcomes[0].error_detail.as_deref().unwrap();
        assert!(detail.contains("tool 'toolA' is unavailable"), "{detail}");
        assert!(detail.contains("$TOOL_A_HOME: not set"), "{detail}");
    }

    #[test]
    fn non_fatal_failure_continues_and_is_summarized() {
        let tmp = TempDir::new().unwrap();
        let trace = Rc::new(RefCell::new(Vec::new()));
        let pipeline = StepPipeline::new()
            .register(tracking(&trace, "a", false))
            .register(tracking(&trace, "b", true));

        let mut ctx = context(tmp.path());
        let report = pipeline.execute(&mut ctx, &keys(&["a", "b"]));

        assert_eq!(report.statuses(), vec![StepStatus::Failed, StepStatus::Succeeded]);
        assert_eq!(*trace.borrow(), vec!["a", "b"]);
        assert_eq!(report.exit_code(), 1);
        assert!(ctx.log.contains("Failed steps: 1"));
        assert!(ctx.log.contains("  - Step a: a broke"));
    }

    #[test]
    fn steps_run_in_selection_order() {
        let tmp = TempDir::new().unwrap();
        let trace = Rc::new(RefCell::new(Vec::new()));
        let pipeline = StepPipeline::new()
            .register(tracking(&trace, "a", true))
            .register(tracking(&trace, "b", true))
            .register(tracking(&trace, "c", true));

        let mut ctx = context(tmp.path());
        let report = pipeline.execute(&mut ctx, &keys(&["c", "a", "b"]));
        assert_eq!(*trace.borrow(), vec!["c", "a", "b"]);
        assert_eq!(report.exit_code(), 0);
        assert!(ctx.log.contains("All steps completed successfully!"));
        assert!(tmp.path().join("build-release.log").is_file());
    }

    #[test]
    fn unknown_key_fails_in_place_without_aborting() {
        let tmp = TempDir::new().unwrap();
        let trace = Rc::new(RefCell::new(Vec::new()));
        let pipeline = StepPipeline::new().register(tracking(&trace, "core", true));

        let mut ctx = context(tmp.path());
        let report = pipeline.execute(&mut ctx, &keys(&["bogus", "core"]));
        assert_eq!(report.statuses(), vec![StepStatus::Failed, StepStatus::Succeeded]);
        assert_eq!(report.exit_code(), 1);
        assert!(report.abort.is_none());
    }

    #[test]
    fn aliases_run_the_registered_step() {
        let tmp = TempDir::new().unwrap();
        let trace = Rc::new(RefCell::new(Vec::new()));
        let pipeline = StepPipeline::new()
            .register(tracking(&trace, "ide", true))
            .alias("sentinel", "ide");

        let mut ctx = context(tmp.path());
        let report = pipeline.execute(&mut ctx, &keys(&["sentinel"]));
        assert_eq!(report.statuses(), vec![StepStatus::Succeeded]);
        assert_eq!(*trace.borrow(), vec!["ide"]);
        assert_eq!(pipeline.keys(), vec!["ide"]);
    }

    #[test]
    fn selection_without_known_steps_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let pipeline = StepPipeline::new().register(Step::new("core", "Core", |_| Ok(())));

        let mut ctx = context(tmp.path());
        let report = pipeline.execute(&mut ctx, &keys(&["nope", "nada"]));
        assert_eq!(report.exit_code(), 2);
        assert!(matches!(report.abort, Some(Abort::InvalidSelection(_))));
        assert_eq!(report.statuses(), vec![StepStatus::Failed, StepStatus::Failed]);

        let empty = pipeline.execute(&mut ctx, &[]);
        assert_eq!(empty.exit_code(), 2);
    }

    #[test]
    fn panics_are_recorded_as_failures() {
        let tmp = TempDir::new().unwrap();
        let trace = Rc::new(RefCell::new(Vec::new()));
        let pipeline = StepPipeline::new()
            .register(Step::new("boom", "Boom", |_| panic!("index out of range")))
            .register(tracking(&trace, "after", true));

        let mut ctx = context(tmp.path());
        let report = pipeline.execute(&mut ctx, &keys(&["boom", "after"]));
        assert_eq!(report.statuses(), vec![StepStatus::Failed, StepStatus::Succeeded]);
        assert!(report.outcomes[0]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("index out of range"));
    }

    #[test]
    fn configuration_error_aborts_run() {
        let tmp = TempDir::new().unwrap();
        let trace = Rc::new(RefCell::new(Vec::new()));
        let pipeline = StepPipeline::new()
            .register(Step::new("sign", "Sign", |_| {
                Err(config_error("no signing credentials")).context("signing binaries")
            }))
            .register(tracking(&trace, "after", true));

        let mut ctx = context(tmp.path());
        let report = pipeline.execute(&mut ctx, &keys(&["sign", "after"]));
        assert_eq!(report.statuses(), vec![StepStatus::Failed, StepStatus::Skipped]);
        assert_eq!(report.exit_code(), 2);
        assert!(trace.borrow().is_empty());
    }

    #[test]
    fn run_command_logs_and_returns_errors() {
        let tmp = TempDir::new().unwrap();
        let runner = Rc::new(RecordingRunner::failing(&["npm"]));
        let mut ctx = context(tmp.path()).with_runner(runner.clone());

        assert!(ctx.run_command(Cmd::new("cargo").arg("build"), "build").is_ok());
        let err = ctx
            .run_command(Cmd::new("npm").arg("ci"), "install deps")
            .unwrap_err();
        assert!(matches!(err, ReleaseError::CommandFailed { .. }));
        assert_eq!(runner.calls(), vec!["cargo build", "npm ci"]);
        assert!(ctx.log.contains("Running: npm ci"));
        assert!(ctx.log.contains("FAILED:"));
    }

    #[test]
    fn summary_truncates_details() {
        let tmp = TempDir::new().unwrap();
        let long = "x".repeat(300);
        let pipeline = StepPipeline::new().register(Step::new("a", "A", move |_| bail!("{long}")));
        let mut ctx = context(tmp.path());
        pipeline.execute(&mut ctx, &keys(&["a"]));
        let line = ctx
            .log
            .lines()
            .iter()
            .find(|l| l.contains("  - A: "))
            .cloned()
            .unwrap();
        let shown = line.split("  - A: ").nth(1).unwrap();
        assert_eq!(shown.len(), SUMMARY_DETAIL_CHARS);
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn selection_parsing() {
        assert_eq!(parse_selection(" core, ,verify,"), vec!["core", "verify"]);
    }
}
