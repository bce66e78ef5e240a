use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock, mpsc};
use std::time::Instant;

use regex::Regex;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::planner::Plan;
use crate::project::{BuildVars, ProjectConfig, ProjectPaths};

pub type TaskExecFn = fn(&ConfigDoc, &mut ExecCtx) -> Result<()>;

#[derive(Debug, Clone)]
pub enum ExecEvent {
    TaskStarted {
        id: String,
    },
    TaskLog {
        id: String,
        line: String,
    },
    VarSet {
        name: String,
        value: String,
    },
    TaskFinished {
        id: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    ExecutorDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    tasks_started: usize,
    tasks_ok: usize,
    tasks_failed: usize,
    log_lines: usize,
    vars: BTreeMap<String, String>,
    failed_tasks: Vec<String>,
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::TaskStarted { id } => {
                if let Ok(mut s) = self.state.lock() {
                    s.tasks_started = s.tasks_started.saturating_add(1);
                    if s.started_at.is_none() {
                        s.started_at = Some(Instant::now());
                    }
                }
                println!("RUN: {id}");
            }
            ExecEvent::TaskLog { id, line } => {
                if let Ok(mut s) = self.state.lock() {
                    s.log_lines = s.log_lines.saturating_add(1);
                }
                println!("[{id}] {line}");
            }
            ExecEvent::VarSet { name, value } => {
                if let Ok(mut s) = self.state.lock() {
                    s.vars.insert(name.clone(), value.clone());
                }
                println!("SET: {name}={value}");
            }
            ExecEvent::TaskFinished {
                id,
                ok,
                error,
                elapsed_ms,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    if ok {
                        s.tasks_ok = s.tasks_ok.saturating_add(1);
                    } else {
                        s.tasks_failed = s.tasks_failed.saturating_add(1);
                        s.failed_tasks.push(id.clone());
                    }
                }
                if ok {
                    println!("DONE: {id} ({elapsed_ms}ms)");
                } else {
                    println!("FAIL: {id} ({elapsed_ms}ms) {}", error.unwrap_or_default());
                }
            }
            ExecEvent::ExecutorDone { ok, error } => {
                let Ok(mut s) = self.state.lock() else {
                    return;
                };
                let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                let mut summary = String::from("SUMMARY:\n");
                summary.push_str(&format!("  status: {}\n", if ok { "ok" } else { "failed" }));
                summary.push_str(&format!(
                    "  tasks: started={} ok={} failed={}\n",
                    s.tasks_started, s.tasks_ok, s.tasks_failed
                ));
                summary.push_str(&format!("  logs: {}\n", s.log_lines));
                summary.push_str(&format!("  elapsed_ms: {}\n", wall.as_millis()));
                for (name, value) in &s.vars {
                    summary.push_str(&format!("  var: {name}={value}\n"));
                }
                if !s.failed_tasks.is_empty() {
                    summary.push_str(&format!("  failed_tasks: {}\n", s.failed_tasks.join(", ")));
                }
                if let Some(e) = error.filter(|_| !ok) {
                    summary.push_str(&format!("  error: {e}\n"));
                }
                *s = StdoutSinkState::default();
                print!("{summary}");
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    pub current_task_id: Option<String>,
    project: Option<ProjectPaths>,
    vars: Option<BuildVars>,
}

impl ExecCtx {
    pub fn new(dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run,
            sink,
            current_task_id: None,
            project: None,
            vars: None,
        }
    }

    pub fn set_task(&mut self, id: impl Into<String>) {
        self.current_task_id = Some(id.into());
    }

    pub fn set_project(&mut self, paths: ProjectPaths) {
        if self.vars.is_none() {
            self.vars = Some(BuildVars::new(paths.data_dir.clone()));
        }
        self.project = Some(paths);
    }

    pub fn project(&self) -> Option<&ProjectPaths> {
        self.project.as_ref()
    }

    // core.init normally fills this in; one-off execs resolve it lazily.
    pub fn project_or_init(&mut self, doc: &ConfigDoc) -> Result<ProjectPaths> {
        if let Some(p) = self.project.as_ref() {
            return Ok(p.clone());
        }
        let cfg: ProjectConfig = doc.deserialize_path("project")?.unwrap_or_default();
        let paths = crate::project::init_dirs(&cfg)?;
        self.set_project(paths.clone());
        Ok(paths)
    }

    pub fn build_vars(&self) -> Option<&BuildVars> {
        self.vars.as_ref()
    }

    /// Point `PROJECT_DATA_DIR` at `to` and tell the sink about it.
    pub fn redirect_data_dir(&mut self, to: PathBuf) -> Result<()> {
        let vars = self
            .vars
            .as_mut()
            .ok_or_else(|| Error::msg("build variables are not initialized"))?;
        vars.redirect_data_dir(to);
        for (name, value) in vars.entries() {
            self.sink.emit(ExecEvent::VarSet {
                name: name.to_string(),
                value,
            });
        }
        Ok(())
    }

    pub fn log(&self, msg: &str) {
        let id = self
            .current_task_id
            .clone()
            .unwrap_or_else(|| "<none>".into());
        self.sink.emit(ExecEvent::TaskLog {
            id,
            line: msg.to_string(),
        });
    }

    // Runs a subprocess, streaming sanitized stdout/stderr lines into the task log.
    pub fn run_cmd(&self, mut cmd: Command) -> Result<()> {
        if self.dry_run {
            self.log(&format!("DRY-RUN: {:?}", cmd));
            return Ok(());
        }
        self.log(&format!("exec: {:?}", cmd));
        let program = cmd.get_program().to_string_lossy().into_owned();

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("spawn failed for {program}: {e}")))?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(err, tx));
        }
        drop(tx);

        for line in rx {
            let line = sanitize_log_line(&line);
            if !line.is_empty() {
                self.log(&line);
            }
        }

        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait failed: {e}")))?;
        if !status.success() {
            return Err(Error::msg(format!("command {program} failed: {status}")));
        }
        Ok(())
    }
}

fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    for line in BufReader::new(reader).split(b'\n') {
        let Ok(line) = line else {
            break;
        };
        let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
    }
}

/// Strips terminal escape sequences and control characters from tool output.
pub fn sanitize_log_line(input: &str) -> String {
    static ESCAPES: OnceLock<Option<Regex>> = OnceLock::new();
    let re = ESCAPES.get_or_init(|| {
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b.").ok()
    });
    let stripped = match re {
        Some(re) => re.replace_all(input, ""),
        None => input.into(),
    };
    stripped
        .chars()
        .map(|c| if c == '\t' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect()
}

#[derive(Default)]
pub struct TaskRegistry {
    exec: BTreeMap<&'static str, TaskExecFn>,
}

impl TaskRegistry {
    pub fn add(&mut self, id: &'static str, f: TaskExecFn) -> Result<()> {
        if self.exec.contains_key(id) {
            return Err(Error::msg(format!("duplicate task executor for '{id}'")));
        }
        self.exec.insert(id, f);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TaskExecFn> {
        self.exec.get(id).copied()
    }
}

pub trait ModuleExec {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()>;
}

/// Runs every hook that applies to `target`, one after another.
pub fn execute_plan(
    doc: &ConfigDoc,
    plan: &Plan,
    target: Option<&str>,
    reg: &TaskRegistry,
    ctx: &mut ExecCtx,
) -> Result<()> {
    for task in plan.ordered_for(target)? {
        let Some(exec) = reg.get(&task.id) else {
            return Err(Error::msg(format!(
                "no executor registered for task '{}'",
                task.id
            )));
        };
        ctx.sink.emit(ExecEvent::TaskStarted {
            id: task.id.clone(),
        });
        ctx.set_task(task.id.clone());
        tracing::debug!(task = %task.id, phase = %task.phase, "hook start");
        let start = Instant::now();
        let res = exec(doc, ctx);
        let elapsed_ms = start.elapsed().as_millis();
        match res {
            Ok(()) => ctx.sink.emit(ExecEvent::TaskFinished {
                id: task.id.clone(),
                ok: true,
                error: None,
                elapsed_ms,
            }),
            Err(e) => {
                ctx.sink.emit(ExecEvent::TaskFinished {
                    id: task.id.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                    elapsed_ms,
                });
                let err = Error::msg(format!("task '{}' failed: {e}", task.id));
                ctx.sink.emit(ExecEvent::ExecutorDone {
                    ok: false,
                    error: Some(err.to_string()),
                });
                return Err(err);
            }
        }
    }
    ctx.sink.emit(ExecEvent::ExecutorDone {
        ok: true,
        error: None,
    });
    Ok(())
}

pub fn builtin_registry() -> Result<TaskRegistry> {
    let mut reg = TaskRegistry::default();
    crate::modules::core::CoreModule::register_tasks(&mut reg)?;
    crate::modules::prune::PruneModule::register_tasks(&mut reg)?;
    crate::modules::headers::HeadersModule::register_tasks(&mut reg)?;
    crate::modules::assets::AssetsModule::register_tasks(&mut reg)?;
    Ok(reg)
}
