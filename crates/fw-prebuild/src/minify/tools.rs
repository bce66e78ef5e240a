use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::minify::formats::AssetKind;

/// External minifier used instead of the built-in one for a format.
///
/// `command` reads the source on stdin and writes the result to stdout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSpec {
    pub command: Vec<String>,
    /// Exits zero when the tool is usable. Defaults to a PATH lookup of `command[0]`.
    pub probe: Vec<String>,
    /// Run once when the tool is missing.
    pub install: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub html: Option<ToolSpec>,
    pub css: Option<ToolSpec>,
    pub js: Option<ToolSpec>,
}

impl ToolsConfig {
    pub fn get(&self, kind: AssetKind) -> Option<&ToolSpec> {
        let spec = match kind {
            AssetKind::Html => self.html.as_ref(),
            AssetKind::Css => self.css.as_ref(),
            AssetKind::Js => self.js.as_ref(),
        };
        spec.filter(|s| !s.command.is_empty())
    }
}

fn command_from(argv: &[String]) -> Result<Command> {
    let Some((program, args)) = argv.split_first() else {
        return Err(Error::msg("empty command"));
    };
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

pub fn tool_available(spec: &ToolSpec) -> bool {
    if !spec.probe.is_empty() {
        let Ok(mut cmd) = command_from(&spec.probe) else {
            return false;
        };
        return cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
    }
    spec.command
        .first()
        .is_some_and(|program| which::which(program).is_ok())
}

/// Makes sure an external tool is usable, installing it on demand.
pub fn ensure_tool(kind: AssetKind, spec: &ToolSpec, ctx: &ExecCtx) -> Result<()> {
    if tool_available(spec) {
        return Ok(());
    }
    if spec.install.is_empty() {
        return Err(Error::msg(format!(
            "{kind} minifier {:?} is not available and no install command is configured",
            spec.command
        )));
    }
    ctx.log(&format!("{kind} minifier not found; installing"));
    ctx.run_cmd(command_from(&spec.install)?)?;
    if ctx.dry_run || tool_available(spec) {
        return Ok(());
    }
    Err(Error::msg(format!(
        "{kind} minifier {:?} is still unavailable after install",
        spec.command
    )))
}

/// Reads `stdout` to the end, then reaps `child` even when the read failed.
fn drain_and_wait<R: Read>(
    child: &mut Child,
    stdout: Option<R>,
    out: &mut Vec<u8>,
) -> Result<ExitStatus> {
    let read_res = match stdout {
        Some(mut r) => r.read_to_end(out).map(|_| ()),
        None => Ok(()),
    };
    if read_res.is_err() {
        let _ = child.kill();
    }
    let status = child
        .wait()
        .map_err(|e| Error::msg(format!("wait failed: {e}")))?;
    read_res.map_err(|e| Error::msg(format!("failed to read tool output: {e}")))?;
    Ok(status)
}

/// Pipes `input` through the tool and returns its stdout.
pub fn run_filter(spec: &ToolSpec, input: &str) -> Result<String> {
    let mut cmd = command_from(&spec.command)?;
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::msg(format!("spawn failed for {:?}: {e}", spec.command)))?;

    // Feed stdin from a thread so a tool that streams output can't deadlock us.
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::msg("child stdin unavailable"))?;
    let payload = input.to_owned();
    let writer = std::thread::spawn(move || stdin.write_all(payload.as_bytes()));

    let mut stderr = child.stderr.take();
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(s) = stderr.as_mut() {
            let _ = s.read_to_string(&mut buf);
        }
        buf
    });

    let mut out = Vec::new();
    let stdout = child.stdout.take();
    let status = drain_and_wait(&mut child, stdout, &mut out)?;
    let write_res = writer
        .join()
        .map_err(|_| Error::msg("stdin writer panicked"))?;
    let err_text = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(Error::msg(format!(
            "{:?} failed: {status}: {}",
            spec.command,
            err_text.trim()
        )));
    }
    write_res.map_err(|e| Error::msg(format!("failed to write tool input: {e}")))?;
    String::from_utf8(out).map_err(|_| Error::msg(format!("{:?} produced invalid UTF-8", spec.command)))
}
