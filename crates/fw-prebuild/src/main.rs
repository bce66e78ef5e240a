use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use fw_prebuild::Result;
use fw_prebuild::executor::{ExecCtx, StdoutSink};
use fw_prebuild::libdeps::PruneOutcome;
use fw_prebuild::minify::MinifyOptions;
use fw_prebuild::patch::PatchOutcome;
use fw_prebuild::planner::PACKAGING_TARGETS;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Emit diagnostics as JSON lines (filter with RUST_LOG)
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load config and print the hooks that run for a target
    Plan {
        /// Path to a prebuild definition TOML
        build: PathBuf,
        /// Packaging target (buildfs, uploadfs, uploadfsota); omit for plain builds
        #[arg(long)]
        target: Option<String>,
        /// Print GraphViz dot instead of a linear plan
        #[arg(long)]
        dot: bool,
    },
    /// Run the pre-build hooks for a target
    Run {
        /// Path to a prebuild definition TOML
        build: PathBuf,
        /// Packaging target (buildfs, uploadfs, uploadfsota); omit for plain builds
        #[arg(long)]
        target: Option<String>,
        /// Print what would run without executing hook bodies
        #[arg(long)]
        dry_run: bool,
        /// Print final build variables as NAME=value lines
        #[arg(long)]
        emit_vars: bool,
    },
    /// Load config and print the fully-resolved TOML (after extends/imports/env)
    Resolve {
        /// Path to a prebuild definition TOML
        build: PathBuf,
    },
    /// Guard every unguarded `#define <macro>` in a header
    Patch {
        file: PathBuf,
        #[arg(value_name = "MACRO")]
        macro_name: String,
    },
    /// Minify an asset tree into an output tree
    Minify {
        src: PathBuf,
        out: PathBuf,
        /// Skip the rebuild when inputs and previous output are unchanged
        #[arg(long)]
        incremental: bool,
    },
    /// Empty an installed library directory, keeping its manifests
    Prune {
        dir: PathBuf,
        /// File to keep (repeatable; defaults to .piopm and library.json)
        #[arg(long)]
        keep: Vec<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    // Orchestrator variables may come from a project-local .env.
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json);

    match args.cmd {
        Command::Plan { build, target, dot } => cmd_plan(&build, target.as_deref(), dot),
        Command::Run {
            build,
            target,
            dry_run,
            emit_vars,
        } => cmd_run(&build, target.as_deref(), dry_run, emit_vars),
        Command::Resolve { build } => cmd_resolve(&build),
        Command::Patch { file, macro_name } => cmd_patch(&file, &macro_name),
        Command::Minify {
            src,
            out,
            incremental,
        } => cmd_minify(&src, &out, incremental),
        Command::Prune { dir, keep } => cmd_prune(&dir, keep),
    }
}

fn note_target(target: Option<&str>) {
    if let Some(t) = target
        && !PACKAGING_TARGETS.contains(&t)
    {
        tracing::warn!(
            target_name = t,
            known = %PACKAGING_TARGETS.join(","),
            "no hooks attach to this target; only pre-build hooks run"
        );
    }
}

fn cmd_plan(path: &PathBuf, target: Option<&str>, dot: bool) -> Result<()> {
    note_target(target);
    let doc = fw_prebuild::config::load(path.as_path())?;
    let plan = fw_prebuild::modules::build_plan(&doc)?;

    if dot {
        print!("{}", plan.to_dot()?);
        return Ok(());
    }

    for (i, task) in plan.ordered_for(target)?.iter().enumerate() {
        let scope = if task.targets.is_empty() {
            "always".to_string()
        } else {
            task.targets.join(",")
        };
        println!(
            "{:>2}. {:<18}  {:<8} {:<8} {:<28}  {}",
            i + 1,
            task.id,
            task.module,
            task.phase,
            scope,
            task.label
        );
    }
    Ok(())
}

fn cmd_resolve(path: &PathBuf) -> Result<()> {
    let doc = fw_prebuild::config::load(path.as_path())?;
    // Best-effort pretty print of resolved config.
    let s = toml::to_string_pretty(&doc.value).unwrap_or_else(|_| format!("{:?}", doc.value));
    print!("{s}");
    Ok(())
}

fn cmd_run(path: &PathBuf, target: Option<&str>, dry_run: bool, emit_vars: bool) -> Result<()> {
    note_target(target);
    let doc = fw_prebuild::config::load(path.as_path())?;
    let plan = fw_prebuild::modules::build_plan(&doc)?;

    let reg = fw_prebuild::executor::builtin_registry()?;
    let sink = Arc::new(StdoutSink::default());
    let mut ctx = ExecCtx::new(dry_run, sink);
    fw_prebuild::executor::execute_plan(&doc, &plan, target, &reg, &mut ctx)?;

    if emit_vars && let Some(vars) = ctx.build_vars() {
        for (name, value) in vars.entries() {
            println!("{name}={value}");
        }
    }
    Ok(())
}

fn cmd_patch(file: &PathBuf, macro_name: &str) -> Result<()> {
    match fw_prebuild::patch::guard_macro(file, macro_name)? {
        PatchOutcome::Missing => println!("{}: not present", file.display()),
        PatchOutcome::Unchanged => println!("{}: unchanged", file.display()),
        PatchOutcome::Guarded { count } => {
            println!("{}: guarded {count} definition(s)", file.display())
        }
    }
    Ok(())
}

fn cmd_minify(src: &PathBuf, out: &PathBuf, incremental: bool) -> Result<()> {
    let opts = MinifyOptions {
        incremental,
        ..MinifyOptions::default()
    };
    let mut ctx = ExecCtx::new(false, Arc::new(StdoutSink::default()));
    ctx.set_task("minify");
    opts.ensure_tools(&ctx)?;
    let report = fw_prebuild::minify::run_pipeline(src, out, &opts)?;
    println!("{}", report.summary());
    Ok(())
}

fn cmd_prune(dir: &PathBuf, keep: Vec<String>) -> Result<()> {
    let keep = if keep.is_empty() {
        fw_prebuild::libdeps::DEFAULT_KEEP
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        keep
    };
    match fw_prebuild::libdeps::prune_library(dir, &keep)? {
        PruneOutcome::Missing => println!("{}: not installed", dir.display()),
        PruneOutcome::AlreadyPruned => println!("{}: already pruned", dir.display()),
        PruneOutcome::Pruned { removed } => {
            println!("{}: removed {removed} entries", dir.display())
        }
    }
    Ok(())
}
