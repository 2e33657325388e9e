//! autoplan CLI Module
//!
//! Command-line interface for running, validating and inspecting plans.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::dataset::{missing_counts, ColumnType, DataLoader, DatasetInput, RunConfig};
use crate::engine::{ExecutionReport, PlanEngine};
use crate::plan::{AnalysisPlan, PlanWarning, TaskKind};
use crate::preprocessing::StepStatus;
use crate::training::CandidateScore;

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn bad(s: &str) -> ColoredString    { s.truecolor(235, 110, 100) }
fn warn(s: &str) -> ColoredString   { s.truecolor(230, 190, 90) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn line_box_center(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let total_pad = W.saturating_sub(visible_len);
    let left = total_pad / 2;
    let right = total_pad - left;
    println!("  {}  {}{}{} {}", dim("│"), " ".repeat(left), content, " ".repeat(right), dim("│"));
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_fail(msg: &str) {
    println!("  {} {}", bad("✗"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "autoplan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Execute analysis plans against tabular datasets")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a plan: transform the dataset, then train and score candidates
    Run {
        /// Analysis plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Data config (YAML)
        #[arg(short, long)]
        data: PathBuf,

        /// Task kind: 1/regression, 2/classification, 3/clustering
        #[arg(short, long)]
        task: TaskKind,

        /// Seed for the train/test split
        #[arg(long)]
        seed: Option<u64>,

        /// Fraction of rows held out for scoring
        #[arg(long)]
        test_size: Option<f64>,

        /// Write the execution report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the transformed dataset as CSV
        #[arg(long)]
        transformed: Option<PathBuf>,
    },

    /// Check a plan for policy violations without executing it
    Validate {
        /// Analysis plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Data config (YAML), enables column checks
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Only check this task's candidates
        #[arg(short, long)]
        task: Option<TaskKind>,
    },

    /// Show dataset information
    Info {
        /// Data config (YAML)
        #[arg(short, long)]
        data: PathBuf,
    },
}

/// Dispatch a parsed command line
pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run { plan, data, task, seed, test_size, report, transformed } => {
            cmd_run(&plan, &data, task, seed, test_size, report.as_deref(), transformed.as_deref())
        }
        Commands::Validate { plan, data, task } => cmd_validate(&plan, data.as_deref(), task),
        Commands::Info { data } => cmd_info(&data),
    }
}

fn load_input(data_path: &Path) -> anyhow::Result<(RunConfig, DatasetInput)> {
    let config = RunConfig::from_path(data_path)?;
    let frame = DataLoader::new().load(&config.data)?;
    let schema = config.data.schema.to_descriptor()?;
    Ok((config, DatasetInput::with_schema(frame, schema)))
}

fn print_warnings(warnings: &[PlanWarning]) {
    for warning in warnings {
        let location = warning.step.map(|i| format!("step #{} ", i)).unwrap_or_default();
        println!("  {} {}{}", warn("!"), dim(&location), warning.message);
    }
}

// ─── Run ───────────────────────────────────────────────────────────────────────

pub fn cmd_run(
    plan_path: &Path,
    data_path: &Path,
    task: TaskKind,
    seed: Option<u64>,
    test_size: Option<f64>,
    report_path: Option<&Path>,
    transformed_path: Option<&Path>,
) -> anyhow::Result<()> {
    let start = Instant::now();

    println!();
    line_box_top();
    line_box_center(&format!("{}", "autoplan".white().bold()));
    line_box_sep();
    line_box(&kv("Plan ", &plan_path.display().to_string()));
    line_box(&kv("Data ", &data_path.display().to_string()));
    line_box(&kv("Task ", task.as_str()));
    line_box_bottom();

    section("Inputs");
    step_run("Loading plan");
    let plan = AnalysisPlan::from_path(plan_path)?;
    step_done(&format!(
        "{} steps, {} candidates",
        plan.transformations.len(),
        plan.candidates(task).len()
    ));

    step_run("Loading data");
    let (config, input) = load_input(data_path)?;
    step_done(&format!("{} rows × {} cols", input.frame.height(), input.frame.width()));

    let warnings = plan.validate(task, Some(&input.schema));
    if !warnings.is_empty() {
        section("Plan warnings");
        print_warnings(&warnings);
    }

    let mut engine_config = config.engine_config();
    if let Some(seed) = seed {
        engine_config = engine_config.with_random_seed(seed);
    }
    if let Some(test_size) = test_size {
        engine_config = engine_config.with_test_size(test_size);
    }

    let report = PlanEngine::builtin(engine_config).execute(&plan, input, task)?;
    print_report(&report);

    if let Some(path) = report_path {
        std::fs::write(path, report.to_json()?)?;
        step_ok(&format!("Report saved to {}", path.display()));
    }
    if let Some(path) = transformed_path {
        let mut frame = report.transformed.clone();
        DataLoader::new().write_csv(&mut frame, path)?;
        step_ok(&format!("Transformed data saved to {}", path.display()));
    }

    println!();
    println!("  {}", dim(&format!("finished in {:.2}s", start.elapsed().as_secs_f64())));
    println!();
    Ok(())
}

fn print_report(report: &ExecutionReport) {
    section("Transformations");
    if report.steps.is_empty() {
        println!("  {}", dim("no steps"));
    }
    for step in &report.steps {
        let label = format!("#{} {} {}", step.index, step.transformer, dim(&step.columns.join(", ")));
        match &step.status {
            StepStatus::Applied => step_ok(&label),
            StepStatus::Failed { kind, message } => {
                step_fail(&label);
                println!("      {} {}", bad(&kind.to_string()), dim(message));
            }
        }
    }
    let residual = report.residual_missing();
    if residual > 0 {
        println!("  {} {} missing cells remain", warn("!"), residual);
    }

    section("Candidates");
    if report.candidates.is_empty() {
        println!("  {}", dim("no candidates for this task"));
        return;
    }
    println!("  {:<30} {:>12} {:>10}", muted("Model"), muted("Score"), muted("Fit"));
    println!("  {}", dim(&"─".repeat(54)));
    for candidate in &report.candidates {
        let score = match (&candidate.score, &candidate.error) {
            (_, Some(error)) => bad(&error.kind.to_string()),
            (CandidateScore::Value(v), None) => ok(&format!("{:.4}", v)),
            (CandidateScore::Unavailable { .. }, None) => muted("unavailable"),
        };
        println!(
            "  {:<30} {:>12} {:>9.3}s",
            candidate.model_name, score, candidate.fit_seconds
        );
        if let Some(error) = &candidate.error {
            println!("      {}", dim(&error.message));
        }
    }
}

// ─── Validate ──────────────────────────────────────────────────────────────────

pub fn cmd_validate(plan_path: &Path, data_path: Option<&Path>, task: Option<TaskKind>) -> anyhow::Result<()> {
    section("Plan Validation");

    let plan = AnalysisPlan::from_path(plan_path)?;
    let schema = match data_path {
        Some(path) => Some(load_input(path)?.1.schema),
        None => None,
    };

    println!("  {:<14} {}", muted("Plan"), plan_path.display());
    println!("  {:<14} {}", muted("Steps"), plan.transformations.len());
    for task in TaskKind::ALL {
        println!("  {:<14} {}", muted(task.as_str()), plan.candidates(task).len());
    }
    println!();

    let tasks: Vec<TaskKind> = match task {
        Some(task) => vec![task],
        None => TaskKind::ALL
            .into_iter()
            .filter(|t| !plan.candidates(*t).is_empty())
            .collect(),
    };
    let mut warnings: Vec<PlanWarning> = Vec::new();
    for task in &tasks {
        for warning in plan.validate(*task, schema.as_ref()) {
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }
    }
    if tasks.is_empty() {
        println!("  {} plan suggests no models for any task", warn("!"));
        warnings = plan.validate(TaskKind::Regression, schema.as_ref());
        warnings.retain(|w| w.step.is_some());
    }
    print_warnings(&warnings);
    if warnings.is_empty() {
        step_ok("No policy violations");
    }
    println!();
    Ok(())
}

// ─── Info ──────────────────────────────────────────────────────────────────────

pub fn cmd_info(data_path: &Path) -> anyhow::Result<()> {
    section("Data Info");

    let (_, input) = load_input(data_path)?;
    let df = &input.frame;

    println!("  {:<12} {}", muted("Config"), data_path.display());
    println!("  {:<12} {}", muted("Rows"), df.height());
    println!("  {:<12} {}", muted("Columns"), df.width());
    println!(
        "  {:<12} {}",
        muted("Target"),
        input.schema.target_column.as_deref().unwrap_or("-")
    );
    println!("  {:<12} {:.2} MB", muted("Memory"), df.estimated_size() as f64 / 1024.0 / 1024.0);
    println!();

    println!(
        "  {:<20} {:<12} {:<12} {:>6}",
        muted("Column"),
        muted("Dtype"),
        muted("Type"),
        muted("Nulls")
    );
    println!("  {}", dim(&"─".repeat(54)));

    for (col, missing) in df.get_columns().iter().zip(missing_counts(df)) {
        let ty = input
            .schema
            .column_type(col.name())
            .unwrap_or_else(|| ColumnType::from_dtype(col.dtype()));
        println!(
            "  {:<20} {:<12} {:<12} {:>6}",
            col.name().as_str(),
            format!("{}", col.dtype()).truecolor(140, 140, 140),
            ty.to_string(),
            missing.missing
        );
    }

    println!();
    Ok(())
}
