use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rf_core::SerialComm;
use rf_core::timing::{enable_timing, solver_timing};
use rf_sim::{
    ProblemConfig, RunSummary, SimError, SimResult, build_problem, run_richards, save_run,
    validate_problem,
};

#[derive(Parser)]
#[command(name = "rf-cli")]
#[command(about = "Richards flow CLI - variably saturated subsurface flow", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a problem file
    Validate {
        /// Path to the problem YAML file
        problem_path: PathBuf,
    },
    /// Run a problem
    Run {
        /// Path to the problem YAML file
        problem_path: PathBuf,
        /// Output directory (overrides `output_dir` in the problem file)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Override the end time in seconds
        #[arg(long)]
        end: Option<f64>,
        /// Solve for the steady state instead of marching in time
        #[arg(long)]
        steady: bool,
        /// Report time spent in residuals, Jacobians and linear solves
        #[arg(long)]
        timing: bool,
    },
    /// Show the summary of a saved run
    Show {
        /// Directory written by `run`
        run_dir: PathBuf,
    },
}

fn main() -> SimResult<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { problem_path } => cmd_validate(&problem_path),
        Commands::Run {
            problem_path,
            output,
            end,
            steady,
            timing,
        } => cmd_run(&problem_path, output, end, steady, timing),
        Commands::Show { run_dir } => cmd_show(&run_dir),
    }
}

fn cmd_validate(problem_path: &Path) -> SimResult<()> {
    println!("Validating problem: {}", problem_path.display());
    let config = ProblemConfig::load(problem_path)?;
    validate_problem(&config)?;
    println!("✓ Problem is valid");
    println!(
        "  Mesh: {:?} cells, {} materials, {} boundary conditions, {} sources",
        config.mesh.cells,
        config.materials.len(),
        config.boundary_conditions.len(),
        config.sources.len()
    );
    Ok(())
}

fn cmd_run(
    problem_path: &Path,
    output: Option<PathBuf>,
    end: Option<f64>,
    steady: bool,
    timing: bool,
) -> SimResult<()> {
    let mut config = ProblemConfig::load(problem_path)?;
    if let Some(end) = end {
        config.time.end = end;
    }
    config.time.steady |= steady;
    if timing {
        enable_timing();
        solver_timing::reset_all();
    }

    let mut problem = build_problem(&config, Arc::new(SerialComm))?;
    if config.time.steady {
        println!("Solving steady state: {} cells", problem.num_cells());
    } else {
        println!(
            "Running transient: {} cells, t = {} .. {} s",
            problem.num_cells(),
            config.time.start,
            config.time.end
        );
    }

    let record = run_richards(&mut problem, &config.time)?;
    println!("✓ Run completed");
    print_summary(&record.summary);

    if timing {
        solver_timing::log_summary();
    }

    if let Some(dir) = output.or(config.output_dir) {
        save_run(&record, &dir)?;
        println!("  Saved to {}", dir.display());
    }
    Ok(())
}

fn cmd_show(run_dir: &Path) -> SimResult<()> {
    let path = run_dir.join("summary.json");
    let text = fs::read_to_string(&path).map_err(|source| SimError::Io {
        path: path.clone(),
        source,
    })?;
    let summary: RunSummary = serde_json::from_str(&text)?;
    println!("Run: {}", run_dir.display());
    println!("  Started:  {}", summary.started_at);
    println!("  Finished: {}", summary.finished_at);
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let mode = if summary.steady { "steady" } else { "transient" };
    println!("  Mode: {}", mode);
    println!("  Final time: {:.3} s", summary.final_time_s);
    println!(
        "  Steps: {} ({} failed solves)",
        summary.steps, summary.failed_solves
    );
    println!(
        "  Newton iterations: {}, residual evaluations: {}",
        summary.newton_iterations, summary.function_evaluations
    );
    println!(
        "  Water mass: {:.6e} -> {:.6e} kg",
        summary.initial_mass_kg, summary.final_mass_kg
    );
    println!("  Wall time: {:.3} s", summary.wall_time_s);
}
