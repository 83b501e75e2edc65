use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use patch_repair::io::{is_supported_image, DEFAULT_OUTPUT_PREFIX};
use patch_repair::{
    BatchResult, BatchStatus, DirectorySink, FsLoader, Padding, RepairEngine, RepairOptions,
    RepairTask, SidecarBackend, TaskOutcome, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_SIZE,
};

#[derive(Parser)]
#[command(
    name = "patch-repair",
    about = "Remove detected watermarks by patching from a clean reference image",
    version,
    after_help = "Detector output is read from <image>.tensor.json next to each target.\n\n\
                  Directory mode pairs files by name: <target_dir>/x.jpg is repaired\n\
                  from <reference_dir>/x.jpg."
)]
struct Cli {
    /// Watermarked image file or directory
    target: PathBuf,

    /// Clean reference image file or directory
    reference: PathBuf,

    /// Output directory (default: the target's directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Detection confidence threshold (0.0-1.0)
    #[arg(short, long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    threshold: f32,

    /// Square model input size the detector was run at
    #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
    input_size: u32,

    /// Horizontal padding per side, as a fraction of box width
    #[arg(long, default_value_t = Padding::default().horizontal)]
    pad_x: f32,

    /// Vertical padding per side, as a fraction of box height
    #[arg(long, default_value_t = Padding::default().vertical)]
    pad_y: f32,

    /// Prefix for output file names
    #[arg(long, default_value = DEFAULT_OUTPUT_PREFIX)]
    prefix: String,

    /// Process pairs one at a time
    #[arg(long)]
    sequential: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if !(0.0..=1.0).contains(&cli.threshold) {
        eprintln!("Error: Threshold must be between 0.0 and 1.0");
        process::exit(1);
    }
    if cli.input_size == 0 {
        eprintln!("Error: Input size must be positive");
        process::exit(1);
    }

    for path in [&cli.target, &cli.reference] {
        if !path.exists() {
            eprintln!("Error: Input path does not exist: {}", path.display());
            process::exit(1);
        }
    }

    let tasks = if cli.target.is_dir() {
        if !cli.reference.is_dir() {
            eprintln!("Error: Reference must be a directory when target is a directory");
            process::exit(1);
        }
        match pair_directories(&cli.target, &cli.reference) {
            Ok(tasks) => tasks,
            Err(e) => {
                eprintln!("Error: Failed to read directory: {e}");
                process::exit(1);
            }
        }
    } else {
        vec![RepairTask::new(&cli.target, &cli.reference)]
    };

    let output_dir = match cli.output {
        Some(dir) => dir,
        None if cli.target.is_dir() => cli.target.clone(),
        None => cli.target.parent().unwrap_or(Path::new(".")).to_path_buf(),
    };

    let engine = RepairEngine::new(
        SidecarBackend::new(cli.input_size),
        FsLoader,
        DirectorySink::new(output_dir).with_prefix(cli.prefix),
    )
    .with_options(RepairOptions {
        padding: Padding {
            horizontal: cli.pad_x,
            vertical: cli.pad_y,
        },
        parallel: !cli.sequential,
    });

    let result = engine.run_batch(&tasks, cli.threshold);
    print_results(&result, cli.quiet);

    if let BatchStatus::Failed { diagnostics } = result.status() {
        eprintln!();
        eprintln!("Error: No image was repaired:\n{diagnostics}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Pair every supported image in `targets` with the same file name in
/// `references`, sorted by name.
fn pair_directories(targets: &Path, references: &Path) -> std::io::Result<Vec<RepairTask>> {
    let mut names: Vec<_> = std::fs::read_dir(targets)?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|e| is_supported_image(e.path().as_path()))
        .map(|e| e.file_name())
        .collect();
    names.sort();

    Ok(names
        .into_iter()
        .map(|name| RepairTask::new(targets.join(&name), references.join(&name)))
        .collect())
}

fn print_results(result: &BatchResult, quiet: bool) {
    for report in &result.reports {
        let name = report.task.name();
        match &report.outcome {
            TaskOutcome::Repaired { output } if !quiet => eprintln!("[OK] {name} -> {output}"),
            TaskOutcome::NoDetection if !quiet => eprintln!("[SKIP] {name}: {}", report.outcome),
            TaskOutcome::Repaired { .. } | TaskOutcome::NoDetection => {}
            other => eprintln!("[FAIL] {name}: {other}"),
        }
    }

    if result.reports.len() > 1 && !quiet {
        eprintln!();
        eprint!("[Summary] Repaired: {}", result.succeeded());
        if result.failed() > 0 {
            eprint!(", Not repaired: {}", result.failed());
        }
        eprintln!(" (Total: {})", result.reports.len());
    }
}
