//! Repair one watermarked image from its clean reference.
//!
//! The detector output for `<target>` must be stored as `<target stem>.tensor.json`.
//!
//! Usage:
//! ```sh
//! cargo run --example repair_pair -- target.jpg reference.jpg out_dir
//! ```

use std::env;
use std::process;

use patch_repair::{
    DirectorySink, FsLoader, RepairEngine, RepairTask, SidecarBackend, TaskOutcome,
    DEFAULT_CONFIDENCE_THRESHOLD,
};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <target> <reference> <output_dir>", args[0]);
        process::exit(1);
    }

    let engine = RepairEngine::new(SidecarBackend::default(), FsLoader, DirectorySink::new(&args[3]));
    let task = RepairTask::new(&args[1], &args[2]);

    match engine.process_task(&task, DEFAULT_CONFIDENCE_THRESHOLD) {
        TaskOutcome::Repaired { output } => println!("Done: {output}"),
        TaskOutcome::NoDetection => println!("Skipped: {}", TaskOutcome::NoDetection),
        other => {
            eprintln!("Error: {other}");
            process::exit(1);
        }
    }
}
