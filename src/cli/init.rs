//! tick init command implementation
//!
//! Creates `.tick/` with an empty task log and the default config.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::storage::{Storage, TICK_DIR};

#[derive(Serialize)]
struct InitReport {
    project: PathBuf,
    tick_dir: PathBuf,
}

pub fn run(dir: Option<&Path>, output: OutputOptions) -> Result<()> {
    let project = match dir {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };

    let storage = Storage::init(&project)?;

    let report = InitReport {
        project: project.clone(),
        tick_dir: storage.tick_dir().to_path_buf(),
    };

    let mut human = HumanOutput::new(format!("Initialized {TICK_DIR}/ in {}", project.display()));
    human.push_field("Tasks", storage.tasks_file().display().to_string());
    human.push_field("Config", storage.config_file().display().to_string());
    human.push_next_step("tick create \"<title>\"");

    emit_success(output, "init", &report, Some(&human))
}
