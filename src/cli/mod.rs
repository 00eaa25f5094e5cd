//! Command-line interface for tick
//!
//! This module defines the CLI structure using clap derive macros.
//! Command implementations live in the submodules.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::error::Result;
use crate::output::OutputOptions;
use crate::store::Store;
use crate::task::Transition;

mod doctor;
mod init;
mod task;

/// tick - a local, file-based task tracker
///
/// Tasks live in `.tick/tasks.jsonl`; a SQLite cache answers queries.
/// Several agents can work on the same project concurrently.
#[derive(Parser, Debug)]
#[command(name = "tick")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(long, global = true, env = "TICK_DIR")]
    pub dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create `.tick/` in the project directory
    Init,

    /// Create a task
    Create {
        /// Task title
        title: String,

        /// Priority 0 (highest) to 4
        #[arg(short, long)]
        priority: Option<u8>,

        /// Longer description
        #[arg(short, long)]
        description: Option<String>,

        /// Task type: bug, feature, task, chore
        #[arg(short = 't', long = "type")]
        task_type: Option<String>,

        /// Tag (repeatable or comma-separated)
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,

        /// External reference (repeatable or comma-separated)
        #[arg(long = "ref", value_delimiter = ',')]
        refs: Vec<String>,

        /// Parent task id
        #[arg(long)]
        parent: Option<String>,

        /// Tasks this task waits on
        #[arg(long)]
        blocked_by: Vec<String>,

        /// Tasks that wait on this task
        #[arg(long)]
        blocks: Vec<String>,
    },

    /// Change task fields
    Update {
        /// Task id (full or partial)
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long, conflicts_with = "clear_description")]
        description: Option<String>,

        #[arg(long)]
        clear_description: bool,

        #[arg(short, long)]
        priority: Option<u8>,

        #[arg(short = 't', long = "type", conflicts_with = "clear_type")]
        task_type: Option<String>,

        #[arg(long)]
        clear_type: bool,

        /// Replace all tags
        #[arg(long = "tags", value_delimiter = ',', conflicts_with = "clear_tags")]
        tags: Option<Vec<String>>,

        #[arg(long)]
        clear_tags: bool,

        /// Replace all refs
        #[arg(long = "refs", value_delimiter = ',', conflicts_with = "clear_refs")]
        refs: Option<Vec<String>>,

        #[arg(long)]
        clear_refs: bool,

        #[arg(long, conflicts_with = "clear_parent")]
        parent: Option<String>,

        #[arg(long)]
        clear_parent: bool,

        /// Tasks that should wait on this task
        #[arg(long)]
        blocks: Vec<String>,
    },

    /// Show one task with blockers and children
    Show {
        id: String,
    },

    /// List tasks
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,

        /// Filter by priority
        #[arg(short, long)]
        priority: Option<u8>,

        /// Filter by type
        #[arg(short = 't', long = "type")]
        task_type: Option<String>,

        /// Only descendants of this task
        #[arg(long)]
        parent: Option<String>,

        /// Tags that must all match; repeat the flag for alternatives
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Only ready tasks
        #[arg(long, conflicts_with = "blocked")]
        ready: bool,

        /// Only blocked tasks
        #[arg(long)]
        blocked: bool,
    },

    /// List tasks that can be worked on now
    Ready,

    /// List open tasks that are waiting on something
    Blocked,

    /// Task counts by status, readiness and priority
    Stats,

    /// Mark a task in progress
    Start { id: String },

    /// Mark a task done
    Done { id: String },

    /// Cancel a task
    Cancel { id: String },

    /// Reopen a done or cancelled task
    Reopen { id: String },

    /// Dependency management
    #[command(subcommand)]
    Dep(DepCommands),

    /// Note management
    #[command(subcommand)]
    Note(NoteCommands),

    /// Delete tasks
    Remove {
        /// Task ids (repeatable or comma-separated)
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Rebuild the cache from the task log
    Rebuild,

    /// Check the task log and cache for problems
    Doctor,
}

#[derive(Subcommand, Debug)]
pub enum DepCommands {
    /// Make a task wait on another
    Add { task: String, blocker: String },

    /// Remove a dependency
    Rm { task: String, blocker: String },
}

#[derive(Subcommand, Debug)]
pub enum NoteCommands {
    /// Append a note
    Add { id: String, text: String },

    /// Remove a note by its 1-based position
    Rm { id: String, index: usize },
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        let dir = self.dir;

        match self.command {
            Commands::Init => init::run(dir.as_deref(), output),
            Commands::Create {
                title,
                priority,
                description,
                task_type,
                tags,
                refs,
                parent,
                blocked_by,
                blocks,
            } => task::run_create(
                &open_store(dir.as_deref())?,
                task::CreateArgs {
                    title,
                    priority,
                    description,
                    task_type,
                    tags,
                    refs,
                    parent,
                    blocked_by,
                    blocks,
                },
                output,
            ),
            Commands::Update {
                id,
                title,
                description,
                clear_description,
                priority,
                task_type,
                clear_type,
                tags,
                clear_tags,
                refs,
                clear_refs,
                parent,
                clear_parent,
                blocks,
            } => task::run_update(
                &open_store(dir.as_deref())?,
                task::UpdateArgs {
                    id,
                    title,
                    description: settable(description, clear_description),
                    priority,
                    task_type: settable(task_type, clear_type),
                    tags: settable(tags, clear_tags),
                    refs: settable(refs, clear_refs),
                    parent: settable(parent, clear_parent),
                    blocks,
                },
                output,
            ),
            Commands::Show { id } => task::run_show(&open_store(dir.as_deref())?, &id, output),
            Commands::List {
                status,
                priority,
                task_type,
                parent,
                tags,
                ready,
                blocked,
            } => task::run_list(
                &open_store(dir.as_deref())?,
                task::ListArgs {
                    status,
                    priority,
                    task_type,
                    parent,
                    tags,
                    ready,
                    blocked,
                },
                output,
            ),
            Commands::Ready => task::run_ready(&open_store(dir.as_deref())?, output),
            Commands::Blocked => task::run_blocked(&open_store(dir.as_deref())?, output),
            Commands::Stats => task::run_stats(&open_store(dir.as_deref())?, output),
            Commands::Start { id } => {
                task::run_transition(&open_store(dir.as_deref())?, &id, Transition::Start, output)
            }
            Commands::Done { id } => {
                task::run_transition(&open_store(dir.as_deref())?, &id, Transition::Done, output)
            }
            Commands::Cancel { id } => {
                task::run_transition(&open_store(dir.as_deref())?, &id, Transition::Cancel, output)
            }
            Commands::Reopen { id } => {
                task::run_transition(&open_store(dir.as_deref())?, &id, Transition::Reopen, output)
            }
            Commands::Dep(cmd) => {
                let store = open_store(dir.as_deref())?;
                match cmd {
                    DepCommands::Add { task, blocker } => {
                        task::run_dep_add(&store, &task, &blocker, output)
                    }
                    DepCommands::Rm { task, blocker } => {
                        task::run_dep_rm(&store, &task, &blocker, output)
                    }
                }
            }
            Commands::Note(cmd) => {
                let store = open_store(dir.as_deref())?;
                match cmd {
                    NoteCommands::Add { id, text } => task::run_note_add(&store, &id, &text, output),
                    NoteCommands::Rm { id, index } => task::run_note_rm(&store, &id, index, output),
                }
            }
            Commands::Remove { ids } => task::run_remove(&open_store(dir.as_deref())?, &ids, output),
            Commands::Rebuild => task::run_rebuild(&open_store(dir.as_deref())?, output),
            Commands::Doctor => doctor::run(&open_store(dir.as_deref())?, output),
        }
    }
}

/// Open the project containing `dir` (or the current directory)
fn open_store(dir: Option<&Path>) -> Result<Store> {
    let start = match dir {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };
    Store::discover(&start)
}

/// Combine a `--field` value with its `--clear-field` flag
fn settable<T>(value: Option<T>, clear: bool) -> Option<Option<T>> {
    if clear {
        Some(None)
    } else {
        value.map(Some)
    }
}
