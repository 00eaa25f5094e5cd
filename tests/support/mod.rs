#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;
use tick::ops::CreateOptions;
use tick::storage::Storage;
use tick::task::Task;
use tick::Store;

pub struct TestProject {
    dir: TempDir,
    store: Store,
}

impl TestProject {
    pub fn init() -> Result<Self, tick::Error> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::init(dir.path())?;
        let store = Store::open(storage)?;
        Ok(Self { dir, store })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// A second handle, as another process would open it
    pub fn reopen(&self) -> Result<Store, tick::Error> {
        Store::discover(self.dir.path())
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.store.storage().tasks_file()
    }

    pub fn cache_file(&self) -> PathBuf {
        self.store.storage().cache_file()
    }

    pub fn read_log(&self) -> std::io::Result<String> {
        fs::read_to_string(self.tasks_file())
    }

    pub fn write_log(&self, contents: &str) -> std::io::Result<()> {
        fs::write(self.tasks_file(), contents)
    }

    pub fn create(&self, title: &str) -> Result<Task, tick::Error> {
        self.store.create(CreateOptions {
            title: title.to_string(),
            ..CreateOptions::default()
        })
    }

    pub fn create_with(&self, options: CreateOptions) -> Result<Task, tick::Error> {
        self.store.create(options)
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = tick_cmd();
        cmd.current_dir(self.path());
        cmd
    }

    /// Run a command with `--json` and return the `data` field
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .args(args)
            .arg("--json")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let value: Value = serde_json::from_slice(&output).expect("json envelope");
        assert_eq!(value["status"], "success");
        value["data"].clone()
    }
}

pub fn tick_cmd() -> Command {
    let mut cmd = Command::cargo_bin("tick").expect("binary");
    cmd.env_remove("TICK_DIR");
    cmd.env_remove("RUST_LOG");
    cmd
}

pub fn ids(values: &Value) -> Vec<String> {
    values
        .as_array()
        .expect("array")
        .iter()
        .map(|entry| entry["id"].as_str().expect("id").to_string())
        .collect()
}
