#![allow(dead_code)]

pub mod builders;

use memsheet::config::{CliArgs, EngineConfig};
use memsheet::state::EngineState;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated workspace root for one test. Everything the engine writes under
/// it disappears when the workspace drops.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        TestWorkspace {
            dir: tempfile::tempdir().expect("create test workspace"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> EngineConfig {
        let args = CliArgs {
            workspace_root: Some(self.dir.path().to_path_buf()),
            ..CliArgs::default()
        };
        EngineConfig::from_args(args).expect("resolve test config")
    }

    pub fn config_with(&self, adjust: impl FnOnce(&mut EngineConfig)) -> EngineConfig {
        let mut config = self.config();
        adjust(&mut config);
        config
    }

    /// Writes a file under the workspace root and returns its path.
    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, contents).expect("write test file");
        path
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        TestWorkspace::new()
    }
}

pub fn engine_state(workspace: &TestWorkspace) -> EngineState {
    engine_state_with_config(workspace.config())
}

pub fn engine_state_with_config(config: EngineConfig) -> EngineState {
    EngineState::new(config).expect("build engine state")
}
