#![forbid(unsafe_code)]

//! Repository anchor discovery.
//!
//! A repository is any directory containing `.lodestar/`. Discovery walks
//! upward from the starting directory; `LODESTAR_ROOT` short-circuits the
//! walk (useful for hooks running outside the tree).

use crate::error::EngineError;
use std::path::{Path, PathBuf};

pub const LODESTAR_DIR: &str = ".lodestar";
pub const SPEC_FILE: &str = "spec.yaml";
pub const LOCK_FILE: &str = ".lock";

pub const ROOT_ENV: &str = "LODESTAR_ROOT";

#[derive(Clone, Debug)]
pub struct RepoPaths {
    root: PathBuf,
}

impl RepoPaths {
    /// Anchors at `root` without checking that `.lodestar/` exists yet.
    /// Used by `init`, which creates it.
    pub fn at_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Discovers the repository anchor from the current directory (or
    /// `LODESTAR_ROOT` when set).
    pub fn discover() -> Result<Self, EngineError> {
        if let Ok(root) = std::env::var(ROOT_ENV) {
            let root = PathBuf::from(root);
            if root.join(LODESTAR_DIR).is_dir() {
                return Ok(Self { root });
            }
            return Err(EngineError::NotInitialized);
        }
        let cwd = std::env::current_dir().map_err(|err| EngineError::RuntimeCorrupt {
            message: format!("cannot read current directory: {err}"),
        })?;
        Self::discover_from(&cwd)
    }

    /// Walks upward from `start` until a `.lodestar` directory is found.
    pub fn discover_from(start: &Path) -> Result<Self, EngineError> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(LODESTAR_DIR).is_dir() {
                return Ok(Self { root: current });
            }
            if !current.pop() {
                return Err(EngineError::NotInitialized);
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lodestar_dir(&self) -> PathBuf {
        self.root.join(LODESTAR_DIR)
    }

    pub fn spec_path(&self) -> PathBuf {
        self.lodestar_dir().join(SPEC_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.lodestar_dir().join(LOCK_FILE)
    }

    pub fn runtime_db_path(&self) -> PathBuf {
        self.lodestar_dir().join(ls_storage::RUNTIME_DB_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(test_name: &str) -> PathBuf {
        let base = std::env::temp_dir();
        let pid = std::process::id();
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = base.join(format!("ls_paths_{test_name}_{pid}_{nonce}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn discovers_anchor_from_nested_directory() {
        let root = temp_dir("discovers_anchor");
        std::fs::create_dir_all(root.join(LODESTAR_DIR)).expect("mk .lodestar");
        let nested = root.join("src").join("deep").join("module");
        std::fs::create_dir_all(&nested).expect("mk nested");

        let paths = RepoPaths::discover_from(&nested).expect("discover");
        assert_eq!(paths.root(), root.as_path());
        assert!(paths.spec_path().ends_with(".lodestar/spec.yaml"));
    }

    #[test]
    fn missing_anchor_is_not_initialized() {
        let root = temp_dir("missing_anchor");
        let err = RepoPaths::discover_from(&root).expect_err("no anchor");
        assert!(matches!(err, EngineError::NotInitialized));
    }
}
