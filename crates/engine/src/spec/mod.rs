#![forbid(unsafe_code)]

//! Spec store: the only writer of `.lodestar/spec.yaml`.
//!
//! Mutation protocol: take an exclusive cross-process lock on the `.lock`
//! sentinel, re-read the file (no caching across write barriers), apply the
//! mutation to the in-memory copy, validate every invariant, write to a temp
//! file and rename it into place, release the lock. Readers never lock; they
//! retry once to ride out a concurrent rename.

pub mod model;

use crate::dag;
use crate::error::EngineError;
use crate::paths::RepoPaths;
use fs2::FileExt;
use model::SpecDoc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct SpecStore {
    spec_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl SpecStore {
    pub fn new(paths: &RepoPaths) -> Self {
        Self {
            spec_path: paths.spec_path(),
            lock_path: paths.lock_path(),
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Loads the spec without locking, retrying once if the read races a
    /// writer's rename.
    pub fn load(&self) -> Result<SpecDoc, EngineError> {
        match self.read_once() {
            Ok(doc) => Ok(doc),
            Err(EngineError::NotInitialized) => Err(EngineError::NotInitialized),
            Err(_first) => self.read_once(),
        }
    }

    fn read_once(&self) -> Result<SpecDoc, EngineError> {
        let text = match std::fs::read_to_string(&self.spec_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NotInitialized)
            }
            Err(err) => {
                return Err(EngineError::RuntimeCorrupt {
                    message: format!("cannot read spec: {err}"),
                })
            }
        };
        model::decode(&text)
    }

    /// Runs a mutation under the spec lock. The mutation sees the freshest
    /// on-disk state; the whole change is rejected if any invariant fails,
    /// and the file is replaced atomically on success.
    pub fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut SpecDoc) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let lock = self.acquire_lock()?;
        let result = (|| {
            let mut doc = self.read_once()?;
            let out = apply(&mut doc)?;
            dag::validate(&doc)?;
            self.replace(&doc)?;
            Ok(out)
        })();
        let _ = lock.unlock();
        result
    }

    /// First write of a fresh repository; fails if the spec already exists
    /// unless `force` is set.
    pub fn write_initial(&self, doc: &SpecDoc, force: bool) -> Result<(), EngineError> {
        if self.spec_path.exists() && !force {
            return Err(EngineError::InvalidInput {
                field: "force",
                reason: format!("{} already exists", self.spec_path.display()),
            });
        }
        dag::validate(doc)?;
        let lock = self.acquire_lock()?;
        let result = self.replace(doc);
        let _ = lock.unlock();
        result
    }

    fn replace(&self, doc: &SpecDoc) -> Result<(), EngineError> {
        let text = model::encode(doc)?;
        let tmp_path = self.spec_path.with_extension("yaml.tmp");
        let write = || -> std::io::Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(text.as_bytes())?;
            tmp.sync_all()?;
            std::fs::rename(&tmp_path, &self.spec_path)
        };
        write().map_err(|err| EngineError::RuntimeCorrupt {
            message: format!("cannot write spec: {err}"),
        })
    }

    fn acquire_lock(&self) -> Result<File, EngineError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|err| EngineError::RuntimeCorrupt {
                message: format!("cannot open spec lock: {err}"),
            })?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(EngineError::LockTimeout);
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(err) => {
                    return Err(EngineError::RuntimeCorrupt {
                        message: format!("spec lock failed: {err}"),
                    })
                }
            }
        }
    }
}
