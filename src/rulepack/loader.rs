// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Rule pack loading and hot reload.
//
// The loaded pack lives behind an atomically swapped `Arc`: reloads
// replace the reference while in-flight evaluations keep the snapshot
// they started with. Hot reload is a debounced mtime poll on a tokio
// task (the reliable cross-platform mechanism); `close()` stops it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use super::{compile_pack, RulePack, RulePackError};

/// The packaged default rule pack, embedded at compile time.
const DEFAULT_PACK_JSON: &str = include_str!("../../assets/rules.default.json");

/// Default reload debounce in milliseconds.
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 50;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Abstraction over where rule pack JSON comes from. `FileSource` reads
/// from disk and supports mtime polling; `StringSource` provides content
/// directly (used in tests to avoid file I/O).
pub trait PackSource: Send + Sync {
    fn load(&self) -> Result<String, RulePackError>;

    /// Last-modified time, when the source can report one. Sources
    /// without an mtime are never hot-reloaded.
    fn modified(&self) -> Option<SystemTime> {
        None
    }
}

/// Loads the pack from a file on disk.
pub struct FileSource {
    pub path: PathBuf,
}

impl PackSource for FileSource {
    fn load(&self) -> Result<String, RulePackError> {
        Ok(std::fs::read_to_string(&self.path)?)
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).ok()?.modified().ok()
    }
}

/// Provides pack content directly as a string.
pub struct StringSource {
    pub content: String,
}

impl PackSource for StringSource {
    fn load(&self) -> Result<String, RulePackError> {
        Ok(self.content.clone())
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Shared, atomically swapped reference to the loaded pack. Cloning the
/// handle shares the same underlying slot.
#[derive(Clone, Debug)]
pub struct RulePackHandle {
    slot: Arc<RwLock<Arc<RulePack>>>,
}

impl RulePackHandle {
    pub fn new(pack: RulePack) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Arc::new(pack))),
        }
    }

    /// Snapshot the current pack. In-flight evaluations holding a
    /// snapshot are unaffected by later swaps.
    pub fn current(&self) -> Arc<RulePack> {
        match self.slot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, pack: RulePack) {
        let next = Arc::new(pack);
        match self.slot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Loader options.
#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub hot_reload: bool,
    pub watch_debounce_ms: u64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            hot_reload: false,
            watch_debounce_ms: DEFAULT_WATCH_DEBOUNCE_MS,
        }
    }
}

/// Owns the loaded pack slot and, when hot reload is enabled, the poll
/// task keeping it fresh.
#[derive(Debug)]
pub struct RulePackLoader {
    handle: RulePackHandle,
    watcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RulePackLoader {
    /// Load the packaged default pack. Panics only if the embedded asset
    /// itself is invalid, which is a build defect.
    pub fn from_default_pack() -> Self {
        let pack = compile_pack(DEFAULT_PACK_JSON).expect("packaged default rule pack is invalid");
        Self {
            handle: RulePackHandle::new(pack),
            watcher: Mutex::new(None),
        }
    }

    /// Load from a source, failing loudly on first use if the source is
    /// unreadable or the document is invalid.
    pub fn load(
        source: Box<dyn PackSource>,
        options: LoaderOptions,
    ) -> Result<Self, RulePackError> {
        let pack = compile_pack(&source.load()?)?;
        tracing::info!(
            version = %pack.version,
            rules = pack.rules.len(),
            "rule pack loaded"
        );
        let handle = RulePackHandle::new(pack);

        let watcher = if options.hot_reload && source.modified().is_some() {
            Some(spawn_watcher(source, handle.clone(), options.watch_debounce_ms))
        } else {
            None
        };

        Ok(Self {
            handle,
            watcher: Mutex::new(watcher),
        })
    }

    pub fn handle(&self) -> RulePackHandle {
        self.handle.clone()
    }

    /// Stop the reload mechanism. Idempotent.
    pub fn close(&self) {
        let task = match self.watcher.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for RulePackLoader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Poll the source mtime; on change, wait out the debounce window and
/// swap in the recompiled pack. A reload that fails keeps the previous
/// pack active.
fn spawn_watcher(
    source: Box<dyn PackSource>,
    handle: RulePackHandle,
    debounce_ms: u64,
) -> tokio::task::JoinHandle<()> {
    let debounce = Duration::from_millis(debounce_ms.max(1));
    let poll = debounce.max(Duration::from_millis(25));

    tokio::spawn(async move {
        let mut loaded_mtime = source.modified();
        loop {
            tokio::time::sleep(poll).await;
            let current = source.modified();
            if current == loaded_mtime || current.is_none() {
                continue;
            }
            tokio::time::sleep(debounce).await;

            match source.load().and_then(|json| compile_pack(&json)) {
                Ok(pack) => {
                    tracing::info!(
                        version = %pack.version,
                        rules = pack.rules.len(),
                        "rule pack reloaded"
                    );
                    handle.swap(pack);
                    loaded_mtime = source.modified();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "rule pack reload failed, keeping previous pack");
                    loaded_mtime = source.modified();
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
