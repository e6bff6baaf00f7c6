// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Durable checkpoints, one pair of files per window.
//!
//! Layout under the store root:
//!
//! ```text
//! 2024-07-01.json        daily aggregate record, pretty-printed
//! 2024-07-01.json.id     identifiers admitted that day (dedup only)
//! 2024-07.json           monthly aggregate record
//! latest.json            symlink to the active daily checkpoint
//! latest-month.json      symlink to the active monthly checkpoint
//! ```
//!
//! Checkpoints are full rewrites, not appends. External readers should treat
//! them as read-after-flush snapshots; only the `latest` links are updated
//! atomically (create-then-rename), since those are followed by dashboards
//! while the daemon runs.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    dedup::DedupSet,
    error::StoreError,
    window::{Window, WindowAggregate, WindowKey},
};

/// Reads and writes window checkpoints under a root directory.
#[derive(Debug)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(CheckpointStore { root })
    }

    /// The directory this store writes into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the checkpoint file for `key`.
    pub fn checkpoint_path(&self, key: &WindowKey) -> PathBuf {
        self.root.join(key.checkpoint_name())
    }

    /// Path of the deduplication sidecar for `key`.
    pub fn id_sidecar_path(&self, key: &WindowKey) -> PathBuf {
        self.root.join(key.id_sidecar_name())
    }

    /// Loads the window for `key`, or an empty window if it was never
    /// flushed.
    ///
    /// Missing files are normal (a window that saw no submissions writes
    /// nothing). Files that exist but cannot be read or decoded are an
    /// error; the caller decides whether that is fatal.
    pub fn load(&self, key: &WindowKey) -> Result<Window, StoreError> {
        let aggregate: WindowAggregate =
            self.read_json(&self.checkpoint_path(key))?.unwrap_or_default();
        let seen: DedupSet = self.read_json(&self.id_sidecar_path(key))?.unwrap_or_default();
        Ok(Window {
            key: key.clone(),
            aggregate,
            seen,
        })
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(source) => Err(StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Writes `window`'s checkpoint, and its id sidecar when `with_ids`.
    ///
    /// Pretty-printed so operators can read checkpoints in place.
    pub fn flush(&self, window: &Window, with_ids: bool) -> Result<(), StoreError> {
        let path = self.checkpoint_path(&window.key);
        let encoded =
            serde_json::to_vec_pretty(&window.aggregate).map_err(io::Error::from)?;
        fs::write(&path, encoded)?;
        if with_ids {
            let encoded = serde_json::to_vec_pretty(&window.seen).map_err(io::Error::from)?;
            fs::write(self.id_sidecar_path(&window.key), encoded)?;
        }
        info!(
            window = %window.key,
            submissions = window.aggregate.system_count,
            "checkpoint written"
        );
        Ok(())
    }

    /// Points the granularity's `latest` link at `key`'s checkpoint.
    ///
    /// The link is created under a temporary name and renamed into place, so
    /// readers never observe a missing or half-made link.
    #[cfg(unix)]
    pub fn point_latest(&self, key: &WindowKey) -> Result<(), StoreError> {
        let link = self.root.join(key.kind().latest_link());
        let staged = self.root.join(format!(".{}.tmp", key.kind().latest_link()));
        match fs::remove_file(&staged) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        // Relative target: the checkpoint lives in the same directory, and a
        // relative link survives the root being remounted elsewhere.
        std::os::unix::fs::symlink(key.checkpoint_name(), &staged)?;
        fs::rename(&staged, &link)?;
        debug!(link = %link.display(), target = %key.checkpoint_name(), "latest link updated");
        Ok(())
    }

    /// Points the granularity's `latest` link at `key`'s checkpoint.
    ///
    /// Symbolic links are not portable off unix; elsewhere the link is
    /// skipped and consumers read the dated files directly.
    #[cfg(not(unix))]
    pub fn point_latest(&self, _key: &WindowKey) -> Result<(), StoreError> {
        Ok(())
    }
}
