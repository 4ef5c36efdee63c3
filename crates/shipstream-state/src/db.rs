//! The revisioned receiver state store.
//!
//! Three logical indexes (the receiver state singleton, the received-block
//! ring, and the per-contract ABI records) share one undo stack. Every
//! mutation happens inside an undo scope that records pre-images; a pushed
//! scope becomes the revision named by the current revision counter, and
//! `commit(n)` fuses all revisions up to `n` into the durable baseline.
//!
//! The store persists as a single size-capped image at
//! `<data-dir>/receiver-state`, written through a temp-file rename. Pushed
//! but uncommitted scopes are part of the image, so a restart can unwind
//! them before reconnecting.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shipstream_core::{Checksum256, Name};
use tracing::debug;

use crate::error::StateError;

/// The receiver position singleton. `irreversible_num <= head_num` always.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverState {
    pub head_num: u32,
    pub head_id: Checksum256,
    pub irreversible_num: u32,
    pub irreversible_id: Checksum256,
}

/// A byte blob that serializes as hex inside the state image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexBlob(#[serde(with = "shipstream_core::hex_bytes")] pub Vec<u8>);

impl Deref for HexBlob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for HexBlob {
    fn from(raw: Vec<u8>) -> Self {
        Self(raw)
    }
}

/// Pre-images of everything one scope touched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UndoScope {
    revision: u32,
    /// Pre-image of the state singleton, if mutated in this scope.
    state: Option<ReceiverState>,
    /// Pre-images of touched ring entries; `None` means the key was absent.
    blocks: BTreeMap<u32, Option<Checksum256>>,
    /// Pre-images of touched ABI records; `None` means the key was absent.
    abis: BTreeMap<Name, Option<HexBlob>>,
}

/// The serialized store image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Image {
    state: ReceiverState,
    blocks: BTreeMap<u32, Checksum256>,
    abis: BTreeMap<Name, HexBlob>,
    revision: u32,
    baseline_revision: u32,
    undo_stack: VecDeque<UndoScope>,
}

/// The revisioned receiver database.
#[derive(Debug)]
pub struct ReceiverDb {
    path: PathBuf,
    capacity_bytes: u64,
    image: Image,
    current: Option<UndoScope>,
}

impl ReceiverDb {
    /// Open (or create) the store at `path` with a `capacity_mb` MiB cap on
    /// the serialized image. The parent directory must already exist.
    pub fn open(path: impl Into<PathBuf>, capacity_mb: u32) -> Result<Self, StateError> {
        let path = path.into();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !dir.is_dir() {
            return Err(StateError::DataDirMissing(dir.to_path_buf()));
        }
        let image = if path.is_file() {
            let raw = std::fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            Image::default()
        };
        Ok(Self {
            path,
            capacity_bytes: capacity_mb as u64 * 1024 * 1024,
            image,
            current: None,
        })
    }

    pub fn revision(&self) -> u32 {
        self.image.revision
    }

    pub fn baseline_revision(&self) -> u32 {
        self.image.baseline_revision
    }

    pub fn set_revision(&mut self, revision: u32) {
        self.image.revision = revision;
    }

    /// Number of pushed, uncommitted scopes.
    pub fn undo_stack_depth(&self) -> usize {
        self.image.undo_stack.len()
    }

    pub fn has_open_scope(&self) -> bool {
        self.current.is_some()
    }

    // ─── Scope lifecycle ─────────────────────────────────────────────────────

    pub fn begin_undo_scope(&mut self) -> Result<(), StateError> {
        if self.current.is_some() {
            return Err(StateError::ScopeAlreadyOpen);
        }
        self.current = Some(UndoScope {
            revision: self.image.revision,
            ..Default::default()
        });
        Ok(())
    }

    /// Seal the open scope as the current revision.
    pub fn push_scope(&mut self) -> Result<(), StateError> {
        let mut scope = self.current.take().ok_or(StateError::NoOpenScope)?;
        scope.revision = self.image.revision;
        self.image.undo_stack.push_back(scope);
        Ok(())
    }

    /// Drop the open scope, reverting its mutations.
    pub fn rollback_scope(&mut self) -> Result<(), StateError> {
        let scope = self.current.take().ok_or(StateError::NoOpenScope)?;
        Self::revert(&mut self.image, scope);
        Ok(())
    }

    /// Discard the newest pushed scope and its mutations.
    pub fn undo(&mut self) -> Result<(), StateError> {
        if self.current.is_some() {
            return Err(StateError::ScopeAlreadyOpen);
        }
        let scope = self
            .image
            .undo_stack
            .pop_back()
            .ok_or(StateError::NothingToUndo {
                revision: self.image.revision,
            })?;
        Self::revert(&mut self.image, scope);
        self.image.revision = self
            .image
            .undo_stack
            .back()
            .map(|s| s.revision)
            .unwrap_or(self.image.baseline_revision);
        Ok(())
    }

    /// Fuse all scopes with revision `<= n` into the baseline. Committed
    /// revisions can no longer be undone.
    pub fn commit(&mut self, n: u32) {
        while self
            .image
            .undo_stack
            .front()
            .is_some_and(|s| s.revision <= n)
        {
            // Pre-images of a committed scope are simply forgotten.
            let scope = self.image.undo_stack.pop_front();
            if let Some(scope) = scope {
                self.image.baseline_revision = scope.revision;
            }
        }
        debug!(
            committed_through = self.image.baseline_revision,
            pending = self.image.undo_stack.len(),
            "commit"
        );
    }

    fn revert(image: &mut Image, scope: UndoScope) {
        if let Some(prev) = scope.state {
            image.state = prev;
        }
        for (num, prev) in scope.blocks {
            match prev {
                Some(id) => image.blocks.insert(num, id),
                None => image.blocks.remove(&num),
            };
        }
        for (account, prev) in scope.abis {
            match prev {
                Some(abi) => image.abis.insert(account, abi),
                None => image.abis.remove(&account),
            };
        }
    }

    // ─── Receiver state singleton ────────────────────────────────────────────

    pub fn state(&self) -> &ReceiverState {
        &self.image.state
    }

    pub fn set_state(&mut self, state: ReceiverState) -> Result<(), StateError> {
        let scope = self.current.as_mut().ok_or(StateError::NoActiveScope)?;
        if scope.state.is_none() {
            scope.state = Some(self.image.state.clone());
        }
        self.image.state = state;
        Ok(())
    }

    // ─── Received block ring ─────────────────────────────────────────────────

    pub fn insert_block(&mut self, block_num: u32, block_id: Checksum256) -> Result<(), StateError> {
        let scope = self.current.as_mut().ok_or(StateError::NoActiveScope)?;
        scope
            .blocks
            .entry(block_num)
            .or_insert_with(|| self.image.blocks.get(&block_num).copied());
        self.image.blocks.insert(block_num, block_id);
        Ok(())
    }

    /// Drop all ring entries with `block_num <= through`. Returns how many
    /// entries were removed.
    pub fn prune_blocks_through(&mut self, through: u32) -> Result<usize, StateError> {
        let scope = self.current.as_mut().ok_or(StateError::NoActiveScope)?;
        let stale: Vec<u32> = self
            .image
            .blocks
            .range(..=through)
            .map(|(num, _)| *num)
            .collect();
        for num in &stale {
            let prev = self.image.blocks.remove(num);
            scope.blocks.entry(*num).or_insert(prev);
        }
        Ok(stale.len())
    }

    pub fn block_id(&self, block_num: u32) -> Option<&Checksum256> {
        self.image.blocks.get(&block_num)
    }

    /// Ring entries with `lo <= block_num <= hi`, in ascending order.
    pub fn blocks_in_range(
        &self,
        lo: u32,
        hi: u32,
    ) -> impl Iterator<Item = (u32, &Checksum256)> + '_ {
        self.image.blocks.range(lo..=hi).map(|(num, id)| (*num, id))
    }

    pub fn block_count(&self) -> usize {
        self.image.blocks.len()
    }

    // ─── ABI records ─────────────────────────────────────────────────────────

    pub fn put_abi(&mut self, account: Name, abi: Vec<u8>) -> Result<(), StateError> {
        let scope = self.current.as_mut().ok_or(StateError::NoActiveScope)?;
        scope
            .abis
            .entry(account)
            .or_insert_with(|| self.image.abis.get(&account).cloned());
        self.image.abis.insert(account, abi.into());
        Ok(())
    }

    /// Remove an ABI record. Returns whether a record existed.
    pub fn remove_abi(&mut self, account: Name) -> Result<bool, StateError> {
        let scope = self.current.as_mut().ok_or(StateError::NoActiveScope)?;
        let prev = self.image.abis.remove(&account);
        let existed = prev.is_some();
        scope.abis.entry(account).or_insert(prev);
        Ok(existed)
    }

    pub fn get_abi(&self, account: Name) -> Option<&[u8]> {
        self.image.abis.get(&account).map(|b| &b.0[..])
    }

    pub fn abi_count(&self) -> usize {
        self.image.abis.len()
    }

    // ─── Persistence ─────────────────────────────────────────────────────────

    /// Write the image to disk through a temp-file rename.
    pub fn flush(&self) -> Result<(), StateError> {
        let raw = serde_json::to_vec(&self.image)?;
        if raw.len() as u64 > self.capacity_bytes {
            return Err(StateError::CapacityExceeded {
                used: raw.len() as u64,
                capacity: self.capacity_bytes,
            });
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
