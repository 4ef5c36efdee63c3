//! The contract ABI registry.
//!
//! Mediates between the persisted ABI records in the state store and the
//! additive-only decode context. The decode context is a cache fully
//! derivable from the record set: any destructive change (removal,
//! replacement of a loaded ABI, fork rollback) discards and rebuilds it;
//! records are then lazily reloaded through [`AbiRegistry::ensure_loaded`].

use std::collections::HashSet;

use shipstream_codec::AbiDecodeContext;
use shipstream_core::{BlockTimestamp, Name};
use shipstream_state::{ReceiverDb, StateError};
use tracing::{debug, warn};

use crate::events::{AbiErrorEvent, AbiRemovalEvent, AbiUpdateEvent, EventBus};

/// Block position stamped onto ABI lifecycle events.
#[derive(Debug, Clone, Copy)]
pub struct EventStamp {
    pub block_num: u32,
    pub block_timestamp: BlockTimestamp,
}

/// Registry of per-contract ABIs and their decode context.
#[derive(Debug, Default)]
pub struct AbiRegistry {
    context: AbiDecodeContext,
    loaded: HashSet<Name>,
}

impl AbiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The decode context. Contains schemas for every account in the loaded
    /// set, and nothing stale.
    pub fn context(&self) -> &AbiDecodeContext {
        &self.context
    }

    pub fn is_loaded(&self, account: Name) -> bool {
        self.loaded.contains(&account)
    }

    /// Discard and recreate the decode context. Records survive and are
    /// reloaded lazily.
    pub fn rebuild(&mut self) {
        self.context = AbiDecodeContext::new();
        self.loaded.clear();
        debug!("rebuilt ABI decode context");
    }

    /// Install a new ABI for `account` and upsert its record.
    ///
    /// An invalid ABI publishes an `abi_error` event and leaves the record
    /// store untouched. Only state-store failures are errors.
    pub fn update(
        &mut self,
        db: &mut ReceiverDb,
        bus: &EventBus,
        at: EventStamp,
        account: Name,
        abi: &[u8],
    ) -> Result<(), StateError> {
        // The context cannot replace in place once an account is loaded.
        if self.loaded.contains(&account) {
            self.rebuild();
        }
        match self.context.set_abi_bin(account, abi) {
            Err(err) => {
                warn!(account = %account, error = %err, "cannot use contract ABI");
                bus.abi_errors.publish(AbiErrorEvent {
                    block_num: at.block_num,
                    block_timestamp: at.block_timestamp,
                    account,
                    error: err.to_string(),
                });
                Ok(())
            }
            Ok(def) => {
                self.loaded.insert(account);
                db.put_abi(account, abi.to_vec())?;
                if bus.abi_updates.has_subscribers() {
                    bus.abi_updates.publish(AbiUpdateEvent {
                        block_num: at.block_num,
                        block_timestamp: at.block_timestamp,
                        account,
                        abi_bytes: abi.to_vec(),
                        abi: def,
                    });
                }
                Ok(())
            }
        }
    }

    /// Drop `account`'s ABI record, if any, and publish the removal.
    pub fn remove(
        &mut self,
        db: &mut ReceiverDb,
        bus: &EventBus,
        at: EventStamp,
        account: Name,
    ) -> Result<(), StateError> {
        if self.loaded.contains(&account) {
            self.rebuild();
        }
        if db.remove_abi(account)? {
            bus.abi_removals.publish(AbiRemovalEvent {
                block_num: at.block_num,
                block_timestamp: at.block_timestamp,
                account,
            });
        }
        Ok(())
    }

    /// Make `account` decodable if possible: already loaded, or loadable
    /// from its stored record.
    pub fn ensure_loaded(&mut self, db: &ReceiverDb, account: Name) -> bool {
        if self.loaded.contains(&account) {
            return true;
        }
        let Some(raw) = db.get_abi(account) else {
            return false;
        };
        match self.context.set_abi_bin(account, raw) {
            Ok(_) => {
                self.loaded.insert(account);
                true
            }
            Err(err) => {
                warn!(account = %account, error = %err, "stored ABI record failed to load");
                false
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
