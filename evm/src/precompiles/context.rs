// Journaled state shared by the native contracts
//
// `NativeState` is the block-level working set: extended-store writes and
// the staking operations queued for the validator manager. Handlers never
// touch it directly; `NativeContext` records an undo entry for every change.

use alloy_primitives::Address;

use super::staking::StakingOp;
use crate::extstore::{
    EntryKey, ExtSnapshot, Journal, JournalError, PendingWrites, Revertible, StoreError,
};

/// Undo record for one native state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeUndo {
    ExtPut {
        entry: EntryKey,
        previous: Option<Vec<u8>>,
    },
    StakingOp,
}

/// Native-contract changes staged during one block
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NativeState {
    pub ext: PendingWrites,
    pub staking_ops: Vec<StakingOp>,
}

impl NativeState {
    pub fn is_empty(&self) -> bool {
        self.ext.is_empty() && self.staking_ops.is_empty()
    }
}

impl Revertible for NativeState {
    type Undo = NativeUndo;

    fn revert(&mut self, undo: NativeUndo) {
        match undo {
            NativeUndo::ExtPut { entry, previous } => self.ext.restore(entry, previous),
            NativeUndo::StakingOp => {
                self.staking_ops.pop();
            }
        }
    }
}

/// What a handler sees while it runs
pub struct NativeContext<'a> {
    snapshot: &'a ExtSnapshot,
    state: &'a mut NativeState,
    journal: &'a mut Journal<NativeUndo>,
}

impl<'a> NativeContext<'a> {
    pub fn new(
        snapshot: &'a ExtSnapshot,
        state: &'a mut NativeState,
        journal: &'a mut Journal<NativeUndo>,
    ) -> Self {
        Self {
            snapshot,
            state,
            journal,
        }
    }

    /// Current value: this block's writes, then the block-start snapshot
    pub fn ext_get(&self, owner: &Address, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.state.ext.read_through(self.snapshot, owner, key)
    }

    /// Replace an entry, remembering what it replaced
    pub fn ext_put(&mut self, owner: Address, key: Vec<u8>, value: Vec<u8>) -> Result<(), JournalError> {
        self.ensure_frame()?;
        let entry = EntryKey::new(owner, key);
        let previous = self.state.ext.put(entry.clone(), value);
        self.journal.record(NativeUndo::ExtPut { entry, previous })
    }

    pub fn push_staking_op(&mut self, op: StakingOp) -> Result<(), JournalError> {
        self.ensure_frame()?;
        self.state.staking_ops.push(op);
        self.journal.record(NativeUndo::StakingOp)
    }

    pub(crate) fn open_frame(&mut self) {
        self.journal.open_frame();
    }

    pub(crate) fn commit_frame(&mut self) -> Result<(), JournalError> {
        self.journal.commit_frame()
    }

    pub(crate) fn revert_frame(&mut self) -> Result<(), JournalError> {
        self.journal.revert_frame(&mut *self.state)
    }

    fn ensure_frame(&self) -> Result<(), JournalError> {
        if self.journal.depth() == 0 {
            return Err(JournalError::NoOpenFrame);
        }
        Ok(())
    }
}
