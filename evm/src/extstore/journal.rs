// Call journal
//
// Undo log for one transaction's call tree. Frames nest exactly like the
// interpreter's call frames: a frame is opened when a call or create starts
// and closed with commit or revert when it returns. Records of a committed
// frame stay with the parent so a later revert of the parent undoes them too;
// records that survive the outermost frame are dropped.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JournalError {
    #[error("no journal frame is open")]
    NoOpenFrame,

    #[error("journal left {0} frames open")]
    Unbalanced(usize),
}

/// State that can be restored from undo records
pub trait Revertible {
    type Undo;

    /// Apply one undo record. Records are applied newest first.
    fn revert(&mut self, undo: Self::Undo);
}

/// Frame-structured undo log
#[derive(Debug)]
pub struct Journal<U> {
    records: Vec<U>,
    /// Index into `records` where each open frame starts
    frames: Vec<usize>,
}

impl<U> Default for Journal<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> Journal<U> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Number of open frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of undo records held across all open frames
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn open_frame(&mut self) {
        self.frames.push(self.records.len());
    }

    /// Record an undo entry in the innermost frame
    pub fn record(&mut self, undo: U) -> Result<(), JournalError> {
        if self.frames.is_empty() {
            return Err(JournalError::NoOpenFrame);
        }
        self.records.push(undo);
        Ok(())
    }

    /// Close the innermost frame keeping its effects
    pub fn commit_frame(&mut self) -> Result<(), JournalError> {
        self.frames.pop().ok_or(JournalError::NoOpenFrame)?;
        if self.frames.is_empty() {
            self.records.clear();
        }
        Ok(())
    }

    /// Close the innermost frame, undoing everything recorded since it opened
    pub fn revert_frame<T>(&mut self, target: &mut T) -> Result<(), JournalError>
    where
        T: Revertible<Undo = U>,
    {
        let mark = self.frames.pop().ok_or(JournalError::NoOpenFrame)?;
        for undo in self.records.drain(mark..).rev() {
            target.revert(undo);
        }
        Ok(())
    }

    /// Revert every open frame, outermost last
    pub fn revert_all<T>(&mut self, target: &mut T)
    where
        T: Revertible<Undo = U>,
    {
        while self.revert_frame(target).is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Map with (key, previous) undo records
    #[derive(Default, Debug, Clone, PartialEq)]
    struct Cells(BTreeMap<u8, u32>);

    impl Revertible for Cells {
        type Undo = (u8, Option<u32>);

        fn revert(&mut self, (key, previous): Self::Undo) {
            match previous {
                Some(value) => self.0.insert(key, value),
                None => self.0.remove(&key),
            };
        }
    }

    fn write(cells: &mut Cells, journal: &mut Journal<(u8, Option<u32>)>, key: u8, value: u32) {
        let previous = cells.0.insert(key, value);
        journal.record((key, previous)).unwrap();
    }

    #[test]
    fn test_revert_restores_previous_values() {
        let mut cells = Cells::default();
        cells.0.insert(1, 10);
        let mut journal = Journal::new();

        journal.open_frame();
        write(&mut cells, &mut journal, 1, 11);
        write(&mut cells, &mut journal, 1, 12);
        write(&mut cells, &mut journal, 2, 20);
        journal.revert_frame(&mut cells).unwrap();

        assert_eq!(cells.0.get(&1), Some(&10));
        assert_eq!(cells.0.get(&2), None);
        assert_eq!(journal.depth(), 0);
        assert!(journal.is_empty());
    }

    #[test]
    fn test_committed_child_reverted_by_parent() {
        let mut cells = Cells::default();
        let mut journal = Journal::new();

        journal.open_frame();
        write(&mut cells, &mut journal, 1, 1);
        journal.open_frame();
        write(&mut cells, &mut journal, 2, 2);
        journal.commit_frame().unwrap();
        assert_eq!(journal.len(), 2);

        journal.revert_frame(&mut cells).unwrap();
        assert!(cells.0.is_empty());
    }

    #[test]
    fn test_reverted_child_keeps_parent_writes() {
        let mut cells = Cells::default();
        let mut journal = Journal::new();

        journal.open_frame();
        write(&mut cells, &mut journal, 1, 1);
        journal.open_frame();
        write(&mut cells, &mut journal, 1, 5);
        write(&mut cells, &mut journal, 3, 3);
        journal.revert_frame(&mut cells).unwrap();
        journal.commit_frame().unwrap();

        assert_eq!(cells.0, BTreeMap::from([(1, 1)]));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_root_commit_discards_records() {
        let mut cells = Cells::default();
        let mut journal = Journal::new();

        journal.open_frame();
        write(&mut cells, &mut journal, 7, 7);
        journal.commit_frame().unwrap();

        assert!(journal.is_empty());
        assert_eq!(cells.0.get(&7), Some(&7));
    }

    #[test]
    fn test_unbalanced_close_is_an_error() {
        let mut cells = Cells::default();
        let mut journal: Journal<(u8, Option<u32>)> = Journal::new();

        assert_eq!(journal.commit_frame(), Err(JournalError::NoOpenFrame));
        assert_eq!(journal.revert_frame(&mut cells), Err(JournalError::NoOpenFrame));
        assert_eq!(journal.record((1, None)), Err(JournalError::NoOpenFrame));
    }

    proptest! {
        /// Reverting every frame restores the state from before the outermost frame
        #[test]
        fn prop_revert_all_restores_start(
            initial in proptest::collection::btree_map(any::<u8>(), any::<u32>(), 0..8),
            ops in proptest::collection::vec((0u8..4, any::<u8>(), any::<u32>()), 0..64),
        ) {
            let mut cells = Cells(initial.clone());
            let mut journal = Journal::new();
            journal.open_frame();

            for (op, key, value) in ops {
                match op {
                    0 => journal.open_frame(),
                    1 if journal.depth() > 1 => journal.commit_frame().unwrap(),
                    2 if journal.depth() > 1 => journal.revert_frame(&mut cells).unwrap(),
                    _ => write(&mut cells, &mut journal, key, value),
                }
            }

            journal.revert_all(&mut cells);
            prop_assert_eq!(cells.0, initial);
            prop_assert_eq!(journal.depth(), 0);
        }
    }
}
