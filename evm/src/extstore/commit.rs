// Extended-store root folding
//
// A block's root is keccak(prev_root ++ entry_0 ++ entry_1 ++ ...) over the
// entries it changed, visited in ascending (owner, key) order. A block that
// changes nothing keeps the previous root.

use alloy_primitives::{keccak256, B256};

use super::EntryKey;

/// Canonical encoding of one changed entry: owner, then length-prefixed key
/// and value so adjacent entries cannot be re-split.
pub fn encode_entry(entry: &EntryKey, value: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(entry.owner.as_slice());
    out.extend_from_slice(&(entry.key.len() as u16).to_be_bytes());
    out.extend_from_slice(&entry.key);
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}

/// Fold changed entries into the previous root. Callers must yield entries in
/// ascending order; `PendingWrites::iter` does.
pub fn fold_ext_root<'a, I>(prev_root: B256, entries: I) -> B256
where
    I: IntoIterator<Item = (&'a EntryKey, &'a Vec<u8>)>,
{
    let mut preimage = prev_root.to_vec();
    let mut changed = false;
    for (entry, value) in entries {
        encode_entry(entry, value, &mut preimage);
        changed = true;
    }
    if changed {
        keccak256(&preimage)
    } else {
        prev_root
    }
}
