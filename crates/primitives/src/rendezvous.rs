//! Rendezvous (highest random weight) selection.
//!
//! Every member is scored with `sha256(member ‖ key)`. Members are ranked by
//! ascending score, ties broken by the member string, and the first `size`
//! are selected. The result is a pure function of the member set, the key and
//! the size.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Ranks all distinct `members` for `key`, best first.
pub fn rank<I, S>(members: I, key: &[u8]) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let distinct: BTreeSet<String> = members
        .into_iter()
        .map(|member| member.as_ref().to_owned())
        .collect();

    let mut scored: Vec<([u8; 32], String)> = distinct
        .into_iter()
        .map(|member| {
            let mut hasher = Sha256::new();
            hasher.update(member.as_bytes());
            hasher.update(key);
            (hasher.finalize().into(), member)
        })
        .collect();
    scored.sort();
    scored.into_iter().map(|(_, member)| member).collect()
}

/// Selects the top `size` members for `key`.
pub fn select<I, S>(members: I, key: &[u8], size: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ranked = rank(members, key);
    ranked.truncate(size);
    ranked
}

/// Key used when selecting registration attestors: the big endian eth block.
pub fn registration_key(eth_block: u64) -> [u8; 8] {
    eth_block.to_be_bytes()
}
