//! Composite shuffle key for the enrichment join.
//!
//! Records are partitioned and grouped by `uid` alone but sorted by
//! `(uid, kind)` with `User` ahead of `Session`, so a reducer sees a uid's
//! user record (if any) before every session sharing that uid.

use std::cmp::Ordering;

use crate::api::Shuffle;
use crate::error::FormatError;
use crate::wire::{Wire, WireReader};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    User,
    Session,
}

impl ValueKind {
    pub fn ordinal(self) -> i32 {
        match self {
            ValueKind::User => 0,
            ValueKind::Session => 1,
        }
    }

    pub fn from_ordinal(ordinal: i32) -> Result<Self, FormatError> {
        match ordinal {
            0 => Ok(ValueKind::User),
            1 => Ok(ValueKind::Session),
            other => Err(FormatError::UnknownKind(other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JoinKey {
    pub uid: i64,
    pub kind: ValueKind,
}

impl JoinKey {
    pub fn user(uid: i64) -> Self { Self { uid, kind: ValueKind::User } }
    pub fn session(uid: i64) -> Self { Self { uid, kind: ValueKind::Session } }

    pub fn shuffle() -> Shuffle<JoinKey> { Shuffle { partition, sort: sort_cmp, group: group_eq } }
}

/// `uid mod num_partitions`, ignoring the kind. Negative uids wrap into range.
pub fn partition(key: &JoinKey, num_partitions: usize) -> usize {
    key.uid.rem_euclid(num_partitions as i64) as usize
}

pub fn sort_cmp(a: &JoinKey, b: &JoinKey) -> Ordering {
    a.uid.cmp(&b.uid).then(a.kind.cmp(&b.kind))
}

pub fn group_eq(a: &JoinKey, b: &JoinKey) -> bool { a.uid == b.uid }

impl Wire for JoinKey {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        out.extend_from_slice(&self.uid.to_be_bytes());
        out.extend_from_slice(&self.kind.ordinal().to_be_bytes());
        Ok(())
    }

    fn read_from(reader: &mut WireReader<'_>) -> Result<Self, FormatError> {
        let uid = reader.read_i64()?;
        let kind = ValueKind::from_ordinal(reader.read_i32()?)?;
        Ok(Self { uid, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn partition_ignores_kind() {
        for uid in [-17i64, -1, 0, 1, 5, 1_000_003, i64::MIN, i64::MAX] {
            let p = partition(&JoinKey::user(uid), 10);
            assert!(p < 10);
            assert_eq!(p, partition(&JoinKey::session(uid), 10));
        }
    }

    #[test]
    fn user_sorts_before_session() {
        assert_eq!(sort_cmp(&JoinKey::user(5), &JoinKey::session(5)), Ordering::Less);
        assert_eq!(sort_cmp(&JoinKey::session(4), &JoinKey::user(5)), Ordering::Less);
        assert_eq!(sort_cmp(&JoinKey::session(5), &JoinKey::session(5)), Ordering::Equal);
        assert!(group_eq(&JoinKey::user(5), &JoinKey::session(5)));
        assert!(!group_eq(&JoinKey::user(5), &JoinKey::user(6)));
    }

    #[test]
    fn wire_layout_and_bad_kind() {
        let bytes = JoinKey::session(2).encode().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 1]);
        assert_eq!(JoinKey::decode(&bytes).unwrap(), JoinKey::session(2));
        let mut bad = bytes.clone();
        bad[11] = 9;
        assert_eq!(JoinKey::decode(&bad), Err(FormatError::UnknownKind(9)));
    }

    fn arb_key() -> impl Strategy<Value = JoinKey> {
        (-20i64..20, any::<bool>()).prop_map(|(uid, is_user)| if is_user { JoinKey::user(uid) } else { JoinKey::session(uid) })
    }

    proptest! {
        // partition -> stable sort -> cut groups, the way the runtime does it
        #[test]
        fn user_leads_every_group(keys in prop::collection::vec(arb_key(), 0..200), parts in 1usize..6) {
            for p in 0..parts {
                let mut part: Vec<JoinKey> = keys.iter().copied().filter(|k| partition(k, parts) == p).collect();
                part.sort_by(sort_cmp);
                let mut groups: Vec<Vec<JoinKey>> = Vec::new();
                for k in part {
                    match groups.last_mut() {
                        Some(g) if group_eq(&g[0], &k) => g.push(k),
                        _ => groups.push(vec![k]),
                    }
                }
                let mut seen_uids = std::collections::HashSet::new();
                for g in &groups {
                    prop_assert!(seen_uids.insert(g[0].uid), "uid split across groups");
                    let first_session = g.iter().position(|k| k.kind == ValueKind::Session).unwrap_or(g.len());
                    prop_assert!(g[first_session..].iter().all(|k| k.kind == ValueKind::Session));
                }
            }
        }
    }
}
