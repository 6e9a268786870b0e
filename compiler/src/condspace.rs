//! Interned condition spaces.
//!
//! A condition space is a set of boolean condition tests. A transition
//! guarded by a space of `n` tests is split into up to `2^n` entries, one per
//! truth assignment, addressed by a [`CondKey`] whose bit `i` holds the value
//! of the space's `i`th test.

use rustc_hash::FxHashMap;

use crate::action::ActionId;

/// A truth assignment over the tests of one condition space.
pub type CondKey = u64;

/// The most tests a single space can hold while every key, and the size of
/// the expanded pseudo-alphabet, still fits in a [`CondKey`].
pub const MAX_SPACE_CONDS: usize = CondKey::BITS as usize - 1;

/// An index into a [`CondSpaceMap`]. Two spaces built from the same set of
/// tests always share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CondSpaceId(u32);

impl CondSpaceId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondSpace {
    id: CondSpaceId,
    conds: Vec<ActionId>,
}

impl CondSpace {
    pub fn id(&self) -> CondSpaceId {
        self.id
    }

    /// The tests of this space, sorted by id.
    pub fn conds(&self) -> &[ActionId] {
        &self.conds
    }

    /// The number of distinct keys in the expanded pseudo-alphabet.
    pub fn full_size(&self) -> u64 {
        1 << self.conds.len()
    }

    /// Returns the bit position of `cond` in this space's keys.
    pub fn position(&self, cond: ActionId) -> Option<usize> {
        self.conds.binary_search(&cond).ok()
    }
}

/// Hash-consing registry for condition spaces.
#[derive(Debug, Default)]
pub struct CondSpaceMap {
    spaces: Vec<CondSpace>,
    index: FxHashMap<Vec<ActionId>, CondSpaceId>,
}

impl CondSpaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn get(&self, id: CondSpaceId) -> &CondSpace {
        &self.spaces[id.as_usize()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &CondSpace> + '_ {
        self.spaces.iter()
    }

    /// Returns the canonical space for a set of tests, creating it on first
    /// use. Order and duplicates in `conds` are irrelevant. Panics on more
    /// than [`MAX_SPACE_CONDS`] distinct tests.
    pub fn intern(&mut self, conds: impl IntoIterator<Item = ActionId>) -> CondSpaceId {
        let mut conds: Vec<ActionId> = conds.into_iter().collect();
        conds.sort();
        conds.dedup();
        assert!(
            conds.len() <= MAX_SPACE_CONDS,
            "condition space of {} tests overflows its keys",
            conds.len()
        );

        if let Some(id) = self.index.get(&conds) {
            return *id;
        }

        let id = CondSpaceId(self.spaces.len() as u32);
        self.spaces.push(CondSpace {
            id,
            conds: conds.clone(),
        });
        self.index.insert(conds, id);
        id
    }

    /// Returns the ids of the tests in the union of two spaces, sorted.
    pub fn union_conds(&self, left: Option<CondSpaceId>, right: Option<CondSpaceId>) -> Vec<ActionId> {
        let mut conds: Vec<ActionId> = [left, right]
            .into_iter()
            .flatten()
            .flat_map(|id| self.get(id).conds.iter().copied())
            .collect();
        conds.sort();
        conds.dedup();
        conds
    }

    /// Re-expresses `key` from the space `from` in the larger space `to`,
    /// returning every key of `to` that agrees with it on the tests of
    /// `from`. A `from` of `None` is the empty space, so its single key 0
    /// expands to all of `to`.
    pub fn expand_cond_key(
        &self,
        from: Option<CondSpaceId>,
        to: CondSpaceId,
        key: CondKey,
    ) -> Vec<CondKey> {
        let to_space = self.get(to);
        let from_conds: &[ActionId] = match from {
            Some(id) => &self.get(id).conds,
            None => &[],
        };

        let mut base: CondKey = 0;
        let mut free_bits = Vec::new();
        for (to_pos, cond) in to_space.conds.iter().enumerate() {
            match from_conds.binary_search(cond) {
                Ok(from_pos) => {
                    if key & (1 << from_pos) != 0 {
                        base |= 1 << to_pos;
                    }
                }
                Err(_) => free_bits.push(to_pos),
            }
        }

        (0..(1u64 << free_bits.len()))
            .map(|assignment| {
                free_bits
                    .iter()
                    .enumerate()
                    .filter(|(bit, _)| assignment & (1 << bit) != 0)
                    .fold(base, |key, (_, to_pos)| key | (1 << to_pos))
            })
            .collect()
    }
}
