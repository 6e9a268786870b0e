//! Provides an implementation of a SparseSet as an alternative to HashSets.
//!
//! Used by the executor to remember which `(state, position)` points a
//! thread has already passed through.

pub struct SparseSet {
    dense: Vec<usize>,
    sparse: Vec<usize>,
}

impl SparseSet {
    /// Initializes a new set of taking a value representing the maximum size
    /// of the set.
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            dense: Vec::new(),
            sparse: vec![0; max_len],
        }
    }

    /// Inserts a value into the set, returning `false` if it was already
    /// present.
    pub fn insert(&mut self, val: usize) -> bool {
        if self.contains(&val) {
            return false;
        }

        if self.sparse.len() <= val {
            // double the size.
            self.sparse.resize(val * 2 + 1, 0);
        }

        self.sparse[val] = self.dense.len();
        self.dense.push(val);
        true
    }

    /// Returns `true` if the set contains a value.
    pub fn contains(&self, val: &usize) -> bool {
        self.sparse
            .get(*val)
            .map(|&dense_idx| self.dense.get(dense_idx) == Some(val))
            // if none, the bounds of the set are exceeded and thus doesn't
            // contain the value.
            .unwrap_or(false)
    }
}

impl core::fmt::Debug for SparseSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SparseSet({:?})", &self.dense)
    }
}
