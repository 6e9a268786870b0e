//! Actions, the ordered tables that attach them to transitions and states,
//! and the priority tables used to resolve competing transitions.

use std::cmp::Ordering;

/// An index into the action registry of a compile context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u32);

impl ActionId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ActionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// An opaque unit of target code. The engine only ever compares actions by
/// id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    id: ActionId,
    name: String,
    condition: bool,
}

impl Action {
    pub(crate) fn new(id: ActionId, name: String, condition: bool) -> Self {
        Self {
            id,
            name,
            condition,
        }
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the action is a boolean test used to build condition
    /// spaces rather than code run on a transition.
    pub fn is_condition(&self) -> bool {
        self.condition
    }
}

/// An ordered multiset of `(ordering, action)` pairs.
///
/// The same action may appear more than once under different orderings,
/// representing distinct embeddings of it. Inserting an exact pair that is
/// already present is a no-op, which keeps the union of a table with itself
/// stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionTable {
    entries: Vec<(i32, ActionId)>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the `(ordering, action)` pairs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &(i32, ActionId)> + '_ {
        self.entries.iter()
    }

    /// Iterates only the actions, in execution order.
    pub fn actions(&self) -> impl Iterator<Item = ActionId> + '_ {
        self.entries.iter().map(|(_, action)| *action)
    }

    pub fn has_action(&self, action: ActionId) -> bool {
        self.entries.iter().any(|(_, a)| *a == action)
    }

    pub fn set_action(&mut self, ordering: i32, action: ActionId) {
        let entry = (ordering, action);
        if let Err(pos) = self.entries.binary_search(&entry) {
            self.entries.insert(pos, entry);
        }
    }

    /// Unions `other` into this table.
    pub fn set_actions(&mut self, other: &ActionTable) {
        for &(ordering, action) in other.entries.iter() {
            self.set_action(ordering, action);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl FromIterator<(i32, ActionId)> for ActionTable {
    fn from_iter<T: IntoIterator<Item = (i32, ActionId)>>(iter: T) -> Self {
        let mut table = ActionTable::new();
        for (ordering, action) in iter {
            table.set_action(ordering, action);
        }
        table
    }
}

/// An index into the priority descriptor registry of a compile context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriorDescId(u32);

impl PriorDescId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for PriorDescId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A priority assignment. Only descriptors sharing a `key` are ever compared
/// against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriorDesc {
    pub key: u32,
    pub priority: i32,
    /// Set when the assignment must not silently lose to an unprioritized
    /// transition.
    pub guard: Option<u32>,
}

/// A single priority table entry. The descriptor's fields are carried inline
/// so tables can be compared without access to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriorEl {
    pub ordering: i32,
    pub desc: PriorDescId,
    pub priority: i32,
    pub guard: Option<u32>,
}

/// The outcome of comparing two priority tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorCompare {
    pub ordering: Ordering,
    /// The first guard found on one side with nothing to compare against on
    /// the other.
    pub interaction: Option<u32>,
}

/// Maps a priority key to the most recently embedded descriptor for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriorityTable {
    entries: Vec<(u32, PriorEl)>,
}

impl PriorityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u32, PriorEl)> + '_ {
        self.entries.iter()
    }

    pub fn get(&self, key: u32) -> Option<&PriorEl> {
        self.entries
            .binary_search_by_key(&key, |(k, _)| *k)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    /// Sets the priority for the descriptor's key. An existing entry is only
    /// replaced by one embedded at the same or a later ordering.
    pub fn set_prior(&mut self, ordering: i32, id: PriorDescId, desc: &PriorDesc) {
        let el = PriorEl {
            ordering,
            desc: id,
            priority: desc.priority,
            guard: desc.guard,
        };
        self.set_el(desc.key, el);
    }

    pub fn set_priors(&mut self, other: &PriorityTable) {
        for &(key, el) in other.entries.iter() {
            self.set_el(key, el);
        }
    }

    fn set_el(&mut self, key: u32, el: PriorEl) {
        match self.entries.binary_search_by_key(&key, |(k, _)| *k) {
            Ok(idx) => {
                if self.entries[idx].1.ordering <= el.ordering {
                    self.entries[idx].1 = el;
                }
            }
            Err(idx) => self.entries.insert(idx, (key, el)),
        }
    }

    /// Compares two tables key by key. The first shared key with differing
    /// priorities decides; keys present on only one side carry no
    /// preference, but a guarded one is reported as an interaction when
    /// `check_guards` is set.
    pub fn compare(&self, other: &PriorityTable, check_guards: bool) -> PriorCompare {
        let mut interaction = None;
        let note = |interaction: &mut Option<u32>, el: &PriorEl| {
            if check_guards && interaction.is_none() {
                *interaction = el.guard;
            }
        };

        let (mut i, mut j) = (0, 0);
        while i < self.entries.len() && j < other.entries.len() {
            let (k1, el1) = &self.entries[i];
            let (k2, el2) = &other.entries[j];
            match k1.cmp(k2) {
                Ordering::Less => {
                    note(&mut interaction, el1);
                    i += 1;
                }
                Ordering::Greater => {
                    note(&mut interaction, el2);
                    j += 1;
                }
                Ordering::Equal => {
                    match el1.priority.cmp(&el2.priority) {
                        Ordering::Equal => {}
                        ordering => {
                            return PriorCompare {
                                ordering,
                                interaction,
                            }
                        }
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        for (_, el) in self.entries[i..].iter().chain(other.entries[j..].iter()) {
            note(&mut interaction, el);
        }

        PriorCompare {
            ordering: Ordering::Equal,
            interaction,
        }
    }
}
