//! The mutable FSM graph and its structural primitives.
//!
//! States, transitions and NFA transitions live in arenas addressed by
//! index handles. Every edge into a state is recorded in that state's in
//! list by the same attach/detach calls that edit out lists, so the two
//! never drift apart.

use std::collections::BTreeSet;

use indexmap::IndexSet;
use log::trace;

use crate::action::{ActionTable, PriorityTable};
use crate::condspace::{CondKey, CondSpaceId};
use crate::keyops::Key;

/// Marks a final state as coming from the first operand of an
/// intersection or subtraction.
pub(crate) const GRAPH1: u8 = 0b01;
/// Marks a final state as coming from the second operand.
pub(crate) const GRAPH2: u8 = 0b10;

/// An index into the state arena of an [`FsmAp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u32);

impl StateId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An index into the transition arena of an [`FsmAp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransId(u32);

impl TransId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// An index into the NFA transition arena of an [`FsmAp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NfaId(u32);

impl NfaId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// A reference to one edge entering a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InEdge {
    /// The entry for a condition key of a range transition.
    Cond(TransId, CondKey),
    Nfa(NfaId),
}

/// One condition-keyed entry of a transition. Plain transitions have a
/// single entry at key 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CondAp {
    pub key: CondKey,
    /// `None` leads to the error state.
    pub target: Option<StateId>,
    pub actions: ActionTable,
    pub priors: PriorityTable,
}

impl CondAp {
    pub fn new(key: CondKey, target: Option<StateId>) -> Self {
        Self {
            key,
            target,
            actions: ActionTable::new(),
            priors: PriorityTable::new(),
        }
    }
}

/// A transition over the inclusive key range `low_key..=high_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransAp {
    pub low_key: Key,
    pub high_key: Key,
    pub from: StateId,
    /// `None` for an unconditional transition.
    pub cond_space: Option<CondSpaceId>,
    /// Entries sorted by key.
    pub conds: Vec<CondAp>,
}

impl TransAp {
    pub fn is_plain(&self) -> bool {
        self.cond_space.is_none()
    }

    pub fn cond(&self, key: CondKey) -> Option<&CondAp> {
        self.conds
            .binary_search_by_key(&key, |cond| cond.key)
            .ok()
            .map(|idx| &self.conds[idx])
    }
}

/// A non-deterministic alternative taken without consuming input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfaTrans {
    pub from: StateId,
    pub target: StateId,
    /// Alternatives are tried in ascending order.
    pub order: i32,
    pub push_actions: ActionTable,
}

#[derive(Debug, Clone, Default)]
pub struct StateAp {
    pub(crate) out_list: Vec<TransId>,
    pub(crate) in_list: IndexSet<InEdge>,
    /// In edges from other states, plus one each for start and entry status.
    pub(crate) foreign_in: u32,
    pub(crate) final_state: bool,
    pub(crate) graph_bits: u8,
    pub(crate) entry_ids: BTreeSet<u32>,
    pub(crate) epsilon_trans: Vec<u32>,
    pub(crate) nfa_out: Vec<NfaId>,
    /// Underlying states of a combined state while subset construction runs.
    pub(crate) state_set: Option<Vec<StateId>>,
    detached: bool,

    pub to_state_actions: ActionTable,
    pub from_state_actions: ActionTable,
    pub eof_actions: ActionTable,
    pub error_actions: ActionTable,
    /// Pending leaving actions of a final state.
    pub out_actions: ActionTable,
    /// Pending leaving priorities of a final state.
    pub out_priors: PriorityTable,
}

impl StateAp {
    pub fn is_final(&self) -> bool {
        self.final_state
    }

    pub fn out_list(&self) -> &[TransId] {
        &self.out_list
    }

    pub fn in_list(&self) -> impl Iterator<Item = &InEdge> + '_ {
        self.in_list.iter()
    }

    pub fn foreign_in(&self) -> u32 {
        self.foreign_in
    }

    pub fn entry_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entry_ids.iter().copied()
    }

    pub fn epsilon_trans(&self) -> &[u32] {
        &self.epsilon_trans
    }

    pub fn nfa_out(&self) -> &[NfaId] {
        &self.nfa_out
    }

    /// Returns true if the state carries data only final states may hold.
    pub fn has_out_data(&self) -> bool {
        !self.out_actions.is_empty() || !self.out_priors.is_empty()
    }
}

/// Maps arena indices of one graph onto another.
struct Relocation {
    states: Vec<StateId>,
    trans: Vec<TransId>,
    nfa: Vec<NfaId>,
}

impl Relocation {
    /// Shifts every index by the given offsets.
    fn offset(fsm: &FsmAp, states: usize, trans: usize, nfa: usize) -> Self {
        Self {
            states: (0..fsm.states.len())
                .map(|idx| StateId((idx + states) as u32))
                .collect(),
            trans: (0..fsm.trans.len())
                .map(|idx| TransId((idx + trans) as u32))
                .collect(),
            nfa: (0..fsm.nfa.len())
                .map(|idx| NfaId((idx + nfa) as u32))
                .collect(),
        }
    }

    /// Packs live entries into a gap-free prefix, preserving their order.
    fn dense(fsm: &FsmAp) -> Self {
        fn pack<T, I>(arena: &[Option<T>], wrap: impl Fn(u32) -> I) -> Vec<I> {
            let mut next = 0;
            arena
                .iter()
                .map(|slot| match slot {
                    Some(_) => {
                        next += 1;
                        wrap(next - 1)
                    }
                    None => wrap(u32::MAX),
                })
                .collect()
        }

        Self {
            states: pack(&fsm.states, StateId),
            trans: pack(&fsm.trans, TransId),
            nfa: pack(&fsm.nfa, NfaId),
        }
    }

    fn state(&self, id: StateId) -> StateId {
        self.states[id.as_usize()]
    }

    fn trans(&self, id: TransId) -> TransId {
        self.trans[id.as_usize()]
    }

    fn nfa(&self, id: NfaId) -> NfaId {
        self.nfa[id.as_usize()]
    }

    fn edge(&self, edge: InEdge) -> InEdge {
        match edge {
            InEdge::Cond(trans, key) => InEdge::Cond(self.trans(trans), key),
            InEdge::Nfa(nfa) => InEdge::Nfa(self.nfa(nfa)),
        }
    }

    fn relocate_state(&self, mut state: StateAp) -> StateAp {
        state.out_list = state.out_list.iter().map(|t| self.trans(*t)).collect();
        state.in_list = state.in_list.iter().map(|e| self.edge(*e)).collect();
        state.nfa_out = state.nfa_out.iter().map(|n| self.nfa(*n)).collect();
        state.state_set = state
            .state_set
            .map(|set| set.iter().map(|s| self.state(*s)).collect());
        state
    }

    fn relocate_trans(&self, mut trans: TransAp) -> TransAp {
        trans.from = self.state(trans.from);
        for cond in trans.conds.iter_mut() {
            cond.target = cond.target.map(|t| self.state(t));
        }
        trans
    }

    fn relocate_nfa(&self, mut nfa: NfaTrans) -> NfaTrans {
        nfa.from = self.state(nfa.from);
        nfa.target = self.state(nfa.target);
        nfa
    }
}

/// A finite-state machine under construction.
#[derive(Debug, Clone, Default)]
pub struct FsmAp {
    states: Vec<Option<StateAp>>,
    trans: Vec<Option<TransAp>>,
    nfa: Vec<Option<NfaTrans>>,

    state_list: IndexSet<StateId>,
    /// States with no foreign in edges, kept apart while misfit accounting
    /// is on so they can be dropped without a reachability pass.
    misfit_list: IndexSet<StateId>,
    misfit_accounting: bool,

    start: Option<StateId>,
    final_states: BTreeSet<StateId>,
    entry_points: BTreeSet<(u32, StateId)>,
    /// Allocated by reduction preparation when error transitions exist.
    error_state: Option<StateId>,
}

impl FsmAp {
    /// Instantiates a graph with no states.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: StateId) -> &StateAp {
        match self.states.get(id.as_usize()) {
            Some(Some(state)) => state,
            _ => panic!("state {} is not part of the graph", id),
        }
    }

    pub(crate) fn state_mut(&mut self, id: StateId) -> &mut StateAp {
        match self.states.get_mut(id.as_usize()) {
            Some(Some(state)) => state,
            _ => panic!("state {} is not part of the graph", id),
        }
    }

    pub fn trans(&self, id: TransId) -> &TransAp {
        match self.trans.get(id.as_usize()) {
            Some(Some(trans)) => trans,
            _ => panic!("transition {} is not part of the graph", id.0),
        }
    }

    pub(crate) fn trans_mut(&mut self, id: TransId) -> &mut TransAp {
        match self.trans.get_mut(id.as_usize()) {
            Some(Some(trans)) => trans,
            _ => panic!("transition {} is not part of the graph", id.0),
        }
    }

    pub fn nfa_trans(&self, id: NfaId) -> &NfaTrans {
        match self.nfa.get(id.as_usize()) {
            Some(Some(nfa)) => nfa,
            _ => panic!("nfa transition {} is not part of the graph", id.0),
        }
    }

    pub fn start_state(&self) -> Option<StateId> {
        self.start
    }

    /// Returns every live state, main list first.
    pub fn state_ids(&self) -> Vec<StateId> {
        self.state_list
            .iter()
            .chain(self.misfit_list.iter())
            .copied()
            .collect()
    }

    pub fn state_count(&self) -> usize {
        self.state_list.len() + self.misfit_list.len()
    }

    pub fn misfit_count(&self) -> usize {
        self.misfit_list.len()
    }

    pub fn is_final(&self, state: StateId) -> bool {
        self.state(state).final_state
    }

    pub fn final_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.final_states.iter().copied()
    }

    pub fn error_state(&self) -> Option<StateId> {
        self.error_state
    }

    pub(crate) fn set_error_state(&mut self, state: StateId) {
        self.error_state = Some(state);
    }

    pub fn entry_points(&self) -> impl Iterator<Item = (u32, StateId)> + '_ {
        self.entry_points.iter().copied()
    }

    /// Returns all states registered under an entry id.
    pub fn entry_states(&self, id: u32) -> Vec<StateId> {
        self.entry_points
            .range((id, StateId(0))..=(id, StateId(u32::MAX)))
            .map(|(_, state)| *state)
            .collect()
    }

    pub fn out_trans(&self, state: StateId) -> impl Iterator<Item = &TransAp> + '_ {
        self.state(state).out_list.iter().map(|id| self.trans(*id))
    }

    /// Returns the out ranges of a state in key order.
    pub fn out_ranges(&self, state: StateId) -> Vec<(Key, Key)> {
        self.out_trans(state)
            .map(|trans| (trans.low_key, trans.high_key))
            .collect()
    }

    /// Finds the transition of `state` covering `key`.
    pub fn find_trans(&self, state: StateId, key: Key) -> Option<TransId> {
        let out_list = &self.state(state).out_list;
        let idx = out_list.partition_point(|id| self.trans(*id).high_key < key);
        out_list
            .get(idx)
            .copied()
            .filter(|id| self.trans(*id).low_key <= key)
    }

    /// Returns the source state of an in edge.
    pub fn edge_source(&self, edge: InEdge) -> StateId {
        match edge {
            InEdge::Cond(trans, _) => self.trans(trans).from,
            InEdge::Nfa(nfa) => self.nfa_trans(nfa).from,
        }
    }

    /// Returns the direct successors of a state in out-list order, NFA
    /// alternatives last.
    pub fn successors(&self, state: StateId) -> Vec<StateId> {
        let st = self.state(state);
        st.out_list
            .iter()
            .flat_map(|id| self.trans(*id).conds.iter().filter_map(|cond| cond.target))
            .chain(st.nfa_out.iter().map(|id| self.nfa_trans(*id).target))
            .collect()
    }

    /// Traverses every state reachable from the given roots in depth-first
    /// preorder.
    pub fn depth_first_traversal(&self, roots: Vec<StateId>) -> DepthFirstTraversal<'_> {
        DepthFirstTraversal::new(roots, self)
    }

    /// The start state followed by every entry point.
    pub fn roots(&self) -> Vec<StateId> {
        self.start
            .into_iter()
            .chain(self.entry_points.iter().map(|(_, state)| *state))
            .collect()
    }

    pub fn add_state(&mut self) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(Some(StateAp::default()));
        if self.misfit_accounting {
            self.misfit_list.insert(id);
        } else {
            self.state_list.insert(id);
        }
        id
    }

    fn inc_foreign(&mut self, state: StateId) {
        let st = self.state_mut(state);
        st.foreign_in += 1;
        if st.foreign_in == 1 && self.misfit_accounting && self.misfit_list.swap_remove(&state) {
            self.state_list.insert(state);
        }
    }

    fn dec_foreign(&mut self, state: StateId) {
        let st = self.state_mut(state);
        assert!(st.foreign_in > 0, "foreign in count underflow on {}", state);
        st.foreign_in -= 1;
        if st.foreign_in == 0 && self.misfit_accounting && self.state_list.swap_remove(&state) {
            self.misfit_list.insert(state);
        }
    }

    /// Records `edge` in the in list of `to`.
    pub(crate) fn attach_to_state(&mut self, edge: InEdge, from: StateId, to: StateId) {
        let inserted = self.state_mut(to).in_list.insert(edge);
        assert!(inserted, "edge {:?} attached twice", edge);
        if from != to {
            self.inc_foreign(to);
        }
    }

    /// Removes `edge` from the in list of `to`.
    pub(crate) fn detach_from_state(&mut self, edge: InEdge, from: StateId, to: StateId) {
        let removed = self.state_mut(to).in_list.swap_remove(&edge);
        assert!(removed, "edge {:?} was not attached", edge);
        if from != to {
            self.dec_foreign(to);
        }
    }

    /// Places a transition in its source's out list, keeping the list sorted.
    /// Overlapping an existing range is a contract violation.
    fn insert_out(&mut self, id: TransId) {
        let (from, low, high) = {
            let trans = self.trans(id);
            (trans.from, trans.low_key, trans.high_key)
        };
        let out_list = &self.state(from).out_list;
        let pos = out_list.partition_point(|other| self.trans(*other).low_key < low);
        if pos > 0 {
            let prev = self.trans(out_list[pos - 1]);
            assert!(prev.high_key < low, "range {}..={} overlaps on {}", low, high, from);
        }
        if let Some(next) = out_list.get(pos) {
            assert!(high < self.trans(*next).low_key, "range {}..={} overlaps on {}", low, high, from);
        }
        self.state_mut(from).out_list.insert(pos, id);
    }

    /// Attaches a plain transition over `low..=high`. A `to` of `None` is a
    /// transition to the error state.
    pub fn attach_new_trans(
        &mut self,
        from: StateId,
        to: Option<StateId>,
        low: Key,
        high: Key,
    ) -> TransId {
        self.attach_new_cond_trans(from, low, high, None, vec![CondAp::new(0, to)])
    }

    /// Attaches a transition carrying explicit condition entries.
    pub fn attach_new_cond_trans(
        &mut self,
        from: StateId,
        low: Key,
        high: Key,
        cond_space: Option<CondSpaceId>,
        mut conds: Vec<CondAp>,
    ) -> TransId {
        assert!(low <= high, "inverted range {}..={}", low, high);
        conds.sort_by_key(|cond| cond.key);

        let id = TransId(self.trans.len() as u32);
        let targets: Vec<(CondKey, StateId)> = conds
            .iter()
            .filter_map(|cond| cond.target.map(|t| (cond.key, t)))
            .collect();
        self.trans.push(Some(TransAp {
            low_key: low,
            high_key: high,
            from,
            cond_space,
            conds,
        }));
        self.insert_out(id);
        for (key, target) in targets {
            self.attach_to_state(InEdge::Cond(id, key), from, target);
        }
        id
    }

    /// Detaches and deletes a whole transition.
    pub fn detach_trans(&mut self, from: StateId, id: TransId) {
        let trans = self.trans(id);
        assert_eq!(from, trans.from, "transition detached from the wrong state");
        let targets: Vec<(CondKey, StateId)> = trans
            .conds
            .iter()
            .filter_map(|cond| cond.target.map(|t| (cond.key, t)))
            .collect();
        for (key, target) in targets {
            self.detach_from_state(InEdge::Cond(id, key), from, target);
        }
        self.state_mut(from).out_list.retain(|other| *other != id);
        self.trans[id.as_usize()] = None;
    }

    /// Detaches and deletes one condition entry, deleting the transition
    /// once it has none left.
    pub(crate) fn detach_cond(&mut self, id: TransId, key: CondKey) {
        let trans = self.trans_mut(id);
        let from = trans.from;
        let Ok(pos) = trans.conds.binary_search_by_key(&key, |cond| cond.key) else {
            panic!("condition {} missing from transition {}", key, id.0);
        };
        let cond = trans.conds.remove(pos);
        let now_empty = trans.conds.is_empty();

        if let Some(target) = cond.target {
            self.detach_from_state(InEdge::Cond(id, key), from, target);
        }
        if now_empty {
            self.state_mut(from).out_list.retain(|other| *other != id);
            self.trans[id.as_usize()] = None;
        }
    }

    /// Points a condition entry at a new target, maintaining in lists.
    pub(crate) fn retarget_cond(&mut self, id: TransId, key: CondKey, to: Option<StateId>) {
        let trans = self.trans_mut(id);
        let from = trans.from;
        let Ok(pos) = trans.conds.binary_search_by_key(&key, |cond| cond.key) else {
            panic!("condition {} missing from transition {}", key, id.0);
        };
        let old = std::mem::replace(&mut trans.conds[pos].target, to);
        if old == to {
            return;
        }
        if let Some(old) = old {
            self.detach_from_state(InEdge::Cond(id, key), from, old);
        }
        if let Some(to) = to {
            self.attach_to_state(InEdge::Cond(id, key), from, to);
        }
    }

    /// Replaces every condition entry of a transition.
    pub(crate) fn replace_conds(
        &mut self,
        id: TransId,
        cond_space: Option<CondSpaceId>,
        mut conds: Vec<CondAp>,
    ) {
        conds.sort_by_key(|cond| cond.key);
        let trans = self.trans_mut(id);
        let from = trans.from;
        trans.cond_space = cond_space;
        let old = std::mem::replace(&mut trans.conds, conds);

        for cond in old {
            if let Some(target) = cond.target {
                self.detach_from_state(InEdge::Cond(id, cond.key), from, target);
            }
        }
        let targets: Vec<(CondKey, StateId)> = self
            .trans(id)
            .conds
            .iter()
            .filter_map(|cond| cond.target.map(|t| (cond.key, t)))
            .collect();
        for (key, target) in targets {
            self.attach_to_state(InEdge::Cond(id, key), from, target);
        }
    }

    /// Splits a transition so that `at` begins a new transition carrying a
    /// copy of its data. Returns the upper piece.
    pub(crate) fn split_trans(&mut self, id: TransId, at: Key) -> TransId {
        let trans = self.trans(id);
        assert!(
            trans.low_key < at && at <= trans.high_key,
            "split point {} outside {}..={}",
            at,
            trans.low_key,
            trans.high_key
        );
        let (from, high, cond_space, conds) = (
            trans.from,
            trans.high_key,
            trans.cond_space,
            trans.conds.clone(),
        );
        self.trans_mut(id).high_key = at - 1;
        self.attach_new_cond_trans(from, at, high, cond_space, conds)
    }

    pub fn attach_new_nfa(
        &mut self,
        from: StateId,
        to: StateId,
        order: i32,
        push_actions: ActionTable,
    ) -> NfaId {
        let id = NfaId(self.nfa.len() as u32);
        self.nfa.push(Some(NfaTrans {
            from,
            target: to,
            order,
            push_actions,
        }));
        self.state_mut(from).nfa_out.push(id);
        self.sort_nfa_out(from);
        self.attach_to_state(InEdge::Nfa(id), from, to);
        id
    }

    fn sort_nfa_out(&mut self, state: StateId) {
        let mut nfa_out = std::mem::take(&mut self.state_mut(state).nfa_out);
        nfa_out.sort_by_key(|id| (self.nfa_trans(*id).order, *id));
        self.state_mut(state).nfa_out = nfa_out;
    }

    /// Points an NFA transition at a new target, maintaining in lists.
    pub(crate) fn retarget_nfa(&mut self, id: NfaId, to: StateId) {
        let (from, old) = {
            let nfa = self.nfa_trans(id);
            (nfa.from, nfa.target)
        };
        if old == to {
            return;
        }
        self.detach_from_state(InEdge::Nfa(id), from, old);
        if let Some(Some(nfa)) = self.nfa.get_mut(id.as_usize()) {
            nfa.target = to;
        }
        self.attach_to_state(InEdge::Nfa(id), from, to);
    }

    pub fn detach_nfa(&mut self, id: NfaId) {
        let (from, target) = {
            let nfa = self.nfa_trans(id);
            (nfa.from, nfa.target)
        };
        self.detach_from_state(InEdge::Nfa(id), from, target);
        self.state_mut(from).nfa_out.retain(|other| *other != id);
        self.nfa[id.as_usize()] = None;
    }

    /// Removes every structural relationship of a state: in and out
    /// transitions, entry ids, start and final status. Detaching the same
    /// state twice is a contract violation.
    pub fn detach_state(&mut self, state: StateId) {
        assert!(!self.state(state).detached, "state {} detached twice", state);

        let in_edges: Vec<InEdge> = self.state(state).in_list.iter().copied().collect();
        for edge in in_edges {
            match edge {
                InEdge::Cond(trans, key) => self.detach_cond(trans, key),
                InEdge::Nfa(nfa) => self.detach_nfa(nfa),
            }
        }

        let entry_ids: Vec<u32> = self.state(state).entry_ids.iter().copied().collect();
        for id in entry_ids {
            self.unset_entry(id, state);
        }
        if self.start == Some(state) {
            self.unset_start_state();
        }

        let out_list = self.state(state).out_list.clone();
        for trans in out_list {
            self.detach_trans(state, trans);
        }
        let nfa_out = self.state(state).nfa_out.clone();
        for nfa in nfa_out {
            self.detach_nfa(nfa);
        }

        if self.state(state).final_state {
            self.final_states.remove(&state);
        }
        let st = self.state_mut(state);
        st.final_state = false;
        st.detached = true;
    }

    /// Detaches a state and releases its slot.
    pub fn delete_state(&mut self, state: StateId) {
        self.detach_state(state);
        self.state_list.swap_remove(&state);
        self.misfit_list.swap_remove(&state);
        if self.error_state == Some(state) {
            self.error_state = None;
        }
        self.states[state.as_usize()] = None;
    }

    pub fn set_start_state(&mut self, state: StateId) {
        assert!(self.start.is_none(), "start state already set");
        self.start = Some(state);
        self.inc_foreign(state);
    }

    pub fn unset_start_state(&mut self) {
        if let Some(state) = self.start.take() {
            self.dec_foreign(state);
        }
    }

    pub fn set_entry(&mut self, id: u32, state: StateId) {
        if self.entry_points.insert((id, state)) {
            self.state_mut(state).entry_ids.insert(id);
            self.inc_foreign(state);
        }
    }

    pub fn unset_entry(&mut self, id: u32, state: StateId) {
        if self.entry_points.remove(&(id, state)) {
            self.state_mut(state).entry_ids.remove(&id);
            self.dec_foreign(state);
        }
    }

    pub fn set_fin_state(&mut self, state: StateId) {
        self.state_mut(state).final_state = true;
        self.final_states.insert(state);
    }

    /// Removes final status along with the data only final states carry.
    pub fn unset_fin_state(&mut self, state: StateId) {
        let st = self.state_mut(state);
        st.final_state = false;
        st.graph_bits = 0;
        st.out_actions.clear();
        st.out_priors = PriorityTable::new();
        self.final_states.remove(&state);
    }

    /// Clears final status of every state but leaves pending out data in
    /// place for a following concatenation to consume.
    pub fn unset_all_fin_states(&mut self) {
        for state in std::mem::take(&mut self.final_states) {
            self.state_mut(state).final_state = false;
        }
    }

    pub(crate) fn set_fin_bits(&mut self, bits: u8) {
        let finals: Vec<StateId> = self.final_states.iter().copied().collect();
        for state in finals {
            self.state_mut(state).graph_bits |= bits;
        }
    }

    pub fn misfit_accounting(&self) -> bool {
        self.misfit_accounting
    }

    /// Toggles misfit accounting, moving states between the two lists to
    /// match the new mode.
    pub fn set_misfit_accounting(&mut self, on: bool) {
        if on == self.misfit_accounting {
            return;
        }
        self.misfit_accounting = on;

        if on {
            let misfits: Vec<StateId> = self
                .state_list
                .iter()
                .copied()
                .filter(|s| self.state(*s).foreign_in == 0)
                .collect();
            for state in misfits {
                self.state_list.swap_remove(&state);
                self.misfit_list.insert(state);
            }
        } else {
            let misfits = std::mem::take(&mut self.misfit_list);
            self.state_list.extend(misfits);
        }
    }

    /// Deletes every state that no other state, entry point or start status
    /// refers to. Deleting one may orphan others; they go too.
    pub fn remove_misfits(&mut self) {
        let mut removed = 0;
        while let Some(state) = self.misfit_list.pop() {
            self.delete_state(state);
            removed += 1;
        }
        if removed > 0 {
            trace!("removed {} misfit states", removed);
        }
    }

    /// Deletes states not reachable from the start state or an entry point.
    pub fn remove_unreachable_states(&mut self) {
        let mut reachable = vec![false; self.states.len()];
        for state in self.depth_first_traversal(self.roots()) {
            reachable[state.as_usize()] = true;
        }

        for state in self.state_ids() {
            if !reachable[state.as_usize()] {
                self.delete_state(state);
            }
        }
    }

    /// Deletes states from which no final state can be reached. The start
    /// state and entry points are kept even when dead.
    pub fn remove_dead_end_states(&mut self) {
        let mut live = vec![false; self.states.len()];
        let mut stack: Vec<StateId> = self.final_states.iter().copied().collect();
        for state in stack.iter() {
            live[state.as_usize()] = true;
        }
        while let Some(state) = stack.pop() {
            for edge in self.state(state).in_list.iter() {
                let source = self.edge_source(*edge);
                if !live[source.as_usize()] {
                    live[source.as_usize()] = true;
                    stack.push(source);
                }
            }
        }
        for root in self.roots() {
            live[root.as_usize()] = true;
        }

        for state in self.state_ids() {
            if !live[state.as_usize()] {
                self.delete_state(state);
            }
        }
    }

    /// Coalesces adjacent transitions that carry identical data.
    pub fn compress_transitions(&mut self) {
        for state in self.state_ids() {
            let mut idx = 0;
            while idx + 1 < self.state(state).out_list.len() {
                let out_list = &self.state(state).out_list;
                let (first, second) = (out_list[idx], out_list[idx + 1]);
                let (a, b) = (self.trans(first), self.trans(second));

                if a.high_key + 1 == b.low_key && a.cond_space == b.cond_space && a.conds == b.conds {
                    let high = b.high_key;
                    self.detach_trans(state, second);
                    self.trans_mut(first).high_key = high;
                } else {
                    idx += 1;
                }
            }
        }
    }

    /// Moves all of `other`'s states into this graph. Final states and entry
    /// points come along; `other`'s start state loses its start status and
    /// is returned.
    pub(crate) fn absorb(&mut self, other: FsmAp) -> Option<StateId> {
        let relocation =
            Relocation::offset(&other, self.states.len(), self.trans.len(), self.nfa.len());
        let FsmAp {
            states,
            trans,
            nfa,
            start,
            final_states,
            entry_points,
            ..
        } = other;

        for state in states {
            let id = StateId(self.states.len() as u32);
            match state {
                Some(state) => {
                    let state = relocation.relocate_state(state);
                    if self.misfit_accounting && state.foreign_in == 0 {
                        self.misfit_list.insert(id);
                    } else {
                        self.state_list.insert(id);
                    }
                    self.states.push(Some(state));
                }
                None => self.states.push(None),
            }
        }
        self.trans.extend(
            trans
                .into_iter()
                .map(|t| t.map(|t| relocation.relocate_trans(t))),
        );
        self.nfa.extend(
            nfa.into_iter()
                .map(|n| n.map(|n| relocation.relocate_nfa(n))),
        );
        self.final_states
            .extend(final_states.into_iter().map(|s| relocation.state(s)));
        self.entry_points.extend(
            entry_points
                .into_iter()
                .map(|(id, s)| (id, relocation.state(s))),
        );

        start.map(|start| {
            let start = relocation.state(start);
            self.dec_foreign(start);
            start
        })
    }

    /// Renumbers the arenas so that no deleted slots remain.
    pub fn compact(&mut self) {
        let relocation = Relocation::dense(self);

        self.states = std::mem::take(&mut self.states)
            .into_iter()
            .flatten()
            .map(|s| Some(relocation.relocate_state(s)))
            .collect();
        self.trans = std::mem::take(&mut self.trans)
            .into_iter()
            .flatten()
            .map(|t| Some(relocation.relocate_trans(t)))
            .collect();
        self.nfa = std::mem::take(&mut self.nfa)
            .into_iter()
            .flatten()
            .map(|n| Some(relocation.relocate_nfa(n)))
            .collect();

        self.state_list = self.state_list.iter().map(|s| relocation.state(*s)).collect();
        self.misfit_list = self.misfit_list.iter().map(|s| relocation.state(*s)).collect();
        self.start = self.start.map(|s| relocation.state(s));
        self.error_state = self.error_state.map(|s| relocation.state(s));
        self.final_states = self.final_states.iter().map(|s| relocation.state(*s)).collect();
        self.entry_points = self
            .entry_points
            .iter()
            .map(|(id, s)| (*id, relocation.state(*s)))
            .collect();
    }

    /// Checks the structural invariants of the graph, panicking on the first
    /// violation.
    pub fn verify_integrity(&self) {
        for state in self.state_ids() {
            let st = self.state(state);
            let mut prev_high: Option<Key> = None;
            for id in st.out_list.iter() {
                let trans = self.trans(*id);
                assert_eq!(state, trans.from, "transition filed under the wrong state");
                assert!(trans.low_key <= trans.high_key, "inverted range on {}", state);
                if let Some(prev) = prev_high {
                    assert!(prev < trans.low_key, "unsorted or overlapping ranges on {}", state);
                }
                prev_high = Some(trans.high_key);
                assert!(!trans.conds.is_empty(), "transition without entries on {}", state);
                assert!(
                    trans.conds.windows(2).all(|w| w[0].key < w[1].key),
                    "unsorted condition keys on {}",
                    state
                );
                for cond in trans.conds.iter() {
                    if let Some(target) = cond.target {
                        assert!(
                            self.state(target).in_list.contains(&InEdge::Cond(*id, cond.key)),
                            "edge missing from the in list of {}",
                            target
                        );
                    }
                }
            }
            for id in st.nfa_out.iter() {
                let nfa = self.nfa_trans(*id);
                assert!(self.state(nfa.target).in_list.contains(&InEdge::Nfa(*id)));
            }

            let mut foreign = st.entry_ids.len() as u32;
            if self.start == Some(state) {
                foreign += 1;
            }
            for edge in st.in_list.iter() {
                if self.edge_source(*edge) != state {
                    foreign += 1;
                }
            }
            assert_eq!(foreign, st.foreign_in, "foreign in count drifted on {}", state);
            assert_eq!(st.final_state, self.final_states.contains(&state));
        }
    }
}

impl std::fmt::Display for FsmAp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(start) = self.start {
            writeln!(f, "start: {}", start)?;
        }
        for state in self.state_ids() {
            let marker = if self.is_final(state) { " (final)" } else { "" };
            writeln!(f, "{:04}:{}", state.0, marker)?;
            for trans in self.out_trans(state) {
                for cond in trans.conds.iter() {
                    let target = cond
                        .target
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "err".to_string());
                    write!(f, "  {}..={}", trans.low_key, trans.high_key)?;
                    if trans.cond_space.is_some() {
                        write!(f, " c{}", cond.key)?;
                    }
                    write!(f, " -> {}", target)?;
                    for action in cond.actions.actions() {
                        write!(f, " {}", action)?;
                    }
                    writeln!(f)?;
                }
            }
            for id in self.state(state).nfa_out.iter() {
                let nfa = self.nfa_trans(*id);
                writeln!(f, "  nfa({}) -> {}", nfa.order, nfa.target)?;
            }
        }
        Ok(())
    }
}

/// Provides depth-first preorder traversal over the states reachable from a
/// list of roots, visiting successors in out-list order.
pub struct DepthFirstTraversal<'g> {
    visited: Vec<bool>,
    graph: &'g FsmAp,
    stack: Vec<StateId>,
}

impl<'g> DepthFirstTraversal<'g> {
    pub fn new(roots: Vec<StateId>, graph: &'g FsmAp) -> Self {
        let visited = vec![false; graph.states.len()];
        let mut stack = roots;
        stack.reverse();

        Self {
            visited,
            graph,
            stack,
        }
    }
}

impl<'g> Iterator for DepthFirstTraversal<'g> {
    type Item = StateId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self.stack.pop()?;

            // skip states reached again through a later edge
            if self.visited[current.as_usize()] {
                continue;
            }
            self.visited[current.as_usize()] = true;

            let successors = self.graph.successors(current);
            for node in successors.into_iter().rev() {
                if !self.visited[node.as_usize()] {
                    self.stack.push(node);
                }
            }

            return Some(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(len: usize) -> (FsmAp, Vec<StateId>) {
        let mut fsm = FsmAp::new();
        let states: Vec<StateId> = (0..len).map(|_| fsm.add_state()).collect();
        fsm.set_start_state(states[0]);
        for (idx, pair) in states.windows(2).enumerate() {
            let key = b'a' as Key + idx as Key;
            fsm.attach_new_trans(pair[0], Some(pair[1]), key, key);
        }
        (fsm, states)
    }

    #[test]
    fn should_add_states() {
        let mut fsm = FsmAp::new();

        for i in 0..5 {
            let state = fsm.add_state();
            assert_eq!(i, state.as_usize());
        }

        assert_eq!(5, fsm.state_count())
    }

    #[test]
    fn should_keep_out_lists_sorted() {
        let mut fsm = FsmAp::new();
        let s0 = fsm.add_state();
        let s1 = fsm.add_state();

        fsm.attach_new_trans(s0, Some(s1), 20, 29);
        fsm.attach_new_trans(s0, Some(s1), 0, 9);
        fsm.attach_new_trans(s0, None, 10, 19);

        assert_eq!(vec![(0, 9), (10, 19), (20, 29)], fsm.out_ranges(s0));
        assert_eq!(2, fsm.state(s1).foreign_in());
        fsm.verify_integrity();
    }

    #[test]
    #[should_panic]
    fn should_reject_overlapping_attachments() {
        let mut fsm = FsmAp::new();
        let s0 = fsm.add_state();

        fsm.attach_new_trans(s0, None, 0, 9);
        fsm.attach_new_trans(s0, None, 5, 12);
    }

    #[test]
    fn should_not_count_self_loops_as_foreign() {
        let mut fsm = FsmAp::new();
        let s0 = fsm.add_state();

        fsm.attach_new_trans(s0, Some(s0), 0, 9);

        assert_eq!(0, fsm.state(s0).foreign_in());
        assert_eq!(1, fsm.state(s0).in_list().count());
    }

    #[test]
    fn should_move_states_between_misfit_and_main_lists() {
        let mut fsm = FsmAp::new();
        fsm.set_misfit_accounting(true);
        let s0 = fsm.add_state();
        let s1 = fsm.add_state();
        assert_eq!(2, fsm.misfit_count());

        fsm.set_start_state(s0);
        let trans = fsm.attach_new_trans(s0, Some(s1), 0, 0);
        assert_eq!(0, fsm.misfit_count());

        fsm.detach_trans(s0, trans);
        assert_eq!(1, fsm.misfit_count());

        fsm.remove_misfits();
        assert_eq!(1, fsm.state_count());
        fsm.verify_integrity();
    }

    #[test]
    fn should_detach_all_relationships_of_a_state() {
        let (mut fsm, states) = chain(3);
        fsm.set_fin_state(states[1]);
        fsm.set_entry(4, states[1]);

        fsm.delete_state(states[1]);

        assert!(fsm.out_ranges(states[0]).is_empty());
        assert!(fsm.state(states[2]).in_list().next().is_none());
        assert!(fsm.entry_states(4).is_empty());
        assert_eq!(0, fsm.final_states().count());
        fsm.verify_integrity();
    }

    #[test]
    #[should_panic]
    fn should_reject_detaching_a_state_twice() {
        let (mut fsm, states) = chain(2);

        fsm.detach_state(states[1]);
        fsm.detach_state(states[1]);
    }

    #[test]
    fn should_split_transitions_with_copied_targets() {
        let mut fsm = FsmAp::new();
        let s0 = fsm.add_state();
        let s1 = fsm.add_state();
        let trans = fsm.attach_new_trans(s0, Some(s1), 0, 9);

        fsm.split_trans(trans, 4);

        assert_eq!(vec![(0, 3), (4, 9)], fsm.out_ranges(s0));
        assert_eq!(2, fsm.state(s1).in_list().count());
        fsm.verify_integrity();
    }

    #[test]
    fn should_compress_adjacent_identical_transitions() {
        let mut fsm = FsmAp::new();
        let s0 = fsm.add_state();
        let s1 = fsm.add_state();
        fsm.attach_new_trans(s0, Some(s1), 0, 3);
        fsm.attach_new_trans(s0, Some(s1), 4, 9);
        fsm.attach_new_trans(s0, None, 10, 12);

        fsm.compress_transitions();

        assert_eq!(vec![(0, 9), (10, 12)], fsm.out_ranges(s0));
        fsm.verify_integrity();
    }

    #[test]
    fn should_traverse_in_depth_first_order() {
        let mut fsm = FsmAp::new();
        let n0 = fsm.add_state();
        let n1 = fsm.add_state();
        let n2 = fsm.add_state();
        let n3 = fsm.add_state();
        fsm.set_start_state(n0);

        fsm.attach_new_trans(n0, Some(n1), 0, 0); // n0 -> n1
        fsm.attach_new_trans(n1, Some(n2), 0, 0); // n1 -> n2
        fsm.attach_new_trans(n0, Some(n3), 1, 1); // n0 -> n3

        // add loops
        fsm.attach_new_trans(n3, Some(n2), 0, 0); // n3 -> n2
        fsm.attach_new_trans(n2, Some(n0), 0, 0); // n2 -> n0

        let iterated: Vec<_> = fsm.depth_first_traversal(fsm.roots()).collect();
        assert_eq!(vec![n0, n1, n2, n3], iterated);
    }

    #[test]
    fn should_remove_dead_ends_but_keep_the_start_state() {
        let (mut fsm, states) = chain(4);
        fsm.set_fin_state(states[1]);

        fsm.remove_dead_end_states();

        assert_eq!(2, fsm.state_count());
        assert_eq!(Some(states[0]), fsm.start_state());
        fsm.verify_integrity();
    }

    #[test]
    fn should_absorb_and_compact_graphs() {
        let (mut left, _) = chain(2);
        let (right, _) = chain(3);
        left.delete_state(StateId(1));

        let absorbed_start = left.absorb(right);
        assert_eq!(Some(StateId(2)), absorbed_start);
        assert_eq!(4, left.state_count());
        left.verify_integrity();

        left.compact();
        assert_eq!(4, left.state_count());
        assert_eq!(1, left.out_ranges(StateId(1)).len());
        left.verify_integrity();
    }
}
