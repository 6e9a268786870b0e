//! State minimization.
//!
//! All four algorithms compute classes of equivalent states and then fuse
//! each class into one representative. Two states can only be equivalent
//! when their state-level data match: final status, state action tables,
//! pending out data and epsilon transitions. Beyond that, the partition
//! algorithms compare transition signatures over the current classes, the
//! stable algorithm marks distinguishable pairs, and the approximate
//! algorithm only fuses states whose transitions lead to identical states.

use std::collections::VecDeque;

use indexmap::IndexMap;
use log::{debug, trace};

use crate::action::{ActionTable, PriorityTable};
use crate::condspace::{CondKey, CondSpaceId};
use crate::ctx::{FsmCtx, MinimizeOpt};
use crate::graph::{FsmAp, InEdge, StateId};
use crate::keyops::Key;
use crate::rangepair::{RangePairItem, RangePairIter};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LocalSig {
    final_state: bool,
    to_state_actions: ActionTable,
    from_state_actions: ActionTable,
    eof_actions: ActionTable,
    error_actions: ActionTable,
    out_actions: ActionTable,
    out_priors: PriorityTable,
    epsilon_trans: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EdgeSig {
    low: Key,
    high: Key,
    cond_space: Option<CondSpaceId>,
    conds: Vec<(CondKey, Option<usize>, ActionTable, PriorityTable)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NfaSig {
    order: i32,
    target: usize,
    push_actions: ActionTable,
}

type Signature = (usize, Vec<EdgeSig>, Vec<NfaSig>);

/// Groups items by key, numbering groups in order of first appearance.
fn group_by<K, I>(items: I) -> Vec<Vec<StateId>>
where
    K: std::hash::Hash + Eq,
    I: IntoIterator<Item = (K, StateId)>,
{
    let mut groups: IndexMap<K, Vec<StateId>> = IndexMap::new();
    for (key, state) in items {
        groups.entry(key).or_default().push(state);
    }
    groups.into_values().collect()
}

impl FsmAp {
    /// Minimizes with the algorithm selected in `ctx`.
    pub fn minimize(&mut self, ctx: &FsmCtx) {
        let before = self.state_count();
        self.remove_unreachable_states();

        match ctx.minimize_opt() {
            MinimizeOpt::Approximate => self.minimize_approximate(),
            MinimizeOpt::Stable => self.minimize_stable(),
            MinimizeOpt::Partition1 => self.minimize_partition_1(),
            MinimizeOpt::Partition2 => self.minimize_partition_2(),
        }

        self.compress_transitions();
        self.compact();
        debug!(
            "{:?} minimization: {} -> {} states",
            ctx.minimize_opt(),
            before,
            self.state_count()
        );
    }

    fn sorted_states(&self) -> Vec<StateId> {
        let mut states = self.state_ids();
        states.sort();
        states
    }

    fn local_sig(&self, state: StateId) -> LocalSig {
        let st = self.state(state);
        let mut epsilon_trans = st.epsilon_trans.clone();
        epsilon_trans.sort_unstable();
        LocalSig {
            final_state: st.is_final(),
            to_state_actions: st.to_state_actions.clone(),
            from_state_actions: st.from_state_actions.clone(),
            eof_actions: st.eof_actions.clone(),
            error_actions: st.error_actions.clone(),
            out_actions: st.out_actions.clone(),
            out_priors: st.out_priors.clone(),
            epsilon_trans,
        }
    }

    /// Describes the out transitions of a state with targets replaced by
    /// their class. Adjacent ranges that become identical are coalesced so
    /// that split points do not distinguish states.
    fn edge_sig(&self, state: StateId, class_of: impl Fn(StateId) -> usize) -> (Vec<EdgeSig>, Vec<NfaSig>) {
        let mut edges: Vec<EdgeSig> = Vec::new();
        for trans in self.out_trans(state) {
            let sig = EdgeSig {
                low: trans.low_key,
                high: trans.high_key,
                cond_space: trans.cond_space,
                conds: trans
                    .conds
                    .iter()
                    .map(|cond| {
                        (
                            cond.key,
                            cond.target.map(&class_of),
                            cond.actions.clone(),
                            cond.priors.clone(),
                        )
                    })
                    .collect(),
            };

            if let Some(prev) = edges.last_mut() {
                if prev.high + 1 == sig.low
                    && prev.cond_space == sig.cond_space
                    && prev.conds == sig.conds
                {
                    prev.high = sig.high;
                    continue;
                }
            }
            edges.push(sig);
        }

        let nfa = self
            .state(state)
            .nfa_out()
            .iter()
            .map(|id| {
                let nfa = self.nfa_trans(*id);
                NfaSig {
                    order: nfa.order,
                    target: class_of(nfa.target),
                    push_actions: nfa.push_actions.clone(),
                }
            })
            .collect();

        (edges, nfa)
    }

    fn initial_partition(&self, states: &[StateId]) -> Vec<Vec<StateId>> {
        group_by(states.iter().map(|s| (self.local_sig(*s), *s)))
    }

    fn class_index(&self, partitions: &[Vec<StateId>]) -> Vec<usize> {
        let slots = partitions
            .iter()
            .flatten()
            .map(|s| s.as_usize() + 1)
            .max()
            .unwrap_or(0);
        let mut class = vec![usize::MAX; slots];
        for (id, members) in partitions.iter().enumerate() {
            for state in members {
                class[state.as_usize()] = id;
            }
        }
        class
    }

    fn signature(&self, state: StateId, class: &[usize]) -> Signature {
        let (edges, nfa) = self.edge_sig(state, |s| class[s.as_usize()]);
        (class[state.as_usize()], edges, nfa)
    }

    /// Refines the whole partition each round until a round splits nothing.
    pub fn minimize_partition_1(&mut self) {
        let states = self.sorted_states();
        let mut partitions = self.initial_partition(&states);

        loop {
            let class = self.class_index(&partitions);
            let refined = group_by(states.iter().map(|s| (self.signature(*s, &class), *s)));
            let split = refined.len() != partitions.len();
            partitions = refined;
            if !split {
                break;
            }
            trace!("refined to {} partitions", partitions.len());
        }

        self.fuse_partitions(partitions);
    }

    /// Refines only the partitions holding predecessors of states whose
    /// class changed.
    pub fn minimize_partition_2(&mut self) {
        let states = self.sorted_states();
        let mut partitions = self.initial_partition(&states);
        let mut class = self.class_index(&partitions);
        let mut queued = vec![true; partitions.len()];
        let mut worklist: VecDeque<usize> = (0..partitions.len()).collect();

        while let Some(current) = worklist.pop_front() {
            queued[current] = false;
            if partitions[current].len() < 2 {
                continue;
            }

            let members = partitions[current].clone();
            let pieces = group_by(members.iter().map(|s| (self.signature(*s, &class), *s)));
            if pieces.len() == 1 {
                continue;
            }
            trace!("partition {} splits into {}", current, pieces.len());

            for (idx, piece) in pieces.into_iter().enumerate() {
                let id = if idx == 0 {
                    current
                } else {
                    partitions.push(Vec::new());
                    queued.push(false);
                    partitions.len() - 1
                };
                for state in piece.iter() {
                    class[state.as_usize()] = id;
                }
                partitions[id] = piece;
            }

            for state in members {
                for edge in self.state(state).in_list() {
                    let pred = class[self.edge_source(*edge).as_usize()];
                    if !queued[pred] {
                        queued[pred] = true;
                        worklist.push_back(pred);
                    }
                }
            }
        }

        self.fuse_partitions(partitions);
    }

    /// Marks distinguishable pairs in a state-pair table until a pass marks
    /// nothing new. Unmarked pairs are equivalent.
    pub fn minimize_stable(&mut self) {
        let states = self.sorted_states();
        let count = states.len();
        let mut index = vec![usize::MAX; states.last().map_or(0, |s| s.as_usize() + 1)];
        for (idx, state) in states.iter().enumerate() {
            index[state.as_usize()] = idx;
        }

        let mut marks = MarkIndex::new(count);
        let local: Vec<LocalSig> = states.iter().map(|s| self.local_sig(*s)).collect();
        for i in 0..count {
            for j in (i + 1)..count {
                if local[i] != local[j] {
                    marks.mark(i, j);
                }
            }
        }

        loop {
            let mut changed = false;
            for i in 0..count {
                for j in (i + 1)..count {
                    if !marks.is_marked(i, j)
                        && self.distinguishable(states[i], states[j], &index, &marks)
                    {
                        marks.mark(i, j);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        let mut class = vec![usize::MAX; count];
        let mut partitions: Vec<Vec<StateId>> = Vec::new();
        for i in 0..count {
            if class[i] != usize::MAX {
                continue;
            }
            class[i] = partitions.len();
            let mut members = vec![states[i]];
            for j in (i + 1)..count {
                if class[j] == usize::MAX && !marks.is_marked(i, j) {
                    class[j] = partitions.len();
                    members.push(states[j]);
                }
            }
            partitions.push(members);
        }

        self.fuse_partitions(partitions);
    }

    fn distinguishable(&self, p: StateId, q: StateId, index: &[usize], marks: &MarkIndex) -> bool {
        let targets_differ = |a: Option<StateId>, b: Option<StateId>| match (a, b) {
            (Some(a), Some(b)) => marks.is_marked(index[a.as_usize()], index[b.as_usize()]),
            (None, None) => false,
            _ => true,
        };

        let (p_ranges, q_ranges) = (self.out_ranges(p), self.out_ranges(q));
        let (p_out, q_out) = (self.state(p).out_list(), self.state(q).out_list());
        for item in RangePairIter::new(&p_ranges, &q_ranges) {
            match item {
                RangePairItem::InS1 { .. } | RangePairItem::InS2 { .. } => return true,
                RangePairItem::Overlap { s1, s2, .. } => {
                    let (a, b) = (self.trans(p_out[s1]), self.trans(q_out[s2]));
                    if a.cond_space != b.cond_space || a.conds.len() != b.conds.len() {
                        return true;
                    }
                    for (c1, c2) in a.conds.iter().zip(b.conds.iter()) {
                        if c1.key != c2.key
                            || c1.actions != c2.actions
                            || c1.priors != c2.priors
                            || targets_differ(c1.target, c2.target)
                        {
                            return true;
                        }
                    }
                }
                RangePairItem::BreakS1 { .. } | RangePairItem::BreakS2 { .. } => {}
            }
        }

        let (p_nfa, q_nfa) = (self.state(p).nfa_out(), self.state(q).nfa_out());
        if p_nfa.len() != q_nfa.len() {
            return true;
        }
        p_nfa.iter().zip(q_nfa.iter()).any(|(a, b)| {
            let (a, b) = (self.nfa_trans(*a), self.nfa_trans(*b));
            a.order != b.order
                || a.push_actions != b.push_actions
                || targets_differ(Some(a.target), Some(b.target))
        })
    }

    /// Repeatedly fuses states whose data and transitions are identical,
    /// targets included, until a pass fuses nothing. Misses equivalences
    /// that only hold through cycles.
    pub fn minimize_approximate(&mut self) {
        loop {
            let states = self.sorted_states();
            let groups = group_by(states.iter().map(|s| {
                let (edges, nfa) = self.edge_sig(*s, |t| t.as_usize());
                ((self.local_sig(*s), edges, nfa), *s)
            }));
            if groups.len() == states.len() {
                break;
            }
            self.fuse_partitions(groups);
        }
    }

    fn fuse_partitions(&mut self, partitions: Vec<Vec<StateId>>) {
        let start = self.start_state();
        for members in partitions.into_iter().filter(|m| m.len() > 1) {
            let keep = match start {
                Some(start) if members.contains(&start) => start,
                _ => members[0],
            };
            for state in members {
                if state != keep {
                    self.fuse_states(keep, state);
                }
            }
        }
    }

    /// Folds `drop` into the equivalent state `keep`: in edges, entry ids
    /// and start status move over, state action tables union, and `drop` is
    /// deleted.
    fn fuse_states(&mut self, keep: StateId, drop: StateId) {
        let edges: Vec<InEdge> = self.state(drop).in_list().copied().collect();
        for edge in edges {
            match edge {
                InEdge::Cond(trans, key) => self.retarget_cond(trans, key, Some(keep)),
                InEdge::Nfa(nfa) => self.retarget_nfa(nfa, keep),
            }
        }

        let entry_ids: Vec<u32> = self.state(drop).entry_ids().collect();
        for id in entry_ids {
            self.unset_entry(id, drop);
            self.set_entry(id, keep);
        }
        if self.start_state() == Some(drop) {
            self.unset_start_state();
            self.set_start_state(keep);
        }

        let dropped = self.state(drop).clone();
        let kept = self.state_mut(keep);
        kept.to_state_actions.set_actions(&dropped.to_state_actions);
        kept.from_state_actions.set_actions(&dropped.from_state_actions);
        kept.eof_actions.set_actions(&dropped.eof_actions);
        kept.error_actions.set_actions(&dropped.error_actions);

        self.delete_state(drop);
    }
}

/// A triangular table of marked state pairs.
struct MarkIndex {
    count: usize,
    marks: Vec<bool>,
}

impl MarkIndex {
    fn new(count: usize) -> Self {
        Self {
            count,
            marks: vec![false; count * count],
        }
    }

    fn slot(&self, a: usize, b: usize) -> usize {
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        low * self.count + high
    }

    fn mark(&mut self, a: usize, b: usize) {
        let slot = self.slot(a, b);
        self.marks[slot] = true;
    }

    fn is_marked(&self, a: usize, b: usize) -> bool {
        a != b && self.marks[self.slot(a, b)]
    }
}
