//! Reduction of a finished graph into the table form consumed by code
//! generators.

use fsm_runtime::{RedCondEntry, RedFsm, RedNfaTarget, RedRange, RedSingle, RedState, RedTrans};
use log::debug;
use rustc_hash::FxHashMap;

use crate::action::{ActionTable, PriorityTable};
use crate::condspace::{CondKey, CondSpaceId};
use crate::ctx::{DefaultChoice, FsmCtx};
use crate::error::{FsmError, FsmErrorKind};
use crate::graph::{CondAp, FsmAp, StateId};
use crate::keyops::KeyOps;

/// Deduplicates action tables into one flat array.
struct ActionPool {
    array: Vec<u32>,
    tables: Vec<usize>,
    index: FxHashMap<Vec<u32>, usize>,
    refs: Vec<usize>,
}

impl ActionPool {
    fn new(action_cnt: usize) -> Self {
        Self {
            array: Vec::new(),
            tables: Vec::new(),
            index: FxHashMap::default(),
            refs: vec![0; action_cnt],
        }
    }

    /// Returns the location of `table`, storing it on first use. Empty
    /// tables have no location.
    fn loc(&mut self, table: &ActionTable) -> Option<usize> {
        if table.is_empty() {
            return None;
        }

        let ids: Vec<u32> = table.actions().map(|action| action.as_u32()).collect();
        for action in table.actions() {
            if let Some(count) = self.refs.get_mut(action.as_usize()) {
                *count += 1;
            }
        }

        if let Some(loc) = self.index.get(&ids) {
            return Some(*loc);
        }

        let loc = self.array.len();
        self.array.push(ids.len() as u32);
        self.array.extend_from_slice(&ids);
        self.tables.push(loc);
        self.index.insert(ids, loc);
        Some(loc)
    }
}

/// Returns true if `ranges` cover every key of the alphabet without gaps.
fn alphabet_covered(keyops: &KeyOps, ranges: &[RedRange]) -> bool {
    let (Some(first), Some(last)) = (ranges.first(), ranges.last()) else {
        return false;
    };

    first.low == keyops.min_key()
        && last.high == keyops.max_key()
        && ranges
            .windows(2)
            .all(|pair| keyops.adjacent(pair[0].high, pair[1].low))
}

/// Picks the transition covering the most keys, the first one on ties.
fn choose_default_span(keyops: &KeyOps, ranges: &[RedRange]) -> Option<usize> {
    let mut spans: Vec<(usize, u64)> = Vec::new();
    for range in ranges {
        let span = keyops.span(range.low, range.high);
        match spans.iter_mut().find(|(trans, _)| *trans == range.trans) {
            Some((_, total)) => *total += span,
            None => spans.push((range.trans, span)),
        }
    }

    spans
        .into_iter()
        .fold(None, |best: Option<(usize, u64)>, (trans, total)| match best {
            Some((_, best_total)) if best_total >= total => best,
            _ => Some((trans, total)),
        })
        .map(|(trans, _)| trans)
}

/// Picks a transition that falls through to the next state, or the widest
/// one when none does.
fn choose_default_goto(
    keyops: &KeyOps,
    ranges: &[RedRange],
    transitions: &[RedTrans],
    state: usize,
) -> Option<usize> {
    ranges
        .iter()
        .map(|range| range.trans)
        .find(|trans| {
            let entries = &transitions[*trans].entries;
            entries.len() == 1 && entries[0].target == state + 1
        })
        .or_else(|| choose_default_span(keyops, ranges))
}

/// Moves ranges covering a single key into the singles list. A single that
/// sits between two adjoining ranges sharing a transition is lifted out and
/// its neighbours are joined into one range underneath it, since singles
/// are consulted before ranges.
fn move_trans_to_single(
    keyops: &KeyOps,
    ranges: Vec<RedRange>,
) -> (Vec<RedSingle>, Vec<RedRange>) {
    let mut singles = Vec::new();
    let mut kept: Vec<RedRange> = Vec::with_capacity(ranges.len());
    let mut ranges = ranges.into_iter().peekable();

    while let Some(range) = ranges.next() {
        if range.low != range.high {
            kept.push(range);
            continue;
        }

        let bridges = match (kept.last(), ranges.peek()) {
            (Some(prev), Some(next)) => {
                prev.trans == next.trans
                    && keyops.adjacent(prev.high, range.low)
                    && keyops.adjacent(range.high, next.low)
            }
            _ => false,
        };
        singles.push(RedSingle {
            key: range.low,
            trans: range.trans,
        });
        if bridges {
            if let (Some(prev), Some(next)) = (kept.last_mut(), ranges.next()) {
                prev.high = next.high;
            }
        }
    }
    (singles, kept)
}

impl FsmAp {
    /// Readies a finished machine for reduction.
    ///
    /// Pending out actions of final states become EOF actions. Error
    /// transitions take on their state's error actions, missing condition
    /// outcomes become error entries, and states with error actions get
    /// explicit error transitions over every key they do not cover. If any
    /// error transition exists an error state is allocated for them.
    ///
    /// No operator or minimization should run on the machine afterwards.
    pub fn prepare_reduction(&mut self, ctx: &FsmCtx) {
        for state in self.final_states().collect::<Vec<_>>() {
            let st = self.state_mut(state);
            let out = std::mem::take(&mut st.out_actions);
            st.eof_actions.set_actions(&out);
            st.out_priors = PriorityTable::new();
        }

        for state in self.state_ids() {
            let error_actions = self.state(state).error_actions.clone();
            for id in self.state(state).out_list().to_vec() {
                let full_size = self
                    .trans(id)
                    .cond_space
                    .map(|space| ctx.cond_spaces().get(space).full_size());

                let trans = self.trans_mut(id);
                for cond in trans.conds.iter_mut().filter(|cond| cond.target.is_none()) {
                    cond.actions.set_actions(&error_actions);
                }

                if let Some(full_size) = full_size {
                    if trans.conds.len() as u64 != full_size {
                        fill_cond_keys(&mut trans.conds, full_size, &error_actions);
                    }
                }
            }

            if !error_actions.is_empty() {
                self.fill_gaps(ctx.keyops(), state, &error_actions);
            }
        }

        self.compress_transitions();

        let has_error_trans = self.state_ids().into_iter().any(|state| {
            self.out_trans(state)
                .any(|trans| trans.conds.iter().any(|cond| cond.target.is_none()))
        });
        if has_error_trans && self.error_state().is_none() {
            let error_state = self.add_state();
            self.set_error_state(error_state);
        }
    }

    fn fill_gaps(&mut self, keyops: &KeyOps, state: StateId, actions: &ActionTable) {
        let mut gaps = Vec::new();
        let mut next = Some(keyops.min_key());
        for (low, high) in self.out_ranges(state) {
            if let Some(next) = next.filter(|next| *next < low) {
                gaps.push((next, keyops.decrement(low)));
            }
            next = (high < keyops.max_key()).then(|| keyops.increment(high));
        }
        if let Some(next) = next {
            gaps.push((next, keyops.max_key()));
        }

        for (low, high) in gaps {
            let id = self.attach_new_trans(state, None, low, high);
            self.trans_mut(id).conds[0].actions = actions.clone();
        }
    }

    /// Reduces the machine to tables.
    ///
    /// States are numbered depth first from the start state, then from each
    /// entry point, then from the error state. With final sorting enabled the
    /// final states are moved behind all others, keeping their relative
    /// order.
    pub fn reduce(&self, ctx: &FsmCtx) -> Result<RedFsm, FsmError> {
        let start = self.start_state().ok_or_else(|| {
            FsmError::new(FsmErrorKind::InternalError).with_data("machine has no start state")
        })?;

        let mut roots = self.roots();
        roots.extend(self.error_state());
        let mut order: Vec<StateId> = self.depth_first_traversal(roots).collect();
        if ctx.sort_by_final() {
            order.sort_by_key(|state| self.is_final(*state));
        }

        let numbers: FxHashMap<StateId, usize> = order
            .iter()
            .enumerate()
            .map(|(num, state)| (*state, num))
            .collect();
        let error_num = self.error_state().map(|state| numbers[&state]);

        let keyops = ctx.keyops();
        let mut pool = ActionPool::new(ctx.actions().len());
        let mut transitions: Vec<RedTrans> = Vec::new();
        let mut trans_index: FxHashMap<RedTrans, usize> = FxHashMap::default();
        let mut cond_spaces: Vec<Vec<u32>> = Vec::new();
        let mut space_index: FxHashMap<CondSpaceId, usize> = FxHashMap::default();
        let mut states = Vec::with_capacity(order.len());

        for (num, state) in order.iter().enumerate() {
            let st = self.state(*state);
            let to_state_actions = pool.loc(&st.to_state_actions);
            let from_state_actions = pool.loc(&st.from_state_actions);
            let eof_actions = pool.loc(&st.eof_actions);

            let mut ranges: Vec<RedRange> = Vec::new();
            for trans in self.out_trans(*state) {
                let cond_space = trans.cond_space.map(|space| {
                    *space_index.entry(space).or_insert_with(|| {
                        let conds = ctx.cond_spaces().get(space).conds();
                        cond_spaces.push(conds.iter().map(|cond| cond.as_u32()).collect());
                        cond_spaces.len() - 1
                    })
                });

                let mut entries = Vec::with_capacity(trans.conds.len());
                for cond in trans.conds.iter() {
                    let target = match cond.target {
                        Some(target) => numbers[&target],
                        None => error_num.ok_or_else(|| {
                            FsmError::new(FsmErrorKind::InternalError)
                                .with_data("error transition without an error state")
                        })?,
                    };
                    entries.push(RedCondEntry {
                        key: cond.key,
                        target,
                        actions: pool.loc(&cond.actions),
                    });
                }

                let red_trans = RedTrans {
                    cond_space,
                    entries,
                };
                let idx = match trans_index.get(&red_trans) {
                    Some(idx) => *idx,
                    None => {
                        transitions.push(red_trans.clone());
                        trans_index.insert(red_trans, transitions.len() - 1);
                        transitions.len() - 1
                    }
                };

                if let Some(prev) = ranges.last_mut() {
                    if prev.trans == idx && keyops.adjacent(prev.high, trans.low_key) {
                        prev.high = trans.high_key;
                        continue;
                    }
                }
                ranges.push(RedRange {
                    low: trans.low_key,
                    high: trans.high_key,
                    trans: idx,
                });
            }

            let default = if alphabet_covered(keyops, &ranges) {
                match ctx.default_choice() {
                    DefaultChoice::Span => choose_default_span(keyops, &ranges),
                    DefaultChoice::Goto => choose_default_goto(keyops, &ranges, &transitions, num),
                }
            } else {
                None
            };
            if let Some(default) = default {
                ranges.retain(|range| range.trans != default);
            }
            let (singles, ranges) = move_trans_to_single(keyops, ranges);

            let nfa_targets = st
                .nfa_out()
                .iter()
                .map(|id| {
                    let nfa = self.nfa_trans(*id);
                    RedNfaTarget {
                        target: numbers[&nfa.target],
                        order: nfa.order,
                        push_actions: pool.loc(&nfa.push_actions),
                    }
                })
                .collect();

            states.push(RedState {
                id: num,
                final_state: st.is_final(),
                singles,
                ranges,
                default,
                to_state_actions,
                from_state_actions,
                eof_actions,
                nfa_targets,
            });
        }

        let first_final = states
            .iter()
            .find(|state| state.final_state)
            .map(|state| state.id)
            .unwrap_or(states.len());
        let entry_points = self
            .entry_points()
            .map(|(id, state)| (id, numbers[&state]))
            .collect();

        let red = RedFsm {
            states,
            transitions,
            cond_spaces,
            action_array: pool.array,
            action_tables: pool.tables,
            action_names: ctx
                .actions()
                .iter()
                .map(|action| action.name().to_string())
                .collect(),
            action_refs: pool.refs,
            start: numbers[&start],
            first_final,
            error_state: error_num,
            entry_points,
            key_min: keyops.min_key(),
            key_max: keyops.max_key(),
        };

        debug!(
            "reduced to {} states, {} transitions, {} action tables",
            red.states.len(),
            red.transitions.len(),
            red.action_tables.len()
        );
        Ok(red)
    }
}

fn fill_cond_keys(conds: &mut Vec<CondAp>, full_size: u64, actions: &ActionTable) {
    let present: Vec<CondKey> = conds.iter().map(|cond| cond.key).collect();
    for key in (0..full_size).filter(|key| present.binary_search(key).is_err()) {
        let mut cond = CondAp::new(key, None);
        cond.actions = actions.clone();
        conds.push(cond);
    }
    conds.sort_by_key(|cond| cond.key);
}
