//! Crossing and merging of transitions, and the subset construction that
//! keeps the result deterministic.
//!
//! Merging a source state into a destination walks both out lists with a
//! [`RangePairIter`]. Where both have a transition, the two compete by
//! priority and, on a tie, are merged; when their targets differ, the
//! target becomes a combined state standing for the union of both targets'
//! underlying state sets. Combined states are looked up in a dictionary
//! keyed by that set and filled breadth first once the caller is done
//! merging.

use std::cmp::Ordering;
use std::collections::VecDeque;

use log::trace;
use rustc_hash::FxHashMap;

use crate::action::ActionId;
use crate::condspace::{CondKey, CondSpaceId};
use crate::ctx::FsmCtx;
use crate::error::{FsmError, FsmErrorKind};
use crate::graph::{CondAp, FsmAp, InEdge, StateId, TransAp, TransId};
use crate::rangepair::{RangePairItem, RangePairIter};

/// The state of one combining operation.
pub(crate) struct MergeData<'c> {
    pub ctx: &'c mut FsmCtx,
    state_dict: FxHashMap<Vec<StateId>, StateId>,
    fill_list: VecDeque<StateId>,
    prior_interaction: Option<u32>,
}

impl<'c> MergeData<'c> {
    pub fn new(ctx: &'c mut FsmCtx) -> Self {
        Self {
            ctx,
            state_dict: FxHashMap::default(),
            fill_list: VecDeque::new(),
            prior_interaction: None,
        }
    }

    /// Reports an ambiguous priority interaction seen during the operation.
    pub fn finish(&self) -> Result<(), FsmError> {
        match self.prior_interaction {
            Some(guard) => Err(FsmError::new(FsmErrorKind::PriorInteraction(guard))),
            None => Ok(()),
        }
    }

    /// Interns the union of two condition spaces, refusing spaces wider than
    /// the configured limit.
    fn merged_space(
        &mut self,
        left: Option<CondSpaceId>,
        right: Option<CondSpaceId>,
    ) -> Result<CondSpaceId, FsmError> {
        let conds = self.ctx.cond_spaces().union_conds(left, right);
        intern_cond_union(self.ctx, conds)
    }
}

/// Interns a condition space over `conds`, refusing spaces wider than the
/// configured limit. `conds` must be sorted and free of duplicates.
pub(crate) fn intern_cond_union(
    ctx: &mut FsmCtx,
    conds: Vec<ActionId>,
) -> Result<CondSpaceId, FsmError> {
    let limit = ctx.cond_limit();
    if conds.len() > limit {
        return Err(FsmError::new(FsmErrorKind::CondCostTooHigh(conds[limit].as_u32()))
            .with_data(format!("{} conditions in one space", conds.len())));
    }
    Ok(ctx.cond_spaces_mut().intern(conds))
}

/// Re-expresses condition entries in a larger space.
pub(crate) fn expand_conds(
    ctx: &FsmCtx,
    from: Option<CondSpaceId>,
    to: CondSpaceId,
    conds: &[CondAp],
) -> Vec<CondAp> {
    let mut expanded: Vec<CondAp> = conds
        .iter()
        .flat_map(|cond| {
            ctx.cond_spaces()
                .expand_cond_key(from, to, cond.key)
                .into_iter()
                .map(move |key| CondAp {
                    key,
                    ..cond.clone()
                })
        })
        .collect();
    expanded.sort_by_key(|cond| cond.key);
    expanded
}

impl FsmAp {
    /// Moves a transition into a larger condition space in place.
    pub(crate) fn expand_trans(&mut self, ctx: &FsmCtx, id: TransId, to: CondSpaceId) {
        let trans = self.trans(id);
        if trans.cond_space == Some(to) {
            return;
        }
        let expanded = expand_conds(ctx, trans.cond_space, to, &trans.conds);
        self.replace_conds(id, Some(to), expanded);
    }

    fn insert_cond(&mut self, id: TransId, cond: CondAp) {
        let trans = self.trans_mut(id);
        let from = trans.from;
        let (key, target) = (cond.key, cond.target);
        let pos = match trans.conds.binary_search_by_key(&key, |c| c.key) {
            Ok(_) => panic!("condition {} already present on transition", key),
            Err(pos) => pos,
        };
        trans.conds.insert(pos, cond);
        if let Some(target) = target {
            self.attach_to_state(InEdge::Cond(id, key), from, target);
        }
    }

    /// Merges every property of `src` into `dest`: out transitions, final
    /// status, state action tables, pending out data, epsilons and NFA
    /// alternatives. `src` is left untouched, so a state may be merged into
    /// itself.
    pub(crate) fn merge_states(
        &mut self,
        md: &mut MergeData,
        dest: StateId,
        src: StateId,
    ) -> Result<(), FsmError> {
        let src_state = self.state(src).clone();
        let src_trans: Vec<TransAp> = src_state
            .out_list
            .iter()
            .map(|id| self.trans(*id).clone())
            .collect();
        let src_nfa: Vec<_> = src_state
            .nfa_out
            .iter()
            .map(|id| self.nfa_trans(*id).clone())
            .collect();

        self.merge_out_lists(md, dest, &src_trans)?;

        if src_state.final_state {
            self.set_fin_state(dest);
        }
        let dest_state = self.state_mut(dest);
        dest_state.graph_bits |= src_state.graph_bits;
        dest_state
            .to_state_actions
            .set_actions(&src_state.to_state_actions);
        dest_state
            .from_state_actions
            .set_actions(&src_state.from_state_actions);
        dest_state.eof_actions.set_actions(&src_state.eof_actions);
        dest_state.error_actions.set_actions(&src_state.error_actions);
        dest_state.out_actions.set_actions(&src_state.out_actions);
        dest_state.out_priors.set_priors(&src_state.out_priors);
        for id in src_state.epsilon_trans {
            if !dest_state.epsilon_trans.contains(&id) {
                dest_state.epsilon_trans.push(id);
            }
        }

        for nfa in src_nfa {
            let present = self.state(dest).nfa_out.iter().any(|id| {
                let existing = self.nfa_trans(*id);
                existing.target == nfa.target
                    && existing.order == nfa.order
                    && existing.push_actions == nfa.push_actions
            });
            if !present {
                self.attach_new_nfa(dest, nfa.target, nfa.order, nfa.push_actions);
            }
        }

        Ok(())
    }

    /// Merges `src` into `dest` after first giving `src`'s transitions the
    /// pending out actions and priorities of `dest`. Used wherever a final
    /// state is extended by another machine's start.
    pub(crate) fn merge_states_leaving(
        &mut self,
        md: &mut MergeData,
        dest: StateId,
        src: StateId,
    ) -> Result<(), FsmError> {
        if !self.state(dest).has_out_data() {
            return self.merge_states(md, dest, src);
        }

        let carrier = self.add_state();
        self.merge_states(md, carrier, src)?;
        self.transfer_out_data(carrier, dest);
        self.merge_states(md, dest, carrier)?;
        self.delete_state(carrier);
        Ok(())
    }

    /// Embeds the out data of `from` on every transition of `state` that
    /// leads somewhere.
    fn transfer_out_data(&mut self, state: StateId, from: StateId) {
        let (actions, priors) = {
            let from = self.state(from);
            (from.out_actions.clone(), from.out_priors.clone())
        };
        for id in self.state(state).out_list.clone() {
            for cond in self.trans_mut(id).conds.iter_mut() {
                if cond.target.is_some() {
                    cond.actions.set_actions(&actions);
                    cond.priors.set_priors(&priors);
                }
            }
        }
    }

    fn merge_out_lists(
        &mut self,
        md: &mut MergeData,
        dest: StateId,
        src_trans: &[TransAp],
    ) -> Result<(), FsmError> {
        let dest_ranges = self.out_ranges(dest);
        let src_ranges: Vec<_> = src_trans
            .iter()
            .map(|trans| (trans.low_key, trans.high_key))
            .collect();

        for item in RangePairIter::new(&dest_ranges, &src_ranges) {
            match item {
                RangePairItem::BreakS1 { at, .. } => {
                    let id = self.covering_trans(dest, at);
                    self.split_trans(id, at);
                }
                RangePairItem::InS2 { low, high, s2 } => {
                    let src = &src_trans[s2];
                    self.attach_new_cond_trans(dest, low, high, src.cond_space, src.conds.clone());
                }
                RangePairItem::Overlap { low, s2, .. } => {
                    let id = self.covering_trans(dest, low);
                    self.cross_transitions(md, id, &src_trans[s2])?;
                }
                RangePairItem::InS1 { .. } | RangePairItem::BreakS2 { .. } => {}
            }
        }
        Ok(())
    }

    fn covering_trans(&self, state: StateId, key: crate::keyops::Key) -> TransId {
        match self.find_trans(state, key) {
            Some(id) => id,
            None => panic!("no transition covers {} on {}", key, state),
        }
    }

    /// Crosses a source transition into a destination transition over the
    /// same range, condition entry by condition entry.
    fn cross_transitions(
        &mut self,
        md: &mut MergeData,
        dest: TransId,
        src: &TransAp,
    ) -> Result<(), FsmError> {
        let dest_space = self.trans(dest).cond_space;
        let src_conds = if dest_space == src.cond_space {
            src.conds.clone()
        } else {
            let merged = md.merged_space(dest_space, src.cond_space)?;
            self.expand_trans(md.ctx, dest, merged);
            expand_conds(md.ctx, src.cond_space, merged, &src.conds)
        };

        for src_cond in src_conds {
            if self.trans(dest).cond(src_cond.key).is_some() {
                self.cross_cond(md, dest, src_cond)?;
            } else {
                self.insert_cond(dest, src_cond);
            }
        }
        Ok(())
    }

    /// Resolves two entries competing for the same key and condition by
    /// priority, merging them on a tie.
    fn cross_cond(
        &mut self,
        md: &mut MergeData,
        dest: TransId,
        src: CondAp,
    ) -> Result<(), FsmError> {
        let key = src.key;
        let compare = match self.trans(dest).cond(key) {
            Some(dest_cond) => dest_cond
                .priors
                .compare(&src.priors, md.ctx.check_prior_interaction()),
            None => panic!("condition {} vanished during crossing", key),
        };
        if let Some(guard) = compare.interaction {
            md.prior_interaction.get_or_insert(guard);
        }

        match compare.ordering {
            // the source has higher priority and overwrites the destination
            Ordering::Less => {
                self.retarget_cond(dest, key, src.target);
                let cond = self.cond_mut(dest, key);
                cond.actions = src.actions;
                cond.priors = src.priors;
                Ok(())
            }
            Ordering::Greater => Ok(()),
            Ordering::Equal => self.merge_trans(md, dest, src),
        }
    }

    fn cond_mut(&mut self, id: TransId, key: CondKey) -> &mut CondAp {
        let trans = self.trans_mut(id);
        match trans.conds.binary_search_by_key(&key, |c| c.key) {
            Ok(pos) => &mut trans.conds[pos],
            Err(_) => panic!("condition {} missing from transition", key),
        }
    }

    /// Merges an equal-priority source entry into a destination entry. A
    /// real target beats the error target; two different real targets are
    /// replaced by their combined state. Action and priority tables union.
    fn merge_trans(
        &mut self,
        md: &mut MergeData,
        dest: TransId,
        src: CondAp,
    ) -> Result<(), FsmError> {
        let key = src.key;
        let dest_target = self.cond_mut(dest, key).target;

        match (dest_target, src.target) {
            (Some(a), Some(b)) if a != b => {
                let combined = self.combined_state(md, a, b)?;
                self.retarget_cond(dest, key, Some(combined));
            }
            (None, Some(b)) => self.retarget_cond(dest, key, Some(b)),
            _ => {}
        }

        let cond = self.cond_mut(dest, key);
        cond.actions.set_actions(&src.actions);
        cond.priors.set_priors(&src.priors);
        Ok(())
    }

    /// Finds or creates the state standing for the union of the underlying
    /// sets of `a` and `b`.
    fn combined_state(
        &mut self,
        md: &mut MergeData,
        a: StateId,
        b: StateId,
    ) -> Result<StateId, FsmError> {
        let mut set = Vec::new();
        for state in [a, b] {
            match &self.state(state).state_set {
                Some(underlying) => set.extend(underlying.iter().copied()),
                None => set.push(state),
            }
        }
        set.sort();
        set.dedup();

        if set.len() == 1 {
            return Ok(set[0]);
        }
        if let Some(existing) = md.state_dict.get(&set) {
            return Ok(*existing);
        }

        let limit = md.ctx.state_limit();
        if limit > 0 && self.state_count() >= limit {
            return Err(FsmError::new(FsmErrorKind::TooManyStates)
                .with_data(format!("limit of {} reached", limit)));
        }

        let combined = self.add_state();
        trace!("combined state {} for set {:?}", combined, set);
        self.state_mut(combined).state_set = Some(set.clone());
        md.state_dict.insert(set, combined);
        md.fill_list.push_back(combined);
        Ok(combined)
    }

    /// Merges a list of states into `dest` as one combined state.
    pub(crate) fn merge_state_list(
        &mut self,
        md: &mut MergeData,
        dest: StateId,
        states: &[StateId],
    ) -> Result<(), FsmError> {
        for state in states {
            self.merge_states(md, dest, *state)?;
        }
        Ok(())
    }

    /// Fills every combined state created so far by merging in its
    /// underlying states. Filling may create more combined states; they are
    /// queued behind the current ones rather than filled recursively.
    pub(crate) fn fill_in_states(&mut self, md: &mut MergeData) -> Result<(), FsmError> {
        let mut filled = 0;
        while let Some(state) = md.fill_list.pop_front() {
            let set = self.state(state).state_set.clone().unwrap_or_default();
            self.merge_state_list(md, state, &set)?;
            filled += 1;
        }
        trace!("filled {} combined states", filled);

        for state in self.state_ids() {
            self.state_mut(state).state_set = None;
        }
        md.state_dict.clear();
        Ok(())
    }

    /// Gives the start state a fresh copy with no in transitions so that
    /// later edits to it cannot leak into loops back to the start.
    pub(crate) fn isolate_start_state(&mut self, md: &mut MergeData) -> Result<(), FsmError> {
        let Some(prev) = self.start_state() else {
            return Ok(());
        };
        if self.state(prev).in_list().next().is_none() {
            return Ok(());
        }

        self.unset_start_state();
        let start = self.add_state();
        self.set_start_state(start);
        self.merge_states(md, start, prev)
    }
}
