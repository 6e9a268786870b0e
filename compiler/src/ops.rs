//! Machine constructors and the regular-language operators over them.
//!
//! Every operator consumes its operands and returns the combined machine or
//! the error that aborted it. Operands must have been built against the same
//! [`FsmCtx`].

use std::collections::BTreeSet;

use log::debug;

use crate::action::{ActionId, ActionTable};
use crate::ctx::{FsmCtx, MinimizeLevel};
use crate::error::{FsmError, FsmErrorKind};
use crate::graph::{CondAp, FsmAp, StateId, GRAPH1, GRAPH2};
use crate::keyops::Key;
use crate::merge::{expand_conds, intern_cond_union, MergeData};

impl FsmAp {
    /// A machine that accepts nothing.
    pub fn empty_fsm() -> FsmAp {
        let mut fsm = FsmAp::new();
        let start = fsm.add_state();
        fsm.set_start_state(start);
        fsm
    }

    /// A machine that accepts only the empty string.
    pub fn lambda_fsm() -> FsmAp {
        let mut fsm = FsmAp::empty_fsm();
        if let Some(start) = fsm.start_state() {
            fsm.set_fin_state(start);
        }
        fsm
    }

    /// A machine that accepts exactly the sequence `keys`.
    pub fn concat_fsm(keys: &[Key]) -> FsmAp {
        let mut fsm = FsmAp::new();
        let mut last = fsm.add_state();
        fsm.set_start_state(last);
        for key in keys {
            let next = fsm.add_state();
            fsm.attach_new_trans(last, Some(next), *key, *key);
            last = next;
        }
        fsm.set_fin_state(last);
        fsm
    }

    /// A machine that accepts any single key of `keys`.
    pub fn or_fsm(keys: &[Key]) -> FsmAp {
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let mut fsm = FsmAp::new();
        let start = fsm.add_state();
        let end = fsm.add_state();
        fsm.set_start_state(start);
        fsm.set_fin_state(end);

        let mut idx = 0;
        while idx < keys.len() {
            let low = keys[idx];
            let mut high = low;
            while idx + 1 < keys.len() && keys[idx + 1] == high + 1 {
                idx += 1;
                high = keys[idx];
            }
            fsm.attach_new_trans(start, Some(end), low, high);
            idx += 1;
        }
        fsm
    }

    /// A machine that accepts any single key in `low..=high`.
    pub fn range_fsm(low: Key, high: Key) -> FsmAp {
        let mut fsm = FsmAp::new();
        let start = fsm.add_state();
        let end = fsm.add_state();
        fsm.set_start_state(start);
        fsm.set_fin_state(end);
        fsm.attach_new_trans(start, Some(end), low, high);
        fsm
    }

    /// A machine that accepts any sequence of keys in `low..=high`.
    pub fn range_star_fsm(low: Key, high: Key) -> FsmAp {
        let mut fsm = FsmAp::lambda_fsm();
        if let Some(start) = fsm.start_state() {
            fsm.attach_new_trans(start, Some(start), low, high);
        }
        fsm
    }

    /// A machine that accepts any single key of the alphabet.
    pub fn any_fsm(ctx: &FsmCtx) -> FsmAp {
        let keyops = ctx.keyops();
        FsmAp::range_fsm(keyops.min_key(), keyops.max_key())
    }

    /// A machine accepting one key of `low..=high`, but only while the
    /// condition `cond` evaluates to `sense`.
    pub fn guarded_condition_fsm(
        ctx: &mut FsmCtx,
        low: Key,
        high: Key,
        cond: ActionId,
        sense: bool,
    ) -> Result<FsmAp, FsmError> {
        let mut fsm = FsmAp::range_fsm(low, high);
        fsm.embed_condition(ctx, cond, sense)?;
        Ok(fsm)
    }

    /// Restricts every transition to fire only when `cond` evaluates to
    /// `sense`, widening condition spaces as needed. Transitions left with no
    /// satisfiable entry are removed.
    pub fn embed_condition(
        &mut self,
        ctx: &mut FsmCtx,
        cond: ActionId,
        sense: bool,
    ) -> Result<(), FsmError> {
        for state in self.state_ids() {
            for id in self.state(state).out_list().to_vec() {
                let trans = self.trans(id);
                let mut conds = ctx.cond_spaces().union_conds(trans.cond_space, None);
                if let Err(pos) = conds.binary_search(&cond) {
                    conds.insert(pos, cond);
                }
                let space = intern_cond_union(ctx, conds)?;
                let bit = match ctx.cond_spaces().get(space).position(cond) {
                    Some(pos) => 1 << pos,
                    None => unreachable!("condition missing from its own space"),
                };

                let kept: Vec<CondAp> = expand_conds(ctx, trans.cond_space, space, &trans.conds)
                    .into_iter()
                    .filter(|entry| (entry.key & bit != 0) == sense)
                    .collect();
                if kept.is_empty() {
                    self.detach_trans(state, id);
                } else {
                    self.replace_conds(id, Some(space), kept);
                }
            }
        }
        Ok(())
    }

    /// Adds an epsilon transition to the entry point `id` from every final
    /// state. Resolved by [`FsmAp::epsilon_op`].
    pub fn epsilon_trans(&mut self, id: u32) {
        for state in self.final_states().collect::<Vec<_>>() {
            let epsilons = &mut self.state_mut(state).epsilon_trans;
            if !epsilons.contains(&id) {
                epsilons.push(id);
            }
        }
    }

    fn begin_op(&mut self, ctx: &FsmCtx) {
        self.set_misfit_accounting(ctx.misfit_accounting());
    }

    /// Runs one combining step under a fresh merge session, turning an
    /// observed priority interaction into an error once it completes.
    fn merge_op<F>(&mut self, ctx: &mut FsmCtx, op: F) -> Result<(), FsmError>
    where
        F: FnOnce(&mut FsmAp, &mut MergeData) -> Result<(), FsmError>,
    {
        self.begin_op(ctx);
        let mut md = MergeData::new(ctx);
        op(self, &mut md)?;
        md.finish()
    }

    /// Drops the states an operation orphaned, renumbers the arenas and
    /// minimizes when the configured level calls for it.
    fn end_op(mut self, ctx: &FsmCtx, name: &str, most_ops: bool) -> FsmAp {
        if self.misfit_accounting() {
            self.remove_misfits();
            self.set_misfit_accounting(false);
        } else {
            self.remove_unreachable_states();
        }
        self.compact();
        self.minimize_after_op(ctx, most_ops);
        debug!("{} produced {} states", name, self.state_count());
        self
    }

    fn minimize_after_op(&mut self, ctx: &FsmCtx, most_ops: bool) {
        let minimize = match ctx.minimize_level() {
            MinimizeLevel::EveryOp => true,
            MinimizeLevel::MostOps => most_ops,
            MinimizeLevel::End | MinimizeLevel::None => false,
        };
        if minimize {
            self.minimize(ctx);
        }
    }

    /// Unions `other` into this machine through a new start state standing
    /// for both old ones.
    fn do_or(&mut self, md: &mut MergeData, other: FsmAp) -> Result<(), FsmError> {
        let start = self.start_state();
        let other_start = self.absorb(other);
        self.unset_start_state();

        let new_start = self.add_state();
        self.set_start_state(new_start);
        let starts: Vec<StateId> = start.into_iter().chain(other_start).collect();
        self.merge_state_list(md, new_start, &starts)?;
        self.fill_in_states(md)
    }

    /// Concatenates `other` onto the states in `from`, or onto every final
    /// state when `from` is `None`. Unless `optional`, the states extended
    /// lose their final status.
    fn do_concat(
        &mut self,
        md: &mut MergeData,
        other: FsmAp,
        from: Option<Vec<StateId>>,
        optional: bool,
    ) -> Result<(), FsmError> {
        let from = from.unwrap_or_else(|| self.final_states().collect());
        if !optional {
            self.unset_all_fin_states();
        }
        let Some(other_start) = self.absorb(other) else {
            return Ok(());
        };

        for state in from {
            self.merge_states_leaving(md, state, other_start)?;
            if !self.is_final(state) {
                let st = self.state_mut(state);
                st.out_actions.clear();
                st.out_priors = Default::default();
            }
        }
        self.fill_in_states(md)
    }

    fn do_star(&mut self, md: &mut MergeData) -> Result<(), FsmError> {
        let Some(prev) = self.start_state() else {
            return Ok(());
        };
        self.unset_start_state();
        let start = self.add_state();
        self.set_start_state(start);
        self.merge_states(md, start, prev)?;

        // the start is merged with itself last so its doubled transitions
        // never leak into the finals
        let finals: Vec<StateId> = self.final_states().collect();
        for state in finals {
            if state != start {
                self.merge_states_leaving(md, state, start)?;
            }
        }
        if self.is_final(start) {
            self.merge_states_leaving(md, start, start)?;
        }

        self.set_fin_state(start);
        self.fill_in_states(md)
    }

    fn do_repeat(&mut self, md: &mut MergeData, times: u32) -> Result<(), FsmError> {
        let copy = self.clone();
        for _ in 1..times {
            self.do_concat(md, copy.clone(), None, false)?;
        }
        Ok(())
    }

    fn do_optional_repeat(&mut self, md: &mut MergeData, times: u32) -> Result<(), FsmError> {
        self.isolate_start_state(md)?;
        let Some(start) = self.start_state() else {
            return Ok(());
        };
        if times == 1 {
            self.set_fin_state(start);
            return Ok(());
        }

        let copy = self.clone();
        let mut last: Vec<StateId> = self.final_states().collect();
        self.set_fin_state(start);

        for _ in 2..times {
            let mut dup = copy.clone();
            dup.set_fin_bits(GRAPH2);
            self.do_concat(md, dup, Some(last), true)?;

            last = self.final_states().filter(|s| self.state(*s).graph_bits & GRAPH2 != 0).collect();
            for state in last.iter() {
                self.state_mut(*state).graph_bits &= !GRAPH2;
            }
        }
        self.do_concat(md, copy, Some(last), true)
    }

    /// Unsets every final state whose graph bits fail `keep`, then clears the
    /// bits of the survivors.
    fn unset_finals_where(&mut self, keep: impl Fn(u8) -> bool) {
        for state in self.final_states().collect::<Vec<_>>() {
            if keep(self.state(state).graph_bits) {
                self.state_mut(state).graph_bits = 0;
            } else {
                self.unset_fin_state(state);
            }
        }
    }

    /// Merges into every state carrying epsilon transitions the states of
    /// the entry points those transitions name, following epsilons of the
    /// entered states transitively.
    fn resolve_epsilon_trans(&mut self, md: &mut MergeData) -> Result<(), FsmError> {
        let states: Vec<StateId> = self
            .state_ids()
            .into_iter()
            .filter(|s| !self.state(*s).epsilon_trans.is_empty())
            .collect();

        for state in states {
            let targets = self.epsilon_closure(state);
            for target in targets {
                if target != state {
                    self.merge_states(md, state, target)?;
                }
            }
        }
        self.fill_in_states(md)?;

        for state in self.state_ids() {
            self.state_mut(state).epsilon_trans.clear();
        }
        Ok(())
    }

    fn epsilon_closure(&self, state: StateId) -> Vec<StateId> {
        let mut pending: Vec<u32> = self.state(state).epsilon_trans.clone();
        let mut seen = BTreeSet::new();
        let mut targets = Vec::new();

        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            for target in self.entry_states(id) {
                if !targets.contains(&target) {
                    targets.push(target);
                    pending.extend(self.state(target).epsilon_trans.iter().copied());
                }
            }
        }
        targets
    }

    /// Accepts a string of this machine followed by a string of `other`.
    pub fn concat_op(mut self, ctx: &mut FsmCtx, other: FsmAp) -> Result<FsmAp, FsmError> {
        self.merge_op(ctx, |fsm, md| fsm.do_concat(md, other, None, false))?;
        Ok(self.end_op(ctx, "concat", false))
    }

    /// Accepts strings of either machine.
    pub fn union_op(mut self, ctx: &mut FsmCtx, other: FsmAp) -> Result<FsmAp, FsmError> {
        self.merge_op(ctx, |fsm, md| fsm.do_or(md, other))?;
        Ok(self.end_op(ctx, "union", true))
    }

    /// Accepts strings of both machines.
    pub fn intersect_op(mut self, ctx: &mut FsmCtx, mut other: FsmAp) -> Result<FsmAp, FsmError> {
        self.set_fin_bits(GRAPH1);
        other.set_fin_bits(GRAPH2);
        self.merge_op(ctx, |fsm, md| {
            fsm.do_or(md, other)?;
            fsm.unset_finals_where(|bits| bits == GRAPH1 | GRAPH2);
            Ok(())
        })?;
        self.remove_dead_end_states();
        Ok(self.end_op(ctx, "intersect", true))
    }

    /// Accepts strings of this machine that `other` does not accept.
    pub fn subtract_op(mut self, ctx: &mut FsmCtx, mut other: FsmAp) -> Result<FsmAp, FsmError> {
        other.set_fin_bits(GRAPH2);
        self.merge_op(ctx, |fsm, md| {
            fsm.do_or(md, other)?;
            fsm.unset_finals_where(|bits| bits & GRAPH2 == 0);
            Ok(())
        })?;
        self.remove_dead_end_states();
        Ok(self.end_op(ctx, "subtract", true))
    }

    /// Kleene star.
    pub fn star_op(mut self, ctx: &mut FsmCtx) -> Result<FsmAp, FsmError> {
        self.merge_op(ctx, |fsm, md| fsm.do_star(md))?;
        Ok(self.end_op(ctx, "star", true))
    }

    /// One or more repetitions.
    pub fn plus_op(self, ctx: &mut FsmCtx) -> Result<FsmAp, FsmError> {
        let star = self.clone().star_op(ctx)?;
        let mut fsm = self.concat_op(ctx, star)?;
        fsm.minimize_after_op(ctx, true);
        Ok(fsm)
    }

    /// Zero or one occurrence.
    pub fn question_op(mut self, ctx: &mut FsmCtx) -> Result<FsmAp, FsmError> {
        self.merge_op(ctx, |fsm, md| {
            fsm.isolate_start_state(md)?;
            if let Some(start) = fsm.start_state() {
                fsm.set_fin_state(start);
            }
            fsm.fill_in_states(md)
        })?;
        Ok(self.end_op(ctx, "question", false))
    }

    /// Exactly `times` repetitions. Zero repetitions accept only the empty
    /// string.
    pub fn repeat_op(mut self, ctx: &mut FsmCtx, times: u32) -> Result<FsmAp, FsmError> {
        if times == 0 {
            return Ok(FsmAp::lambda_fsm());
        }
        self.merge_op(ctx, |fsm, md| fsm.do_repeat(md, times))?;
        Ok(self.end_op(ctx, "repeat", true))
    }

    /// Zero up to `times` repetitions.
    pub fn optional_repeat_op(mut self, ctx: &mut FsmCtx, times: u32) -> Result<FsmAp, FsmError> {
        if times == 0 {
            return Ok(FsmAp::lambda_fsm());
        }
        self.merge_op(ctx, |fsm, md| fsm.do_optional_repeat(md, times))?;
        Ok(self.end_op(ctx, "optional repeat", true))
    }

    /// `{n}`
    pub fn exact_repeat(self, ctx: &mut FsmCtx, times: u32) -> Result<FsmAp, FsmError> {
        self.repeat_op(ctx, times)
    }

    /// `{,max}`
    pub fn max_repeat(self, ctx: &mut FsmCtx, max: u32) -> Result<FsmAp, FsmError> {
        self.optional_repeat_op(ctx, max)
    }

    /// `{min,}`
    pub fn min_repeat(self, ctx: &mut FsmCtx, min: u32) -> Result<FsmAp, FsmError> {
        if min == 0 {
            return self.star_op(ctx);
        }
        let star = self.clone().star_op(ctx)?;
        let mut fsm = self.repeat_op(ctx, min)?.concat_op(ctx, star)?;
        fsm.minimize_after_op(ctx, true);
        Ok(fsm)
    }

    /// `{min,max}`
    pub fn range_repeat(self, ctx: &mut FsmCtx, min: u32, max: u32) -> Result<FsmAp, FsmError> {
        if max < min {
            return Err(FsmError::new(FsmErrorKind::RepetitionError)
                .with_data(format!("max {} < min {}", max, min)));
        }
        if min == 0 {
            return self.optional_repeat_op(ctx, max);
        }
        if min == max {
            return self.repeat_op(ctx, min);
        }

        let optional = self.clone().optional_repeat_op(ctx, max - min)?;
        let mut fsm = self.repeat_op(ctx, min)?.concat_op(ctx, optional)?;
        fsm.minimize_after_op(ctx, true);
        Ok(fsm)
    }

    /// A non-deterministic union. The result starts in a state with one NFA
    /// transition per machine, tried in the order given; no subset
    /// construction takes place between the alternatives.
    pub fn nfa_union_op(ctx: &mut FsmCtx, machines: Vec<FsmAp>) -> Result<FsmAp, FsmError> {
        let mut fsm = FsmAp::new();
        fsm.begin_op(ctx);
        let start = fsm.add_state();
        fsm.set_start_state(start);

        for (order, machine) in machines.into_iter().enumerate() {
            if let Some(alt_start) = fsm.absorb(machine) {
                fsm.attach_new_nfa(start, alt_start, order as i32, ActionTable::new());
            }
        }
        Ok(fsm.end_op(ctx, "nfa union", false))
    }

    /// Between `min` and `max` repetitions as a non-deterministic union of
    /// each count, longest first.
    pub fn nfa_repeat_op(self, ctx: &mut FsmCtx, min: u32, max: u32) -> Result<FsmAp, FsmError> {
        if max < min {
            return Err(FsmError::new(FsmErrorKind::RepetitionError)
                .with_data(format!("max {} < min {}", max, min)));
        }

        let mut alternatives = Vec::with_capacity((max - min + 1) as usize);
        for times in (min..=max).rev() {
            alternatives.push(self.clone().repeat_op(ctx, times)?);
        }
        FsmAp::nfa_union_op(ctx, alternatives)
    }

    /// Resolves epsilon transitions by merging the states of their target
    /// entry points into their sources.
    pub fn epsilon_op(mut self, ctx: &mut FsmCtx) -> Result<FsmAp, FsmError> {
        self.merge_op(ctx, |fsm, md| fsm.resolve_epsilon_trans(md))?;
        Ok(self.end_op(ctx, "epsilon", false))
    }
}
