//! Embedding of actions and priorities into a built machine.
//!
//! Each embedding draws a fresh ordering from the context, so actions
//! embedded later run later on any edge they share.

use crate::action::{ActionId, PriorDescId};
use crate::ctx::FsmCtx;
use crate::error::FsmError;
use crate::graph::{FsmAp, StateId};
use crate::merge::MergeData;

impl FsmAp {
    fn isolated_start(&mut self, ctx: &mut FsmCtx) -> Result<Option<StateId>, FsmError> {
        let mut md = MergeData::new(ctx);
        self.isolate_start_state(&mut md)?;
        self.fill_in_states(&mut md)?;
        md.finish()?;
        Ok(self.start_state())
    }

    /// `>`: runs `action` on the transitions leaving the start state, and on
    /// leaving through EOF when the start state is final.
    pub fn start_fsm_action(&mut self, ctx: &mut FsmCtx, action: ActionId) -> Result<(), FsmError> {
        let ordering = ctx.next_action_ord();
        let Some(start) = self.isolated_start(ctx)? else {
            return Ok(());
        };

        for id in self.state(start).out_list().to_vec() {
            for cond in self.trans_mut(id).conds.iter_mut() {
                if cond.target.is_some() {
                    cond.actions.set_action(ordering, action);
                }
            }
        }
        if self.is_final(start) {
            self.state_mut(start).out_actions.set_action(ordering, action);
        }
        Ok(())
    }

    /// `$`: runs `action` on every transition.
    pub fn all_trans_action(&mut self, ctx: &mut FsmCtx, action: ActionId) {
        let ordering = ctx.next_action_ord();
        self.for_each_cond(|target, actions| {
            if target.is_some() {
                actions.set_action(ordering, action);
            }
        });
    }

    /// `@`: runs `action` on every transition entering a final state.
    pub fn finish_fsm_action(&mut self, ctx: &mut FsmCtx, action: ActionId) {
        let ordering = ctx.next_action_ord();
        let finals: Vec<StateId> = self.final_states().collect();
        self.for_each_cond(|target, actions| {
            if target.map_or(false, |t| finals.contains(&t)) {
                actions.set_action(ordering, action);
            }
        });
    }

    /// `%`: runs `action` when the machine is left from a final state.
    pub fn leave_fsm_action(&mut self, ctx: &mut FsmCtx, action: ActionId) {
        let ordering = ctx.next_action_ord();
        for state in self.final_states().collect::<Vec<_>>() {
            self.state_mut(state).out_actions.set_action(ordering, action);
        }
    }

    /// Runs `action` whenever any state is entered.
    pub fn to_state_action(&mut self, ctx: &mut FsmCtx, action: ActionId) {
        let ordering = ctx.next_action_ord();
        for state in self.state_ids() {
            self.state_mut(state).to_state_actions.set_action(ordering, action);
        }
    }

    /// Runs `action` before any transition is taken.
    pub fn from_state_action(&mut self, ctx: &mut FsmCtx, action: ActionId) {
        let ordering = ctx.next_action_ord();
        for state in self.state_ids() {
            self.state_mut(state).from_state_actions.set_action(ordering, action);
        }
    }

    /// Runs `action` when input ends in any state.
    pub fn eof_action(&mut self, ctx: &mut FsmCtx, action: ActionId) {
        let ordering = ctx.next_action_ord();
        for state in self.state_ids() {
            self.state_mut(state).eof_actions.set_action(ordering, action);
        }
    }

    /// Runs `action` when a key has no transition or leads to the error
    /// state.
    pub fn error_action(&mut self, ctx: &mut FsmCtx, action: ActionId) {
        let ordering = ctx.next_action_ord();
        for state in self.state_ids() {
            self.state_mut(state).error_actions.set_action(ordering, action);
        }
    }

    /// Assigns a priority to the transitions leaving the start state.
    pub fn start_fsm_prior(&mut self, ctx: &mut FsmCtx, desc: PriorDescId) -> Result<(), FsmError> {
        let ordering = ctx.next_prior_ord();
        let prior = *ctx.prior_desc(desc);
        let Some(start) = self.isolated_start(ctx)? else {
            return Ok(());
        };

        for id in self.state(start).out_list().to_vec() {
            for cond in self.trans_mut(id).conds.iter_mut() {
                if cond.target.is_some() {
                    cond.priors.set_prior(ordering, desc, &prior);
                }
            }
        }
        if self.is_final(start) {
            self.state_mut(start).out_priors.set_prior(ordering, desc, &prior);
        }
        Ok(())
    }

    /// Assigns a priority to every transition.
    pub fn all_trans_prior(&mut self, ctx: &mut FsmCtx, desc: PriorDescId) {
        let ordering = ctx.next_prior_ord();
        let prior = *ctx.prior_desc(desc);
        for state in self.state_ids() {
            for id in self.state(state).out_list().to_vec() {
                for cond in self.trans_mut(id).conds.iter_mut() {
                    if cond.target.is_some() {
                        cond.priors.set_prior(ordering, desc, &prior);
                    }
                }
            }
        }
    }

    /// Assigns a priority to every transition entering a final state.
    pub fn finish_fsm_prior(&mut self, ctx: &mut FsmCtx, desc: PriorDescId) {
        let ordering = ctx.next_prior_ord();
        let prior = *ctx.prior_desc(desc);
        let finals: Vec<StateId> = self.final_states().collect();
        for state in self.state_ids() {
            for id in self.state(state).out_list().to_vec() {
                for cond in self.trans_mut(id).conds.iter_mut() {
                    if cond.target.map_or(false, |t| finals.contains(&t)) {
                        cond.priors.set_prior(ordering, desc, &prior);
                    }
                }
            }
        }
    }

    /// Assigns a priority to the transitions that leave the machine through
    /// a final state once it is concatenated.
    pub fn leave_fsm_prior(&mut self, ctx: &mut FsmCtx, desc: PriorDescId) {
        let ordering = ctx.next_prior_ord();
        let prior = *ctx.prior_desc(desc);
        for state in self.final_states().collect::<Vec<_>>() {
            self.state_mut(state).out_priors.set_prior(ordering, desc, &prior);
        }
    }

    fn for_each_cond(
        &mut self,
        mut f: impl FnMut(Option<StateId>, &mut crate::action::ActionTable),
    ) {
        for state in self.state_ids() {
            for id in self.state(state).out_list().to_vec() {
                for cond in self.trans_mut(id).conds.iter_mut() {
                    f(cond.target, &mut cond.actions);
                }
            }
        }
    }
}
