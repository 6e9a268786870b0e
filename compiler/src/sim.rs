//! Direct simulation of a graph on an input sequence.
//!
//! Mirrors [`fsm_runtime::execute`] step for step so that a machine can be
//! checked against its reduced table form.

use fsm_runtime::Execution;
use rustc_hash::FxHashSet;

use crate::action::{ActionId, ActionTable};
use crate::condspace::{CondKey, CondSpaceId};
use crate::ctx::FsmCtx;
use crate::graph::{CondAp, FsmAp, StateId};
use crate::keyops::Key;

#[derive(Debug, Clone)]
struct Thread {
    state: StateId,
    pos: usize,
    actions: Vec<u32>,
    /// Set once the NFA alternatives of `state` have been queued.
    branched: bool,
}

fn extend_with(actions: &mut Vec<u32>, table: &ActionTable) {
    actions.extend(table.actions().map(|action| action.as_u32()));
}

impl FsmAp {
    /// Runs the machine over `input`, evaluating condition tests with
    /// `cond_eval`.
    ///
    /// On every key the from-state actions of the current state run, then the
    /// transition's actions, then the to-state actions of its target. A key
    /// without a transition, or a transition to the error state, runs the
    /// state's error actions and rejects. At the end of input the EOF actions
    /// run, plus the pending out actions of a final state, and the input is
    /// accepted if the state is final. A key outside the alphabet rejects
    /// without running any actions.
    ///
    /// NFA alternatives are explored depth first in order with backtracking;
    /// a state that also has transitions of its own tries them last. The
    /// first thread to accept wins. A rejected run reports the actions of the
    /// last thread to fail.
    pub fn simulate<F>(&self, ctx: &FsmCtx, input: &[Key], mut cond_eval: F) -> Execution
    where
        F: FnMut(u32) -> bool,
    {
        let Some(start) = self.start_state() else {
            return Execution::default();
        };

        let mut visited = FxHashSet::default();
        let mut failed = Vec::new();
        let mut stack = vec![Thread {
            state: start,
            pos: 0,
            actions: Vec::new(),
            branched: false,
        }];

        while let Some(mut thread) = stack.pop() {
            let st = self.state(thread.state);

            if !thread.branched {
                // a later thread reaching the same point cannot fare better
                if !visited.insert((thread.state, thread.pos)) {
                    continue;
                }
                if !st.nfa_out().is_empty() {
                    stack.push(Thread {
                        branched: true,
                        ..thread.clone()
                    });
                    for id in st.nfa_out().iter().rev() {
                        let nfa = self.nfa_trans(*id);
                        let mut actions = thread.actions.clone();
                        extend_with(&mut actions, &nfa.push_actions);
                        stack.push(Thread {
                            state: nfa.target,
                            pos: thread.pos,
                            actions,
                            branched: false,
                        });
                    }
                    continue;
                }
            }

            if thread.pos == input.len() {
                let mut eof = st.eof_actions.clone();
                if st.is_final() {
                    eof.set_actions(&st.out_actions);
                }
                extend_with(&mut thread.actions, &eof);
                if st.is_final() {
                    return Execution {
                        accepted: true,
                        actions: thread.actions,
                    };
                }
                failed = thread.actions;
                continue;
            }

            let key = input[thread.pos];
            if !ctx.keyops().contains(key) {
                failed = thread.actions;
                continue;
            }

            extend_with(&mut thread.actions, &st.from_state_actions);
            match self.lookup(ctx, thread.state, key, &mut cond_eval) {
                Some(CondAp {
                    target: Some(target),
                    actions,
                    ..
                }) => {
                    extend_with(&mut thread.actions, actions);
                    extend_with(&mut thread.actions, &self.state(*target).to_state_actions);
                    stack.push(Thread {
                        state: *target,
                        pos: thread.pos + 1,
                        actions: thread.actions,
                        branched: false,
                    });
                }
                Some(CondAp {
                    target: None,
                    actions,
                    ..
                }) => {
                    let mut table = actions.clone();
                    table.set_actions(&st.error_actions);
                    extend_with(&mut thread.actions, &table);
                    failed = thread.actions;
                }
                None => {
                    extend_with(&mut thread.actions, &st.error_actions);
                    failed = thread.actions;
                }
            }
        }

        Execution {
            accepted: false,
            actions: failed,
        }
    }

    fn lookup<F>(&self, ctx: &FsmCtx, state: StateId, key: Key, cond_eval: &mut F) -> Option<&CondAp>
    where
        F: FnMut(u32) -> bool,
    {
        let trans = self.trans(self.find_trans(state, key)?);
        let cond_key = eval_cond_key(ctx, trans.cond_space, cond_eval);
        trans.cond(cond_key)
    }
}

fn eval_cond_key<F>(ctx: &FsmCtx, space: Option<CondSpaceId>, cond_eval: &mut F) -> CondKey
where
    F: FnMut(u32) -> bool,
{
    let Some(space) = space else {
        return 0;
    };
    ctx.cond_spaces()
        .get(space)
        .conds()
        .iter()
        .map(ActionId::as_u32)
        .enumerate()
        .fold(0, |key, (bit, cond)| {
            if cond_eval(cond) {
                key | (1 << bit)
            } else {
                key
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_run_state_actions_around_transitions() {
        let mut ctx = FsmCtx::default();
        let from = ctx.new_action("from");
        let to = ctx.new_action("to");
        let eof = ctx.new_action("eof");

        let mut fsm = FsmAp::concat_fsm(&[1]);
        fsm.from_state_action(&mut ctx, from);
        fsm.to_state_action(&mut ctx, to);
        fsm.eof_action(&mut ctx, eof);

        let res = fsm.simulate(&ctx, &[1], |_| false);
        assert!(res.accepted);
        assert_eq!(vec![from.as_u32(), to.as_u32(), eof.as_u32()], res.actions);
    }

    #[test]
    fn should_reject_keys_outside_the_alphabet_without_actions() {
        let mut ctx = FsmCtx::default();
        let from = ctx.new_action("from");
        let err = ctx.new_action("err");

        let mut fsm = FsmAp::any_fsm(&ctx);
        fsm.from_state_action(&mut ctx, from);
        fsm.error_action(&mut ctx, err);

        let res = fsm.simulate(&ctx, &[1000], |_| false);
        assert!(!res.accepted);
        assert!(res.actions.is_empty());

        let res = fsm.simulate(&ctx, &[1, 1000], |_| false);
        assert!(!res.accepted);
        assert_eq!(vec![from.as_u32()], res.actions);
    }

    #[test]
    fn should_reject_empty_machines() {
        let ctx = FsmCtx::default();

        assert!(!FsmAp::new().simulate(&ctx, &[], |_| true).accepted);
        assert!(!FsmAp::empty_fsm().simulate(&ctx, &[0], |_| true).accepted);
    }

    #[test]
    fn should_backtrack_out_of_failed_alternatives() {
        let mut ctx = FsmCtx::default();
        let fsm = FsmAp::nfa_union_op(
            &mut ctx,
            vec![FsmAp::concat_fsm(&[1, 2]), FsmAp::concat_fsm(&[1, 3])],
        )
        .unwrap();

        assert!(fsm.simulate(&ctx, &[1, 3], |_| false).accepted);
        assert!(!fsm.simulate(&ctx, &[1, 4], |_| false).accepted);
    }
}
