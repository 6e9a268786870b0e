use fsm_compiler::{FsmAp, FsmCtx, Key, MinimizeLevel, MinimizeOpt};
use fsm_runtime::execute;

use crate::pattern::{compile, keys};

#[test]
fn should_accept_any_word_with_a_starred_range() {
    let mut ctx = FsmCtx::default();
    let fsm = FsmAp::range_fsm(b'a' as Key, b'z' as Key)
        .star_op(&mut ctx)
        .unwrap();

    for (test_case, input) in ["hello", ""].into_iter().enumerate() {
        assert_eq!(
            (test_case, true),
            (test_case, fsm.simulate(&ctx, &keys(input), |_| false).accepted)
        );
    }
}

#[test]
fn should_minimize_shared_prefix_union_to_three_states() {
    for opt in [
        MinimizeOpt::Approximate,
        MinimizeOpt::Stable,
        MinimizeOpt::Partition1,
        MinimizeOpt::Partition2,
    ] {
        let mut ctx = FsmCtx::default()
            .with_minimize_level(MinimizeLevel::None)
            .with_minimize_opt(opt);
        let mut fsm = FsmAp::concat_fsm(&keys("ab"))
            .union_op(&mut ctx, FsmAp::concat_fsm(&keys("ac")))
            .unwrap();
        fsm.minimize(&ctx);
        fsm.verify_integrity();

        assert_eq!((opt, 3), (opt, fsm.state_count()));
        for (input, expected) in [("ab", true), ("ac", true), ("a", false), ("abc", false)] {
            assert_eq!(
                (opt, input, expected),
                (
                    opt,
                    input,
                    fsm.simulate(&ctx, &keys(input), |_| false).accepted
                )
            );
        }
    }
}

#[test]
fn should_keep_both_actions_when_crossing_equal_priorities() {
    let mut ctx = FsmCtx::default();
    let first = ctx.new_action("first");
    let second = ctx.new_action("second");

    let mut left = FsmAp::concat_fsm(&keys("a"));
    left.all_trans_action(&mut ctx, first);
    let mut right = FsmAp::concat_fsm(&keys("a"));
    right.all_trans_action(&mut ctx, second);

    let fsm = left.union_op(&mut ctx, right).unwrap();
    let start = fsm.start_state().unwrap();
    let trans: Vec<_> = fsm.out_trans(start).collect();

    assert_eq!(1, trans.len());
    let actions: Vec<_> = trans[0].conds[0].actions.actions().collect();
    assert_eq!(vec![first, second], actions);
}

#[test]
fn should_intern_equal_condition_sets_once() {
    let mut ctx = FsmCtx::default();
    let even = ctx.new_condition("even");
    let odd = ctx.new_condition("odd");

    let first = ctx.cond_spaces_mut().intern([even, odd]);
    let second = ctx.cond_spaces_mut().intern([odd, even, odd]);
    assert_eq!(first, second);

    let left = FsmAp::guarded_condition_fsm(&mut ctx, 0, 9, even, true).unwrap();
    let right = FsmAp::guarded_condition_fsm(&mut ctx, 20, 29, even, false).unwrap();
    let space_of = |fsm: &FsmAp| {
        let start = fsm.start_state().unwrap();
        fsm.out_trans(start).next().and_then(|trans| trans.cond_space)
    };
    assert_eq!(space_of(&left), space_of(&right));
    assert_eq!(2, ctx.cond_spaces().len());
}

#[test]
fn should_execute_nfa_unions_like_the_graph() {
    let mut ctx = FsmCtx::default();
    let machines = ["ab*", "a[a-c]c", "b|c+"]
        .into_iter()
        .map(|pattern| compile(&mut ctx, pattern).unwrap())
        .collect();
    let mut fsm = FsmAp::nfa_union_op(&mut ctx, machines).unwrap();

    let inputs = ["a", "abbb", "acc", "abc", "ccc", "b", "bb", ""];
    let expected: Vec<_> = inputs
        .iter()
        .map(|input| fsm.simulate(&ctx, &keys(input), |_| false))
        .collect();

    fsm.prepare_reduction(&ctx);
    let red = fsm.reduce(&ctx).unwrap();
    assert!(red.states.iter().any(|state| !state.nfa_targets.is_empty()));

    for (test_case, (input, expected)) in inputs.iter().zip(expected).enumerate() {
        assert_eq!(
            (test_case, expected),
            (test_case, execute(&red, &keys(input), |_| false))
        );
    }
}

#[test]
fn should_run_conditions_through_reduced_tables() {
    let mut ctx = FsmCtx::default();
    let flag = ctx.new_condition("flag");
    let hit = ctx.new_action("hit");

    let mut guarded = FsmAp::guarded_condition_fsm(&mut ctx, b'a' as Key, b'a' as Key, flag, true)
        .unwrap()
        .plus_op(&mut ctx)
        .unwrap();
    guarded.finish_fsm_action(&mut ctx, hit);
    let mut fsm = guarded
        .union_op(&mut ctx, FsmAp::concat_fsm(&keys("b")))
        .unwrap();
    fsm.prepare_reduction(&ctx);
    let red = fsm.reduce(&ctx).unwrap();

    for (test_case, (input, flag_set, accepted)) in [
        ("aa", true, true),
        ("aa", false, false),
        ("b", false, true),
        ("ab", true, false),
    ]
    .into_iter()
    .enumerate()
    {
        let res = execute(&red, &keys(input), |cond| flag_set && cond == flag.as_u32());
        assert_eq!((test_case, accepted), (test_case, res.accepted));
        if accepted && flag_set {
            assert_eq!(vec![hit.as_u32(); input.len()], res.actions);
        }
    }
}
