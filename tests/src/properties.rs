use fsm_compiler::{FsmAp, FsmCtx, Key, KeyOps, MinimizeLevel, MinimizeOpt};
use fsm_runtime::execute;
use proptest::prelude::*;

use crate::pattern::{build, Item, Pattern, Quantifier, Term};

fn item() -> impl Strategy<Value = Item> {
    prop_oneof![
        4 => prop::sample::select(vec!['a', 'b', 'c']).prop_map(Item::Char),
        1 => Just(Item::Any),
        2 => (
            any::<bool>(),
            prop::collection::vec(
                prop::sample::select(vec![('a', 'b'), ('a', 'c'), ('b', 'c'), ('c', 'c')]),
                1..3
            )
        )
            .prop_map(|(negated, ranges)| Item::Class { negated, ranges }),
    ]
}

fn quantifier() -> impl Strategy<Value = Option<Quantifier>> {
    prop::option::of(prop_oneof![
        Just(Quantifier::ZeroOrMore),
        Just(Quantifier::OneOrMore),
        Just(Quantifier::ZeroOrOne),
        (0u32..3).prop_map(Quantifier::Exact),
        (0u32..2).prop_map(Quantifier::AtLeast),
        (0u32..2, 0u32..2).prop_map(|(min, extra)| Quantifier::Between(min, min + extra)),
    ])
}

fn pattern() -> impl Strategy<Value = Pattern> {
    let term = (item(), quantifier()).prop_map(|(item, quantifier)| Term { item, quantifier });
    prop::collection::vec(prop::collection::vec(term, 1..4), 1..3).prop_map(Pattern)
}

fn inputs() -> impl Strategy<Value = Vec<Vec<Key>>> {
    prop::collection::vec(
        prop::collection::vec(
            prop::sample::select(vec![b'a' as Key, b'b' as Key, b'c' as Key, b'x' as Key]),
            0..6,
        ),
        1..8,
    )
}

fn minimize_opt() -> impl Strategy<Value = MinimizeOpt> {
    prop::sample::select(vec![
        MinimizeOpt::Approximate,
        MinimizeOpt::Stable,
        MinimizeOpt::Partition1,
        MinimizeOpt::Partition2,
    ])
}

/// Builds the pattern without intermediate minimization and embeds actions
/// of every kind.
fn build_with_actions(ctx: &mut FsmCtx, pattern: &Pattern) -> FsmAp {
    let step = ctx.new_action("step");
    let leave = ctx.new_action("leave");
    let eof = ctx.new_action("eof");
    let err = ctx.new_action("err");

    let mut fsm = build(ctx, pattern).unwrap();
    fsm.all_trans_action(ctx, step);
    fsm.leave_fsm_action(ctx, leave);
    fsm.eof_action(ctx, eof);
    fsm.error_action(ctx, err);
    fsm
}

const LEVELS: [MinimizeLevel; 4] = [
    MinimizeLevel::None,
    MinimizeLevel::End,
    MinimizeLevel::MostOps,
    MinimizeLevel::EveryOp,
];

fn accepts(ctx: &FsmCtx, fsm: &FsmAp, input: &[Key]) -> bool {
    fsm.simulate(ctx, input, |_| false).accepted
}

/// Checks a combined machine and, at the end-only level, runs the
/// minimization the caller is expected to ask for.
fn finish(ctx: &FsmCtx, mut fsm: FsmAp) -> FsmAp {
    if ctx.minimize_level() == MinimizeLevel::End {
        fsm.minimize(ctx);
    }
    fsm.verify_integrity();
    fsm
}

/// Whether `input` splits into pieces each accepted by `fsm`, the empty
/// split included.
fn accepts_repeated(ctx: &FsmCtx, fsm: &FsmAp, input: &[Key]) -> bool {
    let mut reachable = vec![false; input.len() + 1];
    reachable[0] = true;
    for end in 1..=input.len() {
        let piece_ends_here =
            (0..end).any(|start| reachable[start] && accepts(ctx, fsm, &input[start..end]));
        reachable[end] = piece_ends_here;
    }
    reachable[input.len()]
}

fn unminimized_ctx(opt: MinimizeOpt) -> FsmCtx {
    FsmCtx::new(KeyOps::unsigned_byte())
        .with_minimize_level(MinimizeLevel::None)
        .with_minimize_opt(opt)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn minimization_preserves_accepted_language_and_actions(
        pattern in pattern(),
        opt in minimize_opt(),
        inputs in inputs(),
    ) {
        let mut ctx = unminimized_ctx(opt);
        let fsm = build_with_actions(&mut ctx, &pattern);
        let mut minimized = fsm.clone();
        minimized.minimize(&ctx);
        minimized.verify_integrity();

        prop_assert!(minimized.state_count() <= fsm.state_count());
        for input in inputs.iter() {
            let expected = fsm.simulate(&ctx, input, |_| false);
            let res = minimized.simulate(&ctx, input, |_| false);
            prop_assert_eq!(expected.accepted, res.accepted);
            if expected.accepted {
                prop_assert_eq!(expected.actions, res.actions);
            }
        }
    }

    #[test]
    fn binary_operators_agree_with_their_operands(
        left in pattern(),
        right in pattern(),
        inputs in inputs(),
    ) {
        for level in LEVELS {
            let mut ctx = FsmCtx::new(KeyOps::unsigned_byte()).with_minimize_level(level);
            let a = build(&mut ctx, &left).unwrap();
            let b = build(&mut ctx, &right).unwrap();

            let union = a.clone().union_op(&mut ctx, b.clone()).unwrap();
            let intersection = a.clone().intersect_op(&mut ctx, b.clone()).unwrap();
            let difference = a.clone().subtract_op(&mut ctx, b.clone()).unwrap();
            let concatenation = a.clone().concat_op(&mut ctx, b.clone()).unwrap();
            let [union, intersection, difference, concatenation] =
                [union, intersection, difference, concatenation].map(|fsm| finish(&ctx, fsm));

            for input in inputs.iter() {
                let (in_a, in_b) = (accepts(&ctx, &a, input), accepts(&ctx, &b, input));
                let split = (0..=input.len()).any(|at| {
                    accepts(&ctx, &a, &input[..at]) && accepts(&ctx, &b, &input[at..])
                });

                prop_assert_eq!((level, in_a || in_b), (level, accepts(&ctx, &union, input)));
                prop_assert_eq!((level, in_a && in_b), (level, accepts(&ctx, &intersection, input)));
                prop_assert_eq!((level, in_a && !in_b), (level, accepts(&ctx, &difference, input)));
                prop_assert_eq!((level, split), (level, accepts(&ctx, &concatenation, input)));
            }
        }
    }

    #[test]
    fn star_accepts_every_split_into_accepted_pieces(
        pattern in pattern(),
        inputs in inputs(),
    ) {
        for level in LEVELS {
            let mut ctx = FsmCtx::new(KeyOps::unsigned_byte()).with_minimize_level(level);
            let a = build(&mut ctx, &pattern).unwrap();
            let star = a.clone().star_op(&mut ctx).unwrap();
            let star = finish(&ctx, star);

            for input in inputs.iter() {
                prop_assert_eq!(
                    (level, accepts_repeated(&ctx, &a, input)),
                    (level, accepts(&ctx, &star, input))
                );
            }
        }
    }

    #[test]
    fn minimization_is_idempotent(pattern in pattern(), opt in minimize_opt()) {
        let mut ctx = unminimized_ctx(opt);
        let mut fsm = build_with_actions(&mut ctx, &pattern);

        fsm.minimize(&ctx);
        let once = fsm.state_count();
        fsm.minimize(&ctx);

        prop_assert_eq!(once, fsm.state_count());
    }

    #[test]
    fn out_ranges_stay_ordered_and_disjoint(pattern in pattern()) {
        let mut ctx = FsmCtx::default();
        let fsm = build_with_actions(&mut ctx, &pattern);

        for state in fsm.state_ids() {
            let ranges = fsm.out_ranges(state);
            prop_assert!(ranges.iter().all(|(low, high)| low <= high));
            prop_assert!(ranges.windows(2).all(|pair| pair[0].1 < pair[1].0));
        }
    }

    #[test]
    fn reduced_tables_execute_like_the_graph(
        pattern in pattern(),
        goto_defaults in any::<bool>(),
        inputs in inputs(),
    ) {
        let choice = if goto_defaults {
            fsm_compiler::DefaultChoice::Goto
        } else {
            fsm_compiler::DefaultChoice::Span
        };
        let mut ctx = FsmCtx::default().with_default_choice(choice);
        let mut fsm = build_with_actions(&mut ctx, &pattern);
        let expected: Vec<_> = inputs
            .iter()
            .map(|input| fsm.simulate(&ctx, input, |_| false))
            .collect();

        fsm.prepare_reduction(&ctx);
        let red = fsm.reduce(&ctx).unwrap();

        for (input, expected) in inputs.iter().zip(expected) {
            prop_assert_eq!(expected, execute(&red, input, |_| false));
        }
    }

    #[test]
    fn defaults_only_complete_a_covered_alphabet(pattern in pattern()) {
        let mut ctx = FsmCtx::default();
        let mut fsm = build_with_actions(&mut ctx, &pattern);
        fsm.prepare_reduction(&ctx);
        let red = fsm.reduce(&ctx).unwrap();
        let keyops = ctx.keyops();

        for state in red.states.iter().filter(|state| state.default.is_some()) {
            for key in keyops.min_key()..=keyops.max_key() {
                prop_assert!(state.find_trans(key).is_some());
            }

            // singles may sit inside a joined range, so count keys rather
            // than spans.
            let explicit = (keyops.min_key()..=keyops.max_key())
                .filter(|key| {
                    state.singles.iter().any(|single| single.key == *key)
                        || state
                            .ranges
                            .iter()
                            .any(|range| range.low <= *key && *key <= range.high)
                })
                .count() as u64;
            prop_assert!(explicit < keyops.alphabet_size());
        }
    }
}
