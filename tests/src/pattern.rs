//! A small flat pattern language used to build machines in tests.
//!
//! A pattern is a `|`-separated list of alternatives, each a sequence of
//! items: a literal character, `.` for any key, or a `[...]` class of
//! characters and `a-z` ranges, optionally negated with `^`. Any item may
//! be followed by `*`, `+`, `?`, `{n}`, `{n,}` or `{n,m}`.

use fsm_compiler::{FsmAp, FsmCtx, FsmError, Key};
use parcel::parsers::character::{digit, expect_character};
use parcel::prelude::v1::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Char(char),
    Any,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    ZeroOrMore,
    OneOrMore,
    ZeroOrOne,
    Exact(u32),
    AtLeast(u32),
    Between(u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub item: Item,
    pub quantifier: Option<Quantifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern(pub Vec<Vec<Term>>);

#[derive(PartialEq)]
pub enum ParseErr {
    InvalidPattern,
    Undefined(String),
}

impl std::fmt::Debug for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined(err) => write!(f, "undefined parse error: {}", err),
            Self::InvalidPattern => write!(f, "provided pattern is invalid",),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum CompileErr {
    Parse(ParseErr),
    Fsm(FsmError),
}

impl From<ParseErr> for CompileErr {
    fn from(err: ParseErr) -> Self {
        Self::Parse(err)
    }
}

impl From<FsmError> for CompileErr {
    fn from(err: FsmError) -> Self {
        Self::Fsm(err)
    }
}

/// Converts a string into the keys of a byte alphabet.
pub fn keys(input: &str) -> Vec<Key> {
    input.bytes().map(Key::from).collect()
}

/// Parses and builds a pattern in one step.
pub fn compile(ctx: &mut FsmCtx, pattern: &str) -> Result<FsmAp, CompileErr> {
    let input = pattern.chars().enumerate().collect::<Vec<(usize, char)>>();
    let pattern = parse(&input)?;
    Ok(build(ctx, &pattern)?)
}

pub fn parse(input: &[(usize, char)]) -> Result<Pattern, ParseErr> {
    pattern()
        .parse(input)
        .map_err(|err| ParseErr::Undefined(format!("unspecified parse error occured: {}", err)))
        .and_then(|ms| match ms {
            MatchStatus::Match {
                inner, remainder, ..
            } if remainder.is_empty() => Ok(inner),
            _ => Err(ParseErr::InvalidPattern),
        })
}

fn pattern<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], Pattern> {
    parcel::join(
        sequence(),
        parcel::zero_or_more(parcel::right(parcel::join(
            expect_character('|'),
            sequence(),
        ))),
    )
    .map(|(head, tail)| Pattern(vec![head].into_iter().chain(tail).collect()))
}

fn sequence<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], Vec<Term>> {
    parcel::one_or_more(term())
}

fn term<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], Term> {
    parcel::join(item(), parcel::optional(quantifier()))
        .map(|(item, quantifier)| Term { item, quantifier })
}

// Items

fn item<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], Item> {
    parcel::or(class(), || {
        parcel::or(expect_character('.').map(|_| Item::Any), || {
            parcel::or(escaped_character(), || {
                character().predicate(|c| !"|*+?{}[].".contains(*c))
            })
            .map(Item::Char)
        })
    })
}

fn class<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], Item> {
    parcel::join(
        parcel::right(parcel::join(
            expect_character('['),
            parcel::optional(expect_character('^')).map(|negation| negation.is_some()),
        )),
        parcel::left(parcel::join(
            parcel::one_or_more(class_item()),
            expect_character(']'),
        )),
    )
    .map(|(negated, ranges)| Item::Class { negated, ranges })
}

fn class_item<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], (char, char)> {
    parcel::or(
        parcel::join(
            class_char(),
            parcel::right(parcel::join(expect_character('-'), class_char())),
        ),
        || class_char().map(|c| (c, c)),
    )
}

fn class_char<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], char> {
    parcel::or(escaped_character(), || character().predicate(|c| *c != ']'))
}

// Quantifiers

fn quantifier<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], Quantifier> {
    parcel::or(expect_character('*').map(|_| Quantifier::ZeroOrMore), || {
        parcel::or(expect_character('+').map(|_| Quantifier::OneOrMore), || {
            parcel::or(expect_character('?').map(|_| Quantifier::ZeroOrOne), || {
                range_quantifier()
            })
        })
    })
}

fn range_quantifier<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], Quantifier> {
    parcel::left(parcel::join(
        parcel::right(parcel::join(
            expect_character('{'),
            parcel::join(
                integer(),
                parcel::optional(parcel::right(parcel::join(
                    expect_character(','),
                    parcel::optional(integer()),
                ))),
            ),
        )),
        expect_character('}'),
    ))
    .map(|(min, upper)| match upper {
        None => Quantifier::Exact(min),
        Some(None) => Quantifier::AtLeast(min),
        Some(Some(max)) => Quantifier::Between(min, max),
    })
}

// Terminals

fn integer<'a>() -> impl parcel::Parser<'a, &'a [(usize, char)], u32> {
    parcel::one_or_more(digit(10)).map(|digits| {
        digits.into_iter().fold(0u32, |acc, d| {
            acc.saturating_mul(10)
                .saturating_add(d.to_digit(10).unwrap_or(0))
        })
    })
}

/// Matches a backslash followed by any character, which is then taken
/// literally.
fn escaped_character<'a>() -> impl Parser<'a, &'a [(usize, char)], char> {
    move |input: &'a [(usize, char)]| match input.get(0..2) {
        Some(&[(escape_pos, '\\'), (to_escape_pos, to_escape)]) => Ok(MatchStatus::Match {
            span: escape_pos..to_escape_pos + 1,
            remainder: &input[2..],
            inner: char_to_escaped_equivalent(to_escape),
        }),
        _ => Ok(MatchStatus::NoMatch(input)),
    }
}

fn character<'a>() -> impl Parser<'a, &'a [(usize, char)], char> {
    move |input: &'a [(usize, char)]| match input.get(0..1) {
        Some(&[(next_pos, next)]) if next != '\\' => Ok(MatchStatus::Match {
            span: next_pos..next_pos + 1,
            remainder: &input[1..],
            inner: next,
        }),
        _ => Ok(MatchStatus::NoMatch(input)),
    }
}

fn char_to_escaped_equivalent(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }
}

// Construction

/// Builds the machine for a parsed pattern.
pub fn build(ctx: &mut FsmCtx, pattern: &Pattern) -> Result<FsmAp, FsmError> {
    let mut fsm: Option<FsmAp> = None;
    for sequence in pattern.0.iter() {
        let alternative = build_sequence(ctx, sequence)?;
        fsm = Some(match fsm {
            Some(fsm) => fsm.union_op(ctx, alternative)?,
            None => alternative,
        });
    }
    Ok(fsm.unwrap_or_else(FsmAp::empty_fsm))
}

fn build_sequence(ctx: &mut FsmCtx, sequence: &[Term]) -> Result<FsmAp, FsmError> {
    let mut fsm = FsmAp::lambda_fsm();
    for term in sequence {
        let item = build_item(ctx, &term.item);
        let item = match term.quantifier {
            None => item,
            Some(Quantifier::ZeroOrMore) => item.star_op(ctx)?,
            Some(Quantifier::OneOrMore) => item.plus_op(ctx)?,
            Some(Quantifier::ZeroOrOne) => item.question_op(ctx)?,
            Some(Quantifier::Exact(times)) => item.exact_repeat(ctx, times)?,
            Some(Quantifier::AtLeast(min)) => item.min_repeat(ctx, min)?,
            Some(Quantifier::Between(min, max)) => item.range_repeat(ctx, min, max)?,
        };
        fsm = fsm.concat_op(ctx, item)?;
    }
    Ok(fsm)
}

fn build_item(ctx: &FsmCtx, item: &Item) -> FsmAp {
    match item {
        Item::Char(c) => FsmAp::concat_fsm(&[Key::from(*c as u32)]),
        Item::Any => FsmAp::any_fsm(ctx),
        Item::Class { negated, ranges } => {
            let keyops = ctx.keyops();
            let mut ranges: Vec<(Key, Key)> = ranges
                .iter()
                .map(|(low, high)| (Key::from(*low as u32), Key::from(*high as u32)))
                .filter(|(low, high)| low <= high)
                .map(|(low, high)| (low.max(keyops.min_key()), high.min(keyops.max_key())))
                .filter(|(low, high)| low <= high)
                .collect();
            ranges.sort_unstable();

            let mut merged: Vec<(Key, Key)> = Vec::new();
            for (low, high) in ranges {
                match merged.last_mut() {
                    Some(last) if low <= last.1 + 1 => last.1 = last.1.max(high),
                    _ => merged.push((low, high)),
                }
            }

            if *negated {
                let mut gaps = Vec::new();
                let mut next = keyops.min_key();
                for (low, high) in merged.iter() {
                    if next < *low {
                        gaps.push((next, low - 1));
                    }
                    next = high + 1;
                }
                if next <= keyops.max_key() {
                    gaps.push((next, keyops.max_key()));
                }
                merged = gaps;
            }

            let mut fsm = FsmAp::new();
            let start = fsm.add_state();
            let end = fsm.add_state();
            fsm.set_start_state(start);
            fsm.set_fin_state(end);
            for (low, high) in merged {
                fsm.attach_new_trans(start, Some(end), low, high);
            }
            fsm
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(input: &str) -> Result<Pattern, ParseErr> {
        let input = input.chars().enumerate().collect::<Vec<(usize, char)>>();
        parse(&input)
    }

    fn plain(item: Item) -> Term {
        Term {
            item,
            quantifier: None,
        }
    }

    #[test]
    fn should_parse_alternatives_of_sequences() {
        assert_eq!(
            Ok(Pattern(vec![
                vec![plain(Item::Char('a')), plain(Item::Char('b'))],
                vec![Term {
                    item: Item::Any,
                    quantifier: Some(Quantifier::ZeroOrMore)
                }],
            ])),
            parse_str("ab|.*")
        );
    }

    #[test]
    fn should_parse_classes_and_quantifiers() {
        let inputs = [
            (
                "[^a-c_]+",
                Term {
                    item: Item::Class {
                        negated: true,
                        ranges: vec![('a', 'c'), ('_', '_')],
                    },
                    quantifier: Some(Quantifier::OneOrMore),
                },
            ),
            (
                "x{2}",
                Term {
                    item: Item::Char('x'),
                    quantifier: Some(Quantifier::Exact(2)),
                },
            ),
            (
                "x{2,}",
                Term {
                    item: Item::Char('x'),
                    quantifier: Some(Quantifier::AtLeast(2)),
                },
            ),
            (
                "x{2,12}",
                Term {
                    item: Item::Char('x'),
                    quantifier: Some(Quantifier::Between(2, 12)),
                },
            ),
            (
                "\\*?",
                Term {
                    item: Item::Char('*'),
                    quantifier: Some(Quantifier::ZeroOrOne),
                },
            ),
        ];

        for (test_case, (input, expected)) in inputs.into_iter().enumerate() {
            assert_eq!(
                (test_case, Ok(Pattern(vec![vec![expected]]))),
                (test_case, parse_str(input))
            );
        }
    }

    #[test]
    fn should_reject_malformed_patterns() {
        for (test_case, input) in ["", "a|", "*a", "[]", "a{2"].into_iter().enumerate() {
            assert!(parse_str(input).is_err(), "test case {}", test_case);
        }
    }

    #[test]
    fn should_build_matching_machines() {
        let inputs = [
            ("ab|cd", "cd", true),
            ("ab|cd", "ad", false),
            ("a[0-9]+", "a123", true),
            ("a[0-9]+", "a", false),
            ("[^a]", "b", true),
            ("[^a]", "a", false),
            ("x{2,3}", "xxx", true),
            ("x{2,3}", "xxxx", false),
            ("x{2,}", "xxxxx", true),
            (".?z", "z", true),
        ];

        for (test_case, (pattern, input, expected)) in inputs.into_iter().enumerate() {
            let mut ctx = FsmCtx::default();
            let fsm = compile(&mut ctx, pattern).unwrap();
            assert_eq!(
                (test_case, expected),
                (test_case, fsm.simulate(&ctx, &keys(input), |_| false).accepted)
            );
        }
    }
}
