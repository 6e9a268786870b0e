//! The reduced, table-shaped form of a state machine and an executor for it.
//!
//! A [`RedFsm`] is produced by the compiler once a machine is complete. States
//! are numbered densely, transitions and action tables are shared between the
//! states that use them, and every reference is an index into one of the
//! machine's pools. The layout is meant to be walked directly by a code
//! generator, but [`execute`] runs it as-is.

use std::fmt::Display;

mod sparse_set;
use sparse_set::SparseSet;

/// An input symbol.
pub type Key = i64;

/// Offset of an action table within [`RedFsm::action_array`].
pub type ActionLoc = usize;

/// A transition target for one condition outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedCondEntry {
    /// The outcome of the condition tests, bit `i` set when condition `i` of
    /// the transition's space held.
    pub key: u64,
    pub target: usize,
    pub actions: Option<ActionLoc>,
}

/// A shared transition. Plain transitions carry a single entry at key 0 and
/// no condition space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedTrans {
    pub cond_space: Option<usize>,
    /// Entries ordered by key.
    pub entries: Vec<RedCondEntry>,
}

impl RedTrans {
    /// Returns the entry for a condition outcome.
    pub fn entry(&self, key: u64) -> Option<&RedCondEntry> {
        self.entries
            .binary_search_by_key(&key, |entry| entry.key)
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

/// A key matched on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedSingle {
    pub key: Key,
    pub trans: usize,
}

/// An inclusive key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedRange {
    pub low: Key,
    pub high: Key,
    pub trans: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedNfaTarget {
    pub target: usize,
    pub order: i32,
    pub push_actions: Option<ActionLoc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedState {
    pub id: usize,
    pub final_state: bool,
    /// Sorted by key. Consulted before the ranges, which may run underneath
    /// a single.
    pub singles: Vec<RedSingle>,
    /// Sorted and non-overlapping.
    pub ranges: Vec<RedRange>,
    /// Taken by any key matched by neither a single nor a range.
    pub default: Option<usize>,
    pub to_state_actions: Option<ActionLoc>,
    pub from_state_actions: Option<ActionLoc>,
    pub eof_actions: Option<ActionLoc>,
    /// Alternatives tried in order before the state's own transitions.
    pub nfa_targets: Vec<RedNfaTarget>,
}

impl RedState {
    /// Looks up the transition taken on `key`: singles first, then ranges,
    /// then the default.
    pub fn find_trans(&self, key: Key) -> Option<usize> {
        if let Ok(idx) = self.singles.binary_search_by_key(&key, |single| single.key) {
            return Some(self.singles[idx].trans);
        }

        let idx = self.ranges.partition_point(|range| range.high < key);
        match self.ranges.get(idx) {
            Some(range) if range.low <= key => Some(range.trans),
            _ => self.default,
        }
    }
}

/// A machine reduced to tables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedFsm {
    /// States numbered in depth-first order from the start state, with final
    /// states moved to the end.
    pub states: Vec<RedState>,
    pub transitions: Vec<RedTrans>,
    /// Condition ids tested by each space, in bit order.
    pub cond_spaces: Vec<Vec<u32>>,
    /// Action tables flattened as a length followed by the action ids.
    pub action_array: Vec<u32>,
    /// Offsets of each distinct table in `action_array`.
    pub action_tables: Vec<ActionLoc>,
    pub action_names: Vec<String>,
    /// The number of times each action is referenced from a table use.
    pub action_refs: Vec<usize>,
    pub start: usize,
    /// The lowest final state id, or the state count when no state is
    /// final. With final sorting every state at or above it is final.
    pub first_final: usize,
    pub error_state: Option<usize>,
    pub entry_points: Vec<(u32, usize)>,
    pub key_min: Key,
    pub key_max: Key,
}

impl RedFsm {
    /// Returns the actions of the table stored at `loc`.
    pub fn actions_at(&self, loc: ActionLoc) -> &[u32] {
        let len = self.action_array[loc] as usize;
        &self.action_array[loc + 1..loc + 1 + len]
    }

    fn actions_of(&self, loc: Option<ActionLoc>) -> &[u32] {
        loc.map(|loc| self.actions_at(loc)).unwrap_or(&[])
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn is_final(&self, state: usize) -> bool {
        self.states[state].final_state
    }

    fn action_name(&self, action: u32) -> &str {
        self.action_names
            .get(action as usize)
            .map(String::as_str)
            .unwrap_or("?")
    }

    fn fmt_actions(&self, loc: Option<ActionLoc>) -> String {
        self.actions_of(loc)
            .iter()
            .map(|&action| self.action_name(action))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Display for RedFsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "start: {}, first final: {}, error: {}",
            self.start,
            self.first_final,
            self.error_state
                .map(|state| state.to_string())
                .unwrap_or_else(|| "none".to_string())
        )?;

        for state in self.states.iter() {
            let fin = if state.final_state { " final" } else { "" };
            writeln!(f, "{:04}:{}", state.id, fin)?;
            for single in state.singles.iter() {
                writeln!(f, "  {} -> t{:04}", single.key, single.trans)?;
            }
            for range in state.ranges.iter() {
                writeln!(f, "  {}..={} -> t{:04}", range.low, range.high, range.trans)?;
            }
            if let Some(default) = state.default {
                writeln!(f, "  default -> t{:04}", default)?;
            }
            for nfa in state.nfa_targets.iter() {
                writeln!(
                    f,
                    "  nfa({}) -> {:04} [{}]",
                    nfa.order,
                    nfa.target,
                    self.fmt_actions(nfa.push_actions)
                )?;
            }
            for (name, loc) in [
                ("to", state.to_state_actions),
                ("from", state.from_state_actions),
                ("eof", state.eof_actions),
            ] {
                if loc.is_some() {
                    writeln!(f, "  {}: [{}]", name, self.fmt_actions(loc))?;
                }
            }
        }

        for (idx, trans) in self.transitions.iter().enumerate() {
            for entry in trans.entries.iter() {
                let space = trans
                    .cond_space
                    .map(|space| format!("c{}:{} ", space, entry.key))
                    .unwrap_or_default();
                writeln!(
                    f,
                    "t{:04}: {}-> {:04} [{}]",
                    idx,
                    space,
                    entry.target,
                    self.fmt_actions(entry.actions)
                )?;
            }
        }

        Ok(())
    }
}

/// The outcome of running a machine over an input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Execution {
    pub accepted: bool,
    /// Action ids in the order they ran. For a rejected input these are the
    /// actions of the last path tried.
    pub actions: Vec<u32>,
}

#[derive(Debug, Clone)]
struct Thread {
    state: usize,
    pos: usize,
    actions: Vec<u32>,
    branched: bool,
}

fn cond_key<F>(red: &RedFsm, space: Option<usize>, cond_eval: &mut F) -> u64
where
    F: FnMut(u32) -> bool,
{
    let Some(conds) = space.and_then(|space| red.cond_spaces.get(space)) else {
        return 0;
    };

    conds
        .iter()
        .enumerate()
        .fold(0, |key, (bit, &cond)| {
            if cond_eval(cond) {
                key | (1 << bit)
            } else {
                key
            }
        })
}

/// Runs a reduced machine over `input`, evaluating condition tests with
/// `cond_eval`.
///
/// On every key the from-state actions of the current state run, then the
/// transition's actions, then the to-state actions of its target. Entering
/// the error state, or a key with no transition, rejects. A key outside
/// `key_min..=key_max` rejects without running any actions. At the end of
/// input the state's EOF actions run and the input is accepted if the state
/// is final.
///
/// NFA alternatives are explored depth first in order, backtracking on
/// failure. The first thread to accept wins.
///
/// # Example
///
/// ```
/// use fsm_runtime::*;
///
/// // 0 --'a'--> 1 (final)
/// let red = RedFsm {
///     states: vec![
///         RedState {
///             id: 0,
///             singles: vec![RedSingle { key: 97, trans: 0 }],
///             ..Default::default()
///         },
///         RedState {
///             id: 1,
///             final_state: true,
///             ..Default::default()
///         },
///     ],
///     transitions: vec![RedTrans {
///         cond_space: None,
///         entries: vec![RedCondEntry { key: 0, target: 1, actions: None }],
///     }],
///     first_final: 1,
///     key_max: 127,
///     ..Default::default()
/// };
///
/// assert!(execute(&red, &[97], |_| false).accepted);
/// assert!(!execute(&red, &[98], |_| false).accepted);
/// ```
pub fn execute<F>(red: &RedFsm, input: &[Key], mut cond_eval: F) -> Execution
where
    F: FnMut(u32) -> bool,
{
    if red.states.is_empty() {
        return Execution::default();
    }

    let state_cnt = red.states.len();
    let mut visited = SparseSet::new(state_cnt * (input.len() + 1));
    let mut failed = Vec::new();
    let mut stack = vec![Thread {
        state: red.start,
        pos: 0,
        actions: Vec::new(),
        branched: false,
    }];

    while let Some(mut thread) = stack.pop() {
        let st = &red.states[thread.state];

        if !thread.branched {
            if !visited.insert(thread.pos * state_cnt + thread.state) {
                continue;
            }
            if !st.nfa_targets.is_empty() {
                stack.push(Thread {
                    branched: true,
                    ..thread.clone()
                });
                for nfa in st.nfa_targets.iter().rev() {
                    let mut actions = thread.actions.clone();
                    actions.extend_from_slice(red.actions_of(nfa.push_actions));
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
            thread
                .actions
                .extend_from_slice(red.actions_of(st.eof_actions));
            if st.final_state {
                return Execution {
                    accepted: true,
                    actions: thread.actions,
                };
            }
            failed = thread.actions;
            continue;
        }

        let key = input[thread.pos];
        if key < red.key_min || key > red.key_max {
            failed = thread.actions;
            continue;
        }

        thread
            .actions
            .extend_from_slice(red.actions_of(st.from_state_actions));

        let entry = st.find_trans(key).and_then(|trans| {
            let trans = &red.transitions[trans];
            trans.entry(cond_key(red, trans.cond_space, &mut cond_eval))
        });

        match entry {
            Some(entry) if Some(entry.target) == red.error_state => {
                thread
                    .actions
                    .extend_from_slice(red.actions_of(entry.actions));
                failed = thread.actions;
            }
            Some(entry) => {
                thread
                    .actions
                    .extend_from_slice(red.actions_of(entry.actions));
                thread
                    .actions
                    .extend_from_slice(red.actions_of(red.states[entry.target].to_state_actions));
                stack.push(Thread {
                    state: entry.target,
                    pos: thread.pos + 1,
                    actions: thread.actions,
                    branched: false,
                });
            }
            None => failed = thread.actions,
        }
    }

    Execution {
        accepted: false,
        actions: failed,
    }
}
