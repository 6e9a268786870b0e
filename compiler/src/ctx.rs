//! The compile context shared by every operation on one family of machines.
//!
//! It owns the registries for actions, priority descriptors and condition
//! spaces, hands out embedding orderings, and carries the options that steer
//! construction, minimization and reduction.

use crate::action::{Action, ActionId, PriorDesc, PriorDescId};
use crate::condspace::{CondSpaceMap, MAX_SPACE_CONDS};
use crate::keyops::KeyOps;

/// When minimization runs during construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinimizeLevel {
    /// Never minimize automatically.
    None,
    /// Only when the caller asks for it at the end.
    End,
    /// After operators that tend to produce redundant states.
    #[default]
    MostOps,
    /// After every operator.
    EveryOp,
}

/// Which minimization algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinimizeOpt {
    /// Fuse states with identical signatures and targets until nothing
    /// changes. Fast but misses equivalences that run through cycles.
    Approximate,
    /// Pairwise marking over a state-pair table.
    Stable,
    /// Partition refinement, re-checking every partition each round.
    Partition1,
    /// Partition refinement driven by a worklist of affected partitions.
    #[default]
    Partition2,
}

/// How the reducer picks a state's default transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultChoice {
    /// The transition covering the most symbols.
    #[default]
    Span,
    /// The transition leading to the next state in numbering order, falling
    /// back to the widest one.
    Goto,
}

#[derive(Debug)]
pub struct FsmCtx {
    keyops: KeyOps,
    actions: Vec<Action>,
    prior_descs: Vec<PriorDesc>,
    cond_spaces: CondSpaceMap,

    cur_action_ord: i32,
    cur_prior_ord: i32,
    next_prior_key: u32,
    next_guard_id: u32,

    state_limit: usize,
    minimize_level: MinimizeLevel,
    minimize_opt: MinimizeOpt,
    check_prior_interaction: bool,
    cond_limit: usize,
    default_choice: DefaultChoice,
    sort_by_final: bool,
    misfit_accounting: bool,
}

impl FsmCtx {
    pub fn new(keyops: KeyOps) -> Self {
        Self {
            keyops,
            actions: Vec::new(),
            prior_descs: Vec::new(),
            cond_spaces: CondSpaceMap::new(),
            cur_action_ord: 0,
            cur_prior_ord: 0,
            next_prior_key: 0,
            next_guard_id: 0,
            state_limit: 0,
            minimize_level: MinimizeLevel::default(),
            minimize_opt: MinimizeOpt::default(),
            check_prior_interaction: false,
            cond_limit: 16,
            default_choice: DefaultChoice::default(),
            sort_by_final: true,
            misfit_accounting: true,
        }
    }

    /// Caps the number of states subset construction may reach. Zero means
    /// unlimited.
    pub fn with_state_limit(mut self, state_limit: usize) -> Self {
        self.state_limit = state_limit;
        self
    }

    pub fn with_minimize_level(mut self, minimize_level: MinimizeLevel) -> Self {
        self.minimize_level = minimize_level;
        self
    }

    pub fn with_minimize_opt(mut self, minimize_opt: MinimizeOpt) -> Self {
        self.minimize_opt = minimize_opt;
        self
    }

    pub fn with_check_prior_interaction(mut self, check: bool) -> Self {
        self.check_prior_interaction = check;
        self
    }

    /// Caps the number of tests a single condition space may hold. The cap
    /// never exceeds [`MAX_SPACE_CONDS`].
    pub fn with_cond_limit(mut self, cond_limit: usize) -> Self {
        self.cond_limit = cond_limit.min(MAX_SPACE_CONDS);
        self
    }

    pub fn with_default_choice(mut self, default_choice: DefaultChoice) -> Self {
        self.default_choice = default_choice;
        self
    }

    pub fn with_sort_by_final(mut self, sort_by_final: bool) -> Self {
        self.sort_by_final = sort_by_final;
        self
    }

    pub fn with_misfit_accounting(mut self, misfit_accounting: bool) -> Self {
        self.misfit_accounting = misfit_accounting;
        self
    }

    pub fn keyops(&self) -> &KeyOps {
        &self.keyops
    }

    pub fn state_limit(&self) -> usize {
        self.state_limit
    }

    pub fn minimize_level(&self) -> MinimizeLevel {
        self.minimize_level
    }

    pub fn minimize_opt(&self) -> MinimizeOpt {
        self.minimize_opt
    }

    pub fn check_prior_interaction(&self) -> bool {
        self.check_prior_interaction
    }

    pub fn cond_limit(&self) -> usize {
        self.cond_limit
    }

    pub fn default_choice(&self) -> DefaultChoice {
        self.default_choice
    }

    pub fn sort_by_final(&self) -> bool {
        self.sort_by_final
    }

    pub fn misfit_accounting(&self) -> bool {
        self.misfit_accounting
    }

    /// Registers an action of transition code.
    pub fn new_action(&mut self, name: impl Into<String>) -> ActionId {
        self.push_action(name.into(), false)
    }

    /// Registers a boolean test usable in condition spaces.
    pub fn new_condition(&mut self, name: impl Into<String>) -> ActionId {
        self.push_action(name.into(), true)
    }

    fn push_action(&mut self, name: String, condition: bool) -> ActionId {
        let id = ActionId::from(self.actions.len() as u32);
        self.actions.push(Action::new(id, name, condition));
        id
    }

    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id.as_usize()]
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Allocates a fresh priority namespace.
    pub fn new_prior_key(&mut self) -> u32 {
        let key = self.next_prior_key;
        self.next_prior_key += 1;
        key
    }

    pub fn new_prior_desc(&mut self, key: u32, priority: i32) -> PriorDescId {
        self.push_prior_desc(PriorDesc {
            key,
            priority,
            guard: None,
        })
    }

    /// Registers a priority whose silent loss to an unprioritized transition
    /// is reported as an error when interaction checking is enabled. Returns
    /// the descriptor and its guard id.
    pub fn new_guarded_prior_desc(&mut self, key: u32, priority: i32) -> (PriorDescId, u32) {
        let guard = self.next_guard_id;
        self.next_guard_id += 1;
        let id = self.push_prior_desc(PriorDesc {
            key,
            priority,
            guard: Some(guard),
        });
        (id, guard)
    }

    fn push_prior_desc(&mut self, desc: PriorDesc) -> PriorDescId {
        let id = PriorDescId::from(self.prior_descs.len() as u32);
        self.prior_descs.push(desc);
        id
    }

    pub fn prior_desc(&self, id: PriorDescId) -> &PriorDesc {
        &self.prior_descs[id.as_usize()]
    }

    /// Returns the next action ordering. Later embeddings run later.
    pub fn next_action_ord(&mut self) -> i32 {
        let ord = self.cur_action_ord;
        self.cur_action_ord += 1;
        ord
    }

    pub fn next_prior_ord(&mut self) -> i32 {
        let ord = self.cur_prior_ord;
        self.cur_prior_ord += 1;
        ord
    }

    pub fn cond_spaces(&self) -> &CondSpaceMap {
        &self.cond_spaces
    }

    pub fn cond_spaces_mut(&mut self) -> &mut CondSpaceMap {
        &mut self.cond_spaces
    }
}

impl Default for FsmCtx {
    fn default() -> Self {
        Self::new(KeyOps::default())
    }
}
