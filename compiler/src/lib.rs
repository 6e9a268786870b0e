//! Provides for the construction, combination, minimization and reduction of
//! finite state machines built from regular-expression-like operators.
//!
//! # Example
//!
//! ```rust
//! use fsm_compiler::{FsmAp, FsmCtx, Key};
//!
//! // Table-driven execution of a reduced machine is provided by the
//! // `fsm_runtime` crate.
//! use fsm_runtime::execute;
//!
//! fn keys(input: &str) -> Vec<Key> {
//!     input.bytes().map(Key::from).collect()
//! }
//!
//! // All machines of one compile share a context holding the alphabet,
//! // registered actions and construction options.
//! let mut ctx = FsmCtx::default();
//! let word = ctx.new_action("word");
//!
//! // ("ab" | [a-c]*) with an action on every transition.
//! let mut fsm = FsmAp::concat_fsm(&keys("ab"))
//!     .union_op(&mut ctx, FsmAp::range_star_fsm(b'a' as Key, b'c' as Key))
//!     .expect("union failed");
//! fsm.all_trans_action(&mut ctx, word);
//!
//! // The graph can be run directly...
//! assert!(fsm.simulate(&ctx, &keys("cab"), |_| false).accepted);
//!
//! // ...or reduced to tables for a code generator.
//! fsm.minimize(&ctx);
//! fsm.prepare_reduction(&ctx);
//! let red = fsm.reduce(&ctx).expect("reduction failed");
//!
//! let result = execute(&red, &keys("cab"), |_| false);
//! assert!(result.accepted);
//! assert_eq!(vec![word.as_u32(); 3], result.actions);
//! assert!(!execute(&red, &keys("abd"), |_| false).accepted);
//! ```

pub mod action;
pub mod condspace;
pub mod ctx;
mod embed;
pub mod error;
pub mod graph;
pub mod keyops;
mod merge;
pub mod minimize;
mod ops;
pub mod rangepair;
mod reduce;
mod sim;

pub use action::{Action, ActionId, ActionTable, PriorDesc, PriorDescId, PriorityTable};
pub use condspace::{CondKey, CondSpace, CondSpaceId};
pub use ctx::{DefaultChoice, FsmCtx, MinimizeLevel, MinimizeOpt};
pub use error::{FsmError, FsmErrorKind};
pub use graph::{CondAp, FsmAp, InEdge, NfaId, NfaTrans, StateAp, StateId, TransAp, TransId};
pub use keyops::{Key, KeyOps};

pub use fsm_runtime::{execute, Execution, RedFsm};
