//! Runtime model shared by both execution engines.
//!
//! The evaluator and the VM must agree on observable semantics, so values,
//! environments, operator rules, builtins, call-stack bookkeeping, and the
//! module cache are defined once here and consumed by both.

pub mod builtins;
pub mod env;
pub mod error;
pub mod frames;
pub mod modules;
pub mod ops;
pub mod value;

use std::cell::RefCell;
use std::rc::Rc;

/// Lines produced by `print`, shared between an engine and the sub-engines it
/// spawns for imports so module output interleaves correctly.
pub type OutputSink = Rc<RefCell<Vec<String>>>;

pub fn new_output_sink() -> OutputSink {
    Rc::new(RefCell::new(Vec::new()))
}
