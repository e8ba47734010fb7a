//! Core predicate structures shared across the scan planner and row filter.

mod builder;
mod eval;
mod node;
mod operand;
mod truth;
mod value;
mod visitor;

pub use builder::PredicateBuilder;
pub use eval::{compare_truth, in_list_truth, ColumnSource, RowEvaluator};
pub use node::{ComparisonOp, Predicate, PredicateNode};
pub use operand::{ColumnRef, Operand};
pub use truth::Truth;
pub use value::{ScalarValue, ScalarValueRef};
pub use visitor::PredicateVisitor;
