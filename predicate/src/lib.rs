#![deny(missing_docs)]
//! Predicate facade crate for tablestore.
//!
//! Predicates are logical trees over named columns and literal
//! [`ScalarValue`]s. Evaluation follows SQL three-valued logic: any
//! comparison against `NULL` yields [`Truth::Unknown`] and only
//! [`Truth::True`] selects a row. Pruning layers in the table store walk the
//! same trees through [`PredicateVisitor`].

mod core;

pub use core::{
    compare_truth, in_list_truth, ColumnRef, ColumnSource, ComparisonOp, Operand, Predicate,
    PredicateBuilder, PredicateNode, PredicateVisitor, RowEvaluator, ScalarValue, ScalarValueRef,
    Truth,
};
