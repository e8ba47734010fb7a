//! Fluent builder for composing predicate trees.

use super::{ComparisonOp, Operand, Predicate, ScalarValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BuilderCombine {
    Leaf,
    Conjunction,
    Disjunction,
}

/// Builder for composing predicates incrementally.
///
/// ```
/// use tablestore_predicate::{ColumnRef, PredicateBuilder, ScalarValue};
///
/// let filter = PredicateBuilder::or()
///     .equals(ColumnRef::new("a"), ScalarValue::Int32(1))
///     .equals(ColumnRef::new("a"), ScalarValue::Int32(5))
///     .build();
/// assert_eq!(filter.columns().len(), 1);
/// ```
#[derive(Debug)]
pub struct PredicateBuilder {
    combine: BuilderCombine,
    clauses: Vec<Predicate>,
}

macro_rules! compare_method {
    ($(#[$doc:meta] $name:ident => $op:ident),* $(,)?) => {
        $(
            #[$doc]
            #[must_use]
            pub fn $name<L, R>(self, left: L, right: R) -> Self
            where
                L: Into<Operand>,
                R: Into<Operand>,
            {
                self.compare(left, ComparisonOp::$op, right)
            }
        )*
    };
}

impl PredicateBuilder {
    const fn new(combine: BuilderCombine) -> Self {
        Self {
            combine,
            clauses: Vec::new(),
        }
    }

    /// Creates a builder that expects a single clause.
    #[must_use]
    pub fn leaf() -> Self {
        Self::new(BuilderCombine::Leaf)
    }

    /// Creates a builder that emits an `AND` of all clauses.
    #[must_use]
    pub fn and() -> Self {
        Self::new(BuilderCombine::Conjunction)
    }

    /// Creates a builder that emits an `OR` of all clauses.
    #[must_use]
    pub fn or() -> Self {
        Self::new(BuilderCombine::Disjunction)
    }

    /// Adds an existing predicate to the builder.
    #[must_use]
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.clauses.push(predicate);
        self
    }

    /// Adds a comparison predicate.
    #[must_use]
    pub fn compare<L, R>(self, left: L, op: ComparisonOp, right: R) -> Self
    where
        L: Into<Operand>,
        R: Into<Operand>,
    {
        self.predicate(Predicate::compare(left, op, right))
    }

    compare_method!(
        /// Adds an equality predicate.
        equals => Equal,
        /// Adds an inequality predicate.
        not_equals => NotEqual,
        /// Adds a `<` comparison predicate.
        less_than => LessThan,
        /// Adds a `<=` comparison predicate.
        less_than_or_equal => LessThanOrEqual,
        /// Adds a `>` comparison predicate.
        greater_than => GreaterThan,
        /// Adds a `>=` comparison predicate.
        greater_than_or_equal => GreaterThanOrEqual,
    );

    /// Adds an `IN` predicate.
    #[must_use]
    pub fn in_list<O, I>(self, expr: O, list: I) -> Self
    where
        O: Into<Operand>,
        I: IntoIterator<Item = ScalarValue>,
    {
        self.predicate(Predicate::in_list(expr, list))
    }

    /// Adds a `NOT IN` predicate.
    #[must_use]
    pub fn not_in_list<O, I>(self, expr: O, list: I) -> Self
    where
        O: Into<Operand>,
        I: IntoIterator<Item = ScalarValue>,
    {
        self.predicate(Predicate::not_in_list(expr, list))
    }

    /// Adds a `BETWEEN` predicate (inclusive on both ends).
    #[must_use]
    pub fn between<O, L, H>(self, expr: O, low: L, high: H) -> Self
    where
        O: Into<Operand>,
        L: Into<Operand>,
        H: Into<Operand>,
    {
        self.predicate(Predicate::between(expr, low, high))
    }

    /// Adds a `NOT BETWEEN` predicate.
    #[must_use]
    pub fn not_between<O, L, H>(self, expr: O, low: L, high: H) -> Self
    where
        O: Into<Operand>,
        L: Into<Operand>,
        H: Into<Operand>,
    {
        self.predicate(Predicate::not_between(expr, low, high))
    }

    /// Adds an `IS NULL` predicate.
    #[must_use]
    pub fn is_null<O: Into<Operand>>(self, expr: O) -> Self {
        self.predicate(Predicate::is_null(expr))
    }

    /// Adds an `IS NOT NULL` predicate.
    #[must_use]
    pub fn is_not_null<O: Into<Operand>>(self, expr: O) -> Self {
        self.predicate(Predicate::is_not_null(expr))
    }

    fn branch<F>(self, combine: BuilderCombine, build: F) -> Self
    where
        F: FnOnce(PredicateBuilder) -> PredicateBuilder,
    {
        let predicate = build(PredicateBuilder::new(combine)).build();
        self.predicate(predicate)
    }

    /// Adds a nested conjunction built by the supplied closure.
    #[must_use]
    pub fn and_group<F>(self, build: F) -> Self
    where
        F: FnOnce(PredicateBuilder) -> PredicateBuilder,
    {
        self.branch(BuilderCombine::Conjunction, build)
    }

    /// Adds a nested disjunction built by the supplied closure.
    #[must_use]
    pub fn or_group<F>(self, build: F) -> Self
    where
        F: FnOnce(PredicateBuilder) -> PredicateBuilder,
    {
        self.branch(BuilderCombine::Disjunction, build)
    }

    /// Adds a negated conjunction built by the supplied closure.
    #[must_use]
    pub fn not_group<F>(self, build: F) -> Self
    where
        F: FnOnce(PredicateBuilder) -> PredicateBuilder,
    {
        let inner = build(PredicateBuilder::and()).build();
        self.predicate(Predicate::not(inner).simplify())
    }

    /// Consumes the builder and returns the composed predicate.
    ///
    /// # Panics
    ///
    /// Panics when no clause was added, or when a leaf builder holds more
    /// than one clause.
    #[must_use]
    pub fn build(mut self) -> Predicate {
        assert!(
            !self.clauses.is_empty(),
            "PredicateBuilder requires at least one clause"
        );
        match self.combine {
            BuilderCombine::Leaf => {
                assert!(
                    self.clauses.len() == 1,
                    "PredicateBuilder::leaf must contain exactly one clause"
                );
                self.clauses.remove(0)
            }
            BuilderCombine::Conjunction => Predicate::and(self.clauses),
            BuilderCombine::Disjunction => Predicate::or(self.clauses),
        }
    }
}

impl Default for PredicateBuilder {
    fn default() -> Self {
        Self::leaf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnRef, PredicateNode};

    #[test]
    #[should_panic(expected = "PredicateBuilder requires at least one clause")]
    fn leaf_builder_requires_clause() {
        let _ = PredicateBuilder::leaf().build();
    }

    #[test]
    #[should_panic(expected = "PredicateBuilder::leaf must contain exactly one clause")]
    fn leaf_builder_rejects_multiple_clauses() {
        let column = ColumnRef::new("col");
        let _ = PredicateBuilder::leaf()
            .equals(column.clone(), ScalarValue::Int64(1))
            .equals(column, ScalarValue::Int64(2))
            .build();
    }

    #[test]
    #[should_panic(expected = "PredicateBuilder requires at least one clause")]
    fn or_builder_requires_clause() {
        let _ = PredicateBuilder::or().build();
    }

    #[test]
    fn not_equals_chain_builds_flat_conjunction() {
        let a = ColumnRef::new("a");
        let pred = PredicateBuilder::and()
            .not_equals(a.clone(), ScalarValue::Int32(1))
            .not_equals(a.clone(), ScalarValue::Int32(4))
            .not_equals(a, ScalarValue::Int32(5))
            .build();
        match pred.kind() {
            PredicateNode::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn not_group_wraps_conjunction() {
        let pred = PredicateBuilder::leaf()
            .not_group(|b| b.is_null(ColumnRef::new("a")))
            .build();
        assert!(matches!(pred.kind(), PredicateNode::Not(_)));
    }
}
