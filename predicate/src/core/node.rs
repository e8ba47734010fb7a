use std::{cmp::Ordering, fmt};

use super::{ColumnRef, Operand, PredicateVisitor, ScalarValue};

/// Comparison operator used by binary predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    /// Equals (`=`).
    Equal,
    /// Not equals (`<>`).
    NotEqual,
    /// Less than (`<`).
    LessThan,
    /// Less than or equal to (`<=`).
    LessThanOrEqual,
    /// Greater than (`>`).
    GreaterThan,
    /// Greater than or equal to (`>=`).
    GreaterThanOrEqual,
}

impl ComparisonOp {
    /// Returns the operator that swaps the left/right side of the comparison.
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            ComparisonOp::Equal => ComparisonOp::Equal,
            ComparisonOp::NotEqual => ComparisonOp::NotEqual,
            ComparisonOp::LessThan => ComparisonOp::GreaterThan,
            ComparisonOp::LessThanOrEqual => ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::GreaterThan => ComparisonOp::LessThan,
            ComparisonOp::GreaterThanOrEqual => ComparisonOp::LessThanOrEqual,
        }
    }

    /// Returns the logical negation of this operator.
    ///
    /// Only valid for non-null operands; NULL handling lives in the evaluator.
    #[must_use]
    pub fn negated(self) -> Self {
        match self {
            ComparisonOp::Equal => ComparisonOp::NotEqual,
            ComparisonOp::NotEqual => ComparisonOp::Equal,
            ComparisonOp::LessThan => ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::LessThanOrEqual => ComparisonOp::GreaterThan,
            ComparisonOp::GreaterThan => ComparisonOp::LessThanOrEqual,
            ComparisonOp::GreaterThanOrEqual => ComparisonOp::LessThan,
        }
    }

    /// Evaluates the operator against a comparison ordering.
    #[must_use]
    pub fn test_ordering(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Equal => ordering == Ordering::Equal,
            ComparisonOp::NotEqual => ordering != Ordering::Equal,
            ComparisonOp::LessThan => ordering == Ordering::Less,
            ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
            ComparisonOp::GreaterThan => ordering == Ordering::Greater,
            ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "<>",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterThanOrEqual => ">=",
        })
    }
}

/// Recursive predicate node; leaf and branch variants coexist.
#[derive(Clone, Debug, PartialEq)]
pub enum PredicateNode {
    /// Always-true literal; matches all rows.
    True,
    /// Binary comparison.
    Compare {
        /// Left operand.
        left: Operand,
        /// Operator.
        op: ComparisonOp,
        /// Right operand.
        right: Operand,
    },
    /// Membership test against a literal list.
    InList {
        /// Value to test.
        expr: Operand,
        /// Literal candidates, possibly containing `NULL`.
        list: Vec<ScalarValue>,
        /// True when representing `NOT IN`.
        negated: bool,
    },
    /// Null check (`IS NULL` / `IS NOT NULL`).
    IsNull {
        /// Operand under inspection.
        expr: Operand,
        /// True when representing `IS NOT NULL`.
        negated: bool,
    },
    /// Logical negation.
    Not(Box<Predicate>),
    /// Conjunction over multiple predicates.
    And(Vec<Predicate>),
    /// Disjunction over multiple predicates.
    Or(Vec<Predicate>),
}

impl PredicateNode {
    /// Returns true when the node has no child predicates.
    #[must_use]
    pub(crate) fn is_leaf(&self) -> bool {
        matches!(
            self,
            PredicateNode::True
                | PredicateNode::Compare { .. }
                | PredicateNode::InList { .. }
                | PredicateNode::IsNull { .. }
        )
    }
}

/// Logical predicate shared by the scan planner and the row filter.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    kind: PredicateNode,
}

impl Predicate {
    /// Returns a reference to the underlying node.
    #[must_use]
    pub fn kind(&self) -> &PredicateNode {
        &self.kind
    }

    /// Builds a comparison `left op right`.
    #[must_use]
    pub fn compare<L, R>(left: L, op: ComparisonOp, right: R) -> Self
    where
        L: Into<Operand>,
        R: Into<Operand>,
    {
        Self::from_kind(PredicateNode::Compare {
            left: left.into(),
            op,
            right: right.into(),
        })
    }

    /// Builds `left = right`.
    #[must_use]
    pub fn eq<L: Into<Operand>, R: Into<Operand>>(left: L, right: R) -> Self {
        Self::compare(left, ComparisonOp::Equal, right)
    }

    /// Builds `left <> right`.
    #[must_use]
    pub fn not_eq<L: Into<Operand>, R: Into<Operand>>(left: L, right: R) -> Self {
        Self::compare(left, ComparisonOp::NotEqual, right)
    }

    /// Builds `left < right`.
    #[must_use]
    pub fn lt<L: Into<Operand>, R: Into<Operand>>(left: L, right: R) -> Self {
        Self::compare(left, ComparisonOp::LessThan, right)
    }

    /// Builds `left <= right`.
    #[must_use]
    pub fn lt_eq<L: Into<Operand>, R: Into<Operand>>(left: L, right: R) -> Self {
        Self::compare(left, ComparisonOp::LessThanOrEqual, right)
    }

    /// Builds `left > right`.
    #[must_use]
    pub fn gt<L: Into<Operand>, R: Into<Operand>>(left: L, right: R) -> Self {
        Self::compare(left, ComparisonOp::GreaterThan, right)
    }

    /// Builds `left >= right`.
    #[must_use]
    pub fn gt_eq<L: Into<Operand>, R: Into<Operand>>(left: L, right: R) -> Self {
        Self::compare(left, ComparisonOp::GreaterThanOrEqual, right)
    }

    /// Builds `expr IN (list)`.
    #[must_use]
    pub fn in_list<O, I>(expr: O, list: I) -> Self
    where
        O: Into<Operand>,
        I: IntoIterator<Item = ScalarValue>,
    {
        Self::from_kind(PredicateNode::InList {
            expr: expr.into(),
            list: list.into_iter().collect(),
            negated: false,
        })
    }

    /// Builds `expr NOT IN (list)`.
    #[must_use]
    pub fn not_in_list<O, I>(expr: O, list: I) -> Self
    where
        O: Into<Operand>,
        I: IntoIterator<Item = ScalarValue>,
    {
        Self::from_kind(PredicateNode::InList {
            expr: expr.into(),
            list: list.into_iter().collect(),
            negated: true,
        })
    }

    /// Builds `expr IS NULL`.
    #[must_use]
    pub fn is_null<O: Into<Operand>>(expr: O) -> Self {
        Self::from_kind(PredicateNode::IsNull {
            expr: expr.into(),
            negated: false,
        })
    }

    /// Builds `expr IS NOT NULL`.
    #[must_use]
    pub fn is_not_null<O: Into<Operand>>(expr: O) -> Self {
        Self::from_kind(PredicateNode::IsNull {
            expr: expr.into(),
            negated: true,
        })
    }

    /// Builds `expr BETWEEN low AND high` as `expr >= low AND expr <= high`.
    #[must_use]
    pub fn between<O, L, H>(expr: O, low: L, high: H) -> Self
    where
        O: Into<Operand>,
        L: Into<Operand>,
        H: Into<Operand>,
    {
        let expr = expr.into();
        Self::and([
            Self::gt_eq(expr.clone(), low),
            Self::lt_eq(expr, high),
        ])
    }

    /// Builds `expr NOT BETWEEN low AND high` as `expr < low OR expr > high`.
    #[must_use]
    pub fn not_between<O, L, H>(expr: O, low: L, high: H) -> Self
    where
        O: Into<Operand>,
        L: Into<Operand>,
        H: Into<Operand>,
    {
        let expr = expr.into();
        Self::or([Self::lt(expr.clone(), low), Self::gt(expr, high)])
    }

    /// Wraps the predicate in a logical `NOT` without pushing it down.
    #[must_use]
    pub fn not(predicate: Predicate) -> Self {
        Self::from_kind(PredicateNode::Not(Box::new(predicate)))
    }

    /// Builds a conjunction from the supplied clauses.
    ///
    /// # Panics
    ///
    /// Panics if no clauses are provided.
    #[must_use]
    pub fn and<I>(clauses: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        let mut acc = Vec::new();
        for clause in clauses {
            match clause.into_kind() {
                PredicateNode::And(mut nested) => acc.append(&mut nested),
                other => acc.push(Predicate::from_kind(other)),
            }
        }

        assert!(
            !acc.is_empty(),
            "Predicate::and requires at least one clause"
        );

        if acc.len() == 1 {
            acc.remove(0)
        } else {
            Self::from_kind(PredicateNode::And(acc))
        }
    }

    /// Builds a disjunction from the supplied clauses.
    ///
    /// # Panics
    ///
    /// Panics if no clauses are provided.
    #[must_use]
    pub fn or<I>(clauses: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        let mut acc = Vec::new();
        for clause in clauses {
            match clause.into_kind() {
                PredicateNode::Or(mut nested) => acc.append(&mut nested),
                other => acc.push(Predicate::from_kind(other)),
            }
        }

        assert!(
            !acc.is_empty(),
            "Predicate::or requires at least one clause"
        );

        if acc.len() == 1 {
            acc.remove(0)
        } else {
            Self::from_kind(PredicateNode::Or(acc))
        }
    }

    /// Applies simple simplification rules to reduce nesting.
    #[must_use]
    pub fn simplify(self) -> Self {
        match self.kind {
            PredicateNode::True
            | PredicateNode::Compare { .. }
            | PredicateNode::InList { .. }
            | PredicateNode::IsNull { .. } => self,
            PredicateNode::Not(inner) => {
                let simplified_child = inner.simplify();
                match simplified_child.into_kind() {
                    PredicateNode::Not(grandchild) => *grandchild,
                    other => Self::from_kind(PredicateNode::Not(Box::new(Self::from_kind(other)))),
                }
            }
            PredicateNode::And(clauses) => {
                Predicate::and(clauses.into_iter().map(Predicate::simplify))
            }
            PredicateNode::Or(clauses) => {
                Predicate::or(clauses.into_iter().map(Predicate::simplify))
            }
        }
    }

    /// Builds a conjunction from the supplied predicates, if any are provided.
    #[must_use]
    pub fn conjunction(predicates: Vec<Predicate>) -> Option<Predicate> {
        match predicates.len() {
            0 => None,
            1 => predicates.into_iter().next(),
            _ => Some(Predicate::and(predicates).simplify()),
        }
    }

    /// Builds a disjunction from the supplied predicates, if any.
    #[must_use]
    pub fn disjunction(predicates: Vec<Predicate>) -> Option<Predicate> {
        match predicates.len() {
            0 => None,
            1 => predicates.into_iter().next(),
            _ => Some(Predicate::or(predicates).simplify()),
        }
    }

    /// Builds a predicate directly from a single node.
    #[must_use]
    pub fn from_node(node: PredicateNode) -> Self {
        Self::from_kind(node)
    }

    /// Columns referenced anywhere in the tree, in first-seen order.
    #[must_use]
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out: Vec<&ColumnRef> = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        let mut push = |operand: &'a Operand| {
            if let Some(column) = operand.as_column() {
                if !out.contains(&column) {
                    out.push(column);
                }
            }
        };
        match &self.kind {
            PredicateNode::True => {}
            PredicateNode::Compare { left, right, .. } => {
                push(left);
                push(right);
            }
            PredicateNode::InList { expr, .. } | PredicateNode::IsNull { expr, .. } => push(expr),
            PredicateNode::Not(inner) => inner.collect_columns(out),
            PredicateNode::And(children) | PredicateNode::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
        }
    }

    /// Accepts a visitor that walks the predicate tree bottom-up.
    pub fn accept<V>(&self, visitor: &mut V) -> Result<V::Value, V::Error>
    where
        V: PredicateVisitor + ?Sized,
    {
        visitor.visit_predicate(self)
    }

    pub(crate) fn from_kind(kind: PredicateNode) -> Self {
        Self { kind }
    }

    fn into_kind(self) -> PredicateNode {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::{ComparisonOp, Predicate, PredicateNode};
    use crate::core::{ColumnRef, Operand, ScalarValue};

    fn cmp_predicate(op: ComparisonOp) -> Predicate {
        Predicate::from_node(PredicateNode::Compare {
            left: Operand::from(ColumnRef::new("a")),
            op,
            right: Operand::from(ScalarValue::from(1i64)),
        })
    }

    #[test]
    fn comparison_op_flipped_and_display() {
        assert_eq!(ComparisonOp::Equal.flipped(), ComparisonOp::Equal);
        assert_eq!(ComparisonOp::LessThan.flipped(), ComparisonOp::GreaterThan);
        assert_eq!(
            ComparisonOp::GreaterThanOrEqual.flipped(),
            ComparisonOp::LessThanOrEqual
        );
        assert_eq!(ComparisonOp::NotEqual.to_string(), "<>");
    }

    #[test]
    fn predicate_and_or_flattens_nested() {
        let a = cmp_predicate(ComparisonOp::Equal);
        let b = cmp_predicate(ComparisonOp::NotEqual);
        let nested = Predicate::from_node(PredicateNode::And(vec![a.clone(), b.clone()]));
        let combined = Predicate::and([a.clone(), nested, b.clone()]);
        match combined.kind() {
            PredicateNode::And(clauses) => assert_eq!(clauses.len(), 4),
            other => panic!("expected And, got {other:?}"),
        }

        let nested_or = Predicate::from_node(PredicateNode::Or(vec![a.clone(), b.clone()]));
        let combined_or = Predicate::or([a, nested_or, b]);
        match combined_or.kind() {
            PredicateNode::Or(clauses) => assert_eq!(clauses.len(), 4),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn predicate_simplify_collapses_double_not() {
        let wrapped = Predicate::not(Predicate::not(Predicate::from_node(PredicateNode::True)));
        assert_eq!(wrapped.simplify().kind(), &PredicateNode::True);
    }

    #[test]
    fn between_desugars_to_range() {
        let pred = Predicate::between(
            ColumnRef::new("a"),
            ScalarValue::Int32(2),
            ScalarValue::Int32(3),
        );
        match pred.kind() {
            PredicateNode::And(children) => {
                let ops: Vec<ComparisonOp> = children
                    .iter()
                    .filter_map(|child| match child.kind() {
                        PredicateNode::Compare { op, .. } => Some(*op),
                        _ => None,
                    })
                    .collect();
                assert_eq!(
                    ops,
                    vec![
                        ComparisonOp::GreaterThanOrEqual,
                        ComparisonOp::LessThanOrEqual
                    ]
                );
            }
            other => panic!("expected And, got {other:?}"),
        }
        assert!(matches!(
            Predicate::not_between(
                ColumnRef::new("a"),
                ScalarValue::Int32(2),
                ScalarValue::Int32(4)
            )
            .kind(),
            PredicateNode::Or(_)
        ));
    }

    #[test]
    fn columns_are_deduplicated() {
        let pred = Predicate::and([
            Predicate::eq(ColumnRef::new("a"), ScalarValue::Int32(1)),
            Predicate::is_null(ColumnRef::new("b")),
            Predicate::gt(ColumnRef::new("a"), ColumnRef::new("c")),
        ]);
        let names: Vec<&str> = pred.columns().iter().map(|c| c.name.as_ref()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn predicate_leaf_detection() {
        let leaves = [
            PredicateNode::True,
            PredicateNode::Compare {
                left: Operand::from(ColumnRef::new("a")),
                op: ComparisonOp::Equal,
                right: Operand::from(ScalarValue::from(1i64)),
            },
            PredicateNode::InList {
                expr: Operand::from(ColumnRef::new("a")),
                list: vec![ScalarValue::from(1i64)],
                negated: false,
            },
            PredicateNode::IsNull {
                expr: Operand::from(ColumnRef::new("a")),
                negated: false,
            },
        ];
        for leaf in leaves {
            assert!(leaf.is_leaf());
        }
        let non_leaves = [
            PredicateNode::Not(Box::new(Predicate::from_node(PredicateNode::True))),
            PredicateNode::And(vec![Predicate::from_node(PredicateNode::True)]),
            PredicateNode::Or(vec![Predicate::from_node(PredicateNode::True)]),
        ];
        for node in non_leaves {
            assert!(!node.is_leaf());
        }
    }

    #[test]
    fn predicate_conjunction_and_disjunction_helpers() {
        assert!(Predicate::conjunction(Vec::new()).is_none());
        assert!(Predicate::disjunction(Vec::new()).is_none());

        let left = cmp_predicate(ComparisonOp::Equal);
        let right = cmp_predicate(ComparisonOp::LessThan);
        let conj = Predicate::conjunction(vec![left.clone(), right.clone()]).expect("conjunction");
        assert!(matches!(conj.kind(), PredicateNode::And(_)));

        let disj = Predicate::disjunction(vec![left, right]).expect("disjunction");
        assert!(matches!(disj.kind(), PredicateNode::Or(_)));
    }
}
