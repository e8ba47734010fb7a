//! Partition and file pruning over value domains.
//!
//! A predicate is folded into the set of truth values it can take for any
//! row whose columns lie inside the supplied domains. Partitions carry
//! exact values; files carry min/max/null statistics. A partition or file
//! is skipped only when `True` is not in that set, so pruning never drops
//! a row that the row-level filter would select.

use std::{cmp::Ordering, convert::Infallible};

use tablestore_predicate::{
    compare_truth, in_list_truth, ColumnRef, ComparisonOp, Operand, Predicate, PredicateNode,
    PredicateVisitor, ScalarValue, Truth,
};

use crate::data_file::ColumnStats;

/// Set of three-valued outcomes, as a bit mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TruthSet(u8);

impl TruthSet {
    pub(crate) const EMPTY: Self = Self(0);
    pub(crate) const ALL: Self = Self(0b111);

    fn bit(truth: Truth) -> u8 {
        match truth {
            Truth::True => 0b001,
            Truth::False => 0b010,
            Truth::Unknown => 0b100,
        }
    }

    pub(crate) fn of(truth: Truth) -> Self {
        Self(Self::bit(truth))
    }

    pub(crate) fn with(self, truth: Truth) -> Self {
        Self(self.0 | Self::bit(truth))
    }

    pub(crate) fn contains(self, truth: Truth) -> bool {
        self.0 & Self::bit(truth) != 0
    }

    pub(crate) fn may_be_true(self) -> bool {
        self.contains(Truth::True)
    }

    fn members(self) -> impl Iterator<Item = Truth> {
        [Truth::True, Truth::False, Truth::Unknown]
            .into_iter()
            .filter(move |t| self.contains(*t))
    }

    fn zip_with(self, other: Self, op: fn(Truth, Truth) -> Truth) -> Self {
        let mut out = Self::EMPTY;
        for lhs in self.members() {
            for rhs in other.members() {
                out = out.with(op(lhs, rhs));
            }
        }
        out
    }

    fn negate(self) -> Self {
        self.members().fold(Self::EMPTY, |acc, t| acc.with(!t))
    }
}

/// Values a column may take inside one partition or file.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Domain<'a> {
    /// Nothing is known.
    Unknown,
    /// Every row holds NULL.
    AllNull,
    /// Every row holds this value.
    Exact(&'a ScalarValue),
    /// Non-null values within `[min, max]`, plus NULLs when `nulls`.
    Range {
        min: &'a ScalarValue,
        max: &'a ScalarValue,
        nulls: bool,
    },
}

impl<'a> Domain<'a> {
    pub(crate) fn exact(value: &'a ScalarValue) -> Self {
        if value.is_null() {
            Domain::AllNull
        } else {
            Domain::Exact(value)
        }
    }

    /// Domain described by file statistics; missing or partial stats give
    /// [`Domain::Unknown`].
    pub(crate) fn from_stats(stats: Option<&'a ColumnStats>, row_count: u64) -> Self {
        let Some(stats) = stats else {
            return Domain::Unknown;
        };
        if row_count > 0 && stats.null_count >= row_count {
            return Domain::AllNull;
        }
        match (stats.min.as_ref(), stats.max.as_ref()) {
            (Some(min), Some(max)) => Domain::Range {
                min,
                max,
                nulls: stats.null_count > 0,
            },
            _ => Domain::Unknown,
        }
    }
}

/// Returns false only when no row inside the domains can satisfy
/// `predicate`.
pub(crate) fn may_match<'a, F>(predicate: &Predicate, resolve: F) -> bool
where
    F: Fn(&ColumnRef) -> Domain<'a>,
{
    match predicate.accept(&mut DomainEvaluator { resolve }) {
        Ok(outcomes) => outcomes.may_be_true(),
        Err(never) => match never {},
    }
}

struct DomainEvaluator<F> {
    resolve: F,
}

impl<'a, F> DomainEvaluator<F>
where
    F: Fn(&ColumnRef) -> Domain<'a>,
{
    fn compare(&self, left: &Operand, op: ComparisonOp, right: &Operand) -> TruthSet {
        match (left, right) {
            (Operand::Literal(l), Operand::Literal(r)) => TruthSet::of(compare_truth(l, op, r)),
            (Operand::Column(column), Operand::Literal(literal)) => {
                compare_domain((self.resolve)(column), op, literal)
            }
            (Operand::Literal(literal), Operand::Column(column)) => {
                compare_domain((self.resolve)(column), op.flipped(), literal)
            }
            (Operand::Column(_), Operand::Column(_)) => TruthSet::ALL,
        }
    }

    fn in_list(&self, expr: &Operand, list: &[ScalarValue]) -> TruthSet {
        match expr {
            Operand::Literal(value) => TruthSet::of(in_list_truth(value, list)),
            Operand::Column(column) => in_list_domain((self.resolve)(column), list),
        }
    }

    fn is_null(&self, expr: &Operand) -> TruthSet {
        let domain = match expr {
            Operand::Literal(value) => Domain::exact(value),
            Operand::Column(column) => (self.resolve)(column),
        };
        match domain {
            Domain::Unknown => TruthSet::of(Truth::True).with(Truth::False),
            Domain::AllNull => TruthSet::of(Truth::True),
            Domain::Exact(_) => TruthSet::of(Truth::False),
            Domain::Range { nulls: true, .. } => TruthSet::of(Truth::True).with(Truth::False),
            Domain::Range { nulls: false, .. } => TruthSet::of(Truth::False),
        }
    }
}

impl<'a, F> PredicateVisitor for DomainEvaluator<F>
where
    F: Fn(&ColumnRef) -> Domain<'a>,
{
    type Error = Infallible;
    type Value = TruthSet;

    fn visit_leaf(&mut self, leaf: &PredicateNode) -> Result<TruthSet, Infallible> {
        Ok(match leaf {
            PredicateNode::True => TruthSet::of(Truth::True),
            PredicateNode::Compare { left, op, right } => self.compare(left, *op, right),
            PredicateNode::InList {
                expr,
                list,
                negated,
            } => {
                let outcomes = self.in_list(expr, list);
                if *negated {
                    outcomes.negate()
                } else {
                    outcomes
                }
            }
            PredicateNode::IsNull { expr, negated } => {
                let outcomes = self.is_null(expr);
                if *negated {
                    outcomes.negate()
                } else {
                    outcomes
                }
            }
            PredicateNode::Not(_) | PredicateNode::And(_) | PredicateNode::Or(_) => {
                return self.visit_node(leaf);
            }
        })
    }

    fn combine_not(&mut self, child: TruthSet) -> Result<TruthSet, Infallible> {
        Ok(child.negate())
    }

    fn combine_and(&mut self, children: Vec<TruthSet>) -> Result<TruthSet, Infallible> {
        Ok(children
            .into_iter()
            .fold(TruthSet::of(Truth::True), |acc, c| acc.zip_with(c, Truth::and)))
    }

    fn combine_or(&mut self, children: Vec<TruthSet>) -> Result<TruthSet, Infallible> {
        Ok(children
            .into_iter()
            .fold(TruthSet::of(Truth::False), |acc, c| acc.zip_with(c, Truth::or)))
    }
}

fn compare_domain(domain: Domain<'_>, op: ComparisonOp, literal: &ScalarValue) -> TruthSet {
    if literal.is_null() {
        return TruthSet::of(Truth::Unknown);
    }
    let (min, max, nulls) = match domain {
        Domain::Unknown => return TruthSet::ALL,
        Domain::AllNull => return TruthSet::of(Truth::Unknown),
        Domain::Exact(value) => return TruthSet::of(compare_truth(value, op, literal)),
        Domain::Range { min, max, nulls } => (min, max, nulls),
    };
    let (Some(lo), Some(hi)) = (min.compare(literal), max.compare(literal)) else {
        return TruthSet::ALL;
    };
    use Ordering::*;
    let single = lo == Equal && hi == Equal;
    let covers = lo != Greater && hi != Less;
    let (maybe_true, maybe_false) = match op {
        ComparisonOp::Equal => (covers, !single),
        ComparisonOp::NotEqual => (!single, covers),
        ComparisonOp::LessThan => (lo == Less, hi != Less),
        ComparisonOp::LessThanOrEqual => (lo != Greater, hi == Greater),
        ComparisonOp::GreaterThan => (hi == Greater, lo != Greater),
        ComparisonOp::GreaterThanOrEqual => (hi != Less, lo == Less),
    };
    let mut out = TruthSet::EMPTY;
    if maybe_true {
        out = out.with(Truth::True);
    }
    if maybe_false {
        out = out.with(Truth::False);
    }
    if nulls {
        out = out.with(Truth::Unknown);
    }
    out
}

fn in_list_domain(domain: Domain<'_>, list: &[ScalarValue]) -> TruthSet {
    if list.is_empty() {
        return TruthSet::of(Truth::False);
    }
    let (min, max, nulls) = match domain {
        Domain::Unknown => return TruthSet::ALL,
        Domain::AllNull => return TruthSet::of(Truth::Unknown),
        Domain::Exact(value) => return TruthSet::of(in_list_truth(value, list)),
        Domain::Range { min, max, nulls } => (min, max, nulls),
    };
    let miss = if list.iter().any(ScalarValue::is_null) {
        Truth::Unknown
    } else {
        Truth::False
    };
    let mut maybe_hit = false;
    for candidate in list.iter().filter(|c| !c.is_null()) {
        match (min.compare(candidate), max.compare(candidate)) {
            (Some(lo), Some(hi)) => maybe_hit |= lo != Ordering::Greater && hi != Ordering::Less,
            _ => return TruthSet::ALL,
        }
    }
    let single_member = min.compare(max) == Some(Ordering::Equal)
        && in_list_truth(min, list) == Truth::True;
    let mut out = TruthSet::EMPTY;
    if maybe_hit {
        out = out.with(Truth::True);
    }
    if !single_member {
        out = out.with(miss);
    }
    if nulls {
        out = out.with(Truth::Unknown);
    }
    out
}
