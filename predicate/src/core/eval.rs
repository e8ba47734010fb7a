use std::{collections::HashMap, convert::Infallible};

use super::{
    ColumnRef, ComparisonOp, Operand, Predicate, PredicateNode, PredicateVisitor, ScalarValue,
    ScalarValueRef, Truth,
};

static NULL: ScalarValue = ScalarValue::Null;

/// Supplies column values to a [`RowEvaluator`].
///
/// Returning `None` for an unknown column makes it behave like `NULL`.
pub trait ColumnSource {
    /// Looks up the value bound to `column`.
    fn value(&self, column: &ColumnRef) -> Option<ScalarValueRef<'_>>;
}

impl ColumnSource for HashMap<String, ScalarValue> {
    fn value(&self, column: &ColumnRef) -> Option<ScalarValueRef<'_>> {
        self.get(column.name.as_ref())
    }
}

impl<S: ColumnSource + ?Sized> ColumnSource for &S {
    fn value(&self, column: &ColumnRef) -> Option<ScalarValueRef<'_>> {
        (**self).value(column)
    }
}

/// Evaluates a predicate against a single row under SQL three-valued logic.
pub struct RowEvaluator<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S> RowEvaluator<'a, S>
where
    S: ColumnSource + ?Sized,
{
    /// Creates an evaluator bound to one row.
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    fn resolve<'b>(&'b self, operand: &'b Operand) -> ScalarValueRef<'b> {
        match operand {
            Operand::Column(column) => self.source.value(column).unwrap_or(&NULL),
            Operand::Literal(value) => value,
        }
    }
}

/// Truth of `left op right`; `NULL` or incomparable operands are unknown.
#[must_use]
pub fn compare_truth(left: &ScalarValue, op: ComparisonOp, right: &ScalarValue) -> Truth {
    match left.compare(right) {
        Some(ordering) => Truth::from(op.test_ordering(ordering)),
        None => Truth::Unknown,
    }
}

/// Truth of `value IN (list)`.
///
/// A match on a non-null element is `True`. Without a match the answer is
/// `Unknown` when the list holds a `NULL` (the value might equal it) and
/// `False` otherwise. A `NULL` probe is `Unknown` for any non-empty list.
#[must_use]
pub fn in_list_truth(value: &ScalarValue, list: &[ScalarValue]) -> Truth {
    if list.is_empty() {
        return Truth::False;
    }
    if value.is_null() {
        return Truth::Unknown;
    }
    let mut saw_null = false;
    for candidate in list {
        match value.compare(candidate) {
            Some(std::cmp::Ordering::Equal) => return Truth::True,
            Some(_) => {}
            None => saw_null |= candidate.is_null(),
        }
    }
    if saw_null {
        Truth::Unknown
    } else {
        Truth::False
    }
}

impl<S> PredicateVisitor for RowEvaluator<'_, S>
where
    S: ColumnSource + ?Sized,
{
    type Error = Infallible;
    type Value = Truth;

    fn visit_leaf(&mut self, leaf: &PredicateNode) -> Result<Truth, Infallible> {
        Ok(match leaf {
            PredicateNode::True => Truth::True,
            PredicateNode::Compare { left, op, right } => {
                compare_truth(self.resolve(left), *op, self.resolve(right))
            }
            PredicateNode::InList {
                expr,
                list,
                negated,
            } => {
                let truth = in_list_truth(self.resolve(expr), list);
                if *negated {
                    !truth
                } else {
                    truth
                }
            }
            PredicateNode::IsNull { expr, negated } => {
                Truth::from(self.resolve(expr).is_null() != *negated)
            }
            PredicateNode::Not(_) | PredicateNode::And(_) | PredicateNode::Or(_) => {
                return self.visit_node(leaf);
            }
        })
    }

    fn combine_not(&mut self, child: Truth) -> Result<Truth, Infallible> {
        Ok(!child)
    }

    fn combine_and(&mut self, children: Vec<Truth>) -> Result<Truth, Infallible> {
        Ok(children.into_iter().fold(Truth::True, Truth::and))
    }

    fn combine_or(&mut self, children: Vec<Truth>) -> Result<Truth, Infallible> {
        Ok(children.into_iter().fold(Truth::False, Truth::or))
    }
}

impl Predicate {
    /// Evaluates the predicate against one row.
    pub fn evaluate<S>(&self, source: &S) -> Truth
    where
        S: ColumnSource + ?Sized,
    {
        match self.accept(&mut RowEvaluator::new(source)) {
            Ok(truth) => truth,
            Err(never) => match never {},
        }
    }

    /// Returns true when the row is selected, i.e. evaluates to `True`.
    pub fn matches<S>(&self, source: &S) -> bool
    where
        S: ColumnSource + ?Sized,
    {
        self.evaluate(source).is_true()
    }
}
