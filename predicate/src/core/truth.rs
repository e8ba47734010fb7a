use std::ops::Not;

/// SQL three-valued truth.
///
/// `Unknown` arises from any comparison involving `NULL`. Connectives follow
/// Kleene logic, and a row is selected only when its predicate is `True`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Truth {
    /// Definitely true.
    True,
    /// Definitely false.
    False,
    /// Unknown (SQL `NULL`).
    Unknown,
}

impl Truth {
    /// Returns true only for [`Truth::True`].
    #[must_use]
    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    /// Kleene conjunction.
    #[must_use]
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    /// Kleene disjunction.
    #[must_use]
    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }
}

impl Not for Truth {
    type Output = Truth;

    fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        if value {
            Truth::True
        } else {
            Truth::False
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Truth::{self, *};

    const ALL: [Truth; 3] = [True, False, Unknown];

    #[test]
    fn kleene_tables() {
        for lhs in ALL {
            assert_eq!(lhs.and(False), False);
            assert_eq!(lhs.or(True), True);
            assert_eq!(lhs.and(True), lhs);
            assert_eq!(lhs.or(False), lhs);
        }
        assert_eq!(Unknown.and(Unknown), Unknown);
        assert_eq!(Unknown.or(Unknown), Unknown);
        assert_eq!(!Unknown, Unknown);
        assert_eq!(!True, False);
    }
}
