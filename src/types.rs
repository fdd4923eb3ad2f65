//! Type-safe wrappers for variables, literals and ternary table cells.
//!
//! Variables are 1-indexed, matching the DIMACS convention used by the
//! loaders and the CNF writer.
use std::fmt;
use std::ops::Neg;

/// A variable identifier (1-indexed).
///
/// # Invariants
///
/// - Variable IDs must be >= 1 (0 is reserved as the DIMACS clause terminator)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Var(u32);

impl Var {
    /// Creates a new variable with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if `id == 0`. Variables must be 1-indexed.
    pub fn new(id: u32) -> Self {
        assert_ne!(id, 0, "Variable IDs must be >= 1");
        Var(id)
    }

    /// Returns the raw variable ID as a `u32`.
    pub fn id(self) -> u32 {
        self.0
    }

    /// Positive literal of this variable.
    pub fn pos(self) -> Lit {
        Lit::new(self, false)
    }

    /// Negative literal of this variable.
    pub fn neg(self) -> Lit {
        Lit::new(self, true)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl From<Var> for u32 {
    fn from(var: Var) -> Self {
        var.0
    }
}

/// A signed occurrence of a variable.
///
/// Ordered by variable first, so sorted clauses group both polarities of a
/// variable next to each other.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Lit {
    var: Var,
    negated: bool,
}

impl Lit {
    pub fn new(var: Var, negated: bool) -> Self {
        Self { var, negated }
    }

    pub fn var(self) -> Var {
        self.var
    }
    pub fn is_negated(self) -> bool {
        self.negated
    }
    pub fn is_positive(self) -> bool {
        !self.negated
    }

    /// Parses a non-zero DIMACS literal.
    ///
    /// # Panics
    ///
    /// Panics if `lit == 0`.
    pub fn from_dimacs(lit: i32) -> Self {
        assert_ne!(lit, 0, "DIMACS literal must be non-zero");
        Self::new(Var::new(lit.unsigned_abs()), lit < 0)
    }

    pub fn to_dimacs(self) -> i32 {
        let id = self.var.id() as i32;
        if self.negated {
            -id
        } else {
            id
        }
    }

    /// Whether this literal is satisfied when its variable takes `value`.
    pub fn is_satisfied_by(self, value: bool) -> bool {
        value != self.negated
    }
}

impl Neg for Lit {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(self.var, !self.negated)
    }
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dimacs())
    }
}

/// A ternary truth-table cell.
///
/// `Either` stands for both concrete values at once: a row holding `Either`
/// in some column denotes the two rows obtained by expanding that cell.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Value {
    False,
    True,
    Either,
}

impl Value {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::False => Some(false),
            Value::True => Some(true),
            Value::Either => None,
        }
    }

    pub fn is_concrete(self) -> bool {
        self != Value::Either
    }

    /// Whether the cell admits the concrete value `value`.
    pub fn admits(self, value: bool) -> bool {
        match self.as_bool() {
            Some(v) => v == value,
            None => true,
        }
    }

    /// Whether two cells share at least one concrete value.
    pub fn is_compatible(self, other: Value) -> bool {
        match (self.as_bool(), other.as_bool()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// The most specific cell admitting only what both cells admit.
    ///
    /// Only meaningful for compatible cells.
    pub fn meet(self, other: Value) -> Value {
        if self.is_concrete() {
            self
        } else {
            other
        }
    }

    /// Negates a concrete value, `Either` stays `Either`.
    pub fn flip(self) -> Value {
        match self {
            Value::False => Value::True,
            Value::True => Value::False,
            Value::Either => Value::Either,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Value::False => 0,
            Value::True => 1,
            Value::Either => 2,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        if value {
            Value::True
        } else {
            Value::False
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Value::False => '0',
            Value::True => '1',
            Value::Either => '-',
        };
        write!(f, "{}", c)
    }
}
