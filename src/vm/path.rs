//! This module contains the path condition: the append-only conjunction of
//! branch constraints that led an execution state to where it is.

use std::{
    collections::{BTreeSet, HashSet},
    fmt::{Debug, Formatter},
    sync::Arc,
};

use crate::{
    error::expression::Result,
    expr::{Symbol, SymbolicValue},
};

/// A single link in the persistent list of constraints.
struct Link {
    constraint: SymbolicValue,
    parent:     Option<Arc<Link>>,
}

/// The conjunction of single-bit constraints accumulated along one execution
/// path.
///
/// Path conditions are persistent. Appending produces a new condition that
/// shares its whole history with the old one, so forking a state costs a
/// pointer copy and siblings never observe each other's constraints.
#[derive(Clone, Default)]
pub struct PathCondition {
    tail: Option<Arc<Link>>,
    len:  usize,
}

impl PathCondition {
    /// Constructs an empty (trivially true) path condition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a new path condition that also requires `constraint` to
    /// hold.
    ///
    /// Constraints wider than a single bit are read as `constraint != 0`. A
    /// constraint that is concretely true is not recorded.
    ///
    /// # Errors
    ///
    /// If the constraint cannot be converted into a predicate.
    pub fn with(&self, constraint: SymbolicValue) -> Result<Self> {
        let constraint = constraint.truthy()?;
        if constraint.as_bool() == Some(true) {
            return Ok(self.clone());
        }
        let link = Link {
            constraint,
            parent: self.tail.clone(),
        };
        Ok(Self {
            tail: Some(Arc::new(link)),
            len:  self.len + 1,
        })
    }

    /// Gets the number of constraints in the path condition.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if the path condition has no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Gets the most recently appended constraint.
    #[must_use]
    pub fn last(&self) -> Option<&SymbolicValue> {
        self.tail.as_ref().map(|l| &l.constraint)
    }

    /// Gets the constraints in the order they were appended.
    #[must_use]
    pub fn constraints(&self) -> Vec<SymbolicValue> {
        let mut constraints = Vec::with_capacity(self.len);
        let mut cursor = self.tail.as_ref();
        while let Some(link) = cursor {
            constraints.push(link.constraint.clone());
            cursor = link.parent.as_ref();
        }
        constraints.reverse();
        constraints
    }

    /// Checks if some constraint in the condition is concretely false.
    #[must_use]
    pub fn is_trivially_false(&self) -> bool {
        let mut cursor = self.tail.as_ref();
        while let Some(link) = cursor {
            if link.constraint.as_bool() == Some(false) {
                return true;
            }
            cursor = link.parent.as_ref();
        }
        false
    }

    /// Gets every symbol that occurs in the path condition.
    #[must_use]
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut symbols = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut cursor = self.tail.as_ref();
        while let Some(link) = cursor {
            link.constraint.collect_symbols(&mut symbols, &mut visited);
            cursor = link.parent.as_ref();
        }
        symbols
    }

    /// Gets the shapes of the constraints as a sorted list, so that conditions
    /// from different runs can be compared independently of symbol identity.
    #[must_use]
    pub fn shape(&self) -> Vec<String> {
        let mut shapes: Vec<String> = self.constraints().iter().map(SymbolicValue::shape).collect();
        shapes.sort();
        shapes
    }

    /// Checks if `self` was derived from `other` by appending constraints.
    #[must_use]
    pub fn extends(&self, other: &Self) -> bool {
        if other.len > self.len {
            return false;
        }
        let mut cursor = self.tail.as_ref();
        for _ in 0..(self.len - other.len) {
            cursor = cursor.and_then(|l| l.parent.as_ref());
        }
        match (cursor, other.tail.as_ref()) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Debug for PathCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.constraints()).finish()
    }
}
