//! Deferred type references
//!
//! A single-pass parser meets names whose types are not yet known (forward
//! references, circular object definitions). It creates a placeholder
//! TypeDef and records how each dependent type relates to it; when the real
//! definition appears, the placeholder is substituted and its children are
//! re-evaluated transitively.

use std::cell::{Cell, RefCell};

use crate::error::SourceLocation;
use crate::object::ObjRef;

/// How a child placeholder's type derives from its parent, keyed by the
/// syntactic use that created the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderRelation {
    /// Calling the parent: the child is the return type
    Call,
    /// Yield-resolving the parent: the child is the yield type
    Yield,
    /// Subscripting the parent: list item, map value, or string
    Subscript,
    /// Keying the parent map: the child is the key type
    Key,
    /// `super.field` access on the parent definition
    SuperFieldAccess,
    /// `.field` access on the parent definition
    FieldAccess,
    /// Assignment from the parent: the child is the parent's type
    Assignment,
    /// Instantiating the parent definition
    Instance,
    /// `parent?`: the optional form of the parent
    Optional,
    /// `parent!`: the non-optional form of the parent
    Unwrap,
}

/// The payload of an unresolved TypeDef.
#[derive(Debug)]
pub struct PlaceholderDef {
    /// Name being referenced, when known
    pub name: Option<String>,
    /// Where the reference appeared; reported if it never resolves
    pub location: SourceLocation,
    /// Parent placeholder (first edge wins, never rewritten)
    pub parent: Cell<Option<ObjRef>>,
    /// Relation to the parent
    pub parent_relation: Cell<Option<PlaceholderRelation>>,
    /// Placeholders whose types derive from this one
    pub children: RefCell<Vec<ObjRef>>,
}

impl PlaceholderDef {
    /// Create an unlinked placeholder.
    pub fn new(name: Option<String>, location: SourceLocation) -> Self {
        Self {
            name,
            location,
            parent: Cell::new(None),
            parent_relation: Cell::new(None),
            children: RefCell::new(Vec::new()),
        }
    }

    /// Display name for diagnostics.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}
