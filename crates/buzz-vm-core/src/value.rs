//! Buzz values
//!
//! A [`Value`] is a compact tagged union: immediate primitives plus a
//! pointer into the GC heap. Heap pointers are `Copy`; reachability is
//! the collector's business, not the value's.

use crate::object::{Obj, ObjKind, ObjRef};

/// A Buzz value.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    /// The null value
    Null,
    /// true / false
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit IEEE float
    Float(f64),
    /// Pointer to a heap object
    Obj(ObjRef),
}

impl Value {
    /// Check if this is null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as boolean.
    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer.
    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as float.
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as heap object.
    #[inline]
    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            Value::Obj(obj) => Some(*obj),
            _ => None,
        }
    }

    /// Get as a heap object of a specific kind.
    #[inline]
    pub fn as_obj_kind(&self, kind: ObjKind) -> Option<ObjRef> {
        self.as_obj().filter(|o| o.kind() == kind)
    }

    /// Truthiness: only `false` and `null` are falsy.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Boolean(false))
    }

    /// Value equality per the object model: primitives by value (Integer and
    /// Float are never implicitly equal), objects per their kind's rule.
    pub fn eql(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => Obj::eql(*a, *b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<ObjRef> for Value {
    fn from(obj: ObjRef) -> Self {
        Value::Obj(obj)
    }
}

/// A value usable as a map key.
///
/// The projection excludes NaN floats (reflexivity) and mutable object
/// kinds (a mutated key would corrupt the index). Strings hash by identity
/// (interning makes pointer identity equivalent to byte equality), numbers
/// by their bit pattern, patterns by their source text, enum instances by
/// `(enum, case)`.
#[derive(Debug, Clone, Copy)]
pub enum HashableValue {
    /// null key
    Null,
    /// Boolean key
    Boolean(bool),
    /// Integer key, hashed by bit pattern
    Integer(i64),
    /// Float key, hashed by bit pattern; NaN is rejected at construction
    Float(u64),
    /// Immutable object key
    Obj(ObjRef),
}

impl HashableValue {
    /// Project a value into a hashable key. Returns `None` for NaN floats
    /// and mutable object kinds.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Boolean(b) => Some(Self::Boolean(b)),
            Value::Integer(n) => Some(Self::Integer(n)),
            Value::Float(n) => {
                if n.is_nan() {
                    None
                } else {
                    Some(Self::Float(n.to_bits()))
                }
            }
            Value::Obj(obj) => match obj.kind() {
                ObjKind::List
                | ObjKind::Map
                | ObjKind::ObjectInstance
                | ObjKind::Fiber
                | ObjKind::UpValue => None,
                _ => Some(Self::Obj(obj)),
            },
        }
    }

    /// Recover the value this key was projected from.
    pub fn into_value(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean(b) => Value::Boolean(b),
            Self::Integer(n) => Value::Integer(n),
            Self::Float(bits) => Value::Float(f64::from_bits(bits)),
            Self::Obj(obj) => Value::Obj(obj),
        }
    }
}

impl PartialEq for HashableValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Obj(a), Self::Obj(b)) => Obj::eql(*a, *b),
            _ => false,
        }
    }
}

impl Eq for HashableValue {}

impl std::hash::Hash for HashableValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Self::Integer(n) => {
                2u8.hash(state);
                n.hash(state);
            }
            Self::Float(bits) => {
                3u8.hash(state);
                bits.hash(state);
            }
            Self::Obj(obj) => {
                4u8.hash(state);
                // Patterns hash by source, enum instances by (enum, case),
                // everything else by identity, consistent with Obj::eql.
                match &**obj {
                    Obj::Pattern(pattern) => pattern.source().hash(state),
                    Obj::EnumInstance(instance) => {
                        instance.enum_ref.as_ptr().hash(state);
                        instance.case.hash(state);
                    }
                    _ => obj.as_ptr().hash(state),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_equality_has_no_coercion() {
        assert!(Value::Integer(1).eql(&Value::Integer(1)));
        assert!(!Value::Integer(1).eql(&Value::Float(1.0)));
        assert!(!Value::Float(1.0).eql(&Value::Integer(1)));
        assert!(Value::Null.eql(&Value::Null));
        assert!(!Value::Null.eql(&Value::Boolean(false)));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Boolean(true).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
    }

    #[test]
    fn nan_is_not_hashable() {
        assert!(HashableValue::from_value(Value::Float(f64::NAN)).is_none());
        assert!(HashableValue::from_value(Value::Float(1.5)).is_some());
    }

    #[test]
    fn float_keys_use_bit_pattern() {
        let a = HashableValue::from_value(Value::Float(-0.0)).unwrap();
        let b = HashableValue::from_value(Value::Float(0.0)).unwrap();
        // -0.0 and 0.0 differ by bit pattern, so they are distinct keys.
        assert_ne!(a, b);
    }
}
