//! Type tokens and shape descriptors
//!
//! `TypeToken<T>` is a zero-sized marker: it lets the Rust type system carry
//! `T` through `add_required_input::<T>()` into the `Expr<T>` handed back to
//! the author. Nothing ever inspects a token at runtime.
//!
//! What the validation pass does look at is a [`Shape`]: the declared shape of
//! a parameter (taken from `T: Shaped` when the parameter is declared) and the
//! inferred shape of the expression bound to it.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde_json::Value;

/// Phantom marker used to declare a parameter's type
pub struct TypeToken<T: ?Sized>(PhantomData<fn() -> T>);

impl<T: ?Sized> Clone for TypeToken<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for TypeToken<T> {}

impl<T: ?Sized> fmt::Debug for TypeToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TypeToken")
    }
}

/// Create a type token for `T`
pub fn type_token<T: ?Sized>() -> TypeToken<T> {
    TypeToken(PhantomData)
}

/// Structural shape of a value flowing through the workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Unknown or deliberately unconstrained
    Any,
    String,
    Number,
    Bool,
    Null,
    Array(Box<Shape>),
    Object,
    /// JSON text encoding a value of the inner shape
    Serialized(Box<Shape>),
}

impl Shape {
    pub fn array_of(inner: Shape) -> Self {
        Shape::Array(Box::new(inner))
    }

    pub fn serialized(inner: Shape) -> Self {
        Shape::Serialized(Box::new(inner))
    }

    /// Infer the shape of a concrete JSON value
    pub fn of_value(value: &Value) -> Shape {
        match value {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Bool,
            Value::Number(_) => Shape::Number,
            Value::String(_) => Shape::String,
            Value::Object(_) => Shape::Object,
            Value::Array(items) => {
                let mut element = None;
                for item in items {
                    let s = Shape::of_value(item);
                    element = Some(match element {
                        None => s,
                        Some(prev) => Shape::unify(&prev, &s).unwrap_or(Shape::Any),
                    });
                }
                Shape::array_of(element.unwrap_or(Shape::Any))
            }
        }
    }

    /// Narrowest shape covering both, `None` when they are incompatible
    pub fn unify(a: &Shape, b: &Shape) -> Option<Shape> {
        match (a, b) {
            (Shape::Any, other) | (other, Shape::Any) => Some(other.clone()),
            (Shape::Null, other) | (other, Shape::Null) => Some(other.clone()),
            (Shape::Array(x), Shape::Array(y)) => Shape::unify(x, y).map(Shape::array_of),
            (Shape::Serialized(x), Shape::Serialized(y)) => {
                Shape::unify(x, y).map(Shape::serialized)
            }
            (x, y) if x == y => Some(x.clone()),
            _ => None,
        }
    }

    /// Whether a value of shape `self` may be bound where `declared` is expected
    ///
    /// Parameters travel as strings, so serialized JSON satisfies the shape it
    /// encodes and a structured value satisfies its serialized form.
    pub fn is_assignable_to(&self, declared: &Shape) -> bool {
        match (self, declared) {
            (Shape::Any, _) | (_, Shape::Any) => true,
            (Shape::Null, _) => true,
            // JSON text is still text
            (Shape::Serialized(_), Shape::String) => true,
            (Shape::Serialized(inner), other) => inner.is_assignable_to(other),
            (actual, Shape::Serialized(inner)) => actual.is_assignable_to(inner),
            (Shape::Array(x), Shape::Array(y)) => x.is_assignable_to(y),
            (x, y) => x == y,
        }
    }

    /// Strip any serialization wrapper
    pub fn decoded(&self) -> Shape {
        match self {
            Shape::Serialized(inner) => inner.decoded(),
            other => other.clone(),
        }
    }

    pub fn is_boolean_like(&self) -> bool {
        matches!(self.decoded(), Shape::Bool | Shape::Any)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Any => write!(f, "any"),
            Shape::String => write!(f, "string"),
            Shape::Number => write!(f, "number"),
            Shape::Bool => write!(f, "bool"),
            Shape::Null => write!(f, "null"),
            Shape::Array(inner) => write!(f, "array<{}>", inner),
            Shape::Object => write!(f, "object"),
            Shape::Serialized(inner) => write!(f, "serialized<{}>", inner),
        }
    }
}

/// Static shape of a Rust type used behind a type token
pub trait Shaped {
    fn shape() -> Shape;
}

macro_rules! shaped {
    ($shape:expr => $($ty:ty),+ $(,)?) => {
        $(impl Shaped for $ty {
            fn shape() -> Shape {
                $shape
            }
        })+
    };
}

shaped!(Shape::String => String, str, &str);
shaped!(Shape::Number => i32, i64, u32, u64, usize, f64);
shaped!(Shape::Bool => bool);
shaped!(Shape::Any => Value);
shaped!(Shape::Null => ());

impl<T: Shaped> Shaped for Vec<T> {
    fn shape() -> Shape {
        Shape::array_of(T::shape())
    }
}

impl<T: Shaped> Shaped for [T] {
    fn shape() -> Shape {
        Shape::array_of(T::shape())
    }
}

impl<T: Shaped> Shaped for Option<T> {
    fn shape() -> Shape {
        T::shape()
    }
}

impl<V> Shaped for BTreeMap<String, V> {
    fn shape() -> Shape {
        Shape::Object
    }
}

/// Marker for record-like configuration objects
///
/// Domain config types (cluster configs, snapshot configs) are opaque
/// objects to the builder.
pub struct Record;

impl Shaped for Record {
    fn shape() -> Shape {
        Shape::Object
    }
}

/// JSON text encoding a `T`
pub struct Serialized<T: ?Sized>(PhantomData<fn() -> T>);

impl<T: Shaped + ?Sized> Shaped for Serialized<T> {
    fn shape() -> Shape {
        Shape::serialized(T::shape())
    }
}

/// Image pull policy values accepted by containers
pub struct ImagePullPolicy;

impl Shaped for ImagePullPolicy {
    fn shape() -> Shape {
        Shape::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_is_zero_sized() {
        assert_eq!(std::mem::size_of::<TypeToken<Vec<String>>>(), 0);
    }

    #[test]
    fn test_static_shapes() {
        assert_eq!(<Vec<String>>::shape(), Shape::array_of(Shape::String));
        assert_eq!(<Serialized<Record>>::shape(), Shape::serialized(Shape::Object));
        assert_eq!(<i64>::shape(), Shape::Number);
    }

    #[test]
    fn test_of_value_homogeneous_array() {
        assert_eq!(
            Shape::of_value(&json!([1, 2, 3])),
            Shape::array_of(Shape::Number)
        );
        assert_eq!(Shape::of_value(&json!([])), Shape::array_of(Shape::Any));
    }

    #[test]
    fn test_unify_rejects_mixed() {
        assert!(Shape::unify(&Shape::String, &Shape::Number).is_none());
        assert_eq!(
            Shape::unify(&Shape::Null, &Shape::String),
            Some(Shape::String)
        );
    }

    #[test]
    fn test_serialized_assignability() {
        let cfg = Shape::serialized(Shape::Object);
        assert!(cfg.is_assignable_to(&Shape::Object));
        assert!(Shape::Object.is_assignable_to(&cfg));
        assert!(cfg.is_assignable_to(&Shape::String));
        assert!(!Shape::Number.is_assignable_to(&Shape::String));
        assert!(Shape::Any.is_assignable_to(&Shape::Bool));
    }
}
