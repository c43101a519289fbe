//! Type-erased values over a closed set of registered shapes.
//!
//! A [`TypedValue`] carries a shape tag and a payload of that shape. Equality
//! and hashing dispatch on the tag and then on the payload's declared fields,
//! so two values that compare equal always hash equal.
//!
//! Floating point fields are compared by canonical bit pattern: `-0.0` is
//! folded into `0.0` and every NaN into a single NaN.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Identifier of a registered payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeId {
    Text,
    Int,
    Float,
    Bool,
    StringInt,
    StringIntFloat,
    Vector3,
}

impl ShapeId {
    /// Every registered shape.
    pub const ALL: [ShapeId; 7] = [
        ShapeId::Text,
        ShapeId::Int,
        ShapeId::Float,
        ShapeId::Bool,
        ShapeId::StringInt,
        ShapeId::StringIntFloat,
        ShapeId::Vector3,
    ];

    /// Wire name of the shape.
    pub fn name(&self) -> &'static str {
        match self {
            ShapeId::Text => "text",
            ShapeId::Int => "int",
            ShapeId::Float => "float",
            ShapeId::Bool => "bool",
            ShapeId::StringInt => "string_int",
            ShapeId::StringIntFloat => "string_int_float",
            ShapeId::Vector3 => "vector3",
        }
    }
}

impl std::fmt::Display for ShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ShapeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ShapeId::ALL
            .iter()
            .copied()
            .find(|shape| shape.name() == s)
            .ok_or_else(|| Error::UnknownShape(s.to_string()))
    }
}

fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

/// A string paired with an integer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringInt {
    pub string_value: String,
    pub int_value: i64,
}

impl StringInt {
    pub fn new(string_value: impl Into<String>, int_value: i64) -> Self {
        Self {
            string_value: string_value.into(),
            int_value,
        }
    }
}

/// A string, an integer and a float.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StringIntFloat {
    pub string_value: String,
    pub int_value: i64,
    pub float_value: f64,
}

impl StringIntFloat {
    pub fn new(string_value: impl Into<String>, int_value: i64, float_value: f64) -> Self {
        Self {
            string_value: string_value.into(),
            int_value,
            float_value,
        }
    }
}

impl PartialEq for StringIntFloat {
    fn eq(&self, other: &Self) -> bool {
        self.string_value == other.string_value
            && self.int_value == other.int_value
            && canonical_bits(self.float_value) == canonical_bits(other.float_value)
    }
}

impl Eq for StringIntFloat {}

impl Hash for StringIntFloat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.string_value.hash(state);
        self.int_value.hash(state);
        canonical_bits(self.float_value).hash(state);
    }
}

/// Three-component vector.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl PartialEq for Vector3 {
    fn eq(&self, other: &Self) -> bool {
        canonical_bits(self.x) == canonical_bits(other.x)
            && canonical_bits(self.y) == canonical_bits(other.y)
            && canonical_bits(self.z) == canonical_bits(other.z)
    }
}

impl Eq for Vector3 {}

impl Hash for Vector3 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        canonical_bits(self.x).hash(state);
        canonical_bits(self.y).hash(state);
        canonical_bits(self.z).hash(state);
    }
}

/// A payload of one registered shape.
///
/// Serialized as `{"shape": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "snake_case")]
pub enum TypedValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    StringInt(StringInt),
    StringIntFloat(StringIntFloat),
    Vector3(Vector3),
}

impl TypedValue {
    /// Build a value from a shape name and a dynamic payload.
    ///
    /// Fails with [`Error::UnknownShape`] if the name is not registered and
    /// [`Error::InvalidPayload`] if the payload does not decode into the shape.
    pub fn make(shape: &str, payload: serde_json::Value) -> Result<Self> {
        Self::from_shape(shape.parse()?, payload)
    }

    /// Build a value of a known shape from a dynamic payload.
    pub fn from_shape(shape: ShapeId, payload: serde_json::Value) -> Result<Self> {
        fn decode<T: serde::de::DeserializeOwned>(
            shape: ShapeId,
            payload: serde_json::Value,
        ) -> Result<T> {
            serde_json::from_value(payload)
                .map_err(|e| Error::InvalidPayload(format!("{}: {}", shape, e)))
        }

        Ok(match shape {
            ShapeId::Text => TypedValue::Text(decode(shape, payload)?),
            ShapeId::Int => TypedValue::Int(decode(shape, payload)?),
            ShapeId::Float => TypedValue::Float(decode(shape, payload)?),
            ShapeId::Bool => TypedValue::Bool(decode(shape, payload)?),
            ShapeId::StringInt => TypedValue::StringInt(decode(shape, payload)?),
            ShapeId::StringIntFloat => TypedValue::StringIntFloat(decode(shape, payload)?),
            ShapeId::Vector3 => TypedValue::Vector3(decode(shape, payload)?),
        })
    }

    /// The shape tag of this value.
    pub fn shape(&self) -> ShapeId {
        match self {
            TypedValue::Text(_) => ShapeId::Text,
            TypedValue::Int(_) => ShapeId::Int,
            TypedValue::Float(_) => ShapeId::Float,
            TypedValue::Bool(_) => ShapeId::Bool,
            TypedValue::StringInt(_) => ShapeId::StringInt,
            TypedValue::StringIntFloat(_) => ShapeId::StringIntFloat,
            TypedValue::Vector3(_) => ShapeId::Vector3,
        }
    }

    /// Deterministic hash over the shape tag and declared fields.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Borrow the payload as `S`, or `None` if the shape differs.
    pub fn get_as<S: Shape>(&self) -> Option<&S> {
        S::from_value(self)
    }

    /// Borrow the payload as `S`, or a [`Error::ShapeMismatch`].
    pub fn try_get_as<S: Shape>(&self) -> Result<&S> {
        S::from_value(self).ok_or(Error::ShapeMismatch {
            expected: S::ID,
            actual: self.shape(),
        })
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypedValue::Text(a), TypedValue::Text(b)) => a == b,
            (TypedValue::Int(a), TypedValue::Int(b)) => a == b,
            (TypedValue::Float(a), TypedValue::Float(b)) => canonical_bits(*a) == canonical_bits(*b),
            (TypedValue::Bool(a), TypedValue::Bool(b)) => a == b,
            (TypedValue::StringInt(a), TypedValue::StringInt(b)) => a == b,
            (TypedValue::StringIntFloat(a), TypedValue::StringIntFloat(b)) => a == b,
            (TypedValue::Vector3(a), TypedValue::Vector3(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypedValue {}

impl Hash for TypedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shape().hash(state);
        match self {
            TypedValue::Text(v) => v.hash(state),
            TypedValue::Int(v) => v.hash(state),
            TypedValue::Float(v) => canonical_bits(*v).hash(state),
            TypedValue::Bool(v) => v.hash(state),
            TypedValue::StringInt(v) => v.hash(state),
            TypedValue::StringIntFloat(v) => v.hash(state),
            TypedValue::Vector3(v) => v.hash(state),
        }
    }
}

impl std::fmt::Display for TypedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypedValue::Text(v) => write!(f, "text:{:?}", v),
            TypedValue::Int(v) => write!(f, "int:{}", v),
            TypedValue::Float(v) => write!(f, "float:{}", v),
            TypedValue::Bool(v) => write!(f, "bool:{}", v),
            TypedValue::StringInt(v) => write!(f, "string_int:({:?}, {})", v.string_value, v.int_value),
            TypedValue::StringIntFloat(v) => write!(
                f,
                "string_int_float:({:?}, {}, {})",
                v.string_value, v.int_value, v.float_value
            ),
            TypedValue::Vector3(v) => write!(f, "vector3:({}, {}, {})", v.x, v.y, v.z),
        }
    }
}

/// A payload type registered as a [`TypedValue`] shape.
pub trait Shape: Sized + Clone {
    /// Tag this type is stored under.
    const ID: ShapeId;

    /// Wrap into a [`TypedValue`].
    fn into_value(self) -> TypedValue;

    /// Borrow out of a [`TypedValue`] carrying this shape.
    fn from_value(value: &TypedValue) -> Option<&Self>;
}

macro_rules! register_shape {
    ($ty:ty, $variant:ident) => {
        impl Shape for $ty {
            const ID: ShapeId = ShapeId::$variant;

            fn into_value(self) -> TypedValue {
                TypedValue::$variant(self)
            }

            fn from_value(value: &TypedValue) -> Option<&Self> {
                match value {
                    TypedValue::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for TypedValue {
            fn from(value: $ty) -> Self {
                TypedValue::$variant(value)
            }
        }
    };
}

register_shape!(String, Text);
register_shape!(i64, Int);
register_shape!(f64, Float);
register_shape!(bool, Bool);
register_shape!(StringInt, StringInt);
register_shape!(StringIntFloat, StringIntFloat);
register_shape!(Vector3, Vector3);

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::Text(value.to_string())
    }
}
