//! Runtime values and the Rust ↔ value marshalling used by typed handles.

use std::fmt;

use serde::{Deserialize, Serialize};

use ilforge_core::ValueType;

/// One evaluation-stack slot.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// No value (`void` return).
    Void,
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// Owned UTF-8 string.
    Str(String),
}

impl Value {
    /// Type tag of this value.
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Void => ValueType::Void,
            Self::Bool(_) => ValueType::Bool,
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F64(_) => ValueType::F64,
            Self::Str(_) => ValueType::Str,
        }
    }

    /// Parses command-line text as a value of type `ty`.
    pub fn parse_as(ty: ValueType, text: &str) -> Result<Self, String> {
        let bad = |e: &dyn fmt::Display| format!("`{text}` is not a valid {ty}: {e}");
        match ty {
            ValueType::Void => Err(format!("cannot pass `{text}` as void")),
            ValueType::Bool => text.parse().map(Self::Bool).map_err(|e| bad(&e)),
            ValueType::I32 => text.parse().map(Self::I32).map_err(|e| bad(&e)),
            ValueType::I64 => text.parse().map(Self::I64).map_err(|e| bad(&e)),
            ValueType::F64 => text.parse().map(Self::F64).map_err(|e| bad(&e)),
            ValueType::Str => Ok(Self::Str(text.to_owned())),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "Void"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::I32(i) => write!(f, "I32({i})"),
            Self::I64(i) => write!(f, "I64({i})"),
            Self::F64(x) => write!(f, "F64({x})"),
            Self::Str(s) if s.chars().count() > 64 => {
                let head: String = s.chars().take(64).collect();
                write!(f, "Str({head:?}…)")
            }
            Self::Str(s) => write!(f, "Str({s:?})"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::I32(i) => write!(f, "{i}"),
            Self::I64(i) => write!(f, "{i}"),
            Self::F64(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<()> for Value { fn from((): ()) -> Self { Self::Void } }
impl From<bool> for Value { fn from(v: bool) -> Self { Self::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Self::I32(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Self::I64(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Self::F64(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Self::Str(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Self::Str(v.to_owned()) } }

/* ─────────────────────────── Marshalling ─────────────────────────── */

/// A Rust type with a fixed counterpart in the instruction vocabulary.
pub trait Marshal: Sized + Send + 'static {
    /// Vocabulary type this Rust type maps to.
    const VALUE_TYPE: ValueType;

    /// Rust → value.
    fn into_value(self) -> Value;

    /// Value → Rust; `None` when the tag does not match exactly.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! marshal {
    ($($ty:ty => $variant:ident),+ $(,)?) => {$(
        impl Marshal for $ty {
            const VALUE_TYPE: ValueType = ValueType::$variant;
            fn into_value(self) -> Value { Value::$variant(self) }
            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    )+};
}

marshal!(bool => Bool, i32 => I32, i64 => I64, f64 => F64, String => Str);

impl Marshal for () {
    const VALUE_TYPE: ValueType = ValueType::Void;
    fn into_value(self) -> Value { Value::Void }
    fn from_value(value: Value) -> Option<Self> { matches!(value, Value::Void).then_some(()) }
}

/// An ordered argument list: `()`, a single marshalled value, or a tuple.
pub trait ArgList: Sized + Send + 'static {
    /// Parameter types, in order.
    fn value_types() -> Vec<ValueType>;

    /// Arguments as values, in order.
    fn into_values(self) -> Vec<Value>;
}

impl ArgList for () {
    fn value_types() -> Vec<ValueType> { Vec::new() }
    fn into_values(self) -> Vec<Value> { Vec::new() }
}

macro_rules! single_arg {
    ($($ty:ty),+) => {$(
        impl ArgList for $ty {
            fn value_types() -> Vec<ValueType> { vec![<$ty as Marshal>::VALUE_TYPE] }
            fn into_values(self) -> Vec<Value> { vec![self.into_value()] }
        }
    )+};
}

single_arg!(bool, i32, i64, f64, String);

macro_rules! tuple_args {
    ($(($($name:ident),+))+) => {$(
        impl<$($name: Marshal),+> ArgList for ($($name,)+) {
            fn value_types() -> Vec<ValueType> { vec![$($name::VALUE_TYPE),+] }
            #[allow(non_snake_case)]
            fn into_values(self) -> Vec<Value> {
                let ($($name,)+) = self;
                vec![$($name.into_value()),+]
            }
        }
    )+};
}

tuple_args! {
    (A)
    (A, B)
    (A, B, C)
    (A, B, C, D)
    (A, B, C, D, E)
    (A, B, C, D, E, F)
}
