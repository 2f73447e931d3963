//! Transport-neutral representation of property replies.
//!
//! Compound replies such as `IconPixmap` (`a(iiay)`) or `ToolTip` (`(sa(iiay)ss)`) are decoded
//! from this model on a best-effort basis: accessors return `None` or an empty slice on a shape
//! mismatch instead of failing the whole reply.

use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Str(String),
    ObjectPath(String),
    /// An `ay` array.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(Vec<Value>),
    /// Anything this protocol never needs to look into, kept by its signature for logging.
    Other(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::I32(x) => Some(x),
            Value::Byte(x) => Some(x.into()),
            Value::U32(x) => i32::try_from(x).ok(),
            Value::I64(x) => i32::try_from(x).ok(),
            Value::U64(x) => i32::try_from(x).ok(),
            _ => None,
        }
    }

    /// Fields of a struct, or nothing if this isn't one.
    pub fn fields(&self) -> &[Value] {
        match self {
            Value::Struct(fields) => fields,
            _ => &[],
        }
    }

    /// Elements of an array, or nothing if this isn't one.
    pub fn elements(&self) -> &[Value] {
        match self {
            Value::Array(elements) => elements,
            _ => &[],
        }
    }

    /// Bytes of an `ay`. An empty generic array counts as an empty byte array.
    pub fn as_bytes(&self) -> Option<Cow<'_, [u8]>> {
        match self {
            Value::Bytes(bytes) => Some(Cow::Borrowed(bytes)),
            Value::Array(elements) => elements
                .iter()
                .map(|e| match e {
                    Value::Byte(b) => Some(*b),
                    _ => None,
                })
                .collect::<Option<Vec<u8>>>()
                .map(Cow::Owned),
            _ => None,
        }
    }

    /// Strings of an `as`, skipping any element that isn't a string.
    pub fn to_string_list(&self) -> Vec<String> {
        self.elements().iter().filter_map(Value::as_str).map(str::to_owned).collect()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(strings: Vec<String>) -> Self {
        Value::Array(strings.into_iter().map(Value::Str).collect())
    }
}
