//! Scalar values exchanged with the database.
//!
//! `Value` is both the content of a decoded scan slot and a positional
//! parameter bound to a statement. `SqlValue` converts record field types to
//! and from it.

/// A database scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Type of a scan slot, chosen from the record field a column is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// A Rust type that can live in a record field.
pub trait SqlValue: Sized {
    /// Scan slot type used when a column is bound to a field of this type.
    const FIELD_TYPE: FieldType;

    /// Convert the field into a bindable value.
    fn to_value(&self) -> Value;

    /// Convert a scanned value into the field type.
    fn from_value(value: Value) -> Result<Self, String>;
}

fn mismatch(expected: FieldType, value: &Value) -> String {
    if value.is_null() {
        format!("NULL cannot be stored in a non-nullable {} field", expected)
    } else {
        format!("expected {} value, got {}", expected, value.type_name())
    }
}

impl SqlValue for bool {
    const FIELD_TYPE: FieldType = FieldType::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Int(v) => Ok(v != 0),
            other => Err(mismatch(FieldType::Bool, &other)),
        }
    }
}

impl SqlValue for i64 {
    const FIELD_TYPE: FieldType = FieldType::Int;

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Int(v) => Ok(v),
            other => Err(mismatch(FieldType::Int, &other)),
        }
    }
}

macro_rules! narrow_int {
    ($($ty:ty),+) => {
        $(
            impl SqlValue for $ty {
                const FIELD_TYPE: FieldType = FieldType::Int;

                fn to_value(&self) -> Value {
                    Value::Int(*self as i64)
                }

                fn from_value(value: Value) -> Result<Self, String> {
                    match value {
                        Value::Int(v) => <$ty>::try_from(v).map_err(|_| {
                            format!("integer {} out of range for {}", v, stringify!($ty))
                        }),
                        other => Err(mismatch(FieldType::Int, &other)),
                    }
                }
            }
        )+
    };
}

narrow_int!(i16, i32);

impl SqlValue for f64 {
    const FIELD_TYPE: FieldType = FieldType::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            other => Err(mismatch(FieldType::Float, &other)),
        }
    }
}

impl SqlValue for f32 {
    const FIELD_TYPE: FieldType = FieldType::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self as f64)
    }

    fn from_value(value: Value) -> Result<Self, String> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl SqlValue for String {
    const FIELD_TYPE: FieldType = FieldType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Text(v) => Ok(v),
            other => Err(mismatch(FieldType::Text, &other)),
        }
    }
}

impl SqlValue for Vec<u8> {
    const FIELD_TYPE: FieldType = FieldType::Bytes;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            other => Err(mismatch(FieldType::Bytes, &other)),
        }
    }
}

impl<T: SqlValue> SqlValue for Option<T> {
    const FIELD_TYPE: FieldType = T::FIELD_TYPE;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, SqlValue::to_value)
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
