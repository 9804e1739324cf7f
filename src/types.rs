use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

/// Values bound to statement placeholders and read back from result columns.
///
/// Each driver maps the variant onto its native bind type when the statement is bound:
/// ```rust
/// use sql_worker_pool::RowValues;
///
/// let params: Vec<RowValues> = vec![7_u32.into(), "Thrall".into(), true.into()];
/// assert_eq!(params[0].as_int(), Some(7));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Signed integer (64-bit)
    Int(i64),
    /// Unsigned integer (64-bit); GUIDs and account ids live here
    UInt(u64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view, accepting unsigned values that fit in `i64`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RowValues::Int(value) => Some(*value),
            RowValues::UInt(value) => i64::try_from(*value).ok(),
            RowValues::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            RowValues::UInt(value) => Some(*value),
            RowValues::Int(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RowValues::Bool(value) => Some(*value),
            RowValues::Int(1) | RowValues::UInt(1) => Some(true),
            RowValues::Int(0) | RowValues::UInt(0) => Some(false),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<JsonValue> {
        match self {
            RowValues::JSON(value) => Some(value.clone()),
            RowValues::Text(s) => serde_json::from_str(s).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

macro_rules! row_value_from {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl From<$ty> for RowValues {
                fn from(value: $ty) -> Self {
                    RowValues::$variant(<$target>::from(value))
                }
            }
        )*
    };
}

row_value_from! {
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
    bool => Bool as bool,
    String => Text as String,
    NaiveDateTime => Timestamp as NaiveDateTime,
    JsonValue => JSON as JsonValue,
    Vec<u8> => Blob as Vec<u8>,
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_owned())
    }
}

impl From<&[u8]> for RowValues {
    fn from(value: &[u8]) -> Self {
        RowValues::Blob(value.to_vec())
    }
}

impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValues::Null, Into::into)
    }
}
