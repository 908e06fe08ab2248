use std::fmt;

/// A single cell as handed over by a driver, resolved once at the adapter
/// boundary. Renderers never see this type; they consume the normalized text.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i128),
    Float(f64),
    Boolean(bool),
    Binary(Vec<u8>),
}

impl CellValue {
    /// Canonical, locale-independent text for this cell.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Text(text) => text,
            Self::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(error) => String::from_utf8_lossy(error.as_bytes()).into_owned(),
            },
            Self::Integer(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Boolean(value) => value.to_string(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Text(text) => f.write_str(text),
            Self::Binary(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Integer(i128::from(value))
    }
}

impl From<u64> for CellValue {
    fn from(value: u64) -> Self {
        Self::Integer(i128::from(value))
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::CellValue;

    #[test]
    fn null_normalizes_to_literal_text() {
        assert_eq!(CellValue::Null.into_text(), "NULL");
        assert_eq!(CellValue::from(None::<i64>).into_text(), "NULL");
    }

    #[test]
    fn numbers_and_booleans_use_canonical_form() {
        assert_eq!(CellValue::from(-42_i64).into_text(), "-42");
        assert_eq!(CellValue::from(u64::MAX).into_text(), "18446744073709551615");
        assert_eq!(CellValue::Float(1.5).into_text(), "1.5");
        assert_eq!(CellValue::Float(3.0).into_text(), "3");
        assert_eq!(CellValue::Boolean(true).into_text(), "true");
    }

    #[test]
    fn binary_payloads_decode_as_text() {
        assert_eq!(CellValue::Binary(b"hello".to_vec()).into_text(), "hello");
        assert_eq!(
            CellValue::Binary(vec![b'a', 0xff, b'b']).into_text(),
            "a\u{fffd}b"
        );
    }

    #[test]
    fn display_matches_normalized_text() {
        for value in [
            CellValue::Null,
            CellValue::from("x"),
            CellValue::Integer(7),
            CellValue::Float(0.25),
            CellValue::Boolean(false),
        ] {
            assert_eq!(value.to_string(), value.clone().into_text());
        }
    }
}
