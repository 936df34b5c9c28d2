use serde::{Deserialize, Serialize};
use std::fmt;

/// A register value as seen on the bus.
///
/// Numeric registers carry integers (unscaled) or floats (scaled by the
/// register factor); mapped registers carry their label text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    /// Integer value.
    Integer(i64),

    /// Floating point value.
    Float(f64),

    /// Text value (mapping labels, pass-through commands).
    Text(String),
}

impl RegisterValue {
    /// Decode an inbound command payload.
    ///
    /// Tries an integer parse first, then a floating point parse, and
    /// otherwise passes the text through unchanged.
    ///
    /// # Example
    /// ```
    /// use heatpump_common::value::RegisterValue;
    ///
    /// assert_eq!(RegisterValue::parse_payload("42"), RegisterValue::Integer(42));
    /// assert_eq!(RegisterValue::parse_payload("21.5"), RegisterValue::Float(21.5));
    /// assert_eq!(
    ///     RegisterValue::parse_payload("ON"),
    ///     RegisterValue::Text("ON".to_string())
    /// );
    /// ```
    pub fn parse_payload(payload: &str) -> Self {
        let trimmed = payload.trim();

        if let Ok(v) = trimmed.parse::<i64>() {
            return RegisterValue::Integer(v);
        }

        if let Ok(v) = trimmed.parse::<f64>() {
            return RegisterValue::Float(v);
        }

        RegisterValue::Text(payload.to_string())
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RegisterValue::Integer(v) => Some(*v as f64),
            RegisterValue::Float(v) => Some(*v),
            RegisterValue::Text(_) => None,
        }
    }

    /// Text view of the value, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RegisterValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Payload published on the value topic.
    pub fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Integer(v) => write!(f, "{}", v),
            // Whole floats keep a decimal point so consumers see a float.
            RegisterValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            RegisterValue::Float(v) => write!(f, "{}", v),
            RegisterValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RegisterValue {
    fn from(v: i64) -> Self {
        RegisterValue::Integer(v)
    }
}

impl From<f64> for RegisterValue {
    fn from(v: f64) -> Self {
        RegisterValue::Float(v)
    }
}

impl From<String> for RegisterValue {
    fn from(v: String) -> Self {
        RegisterValue::Text(v)
    }
}

impl From<&str> for RegisterValue {
    fn from(v: &str) -> Self {
        RegisterValue::Text(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload_precedence() {
        assert_eq!(RegisterValue::parse_payload("10"), RegisterValue::Integer(10));
        assert_eq!(RegisterValue::parse_payload("-3"), RegisterValue::Integer(-3));
        assert_eq!(RegisterValue::parse_payload(" 7 "), RegisterValue::Integer(7));
        assert_eq!(RegisterValue::parse_payload("1.0"), RegisterValue::Float(1.0));
        assert_eq!(RegisterValue::parse_payload("-0.5"), RegisterValue::Float(-0.5));
        assert_eq!(
            RegisterValue::parse_payload("Auto"),
            RegisterValue::Text("Auto".to_string())
        );
        assert_eq!(
            RegisterValue::parse_payload(""),
            RegisterValue::Text(String::new())
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(RegisterValue::Integer(42).to_payload(), "42");
        assert_eq!(RegisterValue::Float(21.5).to_payload(), "21.5");
        assert_eq!(RegisterValue::Float(20.0).to_payload(), "20.0");
        assert_eq!(RegisterValue::from("OFF").to_payload(), "OFF");
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(RegisterValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(RegisterValue::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(RegisterValue::from("x").as_f64(), None);
        assert_eq!(RegisterValue::from("x").as_text(), Some("x"));
    }

    #[test]
    fn test_untagged_serde() {
        let v: RegisterValue = serde_json::from_str("12").unwrap();
        assert_eq!(v, RegisterValue::Integer(12));
        let v: RegisterValue = serde_json::from_str("1.5").unwrap();
        assert_eq!(v, RegisterValue::Float(1.5));
        let v: RegisterValue = serde_json::from_str("\"ON\"").unwrap();
        assert_eq!(v, RegisterValue::Text("ON".to_string()));
    }
}
