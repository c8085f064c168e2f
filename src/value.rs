use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// A dynamically typed script value.
///
/// Values never fail to coerce: malformed numeric text becomes NaN in
/// arithmetic and renders as "NaN", so a faulty script degrades instead of
/// aborting its thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
}

impl Default for Value {
    fn default() -> Self {
        Value::Number(0.0)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl Value {
    /// The fallback produced when a script reads something that does not exist.
    /// It reads as 0 in numeric contexts and as "" in text contexts.
    pub fn empty() -> Self {
        Value::String(String::new())
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Boolean(b) => bool_to_number(*b),
            Value::String(s) => parse_number(s).unwrap_or(f64::NAN),
        }
    }

    /// Like [`Value::to_number`], but `None` when the value is text that does
    /// not look like a number. Used to decide between numeric and textual
    /// behaviour of `+` and of comparisons.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(bool_to_number(*b)),
            Value::String(s) => parse_number(s),
        }
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
        }
    }

    /// Rounds to the nearest whole number, treating NaN as 0. Used for counts
    /// and indices.
    pub fn to_index(&self) -> i64 {
        let n = self.to_number();
        if n.is_nan() {
            0
        } else {
            n.round() as i64
        }
    }

    pub fn add(&self, other: &Value) -> Value {
        match (self.as_numeric(), other.as_numeric()) {
            (Some(a), Some(b)) => Value::Number(a + b),
            _ => Value::String(format!(
                "{}{}",
                self.to_display_string(),
                other.to_display_string()
            )),
        }
    }

    pub fn subtract(&self, other: &Value) -> Value {
        Value::Number(self.to_number() - other.to_number())
    }

    pub fn multiply(&self, other: &Value) -> Value {
        Value::Number(self.to_number() * other.to_number())
    }

    pub fn divide(&self, other: &Value) -> Value {
        let divisor = other.to_number();
        if divisor == 0.0 {
            log::debug!("division by zero yields NaN");
            return Value::Number(f64::NAN);
        }
        Value::Number(self.to_number() / divisor)
    }

    /// Modulo whose result takes the sign of the divisor.
    pub fn modulo(&self, other: &Value) -> Value {
        let n = self.to_number();
        let m = other.to_number();
        if m == 0.0 {
            log::debug!("modulo by zero yields NaN");
            return Value::Number(f64::NAN);
        }
        let mut result = n % m;
        if result != 0.0 && (result < 0.0) != (m < 0.0) {
            result += m;
        }
        Value::Number(result)
    }

    /// Numeric comparison when both sides look numeric, otherwise a
    /// case-insensitive text comparison.
    pub fn compare(&self, other: &Value) -> Ordering {
        let numeric = |v: &Value| match v {
            Value::String(s) if s.trim().is_empty() => None,
            _ => v.as_numeric().filter(|n| !n.is_nan()),
        };
        if let (Some(a), Some(b)) = (numeric(self), numeric(other)) {
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
        let a = self.to_display_string().to_lowercase();
        let b = other.to_display_string().to_lowercase();
        a.cmp(&b)
    }

    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

fn bool_to_number(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Parses numeric text the way the stage expects: surrounding whitespace is
/// ignored, empty text is 0, `0x`/`0b`/`0o` prefixes are honoured and only
/// the spelled-out `Infinity`/`NaN` words are accepted.
pub fn parse_number(text: &str) -> Option<f64> {
    let s = text.trim();
    if s.is_empty() {
        return Some(0.0);
    }
    let (negative, unsigned) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let sign = if negative { -1.0 } else { 1.0 };
    match unsigned {
        "Infinity" => return Some(sign * f64::INFINITY),
        "NaN" => return Some(f64::NAN),
        _ => {}
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0b", 2), ("0B", 2), ("0o", 8), ("0O", 8)] {
        if let Some(digits) = unsigned.strip_prefix(prefix) {
            if negative || digits.is_empty() {
                return None;
            }
            return u64::from_str_radix(digits, radix).ok().map(|v| v as f64);
        }
    }
    if !unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return None;
    }
    s.parse::<f64>().ok()
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{}", n as i128);
    }
    format!("{}", n)
}

/// Evaluates a named unary math function. Trigonometry works in degrees.
pub fn math_op(name: &str, n: f64) -> Option<f64> {
    let out = match name.to_ascii_lowercase().as_str() {
        "abs" => n.abs(),
        "floor" => n.floor(),
        "ceiling" => n.ceil(),
        "sqrt" => n.sqrt(),
        "sin" => round_trig(n.to_radians().sin()),
        "cos" => round_trig(n.to_radians().cos()),
        "tan" => tan_degrees(n),
        "asin" => n.asin().to_degrees(),
        "acos" => n.acos().to_degrees(),
        "atan" => n.atan().to_degrees(),
        "ln" => n.ln(),
        "log" => n.log10(),
        "e ^" => n.exp(),
        "10 ^" => 10f64.powf(n),
        _ => return None,
    };
    Some(out)
}

fn round_trig(v: f64) -> f64 {
    (v * 1e10).round() / 1e10
}

fn tan_degrees(n: f64) -> f64 {
    let angle = n.rem_euclid(360.0);
    if angle == 90.0 {
        f64::INFINITY
    } else if angle == 270.0 {
        f64::NEG_INFINITY
    } else {
        round_trig(n.to_radians().tan())
    }
}

// Non-finite numbers have no JSON form; they travel as their display text,
// which coerces back to the same number.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(n) => serializer.serialize_str(&format_number(*n)),
            Value::String(s) => serializer.serialize_str(s),
            Value::Boolean(b) => serializer.serialize_bool(*b),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "a number, string or boolean")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Boolean(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Number(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                Ok(Value::Number(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Number(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::String(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::String(v))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_numeric_only_when_both_sides_parse() {
        assert_eq!(Value::from("5").add(&Value::from(3.0)), Value::Number(8.0));
        assert_eq!(
            Value::from("cat").add(&Value::from(3.0)),
            Value::String("cat3".to_string())
        );
        assert_eq!(Value::Boolean(true).add(&Value::from(1.0)), Value::Number(2.0));
    }

    #[test]
    fn malformed_text_propagates_nan_but_never_panics() {
        let v = Value::from("12abc").multiply(&Value::from(2.0));
        assert!(v.to_number().is_nan());
        assert_eq!(v.to_display_string(), "NaN");
        assert!(!v.to_boolean());
    }

    #[test]
    fn truthiness_follows_stage_rules() {
        assert!(!Value::from("").to_boolean());
        assert!(!Value::from("0").to_boolean());
        assert!(!Value::from(0.0).to_boolean());
        assert!(Value::from("0.0").to_boolean());
        assert!(Value::from("hello").to_boolean());
        assert!(Value::from(-1.0).to_boolean());
        assert!(!Value::from("false").to_boolean());
        assert!(!Value::from("FALSE").to_boolean());
        assert!(!Value::from(f64::NAN).to_boolean());
        assert!(Value::from("no").to_boolean());
    }

    #[test]
    fn numbers_display_without_trailing_fraction() {
        assert_eq!(format_number(30.0), "30");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
    }

    #[test]
    fn division_and_modulo_by_zero_fall_back_to_nan() {
        assert!(Value::from(1.0).divide(&Value::from(0.0)).to_number().is_nan());
        assert!(Value::from(1.0).modulo(&Value::from("")).to_number().is_nan());
        assert_eq!(Value::from(-1.0).modulo(&Value::from(3.0)), Value::Number(2.0));
    }

    #[test]
    fn comparison_is_numeric_or_case_insensitive() {
        assert_eq!(Value::from("10").compare(&Value::from(9.0)), Ordering::Greater);
        assert!(Value::from("Apple").loosely_equals(&Value::from("apple")));
        assert_eq!(Value::from("abc").compare(&Value::from("abd")), Ordering::Less);
    }

    #[test]
    fn parse_number_accepts_radix_prefixes_and_rejects_words() {
        assert_eq!(parse_number(" 0x1F "), Some(31.0));
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("-Infinity"), Some(f64::NEG_INFINITY));
    }
}
