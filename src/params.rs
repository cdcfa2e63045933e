//! Parameter rows and their coercion into the bundle handed to user code.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A key/value parameter as entered in the form
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParamPair {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl ParamPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Trim every row and drop the ones with an empty key.
pub fn collect_pairs(rows: &[ParamPair]) -> Vec<ParamPair> {
    rows.iter()
        .map(|row| ParamPair::new(row.key.trim(), row.value.trim()))
        .filter(|row| !row.key.is_empty())
        .collect()
}

/// Build the parameter object from form rows. A repeated key keeps the
/// value of its last row.
pub fn build_params(rows: &[ParamPair]) -> Map<String, Value> {
    let mut params = Map::new();
    for pair in collect_pairs(rows) {
        let value = coerce_value(&pair.value);
        params.insert(pair.key, value);
    }
    params
}

/// Coerce raw parameter text: JSON first, then a JavaScript-style numeric
/// conversion, then the text itself.
pub fn coerce_value(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    if !raw.is_empty() {
        if let Some(number) = js_number(raw).and_then(number_value) {
            return number;
        }
    }
    Value::String(raw.to_string())
}

fn is_js_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{feff}'
}

/// Numeric value of `text` under `Number(text)`, or `None` where that
/// yields `NaN`.
pub fn js_number(text: &str) -> Option<f64> {
    let s = text.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return Some(0.0);
    }

    let radix = match s.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return parse_radix(&s[2..], radix);
    }

    let (sign, unsigned) = match s.as_bytes()[0] {
        b'+' => (1.0, &s[1..]),
        b'-' => (-1.0, &s[1..]),
        _ => (1.0, s),
    };
    if unsigned == "Infinity" {
        return Some(sign * f64::INFINITY);
    }
    if !is_decimal_literal(unsigned) {
        return None;
    }
    unsigned.parse::<f64>().ok().map(|n| sign * n)
}

fn parse_radix(digits: &str, radix: u32) -> Option<f64> {
    if digits.is_empty() {
        return None;
    }
    digits.chars().try_fold(0f64, |acc, c| {
        c.to_digit(radix).map(|d| acc * radix as f64 + d as f64)
    })
}

/// `digits [. digits] [e [+-] digits]` with at least one mantissa digit.
fn is_decimal_literal(s: &str) -> bool {
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };

    let mut parts = mantissa.splitn(2, '.');
    let int_part = parts.next().unwrap_or_default();
    let frac_part = parts.next().unwrap_or_default();
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return false;
    }
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }

    match exponent {
        None => true,
        Some(exp) => {
            let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            !exp.is_empty() && all_digits(exp)
        }
    }
}

/// JSON has no room for non-finite numbers.
fn number_value(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        return Some(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n).map(Value::Number)
}
