//! Parsing of the free-form value fields that sweeps are specified with.
//!
//! A field is a `+`-separated list of segments, each of which is one of
//!
//! - a range `start-end:step` (inclusive of `end`, floats allowed),
//! - a comma-separated list `a, b, c`,
//! - a single value.
//!
//! For example, `2-8:2+16,32` produces `2, 4, 6, 8, 16, 32`. Tokens are kept as strings; casting
//! to numbers happens where the value is used.

use log::warn;

use crate::error::CapsuleError;

/// Range values are rounded to this many decimal places so that `0.1`-style steps do not
/// accumulate binary floating point noise.
const RANGE_DECIMALS: i32 = 8;

/// Parse a value field into its tokens. Empty input yields no tokens.
pub fn parse_input(input: &str) -> Vec<String> {
    input
        .split('+')
        .flat_map(|segment| parse_segment(segment.trim()))
        .collect()
}

fn parse_segment(segment: &str) -> Vec<String> {
    if segment.is_empty() {
        return vec![];
    }

    // The range form wins whenever both of its delimiters are present.
    if segment.contains('-') && segment.contains(':') {
        match parse_range(segment) {
            Ok(values) => values,
            Err(err) => {
                warn!("Ignoring range \"{}\": {}", segment, err);
                vec![]
            }
        }
    } else if segment.contains(',') {
        segment
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect()
    } else {
        vec![segment.to_owned()]
    }
}

fn parse_range(segment: &str) -> Result<Vec<String>, failure::Error> {
    let (bounds, step) = split_once(segment, ':')
        .ok_or_else(|| failure::format_err!("expected start-end:step"))?;
    let (start, end) =
        split_once(bounds, '-').ok_or_else(|| failure::format_err!("expected start-end:step"))?;

    let start = start.trim().parse::<f64>()?;
    let end = end.trim().parse::<f64>()?;
    let step = step.trim().parse::<f64>()?;

    Ok(frange(start, end, step)?
        .into_iter()
        .map(format_number)
        .collect())
}

fn split_once(s: &str, delim: char) -> Option<(&str, &str)> {
    let idx = s.find(delim)?;
    Some((&s[..idx], &s[idx + delim.len_utf8()..]))
}

/// All values `start + k * step` that are `<= end`, rounded to 8 decimals.
pub fn frange(start: f64, end: f64, step: f64) -> Result<Vec<f64>, failure::Error> {
    if !(step > 0.0) || !step.is_finite() {
        failure::bail!("step must be positive, got {}", step);
    }
    if !start.is_finite() || !end.is_finite() {
        failure::bail!("bounds must be finite");
    }

    let mut values = vec![];
    let mut k = 0u64;
    loop {
        let value = round(start + (k as f64) * step);
        if value > end {
            break;
        }
        values.push(value);
        k += 1;
    }

    Ok(values)
}

fn round(value: f64) -> f64 {
    let scale = 10f64.powi(RANGE_DECIMALS);
    (value * scale).round() / scale
}

/// Integral values print without a fractional part, so `8.0` becomes `"8"`.
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}

/// Cast a token of the parameter `what` to a finite number.
pub fn cast_number<D: std::fmt::Display>(what: D, token: &str) -> Result<f64, CapsuleError> {
    match token.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(CapsuleError::BadToken {
            param: what.to_string(),
            token: token.to_owned(),
        }),
    }
}

/// Cast a token to a JSON scalar: integers and floats become numbers, anything else stays a
/// string. Used for free-form filter and weigher arguments.
pub fn cast_scalar(token: &str) -> serde_json::Value {
    let token = token.trim();
    if let Ok(value) = token.parse::<i64>() {
        serde_json::Value::from(value)
    } else if let Ok(value) = token.parse::<f64>() {
        if value.is_finite() {
            json_number(value).into()
        } else {
            serde_json::Value::from(token)
        }
    } else {
        serde_json::Value::from(token)
    }
}

/// The JSON form of a value. Integral values are written as integers so that a template's
/// `"coreSpeed": 2100` does not turn into `2100.0`.
pub fn json_number(value: f64) -> serde_json::Number {
    const EXACT: f64 = 9_007_199_254_740_992.0; // 2^53

    if value.fract() == 0.0 && value.abs() < EXACT {
        serde_json::Number::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).unwrap_or_else(|| serde_json::Number::from(0))
    }
}
