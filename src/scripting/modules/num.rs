//! Number parsing and formatting for scripts
//!
//! Screen text rarely holds clean numbers ("1,234 likes", "$ 12.50"), so
//! `parse` keeps only digits, the decimal point and a minus sign.

use once_cell::sync::Lazy;
use regex::Regex;
use rune::alloc::String as RuneString;
use rune::{ContextError, Module};

static NON_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9.\-]").unwrap());

/// Create the num module
pub fn module() -> Result<Module, ContextError> {
    let mut module = Module::with_crate("num")?;

    module.function("parse", parse).build()?;
    module.function("parse_int", parse_int).build()?;
    module.function("format", format).build()?;
    module.function("format_with", format_with).build()?;

    Ok(module)
}

/// Parse the numeric part of `text`, or `default` when nothing usable remains.
pub fn parse(text: &str, default: f64) -> f64 {
    let cleaned = NON_NUMERIC.replace_all(text, "");
    cleaned.parse::<f64>().unwrap_or(default)
}

fn parse_int(text: &str, default: i64) -> i64 {
    let value = parse(text, f64::NAN);
    if value.is_finite() { value as i64 } else { default }
}

/// `1234567.891, 2` → `1,234,567.89`
pub fn format(value: f64, decimals: i64) -> RuneString {
    format_with(value, decimals, ",")
}

pub fn format_with(value: f64, decimals: i64, separator: &str) -> RuneString {
    RuneString::try_from(group_thousands(value, decimals, separator)).unwrap_or_default()
}

fn group_thousands(value: f64, decimals: i64, separator: &str) -> String {
    let decimals = decimals.clamp(0, 12) as usize;
    let fixed = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::new();
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push_str(separator);
        }
        grouped.push(*digit);
    }

    let negative = value < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0');
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}
