//! Utility functions and helpers.

pub mod http;
pub mod log;

use std::sync::OnceLock;

use regex::Regex;
use scraper::Selector;
use url::Url;

use crate::error::{AppError, Result};

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Resolve a URL string against a base URL string.
pub fn resolve(base_url: &str, href: &str) -> Option<String> {
    Url::parse(base_url)
        .ok()
        .map(|base| resolve_url(&base, href))
}

/// Compile a CSS selector.
pub fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Replace Persian and Arabic-Indic digits with ASCII digits.
pub fn fold_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            _ => c,
        })
        .collect()
}

fn number_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?P<sign>[-\u{2212}]\s*)?(?P<number>\d[\d,.\u{066B}\u{066C}\u{060C}]*)").ok()
        })
        .as_ref()
}

/// Parse the first number in a price text such as `"۱٬۲۵۰٬۰۰۰ تومان"`.
///
/// Thousands separators are dropped. A single `.` followed by one or two
/// digits is kept as a decimal point; any other dots are separators.
/// A minus sign directly in front of the number is kept, unless it joins
/// two words (`"SKU-1200"`).
pub fn parse_price(text: &str) -> Option<f64> {
    let folded = fold_digits(text);
    let captures = number_pattern()?.captures(&folded)?;
    let number = captures.name("number")?;
    let negative = captures.name("sign").is_some_and(|sign| {
        !folded[..sign.start()]
            .chars()
            .next_back()
            .is_some_and(char::is_alphanumeric)
    });

    let digits: String = number
        .as_str()
        .chars()
        .map(|c| if c == '\u{066B}' { '.' } else { c })
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let digits = digits.trim_end_matches('.');

    let normalized = match digits.rsplit_once('.') {
        Some((int_part, frac)) if frac.len() <= 2 && !int_part.contains('.') => {
            format!("{int_part}.{frac}")
        }
        _ => digits.replace('.', ""),
    };
    let value = normalized.parse::<f64>().ok()?;
    Some(if negative { -value } else { value })
}

const OUT_OF_STOCK_MARKERS: &[&str] = &["ناموجود", "unavailable", "out of stock", "out-of-stock"];
const IN_STOCK_MARKERS: &[&str] = &["موجود", "available", "in stock", "in-stock"];

/// Interpret availability text. Missing or unrecognized text means available.
pub fn parse_availability(text: Option<&str>) -> bool {
    let Some(text) = text else {
        return true;
    };
    let lower = text.to_lowercase();
    if OUT_OF_STOCK_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    if IN_STOCK_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    true
}

/// Collapse runs of whitespace.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/path/").unwrap();
        assert_eq!(
            resolve_url(&base, "page.html"),
            "https://example.com/path/page.html"
        );
        assert_eq!(
            resolve_url(&base, "/root.html"),
            "https://example.com/root.html"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_parse_selector() {
        assert!(parse_selector("div.price bdi").is_ok());
        assert!(parse_selector("[[invalid").is_err());
    }

    #[test]
    fn test_parse_price_ascii() {
        assert_eq!(parse_price("1,250,000 Toman"), Some(1_250_000.0));
        assert_eq!(parse_price("Price: 99.50"), Some(99.5));
        assert_eq!(parse_price("1.250.000"), Some(1_250_000.0));
        assert_eq!(parse_price("no digits here"), None);
    }

    #[test]
    fn test_parse_price_keeps_sign() {
        assert_eq!(parse_price("-1,200,000 Toman"), Some(-1_200_000.0));
        assert_eq!(parse_price("\u{2212} 450"), Some(-450.0));
        assert_eq!(parse_price("Price: -99.50"), Some(-99.5));
        assert_eq!(parse_price("SKU-1200"), Some(1200.0));
    }

    #[test]
    fn test_parse_price_persian() {
        assert_eq!(parse_price("۱٬۲۵۰٬۰۰۰ تومان"), Some(1_250_000.0));
        assert_eq!(parse_price("٣٤٥"), Some(345.0));
    }

    #[test]
    fn test_parse_availability() {
        assert!(parse_availability(None));
        assert!(parse_availability(Some("موجود در انبار")));
        assert!(!parse_availability(Some("ناموجود")));
        assert!(!parse_availability(Some("Out of stock")));
        assert!(parse_availability(Some("In stock")));
        assert!(parse_availability(Some("call us")));
    }
}
