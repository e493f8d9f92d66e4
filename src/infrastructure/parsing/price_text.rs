//! Locale-aware currency text normalization
//!
//! Turns text such as `"R$ 1.234,56"` into `1234.56`. The primary convention
//! groups thousands with `.` and separates decimals with `,`; a plain
//! decimal-point amount (`"99.90"`) is accepted as a fallback.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default currency marker token
pub const DEFAULT_CURRENCY_MARKER: &str = "R$";

// Alternatives are ordered: at any start position the first one that
// matches wins, so grouped/comma forms beat the plain fallbacks.
static AMOUNT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?P<grouped_dec>\d{1,3}(?:\.\d{3})+,\d{1,2})
        | (?P<comma_dec>\d+,\d{1,2})
        | (?P<point_dec>\d+\.\d{1,2}\b)
        | (?P<grouped>\d{1,3}(?:\.\d{3})+)
        | (?P<integer>\d+)
        ",
    )
    .expect("amount pattern is a valid regex")
});

/// Parser for monetary amounts in currency text
#[derive(Debug, Clone)]
pub struct PriceTextParser {
    currency_marker: String,
}

impl Default for PriceTextParser {
    fn default() -> Self {
        Self::new(DEFAULT_CURRENCY_MARKER)
    }
}

impl PriceTextParser {
    pub fn new(currency_marker: impl Into<String>) -> Self {
        Self {
            currency_marker: currency_marker.into(),
        }
    }

    pub fn currency_marker(&self) -> &str {
        &self.currency_marker
    }

    /// Whether `text` carries the currency marker token.
    pub fn has_marker(&self, text: &str) -> bool {
        !self.currency_marker.is_empty() && text.contains(&self.currency_marker)
    }

    /// Extract a positive, finite amount from `text`.
    ///
    /// When the marker is present the amount following it is preferred, so
    /// `"10x de R$ 12,90"` yields `12.90` rather than the instalment count.
    pub fn parse(&self, text: &str) -> Option<f64> {
        if self.has_marker(text) {
            let after_marker = text
                .split(self.currency_marker.as_str())
                .skip(1)
                .find_map(parse_amount);
            if after_marker.is_some() {
                return after_marker;
            }
        }
        parse_amount(text)
    }
}

/// Parse the first currency-shaped amount in `text` with no marker preference.
pub fn parse_amount(text: &str) -> Option<f64> {
    let caps = AMOUNT_PATTERN.captures(text)?;

    let normalized = if let Some(m) = caps.name("grouped_dec") {
        m.as_str().replace('.', "").replace(',', ".")
    } else if let Some(m) = caps.name("comma_dec") {
        m.as_str().replace(',', ".")
    } else if let Some(m) = caps.name("point_dec") {
        m.as_str().to_string()
    } else if let Some(m) = caps.name("grouped") {
        m.as_str().replace('.', "")
    } else {
        caps.name("integer")?.as_str().to_string()
    };

    normalized
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}

/// Parse with the default marker.
pub fn parse_price(text: &str) -> Option<f64> {
    PriceTextParser::default().parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("R$ 1.234,56", Some(1234.56))]
    #[case("10,50", Some(10.50))]
    #[case("R$ 99,90", Some(99.90))]
    #[case("R$99.90", Some(99.90))]
    #[case("1.234", Some(1234.0))]
    #[case("R$ 1.234.567,8", Some(1_234_567.8))]
    #[case("R$ 12345,00", Some(12345.0))]
    #[case("10x de R$ 12,90 sem juros", Some(12.90))]
    #[case("not a price", None)]
    #[case("R$ 0,00", None)]
    #[case("", None)]
    fn test_parse_price(#[case] input: &str, #[case] expected: Option<f64>) {
        match (parse_price(input), expected) {
            (Some(actual), Some(expected)) => assert!((actual - expected).abs() < 1e-9, "{input}: {actual} != {expected}"),
            (actual, expected) => assert_eq!(actual, expected, "{input}"),
        }
    }

    #[test]
    fn test_marker_without_amount_falls_back_to_whole_text() {
        assert_eq!(parse_price("12,00 em R$"), Some(12.0));
    }

    #[test]
    fn test_custom_marker() {
        let parser = PriceTextParser::new("€");
        assert!(parser.has_marker("€ 5,00"));
        assert!(!parser.has_marker("R$ 5,00"));
        assert_eq!(parser.parse("2 x € 5,00"), Some(5.0));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let text = "De R$ 1.299,00 por R$ 1.199,90";
        assert_eq!(parse_price(text), parse_price(text));
        assert_eq!(parse_price(text), Some(1299.0));
    }
}
