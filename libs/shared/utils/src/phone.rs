use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
}

impl PhoneValidation {
    fn invalid() -> Self {
        Self { valid: false, formatted: None }
    }

    fn valid(formatted: String) -> Self {
        Self { valid: true, formatted: Some(formatted) }
    }
}

struct RegionRule {
    region: &'static str,
    country_code: &'static str,
    trunk_prefix: Option<&'static str>,
    national: Regex,
}

fn rule(region: &'static str, country_code: &'static str, trunk_prefix: Option<&'static str>, pattern: &str) -> RegionRule {
    RegionRule {
        region,
        country_code,
        trunk_prefix,
        national: Regex::new(pattern).expect("static phone pattern"),
    }
}

static RULES: LazyLock<Vec<RegionRule>> = LazyLock::new(|| {
    vec![
        rule("IN", "91", Some("0"), r"^[6-9]\d{9}$"),
        rule("US", "1", Some("1"), r"^[2-9]\d{2}[2-9]\d{6}$"),
        rule("GB", "44", Some("0"), r"^(7\d{9}|[1-3]\d{8,9})$"),
        rule("AE", "971", Some("0"), r"^(5[024568]\d{7}|[2-4679]\d{7})$"),
        rule("AU", "61", Some("0"), r"^(4\d{8}|[2378]\d{8})$"),
        rule("SG", "65", None, r"^[689]\d{7}$"),
    ]
});

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-\.\(\)]").expect("static separator pattern"));
static E164: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[1-9]\d{7,14}$").expect("static e164 pattern"));

/// Validates `number` as dialled from `region` and formats it as E.164.
///
/// Numbers carrying an international prefix (`+` or `00`) are checked against
/// the rules of the country they name; national numbers use `region`.
pub fn validate_phone(number: &str, region: &str) -> PhoneValidation {
    let cleaned = SEPARATORS.replace_all(number.trim(), "");

    let international = cleaned
        .strip_prefix('+')
        .or_else(|| cleaned.strip_prefix("00"));

    if let Some(digits) = international {
        return validate_international(digits);
    }

    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return PhoneValidation::invalid();
    }

    let region = region.to_ascii_uppercase();
    let Some(rule) = RULES.iter().find(|r| r.region == region) else {
        return PhoneValidation::invalid();
    };

    validate_national(rule, &cleaned)
}

fn validate_international(digits: &str) -> PhoneValidation {
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return PhoneValidation::invalid();
    }

    // Longest country code wins so "971" is not read as "97" + national
    let known = RULES
        .iter()
        .filter(|r| digits.starts_with(r.country_code))
        .max_by_key(|r| r.country_code.len());

    match known {
        Some(rule) => {
            let national = &digits[rule.country_code.len()..];
            if rule.national.is_match(national) {
                PhoneValidation::valid(format!("+{}{}", rule.country_code, national))
            } else {
                PhoneValidation::invalid()
            }
        }
        None if E164.is_match(digits) => PhoneValidation::valid(format!("+{}", digits)),
        None => PhoneValidation::invalid(),
    }
}

fn validate_national(rule: &RegionRule, digits: &str) -> PhoneValidation {
    if rule.national.is_match(digits) {
        return PhoneValidation::valid(format!("+{}{}", rule.country_code, digits));
    }

    if let Some(stripped) = rule.trunk_prefix.and_then(|p| digits.strip_prefix(p)) {
        if rule.national.is_match(stripped) {
            return PhoneValidation::valid(format!("+{}{}", rule.country_code, stripped));
        }
    }

    PhoneValidation::invalid()
}
