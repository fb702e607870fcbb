//! Regex-based variable extraction from candidate response text (§4.4).

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::expr::Value;

fn monetary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:[\$£€]\s?([0-9]+(?:,[0-9]{3})*(?:\.[0-9]+)?)|([0-9]+(?:,[0-9]{3})*(?:\.[0-9]+)?)\s?(?:usd|dollars|eur|gbp)\b)").unwrap()
    })
}

fn percentage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s?%").unwrap())
}

/// Boolean flags are keyword triggers over the lowercased response text,
/// named to match the kinds of claims a hard constraint cares about.
const BOOLEAN_FLAG_KEYWORDS: &[(&str, &[&str])] = &[
    ("contains_refund", &["refund", "reimburse", "money back"]),
    ("contains_promise", &["i promise", "guarantee", "guaranteed"]),
    ("contains_apology", &["sorry", "apologize", "apologise"]),
    ("contains_competitor", &["competitor", "alternative", "instead try"]),
];

/// Extracts the largest matched monetary amount as `amount`, the largest
/// matched percentage as `discount_percent`, and one `Bool` per entry in
/// `BOOLEAN_FLAG_KEYWORDS`.
pub fn extract_variables(response_text: &str) -> HashMap<String, Value> {
    let mut vars = HashMap::new();

    if let Some(amount) = monetary_re()
        .captures_iter(response_text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok()))
        .fold(None::<f64>, |acc, n| Some(acc.map_or(n, |a| a.max(n))))
    {
        vars.insert("amount".to_string(), Value::Number(amount));
    }

    if let Some(pct) = percentage_re()
        .captures_iter(response_text)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<f64>().ok()))
        .fold(None::<f64>, |acc, n| Some(acc.map_or(n, |a| a.max(n))))
    {
        vars.insert("discount_percent".to_string(), Value::Number(pct));
    }

    let lowered = response_text.to_lowercase();
    for (flag, keywords) in BOOLEAN_FLAG_KEYWORDS {
        let hit = keywords.iter().any(|kw| lowered.contains(kw));
        vars.insert((*flag).to_string(), Value::Bool(hit));
    }

    vars
}

/// Merges response-extracted, session, and profile variables with
/// response > session > profile precedence (§4.4).
pub fn merge_variables(
    response_vars: HashMap<String, Value>,
    session_vars: &HashMap<String, Value>,
    profile_vars: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut merged = profile_vars.clone();
    merged.extend(session_vars.clone());
    merged.extend(response_vars);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_largest_monetary_amount() {
        let vars = extract_variables("We can offer $50 today, or up to $1,250.00 total.");
        assert_eq!(vars.get("amount"), Some(&Value::Number(1250.0)));
    }

    #[test]
    fn extracts_percentage_as_discount_percent() {
        let vars = extract_variables("That's a 15% discount.");
        assert_eq!(vars.get("discount_percent"), Some(&Value::Number(15.0)));
    }

    #[test]
    fn extracts_monetary_amount_from_currency_suffix_forms() {
        let vars = extract_variables("We can do 500 USD today, or 20 EUR as a token gesture.");
        assert_eq!(vars.get("amount"), Some(&Value::Number(500.0)));
    }

    #[test]
    fn detects_boolean_flags_case_insensitively() {
        let vars = extract_variables("I GUARANTEE a full refund, no need to try a competitor.");
        assert_eq!(vars.get("contains_refund"), Some(&Value::Bool(true)));
        assert_eq!(vars.get("contains_promise"), Some(&Value::Bool(true)));
        assert_eq!(vars.get("contains_apology"), Some(&Value::Bool(false)));
        assert_eq!(vars.get("contains_competitor"), Some(&Value::Bool(true)));
    }

    #[test]
    fn merge_precedence_is_response_over_session_over_profile() {
        let mut response = HashMap::new();
        response.insert("amount".to_string(), Value::Number(3.0));
        let mut session = HashMap::new();
        session.insert("amount".to_string(), Value::Number(2.0));
        session.insert("tone".to_string(), Value::String("formal".into()));
        let mut profile = HashMap::new();
        profile.insert("amount".to_string(), Value::Number(1.0));
        profile.insert("tier".to_string(), Value::String("gold".into()));

        let merged = merge_variables(response, &session, &profile);
        assert_eq!(merged.get("amount"), Some(&Value::Number(3.0)));
        assert_eq!(merged.get("tone"), Some(&Value::String("formal".into())));
        assert_eq!(merged.get("tier"), Some(&Value::String("gold".into())));
    }
}
