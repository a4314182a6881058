use serde_json::{Map, Value};

use super::types::{Allocation, AllocationSource, RiskTier, Ticker, Weights};
use crate::error::AiError;

const EQUITY_BASE_FLOOR: f64 = 0.2;
const BOND_FLOOR: f64 = 0.1;
const GLOBAL_SHARE_OF_EQUITY: f64 = 0.4;
const AI_SUM_TOLERANCE: f64 = 0.02;

pub const FALLBACK_WEIGHTS: Weights = Weights::new([0.4, 0.2, 0.2, 0.2]);

pub fn raw_weights(age: u32, risk: u32) -> Weights {
    debug_assert!((18..=80).contains(&age), "age {age} outside supported range");
    debug_assert!((1..=10).contains(&risk), "risk {risk} outside supported range");

    let equity_base = ((100.0 - age as f64) / 100.0).max(EQUITY_BASE_FLOOR);
    let risk_factor = risk as f64 / 10.0;

    let bond = (1.0 - equity_base * risk_factor).max(BOND_FLOOR);
    let remaining = 1.0 - bond;
    let global = remaining * GLOBAL_SHARE_OF_EQUITY;
    let domestic = remaining * (1.0 - GLOBAL_SHARE_OF_EQUITY);

    let mut weights = Weights::default();
    weights.set(Ticker::GROWTH, domestic * risk_factor);
    weights.set(Ticker::INCOME, domestic * (1.0 - risk_factor));
    weights.set(Ticker::GLOBAL, global);
    weights.set(Ticker::BOND, bond);
    weights
}

/// Rule-based allocation: older investors hold more bonds, higher risk shifts
/// the domestic sleeve from income to growth.
pub fn allocate(age: u32, risk: u32) -> Allocation {
    let weights = raw_weights(age, risk).normalized();
    Allocation {
        rationale: rationale(age, risk, &weights),
        weights,
        source: AllocationSource::Rules,
    }
}

fn rationale(age: u32, risk: u32, weights: &Weights) -> String {
    let bond_pct = weights.get(Ticker::BOND) * 100.0;
    let equity_pct = weights.equity_share() * 100.0;
    let mut text = format!(
        "Based on your age ({age}) and risk tolerance ({risk}/10), the plan holds \
         {bond_pct:.0}% defensive assets and {equity_pct:.0}% growth assets. "
    );
    text.push_str(match RiskTier::from_risk(risk) {
        RiskTier::Aggressive => {
            "This aggressive mix targets long-term capital growth and suits investors who can \
             sit through short-term swings."
        }
        RiskTier::Conservative => {
            "This conservative mix favours capital protection and steady dividends for \
             investors who want stable growth."
        }
        RiskTier::Balanced => {
            "This balanced mix combines global diversification with exposure to growth in the \
             Taiwanese market."
        }
    });
    text
}

pub fn fallback_allocation(cause: &AiError) -> Allocation {
    Allocation {
        weights: FALLBACK_WEIGHTS,
        rationale: format!(
            "The AI advisor could not produce an allocation ({cause}). Showing a default \
             diversified mix instead: 40% {}, 20% each in {}, {} and {}.",
            Ticker::Tw50,
            Ticker::TwHighDividend,
            Ticker::Vt,
            Ticker::Bnd
        ),
        source: AllocationSource::Fallback {
            cause: cause.to_string(),
        },
    }
}

/// Parses a provider reply of the form `{"weights": {...}, "reason": "..."}`.
///
/// Surrounding prose and markdown fences are ignored; the first balanced JSON
/// object in the text is used.
pub fn parse_ai_allocation(reply: &str) -> Result<Allocation, AiError> {
    let object = extract_json_object(reply).ok_or(AiError::NoJsonObject)?;
    let value: Value =
        serde_json::from_str(object).map_err(|e| AiError::MalformedJson(e.to_string()))?;
    let Value::Object(root) = value else {
        return Err(AiError::MalformedJson("top level is not an object".to_string()));
    };

    let weights = match root.get("weights") {
        Some(Value::Object(map)) => parse_weights(map)?,
        Some(other) => {
            return Err(AiError::MalformedJson(format!(
                "`weights` must be an object, got {other}"
            )));
        }
        None => return Err(AiError::MissingKey("weights")),
    };

    let rationale = match root.get("reason") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) | None => return Err(AiError::MissingKey("reason")),
        Some(other) => other.to_string(),
    };

    Ok(Allocation {
        weights,
        rationale,
        source: AllocationSource::Ai,
    })
}

fn parse_weights(map: &Map<String, Value>) -> Result<Weights, AiError> {
    let mut weights = Weights::default();
    let mut seen = [false; Ticker::COUNT];

    for (key, raw) in map {
        let ticker: Ticker = key
            .parse()
            .map_err(|_| AiError::UnknownTicker(key.clone()))?;
        let value = coerce_number(raw).ok_or_else(|| AiError::NonNumericWeight {
            ticker: ticker.symbol().to_string(),
            value: raw.to_string(),
        })?;
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(AiError::WeightOutOfRange {
                ticker: ticker.symbol().to_string(),
                value,
            });
        }
        weights.set(ticker, value);
        seen[ticker.index()] = true;
    }

    if let Some(missing) = Ticker::ALL.into_iter().find(|t| !seen[t.index()]) {
        return Err(AiError::MissingKey(missing.symbol()));
    }

    let sum = weights.sum();
    if (sum - 1.0).abs() > AI_SUM_TOLERANCE {
        return Err(AiError::WeightSum(sum));
    }

    Ok(weights.normalized())
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// braces inside JSON strings do not count
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MAX_AGE, MAX_RISK, MIN_AGE, MIN_RISK};
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-9;
    // half a cent of rounding plus the residual folded into the growth weight
    const ROUNDING_STEP: f64 = 0.015;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn young_aggressive_investor_matches_hand_calculation() {
        // equity_base 0.75, risk_factor 0.7 -> bond 0.475, remaining 0.525
        let allocation = allocate(25, 7);
        let w = allocation.weights;
        assert_approx(w.get(Ticker::Bnd), 0.48);
        assert_approx(w.get(Ticker::Vt), 0.21);
        assert_approx(w.get(Ticker::TwHighDividend), 0.09);
        assert_approx(w.get(Ticker::Tw50), 0.22);
        assert_approx(w.sum(), 1.0);
        assert_eq!(allocation.source, AllocationSource::Rules);
    }

    #[test]
    fn maximum_risk_leaves_no_income_sleeve() {
        let w = raw_weights(18, 10);
        assert!((w.get(Ticker::Bnd) - 0.18).abs() < 1e-9);
        assert_approx(w.get(Ticker::TwHighDividend), 0.0);
        assert!(w.get(Ticker::Bnd) >= BOND_FLOOR);
    }

    #[test]
    fn equity_base_is_floored_for_oldest_investor() {
        // (100 - 80) / 100 == 0.2 which is exactly the floor
        let w = raw_weights(80, 10);
        assert_approx(w.get(Ticker::Bnd), 0.8);
    }

    #[test]
    fn residual_never_drives_growth_weight_negative() {
        // The growth weight would otherwise land on -0.01 here.
        let w = allocate(35, 1).weights;
        assert_approx(w.get(Ticker::Tw50), 0.0);
        assert_approx(w.get(Ticker::Bnd), 0.93);
        assert_approx(w.sum(), 1.0);
    }

    #[test]
    fn rationale_reports_split_and_tier() {
        let aggressive = allocate(25, 7).rationale;
        assert!(aggressive.contains("48% defensive"));
        assert!(aggressive.contains("52% growth"));
        assert!(aggressive.contains("aggressive"));

        assert!(allocate(40, 4).rationale.contains("conservative"));
        assert!(allocate(40, 5).rationale.contains("balanced"));
        assert!(allocate(40, 6).rationale.contains("balanced"));
    }

    proptest! {
        #[test]
        fn prop_weights_sum_to_one_and_are_non_negative(
            age in MIN_AGE..=MAX_AGE,
            risk in MIN_RISK..=MAX_RISK,
        ) {
            let w = allocate(age, risk).weights;
            prop_assert!((w.sum() - 1.0).abs() <= EPS, "sum {}", w.sum());
            for (ticker, weight) in w.iter() {
                prop_assert!(weight >= 0.0, "{ticker} weight {weight}");
            }
        }

        #[test]
        fn prop_older_investor_never_gets_more_equity(
            age in MIN_AGE..MAX_AGE,
            risk in MIN_RISK..=MAX_RISK,
        ) {
            let younger = allocate(age, risk).weights.equity_share();
            let older = allocate(age + 1, risk).weights.equity_share();
            prop_assert!(older <= younger + EPS, "age {age}: {older} > {younger}");
        }

        #[test]
        fn prop_rounded_weights_stay_within_one_step_of_raw_split(
            age in MIN_AGE..=MAX_AGE,
            risk in MIN_RISK..=MAX_RISK,
        ) {
            let raw = raw_weights(age, risk);
            let rounded = allocate(age, risk).weights;
            for ticker in Ticker::ALL {
                let drift = (rounded.get(ticker) - raw.get(ticker)).abs();
                prop_assert!(drift <= ROUNDING_STEP, "{ticker} drifted by {drift}");
            }
        }

        #[test]
        fn prop_higher_risk_tilts_domestic_sleeve_to_growth(
            age in MIN_AGE..=MAX_AGE,
            risk in MIN_RISK..MAX_RISK,
        ) {
            let low = raw_weights(age, risk);
            let high = raw_weights(age, risk + 1);
            // growth/income ratio compared without dividing by a zero income weight
            prop_assert!(
                high.get(Ticker::GROWTH) * low.get(Ticker::INCOME)
                    >= low.get(Ticker::GROWTH) * high.get(Ticker::INCOME) - EPS
            );
        }
    }

    #[test]
    fn two_decimal_rounding_can_flatten_the_growth_tilt() {
        // raw growth/income goes 1/9 -> 2/8, rounded 0.01/0.04 -> 0.01/0.08
        let low = allocate(18, 1).weights;
        let high = allocate(18, 2).weights;
        assert_eq!(low, Weights::new([0.01, 0.04, 0.03, 0.92]));
        assert_eq!(high, Weights::new([0.01, 0.08, 0.07, 0.84]));
        assert!(
            high.get(Ticker::GROWTH) / high.get(Ticker::INCOME)
                < low.get(Ticker::GROWTH) / low.get(Ticker::INCOME)
        );

        let raw_low = raw_weights(18, 1);
        let raw_high = raw_weights(18, 2);
        assert!(
            raw_high.get(Ticker::GROWTH) / raw_high.get(Ticker::INCOME)
                > raw_low.get(Ticker::GROWTH) / raw_low.get(Ticker::INCOME)
        );
    }

    #[test]
    fn parses_clean_json_reply() {
        let reply = r#"{"weights": {"0050.TW": 0.5, "0056.TW": 0.1, "VT": 0.25, "BND": 0.15}, "reason": "Growth tilt."}"#;
        let allocation = parse_ai_allocation(reply).expect("valid reply");
        assert_eq!(allocation.source, AllocationSource::Ai);
        assert_approx(allocation.weights.get(Ticker::Tw50), 0.5);
        assert_approx(allocation.weights.sum(), 1.0);
        assert_eq!(allocation.rationale, "Growth tilt.");
    }

    #[test]
    fn parses_fenced_reply_with_prose_and_string_numbers() {
        let reply = "Sure! Here is the plan:\n```json\n{\"weights\": {\"0050.TW\": \"0.3\", \"0056.TW\": 0.2, \"VT\": 0.3, \"BND\": 0.2}, \"reason\": \"Use {braces} freely.\"}\n```\nGood luck.";
        let allocation = parse_ai_allocation(reply).expect("valid reply");
        assert_approx(allocation.weights.get(Ticker::Tw50), 0.3);
        assert_eq!(allocation.rationale, "Use {braces} freely.");
    }

    #[test]
    fn rounding_residual_from_ai_weights_is_folded_into_growth() {
        let reply = r#"{"weights": {"0050.TW": 0.333, "0056.TW": 0.333, "VT": 0.333, "BND": 0.0}, "reason": "Even."}"#;
        let w = parse_ai_allocation(reply).expect("valid reply").weights;
        assert_approx(w.get(Ticker::Tw50), 0.34);
        assert_approx(w.sum(), 1.0);
    }

    #[test]
    fn truncated_reply_has_no_json_object() {
        let reply = r#"{"weights": {"0050.TW": 0.4, "0056.TW": 0.2"#;
        assert_eq!(parse_ai_allocation(reply), Err(AiError::NoJsonObject));
    }

    #[test]
    fn missing_weights_key_is_rejected() {
        let reply = r#"{"reason": "no weights here"}"#;
        assert_eq!(parse_ai_allocation(reply), Err(AiError::MissingKey("weights")));
    }

    #[test]
    fn missing_ticker_is_rejected() {
        let reply = r#"{"weights": {"0050.TW": 0.4, "0056.TW": 0.2, "VT": 0.4}, "reason": "x"}"#;
        assert_eq!(parse_ai_allocation(reply), Err(AiError::MissingKey("BND")));
    }

    #[test]
    fn non_numeric_weight_is_rejected() {
        let reply = r#"{"weights": {"0050.TW": "lots", "0056.TW": 0.2, "VT": 0.2, "BND": 0.2}, "reason": "x"}"#;
        assert!(matches!(
            parse_ai_allocation(reply),
            Err(AiError::NonNumericWeight { .. })
        ));
    }

    #[test]
    fn weights_far_from_one_are_rejected() {
        let reply = r#"{"weights": {"0050.TW": 0.4, "0056.TW": 0.4, "VT": 0.4, "BND": 0.4}, "reason": "x"}"#;
        assert!(matches!(parse_ai_allocation(reply), Err(AiError::WeightSum(_))));
    }

    #[test]
    fn unknown_ticker_is_rejected() {
        let reply = r#"{"weights": {"SPY": 1.0}, "reason": "x"}"#;
        assert_eq!(
            parse_ai_allocation(reply),
            Err(AiError::UnknownTicker("SPY".to_string()))
        );
    }

    #[test]
    fn fallback_uses_fixed_mix_and_explains_cause() {
        let allocation = fallback_allocation(&AiError::Status(503));
        assert_eq!(allocation.weights, FALLBACK_WEIGHTS);
        assert_approx(allocation.weights.get(Ticker::Tw50), 0.4);
        assert_approx(allocation.weights.get(Ticker::Bnd), 0.2);
        assert!(allocation.rationale.contains("503"));
        assert!(matches!(allocation.source, AllocationSource::Fallback { .. }));
    }

    #[test]
    fn extract_json_object_handles_escaped_quotes() {
        let text = r#"note {"a": "say \"}\" now", "b": {"c": 1}} trailing }"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"a": "say \"}\" now", "b": {"c": 1}}"#)
        );
        assert_eq!(extract_json_object("no braces"), None);
    }
}
