//! Notification pattern rules
//!
//! A rule is a pure function from notification body to extracted money
//! fields. Rules are evaluated in priority order by the parser; the first
//! rule that yields a match wins.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use rust_decimal::Decimal;

use super::amount::normalize_amount;
use super::event::EventType;
use super::result::Result;

/// Digits with optional `.`/`,` grouping, starting and ending on a digit
/// so sentence punctuation after an amount is not swallowed.
const AMOUNT: &str = r"[0-9](?:[0-9.,]*[0-9])?";

/// Currency codes recognized next to an amount. `USDC` precedes `USD`.
const CURRENCY_CODE: &str = r"ARS|USDC|USD";

/// Fields a rule extracted from a notification body
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub amount: Decimal,
    pub currency: String,
    /// Set when the rule itself implies the transaction kind
    pub event_type: Option<EventType>,
    pub counterparty_name: Option<String>,
}

/// A single money-extraction rule
pub trait PatternRule: Send + Sync {
    /// Short identifier used in diagnostics
    fn name(&self) -> &str;

    /// Try to extract money fields from `body`.
    ///
    /// `Ok(None)` means the pattern did not match. An amount that matched the
    /// pattern but does not normalize is an `Err(MalformedNumber)`.
    fn apply(&self, body: &str) -> Result<Option<RuleMatch>>;
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static notification pattern must compile")
}

// =============================================================================
// Provider dialects
// =============================================================================

static RECEIVED_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?i)Recibiste\s+(?P<amount>{AMOUNT})\s+(?P<currency>{CURRENCY_CODE})\b\s+de\s+(?P<name>.+?)$"
    ))
});

/// `Recibiste <amount> <CODE> de <name>` (Lemon incoming transfer copy)
#[derive(Debug, Default, Clone, Copy)]
pub struct ReceivedFromRule;

impl PatternRule for ReceivedFromRule {
    fn name(&self) -> &str {
        "received_from"
    }

    fn apply(&self, body: &str) -> Result<Option<RuleMatch>> {
        let Some(caps) = RECEIVED_FROM_RE.captures(body) else {
            return Ok(None);
        };

        Ok(Some(RuleMatch {
            amount: normalize_amount(&caps["amount"])?,
            currency: caps["currency"].to_uppercase(),
            event_type: Some(EventType::TransferIn),
            counterparty_name: Some(caps["name"].trim().to_string()).filter(|n| !n.is_empty()),
        }))
    }
}

// =============================================================================
// Generic fallback
// =============================================================================

static SYMBOL_AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?i)(?P<symbol>US\$|USD|AR\$|\$)\s?(?P<amount>{AMOUNT})(?:\s*(?P<code>{CURRENCY_CODE})\b)?"
    ))
});

/// `$ 1.234,56`, `US$ 10`, `AR$ 5`
///
/// Labeled symbols decide the currency. A bare `$` means ARS unless the
/// amount is directly followed by an explicit code.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymbolAmountRule;

impl SymbolAmountRule {
    fn currency_for(caps: &Captures<'_>) -> String {
        match caps["symbol"].to_uppercase().as_str() {
            "US$" | "USD" => "USD".to_string(),
            "AR$" => "ARS".to_string(),
            _ => caps
                .name("code")
                .map(|c| c.as_str().to_uppercase())
                .unwrap_or_else(|| "ARS".to_string()),
        }
    }
}

impl PatternRule for SymbolAmountRule {
    fn name(&self) -> &str {
        "symbol_amount"
    }

    fn apply(&self, body: &str) -> Result<Option<RuleMatch>> {
        let Some(caps) = SYMBOL_AMOUNT_RE.captures(body) else {
            return Ok(None);
        };

        Ok(Some(RuleMatch {
            amount: normalize_amount(&caps["amount"])?,
            currency: Self::currency_for(&caps),
            event_type: None,
            counterparty_name: None,
        }))
    }
}

static AMOUNT_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?i)(?P<amount>{AMOUNT})\s+(?P<currency>{CURRENCY_CODE})\b"
    ))
});

/// `1 ARS`, `10 USD`, `20 USDC`
#[derive(Debug, Default, Clone, Copy)]
pub struct AmountCodeRule;

impl PatternRule for AmountCodeRule {
    fn name(&self) -> &str {
        "amount_code"
    }

    fn apply(&self, body: &str) -> Result<Option<RuleMatch>> {
        let Some(caps) = AMOUNT_CODE_RE.captures(body) else {
            return Ok(None);
        };

        Ok(Some(RuleMatch {
            amount: normalize_amount(&caps["amount"])?,
            currency: caps["currency"].to_uppercase(),
            event_type: None,
            counterparty_name: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::Error;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_received_from() {
        let m = ReceivedFromRule
            .apply("Recibiste 1 ARS de Ramiro Brugnoli")
            .unwrap()
            .unwrap();
        assert_eq!(m.amount, dec("1"));
        assert_eq!(m.currency, "ARS");
        assert_eq!(m.event_type, Some(EventType::TransferIn));
        assert_eq!(m.counterparty_name.as_deref(), Some("Ramiro Brugnoli"));
    }

    #[test]
    fn test_received_from_usdc() {
        let m = ReceivedFromRule
            .apply("recibiste 20,5 usdc de Ana")
            .unwrap()
            .unwrap();
        assert_eq!(m.amount, dec("20.5"));
        assert_eq!(m.currency, "USDC");
    }

    #[test]
    fn test_received_from_no_match() {
        assert!(ReceivedFromRule
            .apply("Recibiste $ 12.450,00 de Juan Perez")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_symbol_amount_defaults_to_ars() {
        let m = SymbolAmountRule
            .apply("$ 1.234,56 recibido de Juan Perez")
            .unwrap()
            .unwrap();
        assert_eq!(m.amount, dec("1234.56"));
        assert_eq!(m.currency, "ARS");
    }

    #[test]
    fn test_symbol_amount_labeled_symbols() {
        let m = SymbolAmountRule.apply("Ingresaron US$ 10 a tu cuenta").unwrap().unwrap();
        assert_eq!(m.currency, "USD");
        assert_eq!(m.amount, dec("10"));

        let m = SymbolAmountRule.apply("Pagaste AR$ 5,50").unwrap().unwrap();
        assert_eq!(m.currency, "ARS");

        let m = SymbolAmountRule.apply("USD 7.25 acreditados").unwrap().unwrap();
        assert_eq!(m.currency, "USD");
        assert_eq!(m.amount, dec("7.25"));
    }

    #[test]
    fn test_bare_symbol_with_explicit_code() {
        let m = SymbolAmountRule.apply("Te enviaron $ 10 USD").unwrap().unwrap();
        assert_eq!(m.currency, "USD");
    }

    #[test]
    fn test_symbol_amount_ignores_sentence_period() {
        let m = SymbolAmountRule
            .apply("Recibiste $ 12.450,00. Referencia: X")
            .unwrap()
            .unwrap();
        assert_eq!(m.amount, dec("12450"));
    }

    #[test]
    fn test_amount_code() {
        let m = AmountCodeRule.apply("Llegaron 20 USDC").unwrap().unwrap();
        assert_eq!(m.amount, dec("20"));
        assert_eq!(m.currency, "USDC");

        assert!(AmountCodeRule.apply("Tenés 3 mensajes").unwrap().is_none());
    }

    #[test]
    fn test_malformed_amount_is_error() {
        let err = AmountCodeRule.apply("Recibiste 1.2.3 ARS").unwrap_err();
        assert!(matches!(err, Error::MalformedNumber(_)));
    }
}
