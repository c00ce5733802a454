//! Parsing engine - raw notification to normalized transaction event
//!
//! Provider dialects run first; the generic fallback (symbol-then-amount,
//! then amount-then-code) runs when no dialect matches or the provider is
//! unknown. Optional fields are extracted best-effort after the money match.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::debug;

use crate::domain::result::{Error, Result};
use crate::domain::{
    AmountCodeRule, DedupSeed, EventType, NormalizedEvent, PatternRule, Provider,
    RawNotification, ReceivedFromRule, RuleMatch, SymbolAmountRule,
};

/// Body fragments that mark an incoming transfer (matched lowercase)
const TRANSFER_IN_KEYWORDS: &[&str] = &["recib", "acredit", "ingres", "transferencia"];

const LABEL_TOKEN: &str = r"[:\s]+(?P<token>[A-Za-z0-9._-]+)";

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:Referencia|Ref|Id|Alias|CBU|CVU){LABEL_TOKEN}"
    ))
    .expect("reference pattern must compile")
});

static ACCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:Alias|CBU|CVU){LABEL_TOKEN}"))
        .expect("account pattern must compile")
});

/// Labeled clauses (`. Referencia: X`) removed before looking for a name
static LABELED_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)[.,;]?\s*\b(?:Referencia|Ref|Id|Alias|CBU|CVU){LABEL_TOKEN}\.?"
    ))
    .expect("labeled clause pattern must compile")
});

static COUNTERPARTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bde\s+(?P<name>[^\n|]+)$").expect("counterparty pattern must compile")
});

/// Notification parsing engine
///
/// Holds an ordered rule list per provider plus the generic fallback list.
/// Rules are tried in order and the first match wins.
pub struct ParsingEngine {
    provider_rules: HashMap<Provider, Vec<Box<dyn PatternRule>>>,
    fallback_rules: Vec<Box<dyn PatternRule>>,
}

impl Default for ParsingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ParsingEngine {
    /// Engine with the built-in dialects
    pub fn new() -> Self {
        let mut provider_rules: HashMap<Provider, Vec<Box<dyn PatternRule>>> = HashMap::new();
        provider_rules.insert(Provider::Lemon, vec![Box::new(ReceivedFromRule)]);

        Self {
            provider_rules,
            fallback_rules: vec![Box::new(SymbolAmountRule), Box::new(AmountCodeRule)],
        }
    }

    /// Append a dialect rule for a known provider (tried after existing ones)
    pub fn with_rule(mut self, provider: Provider, rule: Box<dyn PatternRule>) -> Self {
        if provider.is_known() {
            self.provider_rules.entry(provider).or_default().push(rule);
        }
        self
    }

    /// Parse one notification
    ///
    /// Returns `UnrecognizedFormat` when no money pattern matched and
    /// `MalformedNumber` when one matched but its amount did not normalize.
    pub fn parse(&self, raw: &RawNotification) -> Result<NormalizedEvent> {
        let provider = Provider::classify(&raw.package_name);
        let body = raw.effective_body();

        let (rule, found) = self
            .match_money(provider, body)?
            .ok_or_else(|| {
                Error::UnrecognizedFormat(format!("{}: {}", raw.package_name, body))
            })?;
        debug!(provider = %provider, rule, "notification matched");

        let event_type = found.event_type.unwrap_or_else(|| classify_type(body));
        let reference = extract_reference(body);
        let counterparty_account = extract_account(body);
        let counterparty_name = found
            .counterparty_name
            .clone()
            .or_else(|| extract_counterparty_name(body));

        // Fingerprint last, once amount/currency/type are final
        let dedup_key = DedupSeed {
            provider,
            event_type,
            amount: &found.amount,
            currency: &found.currency,
            occurred_at: raw.post_time,
            reference: reference.as_deref(),
            body,
        }
        .key();

        Ok(NormalizedEvent {
            provider,
            event_type,
            amount: found.amount,
            currency: found.currency,
            occurred_at: raw.post_time,
            counterparty_name,
            counterparty_account,
            reference,
            raw_package: raw.package_name.clone(),
            raw_title: raw.title.clone().unwrap_or_default(),
            raw_text: raw.text.clone().unwrap_or_default(),
            raw_big_text: raw.big_text.clone().unwrap_or_default(),
            dedup_key,
            uploaded: false,
            created_at: Utc::now(),
        })
    }

    fn match_money(&self, provider: Provider, body: &str) -> Result<Option<(&str, RuleMatch)>> {
        let dialect = self
            .provider_rules
            .get(&provider)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for rule in dialect.iter().chain(self.fallback_rules.iter()) {
            if let Some(found) = rule.apply(body)? {
                return Ok(Some((rule.name(), found)));
            }
        }
        Ok(None)
    }
}

/// `transfer_in` when the body carries incoming-transfer wording
pub fn classify_type(body: &str) -> EventType {
    let lower = body.to_lowercase();
    if TRANSFER_IN_KEYWORDS.iter().any(|k| lower.contains(k)) {
        EventType::TransferIn
    } else {
        EventType::Unknown
    }
}

fn clean_token(token: &str) -> Option<String> {
    let token = token.trim_end_matches(['.', '-', '_']);
    (!token.is_empty()).then(|| token.to_string())
}

fn extract_reference(body: &str) -> Option<String> {
    REFERENCE_RE
        .captures(body)
        .and_then(|c| clean_token(&c["token"]))
}

fn extract_account(body: &str) -> Option<String> {
    ACCOUNT_RE
        .captures(body)
        .and_then(|c| clean_token(&c["token"]))
}

fn extract_counterparty_name(body: &str) -> Option<String> {
    let stripped = LABELED_CLAUSE_RE.replace_all(body, "");
    let caps = COUNTERPARTY_RE.captures(stripped.trim_end())?;
    let name = caps["name"].trim().trim_end_matches('.').trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn notification(package: &str, body: &str) -> RawNotification {
        RawNotification::new(package, 1_700_000_000_000).with_text(body)
    }

    #[test]
    fn test_lemon_received_from() {
        let engine = ParsingEngine::new();
        let event = engine
            .parse(
                &RawNotification::new("com.lemon.wallet", 1_700_000_000_000)
                    .with_title("Recibiste una transferencia")
                    .with_text("Recibiste 1 ARS de Ramiro Brugnoli"),
            )
            .unwrap();

        assert_eq!(event.provider, Provider::Lemon);
        assert_eq!(event.event_type, EventType::TransferIn);
        assert_eq!(event.amount, dec("1"));
        assert_eq!(event.currency, "ARS");
        assert_eq!(event.counterparty_name.as_deref(), Some("Ramiro Brugnoli"));
        assert_eq!(event.occurred_at, 1_700_000_000_000);
        assert_eq!(event.raw_title, "Recibiste una transferencia");
        assert_eq!(event.raw_big_text, "");
        assert!(!event.uploaded);
        assert_eq!(event.dedup_key.len(), 64);
    }

    #[test]
    fn test_generic_fallback_unknown_package() {
        let engine = ParsingEngine::new();
        let event = engine
            .parse(&notification("com.example.bank", "$ 1.234,56 recibido de Juan Perez"))
            .unwrap();

        assert_eq!(event.provider, Provider::Unknown);
        assert_eq!(event.amount, dec("1234.56"));
        assert_eq!(event.currency, "ARS");
        assert_eq!(event.event_type, EventType::TransferIn);
        assert_eq!(event.counterparty_name.as_deref(), Some("Juan Perez"));
    }

    #[test]
    fn test_lemon_falls_back_when_copy_changes() {
        let engine = ParsingEngine::new();
        let event = engine
            .parse(
                &RawNotification::new("com.applemoncash", 5)
                    .with_big_text("Recibiste $ 12.450,00 de Juan Perez. Referencia: TRANS-8942"),
            )
            .unwrap();

        assert_eq!(event.provider, Provider::Lemon);
        assert_eq!(event.amount, dec("12450"));
        assert_eq!(event.currency, "ARS");
        assert_eq!(event.reference.as_deref(), Some("TRANS-8942"));
        assert_eq!(event.counterparty_name.as_deref(), Some("Juan Perez"));
        assert_eq!(event.counterparty_account, None);
    }

    #[test]
    fn test_trailing_code_fallback() {
        let engine = ParsingEngine::new();
        let event = engine
            .parse(&notification("ar.com.bancar.uala", "Se acreditaron 20 USDC en tu cuenta"))
            .unwrap();

        assert_eq!(event.provider, Provider::Uala);
        assert_eq!(event.currency, "USDC");
        assert_eq!(event.amount, dec("20"));
        assert_eq!(event.event_type, EventType::TransferIn);
    }

    #[test]
    fn test_account_and_reference() {
        let engine = ParsingEngine::new();
        let event = engine
            .parse(&notification(
                "com.brubank",
                "Transferencia de $ 500 desde CVU: 0000003100012345678901",
            ))
            .unwrap();

        assert_eq!(
            event.counterparty_account.as_deref(),
            Some("0000003100012345678901")
        );
        assert_eq!(event.reference.as_deref(), Some("0000003100012345678901"));
    }

    #[test]
    fn test_unrecognized() {
        let engine = ParsingEngine::new();
        let err = engine
            .parse(&notification("com.lemon.wallet", "Tu resumen está disponible"))
            .unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat(_)));

        let err = engine.parse(&RawNotification::new("com.lemon.wallet", 1)).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat(_)));
    }

    #[test]
    fn test_malformed_amount_aborts() {
        let engine = ParsingEngine::new();
        let err = engine
            .parse(&notification("com.example", "Pagaste 1.2.3 ARS"))
            .unwrap_err();
        assert!(err.is_parse_failure());
    }

    #[test]
    fn test_redelivery_yields_same_key() {
        let engine = ParsingEngine::new();
        let n = notification("com.lemon.wallet", "Recibiste 1 ARS de Ramiro Brugnoli");
        let a = engine.parse(&n).unwrap();
        let b = engine.parse(&n.clone()).unwrap();
        assert_eq!(a.dedup_key, b.dedup_key);

        let later = RawNotification { post_time: n.post_time + 1, ..n };
        assert_ne!(engine.parse(&later).unwrap().dedup_key, a.dedup_key);
    }

    #[test]
    fn test_classify_type() {
        assert_eq!(classify_type("INGRESO de dinero"), EventType::TransferIn);
        assert_eq!(classify_type("Pagaste $ 10"), EventType::Unknown);
    }

    #[test]
    fn test_extra_dialect_rule() {
        struct Fixed;
        impl PatternRule for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            fn apply(&self, body: &str) -> Result<Option<RuleMatch>> {
                Ok(body.contains("bonus").then(|| RuleMatch {
                    amount: Decimal::new(7, 0),
                    currency: "ARS".into(),
                    event_type: Some(EventType::TransferIn),
                    counterparty_name: None,
                }))
            }
        }

        let engine = ParsingEngine::new().with_rule(Provider::Brubank, Box::new(Fixed));
        let event = engine.parse(&notification("com.brubank", "bonus")).unwrap();
        assert_eq!(event.amount, dec("7"));
        // Unknown providers never see dialect rules
        assert!(engine.parse(&notification("com.other", "bonus")).is_err());
    }
}
