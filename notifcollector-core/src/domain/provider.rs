//! Provider tags and package classification

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::result::Error;

/// Financial app a notification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Uala,
    Lemon,
    Mercadopago,
    Brubank,
    Unknown,
}

/// Package identifier fragments, checked in order (case-insensitive).
///
/// `applemoncash` is Lemon's real package id and must come before the
/// broader `lemon` fragment.
const PACKAGE_RULES: &[(&str, Provider)] = &[
    ("mercadopago", Provider::Mercadopago),
    ("uala", Provider::Uala),
    ("brubank", Provider::Brubank),
    ("applemoncash", Provider::Lemon),
    ("lemon", Provider::Lemon),
];

impl Provider {
    /// All known (routable) providers
    pub const KNOWN: [Provider; 4] = [
        Provider::Uala,
        Provider::Lemon,
        Provider::Mercadopago,
        Provider::Brubank,
    ];

    /// Classify a notification source package
    pub fn classify(package_name: &str) -> Self {
        let lower = package_name.to_lowercase();
        PACKAGE_RULES
            .iter()
            .find(|(fragment, _)| lower.contains(fragment))
            .map(|(_, provider)| *provider)
            .unwrap_or(Provider::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Uala => "uala",
            Provider::Lemon => "lemon",
            Provider::Mercadopago => "mercadopago",
            Provider::Brubank => "brubank",
            Provider::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Provider::Unknown
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uala" | "ualá" => Ok(Provider::Uala),
            "lemon" => Ok(Provider::Lemon),
            "mercadopago" | "mp" => Ok(Provider::Mercadopago),
            "brubank" => Ok(Provider::Brubank),
            "unknown" => Ok(Provider::Unknown),
            other => Err(Error::validation(format!("Unknown provider: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lemon_packages() {
        assert_eq!(Provider::classify("com.applemoncash"), Provider::Lemon);
        assert_eq!(Provider::classify("com.lemon.wallet"), Provider::Lemon);
        assert_eq!(Provider::classify("ar.LEMON.app"), Provider::Lemon);
    }

    #[test]
    fn test_other_known_packages() {
        assert_eq!(Provider::classify("com.mercadopago.wallet"), Provider::Mercadopago);
        assert_eq!(Provider::classify("ar.com.bancar.uala"), Provider::Uala);
        assert_eq!(Provider::classify("com.brubank"), Provider::Brubank);
    }

    #[test]
    fn test_priority_order() {
        // Both fragments present: the earlier rule wins
        assert_eq!(
            Provider::classify("com.mercadopago.lemon.bridge"),
            Provider::Mercadopago
        );
    }

    #[test]
    fn test_unmatched_is_unknown() {
        let provider = Provider::classify("com.whatsapp");
        assert_eq!(provider, Provider::Unknown);
        assert!(!provider.is_known());
        assert_eq!(Provider::classify(""), Provider::Unknown);
    }

    #[test]
    fn test_round_trip_names() {
        for provider in Provider::KNOWN {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert!("bitcoin".parse::<Provider>().is_err());
    }
}
