//! Named boolean bit lists driven by comma-separated enable lists.

use tracing::warn;

/// Key usage bits, in extension order.
pub const KEY_USAGE_FLAGS: [&str; 10] = [
    "keyUsageCritical",
    "keyUsageDigitalSignature",
    "keyUsageNonRepudiation",
    "keyUsageKeyEncipherment",
    "keyUsageDataEncipherment",
    "keyUsageKeyAgreement",
    "keyUsageKeyCertSign",
    "keyUsageCrlSign",
    "keyUsageEncipherOnly",
    "keyUsageDecipherOnly",
];

/// Netscape certificate type bits.
pub const NS_CERT_TYPE_FLAGS: [&str; 8] = [
    "nsCertCritical",
    "nsCertSSLClient",
    "nsCertSSLServer",
    "nsCertEmail",
    "nsCertObjectSigning",
    "nsCertSSLCA",
    "nsCertEmailCA",
    "nsCertObjectSigningCA",
];

/// A fixed list of named bits with an on/off state each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSet {
    names: &'static [&'static str],
    enabled: Vec<bool>,
}

impl FlagSet {
    /// Parses an enable list: every named bit is on, every other bit off.
    /// Unknown names are logged and ignored.
    #[must_use]
    pub fn parse(names: &'static [&'static str], list: &str) -> Self {
        let mut enabled = vec![false; names.len()];
        for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match names.iter().position(|n| *n == token) {
                Some(pos) => enabled[pos] = true,
                None => warn!(flag = token, "ignoring unknown flag"),
            }
        }
        Self { names, enabled }
    }

    /// Key usage bits from an enable list.
    #[must_use]
    pub fn key_usage(list: &str) -> Self {
        Self::parse(&KEY_USAGE_FLAGS, list)
    }

    /// Netscape certificate type bits from an enable list.
    #[must_use]
    pub fn ns_cert_type(list: &str) -> Self {
        Self::parse(&NS_CERT_TYPE_FLAGS, list)
    }

    /// Whether `name` is on.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.names
            .iter()
            .position(|n| *n == name)
            .is_some_and(|pos| self.enabled[pos])
    }

    /// All bits with their state, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        self.names.iter().copied().zip(self.enabled.iter().copied())
    }

    /// The enable list that reproduces this set.
    #[must_use]
    pub fn to_list(&self) -> String {
        self.iter()
            .filter(|(_, on)| *on)
            .map(|(name, _)| name)
            .collect::<Vec<_>>()
            .join(",")
    }
}
