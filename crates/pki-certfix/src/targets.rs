//! Which certificates to renew and which subsystems that touches.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CertFixError, Result};
use crate::instance::{Instance, NON_LDAP_SUBSYSTEMS};

/// Certificates shared by every subsystem of an instance.
pub const SHARED_CERTS: &[&str] = &["sslserver", "subsystem"];

/// The CA signing certificate cannot be renewed this way.
pub const UNSUPPORTED_CERT: &str = "ca_signing";

static SERIAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0[xX][0-9a-fA-F]+|[0-9]+)$").unwrap_or_else(|_| unreachable!())
});

/// Whether `serial` is a decimal or `0x`-prefixed hex number.
#[must_use]
pub fn is_valid_serial(serial: &str) -> bool {
    SERIAL_PATTERN.is_match(serial)
}

/// Checks an explicit certificate list.
pub fn validate_cert_ids(certs: &[String]) -> Result<()> {
    for id in certs {
        if id == UNSUPPORTED_CERT {
            return Err(CertFixError::config(format!(
                "renewal of {UNSUPPORTED_CERT} is not supported"
            )));
        }
        if id.trim().is_empty() {
            return Err(CertFixError::config("empty certificate id"));
        }
    }
    Ok(())
}

/// Checks extra certificate serial numbers.
pub fn validate_serials(serials: &[String]) -> Result<()> {
    match serials.iter().find(|s| !is_valid_serial(s)) {
        Some(bad) => Err(CertFixError::config(format!(
            "invalid serial number: {bad}"
        ))),
        None => Ok(()),
    }
}

/// The certificates to renew.
///
/// An explicit list is used as given, deduplicated. Otherwise every system
/// certificate of every subsystem is listed: shared certificates once and
/// unprefixed, the rest as `<subsystem>_<tag>`, skipping `ca_signing`.
#[must_use]
pub fn resolve_fix_list(instance: &dyn Instance, explicit: &[String]) -> Vec<String> {
    let mut list: Vec<String> = Vec::new();
    let mut push = |id: String| {
        if !list.contains(&id) {
            list.push(id);
        }
    };

    if !explicit.is_empty() {
        explicit.iter().cloned().for_each(&mut push);
        return list;
    }

    for name in instance.subsystem_names() {
        let Some(subsystem) = instance.subsystem(&name) else {
            continue;
        };
        for tag in subsystem.cert_tags() {
            if SHARED_CERTS.contains(&tag.as_str()) {
                push(tag);
                continue;
            }
            let id = format!("{name}_{tag}");
            if id != UNSUPPORTED_CERT {
                push(id);
            }
        }
    }
    list
}

/// Subsystems whose auth and self-tests the repair must change.
///
/// A shared certificate selects every subsystem. Otherwise each entry selects
/// the subsystem named by its prefix, and extra serials select `ca`. ACME and
/// EST never take part. The result follows the instance's subsystem order.
pub fn affected_subsystems(
    instance: &dyn Instance,
    fix_list: &[String],
    extra_serials: &[String],
) -> Result<Vec<String>> {
    let all = instance.subsystem_names();

    let mut wanted: Vec<String> = Vec::new();
    if fix_list
        .iter()
        .any(|id| SHARED_CERTS.contains(&id.as_str()))
    {
        wanted.extend(all.iter().cloned());
    } else {
        for id in fix_list {
            let owner = id.split_once('_').map_or(id.as_str(), |(owner, _)| owner);
            if !all.iter().any(|name| name == owner) {
                return Err(CertFixError::precondition(format!(
                    "subsystem {owner} of certificate {id} not found in instance {}",
                    instance.name()
                )));
            }
            wanted.push(owner.to_string());
        }
    }

    if !extra_serials.is_empty() {
        if !all.iter().any(|name| name == "ca") {
            return Err(CertFixError::precondition(format!(
                "extra certificates need a ca subsystem in instance {}",
                instance.name()
            )));
        }
        wanted.push("ca".to_string());
    }

    Ok(all
        .into_iter()
        .filter(|name| wanted.contains(name))
        .filter(|name| !NON_LDAP_SUBSYSTEMS.contains(&name.as_str()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("12345" ; "decimal")]
    #[test_case("0x1F" ; "upper hex")]
    #[test_case("0Xdeadbeef" ; "upper prefix")]
    fn serial_accepted(serial: &str) {
        assert!(is_valid_serial(serial));
    }

    #[test_case("" ; "empty")]
    #[test_case("0x" ; "bare prefix")]
    #[test_case("12a" ; "hex without prefix")]
    #[test_case("-1" ; "negative")]
    #[test_case("1 2" ; "space")]
    fn serial_rejected(serial: &str) {
        assert!(!is_valid_serial(serial));
    }

    #[test]
    fn ca_signing_is_a_config_error() {
        let err = validate_cert_ids(&["sslserver".into(), "ca_signing".into()]).expect_err("rejected");
        assert!(err.is_config_error());
    }

    #[test]
    fn bad_serial_is_named() {
        let err = validate_serials(&["10".into(), "0xZZ".into()]).expect_err("rejected");
        assert!(err.to_string().contains("0xZZ"));
    }

    proptest! {
        #[test]
        fn prop_decimal_and_hex_serials_accepted(n in any::<u64>()) {
            prop_assert!(is_valid_serial(&n.to_string()));
            let hex = format!("0x{n:x}");
            prop_assert!(is_valid_serial(&hex));
        }

        #[test]
        fn prop_serial_with_non_digit_rejected(prefix in "[0-9]{1,8}", junk in "[g-zG-Z .-]") {
            let serial = format!("{prefix}{junk}");
            prop_assert!(!is_valid_serial(&serial));
        }
    }
}
