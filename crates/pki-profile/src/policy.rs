//! Policy defaults with create-or-update semantics.
//!
//! Every operation goes through [`PolicySet::upsert`], so calling the same
//! operation twice leaves a single policy of that kind, updated in place.

use tracing::debug;

use crate::constraint::{self, DEFAULT_KEY_PARAMETERS, DEFAULT_SIGNING_ALGORITHMS, KeyType};
use crate::document::{Descriptor, PolicyDefault, PolicyKind, PolicySet, Upsert};
use crate::error::Result;
use crate::flags::FlagSet;
use crate::params::RangeUnit;

/// OID of the subject alternative name extension.
pub const SUBJECT_ALT_NAME_OID: &str = "2.5.29.17";
/// OID of the S/MIME capabilities extension.
pub const SMIME_CAPABILITIES_OID: &str = "1.2.840.113549.1.9.15";
/// DER payload for the generic extension: AES-256-CBC, AES-128-CBC.
pub const SMIME_CAPABILITIES_DATA: &str =
    "301A300B060960864801650304012A300B0609608648016503040102";

const CA_VALIDITY_DAYS: u32 = 7305;
const CA_VALIDITY_CONSTRAINT_DAYS: u32 = 365;
const OCSP_ACCESS_METHOD: &str = "1.3.6.1.5.5.7.48.1";

fn string_attr(description: &str) -> Descriptor {
    Descriptor::new("string", description)
}

fn bool_attr(description: &str) -> Descriptor {
    Descriptor::new("boolean", description).with_default("false")
}

/// Builds policies into one [`PolicySet`].
#[derive(Debug)]
pub struct PolicyBuilder<'a> {
    set: &'a mut PolicySet,
}

impl<'a> PolicyBuilder<'a> {
    /// Wraps a policy set.
    pub fn new(set: &'a mut PolicySet) -> Self {
        Self { set }
    }

    fn upsert<C, U>(&mut self, kind: PolicyKind, create: C, update: U) -> Result<Upsert>
    where
        C: FnOnce() -> (PolicyDefault, crate::document::Constraint),
        U: FnOnce(&mut crate::document::PolicyValue),
    {
        let outcome = self.set.upsert(kind.clone(), create, update)?;
        debug!(set = self.set.name(), policy = %kind, ?outcome, "policy applied");
        Ok(outcome)
    }

    /// Subject name default. A literal `default` selects
    /// `subjectNameDefaultImpl`; without one the subject is user supplied.
    pub fn subject_name(&mut self, pattern: &str, default: Option<&str>) -> Result<Upsert> {
        let (class_id, description) = match default {
            Some(_) => (
                "subjectNameDefaultImpl",
                "This default populates a Certificate Subject Name to the request.",
            ),
            None => (
                "userSubjectNameDefaultImpl",
                "This default populates a User-Supplied Certificate Subject Name to the request.",
            ),
        };
        self.upsert(
            PolicyKind::SubjectName,
            || {
                let mut def = PolicyDefault::new("Subject Name Default", class_id, description)
                    .with_attribute("name", string_attr("Subject Name"));
                if let Some(name) = default {
                    def.set_param("name", name);
                }
                (def, constraint::subject_name(pattern))
            },
            |value| {
                value.default.class_id = class_id.to_string();
                value.default.description = description.to_string();
                match default {
                    Some(name) => value.default.set_param("name", name),
                    None => value.default.remove_param("name"),
                }
                value.constraint = constraint::subject_name(pattern);
            },
        )
    }

    /// Key usage extension default with the same bits enforced.
    pub fn key_usage(&mut self, flags: &FlagSet) -> Result<Upsert> {
        self.upsert(
            PolicyKind::KeyUsage,
            || {
                let mut def = PolicyDefault::new(
                    "Key Usage Default",
                    "keyUsageExtDefaultImpl",
                    "This default populates a Key Usage Extension to the request.",
                );
                for (name, on) in flags.iter() {
                    def = def.with_attribute(name, bool_attr(name)).with_param(name, on.to_string());
                }
                (def, constraint::key_usage(flags))
            },
            |value| {
                for (name, on) in flags.iter() {
                    value.default.set_param(name, on.to_string());
                    if !value.constraint.set_value(name, on.to_string()) {
                        value.constraint = constraint::key_usage(flags);
                    }
                }
            },
        )
    }

    /// Fixed CA validity.
    pub fn ca_validity(&mut self) -> Result<Upsert> {
        self.upsert(
            PolicyKind::CaValidity,
            || {
                let def = PolicyDefault::new(
                    "CA Certificate Validity Default",
                    "caValidityDefaultImpl",
                    format!("This default populates a Certificate Validity to the request. The default values are Range={CA_VALIDITY_DAYS} in days"),
                )
                .with_attribute("notBefore", string_attr("Not Before"))
                .with_attribute("notAfter", string_attr("Not After"))
                .with_attribute("bypassCAnotafter", bool_attr("Bypass CA notAfter constraint"))
                .with_param("range", CA_VALIDITY_DAYS.to_string())
                .with_param("startTime", "0")
                .with_param("bypassCAnotafter", "");
                (def, constraint::validity(CA_VALIDITY_CONSTRAINT_DAYS, RangeUnit::Day.as_str()))
            },
            |_| {},
        )
    }

    /// Validity default of `range` units, constrained to `max` units.
    pub fn validity(&mut self, range: u32, unit: RangeUnit, max: u32) -> Result<Upsert> {
        self.upsert(
            PolicyKind::Validity,
            || {
                let def = PolicyDefault::new(
                    "Validity Default",
                    "validityDefaultImpl",
                    format!("This default populates a Certificate Validity to the request. The default values are Range={range} in {}s", unit.as_str()),
                )
                .with_attribute("notBefore", string_attr("Not Before"))
                .with_attribute("notAfter", string_attr("Not After"))
                .with_param("range", range.to_string())
                .with_param("rangeUnit", unit.as_str())
                .with_param("startTime", "0");
                (def, constraint::validity(max, unit.as_str()))
            },
            |value| {
                value.default.set_param("range", range.to_string());
                value.default.set_param("rangeUnit", unit.as_str());
                value.constraint.set_value("range", max.to_string());
                value.constraint.set_value("rangeUnit", unit.as_str());
            },
        )
    }

    /// No default, with a renewal grace period constraint.
    pub fn renewal_grace(&mut self, before: u32, after: u32) -> Result<Upsert> {
        self.upsert(
            PolicyKind::NoDefault,
            || {
                (
                    PolicyDefault::new("No Default", "noDefaultImpl", "No Default"),
                    constraint::renewal_grace(before, after),
                )
            },
            |value| {
                value.constraint.set_value("renewal.graceBefore", before.to_string());
                value.constraint.set_value("renewal.graceAfter", after.to_string());
            },
        )
    }

    /// Placeholder for the user-supplied key.
    pub fn key(&mut self) -> Result<Upsert> {
        self.upsert(
            PolicyKind::Key,
            || {
                let def = PolicyDefault::new(
                    "Key Default",
                    "userKeyDefaultImpl",
                    "This default populates a User-Supplied Certificate Key to the request.",
                )
                .with_attribute("TYPE", string_attr("Key Type"))
                .with_attribute("LEN", string_attr("Key Length"))
                .with_attribute("KEY", string_attr("Key"));
                (def, constraint::key(KeyType::Any, DEFAULT_KEY_PARAMETERS))
            },
            |_| {},
        )
    }

    /// Authority key identifier extension.
    pub fn authority_key_id(&mut self) -> Result<Upsert> {
        self.upsert(
            PolicyKind::AuthorityKeyId,
            || {
                let def = PolicyDefault::new(
                    "Authority Key Identifier Default",
                    "authorityKeyIdentifierExtDefaultImpl",
                    "This default populates an Authority Key Identifier Extension (2.5.29.35) to the request.",
                )
                .with_attribute("critical", string_attr("Criticality"))
                .with_attribute("keyid", string_attr("Key ID"));
                (def, constraint::no_constraint())
            },
            |_| {},
        )
    }

    /// Basic constraints extension. Path length and isCA are updated in place.
    pub fn basic_constraints(&mut self, path_length: i32, is_ca: bool) -> Result<Upsert> {
        self.upsert(
            PolicyKind::BasicConstraints,
            || {
                let def = PolicyDefault::new(
                    "Basic Constraints Extension Default",
                    "basicConstraintsExtDefaultImpl",
                    "This default populates a Basic Constraints Extension (2.5.29.19) to the request.",
                )
                .with_attribute("basicConstraintsCritical", bool_attr("Criticality"))
                .with_attribute("basicConstraintsIsCA", bool_attr("Is CA"))
                .with_attribute("basicConstraintsPathLen", string_attr("Path Length"))
                .with_param("basicConstraintsCritical", "true")
                .with_param("basicConstraintsIsCA", is_ca.to_string())
                .with_param("basicConstraintsPathLen", path_length.to_string());
                (def, constraint::basic_constraints(true, is_ca, -1, path_length))
            },
            |value| {
                value.default.set_param("basicConstraintsIsCA", is_ca.to_string());
                value.default.set_param("basicConstraintsPathLen", path_length.to_string());
                value.constraint.set_value("basicConstraintsIsCA", is_ca.to_string());
                value.constraint.set_value("basicConstraintsMaxPathLen", path_length.to_string());
            },
        )
    }

    /// Subject key identifier extension.
    pub fn subject_key_id(&mut self) -> Result<Upsert> {
        self.upsert(
            PolicyKind::SubjectKeyId,
            || {
                let def = PolicyDefault::new(
                    "Subject Key Identifier Extension Default",
                    "subjectKeyIdentifierExtDefaultImpl",
                    "This default populates a Subject Key Identifier Extension (2.5.29.14) to the request.",
                )
                .with_attribute("critical", string_attr("Criticality"))
                .with_attribute("keyid", string_attr("Key ID"));
                (def, constraint::no_constraint())
            },
            |_| {},
        )
    }

    /// Signing algorithm, chosen by the CA from the default allow list.
    pub fn signing_alg(&mut self) -> Result<Upsert> {
        self.upsert(
            PolicyKind::SigningAlg,
            || {
                let def = PolicyDefault::new(
                    "Signing Alg",
                    "signingAlgDefaultImpl",
                    "This default populates the Certificate Signing Algorithm. The default values are Algorithm=-",
                )
                .with_attribute("signingAlg", string_attr("Signing Algorithm"))
                .with_param("signingAlg", "-");
                (def, constraint::signing_alg(&DEFAULT_SIGNING_ALGORITHMS))
            },
            |_| {},
        )
    }

    /// Authority information access with a single OCSP access description.
    pub fn auth_info_access(&mut self) -> Result<Upsert> {
        self.upsert(
            PolicyKind::AuthInfoAccess,
            || {
                let def = PolicyDefault::new(
                    "AIA Extension Default",
                    "authInfoAccessExtDefaultImpl",
                    "This default populates a Authority Info Access Extension (1.3.6.1.5.5.7.1.1) to the request.",
                )
                .with_attribute("authInfoAccessCritical", bool_attr("Criticality"))
                .with_attribute("authInfoAccessGeneralNames", string_attr("General Names"))
                .with_param("authInfoAccessCritical", "false")
                .with_param("authInfoAccessNumADs", "1")
                .with_param("authInfoAccessADMethod_0", OCSP_ACCESS_METHOD)
                .with_param("authInfoAccessADLocationType_0", "URIName")
                .with_param("authInfoAccessADLocation_0", "")
                .with_param("authInfoAccessADEnable_0", "true");
                (def, constraint::no_constraint())
            },
            |_| {},
        )
    }

    /// Extended key usage with the given OID list.
    pub fn extended_key_usage(&mut self, oids: &str) -> Result<Upsert> {
        self.upsert(
            PolicyKind::ExtendedKeyUsage,
            || {
                let def = PolicyDefault::new(
                    "Extended Key Usage Extension Default",
                    "extendedKeyUsageExtDefaultImpl",
                    format!("This default populates an Extended Key Usage extension () to the request. The default values are Criticality=false, OIDs={oids}"),
                )
                .with_attribute("exKeyUsageCritical", bool_attr("Criticality"))
                .with_attribute("exKeyUsageOIDs", string_attr("Comma-Separated list of Object Identifiers"))
                .with_param("exKeyUsageCritical", "false")
                .with_param("exKeyUsageOIDs", oids);
                (def, constraint::no_constraint())
            },
            |value| value.default.set_param("exKeyUsageOIDs", oids),
        )
    }

    /// Subject alternative name with a single general name record.
    pub fn subject_alt_name(&mut self, gn_type: &str, pattern: &str) -> Result<Upsert> {
        self.upsert(
            PolicyKind::SubjectAltName,
            || {
                let def = PolicyDefault::new(
                    "Subject Alt Name Constraint",
                    "subjectAltNameExtDefaultImpl",
                    "This default populates a Subject Alternative Name Extension (2.5.29.17) to the request.",
                )
                .with_attribute("subjAltNameExtCritical", bool_attr("Criticality"))
                .with_attribute("subjAltNames", string_attr("General Names"))
                .with_param("subjAltNameExtCritical", "false")
                .with_param("subjAltNameNumGNs", "1")
                .with_param("subjAltExtType_0", gn_type)
                .with_param("subjAltExtPattern_0", pattern)
                .with_param("subjAltExtGNEnable_0", "true");
                (def, constraint::no_constraint())
            },
            |value| {
                value.default.set_param("subjAltExtType_0", gn_type);
                value.default.set_param("subjAltExtPattern_0", pattern);
            },
        )
    }

    /// Example generic extension: S/MIME capabilities with a fixed payload.
    pub fn generic_extension(&mut self) -> Result<Upsert> {
        self.upsert(
            PolicyKind::GenericExtension,
            || {
                let def = PolicyDefault::new(
                    "Generic Extension",
                    "genericExtDefaultImpl",
                    format!("This default populates a Generic Extension to the request. The default values are Criticality=false, OID={SMIME_CAPABILITIES_OID}"),
                )
                .with_attribute("genericExtCritical", bool_attr("Criticality"))
                .with_attribute("genericExtData", string_attr("Extension Value"))
                .with_param("genericExtCritical", "false")
                .with_param("genericExtOID", SMIME_CAPABILITIES_OID)
                .with_param("genericExtData", SMIME_CAPABILITIES_DATA);
                (def, constraint::no_constraint())
            },
            |_| {},
        )
    }

    /// Netscape certificate type bits.
    pub fn ns_cert_type(&mut self, flags: &FlagSet) -> Result<Upsert> {
        self.upsert(
            PolicyKind::NsCertType,
            || {
                let mut def = PolicyDefault::new(
                    "Netscape Certificate Type Extension Default",
                    "nsCertTypeExtDefaultImpl",
                    "This default populates a Netscape Certificate Type Extension to the request.",
                );
                for (name, on) in flags.iter() {
                    def = def.with_attribute(name, bool_attr(name)).with_param(name, on.to_string());
                }
                (def, constraint::no_constraint())
            },
            |value| {
                for (name, on) in flags.iter() {
                    value.default.set_param(name, on.to_string());
                }
            },
        )
    }

    /// CRL distribution points with a single URI point.
    pub fn crl_distribution_point(&mut self, url: &str) -> Result<Upsert> {
        self.upsert(
            PolicyKind::CrlDistributionPoints,
            || {
                let def = PolicyDefault::new(
                    "CRL Distribution Points Extension Default",
                    "crlDistributionPointsExtDefaultImpl",
                    "This default populates a CRL Distribution Points Extension (2.5.29.31) to the request.",
                )
                .with_attribute("crlDistPointsCritical", bool_attr("Criticality"))
                .with_attribute("crlDistPointsValue", string_attr("CRL Distribution Points"))
                .with_param("crlDistPointsCritical", "false")
                .with_param("crlDistPointsNum", "1")
                .with_param("crlDistPointsEnable_0", "true")
                .with_param("crlDistPointsPointType_0", "URIName")
                .with_param("crlDistPointsPointName_0", url)
                .with_param("crlDistPointsReasons_0", "")
                .with_param("crlDistPointsIssuerType_0", "DirectoryName")
                .with_param("crlDistPointsIssuerName_0", "");
                (def, constraint::no_constraint())
            },
            |value| value.default.set_param("crlDistPointsPointName_0", url),
        )
    }

    /// Extension copied from the request. For the subject alternative name
    /// OID the constraint checks `subject_pattern`.
    pub fn user_extension(&mut self, oid: &str, subject_pattern: &str) -> Result<Upsert> {
        let make_constraint = || {
            if oid == SUBJECT_ALT_NAME_OID {
                constraint::subject_name(subject_pattern)
            } else {
                constraint::extension(oid)
            }
        };
        self.upsert(
            PolicyKind::UserExtension,
            || {
                let def = PolicyDefault::new(
                    "User Supplied Extension Default",
                    "userExtensionDefaultImpl",
                    format!("This default populates a User-Supplied Extension ({oid}) to the request."),
                )
                .with_attribute("userExtOID", string_attr("Object Identifier"))
                .with_param("userExtOID", oid);
                (def, make_constraint())
            },
            |value| {
                value.default.set_param("userExtOID", oid);
                constraint::attach(value, make_constraint());
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> PolicySet {
        PolicySet::new("pkitest1")
    }

    #[test]
    fn ids_are_sequential() {
        let mut set = set();
        let mut b = PolicyBuilder::new(&mut set);
        assert_eq!(b.subject_name("UID=.*", None).expect("policy"), Upsert::Created(1));
        assert_eq!(b.key().expect("policy"), Upsert::Created(2));
        assert_eq!(b.authority_key_id().expect("policy"), Upsert::Created(3));
    }

    #[test]
    fn subject_name_switches_class_without_duplicating() {
        let mut set = set();
        let mut b = PolicyBuilder::new(&mut set);
        b.subject_name("UID=.*", None).expect("policy");
        assert_eq!(b.subject_name("CN=.*", Some("CN=host")).expect("policy"), Upsert::Updated(1));

        let value = set.get(&PolicyKind::SubjectName).expect("subject policy");
        assert_eq!(set.len(), 1);
        assert_eq!(value.default.class_id, "subjectNameDefaultImpl");
        assert_eq!(value.default.param("name"), Some("CN=host"));
        assert_eq!(value.constraint.value("pattern"), Some("CN=.*"));
    }

    #[test]
    fn subject_name_back_to_user_supplied_drops_literal() {
        let mut set = set();
        let mut b = PolicyBuilder::new(&mut set);
        b.subject_name("CN=.*", Some("CN=host")).expect("policy");
        b.subject_name("UID=.*", None).expect("policy");
        let value = set.get(&PolicyKind::SubjectName).expect("subject policy");
        assert_eq!(value.default.class_id, "userSubjectNameDefaultImpl");
        assert_eq!(value.default.param("name"), None);
    }

    #[test]
    fn validity_updates_params_and_constraint() {
        let mut set = set();
        let mut b = PolicyBuilder::new(&mut set);
        b.validity(180, RangeUnit::Day, 365).expect("policy");
        b.validity(15, RangeUnit::Day, 30).expect("policy");
        let value = set.get(&PolicyKind::Validity).expect("validity policy");
        assert_eq!(value.default.param("range"), Some("15"));
        assert_eq!(value.default.param("rangeUnit"), Some("day"));
        assert_eq!(value.constraint.value("range"), Some("30"));
    }

    #[test]
    fn key_usage_update_flips_bits() {
        let mut set = set();
        let mut b = PolicyBuilder::new(&mut set);
        b.key_usage(&FlagSet::key_usage("keyUsageCritical,keyUsageDigitalSignature")).expect("policy");
        b.key_usage(&FlagSet::key_usage("keyUsageKeyCertSign")).expect("policy");
        let value = set.get(&PolicyKind::KeyUsage).expect("key usage policy");
        assert_eq!(value.default.param("keyUsageCritical"), Some("false"));
        assert_eq!(value.default.param("keyUsageKeyCertSign"), Some("true"));
        assert_eq!(value.constraint.value("keyUsageKeyCertSign"), Some("true"));
        assert_eq!(value.constraint.value("keyUsageDigitalSignature"), Some("false"));
    }

    #[test]
    fn basic_constraints_update_in_place() {
        let mut set = set();
        let mut b = PolicyBuilder::new(&mut set);
        b.basic_constraints(-1, true).expect("policy");
        b.basic_constraints(3, false).expect("policy");
        let value = set.get(&PolicyKind::BasicConstraints).expect("basic constraints");
        assert_eq!(value.default.param("basicConstraintsPathLen"), Some("3"));
        assert_eq!(value.default.param("basicConstraintsIsCA"), Some("false"));
        assert_eq!(value.constraint.value("basicConstraintsMaxPathLen"), Some("3"));
    }

    #[test]
    fn generic_extension_update_is_noop() {
        let mut set = set();
        let mut b = PolicyBuilder::new(&mut set);
        b.generic_extension().expect("policy");
        let before = set.clone();
        PolicyBuilder::new(&mut set).generic_extension().expect("policy");
        assert_eq!(set, before);
    }

    #[test]
    fn user_extension_san_oid_uses_subject_constraint() {
        let mut set = set();
        PolicyBuilder::new(&mut set).user_extension(SUBJECT_ALT_NAME_OID, "UID=.*").expect("policy");
        let value = set.get(&PolicyKind::UserExtension).expect("user ext");
        assert_eq!(value.constraint.class_id, "subjectNameConstraintImpl");
        assert_eq!(value.constraint.value("pattern"), Some("UID=.*"));

        PolicyBuilder::new(&mut set).user_extension("1.2.3.4", "UID=.*").expect("policy");
        let value = set.get(&PolicyKind::UserExtension).expect("user ext");
        assert_eq!(value.constraint.class_id, "extensionConstraintImpl");
        assert_eq!(value.default.param("userExtOID"), Some("1.2.3.4"));
    }

    #[test]
    fn renewal_grace_update() {
        let mut set = set();
        let mut b = PolicyBuilder::new(&mut set);
        b.renewal_grace(30, 30).expect("policy");
        b.renewal_grace(5, 5).expect("policy");
        let value = set.get(&PolicyKind::NoDefault).expect("no default");
        assert_eq!(value.constraint.value("renewal.graceBefore"), Some("5"));
        assert_eq!(value.constraint.value("renewal.graceAfter"), Some("5"));
    }

    #[test]
    fn crl_and_san_update() {
        let mut set = set();
        let mut b = PolicyBuilder::new(&mut set);
        b.crl_distribution_point("http://old/crl").expect("policy");
        b.subject_alt_name("RFC822Name", "$request.requestor_email$").expect("policy");
        b.crl_distribution_point("http://new/crl").expect("policy");
        b.subject_alt_name("DNSName", "$request.req_subject_name.cn$").expect("policy");
        assert_eq!(set.len(), 2);
        let crl = set.get(&PolicyKind::CrlDistributionPoints).expect("crl");
        assert_eq!(crl.default.param("crlDistPointsPointName_0"), Some("http://new/crl"));
        let san = set.get(&PolicyKind::SubjectAltName).expect("san");
        assert_eq!(san.default.param("subjAltExtType_0"), Some("DNSName"));
    }
}
