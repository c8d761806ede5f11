//! Profile archetypes, caller overrides and the resolved parameter set.
//!
//! Resolution is field by field: an override always wins, an absent override
//! falls back to the archetype default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, Result};
use crate::flags::FlagSet;

/// Profile archetype selecting the default parameter bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Archetype {
    /// End user certificate.
    User,
    /// End user certificate with S/MIME extension.
    Smime,
    /// TLS server certificate.
    Server,
    /// Anything else; same defaults as `Server`.
    Other,
    /// Separate encryption and signing certificates.
    DualCert,
    /// Subordinate CA signing certificate.
    Ca,
}

impl Archetype {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Smime => "smime",
            Self::Server => "server",
            Self::Other => "other",
            Self::DualCert => "dualcert",
            Self::Ca => "ca",
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Archetype {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "smime" => Ok(Self::Smime),
            "server" => Ok(Self::Server),
            "other" => Ok(Self::Other),
            "dualcert" => Ok(Self::DualCert),
            "ca" => Ok(Self::Ca),
            _ => Err(ProfileError::UnknownArchetype(s.to_string())),
        }
    }
}

/// Key generation input class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputClass {
    /// PKCS#10 / CRMF request pasted by the requester.
    CertRequest,
    /// Single key generated by the client.
    KeyGen,
    /// Encryption and signing keys generated by the client.
    DualKeyGen,
}

impl InputClass {
    /// Class id written to the profile.
    #[must_use]
    pub const fn class_id(self) -> &'static str {
        match self {
            Self::CertRequest => "certReqInputImpl",
            Self::KeyGen => "keyGenInputImpl",
            Self::DualKeyGen => "dualKeyGenInputImpl",
        }
    }

    /// Display name written to the profile.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::CertRequest => "Certificate Request Input",
            Self::KeyGen => "Key Generation",
            Self::DualKeyGen => "Dual Key Generation",
        }
    }
}

/// Validity range unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeUnit {
    /// Years.
    Year,
    /// Months.
    Month,
    /// Days.
    Day,
    /// Hours.
    Hour,
    /// Minutes.
    Minute,
}

impl RangeUnit {
    /// Value as written in the profile.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
        }
    }
}

impl FromStr for RangeUnit {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "year" => Ok(Self::Year),
            "month" => Ok(Self::Month),
            "day" => Ok(Self::Day),
            "hour" => Ok(Self::Hour),
            "minute" => Ok(Self::Minute),
            _ => Err(ProfileError::invalid_override(
                "rangeunit",
                format!("expected year, month, day, hour or minute, got {s}"),
            )),
        }
    }
}

/// Sparse caller overrides. Field names on the wire follow the profile
/// tooling's key spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileOverrides {
    /// Subject name regex.
    #[serde(rename = "Subject_Pattern", default, skip_serializing_if = "Option::is_none")]
    pub subject_pattern: Option<String>,
    /// Literal subject name.
    #[serde(rename = "Subject_Default", default, skip_serializing_if = "Option::is_none")]
    pub subject_default: Option<String>,
    /// Display name.
    #[serde(rename = "ProfileName", default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    /// Description.
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Key usage enable list.
    #[serde(rename = "Key_List", default, skip_serializing_if = "Option::is_none")]
    pub key_list: Option<String>,
    /// Renewal grace days before expiry.
    #[serde(rename = "notBefore", default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    /// Renewal grace days after expiry.
    #[serde(rename = "notAfter", default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
    /// Validity length.
    #[serde(rename = "ValidFor", default, skip_serializing_if = "Option::is_none")]
    pub valid_for: Option<String>,
    /// Validity unit.
    #[serde(rename = "rangeunit", default, skip_serializing_if = "Option::is_none")]
    pub range_unit: Option<String>,
    /// Maximum validity accepted by the constraint.
    #[serde(rename = "MaxValidity", default, skip_serializing_if = "Option::is_none")]
    pub max_validity: Option<String>,
    /// Netscape certificate type enable list.
    #[serde(rename = "Netscape_Extensions", default, skip_serializing_if = "Option::is_none")]
    pub netscape_extensions: Option<String>,
    /// CRL distribution point URL.
    #[serde(rename = "CrlUrl", default, skip_serializing_if = "Option::is_none")]
    pub crl_url: Option<String>,
    /// Subject alternative name type.
    #[serde(rename = "altType", default, skip_serializing_if = "Option::is_none")]
    pub alt_type: Option<String>,
    /// Subject alternative name pattern.
    #[serde(rename = "altPattern", default, skip_serializing_if = "Option::is_none")]
    pub alt_pattern: Option<String>,
    /// User-supplied extension OID.
    #[serde(rename = "ExtOID", default, skip_serializing_if = "Option::is_none")]
    pub ext_oid: Option<String>,
    /// Basic constraints path length (CA only).
    #[serde(rename = "PathLength", default, skip_serializing_if = "Option::is_none")]
    pub path_length: Option<String>,
    /// Basic constraints isCA flag (CA only).
    #[serde(rename = "isCA", default, skip_serializing_if = "Option::is_none")]
    pub is_ca: Option<String>,
    /// Add the S/MIME generic extension.
    #[serde(rename = "Generic_extensions", default, skip_serializing_if = "Option::is_none")]
    pub generic_extensions: Option<String>,
}

impl ProfileOverrides {
    /// Parses a JSON object of overrides.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ProfileError::invalid_override("<json>", e.to_string()))
    }

    /// Builds overrides from an optional JSON object plus `KEY=VALUE` pairs;
    /// pairs win over the JSON.
    pub fn from_sources(json: Option<&str>, pairs: &[(String, String)]) -> Result<Self> {
        let mut map = match json {
            Some(text) => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(_) => {
                    return Err(ProfileError::invalid_override("<json>", "expected a JSON object"));
                }
                Err(e) => return Err(ProfileError::invalid_override("<json>", e.to_string())),
            },
            None => serde_json::Map::new(),
        };
        for (key, value) in pairs {
            map.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| ProfileError::invalid_override("<set>", e.to_string()))
    }
}

/// Fully resolved parameters for one policy set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileParameters {
    /// Archetype the defaults came from.
    pub archetype: Archetype,
    /// Display name.
    pub profile_name: String,
    /// Description.
    pub description: String,
    /// Policy set name.
    pub policy_set: String,
    /// Key generation input.
    pub input_class: InputClass,
    /// Whether the subject name input is added.
    pub subject_name_input: bool,
    /// Key usage bits.
    pub key_usage: FlagSet,
    /// Subject name regex.
    pub subject_pattern: String,
    /// Literal subject name, if any.
    pub subject_default: Option<String>,
    /// Renewal grace days before expiry.
    pub not_before: u32,
    /// Renewal grace days after expiry.
    pub not_after: u32,
    /// Validity length.
    pub valid_for: u32,
    /// Validity unit.
    pub range_unit: RangeUnit,
    /// Maximum validity accepted by the constraint.
    pub max_validity: u32,
    /// Extended key usage OIDs.
    pub ext_key_usage: String,
    /// Netscape certificate type bits, when requested.
    pub netscape: Option<FlagSet>,
    /// CRL distribution point URL, when requested.
    pub crl_url: Option<String>,
    /// Subject alternative name type.
    pub alt_type: String,
    /// Subject alternative name pattern.
    pub alt_pattern: String,
    /// User-supplied extension OID, when requested.
    pub ext_oid: Option<String>,
    /// Basic constraints path length (CA archetype).
    pub path_length: Option<i32>,
    /// Basic constraints isCA flag.
    pub is_ca: bool,
    /// Whether the S/MIME generic extension is added.
    pub generic_extension: bool,
}

impl ProfileParameters {
    /// Parameters for the signing half of a dual-certificate profile: same
    /// subject and validity, signature-only key usage.
    #[must_use]
    pub fn signing_counterpart(&self) -> Self {
        Self {
            policy_set: "signingCertSet".to_string(),
            key_usage: FlagSet::key_usage(SIGNING_KEY_USAGE),
            ..self.clone()
        }
    }
}

struct ArchetypeDefaults {
    profile_name: &'static str,
    description: &'static str,
    policy_set: &'static str,
    input_class: InputClass,
    subject_name_input: bool,
    key_list: &'static str,
    subject_pattern: &'static str,
    ext_key_usage: &'static str,
    path_length: Option<i32>,
    is_ca: bool,
    generic_extension: bool,
}

const SIGNING_KEY_USAGE: &str = "keyUsageCritical,keyUsageDigitalSignature,keyUsageNonRepudiation";
const CLIENT_EKU: &str = "1.3.6.1.5.5.7.3.2,1.3.6.1.5.5.7.3.4";
const SERVER_EKU: &str = "1.3.6.1.5.5.7.3.1,1.3.6.1.5.5.7.3.2";

const DEFAULT_GRACE_DAYS: u32 = 30;
const DEFAULT_VALID_FOR: u32 = 180;
const DEFAULT_MAX_VALIDITY: u32 = 365;
const DEFAULT_ALT_TYPE: &str = "RFC822Name";
const DEFAULT_ALT_PATTERN: &str = "$request.requestor_email$";

fn defaults(archetype: Archetype) -> ArchetypeDefaults {
    let user = ArchetypeDefaults {
        profile_name: "Manual User Dual-Use Certificate Enrollment",
        description: "This certificate profile is for enrolling user certificates.",
        policy_set: "pkitest1",
        input_class: InputClass::KeyGen,
        subject_name_input: true,
        key_list: "keyUsageCritical,keyUsageDigitalSignature,keyUsageNonRepudiation,keyUsageKeyEncipherment",
        subject_pattern: "UID=.*",
        ext_key_usage: CLIENT_EKU,
        path_length: None,
        is_ca: false,
        generic_extension: false,
    };
    match archetype {
        Archetype::User => user,
        Archetype::Smime => ArchetypeDefaults {
            profile_name: "Manual User S/MIME Certificate Enrollment",
            description: "This certificate profile is for enrolling S/MIME user certificates.",
            generic_extension: true,
            ..user
        },
        Archetype::Server | Archetype::Other => ArchetypeDefaults {
            profile_name: "Manual Server Certificate Enrollment",
            description: "This certificate profile is for enrolling server certificates.",
            input_class: InputClass::CertRequest,
            subject_name_input: false,
            key_list: "keyUsageCritical,keyUsageDigitalSignature,keyUsageKeyEncipherment,keyUsageDataEncipherment",
            subject_pattern: "CN=.*",
            ext_key_usage: SERVER_EKU,
            ..user
        },
        Archetype::DualCert => ArchetypeDefaults {
            profile_name: "Manual User Dual-Key Certificate Enrollment",
            description: "This certificate profile is for enrolling dual user certificates.",
            policy_set: "encryptionCertSet",
            input_class: InputClass::DualKeyGen,
            key_list: "keyUsageCritical,keyUsageKeyEncipherment,keyUsageDataEncipherment",
            ..user
        },
        Archetype::Ca => ArchetypeDefaults {
            profile_name: "Manual Certificate Manager Signing Certificate Enrollment",
            description: "This certificate profile is for enrolling Certificate Authority certificates.",
            policy_set: "caCertSet",
            input_class: InputClass::CertRequest,
            subject_name_input: false,
            key_list: "keyUsageCritical,keyUsageDigitalSignature,keyUsageNonRepudiation,keyUsageKeyCertSign,keyUsageCrlSign",
            subject_pattern: "CN=.*",
            path_length: Some(-1),
            is_ca: true,
            ..user
        },
    }
}

fn parse_number<T: FromStr>(key: &str, value: Option<&String>, default: T) -> Result<T> {
    match value {
        Some(text) => text
            .trim()
            .parse()
            .map_err(|_| ProfileError::invalid_override(key, format!("not a number: {text}"))),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, value: Option<&String>, default: bool) -> Result<bool> {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "true" => Ok(true),
        Some(v) if v == "false" => Ok(false),
        Some(v) => Err(ProfileError::invalid_override(key, format!("not a boolean: {v}"))),
        None => Ok(default),
    }
}

/// Resolves the parameter set for `archetype` with `overrides` applied.
pub fn generate_profile_parameters(
    archetype: Archetype,
    overrides: &ProfileOverrides,
) -> Result<ProfileParameters> {
    let d = defaults(archetype);
    let o = overrides;

    let (path_length, is_ca) = if archetype == Archetype::Ca {
        let path_length = match &o.path_length {
            Some(_) => Some(parse_number("PathLength", o.path_length.as_ref(), -1)?),
            None => d.path_length,
        };
        (path_length, parse_bool("isCA", o.is_ca.as_ref(), d.is_ca)?)
    } else {
        (d.path_length, d.is_ca)
    };

    Ok(ProfileParameters {
        archetype,
        profile_name: o.profile_name.clone().unwrap_or_else(|| d.profile_name.to_string()),
        description: o.description.clone().unwrap_or_else(|| d.description.to_string()),
        policy_set: d.policy_set.to_string(),
        input_class: d.input_class,
        subject_name_input: d.subject_name_input,
        key_usage: FlagSet::key_usage(o.key_list.as_deref().unwrap_or(d.key_list)),
        subject_pattern: o
            .subject_pattern
            .clone()
            .unwrap_or_else(|| d.subject_pattern.to_string()),
        subject_default: o.subject_default.clone(),
        not_before: parse_number("notBefore", o.not_before.as_ref(), DEFAULT_GRACE_DAYS)?,
        not_after: parse_number("notAfter", o.not_after.as_ref(), DEFAULT_GRACE_DAYS)?,
        valid_for: parse_number("ValidFor", o.valid_for.as_ref(), DEFAULT_VALID_FOR)?,
        range_unit: o.range_unit.as_deref().unwrap_or("day").parse()?,
        max_validity: parse_number("MaxValidity", o.max_validity.as_ref(), DEFAULT_MAX_VALIDITY)?,
        ext_key_usage: d.ext_key_usage.to_string(),
        netscape: o.netscape_extensions.as_deref().map(FlagSet::ns_cert_type),
        crl_url: o.crl_url.clone(),
        alt_type: o.alt_type.clone().unwrap_or_else(|| DEFAULT_ALT_TYPE.to_string()),
        alt_pattern: o
            .alt_pattern
            .clone()
            .unwrap_or_else(|| DEFAULT_ALT_PATTERN.to_string()),
        ext_oid: o.ext_oid.clone(),
        path_length,
        is_ca,
        generic_extension: parse_bool(
            "Generic_extensions",
            o.generic_extensions.as_ref(),
            d.generic_extension,
        )?,
    })
}
