//! Constraint sub-trees attached to policy values.
//!
//! Each builder returns a complete [`Constraint`]; the policy builder decides
//! whether it becomes a new value's constraint or replaces an existing one.

use crate::document::{Constraint, Descriptor, PolicyValue};
use crate::flags::FlagSet;

/// Signing algorithms accepted when no list is given.
pub const DEFAULT_SIGNING_ALGORITHMS: [&str; 10] = [
    "SHA1withRSA",
    "SHA256withRSA",
    "SHA512withRSA",
    "SHA1withEC",
    "SHA256withEC",
    "SHA384withEC",
    "SHA512withEC",
    "SHA256withRSA/PSS",
    "SHA384withRSA/PSS",
    "SHA512withRSA/PSS",
];

/// Key sizes and curves accepted when no list is given.
pub const DEFAULT_KEY_PARAMETERS: &str = "1024,2048,3072,4096,nistp256,nistp384,nistp521";

const CHOICE_BOOL: &str = "true,false,-";

/// Key type accepted by the key constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    /// RSA only.
    Rsa,
    /// EC only.
    Ec,
    /// Either.
    #[default]
    Any,
}

impl KeyType {
    /// Value as written in the profile.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::Ec => "EC",
            Self::Any => "-",
        }
    }
}

/// Replaces the constraint of `value`.
pub fn attach(value: &mut PolicyValue, constraint: Constraint) {
    value.constraint = constraint;
}

/// Accepts anything.
#[must_use]
pub fn no_constraint() -> Constraint {
    Constraint::new("No Constraint", "No Constraint", "noConstraintImpl")
}

/// Subject name must match `pattern`.
#[must_use]
pub fn subject_name(pattern: &str) -> Constraint {
    Constraint::new(
        "Subject Name Constraint",
        format!("This constraint accepts the subject name that matches {pattern}"),
        "subjectNameConstraintImpl",
    )
    .with_value(
        "pattern",
        Descriptor::new("string", "Subject Name Pattern"),
        pattern,
    )
}

/// Validity may not exceed `range` units; not-before/not-after checks off.
#[must_use]
pub fn validity(range: u32, unit: &str) -> Constraint {
    Constraint::new(
        "Validity Constraint",
        format!("This constraint rejects the validity that is not between {range} {unit}s."),
        "validityConstraintImpl",
    )
    .with_value(
        "range",
        Descriptor::new("integer", "Validity Range").with_default("365"),
        range.to_string(),
    )
    .with_value(
        "rangeUnit",
        Descriptor::new("string", "Validity Range Unit: year, month, day, hour, minute")
            .with_default("day"),
        unit,
    )
    .with_value(
        "notBeforeGracePeriod",
        Descriptor::new("integer", "Grace period for Not Before being set in the future (in seconds).")
            .with_default("0"),
        "0",
    )
    .with_value(
        "notBeforeCheck",
        Descriptor::new("boolean", "Check Not Before against current time").with_default("false"),
        "false",
    )
    .with_value(
        "notAfterCheck",
        Descriptor::new("boolean", "Check Not After against Not Before").with_default("false"),
        "false",
    )
}

/// Renewal allowed from `before` days ahead of expiry to `after` days past it.
#[must_use]
pub fn renewal_grace(before: u32, after: u32) -> Constraint {
    Constraint::new(
        "Renewal Grace Period Constraint",
        format!(
            "This constraint rejects the validity that is not between {before} days before and {after} days after original cert expiration date days."
        ),
        "renewGracePeriodConstraintImpl",
    )
    .with_value(
        "renewal.graceBefore",
        Descriptor::new("integer", "Renewal Grace Period Before").with_default("30"),
        before.to_string(),
    )
    .with_value(
        "renewal.graceAfter",
        Descriptor::new("integer", "Renewal Grace Period After").with_default("30"),
        after.to_string(),
    )
}

/// Basic constraints bounds.
#[must_use]
pub fn basic_constraints(critical: bool, is_ca: bool, min_path: i32, max_path: i32) -> Constraint {
    Constraint::new(
        "Basic Constraint Extension Constraint",
        "This constraint accepts the Basic Constraint extension, if present, only when Criticality=true, Is CA=true, Min Path Length=-1, Max Path Length=-1",
        "basicConstraintsExtConstraintImpl",
    )
    .with_value(
        "basicConstraintsCritical",
        Descriptor::new("choice", "Criticality").with_constraint(CHOICE_BOOL).with_default("-"),
        critical.to_string(),
    )
    .with_value(
        "basicConstraintsIsCA",
        Descriptor::new("choice", "Is CA").with_constraint(CHOICE_BOOL).with_default("-"),
        is_ca.to_string(),
    )
    .with_value(
        "basicConstraintsMinPathLen",
        Descriptor::new("integer", "Min Path Length").with_default("-1"),
        min_path.to_string(),
    )
    .with_value(
        "basicConstraintsMaxPathLen",
        Descriptor::new("integer", "Max Path Length").with_default("100"),
        max_path.to_string(),
    )
}

/// Key usage extension must carry exactly these bits.
#[must_use]
pub fn key_usage(flags: &FlagSet) -> Constraint {
    let mut constraint = Constraint::new(
        "Key Usage Extension Constraint",
        "This constraint accepts the Key Usage extension",
        "keyUsageExtConstraintImpl",
    );
    for (name, on) in flags.iter() {
        constraint = constraint.with_value(
            name,
            Descriptor::new("choice", name).with_constraint(CHOICE_BOOL).with_default("-"),
            on.to_string(),
        );
    }
    constraint
}

/// Signing algorithm must be one of `allowed`.
#[must_use]
pub fn signing_alg(allowed: &[&str]) -> Constraint {
    let list = allowed.join(",");
    Constraint::new(
        "No Constraint",
        format!("This constraint accepts only the Signing Algorithms of {list}"),
        "signingAlgConstraintImpl",
    )
    .with_value(
        "signingAlgsAllowed",
        Descriptor::new("string", "Allowed Signing Algorithms")
            .with_default(DEFAULT_SIGNING_ALGORITHMS.join(",")),
        list,
    )
}

/// Key type and size-or-curve allow list.
#[must_use]
pub fn key(key_type: KeyType, parameters: &str) -> Constraint {
    Constraint::new(
        "Key Constraint",
        "This constraint accepts the key only if Key Type=-, Key Parameters=1024,2048,3072,4096,nistp256,nistp384,nistp521",
        "keyConstraintImpl",
    )
    .with_value(
        "keyType",
        Descriptor::new("choice", "Key Type").with_constraint("-,RSA,EC").with_default("RSA"),
        key_type.as_str(),
    )
    .with_value(
        "keyParameters",
        Descriptor::new(
            "string",
            "Key Lengths or Curves. For EC use comma separated list of curves, otherwise use list of key sizes. Ex: 1024,2048,4096,8192 or: nistp256,nistp384,nistp521,sect163k1,nistk163 for EC.",
        )
        .with_default(""),
        parameters,
    )
}

/// Extension with `oid` must be present.
#[must_use]
pub fn extension(oid: &str) -> Constraint {
    Constraint::new(
        "Extension Constraint",
        format!("This constraint accepts the extension {oid}"),
        "extensionConstraintImpl",
    )
    .with_value(
        "extCritical",
        Descriptor::new("choice", "Criticality").with_constraint(CHOICE_BOOL).with_default("-"),
        "-",
    )
    .with_value(
        "extOID",
        Descriptor::new("string", "Extension OID"),
        oid,
    )
}
