//! Typed profile document tree.
//!
//! A [`Profile`] owns its inputs, outputs and policy sets. Each [`PolicySet`]
//! holds at most one [`PolicyValue`] per [`PolicyKind`]; the kind index is
//! maintained by the set itself so callers cannot break that invariant.

use std::collections::HashMap;
use std::fmt;

use crate::error::{ProfileError, Result};

/// An XML element kept verbatim because the typed tree has no field for it
/// (for example `enabledBy`, `authenticatorId` or `authzAcl`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Tag name.
    pub name: String,
    /// Attributes in document order.
    pub attrs: Vec<(String, String)>,
    /// Character data, exactly as read.
    pub text: String,
    /// Child elements in document order.
    pub children: Vec<Element>,
}

/// An unmodeled child element and where it sat among its siblings.
///
/// `after` names the preceding sibling and which occurrence of that name it
/// was (zero based); `None` places the element first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraElement {
    /// Preceding sibling as `(name, occurrence)`.
    pub after: Option<(String, usize)>,
    /// The element itself.
    pub element: Element,
}

/// Field descriptor shared by input attributes, policy attributes and
/// constraint values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Descriptor {
    /// Value syntax (`string`, `integer`, `boolean`, `choice`, ...).
    pub syntax: String,
    /// Allowed values for `choice` syntax.
    pub constraint: Option<String>,
    /// Human readable description.
    pub description: String,
    /// Value used when none is supplied.
    pub default_value: Option<String>,
}

impl Descriptor {
    /// Creates a descriptor with no constraint and no default.
    #[must_use]
    pub fn new(syntax: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            syntax: syntax.into(),
            constraint: None,
            description: description.into(),
            default_value: None,
        }
    }

    /// Sets the allowed-value list.
    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }
}

/// A named attribute of an input, output or policy default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Current value, if any.
    pub value: Option<String>,
    /// Descriptor.
    pub descriptor: Descriptor,
}

impl Attribute {
    /// Creates an attribute without a value.
    #[must_use]
    pub fn new(name: impl Into<String>, descriptor: Descriptor) -> Self {
        Self {
            name: name.into(),
            value: None,
            descriptor,
        }
    }
}

/// Enrollment input (request, key generation, subject name, submitter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// Input id (`i1`, `i2`, ...).
    pub id: String,
    /// Implementing class.
    pub class_id: String,
    /// Display name.
    pub name: String,
    /// Ordered attributes.
    pub attributes: Vec<Attribute>,
    /// Children without a typed field.
    pub extra: Vec<ExtraElement>,
}

/// Enrollment output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Output id (`o1`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Implementing class.
    pub class_id: String,
    /// Ordered attributes.
    pub attributes: Vec<Attribute>,
    /// Children without a typed field.
    pub extra: Vec<ExtraElement>,
}

/// A named parameter of a policy default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

/// The default-value generator of a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDefault {
    /// Display name, serialized as the `id` attribute.
    pub name: String,
    /// Generator class.
    pub class_id: String,
    /// Description.
    pub description: String,
    /// Attribute descriptors.
    pub attributes: Vec<Attribute>,
    /// Parameters, in insertion order.
    pub params: Vec<Param>,
    /// Children without a typed field.
    pub extra: Vec<ExtraElement>,
}

impl PolicyDefault {
    /// Creates a default with no attributes or params.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        class_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            class_id: class_id.into(),
            description: description.into(),
            attributes: Vec::new(),
            params: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Appends an attribute descriptor.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, descriptor: Descriptor) -> Self {
        self.attributes.push(Attribute::new(name, descriptor));
        self
    }

    /// Sets a parameter, appending it if absent.
    #[must_use]
    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_param(name, value);
        self
    }

    /// Returns a parameter value.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Sets a parameter in place, appending it if absent.
    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(param) => param.value = value,
            None => self.params.push(Param {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Removes a parameter.
    pub fn remove_param(&mut self, name: &str) {
        self.params.retain(|p| p.name != name);
    }
}

/// A single named value inside a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintValue {
    /// Value id.
    pub id: String,
    /// Descriptor.
    pub descriptor: Descriptor,
    /// Current value.
    pub value: Option<String>,
}

/// Validation rule attached to a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Display name, serialized as the `id` attribute.
    pub name: String,
    /// Description.
    pub description: String,
    /// Constraint class.
    pub class_id: String,
    /// Nested values.
    pub values: Vec<ConstraintValue>,
    /// Children without a typed field.
    pub extra: Vec<ExtraElement>,
}

impl Constraint {
    /// Creates a constraint with no values.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        class_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            class_id: class_id.into(),
            values: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Appends a value.
    #[must_use]
    pub fn with_value(mut self, id: &str, descriptor: Descriptor, value: impl Into<String>) -> Self {
        self.values.push(ConstraintValue {
            id: id.to_string(),
            descriptor,
            value: Some(value.into()),
        });
        self
    }

    /// Returns the current value of `id`.
    #[must_use]
    pub fn value(&self, id: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.id == id)
            .and_then(|v| v.value.as_deref())
    }

    /// Sets the value of an existing entry. Returns `false` when `id` is absent.
    pub fn set_value(&mut self, id: &str, value: impl Into<String>) -> bool {
        match self.values.iter_mut().find(|v| v.id == id) {
            Some(entry) => {
                entry.value = Some(value.into());
                true
            }
            None => false,
        }
    }
}

/// Identity of a policy default generator.
///
/// Both subject-name generators map to [`PolicyKind::SubjectName`], so a set
/// never carries a literal and a user-supplied subject default at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// `subjectNameDefaultImpl` or `userSubjectNameDefaultImpl`.
    SubjectName,
    /// `keyUsageExtDefaultImpl`.
    KeyUsage,
    /// `caValidityDefaultImpl`.
    CaValidity,
    /// `validityDefaultImpl`.
    Validity,
    /// `noDefaultImpl`.
    NoDefault,
    /// `userKeyDefaultImpl`.
    Key,
    /// `authorityKeyIdentifierExtDefaultImpl`.
    AuthorityKeyId,
    /// `basicConstraintsExtDefaultImpl`.
    BasicConstraints,
    /// `subjectKeyIdentifierExtDefaultImpl`.
    SubjectKeyId,
    /// `signingAlgDefaultImpl`.
    SigningAlg,
    /// `authInfoAccessExtDefaultImpl`.
    AuthInfoAccess,
    /// `extendedKeyUsageExtDefaultImpl`.
    ExtendedKeyUsage,
    /// `subjectAltNameExtDefaultImpl`.
    SubjectAltName,
    /// `genericExtDefaultImpl`.
    GenericExtension,
    /// `nsCertTypeExtDefaultImpl`.
    NsCertType,
    /// `crlDistributionPointsExtDefaultImpl`.
    CrlDistributionPoints,
    /// `userExtensionDefaultImpl`.
    UserExtension,
    /// Any class this crate does not build.
    Other(String),
}

impl PolicyKind {
    /// Maps a generator class id to its kind.
    #[must_use]
    pub fn from_class_id(class_id: &str) -> Self {
        match class_id {
            "subjectNameDefaultImpl" | "userSubjectNameDefaultImpl" => Self::SubjectName,
            "keyUsageExtDefaultImpl" => Self::KeyUsage,
            "caValidityDefaultImpl" => Self::CaValidity,
            "validityDefaultImpl" => Self::Validity,
            "noDefaultImpl" => Self::NoDefault,
            "userKeyDefaultImpl" => Self::Key,
            "authorityKeyIdentifierExtDefaultImpl" => Self::AuthorityKeyId,
            "basicConstraintsExtDefaultImpl" => Self::BasicConstraints,
            "subjectKeyIdentifierExtDefaultImpl" => Self::SubjectKeyId,
            "signingAlgDefaultImpl" => Self::SigningAlg,
            "authInfoAccessExtDefaultImpl" => Self::AuthInfoAccess,
            "extendedKeyUsageExtDefaultImpl" => Self::ExtendedKeyUsage,
            "subjectAltNameExtDefaultImpl" => Self::SubjectAltName,
            "genericExtDefaultImpl" => Self::GenericExtension,
            "nsCertTypeExtDefaultImpl" => Self::NsCertType,
            "crlDistributionPointsExtDefaultImpl" => Self::CrlDistributionPoints,
            "userExtensionDefaultImpl" => Self::UserExtension,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical class id for this kind.
    #[must_use]
    pub fn class_id(&self) -> &str {
        match self {
            Self::SubjectName => "subjectNameDefaultImpl",
            Self::KeyUsage => "keyUsageExtDefaultImpl",
            Self::CaValidity => "caValidityDefaultImpl",
            Self::Validity => "validityDefaultImpl",
            Self::NoDefault => "noDefaultImpl",
            Self::Key => "userKeyDefaultImpl",
            Self::AuthorityKeyId => "authorityKeyIdentifierExtDefaultImpl",
            Self::BasicConstraints => "basicConstraintsExtDefaultImpl",
            Self::SubjectKeyId => "subjectKeyIdentifierExtDefaultImpl",
            Self::SigningAlg => "signingAlgDefaultImpl",
            Self::AuthInfoAccess => "authInfoAccessExtDefaultImpl",
            Self::ExtendedKeyUsage => "extendedKeyUsageExtDefaultImpl",
            Self::SubjectAltName => "subjectAltNameExtDefaultImpl",
            Self::GenericExtension => "genericExtDefaultImpl",
            Self::NsCertType => "nsCertTypeExtDefaultImpl",
            Self::CrlDistributionPoints => "crlDistributionPointsExtDefaultImpl",
            Self::UserExtension => "userExtensionDefaultImpl",
            Self::Other(class_id) => class_id,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_id())
    }
}

/// One policy: a default generator plus its constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyValue {
    /// Sequential id within the set.
    pub id: u32,
    /// Default generator.
    pub default: PolicyDefault,
    /// Constraint.
    pub constraint: Constraint,
}

impl PolicyValue {
    /// Kind of this policy, derived from the generator class.
    #[must_use]
    pub fn kind(&self) -> PolicyKind {
        PolicyKind::from_class_id(&self.default.class_id)
    }
}

/// Outcome of [`PolicySet::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A new value was appended with this id.
    Created(u32),
    /// The existing value with this id was updated in place.
    Updated(u32),
}

impl Upsert {
    /// Id of the affected value.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::Created(id) | Self::Updated(id) => id,
        }
    }
}

/// Named, ordered group of policies applied to one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySet {
    name: String,
    values: Vec<PolicyValue>,
    index: HashMap<PolicyKind, usize>,
}

impl PolicySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Builds a set from loaded values. On duplicate kinds the first value
    /// is the one found by lookups.
    #[must_use]
    pub fn from_values(name: impl Into<String>, values: Vec<PolicyValue>) -> Self {
        let mut index = HashMap::new();
        for (pos, value) in values.iter().enumerate() {
            index.entry(value.kind()).or_insert(pos);
        }
        Self {
            name: name.into(),
            values,
            index,
        }
    }

    /// Set name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values in document order.
    #[must_use]
    pub fn values(&self) -> &[PolicyValue] {
        &self.values
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether a policy of `kind` exists.
    #[must_use]
    pub fn contains(&self, kind: &PolicyKind) -> bool {
        self.index.contains_key(kind)
    }

    /// Looks up the policy of `kind`.
    #[must_use]
    pub fn get(&self, kind: &PolicyKind) -> Option<&PolicyValue> {
        self.index.get(kind).map(|&pos| &self.values[pos])
    }

    /// Looks up the policy of `kind` for mutation.
    pub fn get_mut(&mut self, kind: &PolicyKind) -> Option<&mut PolicyValue> {
        self.index.get(kind).map(|&pos| &mut self.values[pos])
    }

    /// Id the next appended value receives: max existing id + 1, or 1.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::IdSpaceExhausted`] when a loaded value already
    /// holds `u32::MAX`.
    pub fn next_id(&self) -> Result<u32> {
        match self.values.iter().map(|v| v.id).max() {
            None => Ok(1),
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| ProfileError::IdSpaceExhausted(self.name.clone())),
        }
    }

    /// Ensures exactly one policy of `kind` exists.
    ///
    /// Calls `create` to build a new value when absent, `update` on the
    /// existing value otherwise.
    ///
    /// # Errors
    ///
    /// Fails only when a new value is needed and no id is left for it.
    pub fn upsert<C, U>(&mut self, kind: PolicyKind, create: C, update: U) -> Result<Upsert>
    where
        C: FnOnce() -> (PolicyDefault, Constraint),
        U: FnOnce(&mut PolicyValue),
    {
        if let Some(&pos) = self.index.get(&kind) {
            let value = &mut self.values[pos];
            update(value);
            return Ok(Upsert::Updated(value.id));
        }

        let id = self.next_id()?;
        let (default, constraint) = create();
        self.values.push(PolicyValue {
            id,
            default,
            constraint,
        });
        self.index.insert(kind, self.values.len() - 1);
        Ok(Upsert::Created(id))
    }
}

/// Root of a profile document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Profile id.
    pub id: String,
    /// Enrollment class.
    pub class_id: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Whether the profile is enabled.
    pub enabled: bool,
    /// Whether the profile is listed to end users.
    pub visible: bool,
    /// Whether this is a renewal profile.
    pub renewal: bool,
    /// Whether the enrollment response is XML.
    pub xml_output: bool,
    /// Inputs in order.
    pub inputs: Vec<Input>,
    /// Outputs in order.
    pub outputs: Vec<Output>,
    /// Policy sets in order.
    pub policy_sets: Vec<PolicySet>,
    /// Children without a typed field, such as `enabledBy` or `authzAcl`.
    pub extra: Vec<ExtraElement>,
}

impl Profile {
    /// Creates an empty, disabled, visible enrollment profile.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class_id: "caEnrollImpl".to_string(),
            name: String::new(),
            description: String::new(),
            enabled: false,
            visible: true,
            renewal: false,
            xml_output: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            policy_sets: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Looks up a policy set by name.
    #[must_use]
    pub fn policy_set(&self, name: &str) -> Option<&PolicySet> {
        self.policy_sets.iter().find(|s| s.name() == name)
    }

    /// Looks up a policy set by name for mutation.
    pub fn policy_set_mut(&mut self, name: &str) -> Option<&mut PolicySet> {
        self.policy_sets.iter_mut().find(|s| s.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(class_id: &str) -> (PolicyDefault, Constraint) {
        (
            PolicyDefault::new("Test", class_id, "test"),
            Constraint::new("No Constraint", "No Constraint", "noConstraintImpl"),
        )
    }

    #[test]
    fn empty_set_starts_at_one() {
        let set = PolicySet::new("pkitest1");
        assert_eq!(set.next_id().expect("id"), 1);
    }

    #[test]
    fn next_id_follows_max_not_len() {
        let values = vec![3, 7, 5]
            .into_iter()
            .map(|id| {
                let (default, constraint) = policy(&format!("c{id}"));
                PolicyValue {
                    id,
                    default,
                    constraint,
                }
            })
            .collect();
        let set = PolicySet::from_values("s", values);
        assert_eq!(set.next_id().expect("id"), 8);
    }

    #[test]
    fn max_id_refuses_to_wrap() {
        let (default, constraint) = policy("validityDefaultImpl");
        let mut set = PolicySet::from_values(
            "pkitest1",
            vec![PolicyValue {
                id: u32::MAX,
                default,
                constraint,
            }],
        );
        assert!(matches!(
            set.next_id(),
            Err(ProfileError::IdSpaceExhausted(name)) if name == "pkitest1"
        ));

        let outcome = set.upsert(
            PolicyKind::KeyUsage,
            || policy("keyUsageExtDefaultImpl"),
            |_| unreachable!("should not update"),
        );
        assert!(matches!(outcome, Err(ProfileError::IdSpaceExhausted(_))));
        assert_eq!(set.len(), 1);

        let existing = set.upsert(
            PolicyKind::Validity,
            || unreachable!("should not create"),
            |v| v.default.set_param("range", "30"),
        );
        assert_eq!(existing.expect("update"), Upsert::Updated(u32::MAX));
    }

    #[test]
    fn upsert_creates_then_updates() {
        let mut set = PolicySet::new("s");
        let first = set.upsert(
            PolicyKind::KeyUsage,
            || policy("keyUsageExtDefaultImpl"),
            |_| unreachable!("should not update"),
        )
        .expect("create");
        assert_eq!(first, Upsert::Created(1));

        let second = set.upsert(
            PolicyKind::KeyUsage,
            || unreachable!("should not create"),
            |v| v.default.set_param("keyUsageCritical", "true"),
        )
        .expect("update");
        assert_eq!(second, Upsert::Updated(1));
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get(&PolicyKind::KeyUsage)
                .and_then(|v| v.default.param("keyUsageCritical")),
            Some("true")
        );
    }

    #[test]
    fn subject_name_classes_share_a_kind() {
        assert_eq!(
            PolicyKind::from_class_id("userSubjectNameDefaultImpl"),
            PolicyKind::from_class_id("subjectNameDefaultImpl")
        );
    }

    #[test]
    fn unknown_class_round_trips() {
        let kind = PolicyKind::from_class_id("fooDefaultImpl");
        assert_eq!(kind, PolicyKind::Other("fooDefaultImpl".into()));
        assert_eq!(kind.class_id(), "fooDefaultImpl");
    }

    #[test]
    fn from_values_keeps_first_duplicate() {
        let (d1, c1) = policy("validityDefaultImpl");
        let (mut d2, c2) = policy("validityDefaultImpl");
        d2.name = "second".into();
        let set = PolicySet::from_values(
            "s",
            vec![
                PolicyValue {
                    id: 1,
                    default: d1,
                    constraint: c1,
                },
                PolicyValue {
                    id: 2,
                    default: d2,
                    constraint: c2,
                },
            ],
        );
        assert_eq!(set.get(&PolicyKind::Validity).map(|v| v.id), Some(1));
    }

    #[test]
    fn set_param_replaces_in_place() {
        let mut def = PolicyDefault::new("d", "validityDefaultImpl", "")
            .with_param("range", "180")
            .with_param("rangeUnit", "day");
        def.set_param("range", "15");
        assert_eq!(def.params[0].name, "range");
        assert_eq!(def.param("range"), Some("15"));
        def.remove_param("range");
        assert_eq!(def.param("range"), None);
    }

    #[test]
    fn constraint_set_value_requires_existing_entry() {
        let mut c = Constraint::new("c", "", "validityConstraintImpl").with_value(
            "range",
            Descriptor::new("integer", "Validity Range"),
            "365",
        );
        assert!(c.set_value("range", "30"));
        assert!(!c.set_value("missing", "1"));
        assert_eq!(c.value("range"), Some("30"));
    }
}
