//! Whole-profile construction and sparse editing.
//!
//! [`create_profile`] resolves parameters for an archetype, builds the document
//! skeleton and populates one policy set in a fixed order. The dual-certificate
//! archetype yields a second document carrying the signing set.
//! [`edit_profile`] applies only the policies whose override keys are present.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::document::{Attribute, Descriptor, Input, Output, PolicyKind, PolicySet, Profile};
use crate::error::{ProfileError, Result};
use crate::flags::FlagSet;
use crate::params::{
    Archetype, InputClass, ProfileOverrides, ProfileParameters, generate_profile_parameters,
};
use crate::policy::PolicyBuilder;
use crate::xml;

const SUBJECT_NAME_FIELDS: [(&str, &str); 9] = [
    ("sn_uid", "UID"),
    ("sn_e", "Email"),
    ("sn_cn", "Common Name"),
    ("sn_ou3", "Organizational Unit 3"),
    ("sn_ou2", "Organizational Unit 2"),
    ("sn_ou1", "Organizational Unit 1"),
    ("sn_ou", "Organizational Unit"),
    ("sn_o", "Organization"),
    ("sn_c", "Country"),
];

const SUBMITTER_FIELDS: [(&str, &str); 3] = [
    ("requestor_name", "Requestor Name"),
    ("requestor_email", "Requestor Email"),
    ("requestor_phone", "Requestor Phone"),
];

fn string_attribute(name: &str, description: &str) -> Attribute {
    Attribute::new(name, Descriptor::new("string", description))
}

fn key_input(id: String, class: InputClass) -> Input {
    let (type_syntax, request_syntax, type_desc, request_desc) = match class {
        InputClass::CertRequest => (
            "cert_request_type",
            "cert_request",
            "Certificate Request Type",
            "Certificate Request",
        ),
        InputClass::KeyGen | InputClass::DualKeyGen => (
            "keygen_request_type",
            "keygen_request",
            "Key Generation Request Type",
            "Key Generation Request",
        ),
    };
    Input {
        id,
        class_id: class.class_id().to_string(),
        name: class.display_name().to_string(),
        attributes: vec![
            Attribute::new("cert_request_type", Descriptor::new(type_syntax, type_desc)),
            Attribute::new("cert_request", Descriptor::new(request_syntax, request_desc)),
        ],
        extra: Vec::new(),
    }
}

fn field_input(id: String, class_id: &str, name: &str, fields: &[(&str, &str)]) -> Input {
    Input {
        id,
        class_id: class_id.to_string(),
        name: name.to_string(),
        attributes: fields
            .iter()
            .map(|(field, description)| string_attribute(field, description))
            .collect(),
        extra: Vec::new(),
    }
}

fn inputs(params: &ProfileParameters) -> Vec<Input> {
    let mut inputs = vec![key_input("i1".to_string(), params.input_class)];
    if params.subject_name_input {
        inputs.push(field_input(
            format!("i{}", inputs.len() + 1),
            "subjectNameInputImpl",
            "Subject Name",
            &SUBJECT_NAME_FIELDS,
        ));
    }
    inputs.push(field_input(
        format!("i{}", inputs.len() + 1),
        "submitterInfoInputImpl",
        "Requestor Information",
        &SUBMITTER_FIELDS,
    ));
    inputs
}

fn cert_output() -> Output {
    Output {
        id: "o1".to_string(),
        name: "Certificate Output".to_string(),
        class_id: "certOutputImpl".to_string(),
        attributes: vec![
            Attribute::new(
                "pretty_cert",
                Descriptor::new("pretty_print", "Certificate Pretty Print"),
            ),
            Attribute::new(
                "b64_cert",
                Descriptor::new("pretty_print", "Certificate Base-64 Encoded"),
            ),
        ],
        extra: Vec::new(),
    }
}

/// Populates `set` with every policy `params` calls for, in creation order.
///
/// # Errors
///
/// Fails when `set` has no value id left for a new policy.
pub fn populate_policies(set: &mut PolicySet, params: &ProfileParameters) -> Result<()> {
    let mut builder = PolicyBuilder::new(set);
    let ca = params.archetype == Archetype::Ca;

    builder.subject_name(&params.subject_pattern, params.subject_default.as_deref())?;

    if !(ca && params.path_length.is_some()) {
        builder.renewal_grace(params.not_before, params.not_after)?;
        builder.validity(params.valid_for, params.range_unit, params.max_validity)?;
        builder.extended_key_usage(&params.ext_key_usage)?;
        if let Some(oid) = &params.ext_oid {
            builder.user_extension(oid, &params.subject_pattern)?;
        }
        builder.subject_alt_name(&params.alt_type, &params.alt_pattern)?;
    }

    builder.key()?;
    builder.authority_key_id()?;
    builder.auth_info_access()?;
    builder.key_usage(&params.key_usage)?;
    builder.signing_alg()?;

    if params.generic_extension {
        builder.generic_extension()?;
    }
    if let Some(netscape) = &params.netscape {
        builder.ns_cert_type(netscape)?;
    }
    if let Some(url) = &params.crl_url {
        builder.crl_distribution_point(url)?;
    }

    if ca {
        builder.basic_constraints(params.path_length.unwrap_or(-1), params.is_ca)?;
        builder.ca_validity()?;
        builder.subject_key_id()?;
    }
    Ok(())
}

fn build_document(profile_id: &str, params: &ProfileParameters) -> Result<Profile> {
    let mut profile = Profile::new(profile_id);
    profile.name.clone_from(&params.profile_name);
    profile.description.clone_from(&params.description);
    profile.inputs = inputs(params);
    profile.outputs = vec![cert_output()];

    let mut set = PolicySet::new(params.policy_set.as_str());
    populate_policies(&mut set, params)?;
    profile.policy_sets.push(set);
    Ok(profile)
}

/// Builds the profile documents for `archetype`: one, or two for
/// [`Archetype::DualCert`] (encryption set first, signing set second).
pub fn create_profile(
    profile_id: &str,
    archetype: Archetype,
    overrides: &ProfileOverrides,
) -> Result<Vec<Profile>> {
    let params = generate_profile_parameters(archetype, overrides)?;
    let mut documents = vec![build_document(profile_id, &params)?];
    if archetype == Archetype::DualCert {
        documents.push(build_document(profile_id, &params.signing_counterpart())?);
    }
    info!(
        profile = profile_id,
        %archetype,
        documents = documents.len(),
        "built profile"
    );
    Ok(documents)
}

fn file_stem(profile: &Profile, many: bool) -> String {
    match (many, profile.policy_sets.first()) {
        (true, Some(set)) => format!("{}_{}", profile.id, set.name()),
        _ => profile.id.clone(),
    }
}

/// Writes `profiles` as XML files and returns their paths.
///
/// With a directory each document lands at `<dir>/<id>.xml` (or
/// `<id>_<set>.xml` when there are several); otherwise each goes to a
/// persisted temporary file the caller owns.
pub fn write_profiles(profiles: &[Profile], dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let many = profiles.len() > 1;
    let mut paths = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let stem = file_stem(profile, many);
        let path = match dir {
            Some(dir) => dir.join(format!("{stem}.xml")),
            None => {
                let file = tempfile::Builder::new()
                    .prefix(&format!("{stem}-"))
                    .suffix(".xml")
                    .tempfile()?;
                let (_, path) = file.keep().map_err(|e| ProfileError::Io(e.error))?;
                path
            }
        };
        xml::store(profile, &path)?;
        paths.push(path);
    }
    Ok(paths)
}

/// [`create_profile`] followed by [`write_profiles`].
pub fn create_profile_files(
    profile_id: &str,
    archetype: Archetype,
    overrides: &ProfileOverrides,
    dir: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let profiles = create_profile(profile_id, archetype, overrides)?;
    write_profiles(&profiles, dir)
}

/// Applies the policies named by `overrides` to an in-memory document.
///
/// Fields that an override needs but does not name itself (for example the
/// unit when only `ValidFor` is given) come from `archetype`'s defaults.
pub fn apply_overrides(
    profile: &mut Profile,
    archetype: Archetype,
    overrides: &ProfileOverrides,
) -> Result<()> {
    let params = generate_profile_parameters(archetype, overrides)?;
    let o = overrides;

    if let Some(name) = &o.profile_name {
        profile.name.clone_from(name);
    }
    if let Some(description) = &o.description {
        profile.description.clone_from(description);
    }

    let set = profile
        .policy_sets
        .first_mut()
        .ok_or(ProfileError::NoPolicySet)?;

    let existing_pattern = set
        .get(&PolicyKind::SubjectName)
        .and_then(|v| v.constraint.value("pattern"))
        .map(str::to_string);

    let mut builder = PolicyBuilder::new(set);

    match (&o.subject_pattern, &o.subject_default) {
        (Some(pattern), None) => {
            builder.subject_name(pattern, None)?;
        }
        (None, Some(default)) => {
            let pattern = existing_pattern.unwrap_or_else(|| params.subject_pattern.clone());
            builder.subject_name(&pattern, Some(default))?;
        }
        (Some(pattern), Some(default)) => {
            builder.subject_name(pattern, Some(default))?;
        }
        (None, None) => {}
    }

    if o.key_list.is_some() {
        builder.key_usage(&params.key_usage)?;
    }
    if o.not_before.is_some() || o.not_after.is_some() {
        builder.renewal_grace(params.not_before, params.not_after)?;
    }
    if o.valid_for.is_some() || o.range_unit.is_some() || o.max_validity.is_some() {
        builder.validity(params.valid_for, params.range_unit, params.max_validity)?;
    }
    if let Some(list) = &o.netscape_extensions {
        builder.ns_cert_type(&FlagSet::ns_cert_type(list))?;
    }
    if let Some(url) = &o.crl_url {
        builder.crl_distribution_point(url)?;
    }
    if o.alt_type.is_some() || o.alt_pattern.is_some() {
        builder.subject_alt_name(&params.alt_type, &params.alt_pattern)?;
    }
    if let Some(oid) = &o.ext_oid {
        builder.user_extension(oid, &params.subject_pattern)?;
    }
    if o.path_length.is_some() || o.is_ca.is_some() {
        if archetype == Archetype::Ca {
            builder.basic_constraints(params.path_length.unwrap_or(-1), params.is_ca)?;
        } else {
            warn!(%archetype, "PathLength and isCA only apply to CA profiles; ignoring");
        }
    }
    if o.generic_extensions.is_some() && params.generic_extension {
        builder.generic_extension()?;
    }
    Ok(())
}

/// Loads the profile at `path`, applies `overrides` to its policy set and
/// stores it back in place.
pub fn edit_profile(
    path: &Path,
    archetype: Archetype,
    overrides: &ProfileOverrides,
) -> Result<Profile> {
    let mut profile = xml::load(path)?;
    apply_overrides(&mut profile, archetype, overrides)?;
    xml::store(&profile, path)?;
    info!(path = %path.display(), profile = %profile.id, "edited profile");
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(profile: &Profile) -> Vec<PolicyKind> {
        profile.policy_sets[0].values().iter().map(|v| v.kind()).collect()
    }

    #[test]
    fn user_skeleton_has_subject_and_submitter_inputs() {
        let profiles =
            create_profile("caTest", Archetype::User, &ProfileOverrides::default()).expect("build");
        let inputs: Vec<_> = profiles[0].inputs.iter().map(|i| i.class_id.as_str()).collect();
        assert_eq!(
            inputs,
            ["keyGenInputImpl", "subjectNameInputImpl", "submitterInfoInputImpl"]
        );
        assert_eq!(profiles[0].inputs[2].id, "i3");
        assert_eq!(profiles[0].outputs[0].attributes.len(), 2);
    }

    #[test]
    fn server_skeleton_has_submitter_only() {
        let profiles = create_profile("caServer", Archetype::Server, &ProfileOverrides::default())
            .expect("build");
        let inputs: Vec<_> = profiles[0].inputs.iter().map(|i| i.class_id.as_str()).collect();
        assert_eq!(inputs, ["certReqInputImpl", "submitterInfoInputImpl"]);
        assert_eq!(profiles[0].inputs[1].id, "i2");
    }

    #[test]
    fn user_policy_order() {
        let profiles =
            create_profile("caTest", Archetype::User, &ProfileOverrides::default()).expect("build");
        assert_eq!(
            kinds(&profiles[0]),
            [
                PolicyKind::SubjectName,
                PolicyKind::NoDefault,
                PolicyKind::Validity,
                PolicyKind::ExtendedKeyUsage,
                PolicyKind::SubjectAltName,
                PolicyKind::Key,
                PolicyKind::AuthorityKeyId,
                PolicyKind::AuthInfoAccess,
                PolicyKind::KeyUsage,
                PolicyKind::SigningAlg,
            ]
        );
    }

    #[test]
    fn edit_without_policy_set_fails() {
        let mut profile = Profile::new("empty");
        let err = apply_overrides(&mut profile, Archetype::User, &ProfileOverrides::default())
            .expect_err("no set");
        assert!(matches!(err, ProfileError::NoPolicySet));
    }

    #[test]
    fn edit_default_only_keeps_existing_pattern() {
        let overrides = ProfileOverrides {
            subject_pattern: Some("CN=.*\\.example\\.com".into()),
            ..ProfileOverrides::default()
        };
        let mut profile = create_profile("caTest", Archetype::Server, &overrides)
            .expect("build")
            .remove(0);

        let edit = ProfileOverrides {
            subject_default: Some("CN=www.example.com".into()),
            ..ProfileOverrides::default()
        };
        apply_overrides(&mut profile, Archetype::Server, &edit).expect("edit");
        let subject = profile.policy_sets[0]
            .get(&PolicyKind::SubjectName)
            .expect("subject");
        assert_eq!(subject.default.class_id, "subjectNameDefaultImpl");
        assert_eq!(subject.default.param("name"), Some("CN=www.example.com"));
        assert_eq!(subject.constraint.value("pattern"), Some("CN=.*\\.example\\.com"));
    }

    #[test]
    fn edit_ignores_path_length_outside_ca() {
        let mut profile = create_profile("caTest", Archetype::User, &ProfileOverrides::default())
            .expect("build")
            .remove(0);
        let before = profile.clone();
        let edit = ProfileOverrides {
            path_length: Some("3".into()),
            ..ProfileOverrides::default()
        };
        apply_overrides(&mut profile, Archetype::User, &edit).expect("edit");
        assert_eq!(profile, before);
    }

    #[test]
    fn write_profiles_names_dual_documents_by_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = create_profile_files(
            "caDual",
            Archetype::DualCert,
            &ProfileOverrides::default(),
            Some(dir.path()),
        )
        .expect("write");
        assert_eq!(
            paths,
            [
                dir.path().join("caDual_encryptionCertSet.xml"),
                dir.path().join("caDual_signingCertSet.xml"),
            ]
        );
    }

    #[test]
    fn write_profiles_without_dir_persists_tempfile() {
        let paths =
            create_profile_files("caTemp", Archetype::Server, &ProfileOverrides::default(), None)
                .expect("write");
        assert_eq!(paths.len(), 1);
        assert!(paths[0].exists());
        let loaded = xml::load(&paths[0]).expect("load");
        assert_eq!(loaded.id, "caTemp");
        std::fs::remove_file(&paths[0]).expect("cleanup");
    }
}
