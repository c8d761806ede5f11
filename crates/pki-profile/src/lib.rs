//! Certificate profile documents for a certificate authority.
//!
//! This crate builds and edits the XML profile documents a CA uses to decide
//! what goes into an issued certificate: default generators, constraints
//! and their parameters, grouped into policy sets.
//!
//! # Overview
//!
//! - Build a profile for an archetype (`user`, `smime`, `server`, `other`,
//!   `dualcert`, `ca`) with caller overrides applied on top of its defaults
//! - Edit an existing profile sparsely: only the policies named by the
//!   overrides change
//! - Load and store the profile XML format
//!
//! Policy insertion is idempotent. A policy set holds at most one policy per
//! generator class, and adding one that exists updates it in place.
//!
//! # Example
//!
//! ```
//! use pki_profile::{Archetype, PolicyKind, ProfileOverrides, create_profile};
//!
//! let overrides = ProfileOverrides {
//!     valid_for: Some("15".into()),
//!     ..ProfileOverrides::default()
//! };
//! let profiles = create_profile("caExampleUser", Archetype::User, &overrides).unwrap();
//!
//! let set = &profiles[0].policy_sets[0];
//! let validity = set.get(&PolicyKind::Validity).unwrap();
//! assert_eq!(validity.default.param("range"), Some("15"));
//! ```
//!
//! # Modules
//!
//! - [`document`] - Typed profile tree and policy sets
//! - [`constraint`] - Constraint sub-trees
//! - [`policy`] - Policy defaults with create-or-update semantics
//! - [`params`] - Archetypes, overrides and resolved parameters
//! - [`assembler`] - Whole-profile construction and editing
//! - [`xml`] - XML load and store
//! - [`flags`] - Named bit lists
//! - [`error`] - Error types

#![forbid(unsafe_code)]

pub mod assembler;
pub mod constraint;
pub mod document;
pub mod error;
pub mod flags;
pub mod params;
pub mod policy;
pub mod xml;

pub use assembler::{
    apply_overrides, create_profile, create_profile_files, edit_profile, populate_policies,
    write_profiles,
};
pub use document::{
    Attribute, Constraint, ConstraintValue, Descriptor, Element, ExtraElement, Input, Output,
    Param, PolicyDefault, PolicyKind, PolicySet, PolicyValue, Profile, Upsert,
};
pub use error::{ProfileError, Result};
pub use flags::FlagSet;
pub use params::{
    Archetype, InputClass, ProfileOverrides, ProfileParameters, RangeUnit,
    generate_profile_parameters,
};
pub use policy::PolicyBuilder;
