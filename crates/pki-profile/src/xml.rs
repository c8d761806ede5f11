//! Profile XML load and store.
//!
//! Parsing is two-pass: quick-xml events are folded into a generic
//! [`Element`] tree, which is then mapped onto the typed [`Profile`]. Writing
//! goes straight from the typed tree to events.
//!
//! Children the typed tree has no field for are carried as
//! [`ExtraElement`]s and written back after the sibling they followed, so a
//! load/store cycle does not drop server-side settings such as `enabledBy`.
//! Character data is kept as read; only whitespace between child elements
//! is discarded.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::debug;

use crate::document::{
    Attribute, Constraint, ConstraintValue, Descriptor, Element, ExtraElement, Input, Output,
    Param, PolicyDefault, PolicySet, PolicyValue, Profile,
};
use crate::error::{ProfileError, Result};

const PROFILE_CHILDREN: [&str; 10] = [
    "classId",
    "name",
    "description",
    "enabled",
    "visible",
    "renewal",
    "xmlOutput",
    "Input",
    "Output",
    "PolicySets",
];
const INPUT_CHILDREN: [&str; 3] = ["ClassID", "Name", "Attribute"];
const OUTPUT_CHILDREN: [&str; 3] = ["name", "classId", "attributes"];
const DEF_CHILDREN: [&str; 3] = ["description", "policyAttribute", "params"];
const CONSTRAINT_CHILDREN: [&str; 3] = ["description", "classId", "constraint"];

fn xml_err(e: impl std::fmt::Display) -> ProfileError {
    ProfileError::Xml(e.to_string())
}

fn malformed(message: impl Into<String>) -> ProfileError {
    ProfileError::Malformed(message.into())
}

/// Reads a profile document from `path`.
pub fn load(path: &Path) -> Result<Profile> {
    let text = fs::read_to_string(path)?;
    let profile = from_str(&text)?;
    debug!(path = %path.display(), profile = %profile.id, "loaded profile");
    Ok(profile)
}

/// Writes a profile document to `path`, replacing any existing file.
pub fn store(profile: &Profile, path: &Path) -> Result<()> {
    fs::write(path, to_string(profile)?)?;
    debug!(path = %path.display(), profile = %profile.id, "stored profile");
    Ok(())
}

/// Parses a profile document.
pub fn from_str(xml: &str) -> Result<Profile> {
    let root = parse_tree(xml)?;
    profile_from(&root)
}

/// Serializes a profile document, with XML declaration and four-space indent.
pub fn to_string(profile: &Profile) -> Result<String> {
    let mut out = XmlOut::new();
    out.decl()?;
    write_profile(&mut out, profile)?;
    String::from_utf8(out.finish()).map_err(xml_err)
}

// ---------------------------------------------------------------------------
// Generic element tree
// ---------------------------------------------------------------------------

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(xml_err)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(xml_err)?.into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name,
            attrs,
            ..Self::default()
        })
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn required_attr(&self, name: &str) -> Result<&str> {
        self.attr(name)
            .ok_or_else(|| malformed(format!("<{}> is missing attribute {name}", self.name)))
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    fn text_or_empty(&self, name: &str) -> String {
        self.child_text(name).unwrap_or_default().to_string()
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        self.child_text(name).map_or(default, |t| t.trim().eq_ignore_ascii_case("true"))
    }

    /// Children whose names are not in `modeled`, anchored to the sibling
    /// before them.
    fn extra(&self, modeled: &[&str]) -> Vec<ExtraElement> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut previous: Option<(String, usize)> = None;
        let mut extra = Vec::new();
        for child in &self.children {
            if !modeled.contains(&child.name.as_str()) {
                extra.push(ExtraElement {
                    after: previous.clone(),
                    element: child.clone(),
                });
            }
            let count = seen.entry(child.name.as_str()).or_default();
            previous = Some((child.name.clone(), *count));
            *count += 1;
        }
        extra
    }
}

fn parse_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    let mut attach = |stack: &mut Vec<Element>, element: Element| -> Result<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_none() => root = Some(element),
            None => return Err(malformed("more than one root element")),
        }
        Ok(())
    };

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(start) => stack.push(Element::open(&start)?),
            Event::Empty(start) => {
                let element = Element::open(&start)?;
                attach(&mut stack, element)?;
            }
            Event::End(_) => {
                let mut element = stack.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                if !element.children.is_empty() && element.text.trim().is_empty() {
                    element.text.clear();
                }
                attach(&mut stack, element)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().map_err(xml_err)?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unexpected end of document"));
    }
    root.ok_or_else(|| malformed("document has no root element"))
}

// ---------------------------------------------------------------------------
// Element tree -> Profile
// ---------------------------------------------------------------------------

fn descriptor_from(element: Option<&Element>) -> Descriptor {
    let Some(element) = element else {
        return Descriptor::default();
    };
    Descriptor {
        syntax: element.text_or_empty("Syntax"),
        constraint: element.child_text("Constraint").map(str::to_string),
        description: element.text_or_empty("Description"),
        default_value: element.child_text("DefaultValue").map(str::to_string),
    }
}

fn attribute_from(element: &Element) -> Result<Attribute> {
    Ok(Attribute {
        name: element.required_attr("name")?.to_string(),
        value: element.child_text("Value").map(str::to_string),
        descriptor: descriptor_from(element.child("Descriptor")),
    })
}

fn input_from(element: &Element) -> Result<Input> {
    Ok(Input {
        id: element.required_attr("id")?.to_string(),
        class_id: element.text_or_empty("ClassID"),
        name: element.text_or_empty("Name"),
        attributes: element
            .children_named("Attribute")
            .map(attribute_from)
            .collect::<Result<_>>()?,
        extra: element.extra(&INPUT_CHILDREN),
    })
}

fn output_from(element: &Element) -> Result<Output> {
    Ok(Output {
        id: element.required_attr("id")?.to_string(),
        name: element.text_or_empty("name"),
        class_id: element.text_or_empty("classId"),
        attributes: element
            .children_named("attributes")
            .map(attribute_from)
            .collect::<Result<_>>()?,
        extra: element.extra(&OUTPUT_CHILDREN),
    })
}

fn default_from(element: &Element) -> Result<PolicyDefault> {
    let params = element
        .children_named("params")
        .map(|p| {
            Ok(Param {
                name: p.required_attr("name")?.to_string(),
                value: p.text_or_empty("value"),
            })
        })
        .collect::<Result<_>>()?;
    Ok(PolicyDefault {
        name: element.attr("id").unwrap_or_default().to_string(),
        class_id: element.required_attr("classId")?.to_string(),
        description: element.text_or_empty("description"),
        attributes: element
            .children_named("policyAttribute")
            .map(attribute_from)
            .collect::<Result<_>>()?,
        params,
        extra: element.extra(&DEF_CHILDREN),
    })
}

fn constraint_from(element: &Element) -> Result<Constraint> {
    let values = element
        .children_named("constraint")
        .map(|c| {
            Ok(ConstraintValue {
                id: c.required_attr("id")?.to_string(),
                descriptor: descriptor_from(c.child("descriptor")),
                value: c.child_text("value").map(str::to_string),
            })
        })
        .collect::<Result<_>>()?;
    Ok(Constraint {
        name: element.attr("id").unwrap_or_default().to_string(),
        description: element.text_or_empty("description"),
        class_id: element.text_or_empty("classId"),
        values,
        extra: element.extra(&CONSTRAINT_CHILDREN),
    })
}

fn policy_value_from(element: &Element) -> Result<PolicyValue> {
    let raw_id = element.required_attr("id")?;
    let id = raw_id
        .trim()
        .parse()
        .map_err(|_| malformed(format!("policy value id is not an integer: {raw_id}")))?;
    let default = element
        .child("def")
        .ok_or_else(|| malformed(format!("policy value {id} has no <def>")))?;
    let constraint = element
        .child("constraint")
        .ok_or_else(|| malformed(format!("policy value {id} has no <constraint>")))?;
    Ok(PolicyValue {
        id,
        default: default_from(default)?,
        constraint: constraint_from(constraint)?,
    })
}

fn policy_set_from(element: &Element) -> Result<PolicySet> {
    let name = element
        .child_text("id")
        .map(str::trim)
        .ok_or_else(|| malformed("<PolicySet> has no <id>"))?;
    let values = element
        .children_named("value")
        .map(policy_value_from)
        .collect::<Result<Vec<_>>>()?;
    Ok(PolicySet::from_values(name, values))
}

fn profile_from(root: &Element) -> Result<Profile> {
    if root.name != "Profile" {
        return Err(malformed(format!("root element is <{}>, expected <Profile>", root.name)));
    }
    let mut profile = Profile::new(root.required_attr("id")?);
    if let Some(class_id) = root.child_text("classId") {
        profile.class_id = class_id.to_string();
    }
    profile.name = root.text_or_empty("name");
    profile.description = root.text_or_empty("description");
    profile.enabled = root.flag("enabled", false);
    profile.visible = root.flag("visible", true);
    profile.renewal = root.flag("renewal", false);
    profile.xml_output = root.flag("xmlOutput", false);
    profile.inputs = root.children_named("Input").map(input_from).collect::<Result<_>>()?;
    profile.outputs = root.children_named("Output").map(output_from).collect::<Result<_>>()?;
    if let Some(sets) = root.child("PolicySets") {
        profile.policy_sets = sets
            .children_named("PolicySet")
            .map(policy_set_from)
            .collect::<Result<_>>()?;
    }
    profile.extra = root.extra(&PROFILE_CHILDREN);
    Ok(profile)
}

// ---------------------------------------------------------------------------
// Profile -> XML
// ---------------------------------------------------------------------------

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 4),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer.write_event(event).map_err(xml_err)
    }

    fn decl(&mut self) -> Result<()> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut start = BytesStart::new(name);
        for &attr in attrs {
            start.push_attribute(attr);
        }
        self.event(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn leaf(&mut self, name: &str, text: &str) -> Result<()> {
        if text.is_empty() {
            return self.event(Event::Empty(BytesStart::new(name)));
        }
        self.open(name, &[])?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    fn leaf_opt(&mut self, name: &str, text: Option<&str>) -> Result<()> {
        match text {
            Some(text) => self.leaf(name, text),
            None => Ok(()),
        }
    }

    fn flag(&mut self, name: &str, value: bool) -> Result<()> {
        self.leaf(name, if value { "true" } else { "false" })
    }

    fn element(&mut self, element: &Element) -> Result<()> {
        let attrs: Vec<(&str, &str)> = element
            .attrs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if element.children.is_empty() && element.text.is_empty() {
            let mut start = BytesStart::new(element.name.as_str());
            for &attr in &attrs {
                start.push_attribute(attr);
            }
            return self.event(Event::Empty(start));
        }
        self.open(&element.name, &attrs)?;
        if !element.text.is_empty() {
            self.event(Event::Text(BytesText::new(&element.text)))?;
        }
        for child in &element.children {
            self.element(child)?;
        }
        self.close(&element.name)
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

/// Interleaves [`ExtraElement`]s with the typed children of one element.
///
/// Call [`Splice::after`] once per child written; extras anchored to that
/// child follow it, and anything left unplaced goes out in [`Splice::finish`].
struct Splice<'a> {
    extra: &'a [ExtraElement],
    placed: Vec<bool>,
    seen: HashMap<String, usize>,
}

impl<'a> Splice<'a> {
    fn start(out: &mut XmlOut, extra: &'a [ExtraElement]) -> Result<Self> {
        let mut splice = Self {
            extra,
            placed: vec![false; extra.len()],
            seen: HashMap::new(),
        };
        splice.place(out, None)?;
        Ok(splice)
    }

    fn after(&mut self, out: &mut XmlOut, name: &str) -> Result<()> {
        let count = self.seen.entry(name.to_string()).or_default();
        let occurrence = *count;
        *count += 1;
        self.place(out, Some((name, occurrence)))
    }

    fn place(&mut self, out: &mut XmlOut, anchor: Option<(&str, usize)>) -> Result<()> {
        let extra = self.extra;
        for (pos, item) in extra.iter().enumerate() {
            let matches = match (&item.after, anchor) {
                (None, None) => true,
                (Some((name, n)), Some((anchor_name, m))) => name == anchor_name && *n == m,
                _ => false,
            };
            if matches && !self.placed[pos] {
                self.placed[pos] = true;
                out.element(&item.element)?;
                self.after(out, &item.element.name)?;
            }
        }
        Ok(())
    }

    fn finish(mut self, out: &mut XmlOut) -> Result<()> {
        let extra = self.extra;
        for (pos, item) in extra.iter().enumerate() {
            if !self.placed[pos] {
                self.placed[pos] = true;
                out.element(&item.element)?;
                self.after(out, &item.element.name)?;
            }
        }
        Ok(())
    }
}

fn write_descriptor(out: &mut XmlOut, element: &str, d: &Descriptor) -> Result<()> {
    out.open(element, &[])?;
    out.leaf("Syntax", &d.syntax)?;
    out.leaf_opt("Constraint", d.constraint.as_deref())?;
    out.leaf("Description", &d.description)?;
    out.leaf_opt("DefaultValue", d.default_value.as_deref())?;
    out.close(element)
}

fn write_attribute(out: &mut XmlOut, element: &str, attr: &Attribute) -> Result<()> {
    out.open(element, &[("name", attr.name.as_str())])?;
    out.leaf_opt("Value", attr.value.as_deref())?;
    write_descriptor(out, "Descriptor", &attr.descriptor)?;
    out.close(element)
}

fn write_default(out: &mut XmlOut, def: &PolicyDefault) -> Result<()> {
    out.open("def", &[("id", def.name.as_str()), ("classId", def.class_id.as_str())])?;
    let mut splice = Splice::start(out, &def.extra)?;
    out.leaf("description", &def.description)?;
    splice.after(out, "description")?;
    for attr in &def.attributes {
        write_attribute(out, "policyAttribute", attr)?;
        splice.after(out, "policyAttribute")?;
    }
    for param in &def.params {
        out.open("params", &[("name", param.name.as_str())])?;
        out.leaf("value", &param.value)?;
        out.close("params")?;
        splice.after(out, "params")?;
    }
    splice.finish(out)?;
    out.close("def")
}

fn write_constraint(out: &mut XmlOut, constraint: &Constraint) -> Result<()> {
    out.open("constraint", &[("id", constraint.name.as_str())])?;
    let mut splice = Splice::start(out, &constraint.extra)?;
    out.leaf("description", &constraint.description)?;
    splice.after(out, "description")?;
    out.leaf("classId", &constraint.class_id)?;
    splice.after(out, "classId")?;
    for entry in &constraint.values {
        out.open("constraint", &[("id", entry.id.as_str())])?;
        write_descriptor(out, "descriptor", &entry.descriptor)?;
        out.leaf_opt("value", entry.value.as_deref())?;
        out.close("constraint")?;
        splice.after(out, "constraint")?;
    }
    splice.finish(out)?;
    out.close("constraint")
}

fn write_policy_value(out: &mut XmlOut, value: &PolicyValue) -> Result<()> {
    let id = value.id.to_string();
    out.open("value", &[("id", id.as_str())])?;
    write_default(out, &value.default)?;
    write_constraint(out, &value.constraint)?;
    out.close("value")
}

fn write_input(out: &mut XmlOut, input: &Input) -> Result<()> {
    out.open("Input", &[("id", input.id.as_str())])?;
    let mut splice = Splice::start(out, &input.extra)?;
    out.leaf("ClassID", &input.class_id)?;
    splice.after(out, "ClassID")?;
    out.leaf("Name", &input.name)?;
    splice.after(out, "Name")?;
    for attr in &input.attributes {
        write_attribute(out, "Attribute", attr)?;
        splice.after(out, "Attribute")?;
    }
    splice.finish(out)?;
    out.close("Input")
}

fn write_output(out: &mut XmlOut, output: &Output) -> Result<()> {
    out.open("Output", &[("id", output.id.as_str())])?;
    let mut splice = Splice::start(out, &output.extra)?;
    out.leaf("name", &output.name)?;
    splice.after(out, "name")?;
    out.leaf("classId", &output.class_id)?;
    splice.after(out, "classId")?;
    for attr in &output.attributes {
        write_attribute(out, "attributes", attr)?;
        splice.after(out, "attributes")?;
    }
    splice.finish(out)?;
    out.close("Output")
}

fn write_profile(out: &mut XmlOut, profile: &Profile) -> Result<()> {
    out.open("Profile", &[("id", profile.id.as_str())])?;
    let mut splice = Splice::start(out, &profile.extra)?;
    for (name, text) in [
        ("classId", profile.class_id.as_str()),
        ("name", profile.name.as_str()),
        ("description", profile.description.as_str()),
    ] {
        out.leaf(name, text)?;
        splice.after(out, name)?;
    }
    for (name, value) in [
        ("enabled", profile.enabled),
        ("visible", profile.visible),
        ("renewal", profile.renewal),
        ("xmlOutput", profile.xml_output),
    ] {
        out.flag(name, value)?;
        splice.after(out, name)?;
    }

    for input in &profile.inputs {
        write_input(out, input)?;
        splice.after(out, "Input")?;
    }
    for output in &profile.outputs {
        write_output(out, output)?;
        splice.after(out, "Output")?;
    }

    out.open("PolicySets", &[])?;
    for set in &profile.policy_sets {
        out.open("PolicySet", &[])?;
        out.leaf("id", set.name())?;
        for value in set.values() {
            write_policy_value(out, value)?;
        }
        out.close("PolicySet")?;
    }
    out.close("PolicySets")?;
    splice.after(out, "PolicySets")?;

    splice.finish(out)?;
    out.close("Profile")
}
