// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! In-memory tree for a binary XML document.
//!
//! Attributes remember the resource ID they were compiled against, so a
//! lookup through [AttrKey] still succeeds when the name string has been
//! mangled.

use crate::internal_android_attributes::{android_attribute_id, ANDROID_NAMESPACE, ANDROID_PREFIX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String
}

impl Namespace {
    pub fn android() -> Namespace {
        Namespace {
            prefix: ANDROID_PREFIX.into(),
            uri: ANDROID_NAMESPACE.into()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryDocument {
    /// Declared around the root element, outermost first.
    pub namespaces: Vec<Namespace>,
    pub root: Element
}

impl BinaryDocument {
    pub fn new(root: Element) -> BinaryDocument {
        BinaryDocument {
            namespaces: vec![Namespace::android()],
            root
        }
    }

    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.namespaces
            .iter()
            .find(|ns| ns.uri == uri)
            .map(|ns| ns.prefix.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Decimal(i32),
    Hex(u32),
    Boolean(bool),
    Reference(u32),
    /// Any `Res_value` type this crate doesn't interpret (floats, colours,
    /// dimensions). Re-emitted untouched.
    Other { data_type: u8, data: u32 }
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(value) => Some(value),
            _ => None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub namespace: Option<String>,
    pub name: String,
    pub resource_id: Option<u32>,
    pub value: AttributeValue,
    /// The raw text an encoder stored next to a typed value, if any.
    pub raw_value: Option<String>
}

impl Attribute {
    pub fn new(key: AttrKey, value: AttributeValue) -> Attribute {
        Attribute {
            namespace: key.namespace.map(String::from),
            name: key.name.into(),
            resource_id: key.resource_id,
            value,
            raw_value: None
        }
    }

    fn matches(&self, key: &AttrKey) -> bool {
        if let (Some(ours), Some(wanted)) = (self.resource_id, key.resource_id) {
            return ours == wanted;
        }
        if self.name != key.name {
            return false;
        }
        match (&self.namespace, key.namespace) {
            (Some(ours), Some(wanted)) => ours == wanted,
            (None, None) => true,
            // Some hand-assembled manifests drop the android namespace
            (None, Some(wanted)) => wanted == ANDROID_NAMESPACE,
            (Some(_), None) => false
        }
    }
}

/// Identifies an attribute by namespace and name, and by framework resource
/// ID when one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrKey {
    pub namespace: Option<&'static str>,
    pub name: &'static str,
    pub resource_id: Option<u32>
}

impl AttrKey {
    pub fn android(name: &'static str) -> AttrKey {
        AttrKey {
            namespace: Some(ANDROID_NAMESPACE),
            name,
            resource_id: android_attribute_id(name)
        }
    }

    pub const fn plain(name: &'static str) -> AttrKey {
        AttrKey {
            namespace: None,
            name,
            resource_id: None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Element>
}

impl Element {
    pub fn new(name: &str) -> Element {
        Element {
            namespace: None,
            name: name.into(),
            attributes: vec![],
            children: vec![]
        }
    }

    pub fn attribute(&self, key: AttrKey) -> Option<&Attribute> {
        // Resource ID matches win over name matches
        self.attributes
            .iter()
            .find(|attr| key.resource_id.is_some() && attr.resource_id == key.resource_id)
            .or_else(|| self.attributes.iter().find(|attr| attr.matches(&key)))
    }

    fn attribute_position(&self, key: AttrKey) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attr| key.resource_id.is_some() && attr.resource_id == key.resource_id)
            .or_else(|| self.attributes.iter().position(|attr| attr.matches(&key)))
    }

    /// The attribute's text, whether it was stored as a string value or as
    /// the raw text of a typed one.
    pub fn string(&self, key: AttrKey) -> Option<&str> {
        let attr = self.attribute(key)?;
        attr.value.as_str().or(attr.raw_value.as_deref())
    }

    /// Replaces the value of an existing attribute, whatever type it was
    /// encoded with, or appends a new one.
    pub fn set(&mut self, key: AttrKey, value: AttributeValue) {
        match self.attribute_position(key) {
            Some(index) => {
                let attr = &mut self.attributes[index];
                attr.value = value;
                attr.raw_value = None;
                if attr.resource_id.is_none() {
                    attr.resource_id = key.resource_id;
                }
            }
            None => self.attributes.push(Attribute::new(key, value))
        }
    }

    pub fn set_string(&mut self, key: AttrKey, value: &str) {
        self.set(key, AttributeValue::String(value.into()));
    }

    pub fn set_boolean(&mut self, key: AttrKey, value: bool) {
        self.set(key, AttributeValue::Boolean(value));
    }

    /// Returns whether anything was removed.
    pub fn remove(&mut self, key: AttrKey) -> bool {
        match self.attribute_position(key) {
            Some(index) => {
                self.attributes.remove(index);
                true
            }
            None => false
        }
    }

    pub fn with(mut self, key: AttrKey, value: AttributeValue) -> Element {
        self.set(key, value);
        self
    }

    pub fn with_string(self, key: AttrKey, value: &str) -> Element {
        self.with(key, AttributeValue::String(value.into()))
    }

    pub fn with_child(mut self, child: Element) -> Element {
        self.children.push(child);
        self
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Visits this element and every descendant, parents before children.
    pub fn visit_mut(&mut self, visitor: &mut impl FnMut(&mut Element)) {
        visitor(self);
        for child in self.children.iter_mut() {
            child.visit_mut(visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_resource_id_over_name() {
        let mut element = Element::new("activity");
        // Obfuscated: name string scrambled, ID intact
        element.attributes.push(Attribute {
            namespace: Some(ANDROID_NAMESPACE.into()),
            name: "a0".into(),
            resource_id: Some(0x0101_0003),
            value: AttributeValue::String(".Main".into()),
            raw_value: None
        });
        assert_eq!(element.string(AttrKey::android("name")), Some(".Main"));
    }

    #[test]
    fn lookup_falls_back_to_name() {
        let element = Element::new("manifest").with_string(AttrKey::plain("package"), "com.example");
        assert_eq!(element.string(AttrKey::plain("package")), Some("com.example"));
        assert_eq!(element.string(AttrKey::android("name")), None);
    }

    #[test]
    fn set_replaces_whatever_type_was_there() {
        let mut element =
            Element::new("provider").with(AttrKey::android("exported"), AttributeValue::Decimal(0));
        element.set_boolean(AttrKey::android("exported"), true);
        assert_eq!(element.attributes.len(), 1);
        assert_eq!(element.attributes[0].value, AttributeValue::Boolean(true));
    }

    #[test]
    fn raw_text_is_used_for_typed_values() {
        let mut attr = Attribute::new(AttrKey::android("minSdkVersion"), AttributeValue::Reference(0x7f0b_0001));
        attr.raw_value = Some("21".into());
        let element = Element {
            attributes: vec![attr],
            ..Element::new("uses-sdk")
        };
        assert_eq!(element.string(AttrKey::android("minSdkVersion")), Some("21"));
    }

    #[test]
    fn remove_reports_absence() {
        let mut element =
            Element::new("service").with_string(AttrKey::android("permission"), "p");
        assert!(element.remove(AttrKey::android("permission")));
        assert!(!element.remove(AttrKey::android("permission")));
    }
}
