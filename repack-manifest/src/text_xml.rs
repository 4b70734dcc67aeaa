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


use std::io::Write;

use crate::{document::*, internal_android_attributes::android_attribute_name};
use repack_common::*;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

/// Renders a decoded manifest as indented text XML, for inspection only.
pub fn render_text_xml(document: &BinaryDocument) -> Result<String> {
    let mut out = Vec::new();
    let mut writer = EmitterConfig::new()
        .perform_indent(true)
        .create_writer(&mut out);
    write_element(&mut writer, document, &document.root, true)?;
    drop(writer);
    String::from_utf8(out).map_err(|e| PackError::XmlWritingFailed(e.to_string()))
}

fn write_element<W: Write>(
    writer: &mut EventWriter<W>,
    document: &BinaryDocument,
    element: &Element,
    is_root: bool
) -> Result<()> {
    let attributes: Vec<(String, String)> = element
        .attributes
        .iter()
        .map(|attr| (qualified_name(document, attr), display_value(&attr.value)))
        .collect();

    let mut start = XmlEvent::start_element(element.name.as_str());
    if is_root {
        for ns in &document.namespaces {
            start = start.ns(ns.prefix.as_str(), ns.uri.as_str());
        }
    }
    for (name, value) in &attributes {
        start = start.attr(name.as_str(), value.as_str());
    }
    writer.write(start)?;

    for child in &element.children {
        write_element(writer, document, child, false)?;
    }
    writer.write(XmlEvent::end_element())?;
    Ok(())
}

fn qualified_name(document: &BinaryDocument, attr: &Attribute) -> String {
    let local = match attr.resource_id.and_then(android_attribute_name) {
        Some(name) if attr.name.is_empty() => name.to_string(),
        _ if attr.name.is_empty() => format!("attr_{:08x}", attr.resource_id.unwrap_or_default()),
        _ => attr.name.clone()
    };
    match attr.namespace.as_deref().and_then(|uri| document.prefix_for(uri)) {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local
    }
}

fn display_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::String(value) => value.clone(),
        AttributeValue::Decimal(value) => value.to_string(),
        AttributeValue::Hex(value) => format!("0x{value:08x}"),
        AttributeValue::Boolean(value) => value.to_string(),
        AttributeValue::Reference(id) => format!("@0x{id:08x}"),
        AttributeValue::Other { data_type, data } => format!("(0x{data_type:02x})0x{data:08x}")
    }
}
