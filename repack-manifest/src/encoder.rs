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


use std::collections::HashMap;

use crate::{
    document::*,
    generate_res_chunk,
    internal_android_attributes::{ANDROID_NAMESPACE, ANDROID_PREFIX},
    resource_external_types::*,
    string_pool::construct_string_pool
};
use deku::DekuContainerWrite;
use repack_common::*;

fn generate_xml_chunk<T: DekuContainerWrite>(chunk_type: ChunkType, chunk: T) -> Result<Vec<u8>> {
    let chunk_bytes = chunk.to_bytes()?;
    let node_header = XmlNodeChunk {
        line_number: 1,
        comment: UINT32_MINUS_ONE,
        node_data: chunk_bytes
    };
    Ok(generate_res_chunk(chunk_type, node_header, 8, 0)?.to_bytes()?)
}

fn generate_namespace_chunk(start: bool, prefix: u32, uri: u32) -> Result<Vec<u8>> {
    generate_xml_chunk(
        if start {
            ChunkType::XmlStartNamespace
        } else {
            ChunkType::XmlEndNamespace
        },
        XmlNamespaceChunk { prefix, uri }
    )
}

/// String pool under construction. Attribute names compiled against a
/// resource ID occupy the first slots, one per ID, so the resource map can
/// index them directly.
#[derive(Default)]
struct StringTable {
    strings: Vec<String>,
    resource_ids: Vec<u32>,
    by_resource: HashMap<u32, u32>,
    interned: HashMap<String, u32>
}

impl StringTable {
    fn reserve_resource_names(&mut self, element: &Element) {
        for attr in &element.attributes {
            if let Some(id) = attr.resource_id {
                if !self.by_resource.contains_key(&id) {
                    self.by_resource.insert(id, self.strings.len() as u32);
                    self.strings.push(attr.name.clone());
                    self.resource_ids.push(id);
                }
            }
        }
        for child in &element.children {
            self.reserve_resource_names(child);
        }
    }

    fn intern(&mut self, value: &str) -> u32 {
        if let Some(id) = self.interned.get(value) {
            return *id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.interned.insert(value.to_string(), id);
        id
    }

    fn intern_optional(&mut self, value: Option<&str>) -> u32 {
        value.map_or(UINT32_MINUS_ONE, |value| self.intern(value))
    }

    fn attribute_name(&mut self, attr: &Attribute) -> u32 {
        match attr.resource_id.and_then(|id| self.by_resource.get(&id)) {
            Some(index) => *index,
            None => self.intern(&attr.name)
        }
    }
}

/// Every namespace the tree uses, declared or not. Trees assembled in code
/// often forget the android declaration.
fn namespaces_in_use(document: &BinaryDocument) -> Vec<Namespace> {
    let mut namespaces = document.namespaces.clone();
    let mut used = vec![];
    collect_namespace_uris(&document.root, &mut used);
    for uri in used {
        if namespaces.iter().any(|ns| ns.uri == uri) {
            continue;
        }
        let prefix = if uri == ANDROID_NAMESPACE {
            ANDROID_PREFIX.to_string()
        } else {
            format!("ns{}", namespaces.len())
        };
        namespaces.push(Namespace { prefix, uri });
    }
    namespaces
}

fn collect_namespace_uris(element: &Element, out: &mut Vec<String>) {
    let uris = element
        .namespace
        .iter()
        .chain(element.attributes.iter().filter_map(|attr| attr.namespace.as_ref()));
    for uri in uris {
        if !out.contains(uri) {
            out.push(uri.clone());
        }
    }
    for child in &element.children {
        collect_namespace_uris(child, out);
    }
}

/// Serialises a [BinaryDocument] back into compiled XML.
pub fn encode_document(document: &BinaryDocument) -> Result<Vec<u8>> {
    let mut strings = StringTable::default();
    strings.reserve_resource_names(&document.root);

    let namespaces = namespaces_in_use(document);
    let mut namespace_ids = vec![];
    let mut chunks: Vec<u8> = vec![];
    for ns in &namespaces {
        let prefix_id = strings.intern(&ns.prefix);
        let uri_id = strings.intern(&ns.uri);
        chunks.extend(generate_namespace_chunk(true, prefix_id, uri_id)?);
        namespace_ids.push((prefix_id, uri_id));
    }
    encode_element(&document.root, &mut strings, &mut chunks)?;
    for (prefix_id, uri_id) in namespace_ids.into_iter().rev() {
        chunks.extend(generate_namespace_chunk(false, prefix_id, uri_id)?);
    }

    let xml_resource_map_chunk = generate_res_chunk(
        ChunkType::XmlResourceMap,
        XmlResourceMap {
            resources: strings.resource_ids.clone()
        },
        0,
        0
    )?
    .to_bytes()?;

    let string_pool = construct_string_pool(&strings.strings)?;
    let mut string_pool_bytes = string_pool.to_bytes()?;
    string_pool_bytes.extend(xml_resource_map_chunk);
    string_pool_bytes.extend(chunks);

    Ok(generate_res_chunk(
        ChunkType::XmlFile,
        RawBytes {
            data: string_pool_bytes
        },
        0,
        0
    )?
    .to_bytes()?)
}

fn encode_element(element: &Element, strings: &mut StringTable, chunks: &mut Vec<u8>) -> Result<()> {
    let namespace = strings.intern_optional(element.namespace.as_deref());
    let name = strings.intern(&element.name);

    // The platform binary-searches attributes by resource ID, so compiled
    // attributes must come first and in ascending order.
    let mut attributes: Vec<&Attribute> = element.attributes.iter().collect();
    attributes.sort_by_key(|attr| match attr.resource_id {
        Some(id) => (0, id),
        None => (1, 0)
    });

    let mut elem = XmlStartElementChunk {
        namespace,
        name,
        attribute_start: XML_START_ELEMENT_SIZE,
        attribute_size: XML_ATTRIBUTE_SIZE,
        attribute_count: 0,
        id_index: 0,
        class_index: 0,
        style_index: 0,
        attribute_data: vec![]
    };
    for attr in attributes {
        elem.attribute_data.extend(encode_attribute(attr, strings)?);
        elem.attribute_count += 1;
    }
    chunks.extend(generate_xml_chunk(ChunkType::XmlStartElement, elem)?);

    for child in &element.children {
        encode_element(child, strings, chunks)?;
    }

    chunks.extend(generate_xml_chunk(
        ChunkType::XmlEndElement,
        XmlEndElementChunk { namespace, name }
    )?);
    Ok(())
}

fn encode_attribute(attr: &Attribute, strings: &mut StringTable) -> Result<Vec<u8>> {
    let namespace = strings.intern_optional(attr.namespace.as_deref());
    let name = strings.attribute_name(attr);
    let (raw_value, data_type, data) = match &attr.value {
        AttributeValue::String(value) => {
            let id = strings.intern(value);
            (id, TYPE_STRING, id)
        }
        typed => {
            let raw = strings.intern_optional(attr.raw_value.as_deref());
            let (data_type, data) = match typed {
                AttributeValue::Decimal(value) => (TYPE_INT_DEC, *value as u32),
                AttributeValue::Hex(value) => (TYPE_INT_HEX, *value),
                AttributeValue::Boolean(value) => (TYPE_INT_BOOLEAN, if *value { UINT32_MINUS_ONE } else { 0 }),
                AttributeValue::Reference(value) => (TYPE_REFERENCE, *value),
                AttributeValue::Other { data_type, data } => (*data_type, *data),
                AttributeValue::String(_) => (TYPE_NULL, 0)
            };
            (raw, data_type, data)
        }
    };

    Ok(XmlAttributeChunk {
        namespace,
        name,
        raw_value,
        typed_value: XmlAttributeDataChunk {
            size: 8,
            res0: 0,
            data_type,
            data
        }
    }
    .to_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_document;
    use crate::internal_android_attributes::android_attribute_id;

    fn sample() -> BinaryDocument {
        BinaryDocument::new(
            // Attributes listed in encoded order
            Element::new("manifest")
                .with(AttrKey::android("versionCode"), AttributeValue::Decimal(7))
                .with_string(AttrKey::plain("package"), "com.example.app")
                .with_child(
                    Element::new("uses-sdk")
                        .with(AttrKey::android("minSdkVersion"), AttributeValue::Decimal(21))
                )
                .with_child(
                    Element::new("application")
                        .with(AttrKey::android("label"), AttributeValue::Reference(0x7f0a_0000))
                        .with(AttrKey::android("enabled"), AttributeValue::Boolean(true))
                        .with_child(
                            Element::new("activity")
                                .with(AttrKey::android("theme"), AttributeValue::Other {
                                    data_type: 0x1c,
                                    data: 0xff00_ff00
                                })
                                .with_string(AttrKey::android("name"), ".MainActivity")
                        )
                )
        )
    }

    #[test]
    fn decode_reads_back_the_tree() {
        let document = sample();
        let bytes = encode_document(&document).unwrap();
        assert_eq!(bytes.len() % 4, 0);
        let decoded = decode_document(&bytes).unwrap();
        assert_eq!(decoded, document);
    }

    #[test]
    fn compiled_attributes_are_sorted_by_id() {
        let mut document = sample();
        let activity = &mut document.root.children[1].children[0];
        activity.attributes.reverse();
        let decoded = decode_document(&encode_document(&document).unwrap()).unwrap();
        let activity = decoded.root.child("application").unwrap().child("activity").unwrap();
        assert_eq!(activity.attributes[0].resource_id, android_attribute_id("theme"));
        assert_eq!(activity.attributes[1].resource_id, android_attribute_id("name"));
    }

    #[test]
    fn blanked_names_keep_separate_slots() {
        let mut element = Element::new("activity");
        for name in ["name", "exported"] {
            let mut attr = Attribute::new(AttrKey::android(name), AttributeValue::Boolean(true));
            attr.name = String::new();
            element.attributes.push(attr);
        }
        let document = BinaryDocument::new(Element::new("manifest").with_child(element));
        let decoded = decode_document(&encode_document(&document).unwrap()).unwrap();
        let activity = decoded.root.child("activity").unwrap();
        assert_eq!(activity.attributes[0].resource_id, android_attribute_id("name"));
        assert_eq!(activity.attributes[1].resource_id, android_attribute_id("exported"));
    }

    #[test]
    fn missing_namespace_declarations_are_added() {
        let document = BinaryDocument {
            namespaces: vec![],
            root: Element::new("manifest").with_string(AttrKey::android("label"), "x")
        };
        let decoded = decode_document(&encode_document(&document).unwrap()).unwrap();
        assert_eq!(decoded.namespaces, vec![Namespace::android()]);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_document(b"PK\x03\x04 not binary xml").is_err());
        assert!(decode_document(&[]).is_err());
        let bytes = encode_document(&sample()).unwrap();
        assert!(decode_document(&bytes[..bytes.len() / 2]).is_err());
    }
}
