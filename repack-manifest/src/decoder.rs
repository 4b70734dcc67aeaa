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


use crate::{
    document::*,
    resource_external_types::*,
    string_pool::{parse_string_pool, read_u16, read_u32}
};
use repack_common::*;
use tracing::debug;

struct ChunkHeader {
    chunk_type: u16,
    header_size: usize,
    size: usize
}

fn read_chunk_header(buf: &[u8], at: usize) -> Result<ChunkHeader> {
    let header = ChunkHeader {
        chunk_type: read_u16(buf, at)?,
        header_size: read_u16(buf, at + 2)? as usize,
        size: read_u32(buf, at + 4)? as usize
    };
    if header.header_size < RES_CHUNK_HEADER_SIZE as usize || header.size < header.header_size {
        return Err(PackError::MalformedBinaryXml(format!(
            "chunk 0x{:04x} at {at} has inconsistent sizes",
            header.chunk_type
        )));
    }
    Ok(header)
}

/// Parses a compiled XML document (such as `AndroidManifest.xml` inside an
/// APK) into a [BinaryDocument].
pub fn decode_document(bytes: &[u8]) -> Result<BinaryDocument> {
    let file = read_chunk_header(bytes, 0)?;
    if ChunkType::from_id(file.chunk_type) != Some(ChunkType::XmlFile) {
        return Err(PackError::MalformedBinaryXml(format!(
            "expected an XML file chunk, found 0x{:04x}",
            file.chunk_type
        )));
    }
    if file.size > bytes.len() {
        return Err(PackError::MalformedBinaryXml(format!(
            "file claims {} bytes but only {} are present",
            file.size,
            bytes.len()
        )));
    }

    let mut decoder = Decoder::default();
    let mut offset = file.header_size;
    while offset + RES_CHUNK_HEADER_SIZE as usize <= file.size {
        let chunk = read_chunk_header(bytes, offset)?;
        let end = offset + chunk.size;
        if end > file.size {
            return Err(PackError::MalformedBinaryXml(format!(
                "chunk at {offset} overruns the file"
            )));
        }
        decoder.chunk(&chunk, &bytes[offset..end])?;
        offset = end;
    }
    decoder.finish()
}

#[derive(Default)]
struct Decoder {
    strings: Vec<String>,
    resource_map: Vec<u32>,
    namespaces: Vec<Namespace>,
    open: Vec<Element>,
    root: Option<Element>
}

impl Decoder {
    fn chunk(&mut self, header: &ChunkHeader, chunk: &[u8]) -> Result<()> {
        let body = header.header_size;
        match ChunkType::from_id(header.chunk_type) {
            Some(ChunkType::StringPool) => self.strings = parse_string_pool(chunk)?,
            Some(ChunkType::XmlResourceMap) => {
                self.resource_map = chunk[body..]
                    .chunks_exact(4)
                    .map(|id| u32::from_le_bytes([id[0], id[1], id[2], id[3]]))
                    .collect();
            }
            Some(ChunkType::XmlStartNamespace) => {
                let namespace = Namespace {
                    prefix: self.string(read_u32(chunk, body)?)?,
                    uri: self.string(read_u32(chunk, body + 4)?)?
                };
                if !self.namespaces.contains(&namespace) {
                    self.namespaces.push(namespace);
                }
            }
            Some(ChunkType::XmlStartElement) => {
                let element = self.start_element(chunk, body)?;
                self.open.push(element);
            }
            Some(ChunkType::XmlEndElement) => {
                let element = self.open.pop().ok_or_else(|| {
                    PackError::MalformedBinaryXml("end element without a start".into())
                })?;
                match self.open.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if self.root.is_none() => self.root = Some(element),
                    None => {
                        return Err(PackError::MalformedBinaryXml(
                            "more than one root element".into()
                        ))
                    }
                }
            }
            _ => debug!(chunk_type = header.chunk_type, "skipping chunk")
        }
        Ok(())
    }

    fn start_element(&self, chunk: &[u8], body: usize) -> Result<Element> {
        let namespace = self.optional_string(read_u32(chunk, body)?)?;
        let name = self.string(read_u32(chunk, body + 4)?)?;
        let attribute_start = read_u16(chunk, body + 8)? as usize;
        let attribute_size = read_u16(chunk, body + 10)? as usize;
        let attribute_count = read_u16(chunk, body + 12)? as usize;
        if attribute_count > 0 && attribute_size < XML_ATTRIBUTE_SIZE as usize {
            return Err(PackError::MalformedBinaryXml(format!(
                "attribute stride {attribute_size} is too small"
            )));
        }

        let mut attributes = Vec::with_capacity(attribute_count);
        for i in 0..attribute_count {
            let at = body + attribute_start + i * attribute_size;
            attributes.push(self.attribute(chunk, at)?);
        }
        Ok(Element {
            namespace,
            name,
            attributes,
            children: vec![]
        })
    }

    fn attribute(&self, chunk: &[u8], at: usize) -> Result<Attribute> {
        let namespace = self.optional_string(read_u32(chunk, at)?)?;
        let name_index = read_u32(chunk, at + 4)?;
        let raw_value = self.optional_string(read_u32(chunk, at + 8)?)?;
        let data_type = *chunk
            .get(at + 15)
            .ok_or_else(|| PackError::MalformedBinaryXml("truncated attribute".into()))?;
        let data = read_u32(chunk, at + 16)?;

        let value = match data_type {
            TYPE_STRING => match self.strings.get(data as usize) {
                Some(value) => AttributeValue::String(value.clone()),
                // Some packers leave the typed index dangling and rely on
                // the raw value
                None => AttributeValue::String(raw_value.clone().unwrap_or_default())
            },
            TYPE_REFERENCE => AttributeValue::Reference(data),
            TYPE_INT_DEC => AttributeValue::Decimal(data as i32),
            TYPE_INT_HEX => AttributeValue::Hex(data),
            TYPE_INT_BOOLEAN => AttributeValue::Boolean(data != 0),
            _ => AttributeValue::Other { data_type, data }
        };
        let raw_value = match value {
            AttributeValue::String(_) => None,
            _ => raw_value
        };

        Ok(Attribute {
            namespace,
            name: self.string(name_index)?,
            resource_id: self
                .resource_map
                .get(name_index as usize)
                .copied()
                .filter(|id| *id != 0 && *id != UINT32_MINUS_ONE),
            value,
            raw_value
        })
    }

    fn string(&self, index: u32) -> Result<String> {
        self.strings.get(index as usize).cloned().ok_or_else(|| {
            PackError::MalformedBinaryXml(format!("string index {index} out of range"))
        })
    }

    fn optional_string(&self, index: u32) -> Result<Option<String>> {
        if index == UINT32_MINUS_ONE {
            return Ok(None);
        }
        self.string(index).map(Some)
    }

    fn finish(self) -> Result<BinaryDocument> {
        if !self.open.is_empty() {
            return Err(PackError::MalformedBinaryXml(format!(
                "{} element(s) never closed",
                self.open.len()
            )));
        }
        let root = self
            .root
            .ok_or_else(|| PackError::MalformedBinaryXml("document has no root element".into()))?;
        Ok(BinaryDocument {
            namespaces: self.namespaces,
            root
        })
    }
}
