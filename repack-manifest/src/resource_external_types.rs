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


// Types that Android/APKs themselves use to describe binary XML documents
use deku::prelude::*;

#[derive(Debug, PartialEq, DekuWrite)]
pub struct ResChunk {
    pub header: ResChunkHeader,
    pub data: Vec<u8>
}

pub const RES_CHUNK_HEADER_SIZE: u32 = 8;
pub const UINT32_MINUS_ONE: u32 = 0xFFFFFFFF;
// Either a string index or UINT32_MINUS_ONE if empty
pub type ResStringPoolRef = u32;

#[derive(Debug, PartialEq, DekuWrite)]
pub struct ResChunkHeader {
    pub chunk_type: ChunkType,
    pub header_size: u16,
    // Includes both this header and the data that follows
    pub chunk_size: u32
}

#[derive(Debug, PartialEq, DekuWrite)]
pub struct XmlNodeChunk {
    // Where this node appeared in the original document
    // Not important for on-device parsing, only debugging and logs
    pub line_number: u32,
    // The XML comment that originally appeared above this note
    pub comment: ResStringPoolRef,
    pub node_data: Vec<u8>
}

#[derive(Debug, PartialEq, DekuWrite)]
pub struct XmlResourceMap {
    pub resources: Vec<u32>
}

#[derive(Debug, PartialEq, DekuWrite)]
pub struct RawBytes {
    pub data: Vec<u8>
}

// Used for both the start and end of a namespace
#[derive(Debug, PartialEq, DekuWrite)]
pub struct XmlNamespaceChunk {
    pub prefix: ResStringPoolRef,
    pub uri: ResStringPoolRef
}

pub const XML_START_ELEMENT_SIZE: u16 = 0x14;
pub const XML_ATTRIBUTE_SIZE: u16 = 0x14;

#[derive(Debug, PartialEq, DekuWrite)]
pub struct XmlStartElementChunk {
    pub namespace: ResStringPoolRef,
    pub name: ResStringPoolRef,
    pub attribute_start: u16,
    pub attribute_size: u16,
    pub attribute_count: u16,
    // Index (1-based) of the "id" attribute, 0 if none
    pub id_index: u16,
    // Index (1-based) of the "class" attribute, 0 if none
    pub class_index: u16,
    // Index (1-based) of the "style" attribute, 0 if none
    pub style_index: u16,
    pub attribute_data: Vec<u8>
}

#[derive(Debug, PartialEq, DekuWrite)]
pub struct XmlEndElementChunk {
    pub namespace: ResStringPoolRef,
    pub name: ResStringPoolRef
}

#[derive(Debug, PartialEq, DekuWrite)]
pub struct XmlAttributeChunk {
    pub namespace: ResStringPoolRef,
    pub name: ResStringPoolRef,
    pub raw_value: ResStringPoolRef,
    pub typed_value: XmlAttributeDataChunk
}

#[derive(Debug, PartialEq, DekuWrite)]
pub struct XmlAttributeDataChunk {
    pub size: u16,
    // Always 0
    pub res0: u8,
    // Kept as a raw byte so types we don't interpret survive a round trip
    pub data_type: u8,
    pub data: u32
}

// Res_value data types
pub const TYPE_NULL: u8 = 0x00;
pub const TYPE_REFERENCE: u8 = 0x01;
pub const TYPE_STRING: u8 = 0x03;
pub const TYPE_INT_DEC: u8 = 0x10;
pub const TYPE_INT_HEX: u8 = 0x11;
pub const TYPE_INT_BOOLEAN: u8 = 0x12;

#[derive(Debug, PartialEq, DekuWrite)]
pub struct StringPoolChunk {
    // Not the same thing as a ResChunkHeader,
    // the format has headers within headers
    pub string_pool_header: StringPoolHeader,
    pub string_indicies: Vec<u32>,
    pub string_data: Vec<u8>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuWrite)]
#[deku(id_type = "u16")]
pub enum ChunkType {
    #[deku(id = 0x0000)]
    Null,
    #[deku(id = 0x0001)]
    StringPool,
    #[deku(id = 0x0003)]
    XmlFile,

    // Types within an XmlFile
    #[deku(id = 0x0100)]
    XmlStartNamespace,
    #[deku(id = 0x0101)]
    XmlEndNamespace,
    #[deku(id = 0x0102)]
    XmlStartElement,
    #[deku(id = 0x0103)]
    XmlEndElement,
    #[deku(id = 0x0104)]
    XmlCdata,
    #[deku(id = 0x180)]
    XmlResourceMap
}

impl ChunkType {
    pub fn from_id(id: u16) -> Option<ChunkType> {
        match id {
            0x0000 => Some(ChunkType::Null),
            0x0001 => Some(ChunkType::StringPool),
            0x0003 => Some(ChunkType::XmlFile),
            0x0100 => Some(ChunkType::XmlStartNamespace),
            0x0101 => Some(ChunkType::XmlEndNamespace),
            0x0102 => Some(ChunkType::XmlStartElement),
            0x0103 => Some(ChunkType::XmlEndElement),
            0x0104 => Some(ChunkType::XmlCdata),
            0x0180 => Some(ChunkType::XmlResourceMap),
            _ => None
        }
    }
}

pub const STRING_POOL_UTF8_FLAG: u32 = 1 << 8;
pub const STRING_POOL_HEADER_SIZE: u16 = 0x1C;

#[derive(Debug, PartialEq, DekuWrite)]
pub struct StringPoolHeader {
    pub string_count: u32,
    pub style_count: u32,
    pub flags: u32,
    pub strings_start: u32,
    pub styles_start: u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_match_their_wire_encoding() {
        for chunk_type in [
            ChunkType::StringPool,
            ChunkType::XmlFile,
            ChunkType::XmlStartElement,
            ChunkType::XmlResourceMap
        ] {
            let bytes = chunk_type.to_bytes().unwrap();
            let id = u16::from_le_bytes([bytes[0], bytes[1]]);
            assert_eq!(ChunkType::from_id(id), Some(chunk_type));
        }
        assert_eq!(ChunkType::from_id(0x0202), None);
    }

    #[test]
    fn attribute_chunk_is_twenty_bytes() {
        let chunk = XmlAttributeChunk {
            namespace: UINT32_MINUS_ONE,
            name: 0,
            raw_value: UINT32_MINUS_ONE,
            typed_value: XmlAttributeDataChunk {
                size: 8,
                res0: 0,
                data_type: TYPE_INT_DEC,
                data: 24
            }
        };
        assert_eq!(chunk.to_bytes().unwrap().len(), XML_ATTRIBUTE_SIZE as usize);
    }
}
