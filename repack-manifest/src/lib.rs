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


use deku::DekuContainerWrite;
use repack_common::*;
use resource_external_types::{ChunkType, ResChunk, ResChunkHeader, RES_CHUNK_HEADER_SIZE};

pub mod component_table;
pub mod decoder;
pub mod document;
pub mod encoder;
pub mod internal_android_attributes;
pub mod patch;
pub mod resource_external_types;
pub mod string_pool;
pub mod text_xml;

pub use component_table::{ComponentSpec, ComponentTable, DEFAULT_COMPONENTS};
pub use decoder::decode_document;
pub use document::{AttrKey, Attribute, AttributeValue, BinaryDocument, Element, Namespace};
pub use encoder::encode_document;
pub use patch::{patch_manifest, PatchOptions, PatchOutcome, PatchTier, RenameRequest};
pub use text_xml::render_text_xml;

pub fn generate_res_chunk<T: DekuContainerWrite>(
    chunk_type: ChunkType,
    data: T,
    extra_header_size: u16,
    extra_chunk_size: u16
) -> Result<ResChunk> {
    let mut data_bytes = data.to_bytes()?;
    // Every chunk has to end on a 32-bit boundary
    let padding = (4 - (data_bytes.len() + extra_chunk_size as usize) % 4) % 4;
    data_bytes.resize(data_bytes.len() + padding, 0);
    Ok(ResChunk {
        header: ResChunkHeader {
            chunk_type,
            header_size: RES_CHUNK_HEADER_SIZE as u16 + extra_header_size,
            chunk_size: RES_CHUNK_HEADER_SIZE + extra_chunk_size as u32 + data_bytes.len() as u32
        },
        data: data_bytes
    })
}

/// Decodes a compiled manifest and renders it as text XML.
pub fn manifest_to_text(manifest: &[u8]) -> Result<String> {
    render_text_xml(&decode_document(manifest)?)
}
