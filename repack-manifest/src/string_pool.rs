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


use crate::{generate_res_chunk, resource_external_types::*};
use byteorder::{ByteOrder, LittleEndian};
use repack_common::*;

const STRING_POOL_UTF16_LIMIT: usize = 0x7FFF_FFFF;

pub fn construct_string_pool(strings: &[String]) -> Result<ResChunk> {
    let mut string_indicies: Vec<u32> = vec![];
    let mut string_data: Vec<u8> = vec![];
    for string in strings {
        let index = string_data.len() as u32;
        string_indicies.push(index);

        // UTF-8 pools store both lengths in at most 15 bits. Rather than
        // fall back to a UTF-16 pool we bail and let the caller degrade.
        if string.len() > 0x7FFF {
            return Err(PackError::StringPoolStringTooLong(string.clone()));
        }

        // The first length counts UTF-16 code units, not chars
        let utf16_count = string.encode_utf16().count();
        let byte_count = string.len();
        push_utf8_length(&mut string_data, utf16_count);
        push_utf8_length(&mut string_data, byte_count);

        string_data.extend(string.bytes());
        string_data.push(0);
    }

    // String data is a u8 array, but AAPT requires all chunks to fall on
    // 32-bit boundaries.
    let padding = (4 - (string_data.len() % 4)) % 4;
    string_data.resize(string_data.len() + padding, 0);

    let string_indicies_size_bytes = 4 * strings.len() as u32;
    let string_pool_header = StringPoolHeader {
        string_count: strings.len() as u32,
        style_count: 0,
        flags: STRING_POOL_UTF8_FLAG,
        strings_start: STRING_POOL_HEADER_SIZE as u32 + string_indicies_size_bytes,
        styles_start: 0
    };
    let string_pool_chunk = StringPoolChunk {
        string_pool_header,
        string_indicies,
        string_data
    };

    generate_res_chunk(
        ChunkType::StringPool,
        string_pool_chunk,
        STRING_POOL_HEADER_SIZE - RES_CHUNK_HEADER_SIZE as u16,
        0
    )
}

fn push_utf8_length(out: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        out.push(length as u8);
    } else {
        out.push(0x80 | ((length >> 8) & 0x7F) as u8);
        out.push((length & 0xFF) as u8);
    }
}

/// Decodes a complete string pool chunk, header included.
///
/// Both UTF-8 and UTF-16 pools are accepted since tools other than AAPT2
/// still emit the latter. Style spans are ignored.
pub fn parse_string_pool(chunk: &[u8]) -> Result<Vec<String>> {
    let header_size = read_u16(chunk, 2)? as usize;
    if header_size < STRING_POOL_HEADER_SIZE as usize {
        return Err(PackError::MalformedBinaryXml(format!(
            "string pool header is {header_size} bytes"
        )));
    }
    let string_count = read_u32(chunk, 8)? as usize;
    let flags = read_u32(chunk, 16)?;
    let strings_start = read_u32(chunk, 20)? as usize;
    let utf8 = flags & STRING_POOL_UTF8_FLAG != 0;

    let mut strings = Vec::with_capacity(string_count.min(chunk.len() / 4));
    for i in 0..string_count {
        let offset = read_u32(chunk, header_size + i * 4)? as usize;
        let start = strings_start
            .checked_add(offset)
            .ok_or_else(|| truncated("string offset"))?;
        let string = if utf8 {
            decode_utf8_string(chunk, start)?
        } else {
            decode_utf16_string(chunk, start)?
        };
        strings.push(string);
    }
    Ok(strings)
}

fn decode_utf8_string(chunk: &[u8], start: usize) -> Result<String> {
    // Character count first, then byte count. Only the latter matters here.
    let (_, after_chars) = read_utf8_length(chunk, start)?;
    let (byte_count, data_start) = read_utf8_length(chunk, after_chars)?;
    let bytes = chunk
        .get(data_start..data_start + byte_count)
        .ok_or_else(|| truncated("UTF-8 string"))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn read_utf8_length(chunk: &[u8], at: usize) -> Result<(usize, usize)> {
    let first = *chunk.get(at).ok_or_else(|| truncated("UTF-8 length"))? as usize;
    if first & 0x80 == 0 {
        return Ok((first, at + 1));
    }
    let second = *chunk.get(at + 1).ok_or_else(|| truncated("UTF-8 length"))? as usize;
    Ok((((first & 0x7F) << 8) | second, at + 2))
}

fn decode_utf16_string(chunk: &[u8], start: usize) -> Result<String> {
    let first = read_u16(chunk, start)? as usize;
    let (unit_count, data_start) = if first & 0x8000 == 0 {
        (first, start + 2)
    } else {
        let second = read_u16(chunk, start + 2)? as usize;
        (((first & 0x7FFF) << 16) | second, start + 4)
    };
    if unit_count > STRING_POOL_UTF16_LIMIT {
        return Err(truncated("UTF-16 length"));
    }
    let bytes = chunk
        .get(data_start..data_start + unit_count * 2)
        .ok_or_else(|| truncated("UTF-16 string"))?;
    let units: Vec<u16> = bytes.chunks_exact(2).map(LittleEndian::read_u16).collect();
    Ok(String::from_utf16_lossy(&units))
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> Result<u16> {
    buf.get(at..at + 2)
        .map(LittleEndian::read_u16)
        .ok_or_else(|| truncated("u16 field"))
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .map(LittleEndian::read_u32)
        .ok_or_else(|| truncated("u32 field"))
}

fn truncated(what: &str) -> PackError {
    PackError::MalformedBinaryXml(format!("truncated {what}"))
}
