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


use sha2::{Digest, Sha256};

use repack_common::*;

pub type Sha256Hash = [u8; 32];

pub const BYTES_IN_1MB: u32 = 1024 * 1024;
pub const FIRST_LEVEL_CHUNK_MAGIC: &[u8] = &[0xa5];
pub const SECOND_LEVEL_CHUNK_MAGIC: &[u8] = &[0x5a];
// Offset of the "start of central directory" field within the EOCD record
pub const EOCD_CD_OFFSET_FIELD: usize = 16;

/// The v2/v3 content digest.
///
/// The Android Developer documentation calls the sections chunks 1, 3 and 4
/// because the APK Signing Block is chunk 2. The central directory offset
/// inside `eocd` must point at where the signing block starts (or will
/// start), not at the central directory.
pub fn compute_top_level_hash(contents: &[u8], central_directory: &[u8], eocd: &[u8]) -> Sha256Hash {
    let mut first_level_hashes = vec![];
    // Chunk 1: APK contents before the signing block
    first_level_hashes.extend(hash_chunk(contents));
    // Chunk 3: Central directories
    first_level_hashes.extend(hash_chunk(central_directory));
    // Chunk 4: End of central directory
    first_level_hashes.extend(hash_chunk(eocd));

    let mut hasher = Sha256::new();
    hasher.update(SECOND_LEVEL_CHUNK_MAGIC);
    hasher.update((first_level_hashes.len() as u32).to_le_bytes());
    for hash in &first_level_hashes {
        hasher.update(hash);
    }
    hasher.finalize().into()
}

/// Copy of an EOCD record with its central directory offset replaced.
pub fn eocd_with_cd_offset(eocd: &[u8], cd_offset: usize) -> Result<Vec<u8>> {
    let field = EOCD_CD_OFFSET_FIELD..EOCD_CD_OFFSET_FIELD + 4;
    if eocd.len() < field.end {
        return Err(PackError::SignerZipParsingFailed);
    }
    let cd_offset = u32::try_from(cd_offset).map_err(|_| PackError::SignerZipParsingFailed)?;
    let mut patched = eocd.to_vec();
    patched[field].copy_from_slice(&cd_offset.to_le_bytes());
    Ok(patched)
}

fn hash_chunk(chunk: &[u8]) -> Vec<Sha256Hash> {
    let mut hasher = Sha256::new();
    let mut chunk_hashes = vec![];

    // Each chunk is 1MB OR whatever's left in the buffer
    for piece in chunk.chunks(BYTES_IN_1MB as usize) {
        hasher.update(FIRST_LEVEL_CHUNK_MAGIC);
        hasher.update((piece.len() as u32).to_le_bytes());
        hasher.update(piece);
        chunk_hashes.push(hasher.finalize_reset().into());
    }

    chunk_hashes
}
