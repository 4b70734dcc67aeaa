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


use byteorder::{LittleEndian, ReadBytesExt};
use repack_common::*;
use std::io::Cursor;

use crate::signed_data_block::APK_SIGNING_BLOCK_MAGIC;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ZipOffsets {
    // Central Directory (from start of file)
    pub cd_start: usize,
    // End of Central Directory (from start of file)
    pub eocd_start: usize
}

pub const EOCD_MAGIC: &[u8; 4] = &[0x50, 0x4B, 0x05, 0x06];
pub const EOCD_MIN_SIZE: usize = 22;
// The EOCD is followed by a comment of at most u16::MAX bytes
const EOCD_SEARCH_WINDOW: usize = EOCD_MIN_SIZE + u16::MAX as usize;

pub fn find_offsets(zip_buf: &[u8]) -> Result<ZipOffsets> {
    if zip_buf.len() < EOCD_MIN_SIZE {
        return Err(PackError::SignerZipParsingFailed);
    }
    let last_candidate = zip_buf.len() - EOCD_MIN_SIZE;
    let first_candidate = zip_buf.len().saturating_sub(EOCD_SEARCH_WINDOW);
    for i in (first_candidate..=last_candidate).rev() {
        let magic = &zip_buf[i..(i + 4)];
        if magic == EOCD_MAGIC {
            // The EOCD also tells us where the central directories start
            let mut eocd_cd_start_field = Cursor::new(&zip_buf[(i + 16)..(i + 20)]);
            let cd_start = eocd_cd_start_field.read_u32::<LittleEndian>()? as usize;
            if cd_start > i {
                return Err(PackError::SignerZipParsingFailed);
            }
            return Ok(ZipOffsets {
                cd_start,
                eocd_start: i
            });
        }
    }

    // Couldn't find the central directory
    Err(PackError::SignerZipParsingFailed)
}

/// An APK Signing Block found in front of the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningBlockLocation {
    /// Offset of the block's first length field
    pub start: usize,
    /// ID/value pairs, in block order
    pub pairs: Vec<(u32, Vec<u8>)>
}

/// Looks for the signing block that ends where the central directory
/// begins. `Ok(None)` means the archive has no v2/v3 signature.
pub fn find_signing_block(zip_buf: &[u8], offsets: &ZipOffsets) -> Result<Option<SigningBlockLocation>> {
    let cd_start = offsets.cd_start;
    // size_of_self_counted (8) + magic (16)
    if cd_start < 24 || &zip_buf[cd_start - 16..cd_start] != APK_SIGNING_BLOCK_MAGIC {
        return Ok(None);
    }
    let block_size = Cursor::new(&zip_buf[cd_start - 24..cd_start - 16]).read_u64::<LittleEndian>()?;
    let start = usize::try_from(block_size)
        .ok()
        .and_then(|size| size.checked_add(8))
        .and_then(|total| cd_start.checked_sub(total))
        .ok_or(PackError::SignerZipParsingFailed)?;

    let mut cursor = Cursor::new(&zip_buf[start..cd_start - 24]);
    if cursor.read_u64::<LittleEndian>()? != block_size {
        return Err(PackError::SignerZipParsingFailed);
    }
    let mut pairs = vec![];
    while (cursor.position() as usize) < cursor.get_ref().len() {
        let pair_length = cursor.read_u64::<LittleEndian>()? as usize;
        let id = cursor.read_u32::<LittleEndian>()?;
        let value_start = cursor.position() as usize;
        let value_end = pair_length
            .checked_sub(4)
            .and_then(|value_length| value_start.checked_add(value_length))
            .filter(|end| *end <= cursor.get_ref().len())
            .ok_or(PackError::SignerZipParsingFailed)?;
        pairs.push((id, cursor.get_ref()[value_start..value_end].to_vec()));
        cursor.set_position(value_end as u64);
    }

    Ok(Some(SigningBlockLocation { start, pairs }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eocd(cd_start: u32) -> Vec<u8> {
        let mut record = EOCD_MAGIC.to_vec();
        record.extend([0; 12]);
        record.extend(cd_start.to_le_bytes());
        record.extend([0; 2]);
        record
    }

    #[test]
    fn short_buffers_are_rejected_not_panicking() {
        for len in [0, 3, 21] {
            assert!(find_offsets(&vec![0; len]).is_err());
        }
    }

    #[test]
    fn offsets_come_from_the_eocd() {
        let mut buf = vec![0xEE; 40];
        buf.extend(eocd(30));
        assert_eq!(
            find_offsets(&buf).unwrap(),
            ZipOffsets {
                cd_start: 30,
                eocd_start: 40
            }
        );
    }

    #[test]
    fn central_directory_past_the_eocd_is_rejected() {
        let mut buf = vec![0; 10];
        buf.extend(eocd(500));
        assert!(find_offsets(&buf).is_err());
    }

    #[test]
    fn unsigned_archives_have_no_block() {
        let mut buf = vec![0; 64];
        buf.extend(eocd(64));
        let offsets = find_offsets(&buf).unwrap();
        assert_eq!(find_signing_block(&buf, &offsets).unwrap(), None);
    }
}
