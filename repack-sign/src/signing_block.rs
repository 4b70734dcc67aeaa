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
    crypto::get_signature_for_signed_data,
    crypto_keys::Keys,
    signed_data_block::{SIGNATURE_SCHEME_V2_BLOCK_ID, SIGNATURE_SCHEME_V3_BLOCK_ID},
    signing_types::{ApkSigningBlock, SignatureSchemeV2Block, SignatureSchemeV3Block, SignedData, V3SignedData},
    SigningSchemes
};
use deku::DekuContainerWrite;
use repack_common::Result;

// Must be 24 or higher. 23 does not support our hash algorithm.
pub const V3_MIN_SDK: u32 = 24;
// We deal with this unsigned, but Android parses it as signed, hence the 7F.
pub const V3_MAX_SDK: u32 = 0x7FFFFFFF;

pub fn compute_signing_block(
    top_level_hash: [u8; 32],
    keys: &Keys,
    schemes: &SigningSchemes
) -> Result<ApkSigningBlock> {
    // Construct the data block that we're going to sign
    // NOTE: The signature does NOT include the length prefix
    let signed_data = SignedData::new(top_level_hash, keys)?;
    let mut blocks = vec![];

    if schemes.v3 {
        let v3_signed_data = V3SignedData::from(&signed_data, V3_MIN_SDK, V3_MAX_SDK);
        let v3_signature = get_signature_for_signed_data(&v3_signed_data, keys)?;
        let v3_scheme_block =
            SignatureSchemeV3Block::new(v3_signed_data, v3_signature, keys, V3_MIN_SDK, V3_MAX_SDK)?;
        blocks.push((SIGNATURE_SCHEME_V3_BLOCK_ID, v3_scheme_block.to_bytes()?));
    }
    if schemes.v2 {
        let signature = get_signature_for_signed_data(&signed_data, keys)?;
        let scheme_block = SignatureSchemeV2Block::new(signed_data, signature, keys)?;
        blocks.insert(0, (SIGNATURE_SCHEME_V2_BLOCK_ID, scheme_block.to_bytes()?));
    }

    // Create the entire APK Signing Block that goes straight into the zip file
    ApkSigningBlock::new(blocks)
}
