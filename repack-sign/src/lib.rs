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


use std::io::Cursor;

use crypto_keys::Keys;
use hasher::{compute_top_level_hash, eocd_with_cd_offset};
use repack_common::*;
use repack_zip::layout::is_signature_file;
use signing_block::compute_signing_block;
use tracing::{debug, info};
use zip_parser::{find_offsets, find_signing_block};
use zip_rebuilder::rebuild_zip_with_signing_block;

mod crypto;
pub mod crypto_keys;
mod hasher;
pub mod key_store;
mod signed_data_block;
mod signing_block;
mod signing_types;
pub mod v1_signing;
pub mod verifier;
mod zip_parser;
mod zip_rebuilder;

pub use key_store::{KeyStore, PemKeyStore};
pub use verifier::{verify_signed_archive, VerificationReport};

/// Which signature schemes to apply. v1 and v2 by default; v3 only adds key
/// rotation support, which a fresh identity doesn't need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningSchemes {
    pub v1: bool,
    pub v2: bool,
    pub v3: bool
}

impl Default for SigningSchemes {
    fn default() -> Self {
        SigningSchemes {
            v1: true,
            v2: true,
            v3: false
        }
    }
}

impl SigningSchemes {
    pub fn any(&self) -> bool {
        self.v1 || self.v2 || self.v3
    }
}

/// Signs an unsigned (or previously signed) APK.
///
/// v1 rewrites the archive with `META-INF` signature files named after
/// `alias`. v2/v3 then insert an APK Signing Block into the result.
pub fn sign_archive(unsigned: &[u8], keys: &Keys, alias: &str, schemes: &SigningSchemes) -> Result<Vec<u8>> {
    if !schemes.any() {
        return Err(PackError::SignerNoSchemesEnabled);
    }

    let zip_buf = if schemes.v1 {
        let mut entries = repack_zip::read_entries(Cursor::new(unsigned))?;
        entries.retain(|entry| !is_signature_file(&entry.path));
        v1_signing::add_v1_signature_files(&mut entries, keys, alias, schemes)?;
        let mut zip_buf = vec![];
        repack_zip::write_entries(&entries, Cursor::new(&mut zip_buf))?;
        debug!(entries = entries.len(), "applied v1 signature");
        zip_buf
    } else {
        unsigned.to_vec()
    };

    let signed = if schemes.v2 || schemes.v3 {
        sign_apk_buffer(&zip_buf, keys, schemes)?
    } else {
        zip_buf
    };
    info!(v1 = schemes.v1, v2 = schemes.v2, v3 = schemes.v3, bytes = signed.len(), "archive signed");
    Ok(signed)
}

// APK Signature Scheme v2 based on https://source.android.com/docs/security/features/apksigning/v2
// APK Signature Scheme v3 based on https://source.android.com/docs/security/features/apksigning/v3
/// Signs a ZIP file buffer, adding an APK Signature Block before its Central Directory.
pub fn sign_apk_buffer(apk_buf: &[u8], keys: &Keys, schemes: &SigningSchemes) -> Result<Vec<u8>> {
    // Read ZIP file to find central directory
    let mut offsets = find_offsets(apk_buf)?;
    let stripped;
    let apk_buf = match find_signing_block(apk_buf, &offsets)? {
        Some(old_block) => {
            debug!(start = old_block.start, "replacing existing APK Signing Block");
            stripped = [
                &apk_buf[..old_block.start],
                &apk_buf[offsets.cd_start..offsets.eocd_start],
                &eocd_with_cd_offset(&apk_buf[offsets.eocd_start..], old_block.start)?
            ]
            .concat();
            offsets = find_offsets(&stripped)?;
            &stripped[..]
        }
        None => apk_buf
    };
    // The digest sees the EOCD as if the signing block were the central
    // directory. In an unsigned zip that is already the case.
    let eocd = eocd_with_cd_offset(&apk_buf[offsets.eocd_start..], offsets.cd_start)?;
    // SHA-256 hash of ZIP contents (accounting for APK Signing Block)
    let top_level_hash = compute_top_level_hash(
        &apk_buf[..offsets.cd_start],
        &apk_buf[offsets.cd_start..offsets.eocd_start],
        &eocd
    );
    let signing_block = compute_signing_block(top_level_hash, keys, schemes)?;
    // Build up the final zip file again
    rebuild_zip_with_signing_block(&offsets, apk_buf, signing_block)
}
