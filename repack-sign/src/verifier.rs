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


//! Re-reads a signed archive the way an installer would. Used after signing
//! as a sanity check; a failure here is reported, not fatal.

use std::{collections::BTreeMap, io::Cursor};

use byteorder::{ByteOrder, LittleEndian};
use repack_common::*;
use repack_zip::layout::is_signature_file;
use tracing::debug;

use crate::{
    crypto::verify_bytes,
    hasher::{compute_top_level_hash, eocd_with_cd_offset, Sha256Hash},
    signed_data_block::{SIGNATURE_SCHEME_V2_BLOCK_ID, SIGNATURE_SCHEME_V3_BLOCK_ID},
    signing_types::RSA_PKCS1_V1_5_WITH_SHA256_ID,
    v1_signing::{b64_digest, parse_digest_sections, MANIFEST_PATH},
    zip_parser::{find_offsets, find_signing_block},
    SigningSchemes
};

/// Which schemes were found and checked out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub v1: bool,
    pub v2: bool,
    pub v3: bool
}

fn failed(reason: impl Into<String>) -> PackError {
    PackError::VerificationFailed(reason.into())
}

/// Checks every scheme enabled in `schemes` against `apk`.
///
/// v2/v3: every signer's RSA signature over its signed data, and the
/// content digest recomputed over the archive. v1: the per-entry digests in
/// `MANIFEST.MF` and the manifest digest in the `.SF` file. The PKCS#7
/// signature of the `.SF` file is not re-checked.
pub fn verify_signed_archive(apk: &[u8], schemes: &SigningSchemes) -> Result<VerificationReport> {
    let mut report = VerificationReport::default();

    if schemes.v2 || schemes.v3 {
        let offsets = find_offsets(apk)?;
        let block = find_signing_block(apk, &offsets)?
            .ok_or_else(|| failed("archive has no APK Signing Block"))?;
        let eocd = eocd_with_cd_offset(&apk[offsets.eocd_start..], block.start)?;
        let digest = compute_top_level_hash(
            &apk[..block.start],
            &apk[offsets.cd_start..offsets.eocd_start],
            &eocd
        );

        for (id, value) in &block.pairs {
            match *id {
                SIGNATURE_SCHEME_V2_BLOCK_ID => {
                    verify_scheme_block(value, false, &digest)?;
                    report.v2 = true;
                }
                SIGNATURE_SCHEME_V3_BLOCK_ID => {
                    verify_scheme_block(value, true, &digest)?;
                    report.v3 = true;
                }
                other => debug!(id = other, "ignoring signing block pair")
            }
        }
        if schemes.v2 && !report.v2 {
            return Err(failed("v2 signature missing"));
        }
        if schemes.v3 && !report.v3 {
            return Err(failed("v3 signature missing"));
        }
    }

    if schemes.v1 {
        verify_v1(apk)?;
        report.v1 = true;
    }

    Ok(report)
}

/// Walks the nested length-prefixed sequences of a v2/v3 block.
struct PrefixedReader<'a> {
    data: &'a [u8]
}

impl<'a> PrefixedReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        PrefixedReader { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.data.len() < count {
            return Err(failed("signature block is truncated"));
        }
        let (head, rest) = self.data.split_at(count);
        self.data = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let length = self.u32()? as usize;
        self.take(length)
    }

    fn nested(&mut self) -> Result<PrefixedReader<'a>> {
        Ok(PrefixedReader::new(self.bytes()?))
    }
}

fn verify_scheme_block(block: &[u8], is_v3: bool, digest: &Sha256Hash) -> Result<()> {
    let scheme = if is_v3 { "v3" } else { "v2" };
    let mut signers = PrefixedReader::new(block).nested()?;
    if signers.is_empty() {
        return Err(failed(format!("{scheme} block has no signers")));
    }

    while !signers.is_empty() {
        let mut signer = signers.nested()?;
        let signed_data = signer.bytes()?;
        if is_v3 {
            // min and max SDK
            signer.take(8)?;
        }
        let mut signatures = signer.nested()?;
        let public_key = signer.bytes()?;

        let mut signature_checked = false;
        while !signatures.is_empty() {
            let mut signature = signatures.nested()?;
            let algorithm = signature.u32()?;
            let value = signature.bytes()?;
            if algorithm == RSA_PKCS1_V1_5_WITH_SHA256_ID {
                verify_bytes(public_key, signed_data, value)
                    .map_err(|e| failed(format!("{scheme} signature does not verify: {e}")))?;
                signature_checked = true;
            }
        }
        if !signature_checked {
            return Err(failed(format!("{scheme} signer has no supported signature")));
        }

        let mut digests = PrefixedReader::new(signed_data).nested()?;
        let mut digest_checked = false;
        while !digests.is_empty() {
            let mut entry = digests.nested()?;
            let algorithm = entry.u32()?;
            let value = entry.bytes()?;
            if algorithm == RSA_PKCS1_V1_5_WITH_SHA256_ID {
                if value != digest.as_slice() {
                    return Err(failed(format!("{scheme} content digest does not match")));
                }
                digest_checked = true;
            }
        }
        if !digest_checked {
            return Err(failed(format!("{scheme} signer has no supported digest")));
        }
    }
    Ok(())
}

fn verify_v1(apk: &[u8]) -> Result<()> {
    let entries = repack_zip::read_entries(Cursor::new(apk))?;
    let manifest = entries
        .iter()
        .find(|entry| entry.path == MANIFEST_PATH)
        .ok_or_else(|| failed("v1 manifest missing"))?;
    let listed: BTreeMap<String, String> =
        parse_digest_sections(&String::from_utf8_lossy(&manifest.data))
            .into_iter()
            .collect();

    for entry in entries.iter().filter(|entry| !is_signature_file(&entry.path)) {
        match listed.get(&entry.path) {
            Some(expected) if *expected == b64_digest(&entry.data) => {}
            Some(_) => return Err(failed(format!("v1 digest mismatch for {}", entry.path))),
            None => return Err(failed(format!("{} is not covered by the v1 manifest", entry.path)))
        }
    }

    let signature_file = entries
        .iter()
        .find(|entry| entry.path.starts_with("META-INF/") && entry.path.ends_with(".SF"))
        .ok_or_else(|| failed("v1 signature file missing"))?;
    let expected = format!("SHA-256-Digest-Manifest: {}", b64_digest(&manifest.data));
    if !String::from_utf8_lossy(&signature_file.data)
        .lines()
        .any(|line| line.trim_end() == expected)
    {
        return Err(failed("v1 signature file does not match the manifest"));
    }
    Ok(())
}
