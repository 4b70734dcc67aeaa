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
    crypto_keys::Keys,
    hasher::Sha256Hash,
    signing_types::{
        len_pfx_list, len_pfx_u32, len_pfx_u64, ApkSigningBlock, Digest, Signature,
        SignatureAlgorithmId::*, SignatureSchemeV2Block, SignatureSchemeV3Block, SignedData,
        Signer, SigningBlockIdValuePair, SigningBlockPairs, U32LengthPrefixed, V3SignedData,
        V3Signer
    }
};
use deku::DekuContainerWrite;
use repack_common::*;

// Constructs the Signed Data block for the V2 Scheme
// This is the data that gets signed by the crypto module
// It does not, itself, contain a cryptographic signature
impl SignedData {
    pub fn new(top_level_hash: Sha256Hash, keys: &Keys) -> Result<SignedData> {
        Ok(SignedData {
            digests: len_pfx_list(vec![Digest {
                digest: len_pfx_u32(top_level_hash)?,
                signature_algorithm_id: RsaSsaPkcs1v1_5WithSha2_256
            }])?,
            certificates: len_pfx_list(keys.certificates.clone())?,
            additional_attributes: 0
        })
    }
}

impl V3SignedData {
    pub fn from(v2_data: &SignedData, min_sdk: u32, max_sdk: u32) -> V3SignedData {
        V3SignedData {
            digests: v2_data.digests.clone(),
            certificates: v2_data.certificates.clone(),
            min_sdk,
            max_sdk,
            additional_attributes: v2_data.additional_attributes
        }
    }
}

type SignatureList = U32LengthPrefixed<Vec<U32LengthPrefixed<Signature>>>;

fn rsa_signatures(signature: Vec<u8>) -> Result<SignatureList> {
    len_pfx_list(vec![Signature {
        signature_algorithm_id: RsaSsaPkcs1v1_5WithSha2_256,
        signature: len_pfx_u32(signature)?
    }])
}

impl SignatureSchemeV2Block {
    pub fn new(
        signed_data: SignedData,
        signature: Vec<u8>,
        keys: &Keys
    ) -> Result<SignatureSchemeV2Block> {
        Ok(SignatureSchemeV2Block {
            signers: len_pfx_list(vec![Signer {
                signed_data: len_pfx_u32(signed_data)?,
                signatures: rsa_signatures(signature)?,
                public_key: len_pfx_u32(keys.pub_key_as_der()?)?
            }])?
        })
    }
}

impl SignatureSchemeV3Block {
    pub fn new(
        signed_data: V3SignedData,
        signature: Vec<u8>,
        keys: &Keys,
        min_sdk: u32,
        max_sdk: u32
    ) -> Result<SignatureSchemeV3Block> {
        Ok(SignatureSchemeV3Block {
            signers: len_pfx_list(vec![V3Signer {
                signed_data: len_pfx_u32(signed_data)?,
                min_sdk,
                max_sdk,
                signatures: rsa_signatures(signature)?,
                public_key: len_pfx_u32(keys.pub_key_as_der()?)?
            }])?
        })
    }
}

pub const SIGNATURE_SCHEME_V2_BLOCK_ID: u32 = 0x7109871A;
pub const SIGNATURE_SCHEME_V3_BLOCK_ID: u32 = 0xF05368C0;
pub const APK_SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

impl ApkSigningBlock {
    /// Wraps already-serialised scheme blocks, keyed by their block IDs.
    pub fn new(schemes: Vec<(u32, Vec<u8>)>) -> Result<ApkSigningBlock> {
        let pairs = SigningBlockPairs {
            pairs: schemes
                .into_iter()
                .map(|(id, value)| len_pfx_u64(SigningBlockIdValuePair { id, value }))
                .collect::<Result<Vec<_>>>()?
        };

        let pairs_length = pairs.to_bytes()?.len();
        // Plus size_of_self_counted plus magic
        let sig_block_size = (pairs_length + 8 + 16) as u64;

        Ok(ApkSigningBlock {
            size_of_self_not_counted: sig_block_size,
            pairs,
            size_of_self_counted: sig_block_size,
            magic: *APK_SIGNING_BLOCK_MAGIC
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes_and_magic() {
        let block = ApkSigningBlock::new(vec![(SIGNATURE_SCHEME_V2_BLOCK_ID, vec![1, 2, 3, 4])]).unwrap();
        let bytes = block.to_bytes().unwrap();
        // size(8) + pair length(8) + id(4) + value(4) + size(8) + magic(16)
        assert_eq!(bytes.len(), 48);
        assert_eq!(block.size_of_self_counted, 40);
        assert_eq!(&bytes[bytes.len() - 16..], APK_SIGNING_BLOCK_MAGIC);
        assert_eq!(&bytes[16..20], &SIGNATURE_SCHEME_V2_BLOCK_ID.to_le_bytes());
    }
}
