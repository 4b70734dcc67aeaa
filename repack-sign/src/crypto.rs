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


use crate::crypto_keys::Keys;
use deku::DekuContainerWrite;
use repack_common::*;
use rsa::{pkcs8::DecodePublicKey, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

pub fn get_signature_for_signed_data<T: DekuContainerWrite>(
    signed_data: &T,
    keys: &Keys
) -> Result<Vec<u8>> {
    sign_bytes(&signed_data.to_bytes()?, keys)
}

/// RSASSA-PKCS1-v1_5 over the SHA-256 of `data`.
pub fn sign_bytes(data: &[u8], keys: &Keys) -> Result<Vec<u8>> {
    let digest = Sha256::digest(data);
    let padding = Pkcs1v15Sign::new::<Sha256>();
    Ok(keys.private_key.sign(padding, &digest)?)
}

/// Checks `signature` over `data` with a DER SubjectPublicKeyInfo.
pub fn verify_bytes(public_key_der: &[u8], data: &[u8], signature: &[u8]) -> Result<()> {
    let public_key = RsaPublicKey::from_public_key_der(public_key_der)?;
    let digest = Sha256::digest(data);
    public_key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)?;
    Ok(())
}
