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


use std::collections::BTreeMap;

use crate::crypto_keys::Keys;
use repack_common::*;
use tracing::debug;

/// Somewhere a signing identity can be loaded from.
pub trait KeyStore {
    fn load_identity(&self, alias: &str, store_password: &str, key_password: &str) -> Result<Keys>;
}

/// Combined PEM bundles (see [Keys::from_combined_pem_string]) addressed by
/// alias.
///
/// PEM has no store-level encryption, so the store password is not used. The
/// key password decrypts `ENCRYPTED PRIVATE KEY` sections.
#[derive(Debug, Clone, Default)]
pub struct PemKeyStore {
    entries: BTreeMap<String, String>,
    // Answers any alias
    default_entry: Option<String>
}

impl PemKeyStore {
    /// A store holding one bundle that is returned whatever alias is asked for.
    pub fn single(combined_pem: impl Into<String>) -> PemKeyStore {
        PemKeyStore {
            entries: BTreeMap::new(),
            default_entry: Some(combined_pem.into())
        }
    }

    pub fn with_entry(mut self, alias: &str, combined_pem: impl Into<String>) -> PemKeyStore {
        self.entries.insert(alias.to_string(), combined_pem.into());
        self
    }
}

impl KeyStore for PemKeyStore {
    fn load_identity(&self, alias: &str, _store_password: &str, key_password: &str) -> Result<Keys> {
        let pem = self
            .entries
            .get(alias)
            .or(self.default_entry.as_ref())
            .ok_or(PackError::SignerNoKeys)?;
        debug!(alias, "loading signing identity");
        Keys::from_combined_pem_string(pem, key_password)
    }
}

/// Hands out a freshly generated throwaway identity. Only for local testing,
/// see [Keys::generate_random_testing_keys].
#[cfg(feature = "cert-gen")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratedKeyStore;

#[cfg(feature = "cert-gen")]
impl KeyStore for GeneratedKeyStore {
    fn load_identity(&self, _alias: &str, _store_password: &str, _key_password: &str) -> Result<Keys> {
        Keys::generate_random_testing_keys()
    }
}
