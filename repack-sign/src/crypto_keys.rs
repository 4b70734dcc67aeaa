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


use repack_common::*;
use rsa::{
    pkcs8::{DecodePrivateKey, EncodePublicKey},
    RsaPrivateKey, RsaPublicKey
};
use tracing::warn;

/// Holds the certificate chain and RSA Private Key used for signing.
#[derive(Clone)]
pub struct Keys {
    /// X.509 certificates in ASN.1 DER form, signing certificate first
    pub certificates: Vec<Vec<u8>>,
    /// RSA Public Key
    pub public_key: RsaPublicKey,
    /// RSA Private Key
    pub private_key: RsaPrivateKey
}

impl Keys {
    /// Parses and creates an instance of [Keys] from a `.pem` file.
    ///
    /// "Combined" in this case means that the one file has one or more `BEGIN
    /// CERTIFICATE` sections and a `BEGIN PRIVATE KEY` (or `BEGIN ENCRYPTED
    /// PRIVATE KEY`) section as one long UTF-8 string. An encrypted key is
    /// decrypted with `key_password`.
    ///
    /// If you don't have one of these, use [generate_random_testing_keys](Keys::generate_random_testing_keys).
    pub fn from_combined_pem_string(combined_pem: &str, key_password: &str) -> Result<Keys> {
        let mut certificates = vec![];
        let mut private_key = None;
        for pem_part in pem::parse_many(combined_pem)? {
            let tag = pem_part.tag().to_string();
            match tag.as_str() {
                "CERTIFICATE" => certificates.push(pem_part.into_contents()),
                "PRIVATE KEY" => {
                    private_key = Some(RsaPrivateKey::from_pkcs8_der(pem_part.contents())?)
                }
                "ENCRYPTED PRIVATE KEY" => {
                    private_key = Some(RsaPrivateKey::from_pkcs8_encrypted_der(
                        pem_part.contents(),
                        key_password
                    )?)
                }
                other => warn!(tag = other, "ignoring unexpected PEM section")
            }
        }

        let private_key = private_key.ok_or(PackError::SignerNoKeys)?;
        if certificates.is_empty() {
            return Err(PackError::SignerNoKeys);
        }
        let public_key = RsaPublicKey::from(&private_key);

        Ok(Keys {
            certificates,
            public_key,
            private_key
        })
    }

    /// Randomly generates RSA signing keys and an accompanying certificate.
    ///
    /// This API is only enabled when the optional "cert-gen" feature is enabled
    /// for repack-sign (it's on by default). It introduces a non-trivial amount
    /// of extra dependencies and includes ASM/C code.
    ///
    /// It is also slow. Generating a 2048-bit key routinely takes longer than
    /// the rest of a repack, so load real keys with
    /// [Keys::from_combined_pem_string] wherever possible.
    ///
    /// # Why shouldn't we always do this?
    ///
    /// Android only installs an update over an existing app when both are
    /// signed by the same certificate. A throwaway identity means every
    /// repackaged build has to be uninstalled before the next one goes on.
    #[cfg(feature = "cert-gen")]
    pub fn generate_random_testing_keys() -> Result<Keys> {
        // These dependencies only exist when compiled with cert-gen
        use rand::prelude::*;
        use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};

        warn!("randomly generating a placeholder signing key, this is slow");

        // Randomly generate an RSA Private Key, derive its Public Key,
        // and prepare it for passing over to the rcgen library.
        let private_key = RsaPrivateKey::new(&mut thread_rng(), 2048)?;
        let public_key = RsaPublicKey::from(&private_key);
        let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF)?.to_string();

        let generation_failed = |e: rcgen::Error| PackError::SignerCertificateGenerationFailed(e.to_string());
        // Self-sign an X.509 certificate using the random keys
        let key_pair = KeyPair::from_pem(&private_key_pem).map_err(generation_failed)?;
        // We sign all testing certificates as our crate name
        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, env!("CARGO_PKG_NAME"));
        let mut cert_params = CertificateParams::new(vec![]).map_err(generation_failed)?;
        cert_params.distinguished_name = distinguished_name;
        let cert = cert_params.self_signed(&key_pair).map_err(generation_failed)?;

        Ok(Self {
            certificates: vec![cert.der().to_vec()],
            private_key,
            public_key
        })
    }

    /// The certificate whose key produced the signatures.
    pub fn signing_certificate(&self) -> &[u8] {
        // Construction guarantees at least one certificate
        self.certificates.first().map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the RSA Public Key encoded in ASN.1 DER format.
    pub fn pub_key_as_der(&self) -> Result<Vec<u8>> {
        Ok(self.public_key.to_public_key_der()?.as_ref().to_vec())
    }
}

impl std::fmt::Debug for Keys {
    // Never print key material
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("certificates", &self.certificates.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use std::sync::OnceLock;

    /// Key generation is slow enough that the whole test binary shares one
    /// identity.
    pub(crate) fn testing_keys() -> Keys {
        static KEYS: OnceLock<Keys> = OnceLock::new();
        KEYS.get_or_init(|| Keys::generate_random_testing_keys().unwrap())
            .clone()
    }

    fn certificate_pem(keys: &Keys) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", keys.certificates[0].clone()))
    }

    #[test]
    fn combined_pem_round_trips() {
        let keys = testing_keys();
        let combined = format!(
            "{}{}",
            certificate_pem(&keys),
            keys.private_key.to_pkcs8_pem(LineEnding::LF).unwrap().as_str()
        );
        let parsed = Keys::from_combined_pem_string(&combined, "").unwrap();
        assert_eq!(parsed.certificates, keys.certificates);
        assert_eq!(parsed.public_key, keys.public_key);
    }

    #[test]
    fn encrypted_keys_need_the_right_password() {
        let keys = testing_keys();
        let encrypted = keys
            .private_key
            .to_pkcs8_encrypted_pem(&mut rand::thread_rng(), "hunter2", LineEnding::LF)
            .unwrap();
        let combined = format!("{}{}", certificate_pem(&keys), encrypted.as_str());

        let parsed = Keys::from_combined_pem_string(&combined, "hunter2").unwrap();
        assert_eq!(parsed.public_key, keys.public_key);
        assert!(matches!(
            Keys::from_combined_pem_string(&combined, "wrong"),
            Err(PackError::SignerRsaPrivateKeyParsingFailed(_))
        ));
    }

    #[test]
    fn missing_sections_are_reported() {
        let keys = testing_keys();
        assert!(matches!(
            Keys::from_combined_pem_string(&certificate_pem(&keys), ""),
            Err(PackError::SignerNoKeys)
        ));
        let key_only = keys.private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
        assert!(matches!(
            Keys::from_combined_pem_string(key_only.as_str(), ""),
            Err(PackError::SignerNoKeys)
        ));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let text = format!("{:?}", testing_keys());
        assert!(text.contains("certificates"));
        assert!(!text.contains("private_key"));
    }
}
