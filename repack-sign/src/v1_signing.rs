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

//! Most of this package is concerned with APK Signature Scheme v2 and v3,
//! but this module handles Signature Scheme v1, aka. Signed JAR File format.

use base64::{prelude::BASE64_STANDARD, Engine};
use rasn::types::Integer::Primitive;
use rasn::types::Oid;
use rasn::{Decode, Encode};
use rasn_cms::algorithms::RSA;
use rasn_cms::ContentInfo;
use rasn_cms::{
    pkcs7_compat::SignedData, Certificate, CertificateChoices, IssuerAndSerialNumber,
    SignerIdentifier, SignerInfo
};
use repack_common::Result;
use repack_zip::ArchiveEntry;
use sha2::{Digest, Sha256};

use crate::{crypto::sign_bytes, crypto_keys::Keys, SigningSchemes};

const OID_SHA256: &Oid =
    rasn::types::Oid::JOINT_ISO_ITU_T_COUNTRY_US_ORGANIZATION_GOV_CSOR_NIST_ALGORITHMS_HASH_SHA256;
const OID_PKCS7_DATA: &Oid = rasn::types::Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_DATA;
const OID_PKCS7_SIGNED_DATA: &Oid = rasn::types::Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_SIGNED_DATA;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
const DEFAULT_SIGNER_NAME: &str = "CERT";
const MAX_SIGNER_NAME_LENGTH: usize = 8;

/// Turns a key alias into the base name of the `.SF`/`.RSA` pair, the way
/// jarsigner does: upper case, at most eight characters from `[A-Z0-9_-]`.
pub fn signer_file_stem(alias: &str) -> String {
    let stem: String = alias
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(MAX_SIGNER_NAME_LENGTH)
        .collect();
    if stem.is_empty() {
        DEFAULT_SIGNER_NAME.to_string()
    } else {
        stem
    }
}

/// Appends `MANIFEST.MF`, `<SIGNER>.SF` and `<SIGNER>.RSA` to `entries`.
///
/// Old signature files must already have been removed.
pub fn add_v1_signature_files(
    entries: &mut Vec<ArchiveEntry>,
    keys: &Keys,
    alias: &str,
    schemes: &SigningSchemes
) -> Result<()> {
    let signer = signer_file_stem(alias);
    // Create all META-INF files first so they don't hash themselves
    let manifest = create_manifest(entries);
    let sig_file = create_signature_file(entries, &manifest, schemes);
    let pkcs7_file = create_pkcs7_file(&sig_file, keys)?;
    // Then add them
    entries.push(ArchiveEntry::new(MANIFEST_PATH, manifest.into_bytes()));
    entries.push(ArchiveEntry::new(format!("META-INF/{signer}.SF"), sig_file.into_bytes()));
    entries.push(ArchiveEntry::new(format!("META-INF/{signer}.RSA"), pkcs7_file));
    Ok(())
}

fn create_pkcs7_file(sig_file: &str, keys: &Keys) -> Result<Vec<u8>> {
    let signature = sign_bytes(sig_file.as_bytes(), keys)?;

    let cert = Certificate::decode(&mut rasn::ber::de::Decoder::new(
        keys.signing_certificate(),
        rasn::ber::de::DecoderOptions::der()
    ))?;

    let signer_info = SignerInfo {
        version: Primitive(1),
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: cert.tbs_certificate.issuer.clone(),
            serial_number: cert.tbs_certificate.serial_number.clone()
        }),
        digest_algorithm: rasn_cms::AlgorithmIdentifier {
            algorithm: OID_SHA256.into(),
            parameters: None
        },
        signed_attrs: None,
        signature_algorithm: rasn_cms::AlgorithmIdentifier {
            algorithm: RSA.into(),
            parameters: None
        },
        signature: signature.into(),
        unsigned_attrs: None
    };

    let mut certificates = vec![CertificateChoices::Certificate(Box::new(cert))];
    for extra in keys.certificates.iter().skip(1) {
        let chain_cert = Certificate::decode(&mut rasn::ber::de::Decoder::new(
            extra,
            rasn::ber::de::DecoderOptions::der()
        ))?;
        certificates.push(CertificateChoices::Certificate(Box::new(chain_cert)));
    }

    let signed_data = SignedData {
        version: Primitive(1),
        digest_algorithms: vec![rasn_cms::AlgorithmIdentifier {
            algorithm: OID_SHA256.into(),
            parameters: None
        }]
        .into(),
        encap_content_info: rasn_cms::pkcs7_compat::EncapsulatedContentInfo {
            content_type: OID_PKCS7_DATA.into(),
            content: None
        },
        certificates: Some(certificates.into()),
        crls: None,
        signer_infos: vec![signer_info].into()
    };

    let mut inner_encoder = rasn::der::enc::Encoder::new(rasn::der::enc::EncoderOptions::der());
    signed_data.encode(&mut inner_encoder)?;
    let inner_vec = inner_encoder.output();

    let wrapper = ContentInfo {
        content_type: OID_PKCS7_SIGNED_DATA.into(),
        content: rasn::types::Any::new(inner_vec)
    };

    let mut outer_encoder = rasn::der::enc::Encoder::new(rasn::der::enc::EncoderOptions::der());
    wrapper.encode(&mut outer_encoder)?;

    Ok(outer_encoder.output())
}

/// The `X-Android-APK-Signed` value: which newer schemes a v1 verifier should
/// expect, so stripping them is detected.
fn apk_signed_header(schemes: &SigningSchemes) -> Option<&'static str> {
    match (schemes.v2, schemes.v3) {
        (true, true) => Some("2, 3"),
        (true, false) => Some("2"),
        (false, true) => Some("3"),
        (false, false) => None
    }
}

fn create_signature_file(entries: &[ArchiveEntry], manifest: &str, schemes: &SigningSchemes) -> String {
    let manifest_digest = b64_digest(manifest);
    let mut output_sig = format!(
        "Signature-Version: 1.0\r\nCreated-By: 1.0 (Android)\r\nSHA-256-Digest-Manifest: {manifest_digest}\r\n"
    );
    if let Some(signed) = apk_signed_header(schemes) {
        output_sig.push_str(&format!("X-Android-APK-Signed: {signed}\r\n"));
    }
    output_sig.push_str("\r\n");

    for entry in entries {
        let file_name = &entry.path;
        let digest = b64_digest(create_manifest_entry(entry));
        output_sig.push_str(&format!("Name: {file_name}\r\nSHA-256-Digest: {digest}\r\n\r\n"));
    }

    output_sig
}

fn create_manifest(entries: &[ArchiveEntry]) -> String {
    let mut output_manifest = "Manifest-Version: 1.0\r\nCreated-By: 1.0 (Android)\r\n\r\n".to_string();

    for entry in entries {
        output_manifest.push_str(&create_manifest_entry(entry));
    }

    output_manifest
}

// Also used in the generation of the .SF file
fn create_manifest_entry(entry: &ArchiveEntry) -> String {
    let file_name = &entry.path;
    let b64_digest = b64_digest(&entry.data);
    format!("Name: {file_name}\r\nSHA-256-Digest: {b64_digest}\r\n\r\n")
}

pub(crate) fn b64_digest(input: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(input);
    BASE64_STANDARD.encode(digest)
}

/// Parses `Name:`/`SHA-256-Digest:` sections of a manifest or `.SF` file.
/// Continuation lines (leading space) are folded back in.
pub(crate) fn parse_digest_sections(text: &str) -> Vec<(String, String)> {
    let mut unfolded: Vec<String> = vec![];
    for line in text.split("\r\n").flat_map(|line| line.split('\n')) {
        match (line.strip_prefix(' '), unfolded.last_mut()) {
            (Some(continuation), Some(previous)) => previous.push_str(continuation),
            _ => unfolded.push(line.to_string())
        }
    }

    let mut sections = vec![];
    let mut name: Option<String> = None;
    for line in unfolded {
        if let Some(value) = line.strip_prefix("Name: ") {
            name = Some(value.to_string());
        } else if let Some(digest) = line.strip_prefix("SHA-256-Digest: ") {
            if let Some(name) = name.take() {
                sections.push((name, digest.to_string()));
            }
        } else if line.is_empty() {
            name = None;
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto_keys::tests::testing_keys;
    use test_case::test_case;

    #[test_case("release", "RELEASE")]
    #[test_case("my key alias", "MY_KEY_A")]
    #[test_case("", "CERT")]
    #[test_case("a.b-c", "A_B-C")]
    fn signer_names(alias: &str, expected: &str) {
        assert_eq!(signer_file_stem(alias), expected);
    }

    #[test]
    fn signature_files_are_appended() {
        let mut entries = vec![
            ArchiveEntry::new("AndroidManifest.xml", vec![1, 2, 3]),
            ArchiveEntry::new("classes.dex", vec![4, 5, 6]),
        ];
        add_v1_signature_files(&mut entries, &testing_keys(), "release", &SigningSchemes::default()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec![
            "AndroidManifest.xml",
            "classes.dex",
            "META-INF/MANIFEST.MF",
            "META-INF/RELEASE.SF",
            "META-INF/RELEASE.RSA"
        ]);

        let manifest = String::from_utf8(entries[2].data.clone()).unwrap();
        let sections = parse_digest_sections(&manifest);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1], ("classes.dex".to_string(), b64_digest([4, 5, 6])));

        let sig_file = String::from_utf8(entries[3].data.clone()).unwrap();
        assert!(sig_file.contains(&format!("SHA-256-Digest-Manifest: {}", b64_digest(&manifest))));
        assert!(sig_file.contains("X-Android-APK-Signed: 2\r\n"));
    }

    #[test_case(true, true, Some("2, 3"))]
    #[test_case(true, false, Some("2"))]
    #[test_case(false, false, None)]
    fn scheme_header(v2: bool, v3: bool, expected: Option<&str>) {
        let schemes = SigningSchemes { v1: true, v2, v3 };
        assert_eq!(apk_signed_header(&schemes), expected);
    }

    #[test]
    fn folded_lines_are_rejoined() {
        let text = "Name: a/very/long/path/that/jar\r\n tools/wrap.txt\r\nSHA-256-Digest: abc=\r\n\r\n";
        assert_eq!(
            parse_digest_sections(text),
            vec![("a/very/long/path/that/jartools/wrap.txt".to_string(), "abc=".to_string())]
        );
    }
}
