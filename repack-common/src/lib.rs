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


use std::{io, sync::Arc};

use deku::prelude::*;
use rsa::pkcs8;
use thiserror::Error;
use zip::result::ZipError;

/// Common error type making it easier to share `Result`s between repack crates.
///
/// In general designed to avoid needing utilities like `map_err`. Foreign
/// errors that are not `Clone` are wrapped in [Arc] so the whole type stays
/// `Clone` and can be handed back from a background worker.
#[derive(Debug, Clone, Error)]
pub enum PackError {
    /// repack-cli encountered an error while processing something specific to
    /// the command line implementation, such as an unreadable key file.
    #[error("command line error: {0}")]
    Cli(String),
    /// The source archive has no `AndroidManifest.xml` entry.
    #[error("archive does not contain AndroidManifest.xml")]
    MissingManifest,
    /// The source archive already uses the highest possible `classes<N>.dex`
    /// index, so there is no free slot for the injected payload.
    #[error("no payload index left after classes{0}.dex")]
    PayloadIndexExhausted(u32),
    /// An archive entry name (or a staged file name) would resolve outside of
    /// the scratch directory it is being extracted into.
    #[error("path traversal detected for entry {0:?}")]
    PathTraversal(String),
    /// The manifest decoded, but its root is not `<manifest>` or it has no
    /// `<application>` child.
    #[error("document is not an Android manifest")]
    NotAManifest,
    /// A required element was missing from the manifest tree.
    #[error("manifest is missing required element <{0}>")]
    MissingElement(String),
    /// The binary XML could not be decoded. The message names the structure
    /// that was truncated or inconsistent.
    #[error("malformed binary XML: {0}")]
    MalformedBinaryXml(String),
    /// Only UTF-8 string pools are written. In this format string lengths are
    /// stored in 15 bits, meaning the maximum supported string length is
    /// `0x7FFF` bytes.
    #[error("string pool entry is too long ({} bytes)", .0.len())]
    StringPoolStringTooLong(String),
    /// A requested package name does not follow the `segment.segment` rules.
    #[error("invalid package name {0:?}")]
    InvalidPackageName(String),
    /// The display-name override was blank.
    #[error("display name override is blank")]
    InvalidDisplayName,
    /// Serialising one of the binary structures failed. See [DekuError].
    #[error("byte serialisation failed: {0}")]
    ByteSerialisationFailed(DekuError),
    /// Rendering a manifest as text XML failed.
    #[error("XML writing failed: {0}")]
    XmlWritingFailed(String),
    /// The settings JSON handed to the pipeline could not be parsed.
    #[error("config parsing failed: {0}")]
    ConfigParsingFailed(Arc<serde_json::Error>),
    /// An error occurred while reading or writing the scratch directory or one
    /// of the input files.
    #[error("I/O error: {0}")]
    FileIoError(Arc<io::Error>),
    /// The caller's output sink refused the signed archive.
    #[error("output sink unavailable: {0}")]
    OutputSinkUnavailable(Arc<io::Error>),
    /// The zip crate failed to read or write an archive.
    #[error("zip error: {0}")]
    ZipFailed(Arc<ZipError>),
    /// The APK Signature Scheme v2/v3 code failed to find the ZIP End Of
    /// Central Directory marker within the zip file.
    #[error("could not locate the zip central directory")]
    SignerZipParsingFailed,
    /// An error occurred while trying to instantiate a `Keys` object from a
    /// `.pem` string.
    #[error("PEM parsing failed: {0}")]
    SignerPemParsingFailed(Arc<pem::PemError>),
    /// The key store was readable, but it was missing either a certificate or
    /// private key.
    #[error("key store has no usable private key and certificate")]
    SignerNoKeys,
    /// Every signature scheme was switched off.
    #[error("no signature scheme enabled")]
    SignerNoSchemesEnabled,
    /// The `PRIVATE KEY` in the `.pem` was present, but it wasn't an RSA
    /// Private Key, or the key password could not decrypt it.
    #[error("RSA private key parsing failed: {0}")]
    SignerRsaPrivateKeyParsingFailed(pkcs8::Error),
    /// An error occurred while signing a hash, see [rsa::Error].
    #[error("RSA signing failed: {0}")]
    SignerRsaSigningFailed(Arc<rsa::Error>),
    /// An error occurred while serialising the RSA key, see
    /// [pkcs8::spki::Error].
    #[error("RSA key serialisation failed: {0}")]
    SignerRsaKeySerialisationFailed(pkcs8::spki::Error),
    /// The signing certificate couldn't be decoded for V1 signing.
    #[error("certificate decoding failed: {0}")]
    SignerCertificateDecodingFailed(Arc<rasn::error::DecodeError>),
    /// V1 Signing data couldn't be serialised
    #[error("PKCS#7 encoding failed: {0}")]
    SignerPKCS7EncodingFailed(Arc<rasn::error::EncodeError>),
    /// A throwaway testing certificate could not be generated.
    #[error("certificate generation failed: {0}")]
    SignerCertificateGenerationFailed(String),
    /// A signed archive did not pass verification.
    #[error("signature verification failed: {0}")]
    VerificationFailed(String)
}

/// Where an error sits in the pipeline's failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid manifest, path traversal. Always fatal.
    Structural,
    /// Raised while patching the manifest. Absorbed by the tier controller.
    PatchDegradation,
    /// Key material or signing library failure. Always fatal.
    Signing,
    /// Post-signing verification. Never fatal.
    Verification,
    /// Disk, zip container or sink failures. Always fatal.
    Io
}

impl PackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PackError::MissingManifest
            | PackError::PathTraversal(_)
            | PackError::PayloadIndexExhausted(_)
            | PackError::NotAManifest
            | PackError::MissingElement(_)
            | PackError::MalformedBinaryXml(_) => ErrorKind::Structural,
            PackError::StringPoolStringTooLong(_)
            | PackError::InvalidPackageName(_)
            | PackError::InvalidDisplayName
            | PackError::ByteSerialisationFailed(_)
            | PackError::XmlWritingFailed(_) => ErrorKind::PatchDegradation,
            PackError::SignerZipParsingFailed
            | PackError::SignerPemParsingFailed(_)
            | PackError::SignerNoKeys
            | PackError::SignerNoSchemesEnabled
            | PackError::SignerRsaPrivateKeyParsingFailed(_)
            | PackError::SignerRsaSigningFailed(_)
            | PackError::SignerRsaKeySerialisationFailed(_)
            | PackError::SignerCertificateDecodingFailed(_)
            | PackError::SignerPKCS7EncodingFailed(_)
            | PackError::SignerCertificateGenerationFailed(_) => ErrorKind::Signing,
            PackError::VerificationFailed(_) => ErrorKind::Verification,
            PackError::Cli(_)
            | PackError::ConfigParsingFailed(_)
            | PackError::FileIoError(_)
            | PackError::OutputSinkUnavailable(_)
            | PackError::ZipFailed(_) => ErrorKind::Io
        }
    }

    /// Whether this error is allowed to cross the pipeline boundary.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::PatchDegradation | ErrorKind::Verification
        )
    }
}

/// Result type where the error is always [PackError].
pub type Result<T> = std::result::Result<T, PackError>;

impl From<PackError> for String {
    fn from(value: PackError) -> Self {
        value.to_string()
    }
}

// Automatic conversion from other types of error to PackError makes the rest of the code cleaner
impl From<io::Error> for PackError {
    fn from(value: io::Error) -> Self {
        PackError::FileIoError(value.into())
    }
}

impl From<DekuError> for PackError {
    fn from(value: DekuError) -> Self {
        PackError::ByteSerialisationFailed(value)
    }
}

impl From<xml::writer::Error> for PackError {
    fn from(value: xml::writer::Error) -> Self {
        PackError::XmlWritingFailed(value.to_string())
    }
}

impl From<serde_json::Error> for PackError {
    fn from(value: serde_json::Error) -> Self {
        PackError::ConfigParsingFailed(value.into())
    }
}

impl From<ZipError> for PackError {
    fn from(value: ZipError) -> Self {
        PackError::ZipFailed(value.into())
    }
}

impl From<pem::PemError> for PackError {
    fn from(value: pem::PemError) -> Self {
        PackError::SignerPemParsingFailed(value.into())
    }
}

impl From<pkcs8::Error> for PackError {
    fn from(value: pkcs8::Error) -> Self {
        PackError::SignerRsaPrivateKeyParsingFailed(value)
    }
}

impl From<rsa::Error> for PackError {
    fn from(value: rsa::Error) -> Self {
        PackError::SignerRsaSigningFailed(value.into())
    }
}

impl From<pkcs8::spki::Error> for PackError {
    fn from(value: pkcs8::spki::Error) -> Self {
        PackError::SignerRsaKeySerialisationFailed(value)
    }
}

impl From<rasn::error::DecodeError> for PackError {
    fn from(value: rasn::error::DecodeError) -> Self {
        PackError::SignerCertificateDecodingFailed(value.into())
    }
}

impl From<rasn::error::EncodeError> for PackError {
    fn from(value: rasn::error::EncodeError) -> Self {
        PackError::SignerPKCS7EncodingFailed(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_and_are_fatal() {
        let err: PackError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, PackError::FileIoError(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.is_fatal());
    }

    #[test]
    fn patch_errors_are_not_fatal() {
        assert_eq!(
            PackError::InvalidDisplayName.kind(),
            ErrorKind::PatchDegradation
        );
        assert!(!PackError::InvalidDisplayName.is_fatal());
        assert!(!PackError::VerificationFailed("digest".into()).is_fatal());
    }

    #[test]
    fn structural_and_signing_errors_are_fatal() {
        assert_eq!(
            PackError::PathTraversal("../x".into()).kind(),
            ErrorKind::Structural
        );
        assert!(PackError::MissingManifest.is_fatal());
        assert_eq!(PackError::SignerNoKeys.kind(), ErrorKind::Signing);
        assert!(PackError::SignerNoKeys.is_fatal());
    }

    #[test]
    fn messages_name_the_offending_entry() {
        let err = PackError::PathTraversal("../../etc/passwd".into());
        assert!(err.to_string().contains("../../etc/passwd"));
    }
}
