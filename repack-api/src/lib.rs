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


//! # REPACK API
//!
//! This crate exposes the pipeline that turns an installed app's APK into a
//! patched, re-signed copy.
//!
//! ## Repackaging an APK
//!
//! ```ignore
//! let inputs = RepackInputs {
//!     source_archive: "base.apk".into(),
//!     payload: "payload.dex".into(),
//!     config_file: "settings.json".into(),
//!     native_lib_dir: "libs".into(),
//!     data_bundle: None,
//!     key_store: &PemKeyStore::single(fs::read_to_string("keys.pem")?),
//!     alias: "release".into(),
//!     store_password: String::new(),
//!     key_password: String::new(),
//!     work_dir: std::env::temp_dir(),
//!     schemes: SigningSchemes::default()
//! };
//! let mut out = File::create("clone.apk")?;
//! let report = repackage(&inputs, &mut out)?;
//! ```
//!
//! The whole run is sequential. Its scratch files live in a fresh
//! subdirectory of `work_dir` that is removed before `repackage` returns,
//! whether it succeeded or not.

use std::{
    fs::{self, File},
    io::{self, BufReader, Cursor, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH}
};

use repack_manifest::{patch_manifest, AttrKey, PatchTier};
use repack_sign::{sign_archive, verify_signed_archive, VerificationReport};
use repack_zip::{extract_archive, read_manifest, write_archive};
use tempfile::TempDir;
use tracing::{info, warn};

pub mod config;
pub mod payload;

pub use config::{CloneMode, Config};
pub use payload::{StagingReport, StagingSkip};
pub use repack_common::{ErrorKind, PackError, Result};
pub use repack_sign::{crypto_keys::Keys, KeyStore, PemKeyStore, SigningSchemes};
#[cfg(feature = "cert-gen")]
pub use repack_sign::key_store::GeneratedKeyStore;

/// Everything one repackaging run consumes.
pub struct RepackInputs<'a> {
    /// The APK to repackage
    pub source_archive: PathBuf,
    /// Dex file injected as the next `classes<N>.dex`
    pub payload: PathBuf,
    /// Settings JSON. Parsed as [Config] and also shipped inside the APK.
    pub config_file: PathBuf,
    /// Native libraries laid out as `<abi>/*.so`
    pub native_lib_dir: PathBuf,
    pub data_bundle: Option<PathBuf>,
    pub key_store: &'a dyn KeyStore,
    pub alias: String,
    pub store_password: String,
    pub key_password: String,
    /// Parent of the per-run scratch directory. Created if missing.
    pub work_dir: PathBuf,
    pub schemes: SigningSchemes
}

/// How the run went. Only produced when a signed APK reached the sink.
#[derive(Debug)]
pub struct RepackReport {
    /// Final package name, if the patched manifest could be read back.
    pub package: Option<String>,
    pub patch_tier: PatchTier,
    /// Errors that pushed the patcher down a tier
    pub patch_failures: Vec<(PatchTier, PackError)>,
    pub dropped_signatures: Vec<String>,
    pub staging: StagingReport,
    /// `None` when the signed APK did not verify.
    pub verification: Option<VerificationReport>,
    pub bytes_written: u64
}

/// Reads, patches, restages, re-signs and writes one APK to `sink`.
///
/// Either the complete signed APK is written to `sink` and a report is
/// returned, or nothing is written and the one fatal error is. Manifest patch
/// failures and verification failures are reported, not raised.
pub fn repackage(inputs: &RepackInputs, sink: &mut dyn Write) -> Result<RepackReport> {
    let invocation = invocation_dir(&inputs.work_dir)?;
    let report = run_pipeline(inputs, invocation.path(), sink);
    // TempDir would also clean up on drop, but that swallows errors
    if let Err(err) = invocation.close() {
        warn!("Failed to remove scratch directory: {err}");
    }
    report
}

fn run_pipeline(inputs: &RepackInputs, invocation: &Path, sink: &mut dyn Write) -> Result<RepackReport> {
    let scratch_root = invocation.join("scratch");
    fs::create_dir(&scratch_root)?;

    let config_json = fs::read(&inputs.config_file)?;
    let config = Config::from_json_slice(&config_json)?;

    // Read
    let source = BufReader::new(File::open(&inputs.source_archive)?);
    let extracted = extract_archive(source, &scratch_root)?;
    info!(
        "Extracted {} entries, dropped {} signature files",
        extracted.retained.len(),
        extracted.dropped_signatures.len()
    );

    // Patch
    let outcome = patch_manifest(&extracted.manifest, &config.patch_options());
    if outcome.tier != PatchTier::Full {
        warn!("Manifest patched at {:?} tier", outcome.tier);
    }

    // Assemble
    let staging = payload::assemble(
        &scratch_root,
        &extracted.payload_indices,
        &extracted.abis,
        &payload::StagingSources {
            payload: &inputs.payload,
            config_json: &config_json,
            native_lib_dir: &inputs.native_lib_dir,
            data_bundle: inputs.data_bundle.as_deref()
        }
    )?;

    // Write
    let mut unsigned = Cursor::new(vec![]);
    write_archive(&scratch_root, &outcome.manifest, &mut unsigned)?;
    let unsigned_path = invocation.join("unsigned.apk");
    fs::write(&unsigned_path, unsigned.get_ref())?;
    fs::remove_dir_all(&scratch_root)?;

    // Sign
    let keys = inputs.key_store.load_identity(
        &inputs.alias,
        &inputs.store_password,
        &inputs.key_password
    )?;
    let signed = sign_archive(&fs::read(&unsigned_path)?, &keys, &inputs.alias, &inputs.schemes)?;
    fs::remove_file(&unsigned_path)?;

    let verification = match verify_signed_archive(&signed, &inputs.schemes) {
        Ok(report) => Some(report),
        Err(err) => {
            warn!("Signed APK did not verify: {err}");
            None
        }
    };

    // Publish
    let signed_path = invocation.join("signed.apk");
    fs::write(&signed_path, &signed)?;
    let bytes_written = publish(&signed_path, sink)?;
    fs::remove_file(&signed_path)?;
    info!("Wrote {bytes_written} bytes");

    Ok(RepackReport {
        package: package_name(&outcome.manifest),
        patch_tier: outcome.tier,
        patch_failures: outcome.failures,
        dropped_signatures: extracted.dropped_signatures,
        staging,
        verification,
        bytes_written
    })
}

/// Renders the binary `AndroidManifest.xml` of an APK as indented text XML.
pub fn dump_manifest(apk: &Path) -> Result<String> {
    let manifest = read_manifest(BufReader::new(File::open(apk)?))?;
    repack_manifest::manifest_to_text(&manifest)
}

fn invocation_dir(work_dir: &Path) -> Result<TempDir> {
    fs::create_dir_all(work_dir)?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    Ok(tempfile::Builder::new()
        .prefix(&format!("repack-{nanos}-"))
        .tempdir_in(work_dir)?)
}

fn publish(signed_path: &Path, sink: &mut dyn Write) -> Result<u64> {
    let mut signed = File::open(signed_path)?;
    let sink_error = |err: io::Error| PackError::OutputSinkUnavailable(err.into());
    let written = io::copy(&mut signed, sink).map_err(sink_error)?;
    sink.flush().map_err(sink_error)?;
    Ok(written)
}

fn package_name(manifest: &[u8]) -> Option<String> {
    let document = repack_manifest::decode_document(manifest).ok()?;
    document
        .root
        .string(AttrKey::plain("package"))
        .map(String::from)
}
