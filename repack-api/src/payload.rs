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


//! Stages the files the repackaged APK gains: the injected payload, its
//! config, an optional data bundle and the native libraries.

use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::Read,
    num::NonZeroU32,
    path::Path
};

use repack_common::*;
use repack_zip::{
    layout::{payload_entry_name, NATIVE_LIB_EXTENSION, NATIVE_LIB_ROOT},
    path_safety::prepare_destination
};
use tracing::{debug, info, warn};

/// Used when the source has no numbered payloads. Leaves `classes.dex` alone.
pub const FALLBACK_PAYLOAD_INDEX: u32 = 2;
pub const CONFIG_ENTRY: &str = "assets/repack_config.json";
pub const DATA_BUNDLE_ENTRY: &str = "assets/repack_data.zip";
pub const MAX_DATA_BUNDLE_SIZE: u64 = 100 * 1024 * 1024;
pub const SUPPORTED_ABIS: [&str; 2] = ["arm64-v8a", "armeabi-v7a"];

// Local file header, central directory header, end of central directory
const BUNDLE_MAGICS: [[u8; 4]; 3] = [*b"PK\x03\x04", *b"PK\x01\x02", *b"PK\x05\x06"];

/// Why the data bundle was left out. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingSkip {
    Oversized { size: u64 },
    UnrecognisedMagic,
    Unreadable(String)
}

/// Everything [assemble] added to the scratch root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingReport {
    pub payload_entry: String,
    pub data_bundle_skipped: Option<StagingSkip>,
    pub native_libs: Vec<String>
}

/// Where the files to stage come from.
#[derive(Debug, Clone, Copy)]
pub struct StagingSources<'a> {
    pub payload: &'a Path,
    pub config_json: &'a [u8],
    /// Laid out as `<abi>/*.so`
    pub native_lib_dir: &'a Path,
    pub data_bundle: Option<&'a Path>
}

pub fn next_payload_index(existing: &BTreeSet<u32>) -> Result<NonZeroU32> {
    let next = match existing.last() {
        Some(&highest) => highest
            .checked_add(1)
            .ok_or(PackError::PayloadIndexExhausted(highest))?,
        None => FALLBACK_PAYLOAD_INDEX
    };
    NonZeroU32::new(next).ok_or(PackError::PayloadIndexExhausted(next))
}

/// The ABIs to ship libraries for: the supported ones the source already
/// has, or all of them for an APK without native code.
pub fn select_abis(observed: &BTreeSet<String>) -> Vec<&'static str> {
    if observed.is_empty() {
        return SUPPORTED_ABIS.to_vec();
    }
    SUPPORTED_ABIS
        .into_iter()
        .filter(|abi| observed.contains(*abi))
        .collect()
}

/// Copies the payload in as `classes<index>.dex` and returns the entry name.
pub fn stage_payload(scratch_root: &Path, payload: &Path, index: NonZeroU32) -> Result<String> {
    let name = payload_entry_name(index);
    let destination = prepare_destination(scratch_root, &name)?;
    fs::copy(payload, destination)?;
    info!("Staged payload as {name}");
    Ok(name)
}

pub fn stage_config(scratch_root: &Path, config_json: &[u8]) -> Result<()> {
    fs::write(prepare_destination(scratch_root, CONFIG_ENTRY)?, config_json)?;
    debug!("Staged {CONFIG_ENTRY} ({} bytes)", config_json.len());
    Ok(())
}

/// Checks size and magic without reading the whole bundle.
pub fn inspect_data_bundle(bundle: &Path) -> std::result::Result<(), StagingSkip> {
    let unreadable = |e: std::io::Error| StagingSkip::Unreadable(e.to_string());
    let size = fs::metadata(bundle).map_err(unreadable)?.len();
    if size > MAX_DATA_BUNDLE_SIZE {
        return Err(StagingSkip::Oversized { size });
    }
    let mut magic = [0u8; 4];
    File::open(bundle)
        .and_then(|mut file| file.read_exact(&mut magic))
        .map_err(|_e| StagingSkip::UnrecognisedMagic)?;
    if !BUNDLE_MAGICS.contains(&magic) {
        return Err(StagingSkip::UnrecognisedMagic);
    }
    Ok(())
}

/// Copies the bundle to [DATA_BUNDLE_ENTRY] if it passes
/// [inspect_data_bundle]. A rejected bundle is returned, not raised.
pub fn stage_data_bundle(scratch_root: &Path, bundle: &Path) -> Result<Option<StagingSkip>> {
    if let Err(skip) = inspect_data_bundle(bundle) {
        warn!("Skipping data bundle {}: {skip:?}", bundle.display());
        return Ok(Some(skip));
    }
    fs::copy(bundle, prepare_destination(scratch_root, DATA_BUNDLE_ENTRY)?)?;
    info!("Staged {DATA_BUNDLE_ENTRY}");
    Ok(None)
}

/// Copies every `<lib_dir>/<abi>/*.so` to `lib/<abi>/` for each of `abis`.
/// Returns the new entry names.
pub fn stage_native_libs(scratch_root: &Path, lib_dir: &Path, abis: &[&str]) -> Result<Vec<String>> {
    let mut staged = vec![];
    for abi in abis {
        let abi_dir = lib_dir.join(abi);
        let files = match fs::read_dir(&abi_dir) {
            Ok(files) => files,
            Err(err) => {
                warn!("No native libraries for {abi} in {}: {err}", abi_dir.display());
                continue;
            }
        };
        let mut names = vec![];
        for file in files {
            let file = file?;
            if !file.file_type()?.is_file() {
                continue;
            }
            match file.file_name().into_string() {
                Ok(name) if Path::new(&name).extension().is_some_and(|ext| ext == NATIVE_LIB_EXTENSION) => {
                    names.push(name)
                }
                Ok(_) => {}
                Err(name) => warn!("Ignoring native library with unusable name {name:?}")
            }
        }
        // read_dir order is platform dependent
        names.sort();
        for name in names {
            let entry_name = format!("{NATIVE_LIB_ROOT}/{abi}/{name}");
            fs::copy(abi_dir.join(&name), prepare_destination(scratch_root, &entry_name)?)?;
            debug!("Staged {entry_name}");
            staged.push(entry_name);
        }
    }
    info!("Staged {} native libraries for {abis:?}", staged.len());
    Ok(staged)
}

/// Runs every staging step against a freshly extracted scratch root.
pub fn assemble(
    scratch_root: &Path,
    payload_indices: &BTreeSet<u32>,
    observed_abis: &BTreeSet<String>,
    sources: &StagingSources
) -> Result<StagingReport> {
    let index = next_payload_index(payload_indices)?;
    let payload_entry = stage_payload(scratch_root, sources.payload, index)?;
    stage_config(scratch_root, sources.config_json)?;
    let data_bundle_skipped = match sources.data_bundle {
        Some(bundle) => stage_data_bundle(scratch_root, bundle)?,
        None => None
    };
    let native_libs = stage_native_libs(scratch_root, sources.native_lib_dir, &select_abis(observed_abis))?;

    Ok(StagingReport {
        payload_entry,
        data_bundle_skipped,
        native_libs
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    fn indices(values: &[u32]) -> BTreeSet<u32> {
        values.iter().copied().collect()
    }

    fn abis(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|abi| abi.to_string()).collect()
    }

    #[test_case(&[], 2 ; "empty falls back to two")]
    #[test_case(&[1], 2 ; "after bare payload")]
    #[test_case(&[1, 2, 3], 4 ; "after highest")]
    #[test_case(&[1, 7], 8 ; "gaps are not filled")]
    fn next_index(existing: &[u32], expected: u32) {
        assert_eq!(next_payload_index(&indices(existing)).unwrap().get(), expected);
    }

    #[test]
    fn exhausted_payload_indices_are_an_error() {
        assert!(matches!(
            next_payload_index(&indices(&[1, u32::MAX])),
            Err(PackError::PayloadIndexExhausted(highest)) if highest == u32::MAX
        ));
    }

    #[test]
    fn exhausted_indices_never_touch_the_primary_dex() {
        let scratch = TempDir::new().unwrap();
        let inputs = TempDir::new().unwrap();
        let payload = inputs.path().join("payload.dex");
        write(&payload, b"hook");
        write(&scratch.path().join("classes.dex"), b"app");

        let result = assemble(
            scratch.path(),
            &indices(&[1, u32::MAX]),
            &abis(&[]),
            &StagingSources {
                payload: &payload,
                config_json: b"{}",
                native_lib_dir: &inputs.path().join("libs"),
                data_bundle: None
            }
        );
        assert!(matches!(result, Err(PackError::PayloadIndexExhausted(_))));
        assert_eq!(fs::read(scratch.path().join("classes.dex")).unwrap(), b"app");
    }

    #[test]
    fn no_native_code_gets_both_abis() {
        assert_eq!(select_abis(&abis(&[])), vec!["arm64-v8a", "armeabi-v7a"]);
    }

    #[test]
    fn observed_abis_are_narrowed_to_supported() {
        assert_eq!(select_abis(&abis(&["arm64-v8a", "x86_64"])), vec!["arm64-v8a"]);
        assert!(select_abis(&abis(&["x86"])).is_empty());
    }

    fn write(path: &Path, data: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test_case(b"PK\x03\x04rest" ; "local header")]
    #[test_case(b"PK\x01\x02rest" ; "central directory")]
    #[test_case(b"PK\x05\x06rest" ; "end of central directory")]
    fn bundles_with_zip_magic_are_staged(contents: &[u8]) {
        let scratch = TempDir::new().unwrap();
        let inputs = TempDir::new().unwrap();
        let bundle = inputs.path().join("data.zip");
        write(&bundle, contents);

        assert_eq!(stage_data_bundle(scratch.path(), &bundle).unwrap(), None);
        assert_eq!(fs::read(scratch.path().join(DATA_BUNDLE_ENTRY)).unwrap(), contents);
    }

    #[test_case(b"\x7fELF" ; "wrong magic")]
    #[test_case(b"PK" ; "too short")]
    fn bad_bundles_are_skipped(contents: &[u8]) {
        let scratch = TempDir::new().unwrap();
        let inputs = TempDir::new().unwrap();
        let bundle = inputs.path().join("data.zip");
        write(&bundle, contents);

        assert_eq!(
            stage_data_bundle(scratch.path(), &bundle).unwrap(),
            Some(StagingSkip::UnrecognisedMagic)
        );
        assert!(!scratch.path().join(DATA_BUNDLE_ENTRY).exists());
    }

    #[test]
    fn oversized_bundle_is_skipped() {
        let inputs = TempDir::new().unwrap();
        let bundle = inputs.path().join("data.zip");
        let file = File::create(&bundle).unwrap();
        file.set_len(MAX_DATA_BUNDLE_SIZE + 1).unwrap();

        assert_eq!(
            inspect_data_bundle(&bundle),
            Err(StagingSkip::Oversized { size: MAX_DATA_BUNDLE_SIZE + 1 })
        );
    }

    #[test]
    fn missing_bundle_is_skipped() {
        let scratch = TempDir::new().unwrap();
        let skip = stage_data_bundle(scratch.path(), &scratch.path().join("nope.zip")).unwrap();
        assert!(matches!(skip, Some(StagingSkip::Unreadable(_))));
    }

    #[test]
    fn native_libs_are_copied_per_abi() {
        let scratch = TempDir::new().unwrap();
        let libs = TempDir::new().unwrap();
        write(&libs.path().join("arm64-v8a/libb.so"), b"b");
        write(&libs.path().join("arm64-v8a/liba.so"), b"a");
        write(&libs.path().join("arm64-v8a/README"), b"not a library");
        write(&libs.path().join("x86/libx.so"), b"x");

        let staged = stage_native_libs(scratch.path(), libs.path(), &["arm64-v8a", "armeabi-v7a"]).unwrap();
        assert_eq!(staged, vec!["lib/arm64-v8a/liba.so", "lib/arm64-v8a/libb.so"]);
        assert_eq!(fs::read(scratch.path().join("lib/arm64-v8a/libb.so")).unwrap(), b"b");
        assert!(!scratch.path().join("lib/x86").exists());
    }

    #[test]
    fn assemble_stages_everything() {
        let scratch = TempDir::new().unwrap();
        let inputs = TempDir::new().unwrap();
        let payload = inputs.path().join("payload.dex");
        write(&payload, b"dex\n035\0");
        write(&inputs.path().join("libs/armeabi-v7a/libhook.so"), b"so");

        let report = assemble(
            scratch.path(),
            &indices(&[1, 2]),
            &abis(&["armeabi-v7a"]),
            &StagingSources {
                payload: &payload,
                config_json: b"{}",
                native_lib_dir: &inputs.path().join("libs"),
                data_bundle: None
            }
        )
        .unwrap();

        assert_eq!(report.payload_entry, "classes3.dex");
        assert_eq!(report.native_libs, vec!["lib/armeabi-v7a/libhook.so"]);
        assert_eq!(report.data_bundle_skipped, None);
        assert_eq!(fs::read(scratch.path().join(CONFIG_ENTRY)).unwrap(), b"{}");
        assert_eq!(fs::read(scratch.path().join("classes3.dex")).unwrap(), b"dex\n035\0");
    }
}
