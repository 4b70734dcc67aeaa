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


// Names of the entries an APK is expected to contain

use std::num::NonZeroU32;

pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";
pub const COMPILED_RESOURCE_SUFFIX: &str = ".arsc";
pub const NATIVE_LIB_ROOT: &str = "lib";
pub const NATIVE_LIB_EXTENSION: &str = "so";
pub const PAYLOAD_STEM: &str = "classes";
pub const PAYLOAD_EXTENSION: &str = "dex";

const SIGNATURE_DIR: &str = "META-INF/";
const SIGNATURE_SUFFIXES: &[&str] = &[".RSA", ".DSA", ".EC", ".SF"];

/// `classes.dex` is payload 1, every later payload carries its index:
/// `classes2.dex`, `classes3.dex`, ...
pub fn payload_entry_name(index: NonZeroU32) -> String {
    let index = index.get();
    if index == 1 {
        format!("{PAYLOAD_STEM}.{PAYLOAD_EXTENSION}")
    } else {
        format!("{PAYLOAD_STEM}{index}.{PAYLOAD_EXTENSION}")
    }
}

/// Returns the sequence number of a top-level payload entry.
pub fn payload_index(name: &str) -> Option<u32> {
    let digits = name
        .strip_prefix(PAYLOAD_STEM)?
        .strip_suffix(PAYLOAD_EXTENSION)?
        .strip_suffix('.')?;
    if digits.is_empty() {
        return Some(1);
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Old v1 signature files: `META-INF/MANIFEST.MF` and
/// `META-INF/*.{RSA,DSA,EC,SF}`, matched case-insensitively.
pub fn is_signature_file(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    let Some(file_name) = upper.strip_prefix(SIGNATURE_DIR) else {
        return false;
    };
    if file_name.is_empty() || file_name.contains('/') {
        return false;
    }
    file_name == "MANIFEST.MF"
        || SIGNATURE_SUFFIXES
            .iter()
            .any(|suffix| file_name.ends_with(suffix))
}

/// For `lib/<abi>/...` returns `<abi>`.
pub fn native_library_abi(name: &str) -> Option<&str> {
    let mut segments = name.split('/');
    if segments.next()? != NATIVE_LIB_ROOT {
        return None;
    }
    let abi = segments.next()?;
    // A bare "lib/<abi>/" directory entry still counts as an observed ABI
    segments.next()?;
    (!abi.is_empty()).then_some(abi)
}

/// Matches `lib/<abi>/<file>.so` exactly.
pub fn is_native_library(name: &str) -> bool {
    let segments: Vec<&str> = name.split('/').collect();
    if segments.len() != 3 || segments[0] != NATIVE_LIB_ROOT || segments[1].is_empty() {
        return false;
    }
    let file_name = segments[2];
    let suffix_len = NATIVE_LIB_EXTENSION.len() + 1;
    file_name.len() > suffix_len
        && file_name
            .to_ascii_lowercase()
            .ends_with(&format!(".{NATIVE_LIB_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_names_round_trip_through_indices() {
        let name = |index| payload_entry_name(NonZeroU32::new(index).unwrap());
        assert_eq!(name(1), "classes.dex");
        assert_eq!(name(2), "classes2.dex");
        assert_eq!(name(17), "classes17.dex");
        assert_eq!(payload_index("classes.dex"), Some(1));
        assert_eq!(payload_index("classes2.dex"), Some(2));
        assert_eq!(payload_index("classes17.dex"), Some(17));
    }

    #[test]
    fn non_payload_names_have_no_index() {
        assert_eq!(payload_index("classes.jar"), None);
        assert_eq!(payload_index("classesX.dex"), None);
        assert_eq!(payload_index("assets/classes2.dex"), None);
        assert_eq!(payload_index("classes-2.dex"), None);
        assert_eq!(payload_index("myclasses.dex"), None);
    }

    #[test]
    fn signature_files_match_case_insensitively() {
        assert!(is_signature_file("META-INF/MANIFEST.MF"));
        assert!(is_signature_file("META-INF/CERT.RSA"));
        assert!(is_signature_file("META-INF/cert.sf"));
        assert!(is_signature_file("meta-inf/key.ec"));
        assert!(is_signature_file("META-INF/ANDROIDD.DSA"));
    }

    #[test]
    fn other_meta_inf_files_are_kept() {
        assert!(!is_signature_file("META-INF/services/java.sql.Driver"));
        assert!(!is_signature_file("META-INF/com/android/build/gradle/app-metadata.properties"));
        assert!(!is_signature_file("META-INF/kotlin.kotlin_module"));
        assert!(!is_signature_file("assets/META-INF/CERT.RSA"));
        assert!(!is_signature_file("META-INF/sub/CERT.RSA"));
    }

    #[test]
    fn native_library_abis_are_detected() {
        assert_eq!(native_library_abi("lib/arm64-v8a/libfoo.so"), Some("arm64-v8a"));
        assert_eq!(native_library_abi("lib/x86/"), Some("x86"));
        assert_eq!(native_library_abi("lib/libtop.so"), None);
        assert_eq!(native_library_abi("library/x86/libfoo.so"), None);
        assert!(is_native_library("lib/armeabi-v7a/libfoo.so"));
        assert!(!is_native_library("lib/armeabi-v7a/.so"));
        assert!(!is_native_library("lib/armeabi-v7a/sub/libfoo.so"));
    }
}
