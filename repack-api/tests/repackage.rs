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


use std::{
    fs,
    io::{self, Cursor, Read, Write},
    path::{Path, PathBuf}
};

use repack_api::{repackage, KeyStore, PackError, PemKeyStore, RepackInputs, SigningSchemes};
use repack_manifest::{decode_document, encode_document, AttrKey, AttributeValue, BinaryDocument, Element, PatchTier};
use repack_sign::key_store::GeneratedKeyStore;
use repack_zip::ArchiveEntry;
use tempfile::TempDir;
use zip::ZipArchive;

fn android(name: &'static str) -> AttrKey {
    AttrKey::android(name)
}

fn source_manifest() -> Vec<u8> {
    let document = BinaryDocument::new(
        Element::new("manifest")
            .with_string(AttrKey::plain("package"), "com.example.app")
            .with_child(Element::new("uses-sdk").with(android("minSdkVersion"), AttributeValue::Decimal(26)))
            .with_child(
                Element::new("application")
                    .with_string(android("label"), "Original")
                    .with_child(Element::new("activity").with_string(android("name"), ".Main"))
            )
    );
    encode_document(&document).unwrap()
}

struct Fixture {
    _inputs: TempDir,
    root: PathBuf,
    work_dir: TempDir
}

impl Fixture {
    fn new(entries: Vec<ArchiveEntry>, config: &str) -> Fixture {
        let inputs = TempDir::new().unwrap();
        let root = inputs.path().to_path_buf();

        let mut apk = vec![];
        repack_zip::write_entries(&entries, Cursor::new(&mut apk)).unwrap();
        fs::write(root.join("source.apk"), apk).unwrap();
        fs::write(root.join("payload.dex"), b"dex\n035\0hook").unwrap();
        fs::write(root.join("settings.json"), config).unwrap();
        for abi in ["arm64-v8a", "armeabi-v7a"] {
            fs::create_dir_all(root.join("libs").join(abi)).unwrap();
            fs::write(root.join("libs").join(abi).join("libhook.so"), abi.as_bytes()).unwrap();
        }

        Fixture {
            _inputs: inputs,
            root,
            work_dir: TempDir::new().unwrap()
        }
    }

    fn inputs<'a>(&self, key_store: &'a dyn KeyStore) -> RepackInputs<'a> {
        RepackInputs {
            source_archive: self.root.join("source.apk"),
            payload: self.root.join("payload.dex"),
            config_file: self.root.join("settings.json"),
            native_lib_dir: self.root.join("libs"),
            data_bundle: None,
            key_store,
            alias: "clone".into(),
            store_password: String::new(),
            key_password: String::new(),
            work_dir: self.work_dir.path().to_path_buf(),
            schemes: SigningSchemes::default()
        }
    }

    fn work_dir_is_empty(&self) -> bool {
        is_empty_dir(self.work_dir.path())
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).unwrap().next().is_none()
}

fn standard_entries() -> Vec<ArchiveEntry> {
    vec![
        ArchiveEntry::new("AndroidManifest.xml", source_manifest()),
        ArchiveEntry::new("classes.dex", b"dex\n035\0app".to_vec()),
        ArchiveEntry::new("lib/arm64-v8a/libapp.so", b"elf".to_vec()),
        ArchiveEntry::new("res/raw/data.bin", vec![1, 2, 3]),
        ArchiveEntry::new("META-INF/CERT.SF", b"old".to_vec()),
        ArchiveEntry::new("META-INF/CERT.RSA", b"old".to_vec()),
        ArchiveEntry::new("META-INF/MANIFEST.MF", b"old".to_vec()),
    ]
}

fn read_entry(apk: &[u8], name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(apk)).unwrap();
    let mut data = vec![];
    archive.by_name(name).unwrap().read_to_end(&mut data).unwrap();
    data
}

#[test]
fn repackages_a_cloned_apk() {
    let config = r#"{"clone_mode":"generate_new_package","app_name":"Clone","hide_icon":true}"#;
    let fixture = Fixture::new(standard_entries(), config);
    let key_store = GeneratedKeyStore;

    let mut out = vec![];
    let report = repackage(&fixture.inputs(&key_store), &mut out).unwrap();

    assert_eq!(report.package.as_deref(), Some("com.example.apq"));
    assert_eq!(report.patch_tier, PatchTier::Full);
    assert!(report.patch_failures.is_empty());
    assert_eq!(report.dropped_signatures.len(), 3);
    assert_eq!(report.staging.payload_entry, "classes2.dex");
    // The source only ships arm64 code
    assert_eq!(report.staging.native_libs, vec!["lib/arm64-v8a/libhook.so"]);
    let verification = report.verification.unwrap();
    assert!(verification.v1 && verification.v2 && !verification.v3);
    assert_eq!(report.bytes_written, out.len() as u64);

    let archive = ZipArchive::new(Cursor::new(&out)).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"classes2.dex"));
    assert!(names.contains(&"assets/repack_config.json"));
    assert!(names.contains(&"lib/arm64-v8a/libhook.so"));
    assert!(names.contains(&"META-INF/CLONE.SF"));
    assert!(!names.contains(&"META-INF/CERT.SF"));
    assert!(!names.contains(&"lib/armeabi-v7a/libhook.so"));

    assert_eq!(read_entry(&out, "classes2.dex"), b"dex\n035\0hook");
    assert_eq!(read_entry(&out, "assets/repack_config.json"), config.as_bytes());

    let manifest = decode_document(&read_entry(&out, "AndroidManifest.xml")).unwrap();
    let application = manifest.root.child("application").unwrap();
    assert_eq!(application.string(android("label")), Some("Clone"));
    assert_eq!(
        application.child("activity").unwrap().string(android("name")),
        Some("com.example.app.Main")
    );
    assert!(application.children_named("provider").count() >= 1);

    assert!(fixture.work_dir_is_empty());
}

#[test]
fn apk_without_native_code_gets_both_abis() {
    let entries = vec![
        ArchiveEntry::new("AndroidManifest.xml", source_manifest()),
        ArchiveEntry::new("classes.dex", b"dex".to_vec()),
        ArchiveEntry::new("classes2.dex", b"dex".to_vec()),
    ];
    let fixture = Fixture::new(entries, "{}");
    let key_store = GeneratedKeyStore;

    let mut out = vec![];
    let report = repackage(&fixture.inputs(&key_store), &mut out).unwrap();

    assert_eq!(report.package.as_deref(), Some("com.example.app"));
    assert_eq!(report.staging.payload_entry, "classes3.dex");
    assert_eq!(
        report.staging.native_libs,
        vec!["lib/arm64-v8a/libhook.so", "lib/armeabi-v7a/libhook.so"]
    );
}

#[test]
fn blank_display_name_falls_back_to_safe_tier() {
    let fixture = Fixture::new(standard_entries(), r#"{"app_name":"  "}"#);
    let key_store = GeneratedKeyStore;

    let mut out = vec![];
    let report = repackage(&fixture.inputs(&key_store), &mut out).unwrap();

    assert_eq!(report.patch_tier, PatchTier::Safe);
    let manifest = decode_document(&read_entry(&out, "AndroidManifest.xml")).unwrap();
    let application = manifest.root.child("application").unwrap();
    assert_eq!(application.string(android("label")), Some("Original"));
}

#[test]
fn missing_manifest_fails_without_output() {
    let entries = vec![ArchiveEntry::new("classes.dex", b"dex".to_vec())];
    let fixture = Fixture::new(entries, "{}");
    let key_store = GeneratedKeyStore;

    let mut out = vec![];
    let result = repackage(&fixture.inputs(&key_store), &mut out);

    assert!(matches!(result, Err(PackError::MissingManifest)));
    assert!(out.is_empty());
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn unparseable_config_fails() {
    let fixture = Fixture::new(standard_entries(), "not json");
    let key_store = GeneratedKeyStore;

    let mut out = vec![];
    let result = repackage(&fixture.inputs(&key_store), &mut out);
    assert!(matches!(result, Err(PackError::ConfigParsingFailed(_))));
    assert!(fixture.work_dir_is_empty());
}

struct ClosedSink;

impl Write for ClosedSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn closed_sink_is_reported() {
    let fixture = Fixture::new(standard_entries(), "{}");
    let key_store = GeneratedKeyStore;

    let result = repackage(&fixture.inputs(&key_store), &mut ClosedSink);
    assert!(matches!(result, Err(PackError::OutputSinkUnavailable(_))));
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn dumps_the_manifest_as_text() {
    let fixture = Fixture::new(standard_entries(), "{}");
    let text = repack_api::dump_manifest(&fixture.root.join("source.apk")).unwrap();
    assert!(text.contains("package=\"com.example.app\""));
    assert!(text.contains("android:name=\".Main\""));
}

#[test]
fn missing_signing_identity_leaves_nothing_behind() {
    let fixture = Fixture::new(standard_entries(), "{}");
    let key_store = PemKeyStore::default();

    let mut out = vec![];
    let result = repackage(&fixture.inputs(&key_store), &mut out);

    assert!(matches!(result, Err(PackError::SignerNoKeys)));
    assert!(out.is_empty());
    assert!(fixture.work_dir_is_empty());
}

#[test]
fn traversal_entry_aborts_and_leaves_nothing_behind() {
    let mut entries = standard_entries();
    entries.push(ArchiveEntry::new("../evil", b"gotcha".to_vec()));
    entries.push(ArchiveEntry::new("../../evil", b"gotcha".to_vec()));
    let fixture = Fixture::new(entries, "{}");
    let key_store = GeneratedKeyStore;

    let mut out = vec![];
    let result = repackage(&fixture.inputs(&key_store), &mut out);

    assert!(matches!(result, Err(PackError::PathTraversal(_))));
    assert!(out.is_empty());
    assert!(fixture.work_dir_is_empty());
    assert!(!fixture.work_dir.path().join("evil").exists());
    assert!(!fixture.root.join("evil").exists());
}
