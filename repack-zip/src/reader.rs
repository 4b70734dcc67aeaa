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
    collections::BTreeSet,
    fs::File,
    io::{self, Read, Seek},
    path::Path
};

use repack_common::*;
use tracing::{debug, info};
use zip::{result::ZipError, ZipArchive};

use crate::{
    layout::{self, MANIFEST_ENTRY},
    path_safety::{lexical_relative_path, prepare_destination},
    ArchiveEntry
};

/// What [extract_archive] learned about the source APK.
#[derive(Debug, Default)]
pub struct ExtractedArchive {
    /// Raw bytes of `AndroidManifest.xml`. Never written to the scratch root.
    pub manifest: Vec<u8>,
    /// Distinct `lib/<abi>/` directories, eg. `arm64-v8a`
    pub abis: BTreeSet<String>,
    /// Sequence numbers of the existing `classes*.dex` payloads
    pub payload_indices: BTreeSet<u32>,
    /// Entries copied into the scratch root, in archive order
    pub retained: Vec<String>,
    /// Old signature files that were dropped
    pub dropped_signatures: Vec<String>
}

/// Streams every entry of `source` into `scratch_root`, except the manifest
/// (kept in memory) and old signature files (dropped).
pub fn extract_archive<R: Read + Seek>(source: R, scratch_root: &Path) -> Result<ExtractedArchive> {
    let mut archive = ZipArchive::new(source)?;
    let mut extracted = ExtractedArchive::default();
    let mut manifest = None;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();

        if let Some(abi) = layout::native_library_abi(&name) {
            extracted.abis.insert(abi.to_string());
        }
        if entry.is_dir() {
            continue;
        }
        if layout::is_signature_file(&name) {
            debug!("Dropping old signature file {name}");
            extracted.dropped_signatures.push(name);
            continue;
        }
        if name == MANIFEST_ENTRY {
            let mut bytes = Vec::with_capacity(declared_capacity(entry.size()));
            entry.read_to_end(&mut bytes)?;
            manifest = Some(bytes);
            continue;
        }
        if let Some(index) = layout::payload_index(&name) {
            extracted.payload_indices.insert(index);
        }

        let destination = prepare_destination(scratch_root, &name)?;
        let mut out = File::create(&destination)?;
        io::copy(&mut entry, &mut out)?;
        extracted.retained.push(name);
    }

    extracted.manifest = manifest.ok_or(PackError::MissingManifest)?;
    info!(
        "Extracted {} entries, dropped {} signature files, ABIs {:?}, payloads {:?}",
        extracted.retained.len(),
        extracted.dropped_signatures.len(),
        extracted.abis,
        extracted.payload_indices
    );
    Ok(extracted)
}

// Declared sizes come from the untrusted central directory
const MAX_PREALLOCATION: u64 = 64 << 20;

fn declared_capacity(declared_size: u64) -> usize {
    declared_size.min(MAX_PREALLOCATION) as usize
}

/// Reads every file entry of an archive into memory, in archive order.
pub fn read_entries<R: Read + Seek>(source: R) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(source)?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        lexical_relative_path(&name)?;
        let mut data = Vec::with_capacity(declared_capacity(entry.size()));
        entry.read_to_end(&mut data)?;
        entries.push(ArchiveEntry::new(name, data));
    }
    Ok(entries)
}

/// Reads just `AndroidManifest.xml` out of an archive.
pub fn read_manifest<R: Read + Seek>(source: R) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(source)?;
    let mut entry = match archive.by_name(MANIFEST_ENTRY) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(PackError::MissingManifest),
        Err(err) => return Err(err.into())
    };
    let mut manifest = Vec::with_capacity(declared_capacity(entry.size()));
    entry.read_to_end(&mut manifest)?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Cursor, io::Write};
    use tempfile::TempDir;
    use zip::{write::SimpleFileOptions, ZipWriter};

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = vec![];
        let mut zip = ZipWriter::new(Cursor::new(&mut buf));
        for (name, data) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        buf
    }

    #[test]
    fn classifies_entries_and_keeps_manifest_in_memory() {
        let zip = build_zip(&[
            ("AndroidManifest.xml", b"manifest-bytes"),
            ("classes.dex", b"dex1"),
            ("classes3.dex", b"dex3"),
            ("lib/arm64-v8a/libfoo.so", b"elf"),
            ("lib/x86_64/libfoo.so", b"elf"),
            ("META-INF/CERT.SF", b"sig"),
            ("META-INF/CERT.RSA", b"sig"),
            ("META-INF/MANIFEST.MF", b"sig"),
            ("META-INF/services/a.b.C", b"service"),
            ("res/layout/main.xml", b"layout"),
        ]);
        let scratch = TempDir::new().unwrap();
        let extracted = extract_archive(Cursor::new(zip), scratch.path()).unwrap();

        assert_eq!(extracted.manifest, b"manifest-bytes");
        assert_eq!(
            extracted.abis.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["arm64-v8a", "x86_64"]
        );
        assert_eq!(
            extracted.payload_indices.iter().copied().collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(extracted.dropped_signatures.len(), 3);
        assert!(!scratch.path().join("AndroidManifest.xml").exists());
        assert!(!scratch.path().join("META-INF/CERT.SF").exists());
        assert_eq!(
            fs::read(scratch.path().join("META-INF/services/a.b.C")).unwrap(),
            b"service"
        );
        assert_eq!(fs::read(scratch.path().join("classes3.dex")).unwrap(), b"dex3");
    }

    #[test]
    fn read_manifest_finds_only_the_manifest() {
        let zip = build_zip(&[("classes.dex", b"dex"), ("AndroidManifest.xml", b"m")]);
        assert_eq!(read_manifest(Cursor::new(zip)).unwrap(), b"m");

        let zip = build_zip(&[("classes.dex", b"dex")]);
        assert!(matches!(
            read_manifest(Cursor::new(zip)),
            Err(PackError::MissingManifest)
        ));
    }

    #[test]
    fn declared_sizes_do_not_drive_allocation() {
        assert_eq!(declared_capacity(12), 12);
        assert_eq!(declared_capacity(u64::MAX), 64 << 20);
    }

    #[test]
    fn missing_manifest_is_fatal() {
        let zip = build_zip(&[("classes.dex", b"dex")]);
        let scratch = TempDir::new().unwrap();
        let result = extract_archive(Cursor::new(zip), scratch.path());
        assert!(matches!(result, Err(PackError::MissingManifest)));
    }

    #[test]
    fn traversal_entries_abort_without_writing_outside() {
        let parent = TempDir::new().unwrap();
        let scratch = parent.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let zip = build_zip(&[
            ("AndroidManifest.xml", b"m"),
            ("../escaped.txt", b"gotcha"),
        ]);

        let result = extract_archive(Cursor::new(zip), &scratch);
        assert!(matches!(result, Err(PackError::PathTraversal(_))));
        assert!(!parent.path().join("escaped.txt").exists());
    }

    #[test]
    fn absolute_entries_abort() {
        let scratch = TempDir::new().unwrap();
        let zip = build_zip(&[("AndroidManifest.xml", b"m"), ("/tmp/abs.txt", b"x")]);
        let result = extract_archive(Cursor::new(zip), scratch.path());
        assert!(matches!(result, Err(PackError::PathTraversal(_))));
    }

    #[test]
    fn read_entries_loads_everything_in_order() {
        let zip = build_zip(&[("b", b"2"), ("a", b"1"), ("META-INF/X.SF", b"s")]);
        let entries = read_entries(Cursor::new(zip)).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "META-INF/X.SF"]);
        assert_eq!(entries[1].data, b"1");
    }
}
