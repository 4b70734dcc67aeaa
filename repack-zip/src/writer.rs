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
    io::{Seek, Write},
    path::Path
};

use repack_common::*;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{layout::MANIFEST_ENTRY, path_safety::resolve_inside, write_entries, ArchiveEntry};

/// Gathers the archive contents: the manifest first, then every file below
/// `scratch_root` in sorted order. A stray manifest inside the scratch root is
/// skipped so it can't be duplicated.
pub fn collect_entries(scratch_root: &Path, manifest: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut entries = vec![ArchiveEntry::new(MANIFEST_ENTRY, manifest.to_vec())];

    for dir_entry in WalkDir::new(scratch_root)
        .follow_links(false)
        .sort_by_file_name()
    {
        let dir_entry = dir_entry.map_err(std::io::Error::from)?;
        if dir_entry.file_type().is_dir() {
            continue;
        }
        let relative = dir_entry
            .path()
            .strip_prefix(scratch_root)
            .map_err(|_e| PackError::PathTraversal(dir_entry.path().display().to_string()))?;
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name == MANIFEST_ENTRY {
            continue;
        }
        // Symlinks planted in the scratch root must not pull in outside files
        let source = resolve_inside(scratch_root, &name)?;
        let data = fs::read(source)?;
        debug!("Adding {name} ({} bytes)", data.len());
        entries.push(ArchiveEntry::new(name, data));
    }

    Ok(entries)
}

/// Writes the unsigned APK: manifest first, then the scratch root.
pub fn write_archive<W: Write + Seek>(
    scratch_root: &Path,
    manifest: &[u8],
    output: W
) -> Result<()> {
    let entries = collect_entries(scratch_root, manifest)?;
    info!("Writing archive with {} entries", entries.len());
    write_entries(&entries, output)
}
