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


//! Reading, writing and laying out APK zip files.
//!
//! An APK is extracted into a scratch directory by [reader::extract_archive],
//! modified on disk, and reassembled with [writer::write_archive]. Every path
//! that touches the disk goes through [path_safety::resolve_inside].

use repack_common::*;
use std::io::{Seek, Write};
use zip::{write::SimpleFileOptions, CompressionMethod, DateTime, ZipWriter};

pub mod layout;
pub mod path_safety;
pub mod reader;
pub mod writer;

pub use reader::{extract_archive, read_entries, read_manifest, ExtractedArchive};
pub use writer::{collect_entries, write_archive};

/// How an entry's bytes are stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflated
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated
        }
    }
}

/// One file inside an APK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Slash-separated path relative to the archive root
    pub path: String,
    pub data: Vec<u8>,
    /// Decided by [compression_for] when the entry is created
    pub compression: Compression,
    /// Uncompressed size in bytes
    pub size: u64,
    /// CRC-32 of the uncompressed bytes
    pub crc32: u32
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        let path = path.into();
        ArchiveEntry {
            compression: compression_for(&path),
            size: data.len() as u64,
            crc32: crc32fast::hash(&data),
            path,
            data
        }
    }

    /// Stored entries are 4-byte aligned so they can be mmapped in place.
    /// Native libraries are page aligned so they can be loaded without
    /// extraction.
    pub fn alignment(&self) -> u16 {
        match self.compression {
            Compression::Deflated => 1,
            Compression::Stored if layout::is_native_library(&self.path) => 4096,
            Compression::Stored => 4
        }
    }
}

/// Some files in APKs are not allowed to be compressed: the installer reads
/// the manifest, the resource table and native libraries straight out of the
/// archive.
pub fn compression_for(path: &str) -> Compression {
    let lower = path.to_ascii_lowercase();
    if path == layout::MANIFEST_ENTRY
        || lower.ends_with(layout::COMPILED_RESOURCE_SUFFIX)
        || layout::is_native_library(&lower)
    {
        Compression::Stored
    } else {
        Compression::Deflated
    }
}

// Output can be a file *or* a buffer in memory
pub fn write_entries<T: Write + Seek>(entries: &[ArchiveEntry], output: T) -> Result<()> {
    let mut zip = ZipWriter::new(output);
    for entry in entries {
        // Fixed timestamps keep the output reproducible
        let options = SimpleFileOptions::default()
            .compression_method(entry.compression.method())
            .last_modified_time(DateTime::default())
            .with_alignment(entry.alignment());
        zip.start_file(entry.path.as_str(), options)?;
        zip.write_all(&entry.data)?;
    }

    zip.finish()?;
    Ok(())
}
