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


//! Zip-slip defence. Entry names come from untrusted archives, so every name
//! is checked lexically first and then against the canonical scratch root.

use std::{
    fs,
    path::{Component, Path, PathBuf}
};

use repack_common::*;

/// Turns an archive entry name into a relative path, rejecting anything that
/// is absolute, carries a drive/UNC prefix or contains a `..` segment.
pub fn lexical_relative_path(entry_name: &str) -> Result<PathBuf> {
    if entry_name.contains('\0') || entry_name.contains('\\') {
        return Err(PackError::PathTraversal(entry_name.into()));
    }
    let mut relative = PathBuf::new();
    for component in Path::new(entry_name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PackError::PathTraversal(entry_name.into()))
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(PackError::PathTraversal(entry_name.into()));
    }
    Ok(relative)
}

/// Resolves `entry_name` against `root` and guarantees the result cannot
/// leave `root`, including through symbolic links that already exist below
/// it. Nothing is created on disk.
pub fn resolve_inside(root: &Path, entry_name: &str) -> Result<PathBuf> {
    let relative = lexical_relative_path(entry_name)?;
    let canonical_root = root.canonicalize()?;
    let candidate = canonical_root.join(relative);

    // The deepest ancestor that exists decides where the path really points.
    // symlink_metadata so that a dangling link is treated as existing.
    let mut existing = candidate.as_path();
    while fs::symlink_metadata(existing).is_err() {
        existing = match existing.parent() {
            Some(parent) => parent,
            None => return Err(PackError::PathTraversal(entry_name.into()))
        };
    }
    let resolved = existing
        .canonicalize()
        .map_err(|_e| PackError::PathTraversal(entry_name.into()))?;
    if !resolved.starts_with(&canonical_root) {
        return Err(PackError::PathTraversal(entry_name.into()));
    }
    Ok(candidate)
}

/// Like [resolve_inside], and also creates the parent directories of the
/// destination, checking again once they exist.
pub fn prepare_destination(root: &Path, entry_name: &str) -> Result<PathBuf> {
    let destination = resolve_inside(root, entry_name)?;
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
        let canonical_root = root.canonicalize()?;
        if !parent.canonicalize()?.starts_with(&canonical_root) {
            return Err(PackError::PathTraversal(entry_name.into()));
        }
    }
    if fs::symlink_metadata(&destination)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
    {
        return Err(PackError::PathTraversal(entry_name.into()));
    }
    Ok(destination)
}
