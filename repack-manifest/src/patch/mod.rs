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


//! Manifest rewriting with a three-step fallback.
//!
//! [PatchTier::Full] applies every edit. [PatchTier::Safe] drops the display
//! name override, which is the edit most likely to be malformed.
//! [PatchTier::Fallback] hands back the input untouched. [patch_manifest]
//! walks the tiers in that order and never fails.

pub mod components;
pub mod naming;

use crate::{
    component_table::ComponentTable,
    decoder::decode_document,
    document::{AttrKey, BinaryDocument, Element},
    encoder::encode_document
};
use repack_common::*;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RenameRequest {
    /// Keep the original package name.
    #[default]
    Keep,
    /// Derive a sibling name with [naming::generate_variant].
    Variant,
    Custom(String)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOptions {
    pub rename: RenameRequest,
    /// Replaces `<application android:label>` when set.
    pub display_name: Option<String>,
    pub components: ComponentTable
}

impl PatchOptions {
    pub fn without_display_name(&self) -> PatchOptions {
        PatchOptions {
            display_name: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTier {
    Full,
    Safe,
    Fallback
}

impl PatchTier {
    pub fn apply(self, manifest: &[u8], options: &PatchOptions) -> Result<Vec<u8>> {
        match self {
            PatchTier::Full => full_patch(manifest, options),
            PatchTier::Safe => safe_patch(manifest, options),
            PatchTier::Fallback => Ok(manifest.to_vec())
        }
    }
}

#[derive(Debug)]
pub struct PatchOutcome {
    pub manifest: Vec<u8>,
    pub tier: PatchTier,
    /// Why each earlier tier was abandoned.
    pub failures: Vec<(PatchTier, PackError)>
}

/// Patches `manifest`, degrading through the tiers until one produces a
/// manifest that decodes and has the expected shape.
pub fn patch_manifest(manifest: &[u8], options: &PatchOptions) -> PatchOutcome {
    let mut failures = vec![];
    for tier in [PatchTier::Full, PatchTier::Safe] {
        let patched = tier.apply(manifest, options).and_then(|bytes| {
            validate_manifest(&bytes)?;
            Ok(bytes)
        });
        match patched {
            Ok(patched) => {
                info!(?tier, "manifest patched");
                return PatchOutcome {
                    manifest: patched,
                    tier,
                    failures
                };
            }
            Err(err) => {
                warn!(?tier, %err, "manifest patch tier failed");
                failures.push((tier, err));
            }
        }
    }

    warn!("keeping the original manifest");
    PatchOutcome {
        manifest: manifest.to_vec(),
        tier: PatchTier::Fallback,
        failures
    }
}

pub fn full_patch(manifest: &[u8], options: &PatchOptions) -> Result<Vec<u8>> {
    let mut document = decode_document(manifest)?;
    patch_document(&mut document, options)?;
    encode_document(&document)
}

pub fn safe_patch(manifest: &[u8], options: &PatchOptions) -> Result<Vec<u8>> {
    full_patch(manifest, &options.without_display_name())
}

/// Decodes `manifest` and checks for a `<manifest>` root with an
/// `<application>` child.
pub fn validate_manifest(manifest: &[u8]) -> Result<()> {
    check_shape(&decode_document(manifest)?.root)
}

fn check_shape(root: &Element) -> Result<()> {
    if root.name != "manifest" {
        return Err(PackError::NotAManifest);
    }
    if root.child("application").is_none() {
        return Err(PackError::MissingElement("application".into()));
    }
    Ok(())
}

fn application_mut(manifest: &mut Element) -> Result<&mut Element> {
    manifest
        .child_mut("application")
        .ok_or_else(|| PackError::MissingElement("application".into()))
}

// AAPT2 build stamps that some installers reject on a modified manifest
fn build_metadata_keys() -> [AttrKey; 4] {
    [
        AttrKey::android("compileSdkVersion"),
        AttrKey::android("compileSdkVersionCodename"),
        AttrKey::plain("platformBuildVersionCode"),
        AttrKey::plain("platformBuildVersionName")
    ]
}

/// Applies every edit in `options` to a decoded manifest.
pub fn patch_document(document: &mut BinaryDocument, options: &PatchOptions) -> Result<()> {
    let manifest = &mut document.root;
    check_shape(manifest)?;

    for key in build_metadata_keys() {
        manifest.remove(key);
    }

    if let Some(display_name) = &options.display_name {
        if display_name.trim().is_empty() {
            return Err(PackError::InvalidDisplayName);
        }
        application_mut(manifest)?.set_string(AttrKey::android("label"), display_name);
    }

    let original = manifest
        .string(AttrKey::plain("package"))
        .ok_or_else(|| PackError::InvalidPackageName(String::new()))?
        .to_string();
    let package = match renamed_package(&original, &options.rename) {
        Some(renamed) => {
            naming::rename_package(manifest, &original, &renamed);
            info!(%original, %renamed, "package renamed");
            renamed
        }
        None => original
    };

    let min_sdk = components::declared_min_sdk(manifest);
    components::ensure_permissions(manifest, &options.components);
    components::ensure_components(
        application_mut(manifest)?,
        &options.components,
        &package,
        min_sdk
    );
    Ok(())
}

fn renamed_package(original: &str, rename: &RenameRequest) -> Option<String> {
    let candidate = match rename {
        RenameRequest::Keep => return None,
        RenameRequest::Variant => naming::generate_variant(original),
        RenameRequest::Custom(name) => name.trim().to_string()
    };
    if candidate == original {
        return None;
    }
    if !naming::is_valid_package_name(&candidate) {
        warn!(%candidate, "not renaming to an invalid package name");
        return None;
    }
    Some(candidate)
}
