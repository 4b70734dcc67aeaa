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


//! The settings the pipeline is driven by. Collecting them is someone else's
//! job; this only reads them.

use repack_common::*;
use repack_manifest::{PatchOptions, RenameRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneMode {
    /// Install over the original app, keeping its package name.
    #[default]
    ReplaceOriginal,
    /// Install next to the original under a derived package name.
    GenerateNewPackage,
    /// Install next to the original under `custom_package`.
    CustomPackage
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub clone_mode: CloneMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_package: Option<String>,
    /// Overrides the launcher label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Everything else in the settings file, kept as is.
    #[serde(flatten)]
    pub extra: Map<String, Value>
}

impl Config {
    pub fn from_json_slice(json: &[u8]) -> Result<Config> {
        Ok(serde_json::from_slice(json)?)
    }

    /// What the manifest patcher should do with this config.
    ///
    /// A custom mode without a usable name turns into a rejected rename, so
    /// the package keeps its original name.
    pub fn patch_options(&self) -> PatchOptions {
        let rename = match self.clone_mode {
            CloneMode::ReplaceOriginal => RenameRequest::Keep,
            CloneMode::GenerateNewPackage => RenameRequest::Variant,
            CloneMode::CustomPackage => {
                RenameRequest::Custom(self.custom_package.clone().unwrap_or_default())
            }
        };
        PatchOptions {
            rename,
            display_name: self.app_name.clone(),
            ..PatchOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn empty_object_is_the_default() {
        let config = Config::from_json_slice(b"{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.patch_options().rename, RenameRequest::Keep);
    }

    #[test_case(r#"{"clone_mode":"replace_original"}"#, RenameRequest::Keep)]
    #[test_case(r#"{"clone_mode":"generate_new_package"}"#, RenameRequest::Variant)]
    #[test_case(r#"{"clone_mode":"custom_package","custom_package":"com.fork"}"#, RenameRequest::Custom("com.fork".into()))]
    #[test_case(r#"{"clone_mode":"custom_package"}"#, RenameRequest::Custom(String::new()))]
    fn clone_mode_selects_rename(json: &str, expected: RenameRequest) {
        let config = Config::from_json_slice(json.as_bytes()).unwrap();
        assert_eq!(config.patch_options().rename, expected);
    }

    #[test]
    fn unknown_keys_are_kept() {
        let config =
            Config::from_json_slice(br#"{"app_name":"Fork","hide_icon":true,"delay":3}"#).unwrap();
        assert_eq!(config.app_name.as_deref(), Some("Fork"));
        assert_eq!(config.extra.get("hide_icon"), Some(&Value::Bool(true)));
        assert_eq!(config.extra.len(), 2);

        let options = config.patch_options();
        assert_eq!(options.display_name.as_deref(), Some("Fork"));
        assert_eq!(options.without_display_name().display_name, None);
    }

    #[test]
    fn unknown_clone_mode_is_rejected() {
        assert!(matches!(
            Config::from_json_slice(br#"{"clone_mode":"sideways"}"#),
            Err(PackError::ConfigParsingFailed(_))
        ));
    }
}
