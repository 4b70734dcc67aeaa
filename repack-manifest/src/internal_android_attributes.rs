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


use phf::phf_map;

pub const ANDROID_NAMESPACE: &str = "http://schemas.android.com/apk/res/android";
pub const ANDROID_PREFIX: &str = "android";
pub const ANDROID_INTERNAL_ATTRIBUTE_MAGIC: u32 = 0x0101_0000;

/// The framework attributes a manifest rewrite touches, keyed by local name.
///
/// Lookups go by resource ID first. Obfuscated manifests frequently blank
/// out or rename the attribute strings but the resource map has to stay
/// intact for the platform to read them.
static ANDROID_ATTRIBUTE_IDS: phf::Map<&'static str, u32> = phf_map! {
    "theme" => 0x0101_0000,
    "label" => 0x0101_0001,
    "icon" => 0x0101_0002,
    "name" => 0x0101_0003,
    "manageSpaceActivity" => 0x0101_0004,
    "permission" => 0x0101_0006,
    "readPermission" => 0x0101_0007,
    "writePermission" => 0x0101_0008,
    "enabled" => 0x0101_000e,
    "exported" => 0x0101_0010,
    "process" => 0x0101_0011,
    "authorities" => 0x0101_0018,
    "grantUriPermissions" => 0x0101_001b,
    "targetActivity" => 0x0101_0202,
    "minSdkVersion" => 0x0101_020c,
    "versionCode" => 0x0101_021b,
    "versionName" => 0x0101_021c,
    "targetSdkVersion" => 0x0101_0270,
    "backupAgent" => 0x0101_027f,
    "parentActivityName" => 0x0101_03a7,
    "directBootAware" => 0x0101_0505,
    "compileSdkVersion" => 0x0101_0572,
    "compileSdkVersionCodename" => 0x0101_0573,
    "appComponentFactory" => 0x0101_057a,
};

pub fn android_attribute_id(name: &str) -> Option<u32> {
    ANDROID_ATTRIBUTE_IDS.get(name).copied()
}

/// Reverse of [android_attribute_id], used when an attribute's own name
/// string has been stripped.
pub fn android_attribute_name(id: u32) -> Option<&'static str> {
    ANDROID_ATTRIBUTE_IDS
        .entries()
        .find(|(_, value)| **value == id)
        .map(|(name, _)| *name)
}

pub fn is_framework_attribute(id: u32) -> bool {
    id & 0xFFFF_0000 == ANDROID_INTERNAL_ATTRIBUTE_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_resolve_both_ways() {
        assert_eq!(android_attribute_id("name"), Some(0x0101_0003));
        assert_eq!(android_attribute_name(0x0101_0018), Some("authorities"));
        assert_eq!(android_attribute_id("notAnAttribute"), None);
        assert_eq!(android_attribute_name(0x7f01_0000), None);
    }

    #[test]
    fn every_id_is_a_framework_attribute() {
        for (_, id) in ANDROID_ATTRIBUTE_IDS.entries() {
            assert!(is_framework_attribute(*id));
        }
    }
}
