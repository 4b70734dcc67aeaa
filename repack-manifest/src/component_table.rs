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


/// A component the repackaged app must declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSpec {
    /// Manifest tag, e.g. `receiver`.
    pub tag: &'static str,
    pub class_name: &'static str,
    /// Intent-filter action added when the component is injected.
    pub action: Option<&'static str>
}

/// Identifiers of everything the patcher injects. Kept as one table so a
/// rebrand only touches this file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentTable {
    pub provider: ComponentSpec,
    /// Appended to the package name to form the provider authority.
    pub provider_authority_suffix: &'static str,
    pub command_receiver: ComponentSpec,
    pub boot_receiver: ComponentSpec,
    pub settings_activity: ComponentSpec,
    pub permissions: [&'static str; 3]
}

pub const DEFAULT_COMPONENTS: ComponentTable = ComponentTable {
    provider: ComponentSpec {
        tag: "provider",
        class_name: "io.repack.runtime.ConfigProvider",
        action: None
    },
    provider_authority_suffix: "repack.config",
    command_receiver: ComponentSpec {
        tag: "receiver",
        class_name: "io.repack.runtime.CommandReceiver",
        action: Some("io.repack.action.COMMAND")
    },
    boot_receiver: ComponentSpec {
        tag: "receiver",
        class_name: "io.repack.runtime.BootReceiver",
        action: Some("android.intent.action.BOOT_COMPLETED")
    },
    settings_activity: ComponentSpec {
        tag: "activity",
        class_name: "io.repack.runtime.SettingsActivity",
        action: None
    },
    permissions: [
        "android.permission.READ_EXTERNAL_STORAGE",
        "android.permission.WRITE_EXTERNAL_STORAGE",
        "io.repack.permission.IPC"
    ]
};

impl Default for ComponentTable {
    fn default() -> Self {
        DEFAULT_COMPONENTS
    }
}

impl ComponentTable {
    pub fn provider_authority(&self, package: &str) -> String {
        format!("{package}.{}", self.provider_authority_suffix)
    }

    /// Receivers and the activity. The provider is handled separately since
    /// it also carries an authority.
    pub fn plain_components(&self) -> [ComponentSpec; 3] {
        [self.command_receiver, self.boot_receiver, self.settings_activity]
    }
}
