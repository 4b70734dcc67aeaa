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


use crate::{
    component_table::{ComponentSpec, ComponentTable},
    document::{AttrKey, AttributeValue, Element}
};
use tracing::debug;

/// First platform release with direct boot.
pub const DIRECT_BOOT_MIN_SDK: u32 = 24;

/// Reads `<uses-sdk android:minSdkVersion>`. Codenames and references come
/// back as `None`.
pub fn declared_min_sdk(manifest: &Element) -> Option<u32> {
    let attr = manifest
        .child("uses-sdk")?
        .attribute(AttrKey::android("minSdkVersion"))?;
    match &attr.value {
        AttributeValue::Decimal(value) => u32::try_from(*value).ok(),
        AttributeValue::Hex(value) => Some(*value),
        AttributeValue::String(value) => leading_number(value),
        _ => attr.raw_value.as_deref().and_then(leading_number)
    }
}

fn leading_number(value: &str) -> Option<u32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Adds a `<uses-permission>` for each permission in the table that isn't
/// requested yet, ahead of `<application>`.
pub fn ensure_permissions(manifest: &mut Element, table: &ComponentTable) {
    let name = AttrKey::android("name");
    for permission in table.permissions {
        let requested = manifest
            .children_named("uses-permission")
            .any(|element| element.string(name) == Some(permission));
        if requested {
            continue;
        }
        let position = manifest
            .children
            .iter()
            .position(|child| child.name == "application")
            .unwrap_or(manifest.children.len());
        manifest.children.insert(
            position,
            Element::new("uses-permission").with_string(name, permission)
        );
        debug!(permission, "added permission");
    }
}

/// Injects the provider, both receivers and the activity, or repairs them
/// when an earlier pass already declared them.
pub fn ensure_components(
    application: &mut Element,
    table: &ComponentTable,
    package: &str,
    min_sdk: Option<u32>
) {
    let authority = table.provider_authority(package);
    let authorities = AttrKey::android("authorities");
    let existing_provider = application.children.iter().position(|child| {
        declares_class(child, table.provider.class_name)
            || (child.name == "provider" && has_authority(child, &authority))
    });
    match existing_provider {
        Some(index) => {
            let provider = &mut application.children[index];
            repair(provider);
            if !has_authority(provider, &authority) {
                provider.set_string(authorities, &authority);
            }
            debug!(class = table.provider.class_name, "repaired component");
        }
        None => {
            let mut provider = new_component(&table.provider).with_string(authorities, &authority);
            if min_sdk.is_some_and(|sdk| sdk >= DIRECT_BOOT_MIN_SDK) {
                provider.set_boolean(AttrKey::android("directBootAware"), true);
            }
            application.children.push(provider);
            debug!(class = table.provider.class_name, %authority, "injected component");
        }
    }

    for spec in table.plain_components() {
        let existing = application
            .children
            .iter()
            .position(|child| declares_class(child, spec.class_name));
        match existing {
            Some(index) => {
                repair(&mut application.children[index]);
                debug!(class = spec.class_name, "repaired component");
            }
            None => {
                application.children.push(new_component(&spec));
                debug!(class = spec.class_name, "injected component");
            }
        }
    }
}

fn new_component(spec: &ComponentSpec) -> Element {
    let mut element = Element::new(spec.tag)
        .with_string(AttrKey::android("name"), spec.class_name)
        .with(AttrKey::android("exported"), AttributeValue::Boolean(true));
    if let Some(action) = spec.action {
        element.children.push(
            Element::new("intent-filter")
                .with_child(Element::new("action").with_string(AttrKey::android("name"), action))
        );
    }
    element
}

fn repair(component: &mut Element) {
    component.set_boolean(AttrKey::android("exported"), true);
    for name in ["permission", "readPermission", "writePermission"] {
        while component.remove(AttrKey::android(name)) {}
    }
}

fn declares_class(element: &Element, class_name: &str) -> bool {
    element.string(AttrKey::android("name")) == Some(class_name)
}

fn has_authority(element: &Element, authority: &str) -> bool {
    element
        .string(AttrKey::android("authorities"))
        .is_some_and(|value| value.split([';', ',']).any(|segment| segment == authority))
}
