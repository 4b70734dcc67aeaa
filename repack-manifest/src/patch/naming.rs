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


//! Package identifiers: variant generation, validity, and the rewrites a
//! rename drags along with it.

use crate::document::{AttrKey, AttributeValue, Element};

/// Bumps the last ASCII letter of `package` by one, wrapping within its
/// case. A name without any letter gets an `a` appended.
///
/// Only ASCII letters count: package segments are limited to
/// `[A-Za-z0-9_]`, so bumping anything else could never yield a valid name.
pub fn generate_variant(package: &str) -> String {
    let mut chars: Vec<char> = package.chars().collect();
    match chars.iter().rposition(|c| c.is_ascii_alphabetic()) {
        Some(index) => {
            chars[index] = match chars[index] {
                'z' => 'a',
                'Z' => 'A',
                c => (c as u8 + 1) as char
            };
            chars.into_iter().collect()
        }
        None => format!("{package}a")
    }
}

pub fn is_valid_package_name(name: &str) -> bool {
    let segments: Vec<&str> = name.split('.').collect();
    segments.len() >= 2 && segments.iter().all(|segment| is_valid_segment(segment))
}

fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false
    }
}

/// Expands `.Foo` and `Foo` into `<package>.Foo`. Anything already
/// containing an inner dot is left alone.
pub fn expand_class_name(value: &str, package: &str) -> String {
    if value.starts_with('.') {
        format!("{package}{value}")
    } else if !value.is_empty() && !value.contains('.') {
        format!("{package}.{value}")
    } else {
        value.to_string()
    }
}

/// Rewrites each `;` or `,` separated authority that is, or is nested
/// under, `original`. Separators and other authorities are kept verbatim.
pub fn rewrite_authorities(value: &str, original: &str, renamed: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut segment_start = 0;
    for (index, c) in value.char_indices() {
        if c == ';' || c == ',' {
            out.push_str(&rewrite_prefixed(&value[segment_start..index], original, renamed));
            out.push(c);
            segment_start = index + 1;
        }
    }
    out.push_str(&rewrite_prefixed(&value[segment_start..], original, renamed));
    out
}

/// `original` itself, or `original.<rest>`, moved under `renamed`.
fn rewrite_prefixed(value: &str, original: &str, renamed: &str) -> String {
    if value == original {
        return renamed.to_string();
    }
    match value.strip_prefix(original) {
        Some(rest) if rest.starts_with('.') => format!("{renamed}{rest}"),
        _ => value.to_string()
    }
}

// Attributes holding class names, per component tag
fn class_attributes(tag: &str) -> &'static [&'static str] {
    match tag {
        "application" => &["name", "backupAgent", "manageSpaceActivity", "appComponentFactory"],
        "activity" => &["name", "parentActivityName"],
        "activity-alias" => &["name", "targetActivity", "parentActivityName"],
        "service" | "receiver" | "provider" | "instrumentation" => &["name"],
        _ => &[]
    }
}

const PERMISSION_DECLARATIONS: [&str; 3] = ["permission", "permission-group", "uses-permission"];
const PERMISSION_REQUIREMENTS: [&str; 3] = ["permission", "readPermission", "writePermission"];

/// Applies everything a package rename implies to the tree under
/// `<manifest>`, then updates the `package` attribute itself.
pub fn rename_package(manifest: &mut Element, original: &str, renamed: &str) {
    manifest.visit_mut(&mut |element| {
        for name in class_attributes(&element.name) {
            let key = AttrKey::android(*name);
            if let Some(value) = element.string(key) {
                let expanded = expand_class_name(value, original);
                if expanded != value {
                    element.set_string(key, &expanded);
                }
            }
        }

        if element.name == "provider" {
            let key = AttrKey::android("authorities");
            if let Some(value) = element.string(key) {
                let rewritten = rewrite_authorities(value, original, renamed);
                element.set_string(key, &rewritten);
            }
        }

        let mut permission_keys = vec![];
        if PERMISSION_DECLARATIONS.contains(&element.name.as_str()) {
            permission_keys.push(AttrKey::android("name"));
        }
        permission_keys.extend(PERMISSION_REQUIREMENTS.iter().copied().map(AttrKey::android));
        for key in permission_keys {
            if let Some(value) = element.string(key) {
                let rewritten = rewrite_prefixed(value, original, renamed);
                if rewritten != value {
                    element.set_string(key, &rewritten);
                }
            }
        }
    });
    manifest.set(AttrKey::plain("package"), AttributeValue::String(renamed.into()));
}
