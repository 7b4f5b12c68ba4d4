//! Flat property maps and grouped-key parsing.
//!
//! The host hands configuration over as a flat `name -> value` map. Issuers and
//! routes are *grouped* keys of the form `prefix.<group>.<property>`, where the
//! property part may itself contain dots (`restapi.orders.schema.draft` belongs
//! to group `orders`, property `schema.draft`).

use super::ConfigError;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Flat configuration handed over by the host: property name -> string value.
pub type Properties = BTreeMap<String, String>;

/// Properties of one group, keyed by the property name after the group segment.
pub type GroupProperties = BTreeMap<String, String>;

/// Split all keys below `prefix.` into groups.
///
/// `prefix.<name>.<property>` lands in group `name` under key `property`
/// (verbatim, dots included). A key with no property segment after the name
/// (`prefix.name` or `prefix.name.`) is malformed and skipped, as is a key with
/// an empty group name.
pub fn group_by_prefix(prefix: &str, properties: &Properties) -> BTreeMap<String, GroupProperties> {
    let mut groups: BTreeMap<String, GroupProperties> = BTreeMap::new();
    let lead = format!("{prefix}.");

    for (key, value) in properties.range(lead.clone()..) {
        let Some(rest) = key.strip_prefix(&lead) else {
            // BTreeMap range is ordered; once the prefix stops matching we are done
            break;
        };
        let Some((group, property)) = rest.split_once('.') else {
            debug!(key = %key, "Skipping grouped key without a property segment");
            continue;
        };
        if group.is_empty() || property.is_empty() {
            debug!(key = %key, "Skipping malformed grouped key");
            continue;
        }
        groups
            .entry(group.to_string())
            .or_default()
            .insert(property.to_string(), value.clone());
    }

    groups
}

/// Parse a list value: entries separated by commas and/or whitespace.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a boolean property (`true/false/yes/no/on/off/1/0`, case-insensitive).
pub fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "a boolean",
        }),
    }
}

/// Parse an unsigned integer property.
pub fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "an unsigned integer",
        })
}

/// Load a YAML document and flatten it into dotted property keys.
///
/// Nested mappings become `a.b.c`, sequences are joined with `,`, and scalars
/// are stringified. Top-level keys may already be dotted; both spellings mix.
pub fn load_properties(path: &Path) -> Result<Properties, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_properties_yaml(&text)
}

/// Flatten YAML text into a property map (see [`load_properties`]).
pub fn parse_properties_yaml(text: &str) -> Result<Properties, ConfigError> {
    let doc: YamlValue = serde_yaml::from_str(text)?;
    let mut out = Properties::new();
    match doc {
        YamlValue::Null => {}
        YamlValue::Mapping(_) => flatten_into(&mut out, String::new(), &doc),
        _ => {
            return Err(ConfigError::InvalidValue {
                key: "<root>".to_string(),
                value: scalar_to_string(&doc).unwrap_or_default(),
                expected: "a mapping at the document root",
            })
        }
    }
    Ok(out)
}

fn flatten_into(out: &mut Properties, path: String, value: &YamlValue) {
    match value {
        YamlValue::Mapping(map) => {
            for (k, v) in map {
                let Some(segment) = scalar_to_string(k) else {
                    continue;
                };
                let next = if path.is_empty() {
                    segment
                } else {
                    format!("{path}.{segment}")
                };
                flatten_into(out, next, v);
            }
        }
        YamlValue::Sequence(items) => {
            let joined: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            out.insert(path, joined.join(","));
        }
        YamlValue::Tagged(tagged) => flatten_into(out, path, &tagged.value),
        other => {
            if let Some(s) = scalar_to_string(other) {
                out.insert(path, s);
            }
        }
    }
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Null => Some(String::new()),
        _ => None,
    }
}
