//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML after variable
//! substitution. Sections (`clone`, `services`, `pipeline`) are ordered
//! maps from container name to container definition; declaration order is
//! execution order.

use kestrel_core::{Error, Result};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workspace: Workspace,
    #[serde(default)]
    pub clone: Containers,
    #[serde(default)]
    pub services: Containers,
    #[serde(default)]
    pub pipeline: Containers,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub path: String,
}

/// Ordered list of named containers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Containers(pub Vec<Container>);

impl Containers {
    pub fn iter(&self) -> impl Iterator<Item = &Container> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Container {
    /// Key of the container in its section.
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub commands: StringList,
    #[serde(default)]
    pub entrypoint: StringList,
    #[serde(default)]
    pub environment: EnvMap,
    #[serde(default)]
    pub secrets: StringList,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub volumes: StringList,
    #[serde(default)]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub detach: bool,
    #[serde(default)]
    pub pull: bool,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub when: Constraints,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub status: StringList,
}

/// A list of strings that may also be written as a single string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringList(pub Vec<String>);

impl StringList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }
}

/// Environment written either as a map or as a list of `KEY=value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap(pub BTreeMap<String, String>);

/// Parse substituted definition text.
pub fn parse_str(text: &str) -> Result<Config> {
    if text.trim().is_empty() {
        return Err(Error::DefinitionParse("empty pipeline definition".to_string()));
    }
    serde_yaml::from_str(text).map_err(|e| Error::DefinitionParse(e.to_string()))
}

impl<'de> Deserialize<'de> for Containers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ContainersVisitor;

        impl<'de> Visitor<'de> for ContainersVisitor {
            type Value = Containers;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of container names to container definitions")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(Containers::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut containers = Vec::new();
                while let Some((name, container)) = map.next_entry::<String, Option<Container>>()? {
                    if containers.iter().any(|c: &Container| c.name == name) {
                        return Err(de::Error::custom(format!("duplicate container name: {}", name)));
                    }
                    let mut container = container.unwrap_or_default();
                    container.name = name;
                    containers.push(container);
                }
                Ok(Containers(containers))
            }
        }

        deserializer.deserialize_any(ContainersVisitor)
    }
}

impl<'de> Deserialize<'de> for StringList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct StringListVisitor;

        impl<'de> Visitor<'de> for StringListVisitor {
            type Value = StringList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or a list of strings")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(StringList::default())
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Self::Value, E> {
                Ok(StringList(vec![value.to_string()]))
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<Self::Value, E> {
                Ok(StringList(vec![value.to_string()]))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<Self::Value, E> {
                Ok(StringList(vec![value.to_string()]))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<Self::Value, E> {
                Ok(StringList(vec![value.to_string()]))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<Self::Value, E> {
                Ok(StringList(vec![value.to_string()]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(StringList(values))
            }
        }

        deserializer.deserialize_any(StringListVisitor)
    }
}

impl<'de> Deserialize<'de> for EnvMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EnvMapVisitor;

        impl<'de> Visitor<'de> for EnvMapVisitor {
            type Value = EnvMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map or a list of KEY=value strings")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(EnvMap::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut env = BTreeMap::new();
                while let Some((key, value)) = map.next_entry::<String, Option<String>>()? {
                    env.insert(key, value.unwrap_or_default());
                }
                Ok(EnvMap(env))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
                let mut env = BTreeMap::new();
                while let Some(entry) = seq.next_element::<String>()? {
                    let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
                    env.insert(key.to_string(), value.to_string());
                }
                Ok(EnvMap(env))
            }
        }

        deserializer.deserialize_any(EnvMapVisitor)
    }
}
