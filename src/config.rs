//! Glue over an opaque hierarchical configuration tree.
//!
//! The tree has exactly four node kinds: group (named members), list
//! (ordered, positional), int, and string. This module doesn't parse
//! files itself (that's `toml`'s job, wired up in the `log2csv` binary);
//! it only exposes the group/list/int/string contract the core drivers
//! are written against, plus the small set of accessor helpers they use.

use std::collections::BTreeMap;

use crate::value::FieldbusError;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    Group(BTreeMap<String, ConfigNode>),
    List(Vec<ConfigNode>),
    Int(i64),
    Str(String),
}

impl ConfigNode {
    pub fn is_group(&self) -> bool {
        matches!(self, ConfigNode::Group(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ConfigNode::List(_))
    }

    /// Looks up a member of a group node by key.
    pub fn get(&self, key: &str) -> Option<&ConfigNode> {
        match self {
            ConfigNode::Group(members) => members.get(key),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&BTreeMap<String, ConfigNode>> {
        match self {
            ConfigNode::Group(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigNode]> {
        match self {
            ConfigNode::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigNode::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigNode::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Looks up a required string member under `key`.
    pub fn lookup_string(&self, key: &str) -> Result<&str, FieldbusError> {
        self.get(key)
            .and_then(ConfigNode::as_str)
            .ok_or_else(|| {
                log::info!("can't find the \"{key}\" string configuration directive");
                FieldbusError::Config
            })
    }

    /// Looks up an optional int member, falling back to `default` if absent.
    pub fn lookup_int_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(ConfigNode::as_int).unwrap_or(default)
    }

    /// Looks up a required group member under `key`.
    pub fn lookup_group(&self, key: &str) -> Result<&ConfigNode, FieldbusError> {
        match self.get(key) {
            Some(node) if node.is_group() => Ok(node),
            Some(_) => {
                log::info!("the \"{key}\" directive isn't a group");
                Err(FieldbusError::Config)
            }
            None => {
                log::info!("can't find the \"{key}\" group directive");
                Err(FieldbusError::Config)
            }
        }
    }

    /// Looks up a required list member under `key`.
    pub fn lookup_list(&self, key: &str) -> Result<&[ConfigNode], FieldbusError> {
        match self.get(key) {
            Some(ConfigNode::List(items)) => Ok(items),
            Some(_) => {
                log::info!("the \"{key}\" directive isn't a list");
                Err(FieldbusError::Config)
            }
            None => {
                log::info!("can't locate the \"{key}\" list directive");
                Err(FieldbusError::Config)
            }
        }
    }
}

impl TryFrom<toml::Value> for ConfigNode {
    type Error = FieldbusError;

    fn try_from(value: toml::Value) -> Result<Self, Self::Error> {
        match value {
            toml::Value::Table(t) => {
                let mut members = BTreeMap::new();
                for (k, v) in t {
                    members.insert(k, ConfigNode::try_from(v)?);
                }
                Ok(ConfigNode::Group(members))
            }
            toml::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(ConfigNode::try_from(item)?);
                }
                Ok(ConfigNode::List(out))
            }
            toml::Value::Integer(i) => Ok(ConfigNode::Int(i)),
            toml::Value::String(s) => Ok(ConfigNode::Str(s)),
            _ => {
                log::info!("configuration contains an unsupported value kind");
                Err(FieldbusError::Config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(pairs: &[(&str, ConfigNode)]) -> ConfigNode {
        ConfigNode::Group(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn lookup_string_missing_is_config_error() {
        let node = group(&[]);
        assert_eq!(node.lookup_string("name"), Err(FieldbusError::Config));
    }

    #[test]
    fn lookup_int_or_uses_default_when_absent() {
        let node = group(&[]);
        assert_eq!(node.lookup_int_or("line_id", 0), 0);
    }

    #[test]
    fn lookup_int_or_uses_configured_value() {
        let node = group(&[("line_id", ConfigNode::Int(7))]);
        assert_eq!(node.lookup_int_or("line_id", 0), 7);
    }

    #[test]
    fn from_toml_round_trips_group_list_int_string() {
        let toml_val: toml::Value = toml::from_str(
            r#"
            name = "dlogg-tty"
            interface = "/dev/ttyUSB0"
            channels = [1, 2, 3]
            "#,
        )
        .unwrap();
        let node = ConfigNode::try_from(toml_val).unwrap();
        assert_eq!(node.lookup_string("name").unwrap(), "dlogg-tty");
        assert_eq!(node.lookup_string("interface").unwrap(), "/dev/ttyUSB0");
        let channels = node.get("channels").unwrap().as_list().unwrap();
        assert_eq!(channels.len(), 3);
    }
}
