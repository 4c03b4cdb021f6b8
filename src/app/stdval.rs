//! `dlogg-stdval`: fetches a channel's standard-encoded value out of the
//! D-LOGG current-data sample.

use crate::config::ConfigNode;
use crate::decode;
use crate::registry::MacDriver;
use crate::value::{FieldbusResult, Value};

use super::AppDriver;

/// Stateless: every call re-parses its address and re-reads whatever the
/// owning MAC driver currently has staged.
pub struct StdvalApp;

impl StdvalApp {
    pub fn new() -> FieldbusResult<Self> {
        Ok(Self)
    }
}

impl AppDriver for StdvalApp {
    fn fetch_value(&mut self, address: &ConfigNode, macs: &[Box<dyn MacDriver>]) -> Value {
        let addr = match decode::parse_address(address) {
            Ok(a) => a,
            Err(e) => return Value::Error(e),
        };

        let line = macs.iter().find_map(|m| m.line(addr.line));
        let line_exists = line.is_some();
        let sample_count = line.map(|l| l.sample_count()).unwrap_or(0);

        if let Err(e) = addr.validate(line_exists, sample_count) {
            return Value::Error(e);
        }

        let sample = match line.unwrap().sample(addr.controller) {
            Ok(s) => s,
            Err(e) => return Value::Error(e),
        };

        decode::decode(&sample.body, &addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn address(prefix: &str, channel: i64) -> ConfigNode {
        let mut group = BTreeMap::new();
        group.insert("channel_number".to_string(), ConfigNode::Int(channel));
        group.insert("channel_prefix".to_string(), ConfigNode::Str(prefix.to_string()));
        ConfigNode::Group(group)
    }

    #[test]
    fn fetch_value_with_no_mac_lines_is_config_error() {
        let mut app = StdvalApp::new().unwrap();
        let macs: Vec<Box<dyn MacDriver>> = Vec::new();
        let v = app.fetch_value(&address("S", 1), &macs);
        assert_eq!(v, Value::Error(crate::value::FieldbusError::Config));
    }

    #[test]
    fn fetch_value_with_malformed_address_is_config_error() {
        let mut app = StdvalApp::new().unwrap();
        let macs: Vec<Box<dyn MacDriver>> = Vec::new();
        let bad = ConfigNode::Group(BTreeMap::new());
        let v = app.fetch_value(&bad, &macs);
        assert_eq!(v, Value::Error(crate::value::FieldbusError::Config));
    }
}
