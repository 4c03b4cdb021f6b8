//! Application-layer drivers: decode an addressed channel value out of
//! whatever the MAC layer most recently staged.

pub mod stdval;

use crate::config::ConfigNode;
use crate::registry::MacDriver;
use crate::value::{FieldbusResult, Value};

/// A loaded application driver, one instance per distinct `type` name
/// referenced from the `channel` config list.
pub trait AppDriver {
    /// Runs once per cycle, after every MAC driver has synced.
    fn sync(&mut self) -> FieldbusResult<()> {
        Ok(())
    }

    /// Decodes the value addressed by `address`, given the current state
    /// of every loaded MAC driver. Never fails the cycle — any error is
    /// folded into the returned `Value::Error`.
    fn fetch_value(&mut self, address: &ConfigNode, macs: &[Box<dyn MacDriver>]) -> Value;

    fn free(&mut self) -> FieldbusResult<()> {
        Ok(())
    }
}
