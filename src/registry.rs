//! The pluggable field-bus manager: loads MAC and application drivers,
//! registers channels against them, and fans requests out every cycle.
//!
//! Drivers are resolved at compile time through [`MacDriver`]/[`AppDriver`]
//! trait objects rather than `dlopen`, removing the `LoadModule` failure
//! mode for anything but an unrecognized driver name. The rollback
//! invariant on [`Registry::add_channel`] is kept regardless: a new app
//! driver is only pushed onto `apps` once it has loaded successfully.

use crate::app::stdval::StdvalApp;
use crate::app::AppDriver;
use crate::config::ConfigNode;
use crate::mac::ftdi::DloggFtdi;
use crate::mac::tty::DloggTty;
use crate::mac::MacTransport;
use crate::protocol;
use crate::value::{FieldbusError, FieldbusResult, Value};

const CONFIG_MAC: &str = "mac";
const CONFIG_NAME: &str = "name";
const CONFIG_TYPE: &str = "type";
const CONFIG_ADDRESS: &str = "address";
const CONFIG_LINE_ID: &str = "line_id";

/// Operations a loaded MAC driver instance exposes to the registry.
pub trait MacDriver {
    /// Refreshes this driver's wire state for the current cycle.
    fn sync(&mut self) -> FieldbusResult<()>;

    /// Looks up the currently synced data for `line_id`, if this driver
    /// owns that line.
    fn line(&self, line_id: u8) -> Option<&protocol::LineData>;

    /// Releases the underlying device. The serial/USB handles close via
    /// `Drop` regardless; this only exists so teardown errors can be
    /// aggregated the way the registry's `free()` contract expects.
    fn free(&mut self) -> FieldbusResult<()>;
}

struct DloggMac<T: MacTransport> {
    transport: T,
    line: protocol::LineData,
}

impl<T: MacTransport> DloggMac<T> {
    fn new(transport: T, line_id: u8) -> Self {
        Self {
            transport,
            line: protocol::LineData::new(line_id),
        }
    }
}

impl<T: MacTransport> MacDriver for DloggMac<T> {
    fn sync(&mut self) -> FieldbusResult<()> {
        self.line.sync(&mut self.transport)
    }

    fn line(&self, line_id: u8) -> Option<&protocol::LineData> {
        if self.line.line_id == line_id {
            Some(&self.line)
        } else {
            None
        }
    }

    fn free(&mut self) -> FieldbusResult<()> {
        Ok(())
    }
}

fn load_mac_driver(name: &str, cfg: &ConfigNode) -> FieldbusResult<Box<dyn MacDriver>> {
    let line_id = cfg.lookup_int_or(CONFIG_LINE_ID, 0);
    if !(0..=255).contains(&line_id) {
        log::info!("value of {CONFIG_LINE_ID}, {line_id} out of range [0,255]");
        return Err(FieldbusError::Config);
    }

    match name {
        "dlogg-tty" => {
            let transport = DloggTty::open(cfg)?;
            Ok(Box::new(DloggMac::new(transport, line_id as u8)))
        }
        "dlogg-ftdi" => {
            let transport = DloggFtdi::open(cfg)?;
            Ok(Box::new(DloggMac::new(transport, line_id as u8)))
        }
        other => {
            log::info!("unknown MAC driver \"{other}\"");
            Err(FieldbusError::LoadModule)
        }
    }
}

fn load_app_driver(name: &str) -> FieldbusResult<Box<dyn AppDriver>> {
    match name {
        "dlogg-stdval" => Ok(Box::new(StdvalApp::new()?)),
        other => {
            log::info!("unknown application driver \"{other}\"");
            Err(FieldbusError::LoadModule)
        }
    }
}

struct AppEntry {
    name: String,
    driver: Box<dyn AppDriver>,
}

struct ChannelEntry {
    app_index: usize,
    address: ConfigNode,
}

/// Owns every loaded driver and the channel table routing fetches to them.
#[derive(Default)]
pub struct Registry {
    macs: Vec<Box<dyn MacDriver>>,
    apps: Vec<AppEntry>,
    channels: Vec<ChannelEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            macs: Vec::new(),
            apps: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Loads every MAC driver named in the root config's `mac` list, in
    /// order. Aborts on the first failure.
    pub fn init(&mut self, root: &ConfigNode) -> FieldbusResult<()> {
        let mac_list = root.lookup_list(CONFIG_MAC)?;

        for entry in mac_list {
            if !entry.is_group() {
                log::info!("the \"{CONFIG_MAC}\" directive contains an invalid list entry");
                return Err(FieldbusError::Config);
            }
            let name = entry.lookup_string(CONFIG_NAME)?;
            log::debug!("loading MAC driver \"{name}\"");
            let driver = load_mac_driver(name, entry)?;
            self.macs.push(driver);
        }

        Ok(())
    }

    /// Registers one channel from a `channel` list entry: `{type, address, ...}`.
    ///
    /// The app driver named by `type` is loaded on first use. A failed
    /// load never touches `apps` — the rollback invariant falls out of
    /// only pushing after [`load_app_driver`] succeeds.
    pub fn add_channel(&mut self, entry: &ConfigNode) -> FieldbusResult<usize> {
        if !entry.is_group() {
            log::info!("the channel configuration isn't a valid group of directives");
            return Err(FieldbusError::Config);
        }

        let type_name = entry.lookup_string(CONFIG_TYPE)?;
        let address = entry.lookup_group(CONFIG_ADDRESS)?.clone();

        let app_index = match self.apps.iter().position(|a| a.name == type_name) {
            Some(idx) => idx,
            None => {
                let driver = load_app_driver(type_name)?;
                self.apps.push(AppEntry {
                    name: type_name.to_string(),
                    driver,
                });
                self.apps.len() - 1
            }
        };

        self.channels.push(ChannelEntry { app_index, address });
        Ok(self.channels.len() - 1)
    }

    /// `mac.sync()` for every MAC driver, in order, then `app.sync()` for
    /// every app driver. Stops at the first error — MAC sync takes the
    /// wire snapshot app sync depends on.
    pub fn sync(&mut self) -> FieldbusResult<()> {
        for mac in &mut self.macs {
            mac.sync()?;
        }
        for app in &mut self.apps {
            app.driver.sync()?;
        }
        Ok(())
    }

    /// Routes a fetch to the app driver owning channel `id`. Assumes the
    /// last `sync()` succeeded; if it didn't, the underlying driver
    /// reports `Error` rather than stale data.
    pub fn fetch_value(&mut self, id: usize) -> Value {
        let Some(entry) = self.channels.get(id) else {
            return Value::Error(FieldbusError::InvalidAddress);
        };
        let app_index = entry.app_index;
        let address = entry.address.clone();
        self.apps[app_index].driver.fetch_value(&address, &self.macs)
    }

    /// Frees app drivers, then MAC drivers in reverse creation order.
    /// Every step runs regardless of earlier failures; the last non-`Ok`
    /// error observed is returned.
    pub fn free(&mut self) -> FieldbusResult<()> {
        let mut last_err = None;

        for app in &mut self.apps {
            if let Err(e) = app.driver.free() {
                last_err = Some(e);
            }
        }
        for mac in self.macs.iter_mut().rev() {
            if let Err(e) = mac.free() {
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
