//! USB-FTDI D-LOGG MAC backend, for gateways presenting as a raw FTDI
//! chip rather than a kernel tty device.
//!
//! libftdi has no intrinsic read timeout, so reads are polled: submit a
//! read, sleep roughly the time the requested bytes would take to arrive
//! at 115200 baud plus a small margin, and retry a bounded number of
//! times before giving up.

use std::io::{Read, Write};
use std::time::Duration;

use crate::config::ConfigNode;
use crate::value::{FieldbusError, FieldbusResult};

use super::{update_chksum, Chksum, MacTransport};

/// Technische Alternative / D-LOGG vendor and product id.
const TA_VID: u16 = 0x0403;
const TA_PID: u16 = 0xA9A0;

const CONFIG_DEVICE_NR: &str = "device-nr";
const POLL_ATTEMPTS: u32 = 20;
const POLL_MARGIN: Duration = Duration::from_micros(100);

pub struct DloggFtdi {
    device: ftdi::Device,
}

impl DloggFtdi {
    pub fn open(cfg: &ConfigNode) -> FieldbusResult<Self> {
        if !cfg.is_group() {
            log::info!("the MAC configuration isn't a group");
            return Err(FieldbusError::Config);
        }
        let device_nr = cfg.get(CONFIG_DEVICE_NR).and_then(ConfigNode::as_int);

        let available = count_attached_devices();
        let index = match device_nr {
            Some(n) if n >= 1 => (n - 1) as usize,
            Some(_) => {
                log::info!("device-nr must be >= 1");
                return Err(FieldbusError::Config);
            }
            None => {
                if available > 1 {
                    log::warn!(
                        "{available} D-LOGG FTDI devices attached and no device-nr \
                         configured; using the first one"
                    );
                }
                0
            }
        };

        if available == 0 {
            log::info!("no D-LOGG FTDI device found");
            return Err(FieldbusError::DeviceNotFound);
        }

        let device = ftdi::find_by_vid_pid(TA_VID, TA_PID)
            .nth(index)
            .open()
            .map_err(|e| {
                log::info!("can't open FTDI device #{index}: {e}");
                FieldbusError::DeviceNotFound
            })?;

        log::debug!("configured d-logg FTDI device (index {index})");

        Ok(Self { device })
    }

    /// Expected wall-clock time for `n` bytes to arrive at 115200 baud.
    fn byte_delay(n: usize) -> Duration {
        Duration::from_secs_f64(n as f64 * 8.0 / 115_200.0) + POLL_MARGIN
    }
}

fn count_attached_devices() -> usize {
    match rusb::devices() {
        Ok(list) => list
            .iter()
            .filter(|dev| match dev.device_descriptor() {
                Ok(desc) => desc.vendor_id() == TA_VID && desc.product_id() == TA_PID,
                Err(_) => false,
            })
            .count(),
        Err(_) => 0,
    }
}

impl MacTransport for DloggFtdi {
    fn send(&mut self, bytes: &[u8], chksum: Option<&mut Chksum>) -> FieldbusResult<()> {
        self.device.write_all(bytes).map_err(|e| {
            log::info!("can't write to the d-logg FTDI device: {e}");
            FieldbusError::Io
        })?;
        update_chksum(chksum, bytes);
        Ok(())
    }

    fn read(&mut self, n: usize, chksum: Option<&mut Chksum>) -> FieldbusResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut read_total = 0;

        for _ in 0..POLL_ATTEMPTS {
            match self.device.read(&mut buf[read_total..]) {
                Ok(got) => read_total += got,
                Err(e) => {
                    log::info!("can't read from the d-logg FTDI device: {e}");
                    return Err(FieldbusError::Io);
                }
            }
            if read_total == n {
                update_chksum(chksum, &buf);
                return Ok(buf);
            }
            std::thread::sleep(Self::byte_delay(n - read_total));
        }

        log::info!(
            "timeout while polling the d-logg FTDI device. {} of {} bytes obtained",
            read_total,
            n
        );
        Err(FieldbusError::Timeout)
    }
}
