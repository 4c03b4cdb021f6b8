//! Plain serial (tty) D-LOGG MAC backend.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::config::ConfigNode;
use crate::value::{FieldbusError, FieldbusResult};

use super::{update_chksum, Chksum, MacTransport};

const CONFIG_INTERFACE: &str = "interface";
const BAUD_RATE: u32 = 115_200;
/// Comfortably above the device's ~100ms turnaround.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A D-LOGG gateway reached over a plain serial device (`/dev/ttyUSBx`).
pub struct DloggTty {
    port: Box<dyn SerialPort>,
}

impl DloggTty {
    pub fn open(cfg: &ConfigNode) -> FieldbusResult<Self> {
        if !cfg.is_group() {
            log::info!("the MAC configuration isn't a group");
            return Err(FieldbusError::Config);
        }
        let interface = cfg.lookup_string(CONFIG_INTERFACE)?;

        let mut port = serialport::new(interface, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                log::info!("can't open the device \"{interface}\": {e}");
                FieldbusError::DeviceNotFound
            })?;

        port.write_data_terminal_ready(true).map_err(|e| {
            log::info!("can't assert DTR on \"{interface}\": {e}");
            FieldbusError::Io
        })?;
        port.write_request_to_send(false).map_err(|e| {
            log::info!("can't clear RTS on \"{interface}\": {e}");
            FieldbusError::Io
        })?;

        log::debug!("configured d-logg interface device \"{interface}\"");

        Ok(Self { port })
    }
}

impl MacTransport for DloggTty {
    fn send(&mut self, bytes: &[u8], chksum: Option<&mut Chksum>) -> FieldbusResult<()> {
        self.port.write_all(bytes).map_err(|e| {
            log::info!("can't write to the d-logg interface: {e}");
            FieldbusError::Io
        })?;
        update_chksum(chksum, bytes);
        Ok(())
    }

    fn read(&mut self, n: usize, chksum: Option<&mut Chksum>) -> FieldbusResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut read_total = 0;
        while read_total < n {
            match self.port.read(&mut buf[read_total..]) {
                Ok(0) => {
                    log::info!(
                        "timeout while reading from d-logg. {} more bytes expected",
                        n - read_total
                    );
                    return Err(FieldbusError::Timeout);
                }
                Ok(got) => read_total += got,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    log::info!(
                        "timeout while reading from d-logg. {} more bytes expected",
                        n - read_total
                    );
                    return Err(FieldbusError::Timeout);
                }
                Err(e) => {
                    log::info!("can't read {} more bytes of data from d-logg: {e}", n - read_total);
                    return Err(FieldbusError::Io);
                }
            }
        }
        update_chksum(chksum, &buf);
        Ok(buf)
    }
}
