//! D-LOGG current-data protocol: the request/response state machine that
//! negotiates the attached module's identity and operating mode, then
//! fetches and validates one active-data frame.
//!
//! ```text
//! Idle -> FetchModuleType -> FetchOpMode -> FetchModuleMode -> CheckMode -> FetchSamples -> Done
//! ```
//!
//! Every step that fails aborts the whole cycle immediately; nothing here
//! retries at the frame level. Only line 0 is modeled — the line
//! identifier is carried for forward compatibility, not because more
//! than one is supported today.

use std::thread;
use std::time::Duration;

use crate::decode::{self, RawSample};
use crate::mac::{Chksum, MacTransport};
use crate::value::{FieldbusError, FieldbusResult};

const CMD_FETCH_MODULE_TYPE: [u8; 7] = [0x20, 0x10, 0x18, 0x00, 0x00, 0x00, 0x00];
const ACK_MODULE_TYPE: [u8; 2] = [0x21, 0x43];
const ACK_REJECTED: [u8; 2] = [0xFF, 0x00];
const CMD_FETCH_OP_MODE: [u8; 2] = [0x21, 0x43];
const CMD_FETCH_MODULE_MODE: [u8; 1] = [0x81];
const CMD_FETCH_SAMPLES: [u8; 1] = [0xAB];

const MOD_TYPE_BLNET: u8 = 0xA3;
const MOD_TYPE_DLOGG_1D: u8 = 0xA8;
const MOD_TYPE_DLOGG_2D: u8 = 0xD1;

const MODE_1DL: u8 = 0xA8;
const MODE_2DL: u8 = 0xD1;

const DEVICE_UVR61_3: u8 = 0x90;
const DEVICE_NO: u8 = 0xAB;

/// Minimum firmware revision the UVR 61-3 v1.4 decoder supports, required
/// of the DLOGG-1DL/2DL module types (BL-Net is exempt).
const FIRMWARE_GATE: u8 = 29;

/// The gateway drops responses to these two queries unless the host
/// pauses first. Must not be optimized away.
const COFFEE_BREAK: Duration = Duration::from_millis(10);

const MAX_SAMPLES_PER_LINE: usize = 2;

/// Raw `(type_code, firmware)` as reported by the device. Not validated
/// until [`check_mode`] runs — mirrors the original wire struct, which is
/// copied verbatim before any interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleType {
    pub type_code: u8,
    pub firmware: u8,
}

/// Metadata negotiated by `FetchModuleType`/`FetchOpMode`/`FetchModuleMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub module_type: ModuleType,
    pub mode: u8,
}

/// The only sample payload this decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Uvr613V14,
}

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub sample_type: SampleType,
    pub body: RawSample,
}

/// One logging line's negotiated metadata and last-synced samples.
///
/// Samples are only readable after a `sync()` that returned `Ok`; a
/// failed `sync()` invalidates prior data rather than leaving it
/// readable as stale (property: sample-staging atomicity).
pub struct LineData {
    pub line_id: u8,
    metadata: Option<Metadata>,
    samples: Vec<Sample>,
    synced: bool,
}

impl LineData {
    pub fn new(line_id: u8) -> Self {
        Self {
            line_id,
            metadata: None,
            samples: Vec::new(),
            synced: false,
        }
    }

    pub fn metadata(&self) -> Option<Metadata> {
        self.metadata
    }

    pub fn sample_count(&self) -> usize {
        if self.synced {
            self.samples.len()
        } else {
            0
        }
    }

    /// Returns the sample for `controller` (0-indexed), or `InvalidAddress`
    /// if it isn't currently available.
    pub fn sample(&self, controller: usize) -> FieldbusResult<&Sample> {
        if !self.synced {
            return Err(FieldbusError::InvalidAddress);
        }
        self.samples.get(controller).ok_or(FieldbusError::InvalidAddress)
    }

    /// Runs the full `FetchModuleType -> ... -> FetchSamples` sequence.
    pub fn sync(&mut self, mac: &mut dyn MacTransport) -> FieldbusResult<()> {
        self.synced = false;

        let module_type = fetch_module_type(mac)?;
        let operation_mode = fetch_operation_mode(mac)?;
        let mode = fetch_module_mode(mac)?;
        let metadata = Metadata { module_type, mode };

        log::debug!(
            "metadata fetched: operation type={operation_mode:#x}, mod. type={:#x}, \
             firmware={:#x}, mode={:#x}",
            metadata.module_type.type_code,
            metadata.module_type.firmware,
            metadata.mode,
        );

        check_mode(&metadata)?;
        let staged = fetch_current_data(mac, &metadata)?;

        self.metadata = Some(metadata);
        self.samples = staged;
        self.synced = true;
        Ok(())
    }
}

fn coffee_break() {
    thread::sleep(COFFEE_BREAK);
}

fn fetch_module_type(mac: &mut dyn MacTransport) -> FieldbusResult<ModuleType> {
    let mut chk: Chksum = 0;
    mac.send(&CMD_FETCH_MODULE_TYPE, Some(&mut chk))?;
    mac.send_chksum(chk)?;

    let ack = mac.read(2, None)?;
    if ack == ACK_REJECTED {
        log::info!("logger complained about invalid data");
        return Err(FieldbusError::Io);
    }
    if ack != ACK_MODULE_TYPE {
        log::info!("unexpected module-type acknowledgement {ack:02x?}");
        return Err(FieldbusError::InvalidResponse);
    }

    let mut chk: Chksum = 0;
    let data = mac.read(2, Some(&mut chk))?;
    mac.read_chksum(chk)?;

    let module_type = ModuleType {
        type_code: data[0],
        firmware: data[1],
    };
    log::debug!("module type successfully fetched: {module_type:?}");
    Ok(module_type)
}

fn fetch_operation_mode(mac: &mut dyn MacTransport) -> FieldbusResult<u8> {
    coffee_break();
    mac.send(&CMD_FETCH_OP_MODE, None)?;
    let buf = mac.read(1, None)?;
    Ok(buf[0])
}

fn fetch_module_mode(mac: &mut dyn MacTransport) -> FieldbusResult<u8> {
    coffee_break();
    mac.send(&CMD_FETCH_MODULE_MODE, None)?;
    let buf = mac.read(1, None)?;
    log::debug!("module mode successfully fetched");
    Ok(buf[0])
}

fn check_mode(metadata: &Metadata) -> FieldbusResult<()> {
    let mode = metadata.mode;
    let type_code = metadata.module_type.type_code;
    let firmware = metadata.module_type.firmware;

    if mode != MODE_1DL && mode != MODE_2DL {
        log::info!("the device's operational mode {mode:#x} is not supported");
        return Err(FieldbusError::InvalidResponse);
    }

    if type_code != MOD_TYPE_BLNET && type_code != MOD_TYPE_DLOGG_1D && type_code != MOD_TYPE_DLOGG_2D {
        log::info!("the device's type {type_code:#x} is not supported");
        return Err(FieldbusError::InvalidResponse);
    }

    if (type_code == MOD_TYPE_DLOGG_1D || type_code == MOD_TYPE_DLOGG_2D) && firmware < FIRMWARE_GATE {
        log::info!("the device's firmware version {firmware} isn't supported");
        return Err(FieldbusError::InvalidResponse);
    }

    if type_code == MOD_TYPE_DLOGG_1D && mode != MODE_1DL {
        log::info!("module type DLOGG 1DL doesn't use 1DL mode");
        return Err(FieldbusError::InvalidResponse);
    }

    if type_code == MOD_TYPE_DLOGG_2D && mode != MODE_2DL {
        log::info!("module type DLOGG 2DL doesn't use 2DL mode");
        return Err(FieldbusError::InvalidResponse);
    }

    Ok(())
}

fn expected_sample_count(metadata: &Metadata) -> usize {
    match metadata.mode {
        MODE_1DL => 1,
        MODE_2DL => 2,
        _ => unreachable!("check_mode rejects any other mode"),
    }
}

fn fetch_current_data(mac: &mut dyn MacTransport, metadata: &Metadata) -> FieldbusResult<Vec<Sample>> {
    mac.send(&CMD_FETCH_SAMPLES, None)?;

    let expected = expected_sample_count(metadata);
    debug_assert!(expected <= MAX_SAMPLES_PER_LINE);

    let mut chk: Chksum = 0;
    let mut staged = Vec::with_capacity(expected);

    for i in 0..expected {
        let device_id = mac.read(1, Some(&mut chk))?[0];
        log::debug!("got device ID {device_id:#x} in sample {i}");

        if device_id == DEVICE_NO {
            log::info!("no device data available for sample {i}");
            return Err(FieldbusError::InvalidResponse);
        }
        if device_id != DEVICE_UVR61_3 || metadata.module_type.firmware < FIRMWARE_GATE {
            log::info!("device type {device_id:#x} is not supported");
            return Err(FieldbusError::InvalidResponse);
        }

        let body = mac.read(decode::SAMPLE_SIZE, Some(&mut chk))?;
        let mut raw = [0u8; decode::SAMPLE_SIZE];
        raw.copy_from_slice(&body);

        staged.push(Sample {
            sample_type: SampleType::Uvr613V14,
            body: RawSample(raw),
        });
    }

    mac.read_chksum(chk)?;
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedMac {
        to_read: VecDeque<u8>,
    }

    impl ScriptedMac {
        fn new(bytes: Vec<u8>) -> Self {
            Self {
                to_read: bytes.into(),
            }
        }
    }

    impl MacTransport for ScriptedMac {
        fn send(&mut self, bytes: &[u8], chksum: Option<&mut Chksum>) -> FieldbusResult<()> {
            crate::mac::update_chksum(chksum, bytes);
            Ok(())
        }

        fn read(&mut self, n: usize, chksum: Option<&mut Chksum>) -> FieldbusResult<Vec<u8>> {
            if self.to_read.len() < n {
                return Err(FieldbusError::Timeout);
            }
            let buf: Vec<u8> = (0..n).map(|_| self.to_read.pop_front().unwrap()).collect();
            crate::mac::update_chksum(chksum, &buf);
            Ok(buf)
        }
    }

    fn happy_path_bytes(temp_low: u8, temp_byte1: u8) -> Vec<u8> {
        let mut body = vec![0u8; decode::SAMPLE_SIZE];
        body[0] = temp_low;
        body[1] = temp_byte1;

        let mut bytes = vec![0x21, 0x43]; // module-type ack
        bytes.extend_from_slice(&[0xA8, 0x1D]); // type=DLOGG-1D, firmware=29
        bytes.push(0xC5); // checksum of A8+1D
        bytes.push(0x00); // operation mode (unused)
        bytes.push(0xA8); // module mode = 1DL
        bytes.push(0x90); // device id = UVR61_3
        bytes.extend_from_slice(&body);

        let chk: u32 = 0x90u32 + body.iter().map(|&b| b as u32).sum::<u32>();
        bytes.push((chk % 256) as u8);
        bytes
    }

    #[test]
    fn happy_path_decodes_positive_temperature() {
        let mut mac = ScriptedMac::new(happy_path_bytes(0xDF, 0x04));
        let mut line = LineData::new(0);
        line.sync(&mut mac).unwrap();
        assert_eq!(line.sample_count(), 1);
        let sample = line.sample(0).unwrap();
        let addr = decode::Address {
            prefix: decode::ChannelPrefix::S,
            line: 0,
            channel: 0,
            controller: 0,
        };
        let value = decode::decode(&sample.body, &addr);
        assert_eq!(value, crate::value::Value::Double(22.3));
    }

    #[test]
    fn negative_temperature_round_trip() {
        let mut mac = ScriptedMac::new(happy_path_bytes(0x32, 0x05));
        let mut line = LineData::new(0);
        line.sync(&mut mac).unwrap();
        let sample = line.sample(0).unwrap();
        let addr = decode::Address {
            prefix: decode::ChannelPrefix::S,
            line: 0,
            channel: 0,
            controller: 0,
        };
        assert_eq!(decode::decode(&sample.body, &addr), crate::value::Value::Double(-5.0));
    }

    #[test]
    fn rejected_module_type_ack_is_io_error() {
        let mut mac = ScriptedMac::new(vec![0xFF, 0x00]);
        let mut line = LineData::new(0);
        assert_eq!(line.sync(&mut mac), Err(FieldbusError::Io));
        assert_eq!(line.sample_count(), 0);
    }

    #[test]
    fn bad_trailing_checksum_invalidates_samples() {
        let mut bytes = happy_path_bytes(0xDF, 0x04);
        *bytes.last_mut().unwrap() ^= 0xFF;
        let mut mac = ScriptedMac::new(bytes);
        let mut line = LineData::new(0);
        assert_eq!(line.sync(&mut mac), Err(FieldbusError::InvalidResponse));
        assert_eq!(line.sample(0), Err(FieldbusError::InvalidAddress));
    }

    #[test]
    fn no_device_registered_aborts_with_invalid_response() {
        let mut bytes = vec![0x21, 0x43, 0xA8, 0x1D, 0xC5, 0x00, 0xA8];
        bytes.push(0xAB); // device-id slot reports "no device"
        let mut mac = ScriptedMac::new(bytes);
        let mut line = LineData::new(0);
        assert_eq!(line.sync(&mut mac), Err(FieldbusError::InvalidResponse));
    }

    #[test]
    fn unsupported_firmware_is_rejected_for_dlogg_types() {
        let mut bytes = vec![0x21, 0x43, 0xA8, 0x1C, 0xC4, 0x00, 0xA8];
        bytes.extend(std::iter::repeat(0).take(decode::SAMPLE_SIZE + 2));
        let mut mac = ScriptedMac::new(bytes);
        let mut line = LineData::new(0);
        assert_eq!(line.sync(&mut mac), Err(FieldbusError::InvalidResponse));
    }

    #[test]
    fn check_mode_accepts_blnet_regardless_of_firmware() {
        let metadata = Metadata {
            module_type: ModuleType {
                type_code: MOD_TYPE_BLNET,
                firmware: 1,
            },
            mode: MODE_2DL,
        };
        assert_eq!(check_mode(&metadata), Ok(()));
    }

    #[test]
    fn check_mode_rejects_mode_type_mismatch() {
        let metadata = Metadata {
            module_type: ModuleType {
                type_code: MOD_TYPE_DLOGG_1D,
                firmware: 29,
            },
            mode: MODE_2DL,
        };
        assert_eq!(check_mode(&metadata), Err(FieldbusError::InvalidResponse));
    }
}
