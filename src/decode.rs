//! Bit-exact decoder for the UVR 61-3 v1.4 active-data sample, plus
//! address parsing/validation for the `dlogg-stdval` application driver.
//!
//! The wire layout (53 bytes, little-endian where multi-byte) is the
//! single source of truth documented here; nothing relies on host
//! compiler bit-field layout — every field is masked and shifted
//! explicitly out of plain `u8`s.

use modular_bitfield::prelude::*;

use crate::config::ConfigNode;
use crate::value::{FieldbusError, FieldbusResult, Value};

/// Size in bytes of one `UVR61_3_v14` sample body, as sent on the wire.
pub const SAMPLE_SIZE: usize = 53;

const N_INPUTS: usize = 15;
const N_ANALOG_OUT: usize = 2;
const N_HEAT_METERS: usize = 3;

/// The second byte of a packed input: `sign | type | highValue`, lsb first.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct InputFlags {
    pub sign: bool,
    pub kind: B3,
    pub high_value: B4,
}

/// Output-drive byte: active-low "set" flag, 2 ignored bits, 5-bit speed.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct OutputDrive {
    pub inactive: bool,
    pub ign: B2,
    pub speed: B5,
}

/// Analog output byte: active-low "set" flag, 7-bit voltage in 0.1V steps.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct AnalogOutput {
    pub inactive: bool,
    pub voltage: B7,
}

/// A raw, still-undecoded UVR 61-3 v1.4 sample body.
#[derive(Debug, Clone, Copy)]
pub struct RawSample(pub [u8; SAMPLE_SIZE]);

impl RawSample {
    fn input_bytes(&self, i: usize) -> [u8; 2] {
        let off = i * 2;
        [self.0[off], self.0[off + 1]]
    }

    fn output_byte(&self) -> u8 {
        self.0[30]
    }

    fn output_drive_byte(&self) -> u8 {
        self.0[31]
    }

    fn analog_out_byte(&self, i: usize) -> u8 {
        self.0[32 + i]
    }

    fn heat_meter_register_byte(&self) -> u8 {
        self.0[34]
    }

    fn heat_meter_bytes(&self, i: usize) -> [u8; 6] {
        let off = 35 + i * 6;
        self.0[off..off + 6].try_into().unwrap()
    }
}

fn u16_le(lo: u8, hi: u8) -> u16 {
    (hi as u16) << 8 | lo as u16
}

fn signed_scale(magnitude: u16, sign: bool, scale: f64) -> f64 {
    let v = magnitude as f64 * scale;
    if sign {
        -v
    } else {
        v
    }
}

fn decode_input(sample: &RawSample, i: usize) -> Value {
    let raw = sample.input_bytes(i);
    let low = raw[0];
    let flags = InputFlags::from_bytes([raw[1]]);
    let sign = flags.sign();
    let high = flags.high_value();

    match flags.kind() {
        0 => Value::Error(FieldbusError::InvalidAddress),
        1 => Value::Long(if sign { 1 } else { 0 }),
        2 => Value::Double(signed_scale(u16_le(low, high), sign, 0.1)),
        3 => Value::Double(signed_scale(u16_le(low, high), sign, 4.0)),
        6 => Value::Double(signed_scale(u16_le(low, high), sign, 1.0)),
        7 => Value::Double(signed_scale(u16_le(low, high & 0x01), sign, 0.1)),
        _ => Value::Error(FieldbusError::InvalidResponse),
    }
}

fn decode_digital_output(sample: &RawSample, channel: usize) -> Value {
    let bit = (sample.output_byte() >> channel) & 1;
    Value::Long(bit as i64)
}

fn decode_output_drive(sample: &RawSample) -> Value {
    let drive = OutputDrive::from_bytes([sample.output_drive_byte()]);
    if drive.inactive() {
        Value::Error(FieldbusError::InvalidAddress)
    } else {
        Value::Double(drive.speed() as f64 / 30.0)
    }
}

fn decode_analog_output(sample: &RawSample, channel: usize) -> Value {
    let out = AnalogOutput::from_bytes([sample.analog_out_byte(channel)]);
    if out.inactive() {
        return Value::Error(FieldbusError::InvalidAddress);
    }
    let voltage = out.voltage();
    if voltage > 100 {
        return Value::Error(FieldbusError::InvalidAddress);
    }
    Value::Double(voltage as f64 * 0.1)
}

fn heat_meter_active(sample: &RawSample, channel: usize) -> bool {
    (sample.heat_meter_register_byte() >> channel) & 1 != 0
}

fn decode_heat_meter_energy(sample: &RawSample, channel: usize) -> Value {
    if !heat_meter_active(sample, channel) {
        return Value::Error(FieldbusError::InvalidAddress);
    }
    let raw = sample.heat_meter_bytes(channel);
    let kwh = u16_le(raw[2], raw[3]) as f64 * 0.1;
    let mwh = u16_le(raw[4], raw[5]) as f64 * 1000.0;
    Value::Double(kwh + mwh)
}

fn decode_heat_meter_power(sample: &RawSample, channel: usize) -> Value {
    if !heat_meter_active(sample, channel) {
        return Value::Error(FieldbusError::InvalidAddress);
    }
    let raw = sample.heat_meter_bytes(channel);
    let cur = u16_le(raw[0], raw[1]) as f64 * 0.1;
    Value::Double(cur)
}

/// The configured channel prefix, selecting which part of the sample to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPrefix {
    S,
    E,
    A,
    ADrive,
    AAnalog,
    WmzPower,
    WmzEnergy,
}

impl ChannelPrefix {
    fn parse(s: &str) -> FieldbusResult<Self> {
        Ok(match s {
            "S" => ChannelPrefix::S,
            "E" => ChannelPrefix::E,
            "A" => ChannelPrefix::A,
            "A.D" => ChannelPrefix::ADrive,
            "A.A" => ChannelPrefix::AAnalog,
            "WMZ.P" => ChannelPrefix::WmzPower,
            "WMZ.E" => ChannelPrefix::WmzEnergy,
            other => {
                log::info!("unknown channel prefix \"{other}\"");
                return Err(FieldbusError::Config);
            }
        })
    }

    /// The number of channels this prefix supports for a `UVR61_3_v14` sample.
    pub fn capacity(self) -> usize {
        match self {
            ChannelPrefix::S => 6,
            ChannelPrefix::E => 9,
            ChannelPrefix::A => 3,
            ChannelPrefix::ADrive => 1,
            ChannelPrefix::AAnalog => N_ANALOG_OUT,
            ChannelPrefix::WmzPower => N_HEAT_METERS,
            ChannelPrefix::WmzEnergy => N_HEAT_METERS,
        }
    }
}

const CONFIG_LINE_ID: &str = "line_id";
const CONFIG_CONTROLLER: &str = "controller";
const CONFIG_CHANNEL_NUMBER: &str = "channel_number";
const CONFIG_CHANNEL_PREFIX: &str = "channel_prefix";

/// A fully parsed, range-checked address into a `UVR61_3_v14` sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub prefix: ChannelPrefix,
    pub line: u8,
    pub channel: usize,
    pub controller: usize,
}

/// Parses the `line_id`/`controller`/`channel_number`/`channel_prefix`
/// group. Does not check availability against live device state — see
/// [`Address::validate`] for that.
pub fn parse_address(cfg: &ConfigNode) -> FieldbusResult<Address> {
    if !cfg.is_group() {
        log::info!("the address setting is not a group directive");
        return Err(FieldbusError::Config);
    }

    let line_id = cfg.lookup_int_or(CONFIG_LINE_ID, 0);
    if !(0..=255).contains(&line_id) {
        log::info!("value of {CONFIG_LINE_ID}, {line_id} out of range [0,255]");
        return Err(FieldbusError::Config);
    }

    let channel = cfg
        .get(CONFIG_CHANNEL_NUMBER)
        .and_then(ConfigNode::as_int)
        .ok_or_else(|| {
            log::info!("can't find the \"{CONFIG_CHANNEL_NUMBER}\" directive within the address group");
            FieldbusError::Config
        })?;
    if !(1..=256).contains(&channel) {
        log::info!("value of {CONFIG_CHANNEL_NUMBER}, {channel} out of range [1,256]");
        return Err(FieldbusError::Config);
    }

    let controller = cfg.lookup_int_or(CONFIG_CONTROLLER, 1);
    if !(1..=2).contains(&controller) {
        log::info!("value of {CONFIG_CONTROLLER}, {controller} out of range [1,2]");
        return Err(FieldbusError::Config);
    }

    let prefix_str = cfg.lookup_string(CONFIG_CHANNEL_PREFIX)?;
    let prefix = ChannelPrefix::parse(prefix_str)?;

    Ok(Address {
        prefix,
        line: line_id as u8,
        channel: (channel - 1) as usize,
        controller: (controller - 1) as usize,
    })
}

impl Address {
    /// Checks the address against the currently known sample count for
    /// its line, per the capability table. `line_exists` tells the
    /// caller whether `self.line` maps to a registered logging line.
    pub fn validate(&self, line_exists: bool, sample_count: usize) -> FieldbusResult<()> {
        if !line_exists {
            log::info!("line {} is not registered", self.line);
            return Err(FieldbusError::Config);
        }
        if self.controller >= sample_count {
            log::info!(
                "controller {} has no data (only {sample_count} sample(s) available)",
                self.controller + 1
            );
            return Err(FieldbusError::Config);
        }
        if self.channel >= self.prefix.capacity() {
            log::info!(
                "channel {} out of range for prefix {:?} (cap {})",
                self.channel + 1,
                self.prefix,
                self.prefix.capacity()
            );
            return Err(FieldbusError::Config);
        }
        Ok(())
    }
}

/// Decodes the value addressed by `addr` out of `sample`.
///
/// The caller must have already validated `addr` against the live
/// sample count (see [`Address::validate`]); this function only knows
/// how to pick apart a sample's bytes, not whether the request made
/// sense at the protocol level.
pub fn decode(sample: &RawSample, addr: &Address) -> Value {
    match addr.prefix {
        ChannelPrefix::S => decode_input(sample, addr.channel),
        ChannelPrefix::E => decode_input(sample, 6 + addr.channel),
        ChannelPrefix::A => decode_digital_output(sample, addr.channel),
        ChannelPrefix::ADrive => decode_output_drive(sample),
        ChannelPrefix::AAnalog => decode_analog_output(sample, addr.channel),
        ChannelPrefix::WmzPower => decode_heat_meter_power(sample, addr.channel),
        ChannelPrefix::WmzEnergy => decode_heat_meter_energy(sample, addr.channel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_with(set: impl FnOnce(&mut [u8; SAMPLE_SIZE])) -> RawSample {
        let mut bytes = [0u8; SAMPLE_SIZE];
        set(&mut bytes);
        RawSample(bytes)
    }

    fn addr(prefix: ChannelPrefix, channel: usize) -> Address {
        Address {
            prefix,
            line: 0,
            channel,
            controller: 0,
        }
    }

    #[test]
    fn s1_temperature_22_3() {
        let sample = sample_with(|b| {
            b[0] = 0xDF;
            b[1] = 0x04; // type=2, sign=0, high=0
        });
        let v = decode(&sample, &addr(ChannelPrefix::S, 0));
        match v {
            Value::Double(d) => assert!((d - 22.3).abs() < 1e-9),
            other => panic!("expected Double, got {other:?}"),
        }
    }

    #[test]
    fn negative_temperature() {
        let sample = sample_with(|b| {
            b[0] = 0x32;
            b[1] = 0x05; // type=2, sign=1, high=0
        });
        let v = decode(&sample, &addr(ChannelPrefix::S, 0));
        match v {
            Value::Double(d) => assert!((d - -5.0).abs() < 1e-9),
            other => panic!("expected Double, got {other:?}"),
        }
    }

    #[test]
    fn unset_analog_output_is_invalid_address() {
        let sample = sample_with(|b| {
            b[32] = 0x01; // inactive=1, voltage=0
        });
        let v = decode(&sample, &addr(ChannelPrefix::AAnalog, 0));
        assert_eq!(v, Value::Error(FieldbusError::InvalidAddress));
    }

    #[test]
    fn analog_output_above_100_is_invalid() {
        // inactive=0 (bit0), voltage=101 (0b1100101) -> byte = 101<<1 = 0xCA
        let sample = sample_with(|b| {
            b[32] = 101 << 1;
        });
        let v = decode(&sample, &addr(ChannelPrefix::AAnalog, 0));
        assert_eq!(v, Value::Error(FieldbusError::InvalidAddress));
    }

    #[test]
    fn drive_output_speed_fraction() {
        // inactive=0, ign=0, speed=15 -> byte = 15 << 3
        let sample = sample_with(|b| {
            b[31] = 15 << 3;
        });
        let v = decode(&sample, &addr(ChannelPrefix::ADrive, 0));
        match v {
            Value::Double(d) => assert!((d - 0.5).abs() < 1e-9),
            other => panic!("expected Double, got {other:?}"),
        }
    }

    #[test]
    fn digital_output_bit() {
        let sample = sample_with(|b| {
            b[30] = 0b0000_0101; // A1 and A3 set
        });
        assert_eq!(decode(&sample, &addr(ChannelPrefix::A, 0)), Value::Long(1));
        assert_eq!(decode(&sample, &addr(ChannelPrefix::A, 1)), Value::Long(0));
        assert_eq!(decode(&sample, &addr(ChannelPrefix::A, 2)), Value::Long(1));
    }

    #[test]
    fn heat_meter_energy_and_power() {
        let sample = sample_with(|b| {
            b[34] = 0b001; // WMZ1 active
            let off = 35;
            b[off] = 0x64; // cur low = 100 -> 10.0 kW
            b[off + 1] = 0x00;
            b[off + 2] = 0x0A; // kwh low = 10 -> 1.0 kWh
            b[off + 3] = 0x00;
            b[off + 4] = 0x02; // mwh = 2 -> 2000 kWh
            b[off + 5] = 0x00;
        });
        assert_eq!(
            decode(&sample, &addr(ChannelPrefix::WmzPower, 0)),
            Value::Double(10.0)
        );
        assert_eq!(
            decode(&sample, &addr(ChannelPrefix::WmzEnergy, 0)),
            Value::Double(2001.0)
        );
    }

    #[test]
    fn heat_meter_inactive_is_invalid_address() {
        let sample = sample_with(|_| {});
        assert_eq!(
            decode(&sample, &addr(ChannelPrefix::WmzEnergy, 0)),
            Value::Error(FieldbusError::InvalidAddress)
        );
    }

    #[test]
    fn capability_table_boundaries() {
        assert_eq!(ChannelPrefix::S.capacity(), 6);
        assert_eq!(ChannelPrefix::E.capacity(), 9);
        assert_eq!(ChannelPrefix::A.capacity(), 3);
        assert_eq!(ChannelPrefix::ADrive.capacity(), 1);
        assert_eq!(ChannelPrefix::AAnalog.capacity(), 2);
        assert_eq!(ChannelPrefix::WmzPower.capacity(), 3);
        assert_eq!(ChannelPrefix::WmzEnergy.capacity(), 3);
    }

    #[test]
    fn validate_rejects_channel_at_capacity() {
        let a = addr(ChannelPrefix::ADrive, 1);
        assert_eq!(a.validate(true, 2), Err(FieldbusError::Config));
        let ok = addr(ChannelPrefix::ADrive, 0);
        assert_eq!(ok.validate(true, 2), Ok(()));
    }

    #[test]
    fn validate_rejects_missing_line() {
        let a = addr(ChannelPrefix::S, 0);
        assert_eq!(a.validate(false, 2), Err(FieldbusError::Config));
    }

    #[test]
    fn validate_rejects_controller_beyond_sample_count() {
        let a = Address {
            prefix: ChannelPrefix::S,
            line: 0,
            channel: 0,
            controller: 1,
        };
        assert_eq!(a.validate(true, 1), Err(FieldbusError::Config));
    }

    #[test]
    fn parse_address_defaults() {
        let mut group = BTreeMap::new();
        group.insert("channel_number".to_string(), ConfigNode::Int(1));
        group.insert("channel_prefix".to_string(), ConfigNode::Str("S".to_string()));
        let node = ConfigNode::Group(group);
        let addr = parse_address(&node).unwrap();
        assert_eq!(addr.line, 0);
        assert_eq!(addr.channel, 0);
        assert_eq!(addr.controller, 0);
        assert_eq!(addr.prefix, ChannelPrefix::S);
    }

    #[test]
    fn parse_address_rejects_unknown_prefix() {
        let mut group = BTreeMap::new();
        group.insert("channel_number".to_string(), ConfigNode::Int(1));
        group.insert("channel_prefix".to_string(), ConfigNode::Str("X".to_string()));
        let node = ConfigNode::Group(group);
        assert_eq!(parse_address(&node).unwrap_err(), FieldbusError::Config);
    }
}
