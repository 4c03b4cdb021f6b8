//! D-LOGG MAC layer: framed byte I/O over a serial link with byte-sum
//! checksums and bounded-time reads.
//!
//! Two interchangeable backends exist, [`tty::DloggTty`] (plain serial
//! device) and [`ftdi::DloggFtdi`] (USB-FTDI via libftdi), both
//! implementing [`MacTransport`].

pub mod ftdi;
pub mod tty;

use crate::value::{FieldbusError, FieldbusResult};

/// An 8-bit running sum, reset to zero at each protocol fragment boundary.
pub type Chksum = u8;

/// Folds `bytes` into the running checksum, if one is supplied.
///
/// `send_chk`/`read_chk` never call this — the checksum byte itself never
/// contributes to the accumulator it's being compared against.
pub fn update_chksum(chksum: Option<&mut Chksum>, bytes: &[u8]) {
    if let Some(chksum) = chksum {
        for &b in bytes {
            *chksum = chksum.wrapping_add(b);
        }
    }
}

/// Common operations exposed by every MAC transport backend.
///
/// Implementors own the underlying device handle exclusively; there is no
/// sharing and no concurrency between calls (see the concurrency model in
/// the design doc).
pub trait MacTransport {
    /// Writes `bytes` in full, folding them into `chksum` if given.
    fn send(&mut self, bytes: &[u8], chksum: Option<&mut Chksum>) -> FieldbusResult<()>;

    /// Writes the single checksum byte. Does not update `chksum` itself.
    fn send_chksum(&mut self, chksum: Chksum) -> FieldbusResult<()> {
        self.send(&[chksum], None)
    }

    /// Reads exactly `n` bytes, looping on partial reads until satisfied
    /// or the device's read deadline expires.
    fn read(&mut self, n: usize, chksum: Option<&mut Chksum>) -> FieldbusResult<Vec<u8>>;

    /// Reads one byte and compares it to `chksum`. Does not update `chksum`.
    fn read_chksum(&mut self, chksum: Chksum) -> FieldbusResult<()> {
        let got = self.read(1, None)?[0];
        if got != chksum {
            log::info!("received invalid checksum {got:#x}, {chksum:#x} expected");
            return Err(FieldbusError::InvalidResponse);
        }
        Ok(())
    }
}
