//! Periodic CSV data logger for "Technische Alternative" heating
//! controllers (UVR 61-3 and compatible devices), reached through a
//! D-LOGG USB serial gateway.
//!
//! The crate is organized the way the wire protocol itself is layered:
//!
//! - [`mac`] — framed byte I/O over the serial link, with checksum
//!   helpers and bounded-time reads.
//! - [`protocol`] — the current-data state machine negotiating module
//!   identity/mode and fetching one active-data frame.
//! - [`decode`] — bit-exact UVR 61-3 v1.4 sample decoding and channel
//!   address parsing/validation.
//! - [`registry`] and [`app`] — the driver registry ("manager") and the
//!   application-layer drivers it dispatches channel fetches to.
//! - [`config`] and [`value`] — the shared config-tree and tagged-value
//!   types every layer is written against.
//! - [`csv_writer`] — append-only CSV persistence for fetched rows.

pub mod app;
pub mod config;
pub mod csv_writer;
pub mod decode;
pub mod mac;
pub mod protocol;
pub mod registry;
pub mod value;
