//! kasa-core: devices, discovery and the `kasa` command line.
//!
//! Protocols wrap the transports of `kasa-transport`. IOT and SMART devices
//! are built on top of them and unified by [`device::Device`]. Exposed as a
//! library for integration testing.

pub mod cli;
pub mod config;
pub mod device;
pub mod discover;
pub mod factory;
pub mod feature;
pub mod iot;
pub mod protocol;
pub mod smart;

pub use device::{Child, Device, WifiNetwork};
pub use discover::{discover, discover_single, discovery_stream, DiscoveryEvent, DiscoveryOptions};
pub use factory::connect;
pub use kasa_protocol::{DeviceConfig, DeviceType, KasaError, Result};
