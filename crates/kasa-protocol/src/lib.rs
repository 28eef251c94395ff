//! kasa-protocol: Shared types for talking to TP-Link smart home devices.
//!
//! This crate has no I/O. It defines device configuration, the error
//! taxonomy, device types, the XOR cipher, emeter readings and the
//! discovery wire format used by the transport and core crates.

pub mod config;
pub mod device_type;
pub mod discovery;
pub mod emeter;
pub mod error;
pub mod xor;

pub use config::{
    ConnectionType, Credentials, DefaultCredentials, DeviceConfig, DeviceFamily, EncryptType,
    DEFAULT_TIMEOUT_SECS,
};
pub use device_type::DeviceType;
pub use discovery::{DiscoveryResult, EncryptionScheme};
pub use emeter::EmeterStatus;
pub use error::{KasaError, Result, SmartErrorCode};
pub use xor::XorEncryption;
