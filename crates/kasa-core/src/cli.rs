//! Command-line interface: argument parsing, device resolution and the
//! command implementations behind the `kasa` binary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kasa_protocol::{
    ConnectionType, Credentials, DeviceConfig, DeviceFamily, EncryptType, KasaError, Result,
};
use kasa_transport::XorTransport;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::device::Device;
use crate::discover::{discover, discover_single, DiscoveryOptions};
use crate::factory::connect;
use crate::feature::FeatureValue;
use crate::iot::{IotDevice, IotKind};
use crate::protocol::IotProtocol;

/// Control TP-Link Kasa and Tapo smart home devices.
#[derive(Parser, Debug)]
#[command(name = "kasa")]
#[command(version)]
#[command(about = "Control TP-Link Kasa and Tapo smart home devices")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// Device host name or IP address. Without it, discovery runs.
    #[arg(long, env = "KASA_HOST", global = true)]
    pub host: Option<String>,

    /// Port override for the device.
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Username for authenticated devices.
    #[arg(long, env = "KASA_USERNAME", global = true)]
    pub username: Option<String>,

    /// Password for authenticated devices.
    #[arg(long, env = "KASA_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Credentials hash from an earlier session, instead of a password.
    #[arg(long, global = true)]
    pub credentials_hash: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Connect as this device type, skipping discovery.
    #[arg(long = "type", value_enum, global = true)]
    pub device_type: Option<TypeArg>,

    /// Device family for a direct connection, e.g. SMART.TAPOPLUG.
    #[arg(long, global = true, requires = "encrypt_type")]
    pub device_family: Option<String>,

    /// Encryption type for a direct connection: XOR, KLAP or AES.
    #[arg(long, global = true, requires = "device_family")]
    pub encrypt_type: Option<String>,

    /// Login version for a direct connection.
    #[arg(long, global = true)]
    pub login_version: Option<u32>,

    /// Broadcast address used for discovery.
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// Seconds to wait for discovery replies.
    #[arg(long, global = true)]
    pub discovery_timeout: Option<u64>,

    /// Print raw JSON instead of a summary.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging.
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeArg {
    Plug,
    Switch,
    Bulb,
    Dimmer,
    Strip,
    Lightstrip,
    Smart,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Discover devices on the network.
    Discover,
    /// Print the device state.
    State,
    /// Turn the device or one of its sockets on.
    On(PowerArgs),
    /// Turn the device or one of its sockets off.
    Off(PowerArgs),
    /// Get or set the device alias.
    Alias {
        new_alias: Option<String>,
        /// Socket index on power strips.
        #[arg(long)]
        index: Option<usize>,
    },
    /// Get or set brightness.
    Brightness {
        brightness: Option<i64>,
        #[arg(long)]
        transition: Option<i64>,
    },
    /// Get or set colour temperature.
    Temperature {
        temperature: Option<i64>,
        #[arg(long)]
        transition: Option<i64>,
    },
    /// Get or set hue, saturation and value.
    Hsv {
        hue: Option<i64>,
        saturation: Option<i64>,
        value: Option<i64>,
        #[arg(long)]
        transition: Option<i64>,
    },
    /// Get or set the LED indicator.
    Led { state: Option<bool> },
    /// List or set light effects.
    Effect { name: Option<String> },
    /// Show energy meter readings.
    Emeter {
        /// Monthly statistics for a year.
        #[arg(long)]
        year: Option<i32>,
        /// Daily statistics for a month, as YYYY-MM.
        #[arg(long)]
        month: Option<String>,
        /// Erase the stored statistics.
        #[arg(long)]
        erase: bool,
    },
    /// Show the device time.
    Time,
    /// Reboot the device.
    Reboot {
        #[arg(long, default_value_t = 1)]
        delay: u64,
    },
    /// Send a raw command. On SMART devices `command` is the method.
    RawCommand {
        module: String,
        command: String,
        parameters: Option<String>,
    },
    /// List, read or set features.
    Feature {
        name: Option<String>,
        value: Option<String>,
    },
    /// Wifi commands.
    #[command(subcommand)]
    Wifi(WifiCommand),
}

#[derive(Args, Debug, Clone)]
pub struct PowerArgs {
    /// Socket index on power strips.
    #[arg(long)]
    pub index: Option<usize>,
    /// Socket alias on power strips.
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub transition: Option<i64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum WifiCommand {
    /// Scan for networks.
    Scan,
    /// Join a network.
    Join {
        ssid: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value_t = 3)]
        keytype: i64,
    },
}

impl GlobalOptions {
    fn credentials(&self, config: &Config) -> Result<Option<Credentials>> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                Ok(Some(Credentials::new(username.clone(), password.clone())))
            }
            (None, None) => Ok(config.credentials.resolve()),
            _ => Err(KasaError::kasa(
                "Using authentication requires both --username and --password",
            )),
        }
    }

    fn device_config(&self, host: &str, config: &Config) -> Result<DeviceConfig> {
        let mut device_config = DeviceConfig::new(host)
            .with_port_override(self.port)
            .with_credentials(self.credentials(config)?)
            .with_credentials_hash(self.credentials_hash.clone())
            .with_batch_size(config.connection.batch_size);
        if let Some(seconds) = self.timeout.or(config.connection.timeout) {
            device_config = device_config.with_timeout(seconds);
        }
        Ok(device_config)
    }

    fn discovery_options(&self, config: &Config) -> Result<DiscoveryOptions> {
        let mut options = config
            .discovery_options()
            .with_port(self.port)
            .with_credentials(self.credentials(config)?);
        if let Some(target) = &self.target {
            options = options.with_target(target.clone());
        }
        if let Some(seconds) = self.discovery_timeout {
            options = options.with_timeout(Duration::from_secs(seconds));
        }
        if let Some(seconds) = self.timeout {
            options = options.with_device_timeout(Some(seconds));
        }
        Ok(options)
    }
}

/// Run a parsed command line.
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let command = cli.command.clone().unwrap_or(Command::State);
    let Some(host) = cli.global.host.clone() else {
        println!("No host name given, trying discovery..");
        return run_discover(&cli.global, &config).await;
    };
    if matches!(command, Command::Discover) {
        return run_discover(&cli.global, &config).await;
    }

    let device = resolve_device(&host, &cli.global, &config).await?;
    let result = run_command(&device, command, cli.global.json).await;
    if let Err(e) = device.disconnect().await {
        debug!("Error disconnecting from {host}: {e}");
    }
    result
}

/// Connect to `host` the way the options ask for and run the first update.
pub async fn resolve_device(host: &str, global: &GlobalOptions, config: &Config) -> Result<Device> {
    if let Some(type_) = global.device_type {
        let device_config = global.device_config(host, config)?;
        return connect_as(type_, device_config, global).await;
    }

    if let (Some(family), Some(encrypt)) = (&global.device_family, &global.encrypt_type) {
        let connection = ConnectionType::from_values(family, encrypt, global.login_version)?;
        let device_config = global
            .device_config(host, config)?
            .with_connection_type(connection);
        return connect(device_config).await;
    }

    debug!("Discovering {host}");
    let mut device = discover_single(host, global.discovery_options(config)?).await?;
    device.update().await?;
    Ok(device)
}

async fn connect_as(type_: TypeArg, config: DeviceConfig, global: &GlobalOptions) -> Result<Device> {
    let kind = match type_ {
        TypeArg::Plug => IotKind::Plug,
        TypeArg::Switch => IotKind::WallSwitch,
        TypeArg::Bulb => IotKind::Bulb,
        TypeArg::Dimmer => IotKind::Dimmer,
        TypeArg::Strip => IotKind::Strip,
        TypeArg::Lightstrip => IotKind::LightStrip,
        TypeArg::Smart => {
            let encryption = match &global.encrypt_type {
                Some(encrypt) => encrypt.parse()?,
                None => EncryptType::Klap,
            };
            let connection = ConnectionType::new(DeviceFamily::SmartTapoPlug, encryption)
                .with_login_version(global.login_version);
            return connect(config.with_connection_type(connection)).await;
        }
    };

    let transport = XorTransport::new(&config);
    let protocol = Arc::new(IotProtocol::new(config, Box::new(transport)));
    let mut device = Device::Iot(IotDevice::new(protocol, kind));
    device.update().await?;
    Ok(device)
}

async fn run_discover(global: &GlobalOptions, config: &Config) -> Result<()> {
    let options = global.discovery_options(config)?;
    println!(
        "Discovering devices on {} for {} seconds",
        options.target,
        options.discovery_timeout.as_secs()
    );
    let found = discover(options).await?;

    for (host, mut device) in found.devices {
        match device.update().await {
            Ok(()) => print_state(&device, global.json),
            Err(e @ KasaError::Authentication { .. }) => {
                println!("== Authentication failed for device {host} ==");
                println!("\t{e}");
                println!();
            }
            Err(e) => {
                println!("== Unable to update device {host} ==");
                println!("\t{e}");
                println!();
            }
        }
        if let Err(e) = device.disconnect().await {
            debug!("Error disconnecting from {host}: {e}");
        }
    }
    for (host, error) in &found.unsupported {
        println!("== Unsupported device found at {host} ==");
        println!("\t{error}");
        println!();
    }
    for (host, error) in &found.invalid {
        println!("== Unable to read response from {host} ==");
        println!("\t{error}");
        println!();
    }
    Ok(())
}

async fn run_command(device: &Device, command: Command, as_json: bool) -> Result<()> {
    match command {
        Command::Discover | Command::State => print_state(device, as_json),
        Command::On(args) => power(device, args, true).await?,
        Command::Off(args) => power(device, args, false).await?,
        Command::Alias { new_alias, index } => alias(device, new_alias, index).await?,
        Command::Brightness {
            brightness,
            transition,
        } => match brightness {
            None => println!("Brightness: {}", device.brightness()?),
            Some(brightness) => {
                println!("Setting brightness to {brightness}");
                device.set_brightness(brightness, transition).await?;
            }
        },
        Command::Temperature {
            temperature,
            transition,
        } => match temperature {
            None => {
                let (min, max) = device.valid_temperature_range()?;
                println!("Color temperature range: {min}-{max}");
                println!("Current color temperature: {} K", device.color_temp()?);
            }
            Some(temperature) => {
                println!("Setting color temperature to {temperature}");
                device.set_color_temp(temperature, transition).await?;
            }
        },
        Command::Hsv {
            hue,
            saturation,
            value,
            transition,
        } => match (hue, saturation) {
            (Some(hue), Some(saturation)) => {
                println!("Setting HSV: {hue} {saturation} {value:?}");
                device.set_hsv(hue, saturation, value, transition).await?;
            }
            (None, None) => {
                let hsv = device.hsv()?;
                println!("Current HSV: {} {} {}", hsv.hue, hsv.saturation, hsv.value);
            }
            _ => return Err(KasaError::kasa("Setting a color requires hue and saturation")),
        },
        Command::Led { state } => led(device, state).await?,
        Command::Effect { name } => match name {
            None => {
                let effects = device
                    .effect_list()
                    .ok_or_else(|| KasaError::kasa("Device does not support effects"))?;
                println!("Effects: {}", effects.join(", "));
            }
            Some(name) => {
                println!("Setting effect to {name}");
                device.set_effect(&name).await?;
            }
        },
        Command::Emeter { year, month, erase } => emeter(device, year, month, erase).await?,
        Command::Time => println!("Current time: {}", device.time()?),
        Command::Reboot { delay } => {
            println!("Rebooting the device..");
            device.reboot(delay).await?;
        }
        Command::RawCommand {
            module,
            command,
            parameters,
        } => {
            let parameters: Value = match parameters {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Value::Null,
            };
            let response = raw_command(device, &module, &command, parameters).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Feature { name, value } => feature(device, name, value).await?,
        Command::Wifi(WifiCommand::Scan) => {
            println!("Scanning for wifi networks, wait a second..");
            let networks = device.wifi_scan().await?;
            println!("Found {} wifi networks!", networks.len());
            for network in networks {
                println!("\t {network:?}");
            }
        }
        Command::Wifi(WifiCommand::Join {
            ssid,
            password,
            keytype,
        }) => {
            println!("Asking the device to connect to {ssid}..");
            device.wifi_join(&ssid, &password, keytype).await?;
            println!("Response received, the device should now be connecting to {ssid}");
        }
    }
    Ok(())
}

async fn power(device: &Device, args: PowerArgs, on: bool) -> Result<()> {
    let label = if on { "on" } else { "off" };
    let child = match (args.index, &args.name) {
        (Some(index), _) => Some(device.child(index)?),
        (None, Some(name)) => Some(
            device
                .children()
                .into_iter()
                .find(|child| child.alias().as_deref() == Some(name.as_str()))
                .ok_or_else(|| KasaError::kasa(format!("No child device found with name {name}")))?,
        ),
        (None, None) => None,
    };

    match child {
        Some(child) => {
            println!("Turning {label} {}", child.alias().unwrap_or_default());
            if on {
                child.turn_on().await
            } else {
                child.turn_off().await
            }
        }
        None => {
            println!("Turning {label} {}", device.alias()?.unwrap_or_default());
            if on {
                device.turn_on(args.transition).await
            } else {
                device.turn_off(args.transition).await
            }
        }
    }
}

async fn alias(device: &Device, new_alias: Option<String>, index: Option<usize>) -> Result<()> {
    match (new_alias, index) {
        (None, _) => {
            println!("Alias: {}", device.alias()?.unwrap_or_default());
            for child in device.children() {
                println!("\t* {}", child.alias().unwrap_or_default());
            }
        }
        (Some(new_alias), Some(index)) => {
            let child = device.child(index)?;
            println!(
                "Setting alias of {} to {new_alias}",
                child.alias().unwrap_or_default()
            );
            child.set_alias(&new_alias).await?;
        }
        (Some(new_alias), None) => {
            println!("Setting alias to {new_alias}");
            device.set_alias(&new_alias).await?;
        }
    }
    Ok(())
}

async fn led(device: &Device, state: Option<bool>) -> Result<()> {
    let Device::Iot(iot) = device else {
        return Err(KasaError::kasa("LED control is not supported on this device"));
    };
    match state {
        None => println!("LED state: {}", iot.led()?),
        Some(state) => {
            println!("Turning led to {state}");
            iot.set_led(state).await?;
        }
    }
    Ok(())
}

fn parse_month(month: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
        .map_err(|e| KasaError::invalid_value(format!("Invalid month {month}: {e}")))
}

async fn emeter(
    device: &Device,
    year: Option<i32>,
    month: Option<String>,
    erase: bool,
) -> Result<()> {
    if !device.has_emeter() {
        return Err(KasaError::kasa("Device has no emeter"));
    }

    if let Device::Iot(iot) = device {
        if erase {
            println!("Erasing emeter statistics..");
            return iot.erase_emeter_stats().await;
        }
        if let Some(year) = year {
            println!("== For year {year} ==");
            for (month, kwh) in iot.get_emeter_monthly(Some(year), true).await? {
                println!("{month}, {kwh}");
            }
            return Ok(());
        }
        if let Some(month) = month {
            let date = parse_month(&month)?;
            println!("== For month {} of {} ==", date.month(), date.year());
            for (day, kwh) in iot
                .get_emeter_daily(Some(date.year()), Some(date.month()), true)
                .await?
            {
                println!("{day}, {kwh}");
            }
            return Ok(());
        }
    } else if erase || year.is_some() || month.is_some() {
        return Err(KasaError::kasa(
            "Emeter statistics are not supported on this device",
        ));
    }

    println!("== Emeter ==");
    println!("Current: {}", device.emeter_realtime()?);
    let today = Local::now().date_naive();
    if let Some(kwh) = device.emeter_today()? {
        println!("Today ({today}): {kwh} kWh");
    }
    if let Some(kwh) = device.emeter_this_month()? {
        println!("This month ({}-{:02}): {kwh} kWh", today.year(), today.month());
    }
    Ok(())
}

async fn raw_command(device: &Device, module: &str, command: &str, parameters: Value) -> Result<Value> {
    match device {
        Device::Iot(iot) => {
            let parameters = if parameters.is_null() { json!({}) } else { parameters };
            iot.protocol()
                .query(&json!({ module: { command: parameters } }))
                .await
        }
        Device::Smart(smart) => smart.call(command, parameters).await,
    }
}

async fn feature(device: &Device, name: Option<String>, value: Option<String>) -> Result<()> {
    let Some(name) = name else {
        for feature in device.features().iter() {
            print_feature(device, &feature.id);
        }
        return Ok(());
    };

    let feature = device
        .features()
        .get(&name)
        .ok_or_else(|| KasaError::kasa(format!("No feature by name '{name}'")))?;
    match value {
        None => print_feature(device, &feature.id),
        Some(raw) => {
            let value = FeatureValue::parse(&raw, feature.feature_type)?;
            println!("Setting {name} to {value}");
            device.set_feature_value(&name, &value).await?;
        }
    }
    Ok(())
}

fn print_feature(device: &Device, id: &str) {
    let Some(feature) = device.features().get(id) else {
        return;
    };
    let value = device
        .feature_value(id)
        .map_or_else(|e| format!("<error: {e}>"), |v| v.to_string());
    match &feature.unit {
        Some(unit) => println!("\t{} ({id}): {value} {unit}", feature.name),
        None => println!("\t{} ({id}): {value}", feature.name),
    }
}

/// Print a summary of an updated device.
pub fn print_state(device: &Device, as_json: bool) {
    if as_json {
        match serde_json::to_string_pretty(&device.internal_state()) {
            Ok(text) => println!("{text}"),
            Err(e) => println!("Unable to serialise state: {e}"),
        }
        return;
    }

    let alias = device.alias().ok().flatten().unwrap_or_default();
    let model = device.model().unwrap_or_default();
    println!("== {alias} - {model} ==");
    println!("\tHost: {}", device.host());
    println!("\tPort: {}", device.port());
    println!("\tDevice type: {}", device.device_type());
    match device.is_on() {
        Ok(on) => println!("\tDevice state: {}", if on { "ON" } else { "OFF" }),
        Err(e) => println!("\tDevice state: <error: {e}>"),
    }

    let children = device.children();
    if !children.is_empty() {
        println!("\t== Children ==");
        for child in children {
            let state = if child.is_on() { "ON" } else { "OFF" };
            println!(
                "\t* {} ({}) is {state}",
                child.alias().unwrap_or_default(),
                child.device_type()
            );
        }
    }

    println!("\n\t== Generic information ==");
    if let Ok(time) = device.time() {
        println!("\tTime:         {time}");
    }
    if let Ok(info) = device.hw_info() {
        let field = |key: &str| info.get(key).and_then(Value::as_str).unwrap_or("-").to_string();
        println!("\tHardware:     {}", field("hw_ver"));
        println!("\tSoftware:     {}", field("sw_ver"));
    }
    if let Ok(mac) = device.mac() {
        let rssi = device
            .rssi()
            .ok()
            .flatten()
            .map_or_else(|| "-".to_string(), |r| r.to_string());
        println!("\tMAC (rssi):   {mac} ({rssi})");
    }
    if let Ok(location) = device.location() {
        if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
            println!("\tLocation:     {lat}, {lon}");
        }
    }

    if device.is_bulb() {
        println!("\n\t== Light ==");
        if let Ok(brightness) = device.brightness() {
            println!("\tBrightness:   {brightness}");
        }
        if let Ok(hsv) = device.hsv() {
            println!("\tHSV:          {} {} {}", hsv.hue, hsv.saturation, hsv.value);
        }
        if let Ok(temp) = device.color_temp() {
            println!("\tColor temp:   {temp} K");
        }
    }

    if device.has_emeter() {
        println!("\n\t== Current state ==");
        match device.emeter_realtime() {
            Ok(status) => println!("\t{status}"),
            Err(e) => println!("\t<error: {e}>"),
        }
    }

    if !device.features().is_empty() {
        println!("\n\t== Features ==");
        for feature in device.features().iter() {
            print_feature(device, &feature.id);
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_power_with_index() {
        let cli = Cli::parse_from(["kasa", "--host", "10.0.0.2", "on", "--index", "1"]);
        assert_eq!(cli.global.host.as_deref(), Some("10.0.0.2"));
        match cli.command {
            Some(Command::On(args)) => assert_eq!(args.index, Some(1)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_direct_connection() {
        let cli = Cli::parse_from([
            "kasa",
            "--host",
            "10.0.0.3",
            "--device-family",
            "SMART.TAPOPLUG",
            "--encrypt-type",
            "KLAP",
            "--login-version",
            "2",
            "state",
        ]);
        assert_eq!(cli.global.device_family.as_deref(), Some("SMART.TAPOPLUG"));
        assert_eq!(cli.global.encrypt_type.as_deref(), Some("KLAP"));
        assert_eq!(cli.global.login_version, Some(2));
        assert!(matches!(cli.command, Some(Command::State)));
    }

    #[test]
    fn family_requires_encrypt_type() {
        let result = Cli::try_parse_from(["kasa", "--device-family", "SMART.TAPOPLUG"]);
        assert!(result.is_err());
    }

    #[test]
    fn half_credentials_are_rejected() {
        let cli = Cli::parse_from(["kasa", "--username", "me"]);
        let err = cli.global.credentials(&Config::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Using authentication requires both --username and --password"
        );
    }

    #[test]
    fn discovery_options_from_flags() {
        let cli = Cli::parse_from([
            "kasa",
            "--target",
            "192.168.0.255",
            "--discovery-timeout",
            "2",
            "discover",
        ]);
        let options = cli.global.discovery_options(&Config::default()).unwrap();
        assert_eq!(options.target, "192.168.0.255");
        assert_eq!(options.discovery_timeout, Duration::from_secs(2));
    }

    #[test]
    fn month_parsing() {
        let date = parse_month("2024-02").unwrap();
        assert_eq!((date.year(), date.month()), (2024, 2));
        assert!(parse_month("february").is_err());
    }
}
