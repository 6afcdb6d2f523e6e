//! CLI Entry Point for amc100
//!
//! Provides command-line access to an AMC100 controller and runs the
//! simulator:
//! - `serve`: expose a simulated controller over TCP
//! - `info`, `status`: read identity strings and per-axis status
//! - `get`, `set`: read or write any setting by name
//! - `step`: trigger single steps
//! - `error-text`: translate a result code
//!
//! # Usage
//!
//! ```bash
//! amc100 serve --bind 127.0.0.1:9090
//! amc100 set 127.0.0.1 amplitude 45000 --axis 0
//! amc100 status 127.0.0.1 --axis 0
//! ```

use amc100::config::Amc100Config;
use amc100::logging::{self, LoggingSetup};
use amc100::protocol::{error_text, ValueKind};
use amc100::{Amc100, DeviceHandle, Setting, SimulatedDevice, SimulatorServer, Value};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "amc100")]
#[command(about = "AMC100 piezo controller client and simulator", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = amc100::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a simulated controller over TCP
    Serve {
        /// Listen address (defaults to server.bind)
        #[arg(long)]
        bind: Option<String>,

        /// Serial number of the simulated device
        #[arg(long)]
        serial: Option<String>,
    },

    /// Print identity strings of a controller
    Info {
        /// Controller address, host or host:port
        address: String,
    },

    /// Print the status of one axis
    Status {
        /// Controller address
        address: String,

        /// Axis index
        #[arg(long, default_value_t = 0)]
        axis: u32,
    },

    /// Read a setting
    Get {
        /// Controller address
        address: String,

        /// Setting name, e.g. amplitude or rt_out_mode
        param: String,

        /// Axis index for axis-scoped settings
        #[arg(long)]
        axis: Option<u32>,
    },

    /// Write a setting and print the accepted value
    Set {
        /// Controller address
        address: String,

        /// Setting name
        param: String,

        /// New value (integer, or true/false for flags)
        value: String,

        /// Axis index for axis-scoped settings
        #[arg(long)]
        axis: Option<u32>,
    },

    /// Trigger single steps
    Step {
        /// Controller address
        address: String,

        /// Axis index
        #[arg(long, default_value_t = 0)]
        axis: u32,

        /// Step backward
        #[arg(long)]
        backward: bool,

        /// Number of steps
        #[arg(long, default_value_t = 1)]
        count: i32,
    },

    /// Translate a result code
    ErrorText {
        /// Result code
        #[arg(allow_hyphen_values = true)]
        code: i32,

        /// 0 English, 1 German
        #[arg(long, default_value_t = 0)]
        lang: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Amc100Config::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate().context("Invalid configuration")?;
    logging::init(LoggingSetup::from_config(&config).map_err(anyhow::Error::msg)?)
        .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Serve { bind, serial } => serve(&config, bind, serial).await,
        Commands::Info { address } => with_device(&config, &address, info).await,
        Commands::Status { address, axis } => {
            with_device(&config, &address, |amc, h| status(amc, h, axis)).await
        }
        Commands::Get {
            address,
            param,
            axis,
        } => {
            let setting = parse_setting(&param)?;
            with_device(&config, &address, |amc, h| async move {
                let value = amc.read_setting(h, axis, setting).await?;
                println!("{}", render(&value));
                Ok(())
            })
            .await
        }
        Commands::Set {
            address,
            param,
            value,
            axis,
        } => {
            let setting = parse_setting(&param)?;
            let value = parse_value(setting, &value)?;
            with_device(&config, &address, |amc, h| async move {
                let accepted = amc.write_setting(h, axis, setting, value).await?;
                println!("{}", render(&accepted));
                Ok(())
            })
            .await
        }
        Commands::Step {
            address,
            axis,
            backward,
            count,
        } => {
            with_device(&config, &address, |amc, h| async move {
                amc.step(h, axis, backward, count).await?;
                println!("position {}", amc.position(h, axis).await?);
                Ok(())
            })
            .await
        }
        Commands::ErrorText { code, lang } => {
            println!("{}", error_text(lang, code)?);
            Ok(())
        }
    }
}

async fn serve(
    config: &Amc100Config,
    bind: Option<String>,
    serial: Option<String>,
) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let serial = serial.unwrap_or_else(|| config.server.serial_number.clone());

    let server = SimulatorServer::bind(&bind, SimulatedDevice::new(&serial))
        .await
        .with_context(|| format!("Failed to start simulator on {bind}"))?;
    println!("Simulated AMC100 {} listening on {}", serial, server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await;
    Ok(())
}

/// Connect, run `action`, and close again even if the action failed.
async fn with_device<F, Fut>(config: &Amc100Config, address: &str, action: F) -> Result<()>
where
    F: FnOnce(Arc<Amc100>, DeviceHandle) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let amc = Arc::new(Amc100::new(config.client.transport()));
    let handle = amc
        .connect(address)
        .await
        .with_context(|| format!("Failed to connect to {address}"))?;
    let result = action(amc.clone(), handle).await;
    amc.close(handle).await.context("Failed to close session")?;
    result
}

async fn info(amc: Arc<Amc100>, h: DeviceHandle) -> Result<()> {
    println!("device type:  {}", amc.device_type(h).await?);
    println!("device name:  {}", amc.device_name(h).await?);
    println!("serial:       {}", amc.serial_number(h).await?);
    println!("firmware:     {}", amc.firmware_version(h).await?);
    println!("fpga:         {}", amc.fpga_version(h).await?);
    println!("mac address:  {}", amc.mac_address(h).await?);
    println!("ip address:   {}", amc.ip_address(h).await?);
    println!("device id:    {}", amc.device_id(h).await?);
    Ok(())
}

async fn status(amc: Arc<Amc100>, h: DeviceHandle, axis: u32) -> Result<()> {
    let actor_type = amc.actor_type(h, axis).await?;
    let unit = actor_type.position_unit();
    println!("actor:           {} ({:?})", amc.actor_name(h, axis).await?, actor_type);
    println!("connected:       {}", amc.actor_connected(h, axis).await?);
    println!("output:          {}", amc.output(h, axis).await?);
    println!("moving:          {:?}", amc.moving_status(h, axis).await?);
    println!("position:        {} {unit}", amc.position(h, axis).await?);
    println!("target:          {} {unit}", amc.target_position(h, axis).await?);
    println!("in target range: {}", amc.in_target_range(h, axis).await?);
    println!(
        "reference:       {} {unit} (valid: {})",
        amc.reference_position(h, axis).await?,
        amc.reference_valid(h, axis).await?
    );
    println!(
        "end of travel:   fwd {} / bkwd {}",
        amc.eot_forward(h, axis).await?,
        amc.eot_backward(h, axis).await?
    );
    Ok(())
}

fn parse_setting(name: &str) -> Result<Setting> {
    Setting::from_name(name).with_context(|| {
        let known: Vec<_> = Setting::ALL.iter().map(|s| s.name()).collect();
        format!("Unknown setting '{}'. Known: {}", name, known.join(", "))
    })
}

fn parse_value(setting: Setting, raw: &str) -> Result<Value> {
    match setting.kind() {
        ValueKind::Bool => match raw.to_lowercase().as_str() {
            "true" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "off" | "0" => Ok(Value::Bool(false)),
            _ => anyhow::bail!("'{}' expects true or false, got '{}'", setting.name(), raw),
        },
        ValueKind::Int => raw
            .parse::<i32>()
            .map(Value::Int)
            .with_context(|| format!("'{}' expects an integer, got '{}'", setting.name(), raw)),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Unit => "ok".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Text(v) => v.clone(),
        Value::Actor(p) => format!("{p:?}"),
        Value::Lock(l) => format!("locked: {}, authorized: {}", l.locked, l.authorized),
    }
}
