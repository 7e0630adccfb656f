//! Command-line interface for devices behind a mesh gateway.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use meshbus::modbus::RtuFrameBuilder;
use meshbus::provision::{DEFAULT_MODBUS_INTERVAL_SECS, listen};
use meshbus::transport::mqtt::{DEFAULT_PORT, DEFAULT_USERNAME};
use meshbus::transport::{DEFAULT_NODE, DEFAULT_SINK};
use meshbus::{
    AntennaConfig, DeviceLink, DeviceMode, Destination, MqttConfig, MqttTransport, Parity,
    PortConfig, ProvisionConfig, Provisioner, StopBits, TargetPort,
};

/// Most registers the bench server holds.
const MAX_TEXT_REGISTERS: usize = 8;

/// Drive a Modbus device through a mesh gateway.
#[derive(Parser, Debug)]
#[command(name = "meshbus")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// MQTT broker address.
    #[arg(long, global = true, env = "MESHBUS_HOST")]
    host: Option<String>,

    /// MQTT broker port.
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// MQTT broker username.
    #[arg(long, global = true, default_value = DEFAULT_USERNAME)]
    username: String,

    /// MQTT broker password.
    #[arg(long, global = true, env = "MESHBUS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Connect without TLS.
    #[arg(long, global = true)]
    insecure: bool,

    /// Gateway identifier.
    #[arg(long, global = true, env = "MESHBUS_GW")]
    gw: Option<String>,

    /// Sink identifier.
    #[arg(long, global = true, default_value = DEFAULT_SINK)]
    sink: String,

    /// Node address of the device.
    #[arg(long, global = true, default_value_t = DEFAULT_NODE)]
    node: u32,

    /// Modbus slave address.
    #[arg(long, global = true, default_value_t = 1)]
    modbus_addr: u8,

    /// Target serial port of the device (1 or 2).
    #[arg(long, global = true, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    target_port: u8,

    /// Log filter, overridden by `RUST_LOG`.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Device control.
    Device {
        #[command(subcommand)]
        cmd: DeviceCommand,
    },
    /// One-shot Modbus transactions against the bench RTU server.
    Modbus {
        #[command(subcommand)]
        cmd: ModbusCommand,
    },
    /// Read the voltage registers repeatedly.
    Poll {
        /// Period in seconds.
        #[arg(long, default_value_t = 20)]
        period: u64,
    },
    /// Configure all periodic polling slots, one acknowledgment at a time.
    Provision {
        /// Polling interval of each slot in seconds.
        #[arg(long, default_value_t = DEFAULT_MODBUS_INTERVAL_SECS)]
        modbus_interval: u32,
        /// Seconds to wait for each slot's acknowledgment.
        #[arg(long, default_value_t = 60)]
        ack_timeout: u64,
    },
}

/// Device control subcommands.
#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Restart the device.
    Reset,
    /// Request diagnostics.
    Diag,
    /// Set device mode (0 = Modbus master, 1 = sniffer).
    DevMode { mode: u8 },
    /// Set antenna (0 = internal, 1 = external).
    AntCfg { antenna: u8 },
    /// Configure the target serial port.
    PortCfg {
        /// Baudrate.
        baudrate: u32,
        /// Parity (0 = none, 1 = odd, 2 = even).
        parity: u8,
        /// Stop bits (1 or 2).
        stop_bits: u8,
    },
}

/// Bench Modbus subcommands.
#[derive(Subcommand, Debug)]
enum ModbusCommand {
    /// Switch an LED coil.
    WriteCoil {
        /// LED number.
        #[arg(value_parser = clap::value_parser!(u16).range(0..=2))]
        led: u16,
        /// LED value (0 or 1).
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        value: u8,
    },
    /// Read an LED coil.
    ReadCoil {
        /// LED number.
        #[arg(value_parser = clap::value_parser!(u16).range(0..=2))]
        led: u16,
    },
    /// Write text into the holding registers, one character per register.
    WriteRegs {
        /// Up to 8 ASCII letters or digits.
        #[arg(value_parser = parse_register_text)]
        text: String,
    },
    /// Read the holding registers as text.
    ReadRegs,
}

fn parse_register_text(text: &str) -> std::result::Result<String, String> {
    if text.is_empty() || text.len() > MAX_TEXT_REGISTERS {
        return Err(format!("expected 1 to {MAX_TEXT_REGISTERS} characters"));
    }
    if !text.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err("only ASCII letters and digits are allowed".to_owned());
    }
    Ok(text.to_owned())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let host = args.host.clone().context("--host is required")?;
    let gw = args.gw.clone().context("--gw is required")?;
    let password = args.password.clone().context("--password is required")?;

    let mut config = MqttConfig::new(host)
        .port(args.port)
        .credentials(args.username.clone(), password);
    if args.insecure {
        config = config.insecure();
    }
    let destination = Destination::new(gw).sink(args.sink.clone()).node(args.node);
    let target_port = TargetPort::try_from(args.target_port)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            interrupt.cancel();
        }
    });

    let mut link = DeviceLink::mqtt(config, destination);
    link.connect().await.context("cannot connect to broker")?;

    let result = run(&link, &args, target_port, &cancel).await;
    if let Err(e) = link.disconnect().await {
        tracing::debug!("disconnect failed: {}", e);
    }
    result
}

async fn run(
    link: &DeviceLink<MqttTransport>,
    args: &Args,
    target_port: TargetPort,
    cancel: &CancellationToken,
) -> Result<()> {
    let commands = link.commands();
    let rtu = RtuFrameBuilder::new(args.modbus_addr);

    let sent = match &args.command {
        Command::Device { cmd } => match cmd {
            DeviceCommand::Reset => commands.reset().await,
            DeviceCommand::Diag => commands.diagnostics().await,
            DeviceCommand::DevMode { mode } => {
                commands.set_device_mode(DeviceMode::try_from(*mode)?).await
            }
            DeviceCommand::AntCfg { antenna } => {
                commands
                    .set_antenna_config(AntennaConfig::try_from(*antenna)?)
                    .await
            }
            DeviceCommand::PortCfg {
                baudrate,
                parity,
                stop_bits,
            } => {
                let config = PortConfig::new(target_port, *baudrate)
                    .parity(Parity::try_from(*parity)?)
                    .stop_bits(StopBits::try_from(*stop_bits)?);
                commands.set_port_config(config).await
            }
        },
        Command::Modbus { cmd } => {
            let frame = match cmd {
                ModbusCommand::WriteCoil { led, value } => rtu.write_single_coil(*led, *value == 1),
                ModbusCommand::ReadCoil { led } => rtu.read_coils(*led, 1)?,
                ModbusCommand::WriteRegs { text } => {
                    let registers: Vec<u16> = text.bytes().map(u16::from).collect();
                    rtu.write_multiple_registers(0, &registers)?
                }
                ModbusCommand::ReadRegs => {
                    rtu.read_holding_registers(0, MAX_TEXT_REGISTERS as u16)?
                }
            };
            commands.send_modbus_one_shot(target_port, frame).await
        }
        Command::Poll { period } => {
            if *period == 0 {
                bail!("--period must be at least 1 second");
            }
            let frame = rtu.read_input_registers(0x0000, 2)?;
            commands
                .poll(target_port, frame, Duration::from_secs(*period), cancel)
                .await?;
            return Ok(());
        }
        Command::Provision {
            modbus_interval,
            ack_timeout,
        } => {
            let config = ProvisionConfig::new()
                .slave(args.modbus_addr)
                .target_port(target_port)
                .interval_secs(*modbus_interval)
                .ack_timeout(Duration::from_secs(*ack_timeout));
            match Provisioner::new(config).run_and_listen(commands, cancel).await {
                Ok(report) => tracing::info!(slots = report.acked.len(), "done"),
                Err(meshbus::Error::Cancelled) => tracing::info!("provisioning cancelled"),
                Err(e) => return Err(e).context("provisioning failed"),
            }
            return Ok(());
        }
    };

    if let Err(e) = sent {
        tracing::error!(destination = %commands.destination(), "cannot send command: {}", e);
    }

    listen(cancel).await;
    Ok(())
}
