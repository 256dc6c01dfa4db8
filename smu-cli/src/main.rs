use std::fmt::Display;
use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use smu_lib::channel::{Channel, Led, Sampling};
use smu_lib::regcalc::{self, Parity, StopBits};
use smu_lib::transport::{EventConnection, Link, StreamWriter, open_serial, spawn_reader};
use smu_lib::{Command, LinkConfig, Outcome, Smu};

/// Drive an SMU board over its line protocol.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port of the board (e.g. /dev/ttyACM0 or COM5).
    #[arg(short, long, env = "SMU_PORT", global = true)]
    port: Option<String>,
    /// Connect to a TCP serial bridge (host:port) instead of a local port.
    #[arg(long, conflicts_with = "port", global = true)]
    tcp: Option<String>,
    /// Link settings as JSON; the flags below override it.
    #[arg(short, long, env = "SMU_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Baud rate; ignored by USB-CDC. [default: 115200]
    #[arg(long, global = true)]
    baud: Option<u32>,
    /// How long to wait for a reply, in milliseconds. [default: 2000]
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Largest single write, e.g. 20 for the BLE UART bridge.
    #[arg(long, global = true)]
    chunk: Option<usize>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive line terminal: send stdin lines, print replies.
    Terminal,
    /// Set, toggle or read an LED.
    Led {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=3))]
        led: u8,
        #[arg(value_enum, default_value_t = Action::Get)]
        action: Action,
    },
    /// Drive a differential DAC16 channel to a signed code.
    Dac16 {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        channel: u8,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// Read both ADC24 channels.
    Adc24 {
        #[arg(short, long, value_enum, default_value_t = SamplingArg::Latest)]
        sampling: SamplingArg,
    },
    /// Read bytes of program flash.
    FlashRead {
        #[arg(value_parser = parse_hex_u32)]
        address: u32,
        count: u16,
    },
    /// Program bytes (hex) into flash.
    FlashWrite {
        #[arg(value_parser = parse_hex_u32)]
        address: u32,
        #[arg(value_parser = parse_hex_u8, required = true)]
        bytes: Vec<u8>,
    },
    /// Erase the flash page holding an address.
    FlashErase {
        #[arg(value_parser = parse_hex_u32)]
        address: u32,
    },
    /// Compute peripheral register values (no board needed).
    Regcalc {
        #[command(subcommand)]
        calc: Calc,
    },
}

#[derive(Subcommand, Debug)]
enum Calc {
    /// Timer period in seconds.
    Timer { period: f64 },
    /// SPI clock in Hz and mode 0-3.
    Spi {
        freq: f64,
        #[arg(default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
        mode: u8,
    },
    /// UART baud rate, parity (n/e/o) and stop bits (1/2).
    Uart {
        baud: f64,
        #[arg(default_value = "n")]
        parity: Parity,
        #[arg(default_value = "1")]
        stop_bits: StopBits,
        #[arg(long)]
        flow_control: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Action {
    On,
    Off,
    Toggle,
    Get,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SamplingArg {
    Latest,
    Avg,
    Raw,
}

impl From<SamplingArg> for Sampling {
    fn from(arg: SamplingArg) -> Self {
        match arg {
            SamplingArg::Latest => Sampling::Latest,
            SamplingArg::Avg => Sampling::Average,
            SamplingArg::Raw => Sampling::Raw,
        }
    }
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address {s:?}: {e}"))
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte {s:?}: {e}"))
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    // stdout carries command results, logs go to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Regcalc { calc } = &cli.command {
        print_registers(calc);
        return Ok(());
    }

    let config = link_config(&cli)?;

    match (&cli.port, &cli.tcp) {
        (Some(path), _) => {
            let link = open_serial(path, &config).with_context(|| format!("Failed to open {path}"))?;
            dispatch(link, cli.command).await
        }
        (None, Some(addr)) => {
            let stream = tokio::net::TcpStream::connect(addr)
                .await
                .with_context(|| format!("Failed to connect to {addr}"))?;
            info!(%addr, "Connected");
            let (reader, writer) = stream.into_split();
            let writer = StreamWriter::new(writer, config.max_write_size);
            let (link, handle) = EventConnection::open(writer, &config);
            let _reader = spawn_reader(reader, handle);
            dispatch(link, cli.command).await
        }
        (None, None) => bail!("No board given: pass --port <PATH> or --tcp <HOST:PORT>"),
    }
}

fn link_config(cli: &Cli) -> Result<LinkConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file at: {:?}", path))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid config file {:?}", path))?
        }
        None => LinkConfig::default(),
    };
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    if let Some(ms) = cli.timeout_ms {
        config.read_timeout_ms = ms;
        config.response_timeout_ms = ms;
    }
    if cli.chunk.is_some() {
        config.max_write_size = cli.chunk;
    }
    debug!(?config, "Link settings");
    Ok(config)
}

async fn dispatch<L: Link>(link: L, command: Commands) -> Result<()> {
    if let Commands::Terminal = command {
        return terminal(link).await;
    }

    let mut smu = Smu::open(link).await.context("Handshake failed")?;
    match command {
        Commands::Led { led, action } => {
            let led = match led {
                1 => Led::Led1,
                2 => Led::Led2,
                _ => Led::Led3,
            };
            match action {
                Action::On => report(smu.set_led(led, true).await?.map(|()| "ok")),
                Action::Off => report(smu.set_led(led, false).await?.map(|()| "ok")),
                Action::Toggle => report(smu.toggle_led(led).await?.map(|()| "ok")),
                Action::Get => report(smu.led(led).await?.map(|on| if on { "on" } else { "off" })),
            }
        }
        Commands::Dac16 { channel, value } => {
            let channel = if channel == 1 { Channel::Ch1 } else { Channel::Ch2 };
            report(smu.dac16_set_channel(channel, value).await?.map(|()| "ok"))
        }
        Commands::Adc24 { sampling } => {
            let outcome = smu.adc24_both(sampling.into()).await?;
            report(outcome.map(|[ch1, ch2]| format!("CH1 = {ch1}\nCH2 = {ch2}")))
        }
        Commands::FlashRead { address, count } => {
            let outcome = smu.flash_read(address, count).await?;
            report(outcome.map(|bytes| {
                bytes
                    .iter()
                    .map(|b| format!("{b:02X}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            }))
        }
        Commands::FlashWrite { address, bytes } => {
            report(smu.flash_write(address, &bytes).await?.map(|()| "ok"))
        }
        Commands::FlashErase { address } => report(smu.flash_erase(address).await?.map(|()| "ok")),
        Commands::Terminal | Commands::Regcalc { .. } => Ok(()),
    }
}

fn report<T: Display>(outcome: Outcome<T>) -> Result<()> {
    match outcome {
        Outcome::Done(value) => {
            println!("{value}");
            Ok(())
        }
        Outcome::Skipped(reason) => bail!("Command skipped: {reason}"),
    }
}

/// Send each stdin line as a command. Commands the firmware answers
/// (queries and flash reads) wait for one reply line, which is printed.
async fn terminal<L: Link>(mut link: L) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Terminal ready, Ctrl-D to quit");

    while let Some(line) = lines.next_line().await? {
        let command = Command::from(line.as_str());
        if !link.is_connected() {
            bail!("Link closed");
        }
        link.send_line(&command.to_line()).await?;
        debug!(%command, "Sent");

        if command.expects_reply() {
            match link.read_line().await {
                Ok(reply) => println!("{reply}"),
                Err(e) => error!("No reply: {}", e),
            }
        }
    }
    Ok(())
}

fn print_registers(calc: &Calc) {
    let registers: Vec<regcalc::Register> = match *calc {
        Calc::Timer { period } => regcalc::timer_config(period).registers().to_vec(),
        Calc::Spi { freq, mode } => regcalc::spi_config(freq, mode).registers().to_vec(),
        Calc::Uart {
            baud,
            parity,
            stop_bits,
            flow_control,
        } => regcalc::uart_config(baud, parity, stop_bits, flow_control)
            .registers()
            .to_vec(),
    };
    for (name, value) in registers {
        println!("{name} = 0x{value:04X}");
    }
}
