// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rfwsn-sim - simulated sensor network
//!
//! Runs a concentrator and a set of sensor nodes sharing one in-process
//! radio medium. Console lines (`AT+NODES`, `AT+UPDATE:16`, ...) are read
//! from stdin; replies and notifications go to stdout.

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam::channel::{never, select, unbounded, Receiver};
use rfwsn::node::SimSensor;
use rfwsn::oad::image::IMAGE_CRC_START;
use rfwsn::oad::{build_image, ImageHeader, ImageHost, OadStorage, SimFlash, IMAGE_HEADER_SIZE};
use rfwsn::packet::crc16;
use rfwsn::radio::{SimAir, SimRadio};
use rfwsn::{Concentrator, Node, NodeEvent, WsnConfig};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Address of the first simulated node; the others follow
const FIRST_NODE_ADDRESS: u8 = 0x10;

/// Most nodes a single run simulates
const MAX_NODES: usize = 64;

/// Version every simulated device boots with
const BOOT_VERSION: u16 = 0x0100;

const POLL: Duration = Duration::from_millis(100);

type SimStore = OadStorage<SimFlash>;

/// rfWSN network simulator
#[derive(Parser, Debug)]
#[command(name = "rfwsn-sim")]
#[command(version)]
#[command(about = "Simulated rfWSN concentrator and sensor nodes")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Log filter, overrides RUST_LOG (e.g. "debug", "rfwsn=trace")
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run a concentrator and N nodes, reading AT commands from stdin
    Run {
        /// Configuration file (defaults when absent)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of sensor nodes
        #[arg(short = 'n', long, default_value = "3")]
        nodes: usize,

        /// Kind of reading the nodes produce
        #[arg(short, long, value_enum, default_value = "raw")]
        sensor: SensorKind,

        /// Image to upload into the concentrator before starting
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Probability of losing a frame on the air (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        loss: f32,

        /// Seed for sensors and the loss model
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Stop after this many seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Stop when stdin reaches end of file
        #[arg(long)]
        exit_on_eof: bool,
    },

    /// Print the default configuration as TOML
    GenConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a configuration file
    Validate {
        config: PathBuf,
    },

    /// CRC16 of a file, and image header check when it holds an image
    Crc {
        file: PathBuf,
    },

    /// Wrap a firmware body into a downloadable image
    BuildImage {
        /// Firmware body
        body: PathBuf,

        /// Output image
        #[arg(short, long)]
        output: PathBuf,

        /// Image version, MM.mm packed as 0xMMmm
        #[arg(long, default_value = "0x0101", value_parser = parse_u16)]
        image_version: u16,

        /// Four-character image identifier
        #[arg(long, default_value = "WSN1")]
        uid: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SensorKind {
    Raw,
    Adc,
    Dual,
}

fn main() {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if let Some(filter) = &args.log_level {
        logger.parse_filters(filter);
    }
    logger.init();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.mode {
        Mode::Run {
            config,
            nodes,
            sensor,
            image,
            loss,
            seed,
            duration,
            exit_on_eof,
        } => {
            let config = match config {
                Some(path) => WsnConfig::from_file(path)?,
                None => WsnConfig::default(),
            };
            let options = RunOptions {
                nodes,
                sensor,
                image,
                loss,
                seed,
                duration: (duration > 0).then(|| Duration::from_secs(duration)),
                exit_on_eof,
            };
            run_network(&config, &options)
        }
        Mode::GenConfig { output } => {
            let text = WsnConfig::default().to_toml_string()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    println!("Wrote {}", path.display());
                }
                None => print!("{}", text),
            }
            Ok(())
        }
        Mode::Validate { config } => {
            let parsed = WsnConfig::from_file(&config)?;
            println!("{}: ok", config.display());
            println!(
                "  radio {} Hz, {} dBm; arq {} retries, {} ms ack timeout",
                parsed.radio.frequency_hz,
                parsed.radio.power_dbm,
                parsed.arq.max_retries,
                parsed.arq.ack_timeout_ms
            );
            println!(
                "  image slot {} pages of {} bytes",
                parsed.slot_pages(),
                parsed.oad.page_size
            );
            Ok(())
        }
        Mode::Crc { file } => run_crc(&file),
        Mode::BuildImage {
            body,
            output,
            image_version,
            uid,
        } => {
            let uid: [u8; 4] = uid
                .as_bytes()
                .try_into()
                .map_err(|_| format!("uid must be 4 bytes, got {:?}", uid))?;
            let image = build_image(image_version, uid, &std::fs::read(&body)?);
            std::fs::write(&output, &image)?;
            let header = ImageHeader::parse(&image).ok_or("image header")?;
            println!(
                "Wrote {}: version {}, {} bytes, {} blocks, crc {:#06x}",
                output.display(),
                header.version_string(),
                image.len(),
                header.total_blocks(),
                header.crc
            );
            Ok(())
        }
    }
}

fn parse_u16(text: &str) -> Result<u16, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", text, e))
}

struct RunOptions {
    nodes: usize,
    sensor: SensorKind,
    image: Option<PathBuf>,
    loss: f32,
    seed: u64,
    duration: Option<Duration>,
    exit_on_eof: bool,
}

fn image_store(config: &WsnConfig) -> Result<SimStore, rfwsn::Error> {
    let running = ImageHeader {
        version: BOOT_VERSION,
        ..ImageHeader::default()
    };
    let flash = SimFlash::new(config.slot_pages(), config.oad.page_size);
    OadStorage::new(flash, 0, config.oad.image_slot_bytes, running)
}

fn sensor(kind: SensorKind, length: usize, seed: u64) -> SimSensor {
    match kind {
        SensorKind::Raw => SimSensor::raw(length, seed),
        SensorKind::Adc => SimSensor::adc(seed),
        SensorKind::Dual => SimSensor::dual_mode(seed),
    }
}

fn run_network(config: &WsnConfig, options: &RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    if options.nodes > MAX_NODES {
        return Err(format!("at most {} nodes", MAX_NODES).into());
    }
    if !(0.0..=1.0).contains(&options.loss) {
        return Err("loss must be within 0.0 - 1.0".into());
    }

    let air = SimAir::new();
    if options.loss > 0.0 {
        let mut rng = fastrand::Rng::with_seed(options.seed);
        let loss = options.loss;
        air.set_loss(move |_| rng.f32() < loss);
    }

    let concentrator = Concentrator::spawn(air.attach(), image_store(config)?, config)?;
    if let Some(path) = &options.image {
        let image = std::fs::read(path)?;
        let blocks = concentrator.upload_image(ImageHost::new(image))?;
        println!("# uploaded {} ({} blocks)", path.display(), blocks);
    }

    let mut nodes: Vec<Node<SimRadio>> = Vec::with_capacity(options.nodes);
    for index in 0..options.nodes {
        let mut node_config = config.clone();
        node_config.node.address = Some(FIRST_NODE_ADDRESS + index as u8);
        let sensor = sensor(
            options.sensor,
            config.node.sample_length,
            options.seed.wrapping_add(index as u64),
        );
        nodes.push(Node::spawn(air.attach(), sensor, image_store(config)?, &node_config)?);
    }
    println!(
        "# concentrator up, {} node(s) from {:#04x}; type AT commands, Ctrl+C to stop",
        nodes.len(),
        FIRST_NODE_ADDRESS
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut lines = stdin_lines()?;
    let started = Instant::now();
    while running.load(Ordering::SeqCst) {
        if options.duration.is_some_and(|limit| started.elapsed() >= limit) {
            log::info!("duration limit reached");
            break;
        }
        let mut stdin_closed = false;
        select! {
            recv(lines) -> line => match line {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        println!("{}", concentrator.console(line)?);
                    }
                }
                Err(_) => stdin_closed = true,
            },
            recv(concentrator.notifications()) -> note => {
                if let Ok(note) = note {
                    println!("{}", note);
                }
            },
            default(POLL) => {},
        }
        if stdin_closed {
            if options.exit_on_eof {
                break;
            }
            lines = never();
        }
        for node in &nodes {
            while let Ok(event) = node.events().try_recv() {
                println!("# node {:#04x}: {}", node.address(), describe(&event));
            }
        }
    }

    let stats = concentrator.stats()?;
    println!(
        "# received {} frames ({} valid, {} bytes) in {:.1?}",
        stats.total.received,
        stats.total.successful,
        stats.total.bytes,
        started.elapsed()
    );
    for node in nodes {
        node.shutdown();
    }
    concentrator.shutdown();
    Ok(())
}

fn stdin_lines() -> io::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("rfwsn-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn describe(event: &NodeEvent) -> String {
    match event {
        NodeEvent::Downlink(data) => format!("downlink {}", rfwsn::console::to_hex(data)),
        NodeEvent::Command(command) => format!("command {:?}", command),
        NodeEvent::Overrun(true) => "queue overrun, sampling throttled".to_string(),
        NodeEvent::Overrun(false) => "queue drained, sampling restored".to_string(),
        NodeEvent::OadCompleted { version } => format!("image {} installed, node stopped", version),
        NodeEvent::OadFailed(reason) => format!("image update failed: {}", reason),
    }
}

fn run_crc(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    println!("{}: {} bytes, crc16 {:#06x}", path.display(), bytes.len(), crc16(&bytes));

    let Some(header) = ImageHeader::parse(&bytes) else {
        return Ok(());
    };
    let len = header.byte_len();
    if !header.has_image() || len < IMAGE_HEADER_SIZE || len > bytes.len() {
        println!("  no image header");
        return Ok(());
    }
    let computed = crc16(&bytes[IMAGE_CRC_START..len]);
    println!(
        "  image version {}, {} blocks, header crc {:#06x}, computed {:#06x} ({})",
        header.version_string(),
        header.total_blocks(),
        header.crc,
        computed,
        if computed == header.crc { "ok" } else { "MISMATCH" }
    );
    Ok(())
}
