use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use npulink_engine::{Device, EngineConfig, Network, PROTOCOL_VERSION};
use npulink_transport::{memory_pair, DEFAULT_CAPACITY};
use npulink_wire::ProtocolVersion;
use tracing::warn;

use crate::exit::{engine_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;
use crate::sim::{SimConfig, Simulator};

pub mod infer;
pub mod net_info;
pub mod ping;
pub mod probe;
pub mod version;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Check the protocol version and print the core's capabilities.
    Probe(ProbeArgs),
    /// Send pings to the core subsystem.
    Ping(PingArgs),
    /// Describe a network.
    NetInfo(NetInfoArgs),
    /// Run an inference, optionally cancelling it.
    Infer(InferArgs),
}

/// Settings shared by every command that talks to the core subsystem.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Response timeout for each request (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s", global = true)]
    pub timeout: String,
    /// Simulated inference latency.
    #[arg(long, default_value = "10ms", global = true)]
    pub sim_latency: String,
    /// Product major revision reported by the simulated core.
    #[arg(long, default_value = "1", global = true)]
    pub sim_product_major: u32,
    /// Protocol version announced by the simulated core (major.minor.patch).
    #[arg(long, value_name = "VERSION", global = true)]
    pub sim_version: Option<String>,
    /// Make the simulated core reject every inference.
    #[arg(long, global = true)]
    pub sim_reject: bool,
}

pub fn run(command: Command, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Probe(args) => probe::run(args, link, format),
        Command::Ping(args) => ping::run(args, link, format),
        Command::NetInfo(args) => net_info::run(args, link, format),
        Command::Infer(args) => infer::run(args, link, format),
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct ProbeArgs {}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Number of pings to send.
    #[arg(long, default_value = "1")]
    pub count: u32,
}

/// Which network to use.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct NetworkArgs {
    /// Network built into the core subsystem's firmware.
    #[arg(long)]
    pub index: Option<u32>,
    /// Network model file, copied into DMA memory.
    #[arg(long, value_name = "FILE")]
    pub model: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct NetInfoArgs {
    #[command(flatten)]
    pub network: NetworkArgs,
}

#[derive(Args, Debug)]
pub struct InferArgs {
    #[command(flatten)]
    pub network: NetworkArgs,
    /// Input buffer sizes in bytes (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "1024")]
    pub ifm_size: Vec<usize>,
    /// Output buffer sizes in bytes (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "1024")]
    pub ofm_size: Vec<usize>,
    /// File copied into the first input buffer.
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,
    /// PMU event ids to count (comma-separated, at most 8).
    #[arg(long, value_delimiter = ',')]
    pub pmu_event: Vec<u8>,
    /// Enable the PMU cycle counter.
    #[arg(long)]
    pub cycles: bool,
    /// How long to wait for the inference to finish.
    #[arg(long, default_value = "10s")]
    pub wait_timeout: String,
    /// Cancel the inference after this long (e.g. 5ms).
    #[arg(long, value_name = "DURATION")]
    pub cancel_after: Option<String>,
}

/// A device linked to a simulated core subsystem.
pub struct Session {
    pub device: Arc<Device>,
    _sim: Simulator,
}

impl Session {
    /// Start the simulator and bring the device up.
    pub fn open(link: &LinkArgs) -> CliResult<Self> {
        let config = EngineConfig::default().with_response_timeout(parse_duration(&link.timeout)?);
        let sim = SimConfig {
            latency: parse_duration_allow_zero(&link.sim_latency)?,
            product_major: link.sim_product_major,
            version: match &link.sim_version {
                Some(text) => parse_version(text)?,
                None => PROTOCOL_VERSION,
            },
            reject: link.sim_reject,
        };

        let (transport, core) = memory_pair(DEFAULT_CAPACITY);
        let device = Arc::new(Device::new(Arc::new(transport), config));
        core.attach(device.dispatcher());
        let sim = Simulator::start(core, sim)?;
        install_interrupt_handler(&device)?;

        device
            .probe()
            .map_err(|e| engine_error("device probe failed", e))?;
        Ok(Self { device, _sim: sim })
    }

    pub fn network(&self, args: &NetworkArgs) -> CliResult<Network> {
        match (&args.index, &args.model) {
            (Some(index), _) => Ok(self.device.create_network_from_index(*index)),
            (None, Some(path)) => {
                let data = std::fs::read(path).map_err(|e| {
                    CliError::new(USAGE, format!("cannot read {}: {e}", path.display()))
                })?;
                self.device
                    .create_network(&data)
                    .map_err(|e| engine_error("create network", e))
            }
            (None, None) => Err(CliError::new(USAGE, "--index or --model is required")),
        }
    }
}

/// Whether Ctrl-C was pressed since the session started.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

fn install_interrupt_handler(device: &Arc<Device>) -> CliResult<()> {
    let device = Arc::downgrade(device);
    ctrlc::set_handler(move || {
        INTERRUPTED.store(true, Ordering::SeqCst);
        if let Some(device) = device.upgrade() {
            warn!("interrupted");
            device.interrupt();
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let duration = parse_duration_allow_zero(input)?;
    if duration.is_zero() {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(duration)
}

fn parse_duration_allow_zero(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

fn parse_version(input: &str) -> CliResult<ProtocolVersion> {
    let invalid = || CliError::new(USAGE, format!("invalid version: {input}"));
    let mut parts = input.trim().split('.').map(|p| p.parse::<u8>());
    let (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    Ok(ProtocolVersion {
        major,
        minor,
        patch,
    })
}
