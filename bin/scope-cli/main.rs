mod config;

use chrono::Local;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn, LevelFilter};
use rusty_scope::{
    plot_waveform, Arg, CaptureRequest, Channel, Reply, ScopeClient, WaveformFormat,
    WaveformRecord,
};
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::config::{load_config_or_default, AppConfig};

/// Rusty Scope command-line tool
#[derive(Parser, Debug)]
#[command(name = "scope-cli")]
#[command(about = "Control and capture from a SCPI oscilloscope", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Connect to this host instead of the configured endpoint
    #[arg(long, value_name = "HOST", global = true, conflicts_with = "device")]
    host: Option<String>,

    /// Connect to this local-bus device instead of the configured endpoint
    #[arg(long, value_name = "PATH", global = true)]
    device: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print identity, trigger, timebase and channel settings
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Drain and print the instrument error queue
    Errors,
    /// Run a query from the command vocabulary and print the reply
    Query {
        name: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run a write-only command from the command vocabulary
    Send {
        name: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print voltage and timing measurements of a channel
    Measure {
        #[arg(long, default_value_t = 1)]
        channel: u8,
        #[arg(long)]
        json: bool,
    },
    /// Capture a waveform and write it as CSV
    Waveform {
        #[arg(long)]
        channel: Option<u8>,
        /// BYTE, WORD or ASC
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        points: Option<u32>,
        /// Plot the capture in the terminal
        #[arg(long)]
        plot: bool,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Save the instrument display as an image
    Screenshot {
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Print voltage measurements repeatedly until Ctrl+C
    Watch {
        #[arg(long, default_value_t = 1)]
        channel: u8,
        /// Seconds between readings
        #[arg(long, default_value_t = 1.0)]
        interval: f64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let (config, fallback_reason) = load_config_or_default(args.config.as_deref())?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    initialize_logging(&log_level)?;
    if let Some(reason) = fallback_reason {
        warn!("Using default configuration: {}", reason);
    }

    let scope = connect(&args, &config)?;
    let result = run_command(&scope, args.command, &config);

    if let Err(e) = scope.close() {
        warn!("Error while closing session: {}", e);
    }
    if let Err(ref e) = result {
        error!("{}", e);
    }
    result
}

fn connect(args: &Args, config: &AppConfig) -> Result<ScopeClient, Box<dyn std::error::Error>> {
    let mut builder = ScopeClient::builder();
    let instrument = &config.instrument;

    builder = match (&args.host, &args.device) {
        (Some(host), _) => builder.network(host).port(instrument.port),
        (None, Some(device)) => builder.local_bus(device),
        (None, None) => {
            let connection = instrument.connection_config();
            info!("Connecting to {}", connection.endpoint);
            return Ok(ScopeClient::open(connection, &rusty_scope::DefaultConnector)?);
        }
    };

    builder = builder
        .timeout(Duration::from_millis(instrument.timeout_ms))
        .connect_timeout(Duration::from_millis(instrument.connect_timeout_ms))
        .opc_poll_interval(Duration::from_millis(instrument.opc_poll_interval_ms));
    if let Some(model) = &instrument.expected_model {
        builder = builder.expect_model(model);
    }

    Ok(builder.build()?)
}

fn run_command(
    scope: &ScopeClient,
    command: Command,
    config: &AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Info { json } => print_info(scope, json),
        Command::Errors => {
            let errors = scope.drain_errors()?;
            if errors.is_empty() {
                println!("No errors");
            }
            for entry in errors {
                println!("{:>5}  {:?}  {}", entry.code, entry.kind(), entry.message);
            }
            Ok(())
        }
        Command::Query { name, args } => {
            let args: Vec<Arg> = args.iter().map(|a| Arg::from_literal(a)).collect();
            match scope.execute(&name, &args, None)? {
                Reply::Text(text) => println!("{}", text),
                Reply::Block(bytes) => println!("<{} byte block>", bytes.len()),
                Reply::Empty => {}
            }
            Ok(())
        }
        Command::Send { name, args } => {
            let args: Vec<Arg> = args.iter().map(|a| Arg::from_literal(a)).collect();
            scope.execute(&name, &args, None)?;
            for entry in scope.drain_errors()? {
                warn!("Instrument reported {}", entry);
            }
            Ok(())
        }
        Command::Measure { channel, json } => print_measurements(scope, Channel::new(channel)?, json),
        Command::Waveform {
            channel,
            format,
            points,
            plot,
            output,
        } => {
            let channel = Channel::new(channel.unwrap_or(config.waveform.channel))?;
            let format: WaveformFormat = format
                .as_deref()
                .unwrap_or(&config.waveform.format)
                .parse()?;

            let mut request = CaptureRequest::new(channel).format(format);
            if let Some(points) = points.or(config.waveform.points) {
                request = request.points(points);
            }

            let record = scope.capture_waveform(request)?;
            if plot {
                plot_waveform(&record, Some(&format!("{} waveform", channel.mnemonic())), None, None)?;
            }

            let output = output.unwrap_or_else(|| timestamped_path("waveform", channel, "csv"));
            write_waveform_csv(&record, channel, &output)?;
            info!("Wrote {} samples to {}", record.len(), output.display());
            Ok(())
        }
        Command::Screenshot { output } => {
            let image = scope.screenshot()?;
            let output = output.unwrap_or_else(|| {
                PathBuf::from(format!("screenshot_{}.png", Local::now().format("%Y%m%d_%H%M%S")))
            });
            fs::write(&output, &image)?;
            info!("Saved {} byte screenshot to {}", image.len(), output.display());
            Ok(())
        }
        Command::Watch { channel, interval } => {
            if !(interval.is_finite() && interval > 0.0) {
                return Err(format!("interval must be positive, got {}", interval).into());
            }
            watch(scope, Channel::new(channel)?, Duration::from_secs_f64(interval))
        }
    }
}

fn print_info(scope: &ScopeClient, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let status = scope.system_status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", status.identity);
    println!("Trigger:  {}", status.trigger_status);
    println!(
        "Timebase: {}/div, offset {}",
        rusty_scope::utils::format_si(status.timebase_scale, "s"),
        rusty_scope::utils::format_si(status.timebase_offset, "s")
    );
    for ch in &status.channels {
        let scale = ch
            .scale
            .map(|v| format!("{}/div", rusty_scope::utils::format_si(v, "V")))
            .unwrap_or_else(|| "-".to_string());
        let offset = ch
            .offset
            .map(|v| rusty_scope::utils::format_si(v, "V"))
            .unwrap_or_else(|| "-".to_string());
        let coupling = ch
            .coupling
            .map(|c| c.mnemonic().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}:    {:>14}  offset {:>12}  {}",
            ch.channel.mnemonic(),
            scale,
            offset,
            coupling
        );
    }
    for entry in &status.errors {
        println!("Error:    {}", entry);
    }
    Ok(())
}

fn format_optional(value: Option<f64>, unit: &str) -> String {
    value
        .map(|v| rusty_scope::utils::format_si(v, unit))
        .unwrap_or_else(|| "-".to_string())
}

fn print_measurements(
    scope: &ScopeClient,
    channel: Channel,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let voltage = scope.voltage_measurements(channel)?;
    let time = scope.time_measurements(channel)?;

    if json {
        let combined = serde_json::json!({
            "channel": channel,
            "voltage": voltage,
            "time": time,
        });
        println!("{}", serde_json::to_string_pretty(&combined)?);
        return Ok(());
    }

    println!("{}", channel.mnemonic());
    println!("  Vpp        {}", format_optional(voltage.vpp, "V"));
    println!("  Vmax       {}", format_optional(voltage.vmax, "V"));
    println!("  Vmin       {}", format_optional(voltage.vmin, "V"));
    println!("  Vrms       {}", format_optional(voltage.vrms, "V"));
    println!("  Vavg       {}", format_optional(voltage.vavg, "V"));
    println!("  Frequency  {}", format_optional(time.frequency, "Hz"));
    println!("  Period     {}", format_optional(time.period, "s"));
    println!("  Rise time  {}", format_optional(time.rise_time, "s"));
    println!("  Fall time  {}", format_optional(time.fall_time, "s"));
    println!("  +Width     {}", format_optional(time.pulse_width, "s"));
    Ok(())
}

fn watch(
    scope: &ScopeClient,
    channel: Channel,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown_flag = setup_shutdown_handler()?;
    info!(
        "Watching {} every {:.1}s, press Ctrl+C to stop",
        channel.mnemonic(),
        interval.as_secs_f64()
    );

    while !shutdown_flag.load(Ordering::SeqCst) {
        let voltage = scope.voltage_measurements(channel)?;
        println!(
            "{}  Vpp {}  Vrms {}  Vavg {}",
            Local::now().format("%H:%M:%S%.3f"),
            format_optional(voltage.vpp, "V"),
            format_optional(voltage.vrms, "V"),
            format_optional(voltage.vavg, "V"),
        );
        std::thread::sleep(interval);
    }

    info!("Stopped by user");
    Ok(())
}

fn setup_shutdown_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    ctrlc::set_handler(move || {
        info!("Ctrl+C received - stopping...");
        shutdown_flag_clone.store(true, Ordering::SeqCst);
    })?;

    Ok(shutdown_flag)
}

fn timestamped_path(prefix: &str, channel: Channel, extension: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}_ch{}_{}.{}",
        prefix,
        channel.number(),
        Local::now().format("%Y%m%d_%H%M%S"),
        extension
    ))
}

fn write_waveform_csv(
    record: &WaveformRecord,
    channel: Channel,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(fs::File::create(path)?);
    let preamble = record.preamble();
    writeln!(writer, "# {} captured {}", channel.mnemonic(), Local::now().to_rfc3339())?;
    writeln!(
        writer,
        "# format {:?}, {} samples, x_increment {:e}, y_increment {:e}",
        preamble.format,
        record.len(),
        preamble.x_increment,
        preamble.y_increment
    )?;
    writeln!(writer, "time,voltage")?;
    for sample in record.samples() {
        writeln!(writer, "{:e},{:e}", sample.time, sample.voltage)?;
    }
    writer.flush()?;
    Ok(())
}

fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    Ok(())
}
