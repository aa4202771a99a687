//! Biosensor logger - fused MAX30102 / INA219 acquisition over FT232H
//!
//! Streams one CSV line per FIFO sample to stdout; diagnostics go to stderr.
//!
//! Usage:
//!   biosensor-logger --led-current 0x32 --warmup 15 --duration 120 > run.csv

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use log::{error, info, warn};

use ft232_biosensor_interface::ft232h::Ft232hTransport;
use ft232_biosensor_interface::max30102::sample_average_code;
use ft232_biosensor_interface::{
    AcquisitionLoop, LedMode, LoopConfig, OpticalSensor, OpticalSensorConfig, PowerFailurePolicy,
    PowerMonitor, SensorError, SharedBus, StdDelay, StreamControl, TimeKeeper, CSV_HEADER,
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    /// Red LED only
    HeartRate,
    /// Red and IR
    Spo2,
    /// Red and IR through slots 1 and 2
    MultiLed,
}

impl From<ModeArg> for LedMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::HeartRate => LedMode::HeartRate,
            ModeArg::Spo2 => LedMode::SpO2,
            ModeArg::MultiLed => LedMode::MultiLed,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    /// A failed power read counts as 0.0
    BestEffort,
    /// A failed power read keeps the previous smoothed value
    HoldLast,
}

impl From<PolicyArg> for PowerFailurePolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::BestEffort => PowerFailurePolicy::BestEffort,
            PolicyArg::HoldLast => PowerFailurePolicy::HoldLast,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "biosensor-logger")]
#[command(about = "Log fused MAX30102 / INA219 readings as CSV", long_about = None)]
struct Args {
    /// FT232H I2C channel index
    #[arg(short, long, default_value_t = 0)]
    channel: u32,

    /// LED drive current for both LEDs, ~0.2 mA per unit (decimal or 0x hex)
    #[arg(short = 'l', long, default_value = "0x64", value_parser = parse_byte)]
    led_current: u8,

    /// Separate IR LED drive current (defaults to --led-current)
    #[arg(long, value_parser = parse_byte)]
    led_current_ir: Option<u8>,

    /// Samples averaged per FIFO entry: 1, 2, 4, 8, 16 or 32
    #[arg(long, default_value_t = 4)]
    sample_avg: u8,

    /// MAX30102 LED mode
    #[arg(short, long, value_enum, default_value_t = ModeArg::Spo2)]
    mode: ModeArg,

    /// INA219 shunt resistance in ohms
    #[arg(long, default_value_t = 0.1)]
    shunt_ohms: f64,

    /// Largest current expected through the shunt, in amps
    #[arg(long, default_value_t = 0.4)]
    max_current: f64,

    /// Settling time before logging starts, in seconds
    #[arg(short, long, default_value_t = 15)]
    warmup: u32,

    /// Duration in seconds (optional, runs until Ctrl+C if omitted)
    #[arg(short, long)]
    duration: Option<u64>,

    /// How a failed INA219 read feeds the filter
    #[arg(long, value_enum, default_value_t = PolicyArg::BestEffort)]
    power_policy: PolicyArg,
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("'{}' is not a byte value: {}", s, e))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.sample_avg != 1 && sample_average_code(args.sample_avg) == 0 {
        warn!("sample-avg {} is not 1/2/4/8/16/32; averaging disabled", args.sample_avg);
    }

    info!("Biosensor logger starting at {}", chrono::Local::now().to_rfc3339());
    match args.duration {
        Some(duration) => info!("Duration: {} seconds", duration),
        None => info!("Duration: continuous (Ctrl+C to stop)"),
    }

    let transport = match Ft232hTransport::open(args.channel) {
        Ok(t) => t,
        Err(SensorError::NoChannelsFound) => {
            error!("No FT232H devices found.");
            error!("Please check:");
            error!("  1. FT232H is connected via USB");
            error!("  2. FTDI drivers are installed");
            error!("  3. No other application is using the device");
            return Err(Box::new(SensorError::NoChannelsFound));
        }
        Err(e) => {
            error!("Error opening I2C channel: {}", e);
            return Err(Box::new(e));
        }
    };
    let bus = SharedBus::new(transport);

    let optical_config = OpticalSensorConfig {
        sample_avg: args.sample_avg,
        mode: args.mode.into(),
        led_current_red: args.led_current,
        led_current_ir: args.led_current_ir.unwrap_or(args.led_current),
        ..OpticalSensorConfig::default()
    };

    let mut optical = OpticalSensor::new(bus.clone());
    if let Err(e) = optical.init(&optical_config, &mut StdDelay) {
        if let SensorError::DeviceIdentity { .. } = e {
            error!("Please check:");
            error!("  1. MAX30102 is properly connected to FT232H I2C pins");
            error!("  2. Pull-up resistors are present on SDA/SCL lines");
        }
        return Err(Box::new(e));
    }

    let mut power = PowerMonitor::new(bus);
    power.init(args.shunt_ohms, args.max_current)?;

    let loop_config = LoopConfig {
        warmup_ms: args.warmup.saturating_mul(1000),
        power_policy: args.power_policy.into(),
        ..LoopConfig::default()
    };

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping...");
        s.store(true, Ordering::SeqCst);
    })?;

    let mut acquisition =
        AcquisitionLoop::new(optical, power, TimeKeeper::new(), StdDelay, loop_config);

    info!(
        "System ready. LED_PA = 0x{:02X}/0x{:02X}",
        optical_config.led_current_red, optical_config.led_current_ir
    );
    println!("{}", CSV_HEADER);

    // Deadline is armed by the first record so warm-up does not count
    let mut end_time: Option<Instant> = None;
    let stats = acquisition.run(&stop, |record| {
        println!("{}", record);

        if let Some(duration) = args.duration {
            let end = *end_time.get_or_insert_with(|| Instant::now() + Duration::from_secs(duration));
            if Instant::now() >= end {
                return StreamControl::Break;
            }
        }
        StreamControl::Continue
    });

    info!(
        "Stopped after {} cycles: {} records, {} FIFO failures, {} power failures, \
         {} temperature failures, {} temperature timeouts",
        stats.cycles,
        stats.records,
        stats.fifo_failures,
        stats.power_failures,
        stats.temperature_failures,
        stats.temperature_timeouts
    );

    Ok(())
}
