mod dry_run;
mod gpio;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use rppal::i2c::I2c;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wfc_core::utils::config::DEFAULT_PORT;
use wfc_core::utils::controllers::i2c::{Pca9685Config, Pca9685Driver};
use wfc_core::utils::math::mixing::JoystickMixer;
use wfc_core::utils::{
    ActuatorDriver, ControlLoop, ControllerConfig, MotionMapper, TracingDiagnostics, UdpReceiver,
    WireFormat,
};

use crate::dry_run::TracingDriver;
use crate::gpio::{GpioConfig, L293dDriver};

const EXIT_OK: u8 = 0;
const EXIT_BIND: u8 = 1;
const EXIT_DRIVER_INIT: u8 = 2;
const EXIT_ACTUATOR_FAULT: u8 = 3;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Protocol {
    /// 16-byte little-endian frame
    Binary,
    /// {"l": .., "r": .., "s": .., "q": ..}
    Json,
    /// Legacy "b1,b2,x,y" joystick report
    Joystick,
}

impl From<Protocol> for WireFormat {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Binary => WireFormat::Binary,
            Protocol::Json => WireFormat::Json,
            Protocol::Joystick => WireFormat::Joystick,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// L293D on Raspberry Pi PWM and GPIO pins
    Gpio,
    /// PCA9685 motor HAT on I2C
    Pca9685,
    /// Log actuator writes only
    DryRun,
}

#[derive(Parser)]
#[clap(version = "1.0", about = "UDP command receiver for a tank-drive car")]
struct Opts {
    /// Address to listen on
    #[clap(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,
    /// UDP port to listen on
    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Stop the motors after this many milliseconds without a valid command
    #[clap(long, default_value_t = 300)]
    failsafe_ms: u64,
    /// Datagram encoding
    #[clap(long, value_enum, default_value_t = Protocol::Binary)]
    protocol: Protocol,
    /// Actuator backend
    #[clap(long, value_enum, default_value_t = Backend::Gpio)]
    backend: Backend,
    /// Joystick deadzone, fraction of full deflection
    #[clap(long, default_value_t = 0.08)]
    deadzone: f32,
    /// Joystick expo blend, 0 = linear, 1 = cubic
    #[clap(long, default_value_t = 0.6)]
    expo: f32,
    /// Joystick speed without turbo
    #[clap(long, default_value_t = 0.6)]
    base_speed: f32,
    /// Joystick speed with turbo held
    #[clap(long, default_value_t = 1.0)]
    turbo_speed: f32,
    /// PWM frequency in Hz [default: 20000 for gpio, 50 for pca9685]
    #[clap(long)]
    pwm_freq: Option<f32>,
    /// I2C bus of the PCA9685
    #[clap(long, default_value_t = 1)]
    i2c_bus: u8,
    /// I2C address of the PCA9685
    #[clap(long, default_value = "0x60", value_parser = parse_address)]
    pca_address: u8,
    /// Drop commands whose sequence number is not newer than the last one
    #[clap(long)]
    reject_stale: bool,
    /// Centre the servo at startup and whenever the failsafe stops the motors
    #[clap(long)]
    center_servo: bool,
    /// Debug logging, including raw datagrams
    #[clap(short, long)]
    verbose: bool,
}

impl Opts {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            bind: SocketAddr::new(self.bind, self.port),
            failsafe_timeout: Duration::from_millis(self.failsafe_ms),
            wire_format: self.protocol.into(),
            joystick: JoystickMixer {
                deadzone: self.deadzone,
                expo: self.expo,
                base_speed: self.base_speed,
                turbo_speed: self.turbo_speed,
            },
            reject_stale: self.reject_stale,
            center_servo_on_failsafe: self.center_servo,
        }
    }

    fn gpio_config(&self) -> GpioConfig {
        let mut config = GpioConfig::default();
        if let Some(hz) = self.pwm_freq {
            config.pwm_frequency_hz = f64::from(hz);
        }
        config
    }

    fn pca9685_config(&self) -> Pca9685Config {
        let mut config = Pca9685Config {
            address: self.pca_address,
            ..Pca9685Config::default()
        };
        if let Some(hz) = self.pwm_freq {
            config.pwm_frequency_hz = hz;
        }
        config
    }
}

fn parse_address(value: &str) -> Result<u8, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid I2C address `{}`: {}", value, e))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_pca9685(opts: &Opts) -> anyhow::Result<Pca9685Driver<I2c>> {
    let i2c = I2c::with_bus(opts.i2c_bus)
        .with_context(|| format!("failed to open I2C bus {}", opts.i2c_bus))?;
    Pca9685Driver::new(i2c, opts.pca9685_config()).with_context(|| {
        format!(
            "failed to initialise PCA9685 at {:#04x}",
            opts.pca_address
        )
    })
}

/// Drive the car from `receiver` until shutdown or an actuator fault.
///
/// Returns the process exit status.
fn serve<D: ActuatorDriver>(
    driver: anyhow::Result<D>,
    config: &ControllerConfig,
    receiver: &mut UdpReceiver,
    shutdown: &AtomicBool,
) -> u8 {
    let started = driver.and_then(|driver| {
        let mut mapper = MotionMapper::new(driver)
            .context("failed to put the actuators in the safe state")?
            .center_servo_on_failsafe(config.center_servo_on_failsafe);
        if config.center_servo_on_failsafe {
            mapper
                .apply_safe_state()
                .context("failed to centre the servo")?;
        }
        Ok(mapper)
    });
    let mapper = match started {
        Ok(mapper) => mapper,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_DRIVER_INIT;
        }
    };

    let mut control = ControlLoop::new(config, mapper, TracingDiagnostics, Instant::now());
    let outcome = receiver.run(&mut control, shutdown);

    // The safe state is written on every exit path, including after a fault.
    let released = control.into_mapper().shutdown();

    match (outcome, released) {
        (Ok(()), Ok(())) => {
            info!("motors stopped, bye");
            EXIT_OK
        }
        (Err(fault), _) | (Ok(()), Err(fault)) => {
            error!(%fault, "stopping on actuator fault");
            EXIT_ACTUATOR_FAULT
        }
    }
}

fn main() -> ExitCode {
    let opts: Opts = Opts::parse();
    init_tracing(opts.verbose);

    let config = opts.controller_config();

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            warn!(signal, error = %e, "failed to install signal handler");
        }
    }

    // Bind before touching any hardware.
    let mut receiver = match UdpReceiver::bind(config.bind) {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_BIND);
        }
    };

    info!(
        backend = ?opts.backend,
        protocol = ?opts.protocol,
        failsafe_ms = opts.failsafe_ms,
        "starting"
    );

    let status = match opts.backend {
        Backend::Gpio => {
            let driver = L293dDriver::new(opts.gpio_config())
                .context("failed to initialise GPIO backend");
            serve(driver, &config, &mut receiver, &shutdown)
        }
        Backend::Pca9685 => serve(open_pca9685(&opts), &config, &mut receiver, &shutdown),
        Backend::DryRun => serve(Ok(TracingDriver), &config, &mut receiver, &shutdown),
    };
    ExitCode::from(status)
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket;
    use std::thread;

    use wfc_core::utils::connection::protocol::encode_binary;
    use wfc_core::utils::controllers::mock::{DriverCall, RecordingDriver};
    use wfc_core::utils::{Direction, Motor};

    use super::*;

    #[test]
    fn defaults_match_controller_defaults() {
        let opts = Opts::parse_from(["rc-server"]);
        assert_eq!(opts.controller_config(), ControllerConfig::default());
        assert_eq!(opts.pca9685_config(), Pca9685Config::default());
        assert_eq!(opts.gpio_config().pwm_frequency_hz, 20_000.0);
    }

    #[test]
    fn flags_reach_the_config() {
        let opts = Opts::parse_from([
            "rc-server",
            "--port",
            "6000",
            "--failsafe-ms",
            "500",
            "--protocol",
            "joystick",
            "--backend",
            "dry-run",
            "--reject-stale",
            "--pca-address",
            "0x40",
            "--pwm-freq",
            "60",
        ]);
        let config = opts.controller_config();
        assert_eq!(config.bind.port(), 6000);
        assert_eq!(config.failsafe_timeout, Duration::from_millis(500));
        assert_eq!(config.wire_format, WireFormat::Joystick);
        assert!(config.reject_stale);
        assert!(matches!(opts.backend, Backend::DryRun));
        assert_eq!(opts.pca9685_config().address, 0x40);
        assert_eq!(opts.pca9685_config().pwm_frequency_hz, 60.0);
    }

    fn loopback_config() -> ControllerConfig {
        ControllerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            failsafe_timeout: Duration::from_millis(200),
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn driver_init_failure_exits_2() {
        let config = loopback_config();
        let mut receiver = UdpReceiver::bind(config.bind).unwrap();
        let status = serve::<RecordingDriver>(
            Err(anyhow::anyhow!("no I2C bus")),
            &config,
            &mut receiver,
            &AtomicBool::new(false),
        );
        assert_eq!(status, EXIT_DRIVER_INIT);
    }

    #[test]
    fn failed_initial_safe_state_exits_2() {
        let config = loopback_config();
        let mut receiver = UdpReceiver::bind(config.bind).unwrap();
        let driver = RecordingDriver::new();
        driver.fail_next_write("bridge not responding");

        let status = serve(Ok(driver.clone()), &config, &mut receiver, &AtomicBool::new(false));
        assert_eq!(status, EXIT_DRIVER_INIT);
        assert_eq!(driver.calls().last(), Some(&DriverCall::Release));
    }

    #[test]
    fn requested_shutdown_exits_0_and_releases() {
        let config = ControllerConfig {
            center_servo_on_failsafe: true,
            ..loopback_config()
        };
        let mut receiver = UdpReceiver::bind(config.bind).unwrap();
        let driver = RecordingDriver::new();

        let status = serve(Ok(driver.clone()), &config, &mut receiver, &AtomicBool::new(true));
        assert_eq!(status, EXIT_OK);
        // Centred at startup, not only after a link loss.
        assert!(driver.calls().contains(&DriverCall::Servo(0.5)));
        assert_eq!(driver.calls().last(), Some(&DriverCall::Release));
        assert_eq!(driver.state(Motor::Left), (Direction::Stop, 0.0));
    }

    #[test]
    fn runtime_fault_exits_3_after_safe_state() {
        let config = loopback_config();
        let mut receiver = UdpReceiver::bind(config.bind).unwrap();
        let server = receiver.local_addr().unwrap();
        let driver = RecordingDriver::new();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let driver = driver.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || serve(Ok(driver), &config, &mut receiver, &shutdown))
        };

        // Wait for the startup safe state, then fail the next write.
        let deadline = Instant::now() + Duration::from_secs(2);
        while driver.calls().len() < 4 {
            assert!(Instant::now() < deadline, "server never started");
            thread::sleep(Duration::from_millis(1));
        }
        driver.fail_next_write("pwm write failed");
        UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .send_to(&encode_binary(0.5, 0.5, None, 1), server)
            .unwrap();

        assert_eq!(worker.join().unwrap(), EXIT_ACTUATOR_FAULT);
        let calls = driver.calls();
        assert_eq!(calls.last(), Some(&DriverCall::Release));
        assert!(calls.ends_with(&[
            DriverCall::Duty(Motor::Left, 0.0),
            DriverCall::Direction(Motor::Left, Direction::Stop),
            DriverCall::Duty(Motor::Right, 0.0),
            DriverCall::Direction(Motor::Right, Direction::Stop),
            DriverCall::Release,
        ]));
    }

    #[test]
    fn address_accepts_hex_and_decimal() {
        assert_eq!(parse_address("0x60"), Ok(0x60));
        assert_eq!(parse_address("96"), Ok(96));
        assert!(parse_address("0x1ff").is_err());
    }
}
