use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use charger_config::Config;
use charger_core::error::{BuildError, ChargerError};
use charger_core::{ControllerParts, RestoredCycle, Tunables, build_controller, persist, runner};
use charger_hardware::{DisabledWatchdog, FileKvStore, FileWatchdog};
use charger_traits::{
    AnalogInput, LoadSwitch, PowerMonitor, PwmChannel, SupervisorLink, Watchdog,
};
use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod web;

use cli::{Cli, Commands, FILE_GUARD};

fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingBatteryMonitor => {
                "What happened: No battery monitor was provided to the controller.\nLikely causes: Sensor construction failed before the controller was built.\nHow to fix: Check the [sensors] section of the config and the I2C wiring.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid charge parameters ({msg}).\nLikely causes: A corrupt persistence store or out-of-range SET value.\nHow to fix: Fix or delete the store file, then restart."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<ChargerError>() {
        return match ce {
            ChargerError::BatterySensor(detail) => format!(
                "What happened: The battery current/voltage sensor did not answer ({detail}).\nLikely causes: Wrong I2C address, wiring or power fault on the battery monitor.\nHow to fix: Verify [sensors].battery_addr and the bus wiring; the controller refuses to start without the battery sensor."
            ),
            ChargerError::Persistence(detail) => format!(
                "What happened: Reading or writing the persistence store failed ({detail}).\nLikely causes: Bad [store].path, missing directory, or a read-only filesystem.\nHow to fix: Point store.path at a writable location."
            ),
            ChargerError::IterationOverrun(ms) => format!(
                "What happened: One control-loop iteration took {ms} ms (limit 15000).\nLikely causes: A blocked sensor bus or a wedged link peer.\nHow to fix: The process exits so the hardware watchdog can reset the device; check the bus wiring."
            ),
            other => format!(
                "What happened: {other}.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("web.bind") {
        return "What happened: The web endpoint address is invalid.\nHow to fix: Set [web].bind to host:port (e.g. 0.0.0.0:8080) or disable the endpoint.".to_string();
    }
    if lower.contains("open store") {
        return "What happened: The persistence store could not be opened.\nHow to fix: Check [store].path and directory permissions.".to_string();
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Build a file sink writer with optional rotation, storing the
/// non-blocking guard in OnceLock.
fn file_layer(
    file: Option<&str>,
    rotation: Option<&str>,
) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let path = file?;
    let p = std::path::Path::new(path);
    if let Some(parent) = p.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file_appender = match rotation.unwrap_or("never").to_ascii_lowercase().as_str() {
        "daily" => tracing_appender::rolling::daily(".", path),
        "hourly" => tracing_appender::rolling::hourly(".", path),
        _ => tracing_appender::rolling::never(".", path),
    };
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(guard);
    Some(nb_writer)
}

/// Initialize tracing once for the whole app. RUST_LOG wins over the CLI
/// level when set.
fn init_tracing(json: bool, level: &str, file: Option<&str>, rotation: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let console = fmt::layer().json().with_target(false);
        if let Some(nb_writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb_writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    } else {
        let console = fmt::layer().pretty().with_target(false);
        if let Some(nb_writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb_writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    }
}

fn main() -> eyre::Result<()> {
    if let Err(e) = real_main() {
        eprintln!("{}", humanize(&e));
        std::process::exit(2);
    }
    Ok(())
}

fn real_main() -> eyre::Result<()> {
    let cli = Cli::parse();

    // Deployment config: an absent file means defaults (sim bench setups
    // need no config at all).
    let cfg: Config = match fs::read_to_string(&cli.config) {
        Ok(text) => {
            toml::from_str(&text).wrap_err_with(|| format!("parse config {:?}", cli.config))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => {
            return Err(e).wrap_err_with(|| format!("read config {:?}", cli.config));
        }
    };
    cfg.validate()
        .map_err(|e| eyre::eyre!(e))
        .wrap_err("invalid configuration")?;

    init_tracing(
        cli.json,
        &cli.log_level,
        cfg.logging.file.as_deref(),
        cfg.logging.rotation.as_deref(),
    );

    #[cfg(not(feature = "hardware"))]
    let (parts, link) = {
        use charger_hardware::{SimulatedRig, StdioLink};
        let rig = SimulatedRig::from_env();
        let parts = ControllerParts {
            battery_monitor: rig.battery_monitor(),
            panel_monitor: Some(rig.panel_monitor()),
            thermistor: rig.thermistor(),
            pwm: rig.pwm(),
            load_switch: rig.load_switch(),
            solar_led: Some(Box::new(rig.led()) as Box<dyn charger_traits::StatusLed + Send>),
            error_led: Some(Box::new(rig.led()) as Box<dyn charger_traits::StatusLed + Send>),
        };
        let link: Box<dyn SupervisorLink + Send> = Box::new(StdioLink::new());
        (parts, link)
    };

    #[cfg(feature = "hardware")]
    let (parts, link) = {
        use charger_hardware::StdioLink;
        use charger_hardware::hardware::{
            GpioLed, GpioLoadSwitch, HardwarePwm, InaPowerMonitor, Mcp3208, SerialLink,
        };
        let battery =
            InaPowerMonitor::try_new(cfg.sensors.i2c_bus, cfg.sensors.battery_addr)
                .wrap_err("open battery monitor")?;
        // The panel monitor is optional: a failed open degrades to
        // panel_current = 0 with periodic reachability rechecks.
        let panel = InaPowerMonitor::try_new(cfg.sensors.i2c_bus, cfg.sensors.panel_addr)
            .map_err(|e| {
                tracing::warn!(error = %e, "panel monitor open failed");
                e
            })
            .ok();
        let thermistor =
            Mcp3208::try_new(cfg.sensors.ntc_adc_channel).wrap_err("open NTC ADC")?;
        let pwm = HardwarePwm::try_new(cfg.pins.pwm_channel).wrap_err("open gate PWM")?;
        let load_switch =
            GpioLoadSwitch::try_new(cfg.pins.load_control).wrap_err("open load pin")?;
        let solar_led = GpioLed::try_new(cfg.pins.solar_led)
            .ok()
            .map(|l| Box::new(l) as Box<dyn charger_traits::StatusLed + Send>);
        let error_led = GpioLed::try_new(cfg.pins.error_led)
            .ok()
            .map(|l| Box::new(l) as Box<dyn charger_traits::StatusLed + Send>);
        let parts = ControllerParts {
            battery_monitor: battery,
            panel_monitor: panel,
            thermistor,
            pwm,
            load_switch,
            solar_led,
            error_led,
        };
        let link: Box<dyn SupervisorLink + Send> = if cfg.link.device.is_empty() {
            Box::new(StdioLink::new())
        } else {
            Box::new(
                SerialLink::open(&cfg.link.device, cfg.link.baud)
                    .wrap_err("open supervisor link")?,
            )
        };
        (parts, link)
    };

    execute(cli.cmd, &cfg, parts, link)
}

fn execute<B, P, A, W, L>(
    cmd: Commands,
    cfg: &Config,
    parts: ControllerParts<B, P, A, W, L>,
    link: Box<dyn SupervisorLink + Send>,
) -> eyre::Result<()>
where
    B: PowerMonitor,
    P: PowerMonitor,
    A: AnalogInput,
    W: PwmChannel,
    L: LoadSwitch,
{
    match cmd {
        Commands::SelfCheck => {
            tracing::info!("self-check starting");
            let controller = build_controller(
                parts,
                Tunables::default(),
                RestoredCycle::default(),
                None,
            )?;
            tracing::info!(
                state = controller.state().as_wire(),
                battery_v = controller.battery_voltage(),
                panel_sensor = controller.panel_sensor_available(),
                "self-check ok"
            );
            println!("OK");
            Ok(())
        }
        Commands::Snapshot => {
            let kv = FileKvStore::open(&cfg.store.path).wrap_err("open store")?;
            let tunables = persist::load_tunables(&kv);
            let restored = persist::load_restored_cycle(&kv);
            let controller = build_controller(parts, tunables, restored, None)?;
            println!("{}", controller.snapshot(controller.now_ms()).to_json());
            Ok(())
        }
        Commands::Run { no_web, run_for } => {
            let mut kv = FileKvStore::open(&cfg.store.path).wrap_err("open store")?;
            let tunables = persist::load_tunables(&kv);
            let restored = persist::load_restored_cycle(&kv);
            let mut controller = build_controller(parts, tunables, restored, None)?;

            let mut watchdog: Box<dyn Watchdog + Send> = if cfg.watchdog.device.is_empty() {
                Box::new(DisabledWatchdog)
            } else {
                Box::new(
                    FileWatchdog::open(&cfg.watchdog.device).wrap_err("open watchdog device")?,
                )
            };

            let (web_tx, web_rx) = crossbeam_channel::bounded(16);
            let web_enabled = cfg.web.enabled && !no_web;
            if web_enabled {
                let bind: SocketAddr = cfg
                    .web
                    .bind
                    .parse()
                    .map_err(|_| eyre::eyre!("web.bind is not a socket address"))?;
                web::spawn(bind, web_tx).wrap_err("spawn web endpoint")?;
            } else {
                drop(web_tx);
            }

            let shutdown = Arc::new(AtomicBool::new(false));
            if run_for > 0 {
                let shutdown = Arc::clone(&shutdown);
                std::thread::spawn(move || {
                    std::thread::sleep(std::time::Duration::from_secs(run_for));
                    shutdown.store(true, Ordering::Relaxed);
                });
            }

            tracing::info!(web_enabled, run_for, "control loop starting");
            let mut link = link;
            runner::run(
                &mut controller,
                &mut link,
                &mut kv,
                &mut watchdog,
                Some(&web_rx),
                Some(&shutdown),
            )?;
            println!("stopped");
            Ok(())
        }
    }
}
