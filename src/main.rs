use p1gen::config::{Config, ConfigParam, parse_bool, parse_f64, parse_string, parse_u16};
use p1gen::logging::{LoggingConfig, init_logging};
use p1gen::policies::build_policies;
use p1gen::producers::{ModbusPvProducer, StaticLocator};
use p1gen::consumers::{FileSink, P1TelegramConsumer};
use p1gen::registry::Registry;
use p1gen::scheduler::Scheduler;
use p1gen::settings::Settings;
use p1gen::simulator::{SimulatorConsumer, SimulatorHandle, SimulatorProducer};
use p1gen::web::{self, AppState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

const USAGE: &str = "usage: p1gen [--<key> <value>]*\n\n\
Every --key value pair is forwarded to the configuration store; see\n\
SPEC_FULL.md section 6 for the CLI/config contract.";

fn parse_args() -> Result<Vec<String>, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        std::process::exit(0);
    }
    if args.iter().any(|a| a == "--version") {
        println!("{} {}", env!("PRODUCT_NAME"), env!("APP_VERSION"));
        std::process::exit(0);
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            return ExitCode::from(1);
        }
    };

    let logging_config = LoggingConfig::default();
    if let Err(e) = init_logging(&logging_config) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::from(1);
    }

    let config = Config::new();
    config.load_files(env!("PRODUCT_NAME"));
    if let Err(e) = config.apply_cli_args(&args) {
        error!("{e}");
        eprintln!("{e}\n\n{USAGE}");
        return ExitCode::from(1);
    }

    let n_phases = ConfigParam::subscribe(&config, "controls.n_phases", 3u16, parse_u16)
        .get() as usize;
    let interval_ms =
        ConfigParam::subscribe(&config, "controls.interval_ms", 1000.0, parse_f64)
            .get();
    let host =
        ConfigParam::subscribe(&config, "web.host", "0.0.0.0".to_string(), parse_string)
            .get();
    let port = ConfigParam::subscribe(&config, "web.port", 8080u16, parse_u16).get();
    let doc_root = ConfigParam::subscribe(
        &config,
        "web.doc_root",
        "./www".to_string(),
        parse_string,
    )
    .get();
    let settings_path = ConfigParam::subscribe(
        &config,
        "settings.path",
        "./p1gen-settings.json".to_string(),
        parse_string,
    )
    .get();
    let modbus_ip =
        ConfigParam::subscribe(&config, "modbus.ip", "127.0.0.1".to_string(), parse_string)
            .get();
    let modbus_port = ConfigParam::subscribe(&config, "modbus.port", 502u16, parse_u16).get();
    let p1_output_path = ConfigParam::subscribe(
        &config,
        "p1.output_path",
        "/tmp/p1gen-telegram.txt".to_string(),
        parse_string,
    )
    .get();
    let enable_modbus =
        ConfigParam::subscribe(&config, "modbus.enable", true, parse_bool).get();
    let enable_simulator =
        ConfigParam::subscribe(&config, "simulator.enable", false, parse_bool).get();

    let settings = Settings::new(PathBuf::from(settings_path));

    let mut registry = Registry::new();
    for policy in build_policies(&config) {
        registry.register_policy(policy);
    }
    let red_index = registry
        .list_policies()
        .into_iter()
        .find(|(_, info)| info.name == "red")
        .map(|(index, _)| index)
        .unwrap_or(0);
    registry.set_active_policy(red_index);

    let simulator_handle = if enable_simulator {
        let handle = SimulatorHandle::new();
        registry.register_producer(Box::new(SimulatorProducer::new(handle.clone())));
        registry.register_consumer(Box::new(SimulatorConsumer::new(handle.clone())));
        Some(handle)
    } else {
        if enable_modbus {
            let locator = StaticLocator {
                ip: modbus_ip,
                port: modbus_port,
            };
            registry
                .register_producer(Box::new(ModbusPvProducer::new(Box::new(locator), n_phases)));
        }
        registry.register_consumer(Box::new(P1TelegramConsumer::new(
            "ISK5\\2M550T-1012",
            Box::new(FileSink::new(p1_output_path)),
        )));
        None
    };

    let registry = Arc::new(Mutex::new(registry));
    let scheduler = Scheduler::new(
        registry.clone(),
        Duration::from_millis(interval_ms.max(1.0) as u64),
        n_phases,
    );

    let app_state = AppState {
        registry: registry.clone(),
        settings,
        doc_root: PathBuf::from(doc_root),
        simulator: simulator_handle,
    };

    info!("p1gen starting up");

    let web_server = tokio::spawn(async move {
        if let Err(e) = web::serve(app_state, &host, port).await {
            error!("Web server exited with error: {e}");
        }
    });

    scheduler.run().await;

    web_server.abort();
    registry.lock().await.unregister_all();
    info!("p1gen shutdown complete");
    ExitCode::SUCCESS
}
