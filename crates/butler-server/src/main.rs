//! butler - Multiplexed TCP gateway to a data store and a broadcast bus.

use log::{error, info};

use butler_server::{Backends, Config, Gateway};

struct Args {
    config_path: String,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = "butler.toml".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                if i + 1 < args.len() {
                    config_path = args[i + 1].clone();
                    i += 2;
                } else {
                    eprintln!("Error: -c requires a file path");
                    std::process::exit(1);
                }
            }
            "-h" | "--help" => {
                println!("butler - Multiplexed TCP gateway");
                println!();
                println!("Usage: butler [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>     Config file path (default: butler.toml)");
                println!("  -h, --help              Show this help message");
                println!();
                println!("Configuration:");
                println!("  Config file uses TOML format. All settings can be overridden");
                println!("  with environment variables using BUTLER__ prefix:");
                println!();
                println!("  BUTLER__SERVER__BIND=0.0.0.0:9001");
                println!("  BUTLER__SERVER__WORKERS=4");
                println!("  BUTLER__TIMEOUT__IDLE_SECS=120");
                println!("  BUTLER__BACKEND__MODE=tcp");
                println!("  BUTLER__LOG__LEVEL=debug");
                std::process::exit(0);
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
    }

    Args { config_path }
}

fn main() {
    let args = parse_args();

    let config = match Config::load(&args.config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log.filter()))
        .init();

    info!("Loaded configuration from {}", args.config_path);
    info!(
        "Starting butler with {} worker threads ({:?} backend, idle timeout {}s)",
        config.server.worker_count(),
        config.backend.mode,
        config.timeout.idle_secs
    );

    let backends = match Backends::from_config(&config.backend) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to start backends: {}", e);
            std::process::exit(1);
        }
    };

    let gateway = match Gateway::bind(&config, backends) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = gateway.run() {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
