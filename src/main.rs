use log::{error, info};

use raylane::AppConfig;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match AppConfig::from_json_file(&path) {
            Ok(config) => {
                info!("Loaded config from {path}");
                config
            }
            Err(err) => {
                error!("Failed to load config '{path}': {err}");
                std::process::exit(1);
            }
        },
        None => AppConfig::default(),
    };

    if let Err(err) = raylane::run(config) {
        error!("{err}");
        std::process::exit(1);
    }
}
