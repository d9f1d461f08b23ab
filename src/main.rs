use std::{env, path::PathBuf};

use adshield::{AdBlocker, Config, ResourceType};

// operator entrypoint: refresh the list cache or classify a single url

const USAGE: &str = "usage: adshield refresh | adshield check <url> [resource-type] [referrer]";

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();

    let config_path = env::var("ADSHIELD_CONFIG").ok().map(PathBuf::from);
    let config = Config::load(config_path).unwrap_or_else(|err| {
        eprintln!("failed to load configuration: {err}");
        std::process::exit(1);
    });

    match args.first().map(String::as_str) {
        Some("refresh") => {
            let blocker = AdBlocker::new(config);
            let summary = blocker.refresh().await;
            tracing::info!(lists = ?summary.lists, "refresh complete");

            match serde_json::to_string(&blocker.state()) {
                Ok(json) => println!("{json}"),
                Err(err) => {
                    eprintln!("failed to serialize state: {err}");
                    std::process::exit(1);
                }
            }
        }
        Some("check") => {
            let Some(url) = args.get(1) else {
                eprintln!("{USAGE}");
                std::process::exit(1);
            };
            let resource_type = args
                .get(2)
                .map(|value| ResourceType::from(value.as_str()))
                .unwrap_or(ResourceType::Other("other".to_string()));
            let referrer = args.get(3).map(String::as_str).unwrap_or_default();

            let blocker = AdBlocker::new(config);
            blocker.refresh().await;

            let verdict = if blocker.should_block(url, &resource_type, referrer) {
                "block"
            } else {
                "allow"
            };
            println!("{verdict}");
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
