use std::{path::PathBuf, sync::Arc};

use strmon::{
    config::{Config, DEFAULT_CONFIG_FILE},
    monitor::Monitor,
    sites,
    store::StreamerStore,
    util::HttpClient,
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Read config path from args
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let config = match Config::from_file(&path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            log::error!("Invalid config {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    let client = match HttpClient::new() {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::error!("Could not create HttpClient: {}", e);
            std::process::exit(1);
        }
    };

    let store = StreamerStore::new(config.streamers_file.clone());
    let monitor = Monitor::new(config.clone(), sites::registry(client)).with_store(store);
    if let Err(e) = monitor.load().await {
        log::error!("Could not load streamers: {}", e);
        std::process::exit(1);
    }

    let mut list_refresh = tokio::time::interval(config.web.list_refresh);
    loop {
        tokio::select! {
            _ = list_refresh.tick() => {
                for entry in monitor.list_all() {
                    log::info!(
                        "{:<40} {:<12} {:>4} files {:>12}",
                        entry.id.to_string(),
                        entry.status.label(),
                        entry.file_count,
                        strmon::util::format_bytes(entry.total_size),
                    );
                }
                log::info!("{}", monitor.totals().summary());
                if let Some(notice) = monitor.error_notice() {
                    log::warn!("{}", notice.message);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    monitor.shutdown().await;
}
