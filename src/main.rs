use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use log::info;

use pidee::{AppConfig, AppState, Pidee, PideeError};

#[cfg(feature = "hardware-gpio")]
use pidee::LibgpiodBackend as Backend;
#[cfg(not(feature = "hardware-gpio"))]
use pidee::MockGpioBackend as Backend;

fn startup_error(stage: &str, e: PideeError) -> io::Error {
    io::Error::other(format!("{stage}: {e}"))
}

#[cfg(feature = "hardware-gpio")]
fn open_backend(config: &AppConfig) -> Result<Backend, PideeError> {
    Backend::new(config.chip.clone())
}

#[cfg(not(feature = "hardware-gpio"))]
fn open_backend(_config: &AppConfig) -> Result<Backend, PideeError> {
    log::warn!("built without hardware-gpio, pins are simulated in memory");
    Ok(Backend::default())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PIDEE_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config =
        AppConfig::load_from_file(&config_path).map_err(|e| startup_error("config", e))?;

    let backend = Arc::new(open_backend(&config).map_err(|e| startup_error("gpio", e))?);
    let device = Pidee::new(config.device.clone(), backend)
        .map_err(|e| startup_error("device setup", e))?;
    info!(
        "pidee ready: {} features, {:?} numbering, events {}",
        device.registry().len(),
        device.numbering_mode(),
        if device.events_enabled() { "on" } else { "off" }
    );

    let state = AppState::new(Arc::new(device), config.broadcast_capacity);
    state.spawn_poller(Duration::from_millis(config.poll_interval_ms));

    let base_path = config.http.path.clone();
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&base_path))
    });

    let mut bound = Vec::new();
    if let Some(socket_path) = &config.http.unix_socket {
        if Path::new(socket_path).exists() {
            fs::remove_file(socket_path)?;
        }
        server = server.bind_uds(socket_path)?;
        bound.push(socket_path.as_str());
    }
    if let Some(host) = &config.http.host {
        server = server.bind_auto_h2c(host)?;
        bound.push(host.as_str());
    }
    if bound.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "either 'unix_socket' or 'host' must be specified",
        ));
    }

    info!("listening on {}", bound.join(" and "));
    server.run().await
}
