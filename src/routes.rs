use log::warn;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::device::Pidee;
use crate::error::PideeError;
use crate::events::DipChange;
use crate::gpio::GpioBackend;

/// Change notification as pushed to websocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "class", rename_all = "kebab-case")]
pub enum ChangeEvent {
    Button { value: bool },
    Dip(DipChange),
}

pub struct AppState<B: GpioBackend> {
    pub device: Arc<Pidee<B>>,
    event_tx: broadcast::Sender<ChangeEvent>,
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<B: GpioBackend + 'static> AppState<B> {
    /// Wraps the device and forwards its button and dip changes to
    /// websocket subscribers.
    pub fn new(device: Arc<Pidee<B>>, broadcast_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_capacity);

        let tx = event_tx.clone();
        device.add_button_listener(move |value| {
            let _ = tx.send(ChangeEvent::Button { value });
        });
        let tx = event_tx.clone();
        device.add_dip_listener(move |change| {
            let _ = tx.send(ChangeEvent::Dip(*change));
        });

        Self { device, event_tx }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.event_tx.subscribe()
    }

    /// Polls the device for pending changes every `interval` on the current
    /// runtime.
    pub fn spawn_poller(&self, interval: Duration) {
        let device = Arc::clone(&self.device);
        actix_web::rt::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = device.poll_and_dispatch() {
                    warn!("poll failed: {e}");
                }
            }
        });
    }

    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        api_scope::<B>(base_path)
    }
}

pub fn api_scope<B: GpioBackend + 'static>(base_path: &str) -> actix_web::Scope {
    web::scope(base_path)
        .service(
            web::resource("/features")
                .route(web::get().to(list_features::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::GET]))
                        .to(method_not_allowed),
                ),
        )
        .service(
            web::resource("/feature/{name}")
                .route(web::get().to(get_feature::<B>))
                .route(web::post().to(set_feature::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::GET, Method::POST]))
                        .to(method_not_allowed),
                ),
        )
        .service(
            web::resource("/button")
                .route(web::get().to(get_button::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::GET]))
                        .to(method_not_allowed),
                ),
        )
        .service(
            web::resource("/dip")
                .route(web::get().to(get_dip::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::GET]))
                        .to(method_not_allowed),
                ),
        )
        .service(
            web::resource("/dip/{index}")
                .route(web::get().to(get_dip_at_index::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::GET]))
                        .to(method_not_allowed),
                ),
        )
        .service(
            web::resource("/led/{color}")
                .route(web::post().to(set_led::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::POST]))
                        .to(method_not_allowed),
                ),
        )
        .service(
            web::resource("/events")
                .route(web::get().to(events_ws::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::GET]))
                        .to(method_not_allowed),
                ),
        )
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<ChangeEvent>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if let Ok(text) = serde_json::to_string(&event) {
                            if session.text(text).await.is_err() {
                                warn!("WebSocket client disconnected");
                                break;
                            }
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        let msg = PideeError::Gpio(format!("Event stream lagged by {n} messages"));
                        if session.text(msg.to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn list_features<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, PideeError> {
    Ok(web::Json(state.device.features()))
}

async fn get_feature<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, PideeError> {
    let name = parse_segment(&req, "name")?;
    let value = state.device.get(name)?;

    Ok(web::Json(u8::from(value)))
}

async fn set_feature<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, PideeError> {
    let name = parse_segment(&req, "name")?;
    let value = parse_value_payload(&body)?;

    state.device.set(name, value)?;

    Ok(HttpResponse::Ok())
}

async fn get_button<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, PideeError> {
    let value = state.device.get_button_value()?;

    Ok(web::Json(u8::from(value)))
}

async fn get_dip<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, PideeError> {
    let value = state.device.get_dip_switch_value()?;

    Ok(web::Json(value))
}

async fn get_dip_at_index<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, PideeError> {
    let index = parse_segment(&req, "index")?
        .parse::<usize>()
        .map_err(|_| PideeError::InvalidValue("Invalid dip index".into()))?;
    let value = state.device.get_dip_switch_at_index(index)?;

    Ok(web::Json(u8::from(value)))
}

async fn set_led<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, PideeError> {
    let color = parse_segment(&req, "color")?;
    let value = parse_value_payload(&body)?;

    match color {
        "red" => state.device.set_led_red(value)?,
        "green" => state.device.set_led_green(value)?,
        "blue" => state.device.set_led_blue(value)?,
        other => return Err(PideeError::UnknownFeature(format!("led-{other}"))),
    }

    Ok(HttpResponse::Ok())
}

async fn events_ws<B: GpioBackend + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, PideeError> {
    let rx = state.subscribe_events();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| PideeError::Gpio(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx).await;
    });

    Ok(response)
}

fn parse_value_payload(body: &[u8]) -> Result<bool, PideeError> {
    if body.is_empty() {
        return Err(PideeError::InvalidValue("Empty value payload".into()));
    }

    let text = std::str::from_utf8(body)
        .map_err(|_| PideeError::InvalidValue("Value payload must be valid UTF-8".into()))?;
    match text.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(PideeError::InvalidValue("Value must be 0 or 1".into())),
    }
}

fn parse_segment<'a>(req: &'a HttpRequest, key: &str) -> Result<&'a str, PideeError> {
    req.match_info()
        .get(key)
        .ok_or_else(|| PideeError::InvalidValue(format!("Missing {key}")))
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
