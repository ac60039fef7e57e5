//! WebSocket module for real-time dashboard streaming
//!
//! Provides a WebSocket endpoint pushing node realtime changes and new
//! alerts to connected dashboard clients.

use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{Alert, NodeRealtime, WsMessage};
use crate::store::AppState;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the store is polled for changes
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// WebSocket session actor
pub struct WsSession {
    client_id: String,
    last_heartbeat: Instant,
    state: Arc<RwLock<AppState>>,
    /// Last realtime stamp pushed per node
    pushed: HashMap<String, DateTime<Utc>>,
    /// Alert count at the last poll; None until the first poll
    seen_alerts: Option<usize>,
}

impl WsSession {
    pub fn new(client_id: String, state: Arc<RwLock<AppState>>) -> Self {
        Self {
            client_id,
            last_heartbeat: Instant::now(),
            state,
            pushed: HashMap::new(),
            seen_alerts: None,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    client_id = %act.client_id,
                    "WebSocket heartbeat timeout"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn start_store_polling(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(POLL_INTERVAL, |act, ctx| {
            let state = act.state.clone();

            let fut = async move {
                let state = state.read().await;
                let nodes: Vec<(String, NodeRealtime)> = state
                    .list_nodes()
                    .iter()
                    .map(|n| (n.metadata.id.clone(), n.realtime.clone()))
                    .collect();
                let alert_count = state.alert_count();
                let newest_alert: Option<Alert> =
                    state.list_alerts().first().map(|a| (*a).clone());
                (nodes, alert_count, newest_alert)
            };

            let fut = actix::fut::wrap_future::<_, Self>(fut);

            ctx.spawn(fut.map(|(nodes, alert_count, newest_alert), act, ctx| {
                let mut live_ids = Vec::with_capacity(nodes.len());

                for (node_id, realtime) in nodes {
                    live_ids.push(node_id.clone());

                    let Some(stamp) = realtime.last_update else {
                        continue;
                    };
                    if act.pushed.get(&node_id) == Some(&stamp) {
                        continue;
                    }
                    act.pushed.insert(node_id.clone(), stamp);

                    let msg = WsMessage::NodeUpdate { node_id, realtime };
                    if let Ok(json) = serde_json::to_string(&msg) {
                        ctx.text(json);
                    }
                }

                // Forget deleted nodes
                act.pushed.retain(|id, _| live_ids.contains(id));

                match act.seen_alerts {
                    None => act.seen_alerts = Some(alert_count),
                    Some(seen) if alert_count > seen => {
                        act.seen_alerts = Some(alert_count);
                        if let Some(alert) = newest_alert {
                            let msg = WsMessage::AlertRaised(alert);
                            if let Ok(json) = serde_json::to_string(&msg) {
                                ctx.text(json);
                            }
                        }
                    }
                    Some(_) => {}
                }
            }));
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket connected");

        self.start_heartbeat(ctx);
        self.start_store_polling(ctx);

        let msg = WsMessage::Connected {
            client_id: self.client_id.clone(),
        };

        if let Ok(json) = serde_json::to_string(&msg) {
            ctx.text(json);
        }
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket disconnected");

        let state = self.state.clone();
        let client_id = self.client_id.clone();

        // IMPORTANT: Actix runtime spawn (not Tokio)
        actix_rt::spawn(async move {
            let mut state = state.write().await;
            state.remove_client(&client_id);
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                debug!(client_id = %self.client_id, message = %text);

                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Ping) => {
                        self.last_heartbeat = Instant::now();
                        if let Ok(json) = serde_json::to_string(&WsMessage::Pong) {
                            ctx.text(json);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(client_id = %self.client_id, error = %e);
                        let err = WsMessage::Error {
                            message: "Invalid message format".into(),
                        };
                        if let Ok(json) = serde_json::to_string(&err) {
                            ctx.text(json);
                        }
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                info!(client_id = %self.client_id, reason = ?reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e);
                ctx.stop();
            }
            _ => {}
        }
    }
}
