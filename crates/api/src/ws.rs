use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use secron_core::{SecronError, SecronResult};

use crate::broadcaster::LogBroadcaster;

/// 客户端控制消息
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    channel: Option<String>,
}

pub fn router(broadcaster: Arc<LogBroadcaster>) -> Router {
    Router::new()
        .route("/ws/logs", get(ws_handler))
        .with_state(broadcaster)
}

/// 启动WebSocket日志广播服务
pub async fn serve(
    bind_address: &str,
    broadcaster: Arc<LogBroadcaster>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> SecronResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| SecronError::Network(format!("绑定 {bind_address} 失败: {e}")))?;
    info!("WebSocket日志服务监听 {bind_address}");

    axum::serve(listener, router(broadcaster))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| SecronError::Network(format!("WebSocket服务异常: {e}")))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(broadcaster): State<Arc<LogBroadcaster>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

/// 单连接会话：控制消息与广播转发共用一个出站队列，
/// 连接断开时中止所有频道转发。
async fn handle_socket(socket: WebSocket, broadcaster: Arc<LogBroadcaster>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
    });

    // 连接建立后先回一帧确认
    if out_tx.send(welcome_frame().to_string()).await.is_err() {
        writer.abort();
        return;
    }

    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();
    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = handle_client_message(&text, &broadcaster, &out_tx, &mut subscriptions).await;
        if out_tx.send(reply.to_string()).await.is_err() {
            break;
        }
    }

    debug!("WebSocket连接关闭，取消 {} 个频道订阅", subscriptions.len());
    for handle in subscriptions.into_values() {
        handle.abort();
    }
    writer.abort();
}

fn welcome_frame() -> serde_json::Value {
    json!({
        "type": "connected",
        "message": "连接成功",
        "timestamp": chrono::Utc::now().timestamp(),
    })
}

/// 处理一条控制消息，返回要回给客户端的响应帧
async fn handle_client_message(
    text: &str,
    broadcaster: &Arc<LogBroadcaster>,
    out_tx: &mpsc::Sender<String>,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
) -> serde_json::Value {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(_) => {
            return json!({"type": "error", "message": "无法解析消息"});
        }
    };

    match message.message_type.as_str() {
        "ping" => json!({"type": "pong"}),
        "subscribe" => {
            let Some(channel) = message.channel else {
                return json!({"type": "error", "message": "缺少channel字段"});
            };
            if subscriptions.contains_key(&channel) {
                return json!({"type": "subscribed", "channel": channel});
            }
            let mut rx = broadcaster.subscribe(&channel).await;
            let forward_tx = out_tx.clone();
            let handle = tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(frame) => {
                            if forward_tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                        // 落后太多时丢弃旧消息继续
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            error!("WebSocket订阅者落后，丢弃 {skipped} 条消息");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            });
            subscriptions.insert(channel.clone(), handle);
            json!({"type": "subscribed", "channel": channel})
        }
        "unsubscribe" => {
            let Some(channel) = message.channel else {
                return json!({"type": "error", "message": "缺少channel字段"});
            };
            if let Some(handle) = subscriptions.remove(&channel) {
                handle.abort();
            }
            json!({"type": "unsubscribed", "channel": channel})
        }
        other => json!({"type": "error", "message": format!("未知消息类型: {other}")}),
    }
}
