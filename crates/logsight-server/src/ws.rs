// logsight-server/src/ws.rs
//! WebSocket upload protocol.
//!
//! One long-lived connection multiplexes chunked uploads and small asset
//! uploads. Chunks go straight to disk staging; job progress is pushed
//! back over the same socket as `progress` / `processing` events. A
//! malformed frame yields an `error` event and leaves the connection
//! open so the client can retry.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use logsight_session::{CompleteUpload, JobStatus, SessionStatus};

use crate::handlers::decode_base64;
use crate::state::AppState;

/// Poll cadence while watching a processing job
const JOB_WATCH_TICK: Duration = Duration::from_millis(100);

/// Budget for a carrier log to prove it parses
const CARRIER_PARSE_BUDGET: Duration = Duration::from_secs(5);

/// Outbound queue depth per connection
const OUTBOUND_QUEUE: usize = 64;

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
    #[serde(rename = "upload:init", rename_all = "camelCase")]
    UploadInit {
        upload_id: String,
        total_chunks: Option<u32>,
    },
    #[serde(rename = "upload:chunk", rename_all = "camelCase")]
    UploadChunk {
        upload_id: String,
        chunk_index: u32,
        data: String,
        total_chunks: Option<u32>,
    },
    #[serde(rename = "upload:complete", rename_all = "camelCase")]
    UploadComplete {
        upload_id: String,
        name: String,
        total_chunks: u32,
        original_size: Option<u64>,
        compressed_size: Option<u64>,
        encoding: Option<String>,
    },
    #[serde(rename = "map:upload")]
    MapUpload { name: String, data: String },
    #[serde(rename = "rules:upload")]
    RulesUpload { name: String, data: String },
    #[serde(rename = "carrier:upload")]
    CarrierUpload { name: String, data: String },
    #[serde(rename = "ping")]
    Ping,
}

/// `GET /api/ws/uploads`
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle(socket, state))
}

type Outbound = mpsc::Sender<Message>;

async fn send_json(tx: &Outbound, value: serde_json::Value) {
    let text = value.to_string();
    let _ = tx.send(Message::Text(text.into())).await;
}

async fn send_error(tx: &Outbound, code: &str, message: &str) {
    send_json(tx, json!({ "type": "error", "code": code, "message": message })).await;
}

async fn handle(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

    // Single writer task; frame producers push into the queue.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    // Expected chunk totals announced by init frames.
    let mut totals: HashMap<String, u32> = HashMap::new();

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                send_error(&tx, "bad_request", &format!("malformed frame: {err}")).await;
                continue;
            }
        };

        match frame {
            ClientFrame::Ping => {
                send_json(&tx, json!({ "type": "pong" })).await;
            }

            ClientFrame::UploadInit {
                upload_id,
                total_chunks,
            } => {
                if let Some(total) = total_chunks {
                    totals.insert(upload_id.clone(), total);
                }
                send_json(&tx, json!({ "type": "ack", "uploadId": upload_id })).await;
            }

            ClientFrame::UploadChunk {
                upload_id,
                chunk_index,
                data,
                total_chunks,
            } => {
                let bytes = match decode_base64(&data) {
                    Ok(bytes) => bytes,
                    Err(_) => {
                        send_error(&tx, "bad_request", "invalid base64 chunk").await;
                        continue;
                    }
                };
                if let Err(err) = state.uploads.stage_chunk(&upload_id, chunk_index, &bytes) {
                    send_error(&tx, "bad_request", &err.to_string()).await;
                    continue;
                }

                if let Some(total) = total_chunks {
                    totals.insert(upload_id.clone(), total);
                }
                let total = totals.get(&upload_id).copied().unwrap_or(0);
                let received = state.uploads.staged_chunks(&upload_id) as u32;
                send_json(
                    &tx,
                    json!({
                        "type": "progress",
                        "uploadId": upload_id,
                        "received": received,
                        "total": total,
                    }),
                )
                .await;
            }

            ClientFrame::UploadComplete {
                upload_id,
                name,
                total_chunks,
                original_size,
                compressed_size,
                encoding,
            } => {
                let result = state.uploads.complete(CompleteUpload {
                    upload_id: upload_id.clone(),
                    name,
                    total_chunks,
                    original_size,
                    compressed_size,
                    encoding,
                });
                match result {
                    Ok(job_id) => {
                        totals.remove(&upload_id);
                        watch_job(state.clone(), tx.clone(), upload_id, job_id);
                    }
                    Err(err) => send_error(&tx, "conflict", &err.to_string()).await,
                }
            }

            ClientFrame::MapUpload { name, data } => {
                save_asset(&state, &tx, "map", &name, &data).await;
            }
            ClientFrame::RulesUpload { name, data } => {
                save_asset(&state, &tx, "rules", &name, &data).await;
            }

            ClientFrame::CarrierUpload { name, data } => {
                carrier_upload(&state, &tx, &name, &data).await;
            }
        }
    }

    drop(tx);
    let _ = writer.await;
}

/// Push `processing` events until the job is terminal
fn watch_job(state: AppState, tx: Outbound, upload_id: String, job_id: String) {
    tokio::spawn(async move {
        let mut last_progress = -1.0f32;
        loop {
            let snapshot = match state.uploads.get_job(&job_id) {
                Ok(snapshot) => snapshot,
                Err(_) => {
                    send_error(&tx, "not_found", "job vanished").await;
                    return;
                }
            };

            match snapshot.status {
                JobStatus::Complete => {
                    send_json(
                        &tx,
                        json!({
                            "type": "complete",
                            "uploadId": upload_id,
                            "file": snapshot.file,
                        }),
                    )
                    .await;
                    return;
                }
                JobStatus::Error => {
                    send_json(
                        &tx,
                        json!({
                            "type": "error",
                            "code": "internal",
                            "uploadId": upload_id,
                            "message": snapshot.error.unwrap_or_else(|| "upload failed".into()),
                        }),
                    )
                    .await;
                    return;
                }
                JobStatus::Pending | JobStatus::Processing => {
                    if snapshot.progress > last_progress {
                        last_progress = snapshot.progress;
                        send_json(
                            &tx,
                            json!({
                                "type": "processing",
                                "uploadId": upload_id,
                                "stage": snapshot.stage,
                                "progress": snapshot.progress,
                                "stageProgress": snapshot.stage_progress,
                            }),
                        )
                        .await;
                    }
                }
            }
            tokio::time::sleep(JOB_WATCH_TICK).await;
        }
    });
}

/// Store a small map/rules asset directly
async fn save_asset(state: &AppState, tx: &Outbound, kind: &str, name: &str, data: &str) {
    let bytes = match decode_base64(data) {
        Ok(bytes) => bytes,
        Err(_) => {
            send_error(tx, "bad_request", "invalid base64 payload").await;
            return;
        }
    };
    match state.files.save_bytes(name, &bytes) {
        Ok(info) => {
            send_json(tx, json!({ "type": "complete", "kind": kind, "file": info })).await;
        }
        Err(err) => send_error(tx, "internal", &err.to_string()).await,
    }
}

/// Store a carrier log and give it a short budget to prove it parses
async fn carrier_upload(state: &AppState, tx: &Outbound, name: &str, data: &str) {
    let bytes = match decode_base64(data) {
        Ok(bytes) => bytes,
        Err(_) => {
            send_error(tx, "bad_request", "invalid base64 payload").await;
            return;
        }
    };
    let info = match state.files.save_bytes(name, &bytes) {
        Ok(info) => info,
        Err(err) => {
            send_error(tx, "internal", &err.to_string()).await;
            return;
        }
    };

    let path = match state.files.path_of(&info.id) {
        Ok(path) => path,
        Err(err) => {
            send_error(tx, "internal", &err.to_string()).await;
            return;
        }
    };
    let snapshot = match state.sessions.start_session(info.id.clone(), path) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            send_error(tx, "internal", &err.to_string()).await;
            return;
        }
    };

    let deadline = tokio::time::Instant::now() + CARRIER_PARSE_BUDGET;
    loop {
        match state.sessions.get_session(&snapshot.id) {
            Ok(current) if current.status == SessionStatus::Complete => {
                send_json(
                    tx,
                    json!({
                        "type": "complete",
                        "kind": "carrier",
                        "file": info,
                        "sessionId": snapshot.id,
                    }),
                )
                .await;
                return;
            }
            Ok(current) if current.status == SessionStatus::Error => {
                send_error(tx, "unknown_format", "invalid format").await;
                return;
            }
            Ok(_) if tokio::time::Instant::now() >= deadline => {
                send_error(tx, "unknown_format", "invalid format").await;
                return;
            }
            Ok(_) => tokio::time::sleep(JOB_WATCH_TICK).await,
            Err(_) => {
                send_error(tx, "internal", "session vanished").await;
                return;
            }
        }
    }
}
