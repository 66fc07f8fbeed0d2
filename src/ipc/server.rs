//! IPC server implementation

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use super::protocol::{Request, Response};
use crate::coordinator::Coordinator;

/// IPC server for handling client requests
pub struct IpcServer {
    coordinator: Arc<Coordinator>,
    socket_path: PathBuf,
}

impl IpcServer {
    pub fn new(coordinator: Arc<Coordinator>, socket_path: PathBuf) -> Self {
        Self {
            coordinator,
            socket_path,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Handle a single request
    pub async fn handle_request(coordinator: &Arc<Coordinator>, request: Request) -> Response {
        match request {
            Request::Search { query, limit } => {
                let limit = limit.unwrap_or(coordinator.config().search.default_limit);
                let coordinator = Arc::clone(coordinator);
                // Lookups hold a std lock and burn CPU; keep them off the reactor
                match tokio::task::spawn_blocking(move || coordinator.search(&query, limit)).await {
                    Ok(results) => Response::search_result(results),
                    Err(e) => Response::error(format!("Search task failed: {}", e)),
                }
            }

            Request::Select { id } => {
                let coordinator = Arc::clone(coordinator);
                match tokio::task::spawn_blocking(move || coordinator.select(&id)).await {
                    Ok(Ok(launch)) => Response::Selected { launch },
                    Ok(Err(e)) => Response::error(e.to_string()),
                    Err(e) => Response::error(format!("Select task failed: {}", e)),
                }
            }

            Request::Status => Response::Status {
                stats: coordinator.status(),
            },

            Request::Reindex => {
                let coordinator = Arc::clone(coordinator);

                // Spawn reindex in background
                tokio::spawn(async move {
                    if let Err(e) = coordinator.rescan().await {
                        error!("Reindex failed: {:#}", e);
                    }
                });

                Response::ok("Full reindex started")
            }
        }
    }

    /// Run the IPC server until the task is dropped
    pub async fn run(&self) -> Result<()> {
        // Remove existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove stale socket {:?}", self.socket_path)
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind {:?}", self.socket_path))?;
        info!("Starting IPC server on {:?}", self.socket_path);

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let coordinator = Arc::clone(&self.coordinator);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(coordinator, stream).await {
                            warn!("Error serving client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// One request line in, one response line out, until the client hangs up
async fn serve_connection(coordinator: Arc<Coordinator>, stream: UnixStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received request: {}", line.trim());

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => IpcServer::handle_request(&coordinator, request).await,
            Err(e) => Response::error(format!("Invalid request: {}", e)),
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
}
