//! IPC client for communicating with the daemon

use anyhow::{bail, Context, Result};
use beacon_core::{IndexStats, LaunchDescriptor, SearchResults};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::{Request, Response};

/// IPC client; a connection is opened per request
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send a request and receive a response
    async fn send_request(&self, request: &Request) -> Result<Response> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .context("Failed to connect to the beacon daemon. Is it running?")?;

        let request_json = serde_json::to_string(request)?;

        // Split into reader and writer
        let (reader, mut writer) = stream.into_split();

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            bail!("Daemon closed the connection without responding");
        }

        let response: Response = serde_json::from_str(&line)?;
        Ok(response)
    }

    /// Ranked candidates for `query`
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<SearchResults> {
        let request = Request::Search {
            query: query.to_string(),
            limit,
        };

        match self.send_request(&request).await? {
            Response::SearchResult {
                hits,
                query_time_ms,
                timed_out,
            } => Ok(SearchResults {
                hits,
                query_time_ms,
                timed_out,
            }),
            Response::Error { message } => bail!("Search failed: {}", message),
            _ => bail!("Unexpected response type"),
        }
    }

    /// Select a candidate and get its launch descriptor
    pub async fn select(&self, id: &str) -> Result<LaunchDescriptor> {
        let request = Request::Select { id: id.to_string() };

        match self.send_request(&request).await? {
            Response::Selected { launch } => Ok(launch),
            Response::Error { message } => bail!("Select failed: {}", message),
            _ => bail!("Unexpected response type"),
        }
    }

    /// Get index status
    pub async fn status(&self) -> Result<IndexStats> {
        match self.send_request(&Request::Status).await? {
            Response::Status { stats } => Ok(stats),
            Response::Error { message } => bail!("Status failed: {}", message),
            _ => bail!("Unexpected response type"),
        }
    }

    /// Trigger reindex
    pub async fn reindex(&self) -> Result<()> {
        match self.send_request(&Request::Reindex).await? {
            Response::Ok { .. } => Ok(()),
            Response::Error { message } => bail!("Reindex failed: {}", message),
            _ => bail!("Unexpected response type"),
        }
    }
}
