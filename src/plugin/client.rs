// SPDX-License-Identifier: Apache-2.0

//! Plugin child process and its line-delimited JSON channel.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use fedquery_core::wire::{
    CallResult, Handshake, InitializeParams, PluginCall, QueryParams, RpcRequest, RpcResponse,
    MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE,
};
use fedquery_core::{DatabaseSchema, PluginConfig, QueryBatch, QueryConstraint};

use crate::config::PluginBridgeConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::plugin::{CursorIdAllocator, PluginExchange};
use crate::runtime::with_deadline;

struct Channel {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A running plugin process. Calls are serialized over its stdin/stdout.
pub struct ProcessClient {
    path: PathBuf,
    channel: tokio::sync::Mutex<Channel>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    cursor_ids: CursorIdAllocator,
    call_timeout: Option<Duration>,
}

impl ProcessClient {
    /// Starts the plugin and waits for its handshake.
    pub async fn spawn(path: &Path, settings: &PluginBridgeConfig) -> EngineResult<Self> {
        let mut cmd = Command::new(path);
        cmd.env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::connection_failed(format!(
                "cannot start plugin {}: {}",
                path.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::internal("plugin stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::internal("plugin stdout was not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(path.display().to_string(), stderr);
        }

        let mut stdout = BufReader::new(stdout).lines();
        let wait = Duration::from_millis(settings.handshake_timeout_ms);
        let line = tokio::time::timeout(wait, stdout.next_line())
            .await
            .map_err(|_| EngineError::timeout(settings.handshake_timeout_ms))?
            .map_err(|e| EngineError::connection_failed(format!("plugin handshake: {e}")))?
            .ok_or_else(|| {
                EngineError::connection_failed(format!(
                    "plugin {} exited before the handshake",
                    path.display()
                ))
            })?;
        let handshake: Handshake = serde_json::from_str(&line).map_err(|e| {
            EngineError::connection_failed(format!("invalid plugin handshake '{line}': {e}"))
        })?;
        handshake.check()?;

        metrics::record_plugin_process();
        tracing::info!(plugin = %path.display(), pid = ?child.id(), "plugin process started");

        Ok(Self {
            path: path.to_path_buf(),
            channel: tokio::sync::Mutex::new(Channel { stdin, stdout }),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            cursor_ids: CursorIdAllocator::new(),
            call_timeout: settings.call_timeout(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn call(&self, call: PluginCall) -> EngineResult<CallResult> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&RpcRequest { id, call })?;
        line.push('\n');

        let exchange = async {
            let mut channel = self.channel.lock().await;
            channel
                .stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| self.broken(e))?;
            channel.stdin.flush().await.map_err(|e| self.broken(e))?;

            loop {
                let reply = channel
                    .stdout
                    .next_line()
                    .await
                    .map_err(|e| self.broken(e))?
                    .ok_or_else(|| {
                        EngineError::plugin(format!("plugin {} exited", self.path.display()))
                    })?;
                if reply.trim().is_empty() {
                    continue;
                }
                let response: RpcResponse = serde_json::from_str(&reply)
                    .map_err(|e| EngineError::plugin(format!("malformed plugin response: {e}")))?;
                if response.id != id {
                    // Answer to a call abandoned by a deadline.
                    tracing::warn!(expected = id, got = response.id, "discarding stale plugin response");
                    continue;
                }
                return response.into_result();
            }
        };

        with_deadline(self.call_timeout, exchange).await
    }

    fn broken(&self, err: std::io::Error) -> EngineError {
        EngineError::plugin(format!(
            "lost connection to plugin {}: {}",
            self.path.display(),
            err
        ))
    }
}

#[async_trait]
impl PluginExchange for ProcessClient {
    async fn initialize(
        &self,
        table_index: usize,
        config: &PluginConfig,
    ) -> EngineResult<DatabaseSchema> {
        let call = PluginCall::Initialize(InitializeParams {
            table_index,
            config: config.clone(),
        });
        match self.call(call).await? {
            CallResult::Schema(schema) => Ok(schema),
            CallResult::Batch(_) => Err(EngineError::plugin(
                "plugin answered initialize with a row batch",
            )),
        }
    }

    async fn query(
        &self,
        table_index: usize,
        cursor_index: u64,
        constraint: &QueryConstraint,
    ) -> EngineResult<QueryBatch> {
        let call = PluginCall::Query(QueryParams {
            table_index,
            cursor_index,
            constraint: constraint.clone(),
        });
        match self.call(call).await? {
            CallResult::Batch(batch) => Ok(batch),
            CallResult::Schema(_) => Err(EngineError::plugin("plugin answered query with a schema")),
        }
    }

    fn cursor_ids(&self) -> &CursorIdAllocator {
        &self.cursor_ids
    }

    fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }
}

fn forward_stderr(plugin: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "fedquery::plugin", plugin = %plugin, "{}", line);
        }
    });
}
