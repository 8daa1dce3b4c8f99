//! Bridge client
//!
//! Wires the pieces together: the connection manager feeds inbound
//! envelopes to a serving task, which marshals each command onto the host
//! mutation thread and sends the reply back over the same connection.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::codec::{Envelope, MessageKind, RpcError};
use super::connection::{ConnectionHandle, ConnectionManager, WeakConnectionHandle};
use super::dispatcher::CommandDispatcher;
use super::error::{BridgeError, Result};
use super::executor::MutationExecutor;
use super::host::Host;
use super::tracker::ResponseHandle;
use super::transport::Connector;
use super::BridgeConfig;

/// Name of the host mutation thread
pub const HOST_THREAD_NAME: &str = "host-mutation";

/// A running bridge
///
/// Dropping it without [`BridgeClient::shutdown`] still ends the session:
/// once the last connection handle is gone the manager disconnects
/// gracefully and the serving task and host thread wind down.
pub struct BridgeClient {
    config: BridgeConfig,
    connection: ConnectionHandle,
    executor: MutationExecutor<Host>,
    server: JoinHandle<()>,
}

impl BridgeClient {
    /// Start a bridge serving `host` over links produced by `connector`.
    ///
    /// Connects immediately when `auto_connect` is set.
    pub async fn start(
        config: BridgeConfig,
        connector: Arc<dyn Connector>,
        host: Host,
    ) -> Result<Self> {
        config.validate()?;

        let executor = MutationExecutor::spawn(HOST_THREAD_NAME, host)?;
        let (connection, inbound) = ConnectionManager::spawn(&config, connector);
        let dispatcher = Arc::new(CommandDispatcher::new(&config));
        let server = tokio::spawn(serve(
            inbound,
            dispatcher,
            executor.clone(),
            connection.downgrade(),
        ));

        if config.auto_connect && config.enabled {
            connection.connect().await?;
        }
        info!(auto_connect = config.auto_connect, "Bridge started");

        Ok(Self {
            config,
            connection,
            executor,
            server,
        })
    }

    /// Configuration the bridge was started with
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Handle to the connection manager
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Start connecting.
    pub async fn connect(&self) -> Result<()> {
        Ok(self.connection.connect().await?)
    }

    /// Send a request to the counterpart.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<ResponseHandle> {
        self.connection.send_request(method, params).await
    }

    /// Run `f` against the host on the mutation thread.
    pub async fn with_host<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Host) -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.executor.run(f).await?)
    }

    /// Disconnect gracefully and stop serving.
    pub async fn shutdown(self) -> Result<()> {
        let result = self.connection.shutdown().await;
        if let Err(err) = self.server.await {
            warn!(error = %err, "Serving task ended abnormally");
        }
        info!("Bridge stopped");
        result.map_err(BridgeError::from)
    }
}

async fn serve(
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    dispatcher: Arc<CommandDispatcher>,
    executor: MutationExecutor<Host>,
    connection: WeakConnectionHandle,
) {
    while let Some(envelope) = inbound.recv().await {
        if envelope.kind == MessageKind::Response {
            continue;
        }

        let envelope = Arc::new(envelope);
        let job = envelope.clone();
        let handler = dispatcher.clone();
        let reply = match executor.run(move |host| handler.handle(host, &job)).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(
                    method = %envelope.method_name(),
                    error = %err,
                    "Command could not run on the host thread"
                );
                (envelope.kind == MessageKind::Request && envelope.request_id().is_some())
                    .then(|| envelope.reply_error(RpcError::internal(err.to_string())))
            }
        };

        let Some(reply) = reply else { continue };
        let Some(connection) = connection.upgrade() else {
            debug!(method = %envelope.method_name(), "Bridge dropped; reply discarded");
            break;
        };
        if let Err(err) = connection.send(reply).await {
            warn!(method = %envelope.method_name(), error = %err, "Reply dropped");
        }
    }
}
