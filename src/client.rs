//! Top-level bot client: one gateway connection plus the REST executor it
//! shares with the application.

use std::sync::Arc;

use frames::GatewayFrame;

use crate::config::Config;
use crate::error::Error;
use crate::gateway::GatewayConnection;
use crate::http::{Attachment, SharedTransport};
use crate::observer::FrameObserver;
use crate::rest::RestClient;

#[derive(Clone)]
pub struct Client {
    config: Arc<Config>,
    rest: RestClient,
    gateway: GatewayConnection,
}

impl Client {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, Error> {
        let rest = RestClient::new(&config)?;
        Ok(Self::assemble(config, rest))
    }

    /// Build from `WIREBOT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the token is missing or a value is
    /// invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::new(Config::from_env()?)
    }

    /// Client whose REST calls (including gateway discovery) go through
    /// `transport`.
    #[must_use]
    pub fn with_transport(config: Config, transport: SharedTransport) -> Self {
        let rest = RestClient::with_transport(transport, config.rate_limit_retries());
        Self::assemble(config, rest)
    }

    fn assemble(config: Config, rest: RestClient) -> Self {
        let config = Arc::new(config);
        let gateway = GatewayConnection::new(Arc::clone(&config), rest.clone());
        Self {
            config,
            rest,
            gateway,
        }
    }

    /// Call `callback` with every inbound gateway payload.
    pub fn on_gateway_payload<F>(&self, callback: F)
    where
        F: Fn(&GatewayFrame) + Send + Sync + 'static,
    {
        self.gateway.add_observer(Arc::new(callback));
    }

    pub fn add_observer(&self, observer: Arc<dyn FrameObserver>) {
        self.gateway.add_observer(observer);
    }

    /// # Errors
    ///
    /// [`Error::NotConnected`] while no socket is open.
    pub fn send_gateway_payload(&self, frame: &GatewayFrame) -> Result<(), Error> {
        self.gateway.send(frame)
    }

    /// # Errors
    ///
    /// See [`GatewayConnection::connect`].
    pub async fn connect(&self) -> Result<(), Error> {
        self.gateway.connect().await
    }

    /// Connect, then block until [`Client::close`] is called.
    ///
    /// # Errors
    ///
    /// See [`GatewayConnection::connect`].
    pub async fn run(&self) -> Result<(), Error> {
        self.connect().await?;
        self.wait_closed().await;
        Ok(())
    }

    pub async fn wait_closed(&self) {
        self.gateway.wait_closed().await;
    }

    pub fn close(&self) {
        self.gateway.close();
    }

    /// # Errors
    ///
    /// [`Error::NotConnected`] if the gateway is not running.
    pub fn reconnect(&self) -> Result<(), Error> {
        self.gateway.reconnect()
    }

    #[must_use]
    pub fn current_shard(&self) -> u32 {
        self.config.current_shard()
    }

    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.config.shard_count()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn gateway(&self) -> &GatewayConnection {
        &self.gateway
    }

    #[must_use]
    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    // =========================================================================
    // REST
    // =========================================================================

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn get(&self, path: &str) -> Result<String, Error> {
        self.rest.get(path).await
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn post(&self, path: &str, json: &str) -> Result<String, Error> {
        self.rest.post(path, json).await
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn post_multipart(
        &self,
        path: &str,
        payload_json: &str,
        attachments: Vec<Attachment>,
    ) -> Result<String, Error> {
        self.rest.post_multipart(path, payload_json, attachments).await
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn put(&self, path: &str, json: &str) -> Result<String, Error> {
        self.rest.put(path, json).await
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn patch(&self, path: &str, json: &str) -> Result<String, Error> {
        self.rest.patch(path, json).await
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn delete(&self, path: &str) -> Result<String, Error> {
        self.rest.delete(path).await
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
