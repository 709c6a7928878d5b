//! Single-address convenience front end over a [`ConnectionRegistry`].

use std::sync::Arc;

use bytes::Bytes;
use relink_transport::RemoteAddress;

use crate::callbacks::Delivery;
use crate::error::{ConnError, Result};
use crate::heartbeat::HeartbeatListener;
use crate::listener::SocketActionListener;
use crate::manager::ConnectionManager;
use crate::options::ConnectionOptions;
use crate::registry::ConnectionRegistry;

/// A default address and options bound to a registry.
///
/// Operations without an explicit address act on the default connection.
/// The `*_for` / `*_to` variants reach any other address in the same registry.
#[derive(Clone)]
pub struct Client {
    registry: Arc<ConnectionRegistry>,
    address: Option<RemoteAddress>,
    options: ConnectionOptions,
}

impl Client {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            address: None,
            options: ConnectionOptions::default(),
        }
    }

    /// Client over [`ConnectionRegistry::global`].
    pub fn global() -> Self {
        Self::new(ConnectionRegistry::global())
    }

    pub fn with_address(mut self, address: RemoteAddress) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn address(&self) -> Option<&RemoteAddress> {
        self.address.as_ref()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Register the default address and connect it.
    pub fn create_connection(&self) -> Result<ConnectionManager> {
        let address = self.address.clone().ok_or(ConnError::MissingAddress)?;
        self.build_connection(address, self.options.clone())
    }

    /// The default connection. `NoActiveConnection` before `create_connection`.
    pub fn connection(&self) -> Result<ConnectionManager> {
        let address = self.address.as_ref().ok_or(ConnError::NoActiveConnection)?;
        self.connection_for(address)
    }

    pub fn connect(&self) -> Result<()> {
        self.connection()?.connect()
    }

    pub fn disconnect(&self, reconnect: bool) -> Result<()> {
        self.connection()?.disconnect(reconnect);
        Ok(())
    }

    /// Disconnect the default connection and remove it from the registry.
    pub fn destroy_connection(&self) -> Result<()> {
        let address = self.address.as_ref().ok_or(ConnError::NoActiveConnection)?;
        if self.registry.destroy(address) {
            Ok(())
        } else {
            Err(ConnError::NoActiveConnection)
        }
    }

    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.connection()?.send(payload)
    }

    pub fn send_with_callback<F>(&self, payload: impl Into<Bytes>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Delivery>) + Send + 'static,
    {
        self.connection()?.send_with_callback(payload, callback)
    }

    pub fn send_request<F>(
        &self,
        payload: impl Into<Bytes>,
        correlation_id: impl Into<String>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Delivery>) + Send + 'static,
    {
        self.connection()?
            .send_request(payload, correlation_id, callback)
    }

    pub fn subscribe(&self, listener: Arc<dyn SocketActionListener>) -> Result<()> {
        self.connection()?.subscribe(listener);
        Ok(())
    }

    pub fn start_heartbeat(
        &self,
        payload: impl Into<Bytes>,
        listener: Option<Arc<dyn HeartbeatListener>>,
    ) -> Result<()> {
        self.connection()?.start_heartbeat(payload, listener)
    }

    /// Get-or-create the manager for `address` and connect it.
    pub fn build_connection(
        &self,
        address: RemoteAddress,
        options: ConnectionOptions,
    ) -> Result<ConnectionManager> {
        let manager = self.registry.get_or_create(address, options)?;
        manager.connect()?;
        Ok(manager)
    }

    pub fn connection_for(&self, address: &RemoteAddress) -> Result<ConnectionManager> {
        self.registry
            .get(address)
            .ok_or(ConnError::NoActiveConnection)
    }

    pub fn send_to(&self, address: &RemoteAddress, payload: impl Into<Bytes>) -> Result<()> {
        self.connection_for(address)?.send(payload)
    }
}
