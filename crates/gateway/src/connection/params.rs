//! Connection parameters and client id bookkeeping

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ConnectionError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Broker's paper-trading gateway port
pub const DEFAULT_PORT: u16 = 7497;
pub const DEFAULT_CLIENT_ID: i32 = 1;

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    /// Must be unique among live sessions against the same broker gateway
    pub client_id: i32,
    /// Account code orders are placed under
    pub account: String,
}

impl ConnectionParams {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        client_id: i32,
        account: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            client_id,
            account: account.into(),
        }
    }

    /// Local paper-trading gateway with the default client id
    pub fn local(account: impl Into<String>) -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT, DEFAULT_CLIENT_ID, account)
    }

    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.host.trim().is_empty() {
            return Err(ConnectionError::InvalidParams("host is empty".into()));
        }
        if self.port == 0 {
            return Err(ConnectionError::InvalidParams("port must be 1-65535".into()));
        }
        if self.client_id < 0 {
            return Err(ConnectionError::InvalidParams(format!(
                "client id {} is negative",
                self.client_id
            )));
        }
        if self.account.trim().is_empty() {
            return Err(ConnectionError::InvalidParams("account code is empty".into()));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client ids held by live sessions in this process
///
/// The broker drops the older session when two connect with the same id;
/// claiming here turns that into an error at connect time.
#[derive(Debug, Default)]
pub struct ClientIdRegistry {
    held: Mutex<HashSet<(String, i32)>>,
}

impl ClientIdRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn claim(&self, params: &ConnectionParams) -> Result<(), ConnectionError> {
        if self.held.lock().insert((params.address(), params.client_id)) {
            Ok(())
        } else {
            Err(ConnectionError::ClientIdInUse(params.client_id))
        }
    }

    pub fn release(&self, params: &ConnectionParams) {
        self.held.lock().remove(&(params.address(), params.client_id));
    }

    pub fn is_held(&self, params: &ConnectionParams) -> bool {
        self.held.lock().contains(&(params.address(), params.client_id))
    }
}
