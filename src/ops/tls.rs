//! TLS configuration operations.

use crate::client::Altcom;
use crate::codec::{ContextIdRequest, Operation, ResultCode};
use crate::config::ResultPolicy;
use crate::error::{AltcomError, Result};
use crate::protocol::command;

use super::ContextKind;

/// Create a TLS configuration on the modem.
pub struct ConfigInit;

impl Operation for ConfigInit {
    const NAME: &'static str = "ssl_config_init";
    const COMMAND_ID: u16 = command::TLS_CONFIG_INIT;
    type Request = ContextIdRequest;
    type Response = ResultCode;
}

/// Local handle for a remote TLS configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslConfig {
    id: Option<u32>,
}

impl SslConfig {
    /// An unassigned handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote configuration id, once assigned.
    pub fn id(&self) -> Option<u32> {
        self.id
    }
}

impl Altcom {
    /// Initialize `conf` on the modem.
    ///
    /// Allocates an [`ContextKind::SslConfig`] id and asks the modem to
    /// create the configuration. With [`ResultPolicy::Strict`] the id is
    /// stored only on success; with [`ResultPolicy::Lenient`] it is stored
    /// before the request and failures other than
    /// [`AltcomError::NotInitialized`] are only logged.
    pub async fn config_init(&self, conf: &mut SslConfig) -> Result<()> {
        if !self.is_initialized() {
            tracing::error!(operation = ConfigInit::NAME, "modem link not initialized");
            return Err(AltcomError::NotInitialized);
        }

        let id = self.context_ids().allocate(ContextKind::SslConfig);
        let policy = self.config().result_policy;
        if policy == ResultPolicy::Lenient {
            conf.id = Some(id);
        }
        tracing::debug!(config_id = id, "initializing TLS configuration");

        match self.call::<ConfigInit>(&ContextIdRequest { id }).await {
            Ok(_) => {
                conf.id = Some(id);
                Ok(())
            }
            Err(e) if policy == ResultPolicy::Strict => Err(e),
            Err(e) => {
                tracing::error!(
                    operation = ConfigInit::NAME,
                    config_id = id,
                    errno = e.errno(),
                    error = %e,
                    "operation failed"
                );
                Ok(())
            }
        }
    }
}
