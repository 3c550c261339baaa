//! Operation façade.
//!
//! [`Altcom::call`] is the one exchange routine behind every remote
//! operation: check the link, acquire buffers, encode, send, check the
//! length, decode, release, and map the remote result code.
//!
//! # Example
//!
//! ```no_run
//! use altcom_rpc::codec::{ContextIdRequest, Operation, ResultCode};
//! use altcom_rpc::Altcom;
//!
//! struct SslFree;
//!
//! impl Operation for SslFree {
//!     const NAME: &'static str = "ssl_free";
//!     const COMMAND_ID: u16 = 0x0304;
//!     type Request = ContextIdRequest;
//!     type Response = ResultCode;
//! }
//!
//! # async fn run(altcom: Altcom) -> altcom_rpc::Result<()> {
//! altcom.call::<SslFree>(&ContextIdRequest { id: 3 }).await?;
//! # Ok(())
//! # }
//! ```

mod context;
pub mod tls;

pub use context::{ContextIdSource, ContextKind, SequentialContextIds};

use crate::buffer::ExchangeBuffers;
use crate::client::Altcom;
use crate::codec::{decode_response, encode_request, Operation, RemoteResult};
use crate::error::{AltcomError, Result};
use crate::gateway::Timeout;

impl Altcom {
    /// Run `O` with the configured request timeout.
    ///
    /// A nonzero remote result code becomes [`AltcomError::RemoteFailure`].
    pub async fn call<O: Operation>(&self, request: &O::Request) -> Result<O::Response> {
        self.call_with_timeout::<O>(request, self.config().request_timeout())
            .await
    }

    /// Run `O`, waiting at most `timeout` for the response.
    pub async fn call_with_timeout<O: Operation>(
        &self,
        request: &O::Request,
        timeout: Timeout,
    ) -> Result<O::Response> {
        let response = self.exchange::<O>(request, timeout).await?;

        let code = response.result_code();
        tracing::debug!(operation = O::NAME, result_code = code, "operation finished");
        if code != 0 {
            tracing::warn!(operation = O::NAME, result_code = code, "remote operation failed");
            return Err(AltcomError::RemoteFailure(code));
        }
        Ok(response)
    }

    async fn exchange<O: Operation>(
        &self,
        request: &O::Request,
        timeout: Timeout,
    ) -> Result<O::Response> {
        if !self.is_initialized() {
            return Err(AltcomError::NotInitialized);
        }

        let descriptor = O::DESCRIPTOR;
        let mut buffers = ExchangeBuffers::acquire(self.pool(), &descriptor)?;
        let outcome = self.run_exchange::<O>(&mut buffers, request, timeout).await;
        buffers.release();

        if let Err(e) = &outcome {
            tracing::error!(
                operation = descriptor.name,
                command_id = descriptor.command_id,
                error = %e,
                "exchange failed"
            );
        }
        outcome
    }

    async fn run_exchange<O: Operation>(
        &self,
        buffers: &mut ExchangeBuffers,
        request: &O::Request,
        timeout: Timeout,
    ) -> Result<O::Response> {
        let descriptor = O::DESCRIPTOR;
        encode_request::<O>(request, &mut buffers.command)?;

        let received = self
            .gateway()
            .send(
                &mut buffers.command,
                &mut buffers.response,
                descriptor.response_size,
                timeout,
            )
            .await?;

        Ok(decode_response::<O>(&buffers.response, received)?)
    }
}
