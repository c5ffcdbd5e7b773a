// src/app_session.rs
//! Application sessions negotiated over an authenticated connection.
//!
//! A session pins a quorum of participants and an allocation of ledger
//! funds to one application. The node tracks the active session id; we
//! mirror it on the connection so a later run can close what it finds.

use std::time::Duration;

use tracing::info;

use crate::error::RpcError;
use crate::protocol::{methods, AppSessionResult, CloseAppSessionParams, CreateAppSessionParams};
use crate::rpc::Connection;

/// Handle to a session created on the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSessionHandle {
    pub id: String,
}

impl Connection {
    /// Open an application session and remember its id on this connection.
    pub async fn create_app_session(
        &self,
        params: &CreateAppSessionParams,
        timeout: Duration,
    ) -> Result<AppSessionHandle, RpcError> {
        let result: AppSessionResult = self
            .call_typed(methods::CREATE_APP_SESSION, params, timeout)
            .await?;
        self.set_app_session(Some(result.app_session_id.clone()));
        info!(id = %result.app_session_id, "application session created");
        Ok(AppSessionHandle {
            id: result.app_session_id,
        })
    }

    /// Close a session with its final allocations.
    pub async fn close_app_session(
        &self,
        params: &CloseAppSessionParams,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        let _: AppSessionResult = self
            .call_typed(methods::CLOSE_APP_SESSION, params, timeout)
            .await?;
        if self.app_session_id().as_deref() == Some(params.app_session_id.as_str()) {
            self.set_app_session(None);
        }
        info!(id = %params.app_session_id, "application session closed");
        Ok(())
    }
}
