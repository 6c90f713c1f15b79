//! Cluster activation state.

use std::fmt;
use std::sync::Arc;

use ignite_core::protocol::{Request, FEATURE_CLUSTER_API, OP_CLUSTER_CHANGE_STATE, OP_CLUSTER_GET_STATE};
use ignite_core::{DataInput, DataOutput, IgniteError, Result};
use tracing::instrument;

use crate::router::Router;

/// Activation state of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClusterState {
    /// Caches are unavailable.
    Inactive = 0,
    /// Fully operational.
    Active = 1,
    /// Reads only.
    ActiveReadOnly = 2,
}

impl ClusterState {
    /// Returns true for either active state.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Inactive)
    }
}

impl TryFrom<u8> for ClusterState {
    type Error = IgniteError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Inactive),
            1 => Ok(Self::Active),
            2 => Ok(Self::ActiveReadOnly),
            other => Err(IgniteError::Protocol(format!("unknown cluster state {}", other))),
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "INACTIVE"),
            Self::Active => write!(f, "ACTIVE"),
            Self::ActiveReadOnly => write!(f, "ACTIVE_READ_ONLY"),
        }
    }
}

/// Cluster-wide administration.
#[derive(Debug, Clone)]
pub struct Cluster {
    router: Arc<Router>,
}

impl Cluster {
    pub(crate) fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    fn ensure_supported(&self) -> Result<()> {
        let connection = self.router.any_connection()?;
        if connection.has_feature(FEATURE_CLUSTER_API) {
            Ok(())
        } else {
            Err(IgniteError::Usage(format!(
                "cluster API is not supported by protocol {} on {}",
                connection.protocol_version(),
                connection.address()
            )))
        }
    }

    fn request(&self, op_code: i16) -> Request {
        Request::new(op_code, self.router.pool().options().byte_order())
    }

    /// Reads the current state.
    #[instrument(name = "cluster.state", skip(self))]
    pub async fn state(&self) -> Result<ClusterState> {
        self.ensure_supported()?;
        let response = self.router.dispatch(&self.request(OP_CLUSTER_GET_STATE), None).await?;
        ClusterState::try_from(response.reader().read_u8()?)
    }

    /// Moves the cluster to `state`.
    #[instrument(name = "cluster.set_state", skip(self), fields(state = %state))]
    pub async fn set_state(&self, state: ClusterState) -> Result<()> {
        self.ensure_supported()?;
        let mut request = self.request(OP_CLUSTER_CHANGE_STATE);
        request.writer().write_u8(state as u8)?;
        self.router.dispatch(&request, None).await?;
        tracing::info!("cluster state changed");
        Ok(())
    }

    /// Activates the cluster.
    pub async fn activate(&self) -> Result<()> {
        self.set_state(ClusterState::Active).await
    }

    /// Deactivates the cluster.
    pub async fn deactivate(&self) -> Result<()> {
        self.set_state(ClusterState::Inactive).await
    }
}
