use ahash::AHashMap as HashMap;
use meshlb_core::{NodeKind, RemoteKey};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};

/// Applies operations on the remote load-balancer controller.
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
    async fn execute(&self, op: &RemoteOp) -> Result<RemoteObject, RemoteError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Post,
    Put,
    Delete,
}

/// A single request to the remote controller.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteOp {
    pub method: Method,
    pub kind: NodeKind,
    pub tenant: String,
    pub name: String,
    /// Set for updates and deletes.
    pub remote_id: Option<String>,
    pub body: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteObject {
    pub uuid: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote object not found")]
    NotFound,

    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("remote controller unavailable: {0}")]
    Unavailable(String),
}

/// Logs every operation instead of applying it, minting identifiers for created objects.
#[derive(Debug, Default)]
pub struct DryRun {
    ids: Mutex<HashMap<RemoteKey, String>>,
}

// === impl Method ===

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl RemoteOp ===

impl RemoteOp {
    pub fn remote_key(&self) -> RemoteKey {
        RemoteKey {
            kind: self.kind,
            tenant: self.tenant.clone(),
            name: self.name.clone(),
        }
    }

    /// The request path relative to the controller's API root.
    pub fn path(&self) -> String {
        match &self.remote_id {
            Some(id) => format!("/api/{}/{}", self.kind, id),
            None => format!("/api/{}", self.kind),
        }
    }
}

// === impl DryRun ===

#[async_trait::async_trait]
impl RemoteClient for DryRun {
    async fn execute(&self, op: &RemoteOp) -> Result<RemoteObject, RemoteError> {
        let key = op.remote_key();
        let mut ids = self.ids.lock();
        let uuid = match op.method {
            Method::Post => {
                let uuid = format!("{}-{}", op.kind, uuid::Uuid::new_v4());
                ids.insert(key, uuid.clone());
                uuid
            }
            Method::Put => op
                .remote_id
                .clone()
                .or_else(|| ids.get(&key).cloned())
                .ok_or(RemoteError::NotFound)?,
            Method::Delete => {
                let known = ids.remove(&key);
                op.remote_id.clone().or(known).ok_or(RemoteError::NotFound)?
            }
        };
        tracing::info!(method = %op.method, path = %op.path(), tenant = %op.tenant, name = %op.name, "Dry run");
        Ok(RemoteObject { uuid })
    }
}

#[async_trait::async_trait]
impl<C: RemoteClient + ?Sized> RemoteClient for Arc<C> {
    async fn execute(&self, op: &RemoteOp) -> Result<RemoteObject, RemoteError> {
        (**self).execute(op).await
    }
}
