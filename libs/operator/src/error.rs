use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} (kube error: {1})")]
    KubeError(String, #[source] Box<kube::Error>),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("{0}: {1}")]
    FormattingError(String, #[source] std::fmt::Error),

    #[error("reconcile pass exceeded {0:?}")]
    ReconcileTimeout(Duration),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
