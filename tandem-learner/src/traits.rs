//! The ports a learner talks to.

use async_trait::async_trait;

use tandem_core::common::{TaskResult, TrainRequest, TrainResponse};

/// A trait used by the [`Learner`] to reach the remote party's node.
///
/// The transport is expected to deliver the request to the peer's matching
/// learner and bring its response payload back; timeouts surface as errors
/// and are treated as transient.
///
/// [`Learner`]: crate::Learner
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn step_train(
        &self,
        request: TrainRequest,
        peer: &str,
    ) -> Result<TrainResponse, anyhow::Error>;
}

/// A trait used by the [`Learner`] to report the final result, successful
/// or failed. Called exactly once per learner lifetime.
///
/// [`Learner`]: crate::Learner
pub trait ResultHandler: Send + Sync {
    fn save_result(&self, result: TaskResult);
}
