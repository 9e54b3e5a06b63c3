//! The boundary to the imagery service.

use crate::core::error::RemoteResult;
use crate::core::types::Value;
use crate::export::task::{ExportRequest, TaskId};
use crate::graph::expr::Expr;
use std::sync::Arc;

/// Operations the imagery service provides.
///
/// Both calls are single round trips. Neither retries, and `start_export`
/// returns as soon as the job has been accepted.
pub trait ImageryService {
    /// Evaluate an expression graph and return its materialized value.
    fn compute(&self, expr: &Arc<Expr>) -> RemoteResult<Value>;

    /// Submit and start an asynchronous export job.
    fn start_export(&self, request: &ExportRequest) -> RemoteResult<TaskId>;
}
