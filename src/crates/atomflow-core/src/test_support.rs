//! Shared helpers for in-crate unit tests.

use crate::atom::{ArgMap, AtomResult, Task};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

struct NoopTask;

#[async_trait]
impl Task for NoopTask {
    async fn execute(&self, _args: ArgMap) -> AtomResult {
        Ok(Value::Null)
    }
}

pub(crate) fn noop_task() -> Arc<dyn Task> {
    Arc::new(NoopTask)
}
