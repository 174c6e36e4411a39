//! The narrow capability the distributed coordinator needs from whatever
//! local (in-process) translation path exists, used both as the
//! `local_fallback` and `reduced_quality` fallback names in
//! `TranslateWithDistributedRetry` (`spec.md` §4.9, §9).

use async_trait::async_trait;

use crate::error::LocalCoordinatorError;

#[async_trait]
pub trait LocalCoordinator: Send + Sync {
    async fn translate(&self, text: &str, hint: &str) -> Result<String, LocalCoordinatorError>;
}
