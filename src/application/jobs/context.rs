use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use super::{reconcile::CounterReconciler, warm_cache::DetailCacheWarmer};

/// Shared context passed to the cron workers.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub reconciler: Arc<CounterReconciler>,
    pub warmer: Arc<DetailCacheWarmer>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
