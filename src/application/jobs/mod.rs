mod bootstrap;
mod context;
mod reconcile;
mod schedule;
mod warm_cache;

pub use bootstrap::{BootstrapError, BootstrapReport, CounterBootstrapper};
pub use context::{JobWorkerContext, job_failed};
pub use reconcile::{
    CounterReconciler, ReconcileConfig, ReconcileCountersJob, ReconcileError, ReconcileReport,
    process_reconcile_job,
};
pub use schedule::parse_schedule;
pub use warm_cache::{
    DetailCacheWarmer, WarmDetailCacheJob, WarmError, WarmReport, process_warm_job,
};
