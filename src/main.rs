use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::CronStream;
use recipehub::{
    application::{
        counters::CounterService,
        engagement::EngagementService,
        error::AppError,
        jobs::{
            CounterBootstrapper, CounterReconciler, DetailCacheWarmer, JobWorkerContext,
            ReconcileConfig, parse_schedule, process_reconcile_job, process_warm_job,
        },
        recipes::RecipeDetailService,
        repos::{EngagementRepo, RecipesRepo},
    },
    cache::{CacheConfig, CounterStore, DetailCache, KeyValueCache, MemoryCache},
    config::{self, CacheBackend},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        redis::RedisCache,
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Bootstrap(_) => {
            let app = build_application_context(&settings).await?;
            run_bootstrap(&app).await
        }
        config::Command::Reconcile(_) => {
            let app = build_application_context(&settings).await?;
            let report = app
                .job_context
                .reconciler
                .run()
                .await
                .map_err(|err| AppError::unexpected(format!("reconciliation failed: {err}")))?;
            info!(
                target = "recipehub::reconcile",
                dirty_ids = report.dirty_ids,
                batches = report.batches,
                rows_written = report.rows_written,
                "Reconciliation completed"
            );
            Ok(())
        }
        config::Command::Warm(_) => {
            let app = build_application_context(&settings).await?;
            let report = app
                .job_context
                .warmer
                .warm()
                .await
                .map_err(|err| AppError::unexpected(format!("cache warm failed: {err}")))?;
            info!(
                target = "recipehub::warm",
                loaded = report.loaded,
                overlaid = report.overlaid,
                "Cache warm completed"
            );
            Ok(())
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    if settings.jobs.bootstrap_on_start {
        // The cache is not authoritative; a failed seed leaves reads on the database path.
        if let Err(err) = run_bootstrap(&app).await {
            warn!(
                target = "recipehub::bootstrap",
                error = %err,
                "Counter bootstrap failed at startup"
            );
        }
    }

    let monitor_handle = spawn_job_monitor(app.job_context.clone(), &settings.jobs)?;

    let result = serve_http(&settings, app.http_state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_bootstrap(app: &ApplicationContext) -> Result<(), AppError> {
    let report = app
        .bootstrapper
        .run()
        .await
        .map_err(|err| AppError::unexpected(format!("counter bootstrap failed: {err}")))?;
    info!(
        target = "recipehub::bootstrap",
        recipes = report.recipes,
        created = report.created,
        already_present = report.already_present,
        "Counter bootstrap completed"
    );
    Ok(())
}

struct ApplicationContext {
    http_state: HttpState,
    job_context: JobWorkerContext,
    bootstrapper: CounterBootstrapper,
}

async fn build_cache(settings: &config::CacheSettings) -> Result<Arc<dyn KeyValueCache>, AppError> {
    match settings.backend {
        CacheBackend::Redis => {
            let cache = RedisCache::connect(&settings.redis_url, settings.operation_timeout)
                .await
                .map_err(|err| AppError::from(InfraError::cache(err.to_string())))?;
            Ok(Arc::new(cache))
        }
        CacheBackend::Memory => Ok(Arc::new(MemoryCache::new(&CacheConfig::from(settings)))),
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<(Arc<PostgresRepositories>, Arc<PostgresRepositories>), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let http_pool =
        PostgresRepositories::connect(database_url, settings.database.http_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&http_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let jobs_pool =
        PostgresRepositories::connect(database_url, settings.database.jobs_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok((
        Arc::new(PostgresRepositories::new(http_pool)),
        Arc::new(PostgresRepositories::new(jobs_pool)),
    ))
}

fn reconcile_config(jobs: &config::JobsSettings) -> ReconcileConfig {
    ReconcileConfig {
        batch_size: jobs.reconcile_batch_size,
        batch_timeout: jobs.batch_timeout,
        write_attempts: jobs.write_attempts.get(),
        retry_backoff: jobs.retry_backoff,
        lease_ttl: jobs.reconcile_lease,
    }
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let kv = build_cache(&settings.cache).await?;
    let (http_repositories, job_repositories) = init_repositories(settings).await?;

    let cache_config = CacheConfig::from(&settings.cache);
    let details = DetailCache::new(kv.clone(), cache_config.ttl_window());
    let store = CounterStore::new(kv.clone());

    let recipes_repo: Arc<dyn RecipesRepo> = http_repositories.clone();
    let engagement_repo: Arc<dyn EngagementRepo> = http_repositories.clone();
    let job_recipes_repo: Arc<dyn RecipesRepo> = job_repositories;

    let counters = CounterService::new(
        store.clone(),
        details.clone(),
        recipes_repo.clone(),
        settings.cache.counter_policy,
    );

    let http_state = HttpState {
        recipes: RecipeDetailService::new(recipes_repo.clone(), details.clone(), counters.clone()),
        engagement: EngagementService::new(recipes_repo, engagement_repo, counters.clone()),
        counters,
        cache: kv.clone(),
        db: Some(http_repositories),
    };

    let reconciler = CounterReconciler::new(
        store.clone(),
        kv,
        job_recipes_repo.clone(),
        reconcile_config(&settings.jobs),
    );
    let warmer = DetailCacheWarmer::new(
        job_recipes_repo.clone(),
        details,
        store.clone(),
        settings.jobs.warm_top_n,
        settings.jobs.batch_timeout,
    );

    Ok(ApplicationContext {
        http_state,
        job_context: JobWorkerContext {
            reconciler: Arc::new(reconciler),
            warmer: Arc::new(warmer),
        },
        bootstrapper: CounterBootstrapper::new(job_recipes_repo, store),
    })
}

fn spawn_job_monitor(
    context: JobWorkerContext,
    jobs: &config::JobsSettings,
) -> Result<tokio::task::JoinHandle<()>, AppError> {
    let reconcile_schedule = parse_schedule(&jobs.reconcile_cron)
        .map_err(|err| AppError::from(InfraError::configuration(err)))?;
    let warm_schedule = parse_schedule(&jobs.warm_cron)
        .map_err(|err| AppError::from(InfraError::configuration(err)))?;

    let reconcile_worker = WorkerBuilder::new("reconcile-counters-worker")
        .data(context.clone())
        .backend(CronStream::new(reconcile_schedule))
        .build_fn(process_reconcile_job);
    let warm_worker = WorkerBuilder::new("warm-detail-cache-worker")
        .data(context)
        .backend(CronStream::new(warm_schedule))
        .build_fn(process_warm_job);

    let monitor = Monitor::new()
        .register(reconcile_worker)
        .register(warm_worker);

    Ok(tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    }))
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(http_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "recipehub::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let draining = Arc::new(Notify::new());
    let trigger = draining.clone();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            trigger.notify_one();
        })
        .into_future();

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = drain_deadline(&draining, settings.server.graceful_shutdown) => {
            warn!(
                target = "recipehub::serve",
                grace_secs = settings.server.graceful_shutdown.as_secs(),
                "In-flight requests did not drain before the shutdown deadline"
            );
        }
    }

    Ok(())
}

async fn drain_deadline(draining: &Notify, grace: Duration) {
    draining.notified().await;
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "recipehub::serve", "Shutdown signal received");
}
