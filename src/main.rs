use std::{future::IntoFuture, process, sync::Arc};

use cuplore::{
    application::{
        error::AppError,
        follows::FollowService,
        jobs::{
            ConsistencyWorker, DeadLetterQueue, LikeReconciler, ReconcilePolicy, RetryPolicy,
            ingest_channel,
        },
        likes::LikeService,
        notes::NoteService,
        repos::{FollowsWriteRepo, HealthRepo, NotesRepo, NotesWriteRepo},
    },
    cache::SetCache,
    config,
    infra::{
        self,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiState},
        telemetry,
    },
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Reconcile(args) => run_reconcile(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let cache = infra::cache::connect(&settings.cache).await?;

    let follows_repo: Arc<dyn FollowsWriteRepo> = repositories.clone();
    let notes_repo: Arc<dyn NotesRepo> = repositories.clone();
    let notes_write_repo: Arc<dyn NotesWriteRepo> = repositories.clone();
    let health_repo: Arc<dyn HealthRepo> = repositories.clone();

    let (queue, receiver) = ingest_channel(settings.ingest.capacity);
    let dead_letters = Arc::new(DeadLetterQueue::new(settings.ingest.dead_letter_capacity));
    let shutdown = CancellationToken::new();

    let worker = ConsistencyWorker::new(
        receiver,
        follows_repo,
        dead_letters.clone(),
        RetryPolicy::from(&settings.ingest),
        settings.ingest.drain_timeout,
    );
    let worker_handle = tokio::spawn(worker.run(shutdown.child_token()));

    let reconciler = LikeReconciler::new(
        cache.clone(),
        notes_write_repo.clone(),
        ReconcilePolicy::from(&settings.reconcile),
    );
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown.child_token()));

    if settings.api.admin_user_ids.is_empty() {
        warn!(
            target = "cuplore::serve",
            "api.admin_user_ids is empty; admin routes reject every caller"
        );
    }

    let state = ApiState {
        notes: Arc::new(NoteService::new(notes_repo, notes_write_repo)),
        likes: Arc::new(
            LikeService::new(cache).with_dirty_tracking(settings.reconcile.dirty_tracking),
        ),
        follows: Arc::new(FollowService::new(queue, dead_letters)),
        health: health_repo,
        admins: Arc::new(settings.api.admin_user_ids.iter().copied().collect()),
    };

    let result = serve_http(&settings, state).await;

    shutdown.cancel();
    match worker_handle.await {
        Ok(report) => info!(
            target = "cuplore::shutdown",
            persisted = report.persisted,
            duplicates = report.duplicates,
            dead_lettered = report.dead_lettered,
            abandoned = report.abandoned,
            "Consistency worker joined"
        ),
        Err(err) => error!(
            target = "cuplore::shutdown",
            error = %err,
            "Consistency worker task failed"
        ),
    }
    if let Err(err) = reconciler_handle.await {
        error!(
            target = "cuplore::shutdown",
            error = %err,
            "Like reconciler task failed"
        );
    }

    result
}

async fn run_reconcile(
    settings: config::Settings,
    args: config::ReconcileArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let cache: Arc<dyn SetCache> = infra::cache::connect(&settings.cache).await?;
    let policy = ReconcilePolicy::from(&settings.reconcile);
    let reconciler = LikeReconciler::new(cache, repositories, policy);

    let full = args.full || !policy.dirty_tracking;
    info!(target = "cuplore::reconcile", full, "Starting reconciliation");

    let report = if full {
        reconciler.reconcile_all().await
    } else {
        reconciler.reconcile_dirty().await
    }
    .map_err(InfraError::from)?;

    info!(
        target = "cuplore::reconcile",
        scanned = report.scanned,
        updated = report.updated,
        failed = report.failed,
        "Reconciliation finished"
    );
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let repositories = PostgresRepositories::connect(&settings.database)
        .await
        .map_err(AppError::from)?;
    Ok(Arc::new(repositories))
}

async fn serve_http(settings: &config::Settings, state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "cuplore::http",
        addr = %settings.server.addr,
        "HTTP server listening"
    );

    let stop_accepting = CancellationToken::new();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(stop_accepting.clone().cancelled_owned())
        .into_future();
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => result,
        _ = shutdown_signal() => {
            info!(target = "cuplore::shutdown", "Shutdown signal received");
            stop_accepting.cancel();
            match timeout(settings.server.graceful_shutdown, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target = "cuplore::shutdown",
                        timeout_secs = settings.server.graceful_shutdown.as_secs(),
                        "Graceful shutdown timed out; dropping open connections"
                    );
                    Ok(())
                }
            }
        }
    };

    result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
