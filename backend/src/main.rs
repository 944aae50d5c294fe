//! `login-pipeline` entry-point: drains the login event queue into PostgreSQL.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::future::Future;
use std::sync::Arc;

use color_eyre::eyre::{Context, Report, Result, eyre};
use ortho_config::OrthoConfig;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use login_pipeline::config::PipelineSettings;
use login_pipeline::domain::{LoginPipeline, LoginPipelinePorts, RunTermination};
use login_pipeline::outbound::persistence::{DbPool, DieselLoginRecordSink};
use login_pipeline::outbound::queue::SqsLoginEventQueue;

fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings =
        PipelineSettings::load().map_err(|err| eyre!("failed to load pipeline settings: {err}"))?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create Tokio runtime")?;
    runtime.block_on(run(&settings))
}

async fn run(settings: &PipelineSettings) -> Result<()> {
    let pool_config = settings
        .pool_config()
        .map_err(|err| Report::new(err).wrap_err("invalid database settings"))?;
    let pool = DbPool::new(pool_config)
        .await
        .map_err(|err| Report::new(err).wrap_err("failed to create database pool"))?;
    let sink = DieselLoginRecordSink::new(pool).with_statement_timeout(settings.statement_timeout());

    let queue = SqsLoginEventQueue::connect(&settings.queue_config())
        .await
        .map_err(|err| Report::new(err).wrap_err("failed to connect to the login event queue"))?;

    let pipeline = LoginPipeline::new(
        LoginPipelinePorts::new(Arc::new(queue), Arc::new(sink)),
        settings.pipeline_config(),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let summary = pipeline
        .run(&shutdown)
        .await
        .map_err(|err| Report::new(err).wrap_err("login pipeline aborted"))?;

    match summary.termination {
        RunTermination::Drained => info!("login event queue drained"),
        RunTermination::Stopped => info!("login pipeline stopped on request"),
    }
    Ok(())
}

/// Cancel `token` on Ctrl-C, or on SIGTERM where supported.
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    cancel_on_first(token, tokio::signal::ctrl_c(), terminate).await;
}

/// Cancel `token` once either source fires. A failed interrupt handler leaves
/// `terminate` in charge.
async fn cancel_on_first<I, T>(token: CancellationToken, interrupt: I, terminate: T)
where
    I: Future<Output = std::io::Result<()>>,
    T: Future<Output = ()>,
{
    let interrupt = async {
        if let Err(error) = interrupt.await {
            warn!(%error, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }

    info!("shutdown requested; finishing the current batch");
    token.cancel();
}
