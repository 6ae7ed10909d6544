use crate::config::Config;
use dispatch::Dispatcher;
use dispatch::avatars::AvatarDirectory;
use dispatch::errors::DirectoryError;
use dispatch::ignore_list::IgnoreList;
use dispatch::node_directory::NodeDirectory;
use dispatch::refresh::{Refresh, refresh_loop};
use dispatch::text_message::TextHandler;
use dispatch::webhook::DiscordWebhook;
use ingest::bridge::BridgeService;
use ingest::clock::{Clock, SystemClock};
use ingest::dedup_cache::DedupCache;
use ingest::leader::{LeaderError, LeaderFlag, SingleInstance};
use ingest::shutdown::triggered;
use ingest::{GroupingQueue, IngestWorker, Leadership, Scheduler, Shutdown, TopicFilter};
use shared::admin_service::{AdminService, Readiness};
use shared::http::run_http_service;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ingest::config::ValidationError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Leader(#[from] LeaderError),
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wires the pipeline together and runs it until ctrl-c or a server error.
pub async fn run(config: Config, instance_id: String) -> Result<(), RunError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let readiness = Readiness::new();
    // `intake` stops the ingest worker, `shutdown` the scheduler and the
    // refresh loops. They are separate so intake can drain first.
    let intake = Shutdown::new();
    let shutdown = Shutdown::new();

    let flag: Arc<dyn LeaderFlag> = Arc::new(SingleInstance::new());
    tracing::info!(%instance_id, "claiming active instance");
    flag.claim(&instance_id).await?;

    let dispatch_config = &config.dispatch;
    let client = reqwest::Client::builder()
        .timeout(dispatch_config.webhook_timeout())
        .build()?;
    let nodes = Arc::new(NodeDirectory::load(&dispatch_config.node_db_path)?);
    let ignore_list = Arc::new(IgnoreList::load(
        &dispatch_config.ignore_list_path,
        dispatch_config.ignore_list_url.clone(),
    )?);
    let avatars = Arc::new(AvatarDirectory::new(dispatch_config.avatars_url.clone()));

    let mut refreshers: Vec<Arc<dyn Refresh>> = Vec::new();
    if let Some(url) = ignore_list.url() {
        tracing::info!(%url, "refreshing ignore list from url");
        refreshers.push(ignore_list.clone());
    }
    if let Some(url) = avatars.url() {
        tracing::info!(%url, "refreshing avatars from url");
        refreshers.push(avatars.clone());
    }
    for target in refreshers {
        tokio::spawn(refresh_loop(
            target,
            client.clone(),
            dispatch_config.refresh_interval(),
            shutdown.clone(),
        ));
    }

    let text = TextHandler::new(
        dispatch_config,
        nodes.clone(),
        ignore_list,
        avatars,
        Arc::new(DiscordWebhook::new(client)),
        clock.clone(),
    );
    let dispatcher = Arc::new(Dispatcher::new(text, nodes, clock.clone()));

    let ingest_config = &config.ingest;
    let queue = Arc::new(GroupingQueue::new());
    let worker = IngestWorker::new(
        ingest_config.decryptor()?,
        DedupCache::new(ingest_config.dedup_capacity),
        queue.clone(),
        clock.clone(),
        TopicFilter::new(dispatch_config.topics.all(), ingest_config.watched_nodes()?),
        ingest_config.source_label.clone(),
    );
    let scheduler = Scheduler::new(
        queue,
        dispatcher,
        clock,
        ingest_config.grouping_window(),
        ingest_config.flush_interval(),
    )
    .with_consume_timeout(ingest_config.consume_timeout());

    let (tx, rx) = mpsc::channel(ingest_config.channel_capacity);
    let worker_task = tokio::spawn(worker.run(rx, intake.clone()));
    let scheduler_task = tokio::spawn(scheduler.run(
        Leadership {
            flag,
            instance_id: instance_id.clone(),
            readiness: readiness.clone(),
        },
        shutdown.clone(),
    ));
    readiness.set_ready(true);

    let servers = async {
        tokio::try_join!(
            run_http_service(
                &config.listener.host,
                config.listener.port,
                BridgeService::new(tx),
            ),
            run_http_service(
                &config.admin_listener.host,
                config.admin_listener.port,
                AdminService::new(readiness.clone(), instance_id.clone()),
            ),
        )
        .map(|_| ())
    };
    tokio::pin!(servers);

    let mut stop = shutdown.subscribe();
    let result = tokio::select! {
        result = &mut servers => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            Ok(())
        }
        _ = triggered(&mut stop) => {
            // Keep answering /ready with 503 until the orchestrator stops us.
            intake.trigger();
            tracing::warn!("pipeline stopped, waiting for ctrl-c");
            tokio::select! {
                result = &mut servers => result,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
    };

    readiness.set_ready(false);
    stop_pipeline(&intake, worker_task, &shutdown, scheduler_task).await;
    tracing::info!("stopped");

    result.map_err(RunError::Io)
}

/// Stops the ingest worker and waits for it before the scheduler is told to
/// stop, so its final flush sees every envelope the worker queued.
async fn stop_pipeline(
    intake: &Shutdown,
    worker_task: JoinHandle<()>,
    shutdown: &Shutdown,
    scheduler_task: JoinHandle<()>,
) {
    intake.trigger();
    if let Err(e) = worker_task.await {
        tracing::error!("ingest worker panicked: {e}");
    }
    shutdown.trigger();
    if let Err(e) = scheduler_task.await {
        tracing::error!("scheduler panicked: {e}");
    }
}
