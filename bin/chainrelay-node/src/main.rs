use std::sync::Arc;
use std::time::Duration;

use chainrelay_aggregates::NetworkAggregate;
use chainrelay_chain::ChainIndex;
use chainrelay_common::logging::{self, LoggerConfig};
use chainrelay_common::retry::ExponentialBackoff;
use chainrelay_common::timer::ExponentialTimer;
use chainrelay_config::Config;
use chainrelay_delivery::{DeliveryLoop, DeliveryLoopConfig};
use chainrelay_ingest::{BatchIterator, L1Client, PullLoader, PullLoaderConfig};
use chainrelay_queue::BlockQueue;
use chainrelay_store::EventStore;
use chainrelay_tasks::TaskManager;
use chainrelay_transport::{Producer, ProducerConfig, ProducerManager, WsTransport};
use parking_lot::Mutex as SyncMutex;
use tracing::info;

mod args;
mod executor;
mod l1_client;
mod remote_hash;

use args::Args;
use executor::NetworkBatchExecutor;
use l1_client::JsonRpcL1Client;
use remote_hash::BlockingRemoteHashSource;

/// Retained chain-tail depth, sized to comfortably outlive a reorg
/// descent bounded by `chainrelay_ingest::reorg::MAX_REORG_DEPTH`.
const CHAIN_RETAIN_WINDOW: usize = 256;

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_micros() as u64
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    if let Err(e) = main_inner(args) {
        eprintln!("FATAL ERROR: {e}");
        return Err(e);
    }
    Ok(())
}

fn main_inner(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("chainrelay-rt")
        .build()
        .expect("init: build rt");
    let task_manager = TaskManager::new(runtime.handle().clone());
    let executor = task_manager.executor();

    logging::init(LoggerConfig::new("chainrelay-node"));

    let store = Arc::new(
        EventStore::open(&config.store.db_path)?.with_compression_threshold(config.store.compression_threshold_bytes),
    );

    let l1_client = Arc::new(JsonRpcL1Client::with_basic_auth(
        &config.l1.rpc_url,
        &config.l1.rpc_user,
        &config.l1.rpc_password,
    )?);

    let queue = Arc::new(BlockQueue::new(
        config.queue.max_queue_bytes,
        config.queue.max_block_height,
        config.queue.base_block_height,
    ));

    let pull_chain = Arc::new(SyncMutex::new(ChainIndex::new(
        CHAIN_RETAIN_WINDOW,
        config.queue.base_block_height,
    )));
    let pull_loader_config = PullLoaderConfig {
        initial_max_preload_count: config.l1.initial_max_preload_count,
        max_request_blocks_batch_size: config.l1.max_request_blocks_batch_size,
        fetch_retry_attempts: config.l1.fetch_retry_attempts,
        fetch_retry_backoff: ExponentialBackoff::new(200, 2, 1),
    };
    let mut pull_loader = PullLoader::new(
        l1_client.clone() as Arc<dyn L1Client>,
        queue.clone(),
        pull_chain,
        pull_loader_config,
    );

    let network_aggregate = Arc::new(SyncMutex::new(NetworkAggregate::new(
        "network",
        CHAIN_RETAIN_WINDOW,
        config.queue.base_block_height,
    )));
    let remote_hash_source = Arc::new(BlockingRemoteHashSource::new(l1_client.clone(), runtime.handle().clone()));

    let ws_transport = Arc::new(WsTransport::new(config.transport.streaming_url.clone()));
    let producer_config = ProducerConfig {
        max_message_bytes: config.transport.max_message_bytes,
        ack_timeout: config.transport.ack_timeout(),
        heartbeat_interval: config.transport.heartbeat_interval(),
        heartbeat_multiplier: 2,
        heartbeat_max_interval: config.transport.heartbeat_max_interval(),
        heartbeat_timeout: config.transport.heartbeat_timeout(),
    };
    let producer = Producer::new(ws_transport, producer_config);
    producer.start_heartbeat(now_micros);

    let producer_manager: Arc<ProducerManager<WsTransport>> = Arc::new(ProducerManager::new());
    producer_manager.register("primary", producer);
    producer_manager.set_streaming_producer(Some("primary".to_string()));

    let delivery_loop = Arc::new(DeliveryLoop::new(
        store.clone(),
        producer_manager.clone(),
        DeliveryLoopConfig {
            budget_bytes: config.transport.delivery_budget_bytes,
            connect_timeout: config.transport.ack_timeout(),
            sweep_interval: Duration::from_secs(2),
        },
    ));

    let batch_executor = Arc::new(NetworkBatchExecutor::new(
        network_aggregate,
        queue.clone(),
        store.clone(),
        delivery_loop.clone(),
        remote_hash_source,
        now_micros,
    ));
    let batch_iterator = Arc::new(BatchIterator::new(
        queue.clone(),
        batch_executor,
        config.queue.iterator_budget_bytes,
    ));

    info!("init finished, starting main tasks");

    executor.spawn_critical_async("pull-loader", {
        let shutdown = executor.shutdown_guard().into_receiver();
        async move {
            let timer = ExponentialTimer::new(Duration::from_millis(200), Duration::from_secs(30), 2, 1);
            pull_loader.run(timer, shutdown).await;
            Ok::<(), anyhow::Error>(())
        }
    });

    executor.spawn_critical_async("batch-iterator", {
        let shutdown = executor.shutdown_guard();
        async move {
            let mut shutdown = shutdown;
            loop {
                tokio::select! {
                    _ = batch_iterator.tick() => {}
                    _ = shutdown.wait_for_shutdown() => return Ok::<(), anyhow::Error>(()),
                }
            }
        }
    });

    executor.spawn_critical_async("delivery-loop", {
        let shutdown = executor.shutdown_guard().into_receiver();
        async move {
            delivery_loop.run(now_micros, shutdown).await;
            Ok::<(), anyhow::Error>(())
        }
    });

    task_manager.start_signal_listeners();
    runtime.block_on(task_manager.monitor(Some(Duration::from_secs(5))))?;

    logging::finalize();
    Ok(())
}
