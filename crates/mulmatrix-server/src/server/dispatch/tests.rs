use super::RowDispatcher;
use crate::server::{config::DispatchConfig, pool::PoolSnapshot, worker::RowMultiplier};
use core::time::Duration;
use mulmatrix_core::{
    Error, Matrix, Shape,
    proto::{
        MulRowReply, MulRowRequest,
        worker_server::{Worker, WorkerServer},
    },
};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status, transport::Server};

async fn spawn_worker<W: Worker>(worker: W) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        Server::builder()
            .add_service(WorkerServer::new(worker))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    addr
}

fn a() -> Matrix {
    Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap()
}

fn b() -> Arc<Matrix> {
    Arc::new(Matrix::from_rows(vec![vec![7.0, 8.0], vec![9.0, 10.0], vec![11.0, 12.0]]).unwrap())
}

fn dispatcher(call_timeout: Duration) -> RowDispatcher {
    RowDispatcher::new(DispatchConfig {
        call_timeout,
        ..DispatchConfig::default()
    })
}

/// Multiplies correctly after `delay`, recording how many calls overlap.
#[derive(Clone, Default)]
struct CountingWorker {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

#[tonic::async_trait]
impl Worker for CountingWorker {
    async fn mul_row(&self, req: Request<MulRowRequest>) -> Result<Response<MulRowReply>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        RowMultiplier.mul_row(req).await
    }
}

struct FailingWorker;

#[tonic::async_trait]
impl Worker for FailingWorker {
    async fn mul_row(&self, _req: Request<MulRowRequest>) -> Result<Response<MulRowReply>, Status> {
        Err(Status::internal("worker exploded"))
    }
}

/// Answers with one value too many.
struct ShortChangingWorker;

#[tonic::async_trait]
impl Worker for ShortChangingWorker {
    async fn mul_row(&self, req: Request<MulRowRequest>) -> Result<Response<MulRowReply>, Status> {
        let cols = req.get_ref().cols as usize;
        Ok(Response::new(MulRowReply {
            values: vec![0.0; cols + 1],
        }))
    }
}

struct StallingWorker(Duration);

#[tonic::async_trait]
impl Worker for StallingWorker {
    async fn mul_row(&self, req: Request<MulRowRequest>) -> Result<Response<MulRowReply>, Status> {
        tokio::time::sleep(self.0).await;
        RowMultiplier.mul_row(req).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multiplies_across_workers() {
    let w0 = spawn_worker(RowMultiplier).await;
    let w1 = spawn_worker(RowMultiplier).await;
    let pool = PoolSnapshot::from_endpoints([w0, w1], 2);

    let product = dispatcher(Duration::from_secs(5))
        .multiply(&pool, &a(), b())
        .await
        .unwrap();

    assert_eq!(
        product.into_rows(),
        vec![vec![58.0, 64.0], vec![139.0, 154.0]]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_calls_give_identical_results() {
    let w0 = spawn_worker(RowMultiplier).await;
    let pool = PoolSnapshot::from_endpoints([w0], 1);
    let dispatcher = dispatcher(Duration::from_secs(5));

    let first = dispatcher.multiply(&pool, &a(), b()).await.unwrap();
    let second = dispatcher.multiply(&pool, &a(), b()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn dimension_mismatch_is_reported_before_any_dispatch() {
    let pool = PoolSnapshot::default();
    let lhs = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();

    let err = dispatcher(Duration::from_secs(1))
        .multiply(&pool, &lhs, b())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        Error::DimensionMismatch {
            lhs: Shape::new(2, 2),
            rhs: Shape::new(3, 2),
        }
    );
}

#[tokio::test]
async fn empty_pool_has_no_workers() {
    let err = dispatcher(Duration::from_secs(1))
        .multiply(&PoolSnapshot::default(), &a(), b())
        .await
        .unwrap_err();
    assert_eq!(err, Error::NoWorkers);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outstanding_calls_never_exceed_the_concurrency_limit() {
    let shared = CountingWorker {
        delay: Duration::from_millis(50),
        ..CountingWorker::default()
    };
    let mut endpoints = Vec::new();
    let mut calls = Vec::new();
    for _ in 0..4 {
        let worker = CountingWorker {
            calls: Arc::new(AtomicUsize::new(0)),
            ..shared.clone()
        };
        calls.push(Arc::clone(&worker.calls));
        endpoints.push(spawn_worker(worker).await);
    }
    let pool = PoolSnapshot::from_endpoints(endpoints, 2);

    let rows: Vec<Vec<f64>> = (0..12).map(|i| vec![f64::from(i), 1.0, 0.0]).collect();
    let lhs = Matrix::from_rows(rows).unwrap();

    let product = dispatcher(Duration::from_secs(5))
        .multiply(&pool, &lhs, b())
        .await
        .unwrap();

    assert_eq!(product.rows(), 12);
    assert_eq!(product.row(3).unwrap(), &[3.0 * 7.0 + 9.0, 3.0 * 8.0 + 10.0]);
    let peak = shared.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {peak}");
    assert!(peak >= 1);

    // Static round-robin: 12 rows over 4 workers.
    for counter in calls {
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_failure_aborts_the_whole_product() {
    let failing = spawn_worker(FailingWorker).await;
    let stalling = spawn_worker(StallingWorker(Duration::from_secs(20))).await;
    let pool = PoolSnapshot::from_endpoints([failing, stalling], 2);

    let rows: Vec<Vec<f64>> = (0..8).map(|_| vec![1.0, 1.0, 1.0]).collect();
    let lhs = Matrix::from_rows(rows).unwrap();

    let started = Instant::now();
    let err = dispatcher(Duration::from_secs(30))
        .multiply(&pool, &lhs, b())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RemoteCall { .. }), "got {err:?}");
    assert!(err.to_string().contains("worker exploded"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reply_of_the_wrong_length_is_a_remote_failure() {
    let worker = spawn_worker(ShortChangingWorker).await;
    let pool = PoolSnapshot::from_endpoints([worker], 1);

    let err = dispatcher(Duration::from_secs(5))
        .multiply(&pool, &a(), b())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteCall { .. }), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_worker_hits_the_call_deadline() {
    let worker = spawn_worker(StallingWorker(Duration::from_secs(5))).await;
    let pool = PoolSnapshot::from_endpoints([worker], 1);

    let err = dispatcher(Duration::from_millis(200))
        .multiply(&pool, &a(), b())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded { .. }), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_worker_is_a_remote_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);
    let pool = PoolSnapshot::from_endpoints([dead], 1);

    let err = dispatcher(Duration::from_secs(5))
        .multiply(&pool, &a(), b())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteCall { .. }), "got {err:?}");
}

#[tokio::test]
async fn stale_connections_are_forgotten() {
    let dispatcher = dispatcher(Duration::from_secs(1));
    let a0 = SocketAddr::from(([127, 0, 0, 1], 1));
    let a1 = SocketAddr::from(([127, 0, 0, 1], 2));
    dispatcher.connections().client(a0).unwrap();
    dispatcher.connections().client(a1).unwrap();

    dispatcher.forget_stale(&PoolSnapshot::from_endpoints([a1], 1));
    assert_eq!(dispatcher.connections().len(), 1);
}
