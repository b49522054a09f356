mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use common::pool_config;
use core::time::Duration;
use mulmatrix_core::{Error, Matrix};
use mulmatrix_server::server::{
    config::DispatchConfig, dispatch::RowDispatcher, http::router, pool::PoolManager,
    service::handler::MatrixService,
};
use tower::ServiceExt;

fn service(base_port: u16) -> MatrixService {
    MatrixService::from_parts(
        PoolManager::new(pool_config(base_port)),
        RowDispatcher::new(DispatchConfig::default()),
        Duration::from_secs(2),
    )
}

async fn send(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multiplies_through_the_http_api() {
    let service = service(39_700);
    let app = router(service.clone(), 1024 * 1024);

    let (status, text) = send(&app, Method::POST, "/setnumworkers", "3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Number of workers set to 3\n");

    let body = r#"{"matrixA": [[1, 2, 3], [4, 5, 6]], "matrixB": [[7, 8], [9, 10], [11, 12]]}"#;
    let (status, text) = send(&app, Method::POST, "/mulmatrix", body).await;
    assert_eq!(status, StatusCode::OK, "{text}");
    let product: Vec<Vec<f64>> = serde_json::from_str(&text).unwrap();
    assert_eq!(product, vec![vec![58.0, 64.0], vec![139.0, 154.0]]);

    let (status, text) = send(&app, Method::GET, "/workers", "").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["concurrency_limit"], 3);
    assert_eq!(json["workers"][2]["endpoint"], "127.0.0.1:39702");
    assert_eq!(json["workers"][2]["state"], "running");

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn product_survives_a_concurrent_resize() {
    let service = service(39_800);
    service.set_num_workers(4).await.unwrap();

    let rows: Vec<Vec<f64>> = (0..64).map(|i| vec![f64::from(i); 16]).collect();
    let a = Matrix::from_rows(rows).unwrap();
    let b = Matrix::from_rows(vec![vec![1.0; 8]; 16]).unwrap();

    let multiply = {
        let service = service.clone();
        let (a, b) = (a.clone(), b.clone());
        tokio::spawn(async move { service.multiply(a, b).await })
    };
    let resize = {
        let service = service.clone();
        tokio::spawn(async move { service.set_num_workers(6).await })
    };

    let product = multiply.await.unwrap().unwrap();
    assert_eq!(resize.await.unwrap().unwrap(), 6);
    for (i, row) in product.iter_rows().enumerate() {
        assert!(row.iter().all(|&v| v == i as f64 * 16.0), "row {i}");
    }

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn product_survives_a_concurrent_shrink() {
    let service = service(39_750);
    service.set_num_workers(4).await.unwrap();

    let rows: Vec<Vec<f64>> = (0..400).map(|i| vec![f64::from(i % 7); 300]).collect();
    let a = Matrix::from_rows(rows).unwrap();
    let b = Matrix::from_rows(vec![vec![1.0; 300]; 300]).unwrap();

    let multiply = {
        let service = service.clone();
        tokio::spawn(async move { service.multiply(a, b).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(service.set_num_workers(1).await.unwrap(), 1);

    let product = multiply.await.unwrap().unwrap();
    for (i, row) in product.iter_rows().enumerate() {
        let expected = (i % 7) as f64 * 300.0;
        assert!(row.iter().all(|&v| v == expected), "row {i}");
    }
    assert_eq!(service.workers().routable().len(), 1);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_refuses_new_work_and_stops_workers() {
    let service = service(39_900);
    service.set_num_workers(2).await.unwrap();
    service.shutdown().await;

    assert!(service.workers().is_empty());
    let a = Matrix::from_rows(vec![vec![1.0]]).unwrap();
    let err = service.multiply(a.clone(), a).await.unwrap_err();
    assert_eq!(err, Error::ServiceShutdown);
    assert_eq!(
        service.set_num_workers(2).await.unwrap_err(),
        Error::ServiceShutdown
    );
}
