//! Dispatch engine integration tests
//!
//! Everything here runs against the mock transport: completeness,
//! correlation, store serialization, error routing, the retry and exit
//! hooks, and the listener gate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use volley::{
    Client, ClientError, Config, DispatchError, MockTransport, PoolSpec, Request, TransportError,
};

fn requests(n: u64, url: &str) -> Vec<Request> {
    (0..n).map(|i| Request::get(url).with_id(i)).collect()
}

// =============================================================================
// Completeness & correlation
// =============================================================================

#[tokio::test]
async fn test_every_request_produces_one_callback() {
    let mock = Arc::new(MockTransport::new());
    let mut client = Client::with_config(
        Config::new(2000.0).with_max_connections(16),
        vec![PoolSpec::with_transport(mock.clone())],
    );
    for request in requests(40, "http://stub/a") {
        client.submit(request).unwrap();
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicU64::new(0));
    {
        let seen = Arc::clone(&seen);
        client.on_response(move |response, _ctx| {
            seen.lock().unwrap().push(response.id.unwrap());
        });
    }
    {
        let errors = Arc::clone(&errors);
        client.on_error(move |_failure, _ctx| {
            errors.fetch_add(1, Ordering::SeqCst);
        });
    }

    client.run().await.unwrap();

    let mut ids = seen.lock().unwrap().clone();
    ids.sort_unstable();
    assert_eq!(ids, (0..40).collect::<Vec<_>>(), "ids must map one-to-one");
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert_eq!(mock.call_count(), 40);
}

#[tokio::test]
async fn test_submit_rejected_after_run() {
    let mock = Arc::new(MockTransport::new());
    let mut client = Client::new(100.0, vec![PoolSpec::with_transport(mock)]);
    client.on_response(|_, _| {});
    client.submit(Request::get("http://stub").with_id(1)).unwrap();
    client.run().await.unwrap();

    assert!(matches!(
        client.submit(Request::get("http://stub")),
        Err(ClientError::Terminated)
    ));
}

// =============================================================================
// Listener gate
// =============================================================================

#[tokio::test]
async fn test_no_listeners_fails_before_dispatch() {
    let mock = Arc::new(MockTransport::new());
    let mut client = Client::new(100.0, vec![PoolSpec::with_transport(mock.clone())]);
    client.submit(Request::get("http://stub")).unwrap();

    assert!(matches!(client.run().await, Err(ClientError::NoListeners)));
    assert_eq!(mock.call_count(), 0, "nothing may be dispatched");
}

// =============================================================================
// Shared store
// =============================================================================

#[tokio::test]
async fn test_store_increments_are_serialized() {
    // two singleton groups -> two controllers contending for the store
    let mut client = Client::with_config(
        Config::new(5000.0).with_max_connections(16),
        vec![
            PoolSpec::with_transport(Arc::new(MockTransport::new())),
            PoolSpec::with_transport(Arc::new(MockTransport::new())),
        ],
    );
    for request in requests(200, "http://stub/count") {
        client.submit(request).unwrap();
    }
    client.store_set("count", json!(0)).unwrap();

    client.on_response(|_response, ctx| {
        let map = ctx.store().unwrap();
        let current = map.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
        map.insert("count".to_string(), json!(current + 1));
    });

    client.run().await.unwrap();
    assert_eq!(client.store_get("count").unwrap(), Some(json!(200)));
}

#[tokio::test]
async fn test_disabled_store_surfaces_in_context() {
    let mock = Arc::new(MockTransport::new());
    let mut client = Client::with_config(
        Config::new(100.0).with_store(false),
        vec![PoolSpec::with_transport(mock)],
    );
    client.submit(Request::get("http://stub")).unwrap();

    let checked = Arc::new(AtomicBool::new(false));
    {
        let checked = Arc::clone(&checked);
        client.on_response(move |_response, ctx| {
            assert!(matches!(ctx.store(), Err(ClientError::StoreNotSupported)));
            checked.store(true, Ordering::SeqCst);
        });
    }

    client.run().await.unwrap();
    assert!(checked.load(Ordering::SeqCst));
    assert!(matches!(
        client.store_get("k"),
        Err(ClientError::StoreNotSupported)
    ));
}

// =============================================================================
// Error routing
// =============================================================================

#[tokio::test]
async fn test_transport_failures_split_to_error_callbacks() {
    let mock = Arc::new(MockTransport::new().with_failure(|request| {
        match request.id {
            Some(id) if id % 2 == 1 => Some(TransportError::Connect("refused".to_string())),
            _ => None,
        }
    }));
    let mut client = Client::with_config(
        Config::new(2000.0).with_max_connections(8),
        vec![PoolSpec::with_transport(mock)],
    );
    for request in requests(40, "http://stub/flaky") {
        client.submit(request).unwrap();
    }

    let ok_ids = Arc::new(Mutex::new(Vec::new()));
    let err_ids = Arc::new(Mutex::new(Vec::new()));
    {
        let ok_ids = Arc::clone(&ok_ids);
        client.on_response(move |response, _ctx| {
            ok_ids.lock().unwrap().push(response.id.unwrap());
        });
    }
    {
        let err_ids = Arc::clone(&err_ids);
        client.on_error(move |failure, _ctx| {
            assert!(matches!(failure.error, DispatchError::Transport(_)));
            err_ids.lock().unwrap().push(failure.id.unwrap());
        });
    }

    client.run().await.unwrap();

    let mut ok_ids = ok_ids.lock().unwrap().clone();
    let mut err_ids = err_ids.lock().unwrap().clone();
    ok_ids.sort_unstable();
    err_ids.sort_unstable();
    assert_eq!(ok_ids.len(), 20);
    assert_eq!(err_ids.len(), 20);
    assert!(ok_ids.iter().all(|id| id % 2 == 0));
    assert!(err_ids.iter().all(|id| id % 2 == 1));
}

#[tokio::test]
async fn test_non_2xx_stays_response_by_default() {
    let mock = Arc::new(MockTransport::new().with_status(404));
    let mut client = Client::new(500.0, vec![PoolSpec::with_transport(mock)]);
    client.submit(Request::get("http://stub/missing").with_id(0)).unwrap();

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicU64::new(0));
    {
        let statuses = Arc::clone(&statuses);
        client.on_response(move |response, _ctx| {
            statuses.lock().unwrap().push(response.status);
        });
    }
    {
        let errors = Arc::clone(&errors);
        client.on_error(move |_failure, _ctx| {
            errors.fetch_add(1, Ordering::SeqCst);
        });
    }

    client.run().await.unwrap();
    assert_eq!(statuses.lock().unwrap().as_slice(), &[404]);
    assert_eq!(
        errors.load(Ordering::SeqCst),
        0,
        "default config must not classify by status"
    );
}

#[tokio::test]
async fn test_classify_by_status_routes_non_2xx_to_error() {
    let mock = Arc::new(MockTransport::new().with_status(503));
    let mut client = Client::with_config(
        Config::new(500.0).with_classify_by_status(true),
        vec![PoolSpec::with_transport(mock)],
    );
    client.submit(Request::get("http://stub/down").with_id(4)).unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let responses = Arc::new(AtomicU64::new(0));
    {
        let errors = Arc::clone(&errors);
        client.on_error(move |failure, _ctx| {
            if let DispatchError::Status(code) = failure.error {
                errors.lock().unwrap().push((failure.id, code));
            }
        });
    }
    {
        let responses = Arc::clone(&responses);
        client.on_response(move |_response, _ctx| {
            responses.fetch_add(1, Ordering::SeqCst);
        });
    }

    client.run().await.unwrap();
    assert_eq!(errors.lock().unwrap().as_slice(), &[(Some(4), 503)]);
    assert_eq!(
        responses.load(Ordering::SeqCst),
        0,
        "non-2xx must go to error callbacks"
    );
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_the_run() {
    let mock = Arc::new(MockTransport::new());
    let mut client = Client::with_config(
        Config::new(1000.0).with_max_connections(4),
        vec![PoolSpec::with_transport(mock)],
    );
    for request in requests(10, "http://stub/panicky") {
        client.submit(request).unwrap();
    }

    let delivered = Arc::new(AtomicU64::new(0));
    client.on_response(|response, _ctx| {
        if response.id == Some(3) {
            panic!("callback exploded");
        }
    });
    {
        let delivered = Arc::clone(&delivered);
        client.on_response(move |_response, _ctx| {
            delivered.fetch_add(1, Ordering::SeqCst);
        });
    }

    client.run().await.unwrap();
    // the second callback still runs for every completion, including id 3
    assert_eq!(delivered.load(Ordering::SeqCst), 10);
}

// =============================================================================
// Control hooks
// =============================================================================

#[tokio::test]
async fn test_retry_dispatches_the_request_again() {
    let mock = Arc::new(MockTransport::new());
    let mut client = Client::new(200.0, vec![PoolSpec::with_transport(mock.clone())]);
    client.submit(Request::get("http://stub/retry").with_id(1)).unwrap();

    let invocations = Arc::new(AtomicU64::new(0));
    {
        let invocations = Arc::clone(&invocations);
        client.on_response(move |response, ctx| {
            assert_eq!(response.id, Some(1));
            if invocations.fetch_add(1, Ordering::SeqCst) == 0 {
                ctx.retry(Request::get("http://stub/retry").with_id(1));
            }
        });
    }

    client.run().await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exit_stops_the_run_promptly() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(1)));
    let mut client = Client::with_config(
        Config::new(10_000.0).with_max_connections(32),
        vec![PoolSpec::with_transport(mock)],
    );
    for request in requests(1000, "http://stub/firehose") {
        client.submit(request).unwrap();
    }

    let responses = Arc::new(AtomicU64::new(0));
    {
        let responses = Arc::clone(&responses);
        client.on_response(move |_response, ctx| {
            if responses.fetch_add(1, Ordering::SeqCst) + 1 == 10 {
                ctx.exit();
            }
        });
    }
    let unexpected_errors = Arc::new(AtomicU64::new(0));
    {
        let unexpected_errors = Arc::clone(&unexpected_errors);
        client.on_error(move |failure, _ctx| {
            if !matches!(failure.error, DispatchError::Shutdown) {
                unexpected_errors.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let started = Instant::now();
    client.run().await.unwrap();
    let elapsed = started.elapsed();

    let delivered = responses.load(Ordering::SeqCst);
    assert!(delivered >= 10, "saw {delivered} responses before exit");
    assert!(delivered <= 1000);
    assert_eq!(unexpected_errors.load(Ordering::SeqCst), 0);
    assert!(
        elapsed < Duration::from_secs(5),
        "run took {elapsed:?} after exit"
    );
}

// =============================================================================
// Gauges
// =============================================================================

#[test]
fn test_rps_gauges_reach_callbacks() {
    tokio_test::block_on(async {
        let mock = Arc::new(MockTransport::new());
        let mut client = Client::with_config(
            Config::new(1000.0).with_max_connections(8),
            vec![PoolSpec::with_transport(mock)],
        );
        for request in requests(30, "http://stub/gauges") {
            client.submit(request).unwrap();
        }

        let max_rps10 = Arc::new(AtomicU64::new(0));
        {
            let max_rps10 = Arc::clone(&max_rps10);
            client.on_response(move |_response, ctx| {
                max_rps10.fetch_max(ctx.rps10(), Ordering::SeqCst);
            });
        }

        client.run().await.unwrap();
        assert!(max_rps10.load(Ordering::SeqCst) > 0);
    });
}

#[tokio::test]
async fn test_disabled_rps_reads_zero() {
    let mock = Arc::new(MockTransport::new());
    let mut client = Client::with_config(
        Config::new(500.0).with_rps(false),
        vec![PoolSpec::with_transport(mock)],
    );
    client.submit(Request::get("http://stub").with_id(0)).unwrap();

    let checked = Arc::new(AtomicBool::new(false));
    {
        let checked = Arc::clone(&checked);
        client.on_response(move |_response, ctx| {
            assert_eq!(ctx.rps1(), 0);
            assert_eq!(ctx.rps10(), 0);
            assert_eq!(ctx.rps(), 0.0);
            checked.store(true, Ordering::SeqCst);
        });
    }

    client.run().await.unwrap();
    assert!(checked.load(Ordering::SeqCst));
}
