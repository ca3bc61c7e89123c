//! Construction, connection, stop predicates, push subscriptions and shutdown.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;

use cqrpc::Client;
use cqrpc::ClientConfig;
use cqrpc::Code;
use cqrpc::ServerBuilder;
use cqrpc::ServerConfig;
use cqrpc::Status;
use cqrpc::client::ClientStreaming;
use cqrpc::client::Unary;
use cqrpc::mem::MemNetwork;
use cqrpc::server;
use cqrpc::transport;

use common::CalculatorService;
use common::CalculatorStub;
use common::Number;
use common::call;
use common::start_client;
use common::start_server;
use common::wait_until;

#[test]
fn test_builder_requires_listen_address() {
    let network = MemNetwork::new();
    let result = ServerBuilder::new().build(network.serve(common::METHODS, CalculatorService::new));
    assert!(matches!(result, Err(server::Error::MissingListenAddr)));
}

#[test]
fn test_builder_reports_address_in_use() {
    let network = MemNetwork::new();
    let _first = common::bind(&network, "mem://taken", 1);

    let config = ServerConfig {
        listen_addr: "mem://taken".to_string(),
        workers: 2,
    };
    let result = ServerBuilder::new()
        .config(config)
        .build(network.serve(common::METHODS, CalculatorService::new));
    match result {
        Err(server::Error::Bind(transport::Error::AddrInUse(addr))) => assert_eq!(addr, "mem://taken"),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("second bind succeeded"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_waits_for_server() {
    let network = MemNetwork::new();
    let config = ClientConfig::default().connect_timeout(Duration::from_millis(30));
    let client = Client::with_config(CalculatorStub::new(network.channel("mem://later")), config);
    assert!(!client.connect().await);

    let late = tokio::spawn({
        let network = network.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            start_server(&network, "mem://later", 1)
        }
    });
    let client = Client::with_config(
        CalculatorStub::new(network.channel("mem://later")),
        ClientConfig::default().connect_timeout(Duration::from_secs(2)),
    );
    assert!(client.connect().await);

    let server = late.await.unwrap();
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_run_until_stop_predicate() {
    let network = MemNetwork::new();
    let server = common::bind(&network, "mem://stop", 1);
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    server.register(
        server::Unary(CalculatorService::request_double),
        move |request: &Number| -> Result<Number, Status> {
            counter.fetch_add(1, Ordering::SeqCst);
            common::double(request)
        },
    );

    let loop_server = Arc::clone(&server);
    let seen = Arc::clone(&served);
    let dispatch = tokio::spawn(async move {
        loop_server.run_until(move || seen.load(Ordering::SeqCst) >= 2).await;
    });

    let client = start_client(&network, "mem://stop", 1);
    assert_eq!(call(&client, Unary(CalculatorStub::double), Number(1)).await, Ok(Number(2)));
    assert_eq!(call(&client, Unary(CalculatorStub::double), Number(2)).await, Ok(Number(4)));

    tokio::time::timeout(Duration::from_secs(2), dispatch)
        .await
        .expect("dispatch loop ignored the stop predicate")
        .unwrap();
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscription_pushes_messages_as_they_arrive() {
    let network = MemNetwork::new();
    let server = start_server(&network, "mem://push", 1);
    let client = start_client(&network, "mem://push", 1);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let failures = Arc::new(AtomicUsize::new(0));
    let on_error = Arc::clone(&failures);
    assert!(client.subscribe(
        CalculatorStub::range,
        Number(4),
        move |number: Number| {
            let _ = tx.send(number.0);
        },
        move |_status: Status| {
            on_error.fetch_add(1, Ordering::SeqCst);
        },
    ));

    let mut received = Vec::new();
    while let Ok(Some(value)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        received.push(value);
    }
    assert_eq!(received, vec![1, 2, 3, 4]);
    assert_eq!(failures.load(Ordering::SeqCst), 0);

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_drains_and_refuses_new_work() {
    let network = MemNetwork::new();
    let server = common::bind(&network, "mem://drain", 2);
    common::register_all(&server);
    let server_loops = server.spawn_workers();
    assert_eq!(server_loops.len(), 2);

    let client = Arc::new(Client::new(CalculatorStub::new(network.channel("mem://drain"))));
    let client_loops = client.spawn_workers(2);

    let summary = call(&client, ClientStreaming(CalculatorStub::tally), vec![Number(1), Number(2)]).await;
    assert_eq!(summary.map(|s| s.total), Ok(3));

    server.shutdown();
    for handle in server_loops {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("server loop did not exit")
            .unwrap();
    }
    assert_eq!(server.live_handlers(), 0);
    assert!(!server.register(server::Unary(CalculatorService::request_double), common::double));

    // The address is free again, so calls fail fast.
    let response = call(&client, Unary(CalculatorStub::double), Number(1)).await;
    assert_eq!(response.unwrap_err().code(), Code::Unavailable);

    client.shutdown();
    for handle in client_loops {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("client loop did not exit")
            .unwrap();
    }
    assert_eq!(client.in_flight(), 0);
    assert!(!client.invoke(Unary(CalculatorStub::double), Number(1), |_| {}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_register_racing_shutdown_leaves_nothing_behind() {
    let network = MemNetwork::new();
    for round in 0..20 {
        let addr = format!("mem://race-{}", round);
        let server = common::bind(&network, &addr, 2);
        let loops = server.spawn_workers();

        let registering = tokio::task::spawn_blocking({
            let server = Arc::clone(&server);
            move || {
                server.register(server::Unary(CalculatorService::request_double), common::double);
                server.register(server::ClientStreaming(CalculatorService::request_tally), common::tally);
            }
        });
        server.shutdown();
        registering.await.unwrap();

        for handle in loops {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("server loop did not exit")
                .unwrap();
        }
        assert_eq!(server.live_handlers(), 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rebind_after_shutdown() -> anyhow::Result<()> {
    let network = MemNetwork::new();
    let server = start_server(&network, "mem://rebind", 1);
    server.shutdown();
    assert!(wait_until(|| Arc::strong_count(&server) == 1).await);
    drop(server);

    let rebound = Arc::new(
        ServerBuilder::new()
            .listen("mem://rebind")
            .build(network.serve(common::METHODS, CalculatorService::new))?,
    );
    common::register_all(&rebound);
    rebound.spawn_workers();
    assert_eq!(rebound.local_addr(), "mem://rebind");

    let client = start_client(&network, "mem://rebind", 1);
    assert_eq!(call(&client, Unary(CalculatorStub::double), Number(3)).await, Ok(Number(6)));
    rebound.shutdown();
    Ok(())
}
