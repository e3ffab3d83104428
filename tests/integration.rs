//! Integration tests for serverquery-client.
//!
//! A full client runs against an in-memory fake server on a duplex stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serverquery_client::codec::escape;
use serverquery_client::mirror::int_key;
use serverquery_client::{
    filter, CachedEntity, Client, ClientBuilder, ClientEvent, Command, ConnectionState, Criterion,
    EntityCache, QueryError, Value,
};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const GREETING: &[u8] = b"TS3\n\rWelcome to the TeamSpeak 3 ServerQuery interface.\n\r";

/// Data lines followed by a success status.
fn ok(data: &str) -> String {
    if data.is_empty() {
        "error id=0 msg=ok\n\r".to_string()
    } else {
        format!("{data}\n\rerror id=0 msg=ok\n\r")
    }
}

/// Reply with a record echoing the received line.
fn echo(line: &str) -> String {
    ok(&format!("echo={}", escape(line)))
}

/// Fake server: greets, then answers every line with `respond(line)`.
///
/// Resolves to the lines it received once the client hangs up.
fn spawn_server<F>(stream: DuplexStream, respond: F) -> JoinHandle<Vec<String>>
where
    F: Fn(&str) -> String + Send + 'static,
{
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(stream);
        write.write_all(GREETING).await.unwrap();

        let mut lines = BufReader::new(read).lines();
        let mut seen = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = respond(&line);
            seen.push(line);
            if write.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
        seen
    })
}

fn quiet() -> ClientBuilder {
    Client::builder().pacing(false).keepalive(false)
}

async fn start<F>(builder: ClientBuilder, respond: F) -> (Client, JoinHandle<Vec<String>>)
where
    F: Fn(&str) -> String + Send + 'static,
{
    let (client_io, server_io) = duplex(64 * 1024);
    let server = spawn_server(server_io, respond);
    let client = builder.start(client_io).await.unwrap();
    (client, server)
}

/// Test that concurrent submits each receive their own response.
#[tokio::test]
async fn test_concurrent_submits_correlate_in_order() {
    let (client, server) = start(quiet(), echo).await;
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for clid in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let command = Command::new("clientinfo").arg("clid", clid);
            let records = client.submit(&command).await.unwrap();
            (command.encode().unwrap(), records)
        }));
    }

    for task in tasks {
        let (line, records) = task.await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["echo"], Value::Str(line));
    }

    client.close().await;
    assert_eq!(server.await.unwrap().len(), 8);
}

/// Test that values with spaces are escaped on the wire and come back intact.
#[tokio::test]
async fn test_escaped_value_round_trip() {
    // Send the received parameter block back verbatim as the record
    let params = |line: &str| ok(line.split_once(' ').map_or("", |(_, rest)| rest));
    let (client, server) = start(quiet(), params).await;

    let command = Command::new("clientupdate").arg("client_nickname", "a b");
    let records = client.submit(&command).await.unwrap();
    assert_eq!(records[0]["client_nickname"], Value::Str("a b".into()));

    client.close().await;
    assert_eq!(
        server.await.unwrap(),
        vec!["clientupdate client_nickname=a\\sb".to_string()]
    );
}

/// Test that paced writes are at least one interval apart.
#[tokio::test(start_paused = true)]
async fn test_pacing_gap_between_writes() {
    let times = Arc::new(Mutex::new(Vec::new()));
    let recorded = times.clone();
    let (client, server) = start(
        Client::builder()
            .keepalive(false)
            .pacing_interval(Duration::from_millis(350)),
        move |_line: &str| {
            recorded.lock().unwrap().push(Instant::now());
            ok("")
        },
    )
    .await;

    let version = Command::new("version");
    let whoami = Command::new("whoami");
    let hostinfo = Command::new("hostinfo");
    let (a, b, c) = tokio::join!(
        client.submit(&version),
        client.submit(&whoami),
        client.submit(&hostinfo),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    client.close().await;
    server.await.unwrap();

    let times = times.lock().unwrap();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(350));
    }
}

/// Test that identical concurrent cached calls produce one write.
#[tokio::test]
async fn test_cached_calls_coalesce() {
    let (client, server) = start(quiet(), |line: &str| match line {
        "serverinfo" => ok("virtualserver_name=Test virtualserver_clientsonline=3"),
        _ => ok(""),
    })
    .await;

    let command = Command::new("serverinfo");
    let (a, b, c, d) = tokio::join!(
        client.submit_cached(&command),
        client.submit_cached(&command),
        client.submit_cached(&command),
        client.submit_cached(&command),
    );
    let (a, b, c, d) = (a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &c));
    assert!(Arc::ptr_eq(&a, &d));
    assert_eq!(a[0]["virtualserver_clientsonline"], Value::Int(3));

    client.close().await;
    assert_eq!(server.await.unwrap(), vec!["serverinfo".to_string()]);
}

/// Test that a settled outcome is reused within the grace window only.
#[tokio::test(start_paused = true)]
async fn test_cache_grace_window() {
    let (client, server) = start(
        quiet().cache_grace(Duration::from_millis(50)),
        |_line: &str| ok("virtualserver_version=3.13.7"),
    )
    .await;

    let version = client.version().await.unwrap();
    assert_eq!(version["virtualserver_version"], Value::Str("3.13.7".into()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    client.version().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.version().await.unwrap();

    client.close().await;
    assert_eq!(server.await.unwrap(), vec!["version", "version"]);
}

/// Test that closing with commands queued settles all of them and writes nothing more.
#[tokio::test(start_paused = true)]
async fn test_close_with_queued_commands() {
    let (client_io, server_io) = duplex(64 * 1024);
    let (read, mut write) = tokio::io::split(server_io);
    write.write_all(GREETING).await.unwrap();

    let client = Arc::new(quiet().start(client_io).await.unwrap());
    let mut events = client.events();

    let settled = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    for name in ["channellist", "clientlist", "serverinfo"] {
        let client = client.clone();
        let settled = settled.clone();
        tasks.push(tokio::spawn(async move {
            let result = client.submit(&Command::new(name)).await;
            settled.lock().unwrap().push(name);
            result
        }));
        // Queue in submission order
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let mut lines = BufReader::new(read).lines();
    let first = lines.next_line().await.unwrap().unwrap();
    assert_eq!(first, "channellist");

    // Hang up without answering
    drop(write);
    drop(lines);

    for task in tasks {
        assert!(matches!(
            task.await.unwrap(),
            Err(QueryError::ConnectionClosed)
        ));
    }
    assert_eq!(
        *settled.lock().unwrap(),
        vec!["channellist", "clientlist", "serverinfo"]
    );
    assert!(matches!(events.recv().await, Ok(ClientEvent::Closed(_))));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.submit(&Command::new("version")).await,
        Err(QueryError::NotConnected)
    ));
}

/// Test that notifications reach subscribers without disturbing the pending command.
#[tokio::test]
async fn test_notification_routing() {
    let (client_io, server_io) = duplex(64 * 1024);
    let (read, mut write) = tokio::io::split(server_io);
    write.write_all(GREETING).await.unwrap();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let client = quiet()
        .on("cliententerview", move |notification| {
            let nickname = notification
                .first()
                .and_then(|r| r.get("client_nickname"))
                .map(|v| v.to_string());
            let _ = seen_tx.send(nickname);
        })
        .start(client_io)
        .await
        .unwrap();

    let left = Arc::new(Mutex::new(0));
    let counter = left.clone();
    let id = client.subscribe("clientleftview", move |_| {
        *counter.lock().unwrap() += 1;
    });

    let server = tokio::spawn(async move {
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, "clientlist");
        write
            .write_all(
                b"clid=1 client_nickname=alice|clid=2 client_nickname=bob\n\r\
                  notifycliententerview clid=3 client_nickname=carol\n\r\
                  notifyclientleftview clid=2\n\r\
                  error id=0 msg=ok\n\r",
            )
            .await
            .unwrap();
        (lines, write)
    });

    let records = client.submit(&Command::new("clientlist")).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["client_nickname"], Value::Str("bob".into()));

    assert_eq!(seen_rx.recv().await.unwrap(), Some("carol".to_string()));
    assert_eq!(*left.lock().unwrap(), 1);

    assert!(client.unsubscribe(id));
    assert!(!client.unsubscribe(id));

    let (_lines, _write) = server.await.unwrap();
    client.close().await;
}

/// Test that keepalive runs on its own and its failures do not reach callers.
#[tokio::test(start_paused = true)]
async fn test_keepalive_failure_is_reported_as_event() {
    let (client, server) = start(
        Client::builder()
            .pacing(false)
            .keepalive_interval(Duration::from_secs(10)),
        |line: &str| match line {
            "version" => "error id=3329 msg=connection\\sfailed,\\syou\\sare\\sbanned\n\r".into(),
            _ => echo(line),
        },
    )
    .await;
    let mut events = client.events();

    tokio::time::sleep(Duration::from_secs(11)).await;

    match events.recv().await {
        Ok(ClientEvent::ProtocolError(e)) => {
            assert_eq!(e.code, 3329);
            assert_eq!(e.message, "connection failed, you are banned");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Ready);
    client.submit(&Command::new("whoami")).await.unwrap();

    client.close().await;
    assert_eq!(server.await.unwrap(), vec!["version", "whoami"]);
}

/// Test that a command that cannot be encoded writes nothing.
#[tokio::test]
async fn test_serialization_error_writes_nothing() {
    let (client, server) = start(quiet(), echo).await;

    let nested = Command::new("clientkick").arg(
        "clid",
        Value::List(vec![Value::List(vec![Value::Int(1)])]),
    );
    assert!(matches!(
        client.submit(&nested).await,
        Err(QueryError::Serialization(_))
    ));
    assert!(matches!(
        client.submit_cached(&Command::new("bad name")).await,
        Err(QueryError::Serialization(_))
    ));

    client.submit(&Command::new("version")).await.unwrap();
    client.close().await;
    assert_eq!(server.await.unwrap(), vec!["version"]);
}

/// Test that a protocol error settles only its own command.
#[tokio::test]
async fn test_protocol_error_is_isolated() {
    let (client, server) = start(quiet(), |line: &str| {
        if line.starts_with("channelinfo") {
            "error id=768 msg=invalid\\schannelID\n\r".into()
        } else {
            ok("")
        }
    })
    .await;

    let channelinfo = Command::new("channelinfo").arg("cid", 999);
    let (bad, good) = tokio::join!(client.submit(&channelinfo), client.use_server(1));
    match bad {
        Err(QueryError::Protocol(e)) => {
            assert_eq!(e.code, 768);
            assert_eq!(e.message, "invalid channelID");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    good.unwrap();
    assert_eq!(client.state(), ConnectionState::Ready);

    client.close().await;
    assert_eq!(
        server.await.unwrap(),
        vec!["channelinfo cid=999", "use sid=1"]
    );
}

/// Test reconciling local wrappers against successive list snapshots.
#[tokio::test]
async fn test_reconcile_client_list() {
    let snapshots = Arc::new(Mutex::new(vec![
        "clid=2 client_nickname=bob client_type=0 client_idle_time=200|clid=3 client_nickname=carol client_type=0 client_idle_time=0",
        "clid=1 client_nickname=alice client_type=0 client_idle_time=0|clid=2 client_nickname=bob client_type=0 client_idle_time=100|clid=9 client_nickname=serveradmin client_type=1 client_idle_time=0",
    ]));
    let (client, _server) = start(quiet(), move |line: &str| {
        assert_eq!(line, "clientlist");
        ok(snapshots.lock().unwrap().pop().unwrap_or_default())
    })
    .await;
    let client = Arc::new(client);

    let created = AtomicUsize::new(0);
    let mut mirror: EntityCache<i64, CachedEntity<i64, Client>> = EntityCache::new();
    let wrap = |record: &serverquery_client::Record| {
        created.fetch_add(1, Ordering::SeqCst);
        let key = record["clid"].as_int().unwrap();
        CachedEntity::new(key, record.clone(), &client)
    };

    let first = client.submit(&Command::new("clientlist")).await.unwrap();
    let current = mirror.reconcile(&first, int_key("clid"), wrap);
    let humans = filter(current, &[("client_type", Criterion::Exact(Value::Int(0)))]);
    assert_eq!(humans.len(), 2);
    assert_eq!(created.load(Ordering::SeqCst), 3);

    let second = client.submit(&Command::new("clientlist")).await.unwrap();
    let current = mirror.reconcile(&second, int_key("clid"), wrap);
    let keys: Vec<i64> = current.iter().map(|e| *e.key()).collect();
    assert_eq!(keys, vec![2, 3]);
    // Only carol is new; bob keeps the wrapper built from the first snapshot
    assert_eq!(created.load(Ordering::SeqCst), 4);
    assert_eq!(current[0].record()["client_idle_time"], Value::Int(100));
    assert!(!mirror.contains_key(&1));
    assert!(mirror.get(&3).unwrap().parent().is_some());

    client.close().await;
}
