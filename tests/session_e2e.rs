//! E2E: request sessions against loopback servers on the epoll reactor.

#![cfg(unix)]

mod common;

use common::*;
use evfetch::client::Fetched;
use evfetch::error::TimeoutKind;
use evfetch::{
    Client, ClientConfig, EpollReactor, Error, ErrorKind, EventLoop, Failure, FileSink,
    MemorySink, Request,
};
use std::cell::RefCell;
use std::net::TcpListener;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

type Outcomes = Rc<RefCell<Vec<Result<Fetched, Failure>>>>;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

fn new_loop() -> EventLoop {
    EventLoop::new(Arc::new(EpollReactor::new().expect("epoll reactor")))
}

fn client_with(sink: MemorySink, config: ClientConfig) -> Client {
    Client::builder()
        .config(config)
        .sink(sink)
        .build()
        .expect("build client")
}

fn fetch_one(client: &Client, url: &str, id: &str) -> Outcomes {
    let mut event_loop = new_loop();
    let outcomes: Outcomes = Rc::default();
    let request = Request::get(url, id).expect("valid url");
    let sink = Rc::clone(&outcomes);
    client.fetch(&mut event_loop, request, move |outcome| {
        sink.borrow_mut().push(outcome);
    });
    assert!(drive(&mut event_loop), "event loop did not settle");
    outcomes
}

fn single(outcomes: &Outcomes) -> std::cell::Ref<'_, Result<Fetched, Failure>> {
    let list = outcomes.borrow();
    assert_eq!(list.len(), 1, "completion must run exactly once");
    std::cell::Ref::map(list, |list| &list[0])
}

#[test]
fn content_length_body_is_stored() {
    init_test("content_length_body_is_stored");

    let server = CannedServer::respond(&ok_response(b"hello"));
    let store = MemorySink::new();
    let client = client_with(store.clone(), ClientConfig::default());

    let outcomes = fetch_one(&client, &server.url("/greeting"), "greeting.txt");
    let request_head = String::from_utf8(server.join()).expect("ascii request");

    test_section!("response");
    {
        let outcome = single(&outcomes);
        let fetched = outcome.as_ref().expect("fetch succeeds");
        assert_eq!(fetched.head.status, 200);
        assert_eq!(fetched.head.header("content-type"), Some("text/plain"));
        assert_eq!(fetched.body_len, 5);
        assert_eq!(fetched.sink_id, "greeting.txt");
        assert!(fetched.bytes_received > 5);
    }
    assert_eq!(store.get("greeting.txt").as_deref(), Some(&b"hello"[..]));

    test_section!("request");
    assert!(request_head.starts_with("GET /greeting HTTP/1.1\r\n"), "{request_head}");
    assert!(request_head.contains("\r\nHost: 127.0.0.1:"), "{request_head}");
    assert!(request_head.ends_with("\r\n\r\n"));

    test_complete!("content_length_body_is_stored");
}

#[test]
fn chunked_body_across_writes() {
    init_test("chunked_body_across_writes");

    let parts = vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec(),
        b"4\r\nWiki\r\n".to_vec(),
        b"5\r\npedia\r\n0\r".to_vec(),
        b"\n\r\n".to_vec(),
    ];
    let server = CannedServer::start(parts, Ending::Hold(Duration::from_millis(200)));
    let store = MemorySink::new();
    let client = client_with(store.clone(), ClientConfig::default());

    let outcomes = fetch_one(&client, &server.url("/wiki"), "wiki");
    server.join();

    {
        let outcome = single(&outcomes);
        let fetched = outcome.as_ref().expect("fetch succeeds");
        assert_eq!(fetched.body_len, 9);
    }
    assert_eq!(store.get("wiki").as_deref(), Some(&b"Wikipedia"[..]));
    test_complete!("chunked_body_across_writes");
}

#[test]
fn body_until_close() {
    init_test("body_until_close");

    let parts = vec![b"HTTP/1.0 200 OK\r\n\r\nab".to_vec(), b"c".to_vec()];
    let server = CannedServer::start(parts, Ending::Close);
    let store = MemorySink::new();
    let client = client_with(store.clone(), ClientConfig::default());

    let outcomes = fetch_one(&client, &server.url("/"), "close");
    server.join();

    assert!(single(&outcomes).is_ok());
    assert_eq!(store.get("close").as_deref(), Some(&b"abc"[..]));
    test_complete!("body_until_close");
}

#[test]
fn refused_connect_fails_once() {
    init_test("refused_connect_fails_once");

    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr")
    };
    let store = MemorySink::new();
    let client = client_with(store.clone(), ClientConfig::default());

    let outcomes = fetch_one(&client, &format!("http://{addr}/"), "refused");

    {
        let outcome = single(&outcomes);
        let failure = outcome.as_ref().expect_err("connect must fail");
        assert_with_log!(
            failure.kind() == ErrorKind::Connect,
            "refused connect classified",
            ErrorKind::Connect,
            failure.kind()
        );
        assert_eq!(failure.peer_addr, Some(addr));
        assert_eq!(failure.bytes_received, 0);
    }
    assert!(store.is_empty());
    test_complete!("refused_connect_fails_once");
}

#[test]
fn invalid_chunk_size_is_parse_error() {
    init_test("invalid_chunk_size_is_parse_error");

    let server = CannedServer::respond(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nnope\r\n",
    );
    let store = MemorySink::new();
    let client = client_with(store.clone(), ClientConfig::default());

    let outcomes = fetch_one(&client, &server.url("/"), "bad");
    server.join();

    {
        let outcome = single(&outcomes);
        let failure = outcome.as_ref().expect_err("parse must fail");
        assert_eq!(failure.kind(), ErrorKind::Parse);
        assert!(failure.bytes_received > 0);
    }
    assert!(store.is_empty());
    test_complete!("invalid_chunk_size_is_parse_error");
}

#[test]
fn truncated_body_is_parse_error() {
    init_test("truncated_body_is_parse_error");

    let server =
        CannedServer::respond(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");
    let store = MemorySink::new();
    let client = client_with(store.clone(), ClientConfig::default());

    let outcomes = fetch_one(&client, &server.url("/"), "short");
    server.join();

    assert_eq!(
        single(&outcomes).as_ref().expect_err("short body").kind(),
        ErrorKind::Parse
    );
    assert!(store.get("short").is_none());
    test_complete!("truncated_body_is_parse_error");
}

#[test]
fn idle_timeout_after_partial_head() {
    init_test("idle_timeout_after_partial_head");

    let parts = vec![b"HTTP/1.1 200 OK\r\nContent-Le".to_vec()];
    let server = CannedServer::start(parts, Ending::Hold(Duration::from_millis(800)));
    let store = MemorySink::new();
    let config = ClientConfig::default().idle_timeout(Duration::from_millis(100));
    let client = client_with(store.clone(), config);

    let outcomes = fetch_one(&client, &server.url("/"), "slow");
    server.join();

    {
        let outcome = single(&outcomes);
        let failure = outcome.as_ref().expect_err("idle timeout");
        assert!(
            matches!(failure.error, Error::Timeout(TimeoutKind::Idle)),
            "{failure}"
        );
    }
    assert!(store.is_empty());
    test_complete!("idle_timeout_after_partial_head");
}

#[test]
fn file_sink_receives_body() {
    init_test("file_sink_receives_body");

    let dir = tempfile::tempdir().expect("tempdir");
    let server = CannedServer::respond(&ok_response(b"on disk"));
    let client = Client::builder()
        .sink(FileSink::new(dir.path()))
        .build()
        .expect("build client");

    let outcomes = fetch_one(&client, &server.url("/f"), "nested/out.bin");
    server.join();

    assert!(single(&outcomes).is_ok());
    let stored = std::fs::read(dir.path().join("nested/out.bin")).expect("stored file");
    assert_eq!(stored, b"on disk");
    test_complete!("file_sink_receives_body");
}

#[test]
fn concurrent_fetches_share_one_loop() {
    init_test("concurrent_fetches_share_one_loop");

    let first = CannedServer::start(
        vec![ok_response(b"first")],
        Ending::Hold(Duration::from_millis(50)),
    );
    let second = CannedServer::respond(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
    let store = MemorySink::new();
    let client = client_with(store.clone(), ClientConfig::default());

    let mut event_loop = new_loop();
    let outcomes: Outcomes = Rc::default();
    for (server, id) in [(&first, "one"), (&second, "two")] {
        let request = Request::get(&server.url("/"), id).expect("valid url");
        let sink = Rc::clone(&outcomes);
        client.fetch(&mut event_loop, request, move |outcome| {
            sink.borrow_mut().push(outcome);
        });
    }
    assert_eq!(event_loop.handler_count(), 2);
    assert!(drive(&mut event_loop));
    first.join();
    second.join();

    let list = outcomes.borrow();
    assert_eq!(list.len(), 2);
    let mut statuses: Vec<u16> = list
        .iter()
        .map(|o| o.as_ref().expect("both succeed").head.status)
        .collect();
    statuses.sort_unstable();
    assert_eq!(statuses, vec![200, 404]);
    assert_eq!(store.get("one").as_deref(), Some(&b"first"[..]));
    assert_eq!(store.get("two").as_deref(), Some(&b""[..]));
    test_complete!("concurrent_fetches_share_one_loop");
}

#[test]
fn cancel_in_flight_request() {
    init_test("cancel_in_flight_request");

    let parts = vec![b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial".to_vec()];
    let server = CannedServer::start(parts, Ending::Hold(Duration::from_millis(300)));
    let store = MemorySink::new();
    let client = client_with(store.clone(), ClientConfig::default());

    let mut event_loop = new_loop();
    let outcomes: Outcomes = Rc::default();
    let request = Request::get(&server.url("/"), "cancelled").expect("valid url");
    let sink = Rc::clone(&outcomes);
    let token = client.fetch(&mut event_loop, request, move |outcome| {
        sink.borrow_mut().push(outcome);
    });

    for _ in 0..10 {
        event_loop
            .turn(Some(Duration::from_millis(10)))
            .expect("turn");
    }
    assert!(outcomes.borrow().is_empty(), "still waiting on the body");
    assert!(event_loop.cancel(token));
    assert!(!event_loop.contains(token));
    assert!(!event_loop.cancel(token), "second cancel is a no-op");
    server.join();

    assert_eq!(
        single(&outcomes).as_ref().expect_err("cancelled").kind(),
        ErrorKind::Cancelled
    );
    assert!(store.is_empty());
    test_complete!("cancel_in_flight_request");
}
