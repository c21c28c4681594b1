//! E2E: https requests against an in-process rustls server.

#![cfg(all(unix, feature = "tls"))]

mod common;

use common::*;
use evfetch::client::Fetched;
use evfetch::{
    Client, ClientConfig, EpollReactor, ErrorKind, EventLoop, Failure, MemorySink, Request,
    StaticResolver, TlsConnector, TlsConnectorBuilder,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use std::cell::RefCell;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Outcomes = Rc<RefCell<Vec<Result<Fetched, Failure>>>>;

struct TlsServer {
    addr: SocketAddr,
    handle: JoinHandle<io::Result<Vec<u8>>>,
}

fn self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).expect("self-signed");
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    (certified.cert.der().clone(), key)
}

fn start_tls_server(
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
    response: Vec<u8>,
) -> TlsServer {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .expect("server cert");
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = thread::spawn(move || {
        let (tcp, _) = listener.accept()?;
        tcp.set_read_timeout(Some(TEST_DEADLINE))?;
        let conn = ServerConnection::new(config).map_err(io::Error::other)?;
        let mut stream = StreamOwned::new(conn, tcp);
        let request = read_request_head(&mut stream)?;
        stream.write_all(&response)?;
        stream.conn.send_close_notify();
        stream.flush()?;
        Ok(request)
    });
    TlsServer { addr, handle }
}

fn client(connector: TlsConnector, store: MemorySink) -> Client {
    Client::builder()
        .config(ClientConfig::default())
        .resolver(StaticResolver::new().with_host("localhost", [IpAddr::V4(Ipv4Addr::LOCALHOST)]))
        .tls_connector(connector)
        .sink(store)
        .build()
        .expect("build client")
}

fn fetch(client: &Client, url: &str, id: &str) -> Outcomes {
    let mut event_loop = EventLoop::new(Arc::new(EpollReactor::new().expect("epoll")));
    let outcomes: Outcomes = Rc::default();
    let sink = Rc::clone(&outcomes);
    client.fetch(
        &mut event_loop,
        Request::get(url, id).expect("valid url"),
        move |outcome| sink.borrow_mut().push(outcome),
    );
    assert!(drive(&mut event_loop), "event loop did not settle");
    outcomes
}

#[test]
fn https_fetch_with_trusted_root() {
    init_test_logging();
    test_phase!("https_fetch_with_trusted_root");

    let (cert, key) = self_signed();
    let connector = TlsConnectorBuilder::new()
        .add_root_certificate(cert.to_vec())
        .build()
        .expect("connector");
    let server = start_tls_server(cert, key, ok_response(b"secret"));
    let store = MemorySink::new();
    let client = client(connector, store.clone());

    let url = format!("https://localhost:{}/private", server.addr.port());
    let outcomes = fetch(&client, &url, "private");
    let request = server
        .handle
        .join()
        .expect("server thread")
        .expect("server io");

    let list = outcomes.borrow();
    assert_eq!(list.len(), 1);
    let fetched = list[0].as_ref().expect("https fetch succeeds");
    assert_eq!(fetched.head.status, 200);
    assert_eq!(store.get("private").as_deref(), Some(&b"secret"[..]));

    let request = String::from_utf8(request).expect("ascii");
    assert!(request.starts_with("GET /private HTTP/1.1\r\n"), "{request}");
    test_complete!("https_fetch_with_trusted_root");
}

#[test]
fn https_untrusted_certificate_fails() {
    init_test_logging();
    test_phase!("https_untrusted_certificate_fails");

    let (cert, key) = self_signed();
    let (other_root, _) = self_signed();
    let connector = TlsConnectorBuilder::new()
        .add_root_certificate(other_root.to_vec())
        .build()
        .expect("connector");
    let server = start_tls_server(cert, key, ok_response(b"never"));
    let store = MemorySink::new();
    let client = client(connector, store.clone());

    let url = format!("https://localhost:{}/", server.addr.port());
    let outcomes = fetch(&client, &url, "untrusted");
    // The server side sees the alert; its result is irrelevant.
    let _ = server.handle.join();

    let list = outcomes.borrow();
    assert_eq!(list.len(), 1);
    let failure = list[0].as_ref().expect_err("handshake must fail");
    assert_with_log!(
        failure.kind() == ErrorKind::Tls,
        "untrusted root classified",
        ErrorKind::Tls,
        failure.kind()
    );
    assert!(store.is_empty());
    test_complete!("https_untrusted_certificate_fails");
}

#[test]
fn https_without_verification_accepts_any_certificate() {
    init_test_logging();
    test_phase!("https_without_verification_accepts_any_certificate");

    let (cert, key) = self_signed();
    let connector = TlsConnectorBuilder::new()
        .verify_peer(false)
        .build()
        .expect("connector");
    let server = start_tls_server(cert, key, ok_response(b"open"));
    let store = MemorySink::new();
    let client = client(connector, store.clone());

    let url = format!("https://localhost:{}/", server.addr.port());
    let outcomes = fetch(&client, &url, "open");
    server.handle.join().expect("server thread").expect("server io");

    assert!(outcomes.borrow()[0].is_ok());
    assert_eq!(store.get("open").as_deref(), Some(&b"open"[..]));
    test_complete!("https_without_verification_accepts_any_certificate");
}
