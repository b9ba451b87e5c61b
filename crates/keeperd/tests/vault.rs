//! End-to-end tests: a real server on an ephemeral port, driven by the
//! generated client.

use std::sync::Arc;

use keeper_core::config::KeeperConfig;
use keeper_core::proto::keeper_client::KeeperClient;
use keeper_core::proto::*;
use keeper_core::{CHUNK_SIZE, TOKEN_METADATA_KEY};
use keeper_storage::SqliteStore;
use keeperd::daemon::build_context;
use keeperd::metrics::Metrics;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tonic::transport::Channel;
use tonic::{Code, Request};

struct TestServer {
    url: String,
    store: Arc<SqliteStore>,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn test_config(dir: &TempDir) -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.storage.database_url = format!("sqlite://{}", dir.path().join("keeper.db").display());
    config.auth.allow_insecure_defaults = true;
    config.auth.argon2_mem_cost_kib = 1024;
    config.auth.argon2_time_cost = 1;
    config
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let store = Arc::new(SqliteStore::open(&config.storage).await.unwrap());
    let ctx = Arc::new(build_context(&config, store.clone(), Metrics::unregistered()).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        keeperd::grpc::serve(listener, ctx, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    TestServer {
        url,
        store,
        shutdown: Some(tx),
        _dir: dir,
    }
}

async fn client(server: &TestServer) -> KeeperClient<Channel> {
    KeeperClient::connect(server.url.clone()).await.unwrap()
}

fn authed<T>(token: &str, message: T) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert(TOKEN_METADATA_KEY, token.parse().unwrap());
    request
}

async fn register(client: &mut KeeperClient<Channel>, login: &str, password: &str) -> String {
    client
        .register(RegisterRequest {
            login: login.into(),
            password: password.into(),
        })
        .await
        .unwrap()
        .into_inner()
        .token
}

fn card(name: &str, number: &str, pin: &str) -> CardWriteRequest {
    CardWriteRequest {
        name: name.into(),
        number: number.into(),
        pin: pin.into(),
        notes: String::new(),
    }
}

fn password(name: &str, secret: &str) -> PasswordWriteRequest {
    PasswordWriteRequest {
        name: name.into(),
        username: "user".into(),
        password: secret.into(),
        notes: "notes".into(),
    }
}

#[tokio::test]
async fn test_ping_without_token() {
    let server = start_server().await;
    let mut client = client(&server).await;

    let pong = client.ping(Empty {}).await.unwrap().into_inner();
    assert_eq!(pong.message, "pong");
}

#[tokio::test]
async fn test_card_scenario_across_users() {
    let server = start_server().await;
    let mut client = client(&server).await;

    let alice = register(&mut client, "alice", "pw1").await;
    client
        .card_write(authed(&alice, card("visa", "4111111111111111", "123")))
        .await
        .unwrap();

    let read = client
        .card_read(authed(&alice, ReadRequest { name: "visa".into() }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(read.name, "visa");
    assert_eq!(read.number, "4111111111111111");
    assert_eq!(read.pin, "123");
    assert_eq!(read.notes, "");
    assert!(read.id > 0);

    let bob = register(&mut client, "bob", "pw2").await;
    let err = client
        .card_read(authed(&bob, ReadRequest { name: "visa".into() }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_fields_encrypted_at_rest() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;

    client
        .password_write(authed(&alice, password("mail", "hunter2-plaintext")))
        .await
        .unwrap();

    let record = keeper_storage::Storage::read(
        server.store.as_ref(),
        &keeper_storage::PASSWORDS,
        "alice",
        "mail",
    )
    .await
    .unwrap();
    for field in &record.fields {
        assert!(!field
            .windows(b"hunter2-plaintext".len())
            .any(|w| w == b"hunter2-plaintext"));
    }
}

#[tokio::test]
async fn test_missing_or_bad_token_rejected() {
    let server = start_server().await;
    let mut client = client(&server).await;

    let err = client.card_list(Empty {}).await.unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);

    let err = client
        .card_list(authed("not-a-token", Empty {}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);

    let err = client.list(authed("", Empty {})).await.unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn test_register_conflict() {
    let server = start_server().await;
    let mut client = client(&server).await;
    register(&mut client, "alice", "pw1").await;

    let err = client
        .register(RegisterRequest {
            login: "alice".into(),
            password: "other".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn test_login_failures_indistinguishable() {
    let server = start_server().await;
    let mut client = client(&server).await;
    register(&mut client, "realuser", "right").await;

    let unknown = client
        .login(LoginRequest {
            login: "nonexistent".into(),
            password: "x".into(),
        })
        .await
        .unwrap_err();
    let wrong = client
        .login(LoginRequest {
            login: "realuser".into(),
            password: "wrongpassword".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(unknown.code(), Code::Unauthenticated);
    assert_eq!(wrong.code(), Code::Unauthenticated);
    assert_eq!(unknown.message(), wrong.message());

    let token = client
        .login(LoginRequest {
            login: "realuser".into(),
            password: "right".into(),
        })
        .await
        .unwrap()
        .into_inner()
        .token;
    client.note_list(authed(&token, Empty {})).await.unwrap();
}

#[tokio::test]
async fn test_name_uniqueness_and_reuse_after_delete() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;

    client
        .password_write(authed(&alice, password("mail", "one")))
        .await
        .unwrap();
    let err = client
        .password_write(authed(&alice, password("mail", "two")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);

    client
        .password_delete(authed(&alice, DeleteRequest { name: "mail".into() }))
        .await
        .unwrap();
    client
        .password_write(authed(&alice, password("mail", "three")))
        .await
        .unwrap();

    let read = client
        .password_read(authed(&alice, ReadRequest { name: "mail".into() }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(read.password, "three");

    let err = client
        .password_delete(authed(&alice, DeleteRequest { name: "nope".into() }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_update_by_id() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;
    let bob = register(&mut client, "bob", "pw2").await;

    let id = client
        .note_write(authed(
            &alice,
            NoteWriteRequest {
                name: "todo".into(),
                notes: "milk".into(),
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .id;
    client
        .note_write(authed(
            &alice,
            NoteWriteRequest {
                name: "other".into(),
                notes: "x".into(),
            },
        ))
        .await
        .unwrap();

    // Rename through update
    client
        .note_update(authed(
            &alice,
            NoteUpdateRequest {
                id,
                write: Some(NoteWriteRequest {
                    name: "groceries".into(),
                    notes: "milk, eggs".into(),
                }),
            },
        ))
        .await
        .unwrap();
    let read = client
        .note_read(authed(&alice, ReadRequest { name: "groceries".into() }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(read.id, id);
    assert_eq!(read.notes, "milk, eggs");

    // Rename onto an existing name
    let err = client
        .note_update(authed(
            &alice,
            NoteUpdateRequest {
                id,
                write: Some(NoteWriteRequest {
                    name: "other".into(),
                    notes: String::new(),
                }),
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);

    // Another user cannot address the id
    let err = client
        .note_update(authed(
            &bob,
            NoteUpdateRequest {
                id,
                write: Some(NoteWriteRequest {
                    name: "stolen".into(),
                    notes: String::new(),
                }),
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_isolation_of_lists_and_deletes() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;
    let bob = register(&mut client, "bob", "pw2").await;

    client
        .card_write(authed(&alice, card("visa", "4111", "1")))
        .await
        .unwrap();

    let names = client
        .card_list(authed(&bob, Empty {}))
        .await
        .unwrap()
        .into_inner()
        .names;
    assert!(names.is_empty());

    let err = client
        .card_delete(authed(&bob, DeleteRequest { name: "visa".into() }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let names = client
        .card_list(authed(&alice, Empty {}))
        .await
        .unwrap()
        .into_inner()
        .names;
    assert_eq!(names, vec!["visa".to_string()]);
}

#[tokio::test]
async fn test_validation_errors() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;

    let err = client
        .card_write(authed(&alice, card("", "4111", "1")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = client
        .card_write(authed(&alice, card("visa", "not digits", "1")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = client
        .register(RegisterRequest {
            login: String::new(),
            password: "x".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_list_counts() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;

    client
        .password_write(authed(&alice, password("a", "1")))
        .await
        .unwrap();
    client
        .card_write(authed(&alice, card("b", "1", "1")))
        .await
        .unwrap();
    client
        .card_write(authed(&alice, card("c", "2", "2")))
        .await
        .unwrap();
    client
        .binary_write(authed(
            &alice,
            BinaryWriteRequest {
                name: "f".into(),
                notes: String::new(),
                size: 0,
            },
        ))
        .await
        .unwrap();

    let counts = client
        .list(authed(&alice, Empty {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(counts.passwords_count, 1);
    assert_eq!(counts.cards_count, 2);
    assert_eq!(counts.notes_count, 0);
    assert_eq!(counts.binaries_count, 1);
}

// ── Binary transfer ──────────────────────────────────────────────────────

async fn new_binary(client: &mut KeeperClient<Channel>, token: &str, name: &str) -> BinaryWriteResponse {
    client
        .binary_write(authed(
            token,
            BinaryWriteRequest {
                name: name.into(),
                notes: "sealed notes".into(),
                size: 0,
            },
        ))
        .await
        .unwrap()
        .into_inner()
}

async fn upload(
    client: &mut KeeperClient<Channel>,
    token: &str,
    messages: Vec<BinaryUploadChunk>,
) -> Result<BinaryUploadResponse, tonic::Status> {
    client
        .binary_upload(authed(token, tokio_stream::iter(messages)))
        .await
        .map(|r| r.into_inner())
}

fn chunks_of(bin_id: i64, data: &[u8], step: usize) -> Vec<BinaryUploadChunk> {
    if data.is_empty() {
        return vec![BinaryUploadChunk {
            bin_id,
            chunk: Vec::new(),
        }];
    }
    data.chunks(step)
        .map(|c| BinaryUploadChunk {
            bin_id,
            chunk: c.to_vec(),
        })
        .collect()
}

async fn download(
    client: &mut KeeperClient<Channel>,
    token: &str,
    bin_id: i64,
) -> Result<Vec<Vec<u8>>, tonic::Status> {
    let mut stream = client
        .binary_download(authed(token, BinaryDownloadRequest { bin_id }))
        .await?
        .into_inner();
    let mut chunks = Vec::new();
    while let Some(msg) = stream.message().await? {
        chunks.push(msg.chunk);
    }
    Ok(chunks)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

#[tokio::test]
async fn test_chunk_fidelity() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;

    let sizes = [0, 100, CHUNK_SIZE, CHUNK_SIZE + 1, 5 * CHUNK_SIZE + 123];
    for (i, size) in sizes.into_iter().enumerate() {
        let bin = new_binary(&mut client, &alice, &format!("file-{i}")).await;
        let data = pattern(size);

        let ack = upload(&mut client, &alice, chunks_of(bin.bin_id, &data, 1000))
            .await
            .unwrap();
        assert_eq!(ack.size, size as i64);

        let chunks = download(&mut client, &alice, bin.bin_id).await.unwrap();
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= CHUNK_SIZE));
        assert_eq!(chunks.concat(), data, "size {size}");
    }
}

#[tokio::test]
async fn test_download_never_written_is_not_found() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;
    let bin = new_binary(&mut client, &alice, "empty").await;

    let err = download(&mut client, &alice, bin.bin_id).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    // An uploaded empty file is not the same as a never-written one
    upload(&mut client, &alice, chunks_of(bin.bin_id, &[], 1))
        .await
        .unwrap();
    assert!(download(&mut client, &alice, bin.bin_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reupload_replaces_payload() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;
    let bin = new_binary(&mut client, &alice, "doc").await;

    upload(&mut client, &alice, chunks_of(bin.bin_id, &pattern(3 * CHUNK_SIZE), 4096))
        .await
        .unwrap();
    upload(&mut client, &alice, chunks_of(bin.bin_id, b"short", 5))
        .await
        .unwrap();

    let chunks = download(&mut client, &alice, bin.bin_id).await.unwrap();
    assert_eq!(chunks.concat(), b"short");
}

#[tokio::test]
async fn test_upload_authorization_and_consistency() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;
    let bob = register(&mut client, "bob", "pw2").await;
    let bin = new_binary(&mut client, &alice, "doc").await;
    let other = new_binary(&mut client, &alice, "other").await;

    upload(&mut client, &alice, chunks_of(bin.bin_id, b"original", 8))
        .await
        .unwrap();

    // Bob cannot write or read Alice's object
    let err = upload(&mut client, &bob, chunks_of(bin.bin_id, b"evil", 4))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    let err = download(&mut client, &bob, bin.bin_id).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    // Switching objects mid-stream aborts and leaves the target untouched
    let mut mixed = chunks_of(bin.bin_id, &pattern(2 * CHUNK_SIZE), 1024);
    mixed.push(BinaryUploadChunk {
        bin_id: other.bin_id,
        chunk: b"x".to_vec(),
    });
    let err = upload(&mut client, &alice, mixed).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let chunks = download(&mut client, &alice, bin.bin_id).await.unwrap();
    assert_eq!(chunks.concat(), b"original");

    // Without a token the stream is rejected before any handler runs
    let err = client
        .binary_upload(tokio_stream::iter(chunks_of(bin.bin_id, b"x", 1)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn test_reupload_during_download_never_mixes_content() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;
    let bin = new_binary(&mut client, &alice, "large").await;

    // Well past what the transport buffers for a paused reader
    let size = 1536 * CHUNK_SIZE;
    let old = vec![0xAAu8; size];
    let new = vec![0xBBu8; size];
    upload(&mut client, &alice, chunks_of(bin.bin_id, &old, CHUNK_SIZE))
        .await
        .unwrap();

    let mut stream = client
        .binary_download(authed(&alice, BinaryDownloadRequest { bin_id: bin.bin_id }))
        .await
        .unwrap()
        .into_inner();
    let mut received = stream.message().await.unwrap().unwrap().chunk;

    let mut writer = KeeperClient::connect(server.url.clone()).await.unwrap();
    upload(&mut writer, &alice, chunks_of(bin.bin_id, &new, CHUNK_SIZE))
        .await
        .unwrap();

    let outcome = loop {
        match stream.message().await {
            Ok(Some(msg)) => received.extend_from_slice(&msg.chunk),
            Ok(None) => break Ok(()),
            Err(status) => break Err(status),
        }
    };
    match outcome {
        Ok(()) => assert_eq!(received, old),
        Err(status) => {
            assert_eq!(status.code(), Code::Aborted);
            assert!(received.iter().all(|&b| b == 0xAA), "download mixed two uploads");
        }
    }

    let chunks = download(&mut client, &alice, bin.bin_id).await.unwrap();
    assert_eq!(chunks.concat(), new);
}

#[tokio::test]
async fn test_binary_metadata_update_and_delete() {
    let server = start_server().await;
    let mut client = client(&server).await;
    let alice = register(&mut client, "alice", "pw1").await;
    let bin = new_binary(&mut client, &alice, "photo").await;
    upload(&mut client, &alice, chunks_of(bin.bin_id, b"jpeg bytes", 3))
        .await
        .unwrap();

    let read = client
        .binary_read(authed(&alice, ReadRequest { name: "photo".into() }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(read.id, bin.id);
    assert_eq!(read.bin_id, bin.bin_id);
    assert_eq!(read.notes, "sealed notes");

    // bin_id == 0 keeps the payload
    let kept = client
        .binary_update(authed(
            &alice,
            BinaryUpdateRequest {
                id: bin.id,
                bin_id: 0,
                write: Some(BinaryWriteRequest {
                    name: "photo-2024".into(),
                    notes: "renamed".into(),
                    size: 10,
                }),
            },
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(kept.bin_id, bin.bin_id);
    let chunks = download(&mut client, &alice, bin.bin_id).await.unwrap();
    assert_eq!(chunks.concat(), b"jpeg bytes");

    // Current bin_id resets the payload to a fresh object
    let reset = client
        .binary_update(authed(
            &alice,
            BinaryUpdateRequest {
                id: bin.id,
                bin_id: bin.bin_id,
                write: Some(BinaryWriteRequest {
                    name: "photo-2024".into(),
                    notes: "reset".into(),
                    size: 0,
                }),
            },
        ))
        .await
        .unwrap()
        .into_inner();
    assert_ne!(reset.bin_id, bin.bin_id);
    let err = download(&mut client, &alice, reset.bin_id).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let names = client
        .binary_list(authed(&alice, Empty {}))
        .await
        .unwrap()
        .into_inner()
        .names;
    assert_eq!(names, vec!["photo-2024".to_string()]);

    client
        .binary_delete(authed(&alice, DeleteRequest { name: "photo-2024".into() }))
        .await
        .unwrap();
    let err = download(&mut client, &alice, reset.bin_id).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_readyz_reports_storage() {
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    let server = start_server().await;
    let state = keeperd::metrics::HealthState {
        registry: Arc::new(prometheus_client::registry::Registry::default()),
        store: server.store.clone(),
    };

    let response = keeperd::metrics::router(state.clone())
        .oneshot(HttpRequest::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    server.store.close().await;
    let response = keeperd::metrics::router(state)
        .oneshot(HttpRequest::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
