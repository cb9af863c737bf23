//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use blog_counters::kv::MemoryKv;
use blog_counters::server;
use blog_counters::store::MemoryStore;
use blog_counters::{AppState, Config, Metrics, SubjectId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Wired-up service over in-process backends, with handles on both
/// backends for inspection and fault injection.
pub struct Harness {
    pub kv: Arc<MemoryKv>,
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<Metrics>,
    pub state: AppState,
}

pub fn harness(posts: impl IntoIterator<Item = u64>) -> Harness {
    harness_with(posts, Config::default())
}

pub fn harness_with(posts: impl IntoIterator<Item = u64>, config: Config) -> Harness {
    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(MemoryStore::with_posts(posts).expect("post ids are non-zero"));
    let metrics = Arc::new(Metrics::new());
    let state = AppState::new(kv.clone(), store.clone(), &config, Arc::clone(&metrics));
    Harness {
        kv,
        store,
        metrics,
        state,
    }
}

pub fn subject(id: u64) -> SubjectId {
    SubjectId::new(id).expect("non-zero id")
}

/// A server bound to an ephemeral port. Dropping it shuts the server down.
pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn spawn_server(state: AppState) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let shutdown = async {
            let _ = rx.await;
        };
        server::serve(listener, state, shutdown)
            .await
            .expect("server runs");
    });

    TestServer {
        addr,
        _shutdown: tx,
    }
}
