//! End-to-end runs of `run_server` over unix sockets with a fake agent.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use splitgpg_server::run_server;
use splitgpg_transport::{AgentSockets, Collaborators, KeyLister, Notifier, Prompt, ServerError, SessionConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const FILTERED: &str = "ERR 67109888 Command filtered by split-gpg2.";

struct NoKeys;

#[async_trait]
impl KeyLister for NoKeys {
    async fn list_secret_keys(&self) -> Result<Vec<u8>, ServerError> {
        Ok(Vec::new())
    }
}

struct Answer(bool);

#[async_trait]
impl Prompt for Answer {
    async fn confirm(&self, _title: &str, _question: &str) -> Result<bool, ServerError> {
        Ok(self.0)
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

#[async_trait]
impl Notifier for Recorder {
    async fn notify(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

/// Commands the fake agent received, across all connections.
type Received = Arc<Mutex<Vec<String>>>;

/// A gpg-agent stand-in listening on the restricted socket.
fn fake_agent(listener: UnixListener) -> Received {
    let received = Received::default();
    let log = received.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = log.clone();
            tokio::spawn(async move {
                let (r, mut w) = stream.into_split();
                let mut lines = BufReader::new(r).lines();
                w.write_all(b"OK Pleased to meet you\n").await.unwrap();
                while let Ok(Some(line)) = lines.next_line().await {
                    log.lock().unwrap().push(line.clone());
                    let reply: &[u8] = match line.as_str() {
                        "GETINFO version" => b"D 2.2.40\nOK\n",
                        "PKSIGN" => b"D (7:sig-val)\nOK\n",
                        "BYE" => b"OK closing connection\n",
                        _ => b"ERR 1 unexpected\n",
                    };
                    if w.write_all(reply).await.is_err() || line == "BYE" {
                        break;
                    }
                }
            });
        }
    });
    received
}

struct Setup {
    _dir: tempfile::TempDir,
    server_path: std::path::PathBuf,
    sockets: AgentSockets,
    received: Received,
    notes: Arc<Recorder>,
    server: JoinHandle<()>,
}

impl Drop for Setup {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn setup(allow: bool) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let sockets = AgentSockets {
        privileged: dir.path().join("S.gpg-agent"),
        restricted: dir.path().join("S.gpg-agent.extra"),
    };
    let received = fake_agent(UnixListener::bind(&sockets.restricted).unwrap());

    let notes = Arc::new(Recorder::default());
    let collaborators = Collaborators {
        keys: Arc::new(NoKeys),
        prompt: Arc::new(Answer(allow)),
        notifier: notes.clone(),
    };
    let server_path = dir.path().join("split-gpg2.sock");
    let listener = UnixListener::bind(&server_path).unwrap();
    let server = tokio::spawn(run_server(
        listener,
        SessionConfig::new("work", dir.path()),
        sockets.clone(),
        collaborators,
    ));

    Setup {
        _dir: dir,
        server_path,
        sockets,
        received,
        notes,
        server,
    }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl Client {
    async fn connect(path: &Path) -> Self {
        let (r, writer) = UnixStream::connect(path).await.unwrap().into_split();
        Self {
            lines: BufReader::new(r).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("server did not answer")
            .unwrap()
    }
}

#[tokio::test]
async fn test_getinfo_then_bye() {
    let setup = setup(true).await;
    let mut client = Client::connect(&setup.server_path).await;

    assert_eq!(client.recv().await.unwrap(), "OK Pleased to meet you");
    client.send("GETINFO version").await;
    assert_eq!(client.recv().await.unwrap(), "D 2.2.40");
    assert_eq!(client.recv().await.unwrap(), "OK");
    client.send("BYE").await;
    assert_eq!(client.recv().await.unwrap(), "OK closing connection");
    assert_eq!(client.recv().await, None);

    assert_eq!(
        setup.received.lock().unwrap().as_slice(),
        &["GETINFO version".to_string(), "BYE".to_string()]
    );
}

#[tokio::test]
async fn test_filtered_command_closes_connection() {
    let setup = setup(true).await;
    let mut client = Client::connect(&setup.server_path).await;

    assert_eq!(client.recv().await.unwrap(), "OK Pleased to meet you");
    client.send("DELETE_KEY 0123456789ABCDEF0123456789ABCDEF01234567").await;
    assert_eq!(client.recv().await.unwrap(), FILTERED);
    assert_eq!(client.recv().await, None);

    assert!(setup.received.lock().unwrap().is_empty());
    assert_eq!(
        setup.notes.0.lock().unwrap().as_slice(),
        &["command filtered out".to_string()]
    );
}

#[tokio::test]
async fn test_local_replies_never_reach_agent() {
    let setup = setup(true).await;
    let mut client = Client::connect(&setup.server_path).await;

    assert_eq!(client.recv().await.unwrap(), "OK Pleased to meet you");
    client.send("AGENT_ID").await;
    assert_eq!(client.recv().await.unwrap(), "ERR 67109139 unknown IPC command");
    client.send("NOP").await;
    assert_eq!(client.recv().await.unwrap(), "OK");
    client.send("OPTION ttyname=/dev/pts/1").await;
    assert_eq!(client.recv().await.unwrap(), "OK");
    drop(client);

    // Give the session a moment to notice the client is gone.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(setup.received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let setup = setup(true).await;
    let mut first = Client::connect(&setup.server_path).await;
    let mut second = Client::connect(&setup.server_path).await;

    assert_eq!(first.recv().await.unwrap(), "OK Pleased to meet you");
    assert_eq!(second.recv().await.unwrap(), "OK Pleased to meet you");

    first.send("frobnicate").await;
    assert_eq!(first.recv().await.unwrap(), FILTERED);
    assert_eq!(first.recv().await, None);

    second.send("GETINFO version").await;
    assert_eq!(second.recv().await.unwrap(), "D 2.2.40");
    assert_eq!(second.recv().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_pksign_allowed_touches_timestamp() {
    let setup = setup(true).await;
    let mut client = Client::connect(&setup.server_path).await;

    assert_eq!(client.recv().await.unwrap(), "OK Pleased to meet you");
    client.send("PKSIGN").await;
    assert_eq!(client.recv().await.unwrap(), "D (7:sig-val)");
    assert_eq!(client.recv().await.unwrap(), "OK");

    let mut timestamp = setup.sockets.restricted.clone().into_os_string();
    timestamp.push("_split-gpg2-timestamp_PKSIGN_work");
    assert!(Path::new(&timestamp).exists());
    assert_eq!(
        setup.notes.0.lock().unwrap().as_slice(),
        &["command PKSIGN allowed".to_string()]
    );
}

#[tokio::test]
async fn test_pkdecrypt_denied_is_filtered() {
    let setup = setup(false).await;
    let mut client = Client::connect(&setup.server_path).await;

    assert_eq!(client.recv().await.unwrap(), "OK Pleased to meet you");
    client.send("PKDECRYPT").await;
    assert_eq!(client.recv().await.unwrap(), FILTERED);
    assert_eq!(client.recv().await, None);
    assert!(setup.received.lock().unwrap().is_empty());
}
