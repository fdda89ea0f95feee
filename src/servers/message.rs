// Message server worker: newline-framed messages, one acknowledgement each

use crate::context::{ApplicationContext, ParentHandle};
use crate::error::Result;
use crate::process::{WorkerKind, WorkerRole};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info_span, warn, Instrument};

pub const ROLE_NAME: &str = "message";

pub fn role() -> WorkerRole {
    WorkerRole::new(ROLE_NAME, WorkerKind::Message, create_process)
}

/// Worker entry point; returns once the process has been asked to stop
pub fn create_process(parent: &ParentHandle, application: &ApplicationContext) -> Result<()> {
    super::run_worker(parent, application.message_listen(), serve)
}

pub async fn serve(listener: TcpListener) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, "Message connection accepted");

        tokio::spawn(
            async move {
                if let Err(e) = acknowledge(socket).await {
                    warn!("Message connection failed: {}", e);
                }
            }
            .instrument(info_span!("message", %peer)),
        );
    }
}

/// Reply `OK <seq>` to every non-empty line
async fn acknowledge(socket: TcpStream) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut seq: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        seq += 1;
        writer.write_all(format!("OK {}\n", seq).as_bytes()).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_message_server_acknowledges_each_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello\n\nworld\n").await.unwrap();
        client.shutdown().await.unwrap();

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "OK 1\nOK 2\n");

        server.abort();
    }
}
