// Stream server worker: echoes every byte back to the client

use crate::context::{ApplicationContext, ParentHandle};
use crate::error::Result;
use crate::process::{WorkerKind, WorkerRole};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info_span, warn, Instrument};

pub const ROLE_NAME: &str = "stream";

pub fn role() -> WorkerRole {
    WorkerRole::new(ROLE_NAME, WorkerKind::Stream, create_process)
}

/// Worker entry point; returns once the process has been asked to stop
pub fn create_process(parent: &ParentHandle, application: &ApplicationContext) -> Result<()> {
    super::run_worker(parent, application.stream_listen(), serve)
}

pub async fn serve(listener: TcpListener) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, "Stream connection accepted");

        tokio::spawn(
            async move {
                if let Err(e) = echo(socket).await {
                    warn!("Stream connection failed: {}", e);
                }
            }
            .instrument(info_span!("stream", %peer)),
        );
    }
}

async fn echo(mut socket: TcpStream) -> std::io::Result<u64> {
    let (mut reader, mut writer) = socket.split();
    tokio::io::copy(&mut reader, &mut writer).await
}
