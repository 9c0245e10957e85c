//! Unix domain socket listener for the control surface.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::commands::CommandHandler;
use crate::frame::{read_message, write_message};
use crate::protocol::Request;

/// Run the listener loop; never returns under normal operation.
pub async fn run_listener(socket_path: &Path, handler: CommandHandler) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(socket = %socket_path.display(), "listening for connections");

    let handler = Arc::new(RwLock::new(handler));
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, handler).await {
                        warn!(error = %e, "client handler error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "accept failed");
            }
        }
    }
}

/// Serve one client until it disconnects.
async fn handle_client(
    mut stream: UnixStream,
    handler: Arc<RwLock<CommandHandler>>,
) -> Result<()> {
    debug!("client connected");
    loop {
        let request: Option<Request> = read_message(&mut stream).await?;
        let Some(request) = request else {
            debug!("client disconnected");
            return Ok(());
        };
        let response = handler.write().await.handle_request(request).await;
        write_message(&mut stream, &response).await?;
    }
}
