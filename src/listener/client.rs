use crate::listener::config::RuntimeConfig;
use crate::listener::error_handler::ExponentialBackoff;
use crate::mllp::FrameDecoder;
use crate::pipeline::ingestion::{Session, SessionContext, SessionEnd};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("gave up connecting to {address} after {attempts} retries")]
    MaxRetries { address: String, attempts: u32 },
}

/// Connect to the MLLP source and run sessions until shutdown.
///
/// The source closing the connection and a framing error both lead to a
/// reconnect. The backoff resets after every successful connect, so only
/// consecutive failures count against `reconnect_max_retries`.
pub async fn run_with_reconnect(
    config: &RuntimeConfig,
    context: SessionContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ClientError> {
    let mut backoff = ExponentialBackoff::new(
        config.reconnect_initial,
        config.reconnect_max,
        config.reconnect_max_retries,
    );
    let address = &config.mllp_address;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let connected = tokio::select! {
            result = TcpStream::connect(address) => result,
            _ = shutdown.changed() => return Ok(()),
        };

        match connected {
            Ok(stream) => {
                log::info!("✅ Connected to MLLP source at {}", address);
                backoff.reset();

                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("Could not set TCP_NODELAY: {}", e);
                }

                let session = Session::new(
                    stream,
                    address.clone(),
                    FrameDecoder::with_max_payload(config.max_frame_bytes),
                    context.clone(),
                    config.read_buffer_size,
                );

                match session.run(shutdown.clone()).await {
                    Ok(SessionEnd::Shutdown) => return Ok(()),
                    Ok(SessionEnd::PeerClosed) => {
                        log::warn!("⚠️  MLLP source at {} closed the connection", address);
                    }
                    Err(e) => {
                        log::error!("❌ Session error: {}", e);
                    }
                }
            }
            Err(e) => {
                log::error!("❌ Connection to {} failed: {}", address, e);
            }
        }

        tokio::select! {
            slept = backoff.sleep() => {
                if slept.is_err() {
                    return Err(ClientError::MaxRetries {
                        address: address.clone(),
                        attempts: backoff.attempts(),
                    });
                }
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}
