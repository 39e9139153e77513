// Shaper loop: drives cover traffic on one multiplexed substream
//
// Each iteration sleeps for the sampled inter-packet delay, writes a
// random payload of the sampled size, then attempts a short bounded
// read whose result is discarded. Read timeouts are the normal case.

use std::sync::Arc;

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::constants::{SHAPER_READ_BUFFER_SIZE, SHAPER_READ_TIMEOUT};
use crate::obfuscation::TrafficGenerator;

/// Run the shaper until the substream dies or shutdown is signalled.
///
/// Exits with an error only on a write failure; read errors and
/// timeouts are discarded along with the data.
pub async fn run_shaper<S>(
    mut stream: S,
    gen: Arc<TrafficGenerator>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut read_buf = vec![0u8; SHAPER_READ_BUFFER_SIZE];

    loop {
        let delay = gen.next_packet_delay();
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("shaper stopping on shutdown signal");
                return Ok(());
            }
            _ = sleep(delay) => {}
        }

        let size = gen.next_packet_size();
        let mut payload = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut payload);

        if let Err(err) = stream.write_all(&payload).await {
            warn!("shaper write failed: {err}");
            return Err(err.into());
        }

        match timeout(SHAPER_READ_TIMEOUT, stream.read(&mut read_buf)).await {
            Ok(Ok(0)) => {
                debug!("shaper substream closed by peer");
                return Ok(());
            }
            Ok(Ok(_)) => {} // echo payload, discarded
            Ok(Err(err)) => debug!("shaper read error ignored: {err}"),
            Err(_) => {} // deadline expired, expected
        }
    }
}
