use std::io::BufRead;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Read lines from `reader` on a dedicated OS thread.
///
/// A blocking read cannot be cancelled, so it is kept off the runtime: the
/// process can exit while the thread is still parked on stdin. The channel
/// closes at end of input, on a read error, or once the receiver is dropped.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("reading input failed: {}", e);
                        break;
                    }
                };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
            debug!("input reader finished");
        });
    if let Err(e) = spawned {
        // rx sees a closed channel, which reads as end of input
        warn!("could not start input reader: {}", e);
    }
    rx
}
