//! `tracing` subscriber bootstrap.
//!
//! Connection context (agent ID, connection ID) travels in spans opened by the
//! server and client crates; this module only installs the global subscriber.

use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a compact, human-readable subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

/// Install a JSON subscriber writing to stderr, one object per event.
pub fn init_json_subscriber(level: &str) {
    let _ = json_subscriber(level, std::io::stderr).try_init();
}

/// JSON subscriber that tags each event with its innermost span.
fn json_subscriber<W>(level: &str, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(writer)
        .json()
        .with_current_span(true)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn init_subscriber_is_idempotent() {
        init_subscriber("warn");
        init_subscriber("debug");
        init_json_subscriber("info");
    }

    #[test]
    fn json_events_carry_the_current_span() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = json_subscriber("info", move || writer.clone());
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("session", agent_id = "worker-1");
            let _entered = span.enter();
            tracing::info!("admitted");
        });

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let event: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(event["fields"]["message"], "admitted");
        assert_eq!(event["span"]["name"], "session");
        assert_eq!(event["span"]["agent_id"], "worker-1");
    }
}
