use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::CoapEngine;


/// Drives an engine from a tokio runtime by polling it at the configured poll interval, until
///  the driver is cancelled. The engine itself stays single-threaded: the driver owns the only
///  mutable reference while it runs.
pub struct CoapDriver {
    cancel_sender: broadcast::Sender<()>,
}

impl CoapDriver {
    pub fn new() -> CoapDriver {
        let (cancel_sender, _) = broadcast::channel(1);
        CoapDriver {
            cancel_sender,
        }
    }

    pub async fn run(&self, engine: &mut CoapEngine) -> anyhow::Result<()> {
        let mut cancel_receiver = self.cancel_sender.subscribe();

        let mut interval = tokio::time::interval(engine.config().poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(poll_interval = ?engine.config().poll_interval, "starting engine loop");
        loop {
            tokio::select! {
                _ = interval.tick() => engine.poll(),
                _ = cancel_receiver.recv() => break,
            }
        }

        debug!("engine loop cancelled");
        engine.shutdown();
        Ok(())
    }

    pub fn cancel(&self) {
        let _ = self.cancel_sender.send(());
    }
}

impl Default for CoapDriver {
    fn default() -> Self {
        CoapDriver::new()
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::time::Duration;

    use crate::config::CoapConfig;
    use crate::handler::{CallbackAction, QualityOfService};
    use crate::pdu::code::StackResult;
    use crate::test_util::recorder::ResponseRecorder;
    use crate::test_util::test_addr_from_number;
    use crate::test_util::transport::TrackingMockTransport;
    use crate::transaction::Method;
    use crate::transport::MonotonicClock;
    use crate::util::random::SeededRandom;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_driver_retransmits_until_failure() {
        let mut config = CoapConfig::new(SocketAddr::from(([127, 0, 0, 1], 5683)));
        config.poll_interval = Duration::from_millis(100);
        let transport = TrackingMockTransport::new();
        let mut engine = CoapEngine::new(config, Box::new(transport.clone()), Box::new(MonotonicClock::new()), Box::new(SeededRandom::new(3))).unwrap();

        let recorder = ResponseRecorder::new(CallbackAction::DeleteTransaction);
        let peer = test_addr_from_number(1);
        engine.do_resource(Method::Get, &format!("coap://{}/a/light", peer), QualityOfService::Confirmable, &[], recorder.clone()).unwrap();

        let driver = CoapDriver::new();
        let (result, _) = tokio::join!(
            driver.run(&mut engine),
            async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                driver.cancel();
            }
        );
        result.unwrap();

        // initial transmission and four retransmissions, all with the same message id
        let sent = transport.take_sent_messages();
        assert_eq!(sent.len(), 5);
        assert!(sent.iter().all(|(to, msg)| *to == peer && msg.message_id == sent[0].1.message_id));

        let responses = recorder.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].result, StackResult::CommunicationError);
        assert_eq!(engine.transaction_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_shuts_down_engine() {
        let config = CoapConfig::new(SocketAddr::from(([127, 0, 0, 1], 5683)));
        let transport = TrackingMockTransport::new();
        let mut engine = CoapEngine::new(config, Box::new(transport.clone()), Box::new(MonotonicClock::new()), Box::new(SeededRandom::new(3))).unwrap();
        engine.do_resource(Method::Observe, "coap://10.0.0.9/a", QualityOfService::Confirmable, &[], ResponseRecorder::new(CallbackAction::KeepTransaction)).unwrap();

        let driver = CoapDriver::new();
        let (result, _) = tokio::join!(
            driver.run(&mut engine),
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                driver.cancel();
            }
        );
        result.unwrap();

        assert_eq!(engine.transaction_count(), 0);
        assert_eq!(engine.pending_confirmable_count(), 0);
    }
}
