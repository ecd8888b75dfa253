//! Both ends of the link in one process, on a simulated bench
//!
//! Mirrors the two-process deployment: the receiver binds the rendezvous
//! address, the sender announces itself, then each side arms its scan. The
//! bench trigger starts both scans on the same sample.

use crate::rendezvous::{send_ready, ReadyListener};
use lclink_core::poll::poll_until;
use lclink_core::sim::{ScaledClock, SimBench, RECEIVER_PRODUCT, SENDER_PRODUCT};
use lclink_core::{
    CancelToken, DeviceSession, LinkConfig, LinkError, ReceiveReport, Receiver, Task,
    TransmitReport, Transmitter,
};
use std::error::Error;
use std::sync::Arc;

pub struct LoopbackOutcome {
    pub sent: TransmitReport,
    pub received: ReceiveReport,
}

pub async fn run(
    config: &LinkConfig,
    message: &str,
    speedup: f64,
    cancel: CancelToken,
) -> Result<LoopbackOutcome, Box<dyn Error>> {
    config.validate()?;
    if message.is_empty() {
        return Err("Nothing to send".into());
    }
    let transmitter = Transmitter::new(config)?.external_trigger(true);
    // Unencodable text fails here, before anything waits on the trigger
    transmitter.encoder().encode_message(message)?;
    let rendezvous = &config.rendezvous;
    let listener = ReadyListener::bind(&rendezvous.address()).await?;
    let address = listener.local_addr()?;
    let (received, sent) = tokio::join!(
        listener.wait_for_ready(&rendezvous.message, rendezvous.timeout()),
        send_ready(&address, &rendezvous.message, rendezvous.timeout())
    );
    received?;
    sent?;

    let bench = SimBench::loopback(Arc::new(ScaledClock::new(speedup)));
    let mut tx = DeviceSession::open(&bench, SENDER_PRODUCT)?;
    let mut rx = DeviceSession::open(&bench, RECEIVER_PRODUCT)?;

    let tx_message = message.to_string();
    let tx_cancel = cancel.clone();
    // A failed transmit cancels the token, which frees the trigger and receiver
    let sender = Task::spawn("transmitter", move || {
        transmitter.run(tx.device_mut(), &tx_message, &tx_cancel)
    })?;

    let trigger_bench = bench.clone();
    let trigger_cancel = cancel.clone();
    let policy = config.wait_policy();
    let trigger = Task::spawn("trigger", move || {
        poll_until(&policy, &trigger_cancel, || {
            Ok((trigger_bench.armed_scans() == 2).then_some(()))
        })?;
        Ok(trigger_bench.fire_trigger())
    })?;

    let mut receiver = Receiver::new(config)?.external_trigger(true);
    let max_chars = message.chars().count();
    let rx_cancel = cancel.clone();
    let received = tokio::task::spawn_blocking(move || {
        receiver.run(rx.device_mut(), &rx_cancel, Some(max_chars), |c| {
            log::info!("Received {:?}", c);
        })
    })
    .await
    .map_err(|e| LinkError::TaskPanicked(format!("receiver: {}", e)))?;

    // A receive failure leaves the sender polling a line nobody reads
    if received.is_err() {
        cancel.cancel();
    }
    match (received, sender.join(), trigger.join()) {
        (Ok(received), Ok(sent), Ok(_)) => Ok(LoopbackOutcome { sent, received }),
        (received, sent, fired) => Err(root_failure([received.err(), sent.err(), fired.err()]).into()),
    }
}

/// The failure that set the others off; the rest only saw `Cancelled`.
fn root_failure(errors: [Option<LinkError>; 3]) -> LinkError {
    let mut root = LinkError::Cancelled;
    for e in errors.into_iter().flatten() {
        if matches!(root, LinkError::Cancelled) {
            root = e;
        }
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_failure_skips_cancelled() {
        let root = root_failure([
            Some(LinkError::Cancelled),
            Some(LinkError::InvalidInput("\u{263a}".to_string())),
            Some(LinkError::Cancelled),
        ]);
        assert!(matches!(root, LinkError::InvalidInput(_)));
        assert!(matches!(root_failure([None, Some(LinkError::Cancelled), None]), LinkError::Cancelled));
    }

    #[tokio::test]
    async fn test_unencodable_message_fails_fast() {
        let mut config = LinkConfig::default();
        config.rendezvous.port = 0;
        config.poll.interval_ms = 2;

        let run = run(&config, "a\u{263a}", 10.0, CancelToken::new());
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), run)
            .await
            .expect("loopback hung on an unencodable message");
        let err = result.err().expect("unencodable message accepted");
        assert!(matches!(err.downcast_ref::<LinkError>(), Some(LinkError::InvalidInput(_))));
    }
}
