use tokio::sync::watch;

use crate::{
    consensus::types::BeaconBlockHeader,
    events::{LightClientEmitter, LightClientEvent, LightClientEventKind},
};

/// The [tokio::sync::watch::channel] Receivers for the tracked headers.
#[derive(Debug, Clone)]
pub struct HeadWatchReceivers {
    pub optimistic_header: watch::Receiver<BeaconBlockHeader>,
    pub finalized_header: watch::Receiver<BeaconBlockHeader>,
}

/// The [tokio::sync::watch::channel] Senders for the tracked headers.
#[derive(Debug, Clone)]
pub struct HeadWatchSenders {
    pub optimistic_header: watch::Sender<BeaconBlockHeader>,
    pub finalized_header: watch::Sender<BeaconBlockHeader>,
}

impl HeadWatchSenders {
    /// Forward header events of `emitter` into the channels.
    ///
    /// Each handler unregisters on the first event after its receivers are dropped.
    pub fn forward_from(self, emitter: &LightClientEmitter) {
        let optimistic = self.optimistic_header;
        emitter.on_while(LightClientEventKind::OptimisticHeader, move |event| {
            forward(&optimistic, event)
        });

        let finalized = self.finalized_header;
        emitter.on_while(LightClientEventKind::FinalizedHeader, move |event| {
            forward(&finalized, event)
        });
    }
}

fn forward(sender: &watch::Sender<BeaconBlockHeader>, event: &LightClientEvent) -> bool {
    if sender.is_closed() {
        return false;
    }
    if let LightClientEvent::OptimisticHeader(header) | LightClientEvent::FinalizedHeader(header) =
        event
    {
        sender.send_replace(header.clone());
    }
    true
}

/// Channels starting at the given headers.
pub fn head_watch_channels(
    optimistic_header: BeaconBlockHeader,
    finalized_header: BeaconBlockHeader,
) -> (HeadWatchSenders, HeadWatchReceivers) {
    let (optimistic_sender, optimistic_receiver) = watch::channel(optimistic_header);
    let (finalized_sender, finalized_receiver) = watch::channel(finalized_header);
    let senders = HeadWatchSenders {
        optimistic_header: optimistic_sender,
        finalized_header: finalized_sender,
    };
    let receivers = HeadWatchReceivers {
        optimistic_header: optimistic_receiver,
        finalized_header: finalized_receiver,
    };
    (senders, receivers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_receivers() {
        let emitter = LightClientEmitter::new();
        let (senders, mut receivers) =
            head_watch_channels(BeaconBlockHeader::default(), BeaconBlockHeader::default());
        senders.forward_from(&emitter);

        let header = BeaconBlockHeader {
            slot: 42,
            ..Default::default()
        };
        emitter.emit(&LightClientEvent::OptimisticHeader(header.clone()));

        receivers.optimistic_header.changed().await.unwrap();
        assert_eq!(*receivers.optimistic_header.borrow(), header);
        assert!(!receivers.finalized_header.has_changed().unwrap());
    }

    #[test]
    fn dropped_receivers_unregister_handlers() {
        let emitter = LightClientEmitter::new();
        let (senders, receivers) =
            head_watch_channels(BeaconBlockHeader::default(), BeaconBlockHeader::default());
        senders.forward_from(&emitter);
        assert_eq!(emitter.handler_count(LightClientEventKind::OptimisticHeader), 1);

        drop(receivers);
        emitter.emit(&LightClientEvent::OptimisticHeader(BeaconBlockHeader::default()));
        assert_eq!(emitter.handler_count(LightClientEventKind::OptimisticHeader), 0);
        // Pruned on its own kind only.
        assert_eq!(emitter.handler_count(LightClientEventKind::FinalizedHeader), 1);
    }
}
