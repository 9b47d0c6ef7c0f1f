use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use arbor_data::shared::subscription_models::VenueId;
use arbor_data::Market;
use arbor_strategy::{Opportunity, VarianceStats};

/*----- */
// Engine events
/*----- */
// Loose coupling between the gateway/trader and any observers. Everything
// user-visible beyond logs flows through this channel.
#[derive(Debug)]
pub enum EngineEvent {
    OrderBookUpdate {
        market: Market,
        stale: bool,
    },
    VenueConnected(Market),
    VenueDisconnected(Market),
    VenueError {
        venue: VenueId,
        detail: String,
    },
    OpportunityFound(Opportunity),
    ExecutionCompleted {
        trade_key: String,
        success: bool,
        profit: Option<f64>,
    },
    StatusUpdate {
        active_trades: usize,
        variance: VarianceStats,
    },
}

pub trait MessageTransmitter<Message> {
    fn send(&self, message: Message);

    fn send_many(&self, messages: Vec<Message>);
}

/*----- */
// EventTx
/*----- */
#[derive(Debug)]
pub struct EventTx {
    receiver_dropped: AtomicBool,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl MessageTransmitter<EngineEvent> for EventTx {
    fn send(&self, message: EngineEvent) {
        if self.receiver_dropped.load(Ordering::Relaxed) {
            return;
        }

        if self.event_tx.send(message).is_err() {
            warn!(
                action = "setting receiver_dropped = true",
                why = "event receiver dropped",
                "cannot send EngineEvents"
            );
            self.receiver_dropped.store(true, Ordering::Relaxed);
        }
    }

    fn send_many(&self, messages: Vec<EngineEvent>) {
        if self.receiver_dropped.load(Ordering::Relaxed) {
            return;
        }

        messages.into_iter().for_each(|message| {
            let _ = self.event_tx.send(message);
        })
    }
}

impl EventTx {
    pub fn new(event_tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            receiver_dropped: AtomicBool::new(false),
            event_tx,
        }
    }
}

impl Clone for EventTx {
    fn clone(&self) -> Self {
        Self {
            receiver_dropped: AtomicBool::new(self.receiver_dropped.load(Ordering::Relaxed)),
            event_tx: self.event_tx.clone(),
        }
    }
}
