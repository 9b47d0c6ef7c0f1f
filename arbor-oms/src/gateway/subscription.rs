use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{info, warn};

use arbor_data::shared::subscription_models::Instrument;
use arbor_data::Market;

use crate::event::{EngineEvent, EventTx, MessageTransmitter};

use super::handle::{reconnect_delay, VenueHandle, VenueState};

/*----- */
// Subscription settings
/*----- */
#[derive(Debug, Clone)]
pub(crate) struct SubscriptionSettings {
    pub depth: usize,
    pub staleness_threshold: chrono::Duration,
    pub stream_restart_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

/*----- */
// Perpetual consume loop
/*----- */
// Drives one venue's book stream for one instrument. Snapshots older than
// the staleness threshold are tagged so consumers can reject them. Stream
// errors below the attempt cap restart the stream after a fixed delay;
// past the cap the handle enters reconnecting with exponential backoff.
pub(crate) async fn consume_book_stream(
    handle: Arc<VenueHandle>,
    instrument: Instrument,
    settings: SubscriptionSettings,
    event_tx: EventTx,
) {
    info!(
        venue = %handle.venue,
        instrument = %instrument,
        depth = settings.depth,
        action = "starting order book subscription"
    );

    loop {
        handle.set_state(VenueState::Connecting);

        match handle
            .driver
            .stream_order_book(&instrument, settings.depth)
            .await
        {
            Ok(mut stream) => {
                handle.set_state(VenueState::Connected);
                handle.reset_errors();
                event_tx.send(EngineEvent::VenueConnected(Market::new(
                    handle.venue.clone(),
                    instrument.clone(),
                )));

                while let Some(update) = stream.next().await {
                    match update {
                        Ok(mut book) => {
                            if book.age(Utc::now()) > settings.staleness_threshold {
                                book.stale = true;
                            }
                            let stale = book.stale;
                            handle.update_book(book);
                            event_tx.send(EngineEvent::OrderBookUpdate {
                                market: Market::new(handle.venue.clone(), instrument.clone()),
                                stale,
                            });
                        }
                        Err(error) => {
                            let errors = handle.record_error();
                            warn!(
                                venue = %handle.venue,
                                instrument = %instrument,
                                error = %error,
                                error_count = errors,
                                action = "restarting stream",
                                message = "order book stream produced an error"
                            );
                            event_tx.send(EngineEvent::VenueError {
                                venue: handle.venue.clone(),
                                detail: error.to_string(),
                            });
                            break;
                        }
                    }
                }

                event_tx.send(EngineEvent::VenueDisconnected(Market::new(
                    handle.venue.clone(),
                    instrument.clone(),
                )));
            }
            Err(error) => {
                let errors = handle.record_error();
                warn!(
                    venue = %handle.venue,
                    instrument = %instrument,
                    error = %error,
                    error_count = errors,
                    message = "failed to initialise order book stream"
                );
                event_tx.send(EngineEvent::VenueError {
                    venue: handle.venue.clone(),
                    detail: error.to_string(),
                });
            }
        }

        if handle.error_count() < settings.max_reconnect_attempts {
            sleep(settings.stream_restart_delay).await;
        } else {
            handle.set_state(VenueState::Reconnecting);
            let attempt = handle.next_reconnect_attempt();
            let delay = reconnect_delay(
                attempt,
                settings.reconnect_initial_delay,
                settings.reconnect_max_delay,
            );
            warn!(
                venue = %handle.venue,
                instrument = %instrument,
                reconnect_attempt = attempt,
                backoff_ms = delay.as_millis() as u64,
                action = "attempting re-connection after backoff"
            );
            sleep(delay).await;
        }
    }
}
