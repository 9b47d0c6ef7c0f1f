use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use arbor_data::shared::subscription_models::VenueId;

use crate::model::ClientOrderId;

/*----- */
// Recent order entry
/*----- */
#[derive(Debug, Clone)]
pub struct RecentOrderEntry {
    pub venue_order_id: String,
    pub venue: VenueId,
    pub recorded_at: DateTime<Utc>,
}

/*----- */
// Recent orders
/*----- */
// Short-circuits retried submissions: a client order id seen inside the TTL
// resolves to the venue order it already produced instead of a fresh
// creation.
#[derive(Debug)]
pub struct RecentOrders {
    ttl: Duration,
    inner: Mutex<HashMap<ClientOrderId, RecentOrderEntry>>,
}

impl RecentOrders {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, cid: ClientOrderId, venue: VenueId, venue_order_id: String) {
        let mut inner = self.inner.lock();
        inner.insert(
            cid,
            RecentOrderEntry {
                venue_order_id,
                venue,
                recorded_at: Utc::now(),
            },
        );
    }

    pub fn lookup(&self, cid: &ClientOrderId) -> Option<RecentOrderEntry> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.retain(|_, entry| now - entry.recorded_at <= self.ttl);
        inner.get(cid).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for RecentOrders {
    fn default() -> Self {
        Self::new(Duration::seconds(60))
    }
}
