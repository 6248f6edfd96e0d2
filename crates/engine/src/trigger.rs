//! Fixed-interval reconciliation trigger.
//!
//! Every tick publishes one [`ScanRequest`] per configured scope. Ticks are
//! aligned to the tick grid, so a 5-minute trigger fires at :00, :05, ...

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use powermgmt_core::{ScanRequest, Scope};
use powermgmt_queue::{publish, DurableQueue, QueueError};
use powermgmt_schedule::align_down;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub struct Trigger {
    scans: Arc<dyn DurableQueue>,
    scopes: Vec<Scope>,
    tick: chrono::Duration,
    /// Last tick fired and the tick before it.
    last_tick: Mutex<Option<(DateTime<Utc>, Option<DateTime<Utc>>)>>,
}

impl Trigger {
    pub fn new(scans: Arc<dyn DurableQueue>, scopes: Vec<Scope>, tick: chrono::Duration) -> Self {
        Self {
            scans,
            scopes,
            tick,
            last_tick: Mutex::new(None),
        }
    }

    /// Publish scans for the tick at `tick_at`. Returns the number published.
    ///
    /// Firing the same tick again (a manual trigger on a boundary) repeats
    /// the earlier window rather than starting from scratch.
    pub async fn fire(&self, tick_at: DateTime<Utc>) -> Result<usize, QueueError> {
        let previous_tick = {
            let mut last = self.last_tick.lock().unwrap_or_else(|e| e.into_inner());
            match *last {
                Some((fired, previous)) if fired == tick_at => previous,
                Some((fired, _)) if fired > tick_at => None,
                Some((fired, _)) => {
                    *last = Some((tick_at, Some(fired)));
                    Some(fired)
                }
                None => {
                    *last = Some((tick_at, None));
                    None
                }
            }
        };

        for scope in &self.scopes {
            let request = ScanRequest {
                scope: scope.clone(),
                tick_at,
                previous_tick,
            };
            publish(self.scans.as_ref(), &request, Duration::ZERO).await?;
        }
        info!(tick_at = %tick_at, scopes = self.scopes.len(), "Reconciliation tick");
        Ok(self.scopes.len())
    }

    /// Fire for the tick that has most recently passed.
    pub async fn fire_now(&self) -> Result<usize, QueueError> {
        self.fire(align_down(Utc::now(), self.tick)).await
    }

    /// Tick the trigger on its interval until `shutdown` flips.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.tick.to_std().unwrap_or(Duration::from_secs(300));
            let now = Utc::now();
            let next = align_down(now, self.tick) + self.tick;
            let first = (next - now).to_std().unwrap_or_default();

            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        // Round to the nearest boundary; the timer may fire a little early.
                        let tick_at = align_down(Utc::now() + self.tick / 2, self.tick);
                        if let Err(e) = self.fire(tick_at).await {
                            warn!(error = %e, "Failed to publish scan requests");
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("Trigger shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use powermgmt_queue::{decode, MemoryQueue};

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn publishes_one_scan_per_scope_with_previous_tick() {
        let queue = Arc::new(MemoryQueue::new("scans", Duration::from_secs(30)));
        let trigger = Trigger::new(
            queue.clone(),
            vec![Scope::Subscription("a".into()), Scope::Subscription("b".into())],
            chrono::Duration::minutes(5),
        );

        assert_eq!(trigger.fire(t(8, 0)).await.unwrap(), 2);
        assert_eq!(trigger.fire(t(8, 5)).await.unwrap(), 2);

        let messages = queue.receive(10).await.unwrap();
        let requests: Vec<ScanRequest> = messages.iter().map(|m| decode(m).unwrap()).collect();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].previous_tick, None);
        assert_eq!(requests[2].tick_at, t(8, 5));
        assert_eq!(requests[2].previous_tick, Some(t(8, 0)));
    }

    #[tokio::test]
    async fn repeated_tick_republishes_its_previous_tick() {
        let queue = Arc::new(MemoryQueue::new("scans", Duration::from_secs(30)));
        let trigger = Trigger::new(
            queue.clone(),
            vec![Scope::Subscription("a".into())],
            chrono::Duration::minutes(5),
        );
        trigger.fire(t(8, 0)).await.unwrap();
        trigger.fire(t(8, 5)).await.unwrap();
        trigger.fire(t(8, 5)).await.unwrap();
        // An out-of-order tick neither moves the clock back nor claims a previous tick.
        trigger.fire(t(7, 55)).await.unwrap();

        let requests: Vec<ScanRequest> = queue
            .receive(10)
            .await
            .unwrap()
            .iter()
            .map(|m| decode(m).unwrap())
            .collect();
        let previous: Vec<_> = requests.iter().map(|r| r.previous_tick).collect();
        assert_eq!(previous, vec![None, Some(t(8, 0)), Some(t(8, 0)), None]);

        trigger.fire(t(8, 10)).await.unwrap();
        let next: ScanRequest = decode(&queue.receive(1).await.unwrap()[0]).unwrap();
        assert_eq!(next.previous_tick, Some(t(8, 5)));
    }
}
