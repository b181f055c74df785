use crate::controller::GroupEventSender;

use resourcegroup_api::GroupRef;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Duration;

/// Coalesces object-change notifications into at most one group nudge per
/// window. The first event for an idle group is forwarded immediately and the
/// group is marked pending; further events are dropped until the window
/// elapses. Groups throttle independently.
pub struct Throttler {
    window: Duration,
    pending: Arc<Mutex<HashSet<GroupRef>>>,
    events: GroupEventSender,
}

impl Throttler {
    pub fn new(window: Duration, events: GroupEventSender) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashSet::new())),
            events,
        }
    }

    pub fn tick(&self, group: GroupRef) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if !pending.insert(group.clone()) {
                return;
            }
        }
        self.events.nudge(&group);

        let pending = Arc::clone(&self.pending);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&group);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::group_event_channel;

    use futures::StreamExt;
    use kube::runtime::reflector::ObjectRef;
    use resourcegroup_api::ResourceGroup;

    fn group(name: &str) -> GroupRef {
        GroupRef {
            namespace: "ns".to_string(),
            name: name.to_string(),
        }
    }

    fn drain(rx: &mut futures::channel::mpsc::Receiver<ObjectRef<ResourceGroup>>) -> usize {
        let mut count = 0;
        while let Ok(Some(_)) = rx.try_next() {
            count += 1;
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_event_is_admitted_and_window_expires() {
        let (events, mut rx) = group_event_channel();
        let throttler = Throttler::new(Duration::from_secs(1), events);

        throttler.tick(group("group"));
        assert_eq!(drain(&mut rx), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        // The pending entry is gone, so the next event is admitted again.
        throttler.tick(group("group"));
        assert_eq!(drain(&mut rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_within_the_window_coalesce_to_one() {
        let (events, mut rx) = group_event_channel();
        let throttler = Throttler::new(Duration::from_secs(5), events);

        throttler.tick(group("group"));
        throttler.tick(group("group"));
        throttler.tick(group("group"));

        tokio::time::sleep(Duration::from_secs(3)).await;
        // still within the window
        throttler.tick(group("group"));
        assert_eq!(drain(&mut rx), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        throttler.tick(group("group"));
        assert_eq!(drain(&mut rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_throttle_independently() {
        let (events, mut rx) = group_event_channel();
        let throttler = Throttler::new(Duration::from_secs(5), events);

        throttler.tick(group("group"));
        throttler.tick(group("group2"));
        throttler.tick(group("group"));
        throttler.tick(group("group2"));

        assert_eq!(drain(&mut rx), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        throttler.tick(group("group"));
        throttler.tick(group("group2"));
        assert_eq!(drain(&mut rx), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_event_carries_the_group_ref() {
        let (events, mut rx) = group_event_channel();
        let throttler = Throttler::new(Duration::from_secs(1), events);

        throttler.tick(group("group"));
        let obj_ref = rx.next().await.unwrap();
        assert_eq!(obj_ref.name, "group");
        assert_eq!(obj_ref.namespace.as_deref(), Some("ns"));
    }
}
