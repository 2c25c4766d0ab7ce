//! Throttled outbound queue.
//!
//! Parts pushed into the queue are merged into [`Batch`]es and handed to the
//! provider one batch per tick, largest batch first. A failed batch is put
//! back and retried on a later tick.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::gsm::DataCoding;
use crate::provider::SmsProvider;

/// MessageBird takes at most 50 recipients per request.
pub const MAX_RECIPIENTS: usize = 50;

/// One SMS part for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub originator: String,
    /// Hex encoded part.
    pub body: String,
    pub encoding: DataCoding,
    pub udh: String,
    pub recipient: i64,
}

/// Identical parts addressed to several recipients, sent as one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub originator: String,
    pub body: String,
    pub encoding: DataCoding,
    pub udh: String,
    pub recipients: Vec<i64>,
    pub reference: Uuid,
}

impl Batch {
    fn from_message(m: QueueMessage) -> Self {
        Self {
            originator: m.originator,
            body: m.body,
            encoding: m.encoding,
            udh: m.udh,
            recipients: vec![m.recipient],
            reference: Uuid::new_v4(),
        }
    }

    fn accepts(&self, m: &QueueMessage) -> bool {
        self.body == m.body
            && self.encoding == m.encoding
            && self.udh == m.udh
            && self.originator == m.originator
            && self.recipients.len() < MAX_RECIPIENTS
            && !self.recipients.contains(&m.recipient)
    }
}

#[derive(Debug, Default)]
struct Pending {
    batches: VecDeque<Batch>,
}

impl Pending {
    fn add(&mut self, m: QueueMessage) {
        match self.batches.iter_mut().find(|b| b.accepts(&m)) {
            Some(batch) => batch.recipients.push(m.recipient),
            None => self.batches.push_back(Batch::from_message(m)),
        }
    }

    /// Removes the batch with the most recipients, oldest first on ties.
    fn pop_next(&mut self) -> Option<Batch> {
        let mut best: Option<(usize, usize)> = None;
        for (i, b) in self.batches.iter().enumerate() {
            match best {
                Some((_, len)) if b.recipients.len() <= len => {}
                _ => best = Some((i, b.recipients.len())),
            }
        }
        best.and_then(|(i, _)| self.batches.remove(i))
    }

    fn restore(&mut self, batch: Batch) {
        self.batches.push_front(batch);
    }
}

/// Handle for pushing parts into the queue. Cloning is cheap; the worker
/// flushes what is left and exits once every handle is dropped.
#[derive(Clone)]
pub struct MessageQueue {
    tx: mpsc::UnboundedSender<QueueMessage>,
    depth: Arc<AtomicUsize>,
}

impl MessageQueue {
    pub fn start(provider: Arc<dyn SmsProvider>, tick: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(run(rx, provider, tick, depth.clone()));

        (Self { tx, depth }, handle)
    }

    pub fn push(&self, m: QueueMessage) -> anyhow::Result<()> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(m).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("message queue is closed");
        }
        Ok(())
    }

    /// Parts waiting to be submitted, counted per recipient.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<QueueMessage>,
    provider: Arc<dyn SmsProvider>,
    tick: Duration,
    depth: Arc<AtomicUsize>,
) {
    let mut pending = Pending::default();
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    let mut open = true;

    loop {
        tokio::select! {
            received = rx.recv(), if open => match received {
                Some(m) => pending.add(m),
                None => {
                    debug!("Queue handles dropped, flushing {} batches", pending.batches.len());
                    open = false;
                }
            },
            _ = ticker.tick() => {
                while let Ok(m) = rx.try_recv() {
                    pending.add(m);
                }

                let Some(batch) = pending.pop_next() else {
                    if open {
                        continue;
                    }
                    break;
                };

                match provider.send(&batch).await {
                    Ok(sent) => {
                        depth.fetch_sub(batch.recipients.len(), Ordering::SeqCst);
                        info!(
                            "Submitted {} to {} recipient(s) as {}",
                            batch.reference,
                            batch.recipients.len(),
                            sent.id
                        );
                    }
                    Err(e) => {
                        warn!("Submitting {} failed, requeueing: {}", batch.reference, e);
                        pending.restore(batch);
                    }
                }
            }
        }
    }

    info!("Message queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, SentMessage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        fail: bool,
        sent: Mutex<Vec<Batch>>,
    }

    #[async_trait]
    impl SmsProvider for Recorder {
        async fn send(&self, batch: &Batch) -> Result<SentMessage, ProviderError> {
            self.sent.lock().unwrap().push(batch.clone());
            if self.fail {
                return Err(ProviderError::Api {
                    status: 500,
                    description: "err".into(),
                });
            }
            Ok(SentMessage { id: "id".into() })
        }
    }

    fn part(body: &str, udh: &str, recipient: i64) -> QueueMessage {
        QueueMessage {
            originator: "hey".into(),
            body: body.into(),
            encoding: DataCoding::Plain,
            udh: udh.into(),
            recipient,
        }
    }

    fn calls(r: &Recorder) -> Vec<Batch> {
        r.sent.lock().unwrap().clone()
    }

    #[test]
    fn test_identical_parts_merge() {
        let mut p = Pending::default();
        p.add(part("m1", "", 1));
        p.add(part("m1", "", 2));
        p.add(part("m1", "x", 3));
        p.add(part("m2", "", 1));
        assert_eq!(p.batches.len(), 3);
        assert_eq!(p.batches[0].recipients, vec![1, 2]);
    }

    #[test]
    fn test_repeat_recipient_starts_new_batch() {
        let mut p = Pending::default();
        p.add(part("m1", "", 1));
        p.add(part("m1", "", 1));
        assert_eq!(p.batches.len(), 2);
    }

    #[test]
    fn test_batches_are_capped() {
        let mut p = Pending::default();
        for r in 0..(MAX_RECIPIENTS as i64 + 1) {
            p.add(part("m1", "", r + 1));
        }
        assert_eq!(p.batches.len(), 2);
        assert_eq!(p.batches[0].recipients.len(), MAX_RECIPIENTS);
        assert_eq!(p.batches[1].recipients, vec![MAX_RECIPIENTS as i64 + 1]);
    }

    #[test]
    fn test_pop_prefers_largest_then_oldest() {
        let mut p = Pending::default();
        p.add(part("a", "", 1));
        p.add(part("b", "", 1));
        p.add(part("b", "", 2));
        p.add(part("c", "", 1));
        assert_eq!(p.pop_next().unwrap().body, "b");
        assert_eq!(p.pop_next().unwrap().body, "a");
        assert_eq!(p.pop_next().unwrap().body, "c");
        assert!(p.pop_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_submission_per_tick() {
        let recorder = Arc::new(Recorder::default());
        let (queue, _handle) = MessageQueue::start(recorder.clone(), Duration::from_secs(1));

        queue.push(part("m1", "", 1)).unwrap();
        queue.push(part("m2", "", 1)).unwrap();
        assert_eq!(queue.len(), 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(calls(&recorder).len(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls(&recorder).len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_text_to_many_recipients_is_one_submission() {
        let recorder = Arc::new(Recorder::default());
        let (queue, _handle) = MessageQueue::start(recorder.clone(), Duration::from_secs(1));

        queue.push(part("m1", "", 123123)).unwrap();
        queue.push(part("m1", "", 123)).unwrap();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let sent = calls(&recorder);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec![123123, 123]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_retried() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let (queue, _handle) = MessageQueue::start(recorder.clone(), Duration::from_secs(1));

        queue.push(part("m1", "", 1)).unwrap();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(calls(&recorder).len(), 2);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bigger_batch_goes_first() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let (queue, _handle) = MessageQueue::start(recorder.clone(), Duration::from_secs(1));

        queue.push(part("m1", "1", 1)).unwrap();
        queue.push(part("m2", "2", 123)).unwrap();
        queue.push(part("m2", "2", 123123123)).unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let sent = calls(&recorder);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "m2");
        assert_eq!(sent[0].recipients, vec![123, 123123123]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_after_handles_dropped() {
        let recorder = Arc::new(Recorder::default());
        let (queue, handle) = MessageQueue::start(recorder.clone(), Duration::from_secs(1));

        queue.push(part("m1", "", 1)).unwrap();
        queue.push(part("m2", "", 1)).unwrap();
        drop(queue);

        handle.await.unwrap();
        assert_eq!(calls(&recorder).len(), 2);
    }
}
