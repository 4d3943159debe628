use tokio::sync::mpsc;

/// Deliver-once event channel with a single subscriber.
///
/// Events published while nobody is subscribed are dropped, and a new
/// subscription replaces the previous one, so late subscribers never see
/// stale events.
pub struct EventChannel<T> {
    sender: Option<mpsc::UnboundedSender<T>>,
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self { sender: None }
    }
}

impl<T> EventChannel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender = Some(tx);
        EventStream { rx }
    }

    /// Returns whether a subscriber received the event.
    pub fn publish(&mut self, event: T) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        if sender.send(event).is_err() {
            self.sender = None;
            return false;
        }
        true
    }
}

pub struct EventStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> EventStream<T> {
    /// Next event; `None` once the channel was re-subscribed or dropped.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}
