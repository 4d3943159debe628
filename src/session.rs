//! Session-scoped presentation state for one viewed entry.
//!
//! The five load-derived values live in a single [`EntrySnapshot`] behind a
//! `watch` channel, so observers always see them from the same load. They are
//! only replaced on the session's main line, when the owner drives completions
//! with [`EntrySession::tick`] or [`EntrySession::settle`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::{CompletionOrdering, SessionConfig};
use crate::decode::DecodedView;
use crate::events::{EventChannel, EventStream};
use crate::executor::MainLine;
use crate::model::{Attachment, AttachmentState, OtpElement, RecordId};
use crate::pipeline::{self, ResolvedBundle, LIVE_POSITION};
use crate::store::Vault;
use crate::template::Template;

/// The published result of the last applied load.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub record_id: RecordId,
    pub history_position: i32,
    pub template: Template,
    pub entry: DecodedView,
    pub history: Vec<DecodedView>,
}

/// A history item picked by the user. `template` is left for the consumer to resolve.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HistorySelection {
    pub record_id: RecordId,
    pub template: Option<Template>,
    pub entry: DecodedView,
    pub history_position: i32,
}

/// What applying one completion did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    /// A new snapshot was published
    Applied,
    /// The load yielded nothing; the previous snapshot stays visible
    Unchanged,
    /// A newer load already settled; this result was discarded
    Stale,
}

struct PresentationState {
    snapshot: watch::Sender<Option<Arc<EntrySnapshot>>>,
    ordering: CompletionOrdering,
    last_settled: u64,
}

impl PresentationState {
    fn apply(&mut self, token: u64, position: i32, bundle: Option<ResolvedBundle>) -> Publication {
        if self.ordering == CompletionOrdering::LatestRequest && token < self.last_settled {
            debug!(token, last_settled = self.last_settled, "discarding stale entry load");
            return Publication::Stale;
        }
        self.last_settled = self.last_settled.max(token);

        let Some(bundle) = bundle else {
            return Publication::Unchanged;
        };

        debug!(record = %bundle.record_id, position, history = bundle.history.len(), "publishing entry");
        self.snapshot.send_replace(Some(Arc::new(EntrySnapshot {
            record_id: bundle.record_id,
            history_position: position,
            template: bundle.template,
            entry: bundle.entry,
            history: bundle.history,
        })));
        Publication::Applied
    }
}

pub struct EntrySession {
    state: PresentationState,
    main_line: MainLine<PresentationState, Publication>,
    next_token: u64,
    otp_element: EventChannel<Option<OtpElement>>,
    attachment_selected: EventChannel<Attachment>,
    attachment_action: EventChannel<Option<AttachmentState>>,
    history_selected: EventChannel<HistorySelection>,
}

impl EntrySession {
    /// Creates a session bound to the current tokio runtime.
    pub fn new(config: SessionConfig) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            state: PresentationState { snapshot, ordering: config.ordering, last_settled: 0 },
            main_line: MainLine::new(),
            next_token: 0,
            otp_element: EventChannel::new(),
            attachment_selected: EventChannel::new(),
            attachment_action: EventChannel::new(),
            history_selected: EventChannel::new(),
        }
    }

    // --- Loads ---

    /// Starts resolving (`id`, `position`) in the background. Absent inputs make
    /// this a no-op and `None` is returned; otherwise the request token.
    pub fn load_entry(&mut self, vault: Option<Arc<dyn Vault>>, id: Option<RecordId>, position: i32) -> Option<u64> {
        let (Some(vault), Some(id)) = (vault, id) else {
            debug!("entry load skipped: missing vault or record id");
            return None;
        };

        self.next_token += 1;
        let token = self.next_token;
        debug!(record = %id, position, token, "loading entry");

        self.main_line.submit(
            move || pipeline::resolve(&*vault, id, position),
            move |state: &mut PresentationState, bundle| state.apply(token, position, bundle),
        );
        Some(token)
    }

    /// Reloads the last published record at its last published position.
    pub fn update_entry(&mut self, vault: Option<Arc<dyn Vault>>) -> Option<u64> {
        let (id, position) = match self.snapshot() {
            Some(s) => (Some(s.record_id), s.history_position),
            None => (None, LIVE_POSITION),
        };
        self.load_entry(vault, id, position)
    }

    /// Applies the next completed load, waiting for it. `None` when no load is in flight.
    pub async fn tick(&mut self) -> Option<Publication> {
        self.main_line.run_next(&mut self.state).await
    }

    /// Waits for every in-flight load and applies them in completion order.
    pub async fn settle(&mut self) -> Vec<Publication> {
        let mut applied = Vec::new();
        while let Some(publication) = self.tick().await {
            applied.push(publication);
        }
        applied
    }

    pub fn loads_in_flight(&self) -> usize {
        self.main_line.in_flight()
    }

    // --- Published state ---

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<EntrySnapshot>>> {
        self.state.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> Option<Arc<EntrySnapshot>> {
        self.state.snapshot.borrow().clone()
    }

    pub fn template(&self) -> Option<Template> {
        self.snapshot().map(|s| s.template.clone())
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.snapshot().map(|s| s.record_id)
    }

    pub fn history_position(&self) -> Option<i32> {
        self.snapshot().map(|s| s.history_position)
    }

    pub fn entry(&self) -> Option<DecodedView> {
        self.snapshot().map(|s| s.entry.clone())
    }

    pub fn history(&self) -> Option<Vec<DecodedView>> {
        self.snapshot().map(|s| s.history.clone())
    }

    // --- One-shot events ---

    pub fn otp_element_updates(&mut self) -> EventStream<Option<OtpElement>> {
        self.otp_element.subscribe()
    }

    pub fn attachment_selections(&mut self) -> EventStream<Attachment> {
        self.attachment_selected.subscribe()
    }

    pub fn attachment_actions(&mut self) -> EventStream<Option<AttachmentState>> {
        self.attachment_action.subscribe()
    }

    pub fn history_selections(&mut self) -> EventStream<HistorySelection> {
        self.history_selected.subscribe()
    }

    pub fn set_otp_element(&mut self, element: Option<OtpElement>) -> bool {
        self.otp_element.publish(element)
    }

    pub fn select_attachment(&mut self, attachment: Attachment) -> bool {
        self.attachment_selected.publish(attachment)
    }

    pub fn set_attachment_action(&mut self, state: Option<AttachmentState>) -> bool {
        self.attachment_action.publish(state)
    }

    /// Publishes the pick of a history list item. Negative positions denote the
    /// live version and are rejected.
    pub fn select_history_item(&mut self, view: &DecodedView, position: i32) -> bool {
        if position < 0 {
            warn!(record = %view.id, position, "history selection needs a history position");
            return false;
        }
        self.history_selected.publish(HistorySelection {
            record_id: view.id,
            template: None,
            entry: view.clone(),
            history_position: position,
        })
    }

    /// Picks item `position` of the currently published history list.
    pub fn select_history_position(&mut self, position: i32) -> Option<HistorySelection> {
        let snapshot = self.snapshot()?;
        let view = snapshot.history.get(usize::try_from(position).ok()?)?;
        let selection = HistorySelection {
            record_id: view.id,
            template: None,
            entry: view.clone(),
            history_position: position,
        };
        self.history_selected.publish(selection.clone());
        Some(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, RecordVersion};
    use crate::store::MemoryStore;

    fn seeded() -> (Arc<MemoryStore>, RecordId) {
        let store = Arc::new(MemoryStore::new());
        let id = RecordId::new();
        for title in ["first", "second", "third"] {
            store.put(RecordVersion::new(id, None, vec![Field::new("title", title)])).unwrap();
        }
        (store, id)
    }

    fn vault(store: &Arc<MemoryStore>) -> Option<Arc<dyn Vault>> {
        let vault: Arc<dyn Vault> = store.clone();
        Some(vault)
    }

    #[tokio::test]
    async fn absent_inputs_are_a_silent_noop() {
        let (store, id) = seeded();
        let mut session = EntrySession::new(SessionConfig::default());

        assert_eq!(session.load_entry(None, Some(id), LIVE_POSITION), None);
        assert_eq!(session.load_entry(vault(&store), None, LIVE_POSITION), None);
        assert_eq!(session.update_entry(vault(&store)), None);
        assert_eq!(session.loads_in_flight(), 0);
        assert!(session.snapshot().is_none());
    }

    #[tokio::test]
    async fn completed_load_publishes_all_fields_together() {
        let (store, id) = seeded();
        let mut session = EntrySession::new(SessionConfig::default());
        let mut observer = session.subscribe();

        session.load_entry(vault(&store), Some(id), 1);
        assert_eq!(session.tick().await, Some(Publication::Applied));

        assert!(observer.has_changed().unwrap());
        let seen = observer.borrow_and_update().clone().unwrap();
        assert_eq!(seen.record_id, id);
        assert_eq!(seen.history_position, 1);
        assert_eq!(seen.entry.title, "second");
        assert_eq!(seen.history.len(), 2);
        assert!(seen.template.is_standard());
        assert_eq!(session.history_position(), Some(1));
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_snapshot() {
        let (store, id) = seeded();
        let mut session = EntrySession::new(SessionConfig::default());

        session.load_entry(vault(&store), Some(id), LIVE_POSITION);
        session.settle().await;
        let before = session.snapshot().unwrap();

        session.load_entry(vault(&store), Some(id), 9);
        session.load_entry(vault(&store), Some(RecordId::new()), LIVE_POSITION);
        let outcomes = session.settle().await;
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes.contains(&Publication::Applied));

        assert_eq!(session.snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn update_entry_reloads_last_published_position() {
        let (store, id) = seeded();
        let mut session = EntrySession::new(SessionConfig::default());

        session.load_entry(vault(&store), Some(id), 0);
        session.settle().await;

        store.put(RecordVersion::new(id, None, vec![Field::new("title", "fourth")])).unwrap();
        assert!(session.update_entry(vault(&store)).is_some());
        session.settle().await;

        let snapshot = session.snapshot().unwrap();
        assert_eq!(snapshot.history_position, 0);
        assert_eq!(snapshot.entry.title, "first");
        assert_eq!(snapshot.history.len(), 3);
    }

    #[tokio::test]
    async fn history_selection_is_an_event_not_state() {
        let (store, id) = seeded();
        let mut session = EntrySession::new(SessionConfig::default());
        session.load_entry(vault(&store), Some(id), LIVE_POSITION);
        session.settle().await;
        let before = session.snapshot();

        let mut picks = session.history_selections();
        let item = session.history().unwrap()[1].clone();
        assert!(session.select_history_item(&item, 3));
        assert!(!session.select_history_item(&item, LIVE_POSITION));

        let pick = picks.try_next().unwrap();
        assert_eq!(pick.history_position, 3);
        assert_eq!(pick.record_id, item.id);
        assert!(pick.template.is_none());
        assert!(picks.try_next().is_none());
        assert_eq!(session.snapshot(), before);
    }

    #[tokio::test]
    async fn one_shot_events_reach_only_current_subscriber() {
        let mut session = EntrySession::new(SessionConfig::default());
        let attachment = Attachment { name: "key.pem".into(), size: 2048 };

        // Nobody listening yet: nothing is queued for later
        assert!(!session.select_attachment(attachment.clone()));
        let mut selections = session.attachment_selections();
        assert!(selections.try_next().is_none());

        assert!(session.select_attachment(attachment.clone()));
        assert_eq!(selections.try_next(), Some(attachment));

        let mut otp = session.otp_element_updates();
        assert!(session.set_otp_element(None));
        assert_eq!(otp.try_next(), Some(None));

        let mut actions = session.attachment_actions();
        assert!(session.set_attachment_action(None));
        assert_eq!(actions.try_next(), Some(None));
    }
}
