//! Entry resolution: one consistent read of a record projected into a bundle.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::decode::{DecodedRecord, DecodedView, TemplateDecoder};
use crate::model::{self, RecordId};
use crate::store::{StoreError, Vault};
use crate::template::Template;

/// Position meaning "the live version, not a history item".
pub const LIVE_POSITION: i32 = -1;

/// Everything one load publishes, built from a single store read.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBundle {
    pub record_id: RecordId,
    pub template: Template,
    pub entry: DecodedView,
    pub history: Vec<DecodedView>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("record {0} not found")]
    RecordNotFound(RecordId),

    #[error("history position {position} out of range for {len} entries")]
    HistoryOutOfRange { position: i32, len: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves (`id`, `position`) against `vault`. Any failure yields `None`.
pub fn resolve<V: Vault + ?Sized>(vault: &V, id: RecordId, position: i32) -> Option<ResolvedBundle> {
    match try_resolve(vault, id, position) {
        Ok(bundle) => Some(bundle),
        Err(e @ ResolveError::Store(_)) => {
            warn!(record = %id, position, error = %e, "entry resolution failed");
            None
        }
        Err(e) => {
            debug!(record = %id, position, error = %e, "entry resolution yielded nothing");
            None
        }
    }
}

pub fn try_resolve<V: Vault + ?Sized>(vault: &V, id: RecordId, position: i32) -> Result<ResolvedBundle, ResolveError> {
    let live = vault.current_version(id)?.ok_or(ResolveError::RecordNotFound(id))?;

    let target = if position > LIVE_POSITION {
        usize::try_from(position)
            .ok()
            .and_then(|i| live.history.get(i))
            .ok_or(ResolveError::HistoryOutOfRange { position, len: live.history.len() })?
    } else if position == LIVE_POSITION {
        &live
    } else {
        return Err(ResolveError::HistoryOutOfRange { position, len: live.history.len() });
    };

    // The template comes from the target; field layout comes from the live version
    let template = vault.template_or_standard(target);

    let mut decoded = TemplateDecoder::new(vault).decode(target, &live);
    decoded.touch(model::now(), false, false);

    let history = reconstruct_history(&decoded);

    Ok(ResolvedBundle {
        record_id: live.id,
        template,
        entry: decoded.view(),
        history,
    })
}

/// Summaries of every historical version carried by `record`, in stored order.
pub fn reconstruct_history(record: &DecodedRecord) -> Vec<DecodedView> {
    record.history.iter().map(DecodedView::summarize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_with;
    use crate::model::{Field, RecordVersion};
    use crate::store::{MemoryStore, RecordStore};
    use crate::template::{TemplateField, TemplateResolver};
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: MemoryStore,
        id: RecordId,
        custom: Template,
    }

    /// Record with two history entries: H0 without a template, H1 and live on "Custom".
    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let custom = Template::new("Custom", vec![TemplateField::new("account"), TemplateField::protected("secret")]);
        store.register_template(custom.clone()).unwrap();

        let id = RecordId::new();
        store.put(RecordVersion::new(id, None, vec![Field::new("title", "h0"), Field::new("username", "u0")])).unwrap();
        store.put(RecordVersion::new(id, Some(custom.id), vec![Field::new("title", "h1"), Field::new("account", "a1")])).unwrap();
        store.put(RecordVersion::new(id, Some(custom.id), vec![Field::new("title", "live"), Field::new("account", "a2")])).unwrap();

        Fixture { store, id, custom }
    }

    fn without_access_time(mut view: DecodedView) -> DecodedView {
        view.accessed = 0;
        view
    }

    #[test]
    fn live_position_decodes_live_against_itself() {
        let fx = fixture();
        let live = fx.store.current_version(fx.id).unwrap().unwrap();

        let bundle = resolve(&fx.store, fx.id, LIVE_POSITION).unwrap();

        assert_eq!(bundle.record_id, fx.id);
        assert_eq!(bundle.template, fx.custom);
        assert_eq!(
            without_access_time(bundle.entry),
            without_access_time(decode_with(&fx.custom, &live, &live).view())
        );
        let expected: Vec<DecodedView> = live.history.iter().map(DecodedView::summarize).collect();
        assert_eq!(bundle.history, expected);
    }

    #[test]
    fn history_position_takes_template_from_snapshot_and_layout_from_live() {
        let fx = fixture();
        let live = fx.store.current_version(fx.id).unwrap().unwrap();
        let h0 = &live.history[0];

        let bundle = resolve(&fx.store, fx.id, 0).unwrap();

        // H0 had no template: the bundle template falls back to standard...
        assert!(bundle.template.is_standard());
        // ...while its fields are laid out by the live version's template
        assert_eq!(bundle.entry.template, fx.custom.id);
        assert_eq!(
            without_access_time(bundle.entry.clone()),
            without_access_time(decode_with(&fx.custom, h0, &live).view())
        );
        assert_ne!(bundle.entry.fields, decode_with(&Template::standard(), h0, h0).view().fields);
        assert_eq!(bundle.history.len(), 2);
    }

    #[test]
    fn every_position_shares_the_same_history() {
        let fx = fixture();
        let from_live = resolve(&fx.store, fx.id, LIVE_POSITION).unwrap();
        let from_h1 = resolve(&fx.store, fx.id, 1).unwrap();

        assert_eq!(from_h1.template, fx.store.template_or_standard(&fx.store.current_version(fx.id).unwrap().unwrap().history[1]));
        assert_eq!(from_h1.entry.title, "h1");
        assert_eq!(from_live.history, from_h1.history);
        let titles: Vec<_> = from_h1.history.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, vec!["h0", "h1"]);
    }

    #[test]
    fn out_of_range_positions_yield_nothing() {
        let fx = fixture();
        assert!(resolve(&fx.store, fx.id, 2).is_none());
        assert!(resolve(&fx.store, fx.id, -2).is_none());
        assert!(matches!(
            try_resolve(&fx.store, fx.id, 7),
            Err(ResolveError::HistoryOutOfRange { position: 7, len: 2 })
        ));
    }

    #[test]
    fn missing_record_yields_nothing() {
        let fx = fixture();
        let other = RecordId::new();
        assert!(resolve(&fx.store, other, LIVE_POSITION).is_none());
        assert!(matches!(try_resolve(&fx.store, other, 0), Err(ResolveError::RecordNotFound(id)) if id == other));
    }

    #[test]
    fn repeated_resolution_is_stable_apart_from_access_time() {
        let fx = fixture();
        let first = resolve(&fx.store, fx.id, 1).unwrap();
        let second = resolve(&fx.store, fx.id, 1).unwrap();

        assert!(second.entry.accessed >= first.entry.accessed);
        assert_eq!(first.entry.modified, second.entry.modified);
        assert_eq!(
            ResolvedBundle { entry: without_access_time(first.entry.clone()), ..first },
            ResolvedBundle { entry: without_access_time(second.entry.clone()), ..second }
        );

        // The store itself never sees the touch
        let h1 = &fx.store.current_version(fx.id).unwrap().unwrap().history[1];
        assert_eq!(h1.accessed, h1.modified);
    }

    #[test]
    fn record_without_history_resolves_to_empty_history() {
        let store = MemoryStore::new();
        let id = RecordId::new();
        store.put(RecordVersion::new(id, None, vec![Field::new("title", "solo")])).unwrap();

        let bundle = resolve(&store, id, LIVE_POSITION).unwrap();
        assert!(bundle.template.is_standard());
        assert!(bundle.history.is_empty());
        assert!(resolve(&store, id, 0).is_none());
    }
}
