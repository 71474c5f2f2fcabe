//! Bringing listing sessions in line with finished mutations.

use docshelf_core::{Entity, EntityUid};
use docshelf_listing::ListingSession;
use tracing::debug;

use crate::outcome::{TransferOutcome, TransferState};

/// What a session needs after a mutation was applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The session does not show anything the mutation touched.
    Unaffected,
    /// The buffer was patched in place.
    Updated { removed: usize, inserted: usize },
    /// The buffer can no longer be patched reliably; load the first page
    /// again.
    NeedsReload,
}

/// Patch a session after a transfer.
///
/// On the source side, moved items are removed by uid. On the destination
/// side, when every attempted item succeeded, the created entities are
/// inserted at the top in request order. Anything less asks for a reload.
/// A session in search mode is only patched on the source side.
pub fn apply_outcome(session: &mut ListingSession, outcome: &TransferOutcome) -> Reconciliation {
    let provider = session.provider().id().clone();
    let mut removed = 0;
    let mut inserted = 0;

    if outcome.mode().is_move() && &provider == outcome.source_provider() {
        let moved: Vec<EntityUid> = outcome
            .succeeded()
            .map(|(source, _)| source.uid().clone())
            .collect();
        for uid in &moved {
            if session.remove(uid).is_some() {
                removed += 1;
            }
        }
    }

    let shows_destination = &provider == outcome.destination_provider()
        && session.folder_id() == outcome.destination().id.as_str()
        && session.search().is_none();

    if shows_destination {
        if outcome.failed_count() > 0 || outcome.state() == TransferState::Cancelled {
            debug!(folder = %session.folder_id(), "Destination needs reload");
            return Reconciliation::NeedsReload;
        }

        let created: Vec<Entity> = outcome
            .succeeded()
            .map(|(_, created)| created.clone())
            .collect();
        for entity in created.into_iter().rev() {
            if place_at_top(session, entity) {
                inserted += 1;
            }
        }
    }

    if removed == 0 && inserted == 0 && !shows_destination {
        Reconciliation::Unaffected
    } else {
        Reconciliation::Updated { removed, inserted }
    }
}

/// Insert `entity` at index 0, dropping any buffered entity it replaced.
fn place_at_top(session: &mut ListingSession, entity: Entity) -> bool {
    let caps = session.provider().capabilities();
    let replaced: Vec<EntityUid> = session
        .buffer()
        .iter()
        .filter(|e| caps.titles_collide(&e.title, &entity.title))
        .map(|e| e.uid().clone())
        .collect();
    for uid in &replaced {
        session.remove(uid);
    }
    session.insert(0, entity)
}

/// Remove deleted entities from a session. Returns how many were buffered.
pub fn apply_deletions<'a>(
    session: &mut ListingSession,
    deleted: impl IntoIterator<Item = &'a Entity>,
) -> usize {
    deleted
        .into_iter()
        .filter(|entity| session.remove(entity.uid()).is_some())
        .count()
}

/// Replace a renamed entity in place.
pub fn apply_rename(session: &mut ListingSession, original: &Entity, renamed: Entity) -> bool {
    session.replace(original.uid(), renamed)
}

/// Reset a session that shows the trash folder of its provider.
pub fn apply_trash_emptied(session: &mut ListingSession) -> bool {
    let shows_trash = session
        .provider()
        .trash_folder_id()
        .is_some_and(|trash| trash == session.folder_id());
    if shows_trash {
        session.reset();
    }
    shows_trash
}
