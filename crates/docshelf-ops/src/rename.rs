//! Renaming entities.

use docshelf_core::{CancellationToken, Entity, EntityUid, Provider, ProviderError, ProviderResult};
use docshelf_listing::ListingSession;
use tracing::debug;

use crate::reconcile::apply_rename;

/// Validate a title before handing it to a provider.
pub fn validate_title(name: &str) -> ProviderResult<()> {
    let invalid = |reason: &str| Err(ProviderError::invalid_name(name, reason));

    if name.is_empty() {
        return invalid("Name cannot be empty");
    }

    if name.len() > 255 {
        return invalid("Name is too long (max 255 bytes)");
    }

    for c in ['/', '\0'] {
        if name.contains(c) {
            return invalid(&format!("Name cannot contain '{}'", c.escape_default()));
        }
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return invalid("Name cannot start or end with spaces");
    }

    if name.ends_with('.') {
        return invalid("Name cannot end with a dot");
    }

    if name == "." || name == ".." {
        return invalid("'.' and '..' are reserved names");
    }

    Ok(())
}

/// Rename an entity after validating the new title.
///
/// Renaming to the current title returns the entity unchanged without a
/// provider call.
pub async fn rename_entity(
    provider: &dyn Provider,
    entity: &Entity,
    new_title: &str,
    cancel: &CancellationToken,
) -> ProviderResult<Entity> {
    validate_title(new_title)?;
    if entity.title == new_title {
        return Ok(entity.clone());
    }

    let renamed = provider.rename(entity, new_title, cancel).await?;
    debug!(from = %entity.title, to = %renamed.title, "Renamed");
    Ok(renamed)
}

/// Rename a buffered entity and update it in place.
pub async fn rename_in_session(
    session: &mut ListingSession,
    uid: &EntityUid,
    new_title: &str,
    cancel: &CancellationToken,
) -> ProviderResult<Entity> {
    let entity = session
        .get(uid)
        .cloned()
        .ok_or_else(|| ProviderError::not_found(uid.as_str()))?;
    let provider = session.provider().clone();

    let renamed = rename_entity(provider.as_ref(), &entity, new_title, cancel).await?;
    apply_rename(session, &entity, renamed.clone());
    Ok(renamed)
}
