//! Journal persistence against a bucket.

use hermes_storage::BucketHandle;
use hermes_types::{journal_name, parse_journal_name, ExitStatus, RandomFile, JOURNAL_NAME_PREFIX};
use tracing::{debug, error, info, warn};

use super::{sha1_hex, Intent, IntentOp, Journal};
use crate::error::{ProbeError, ProbeResult};
use crate::ops;
use crate::target::{RunContext, Target};

/// Read one journal object and verify that its payload hashes to its name.
async fn load(bucket: &BucketHandle, cx: &RunContext<'_>, name: &str) -> ProbeResult<Journal> {
    let suffix = parse_journal_name(name)
        .ok_or_else(|| ProbeError::corrupted(format!("malformed journal object name {name}")))?
        .to_string();

    let mut payload = Vec::new();
    ops::download(bucket, cx, name, |chunk| payload.extend_from_slice(chunk)).await?;

    let digest = sha1_hex(&payload);
    if digest != suffix {
        return Err(ProbeError::corrupted(format!(
            "journal {name} hashes to {digest}"
        )));
    }
    Journal::unmarshal(&payload)
}

/// Load the bucket's journal, finish any pending intent and reconcile it
/// with the in-memory state.
///
/// The first successful check after start adopts whatever the bucket holds.
/// Afterwards the stored journal must describe the same files as memory,
/// either once its intent is applied or, for an intent whose write was never
/// acknowledged, before it is applied.
pub(crate) async fn check(target: &mut Target, cx: &RunContext<'_>) -> ProbeResult<()> {
    let listing = ops::list(&target.bucket, cx, JOURNAL_NAME_PREFIX).await?;
    if listing.is_empty() {
        return Err(ProbeError::new(
            ExitStatus::FileMissing,
            format!("no journal object in bucket {}", target.bucket.name()),
        ));
    }

    let mut candidates = Vec::with_capacity(listing.len());
    for attrs in &listing {
        let journal = load(&target.bucket, cx, &attrs.name).await?;
        candidates.push((attrs.name.clone(), journal));
    }

    let chosen = if candidates.len() == 1 {
        0
    } else {
        let pending: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, (_, journal))| journal.intent.is_some())
            .map(|(index, _)| index)
            .collect();
        match pending.as_slice() {
            [index] => *index,
            _ => {
                return Err(ProbeError::corrupted(format!(
                    "{} journal objects and {} pending intents in bucket {}",
                    candidates.len(),
                    pending.len(),
                    target.bucket.name()
                )))
            }
        }
    };
    let (object, stored) = candidates.swap_remove(chosen);
    let stale: Vec<String> = candidates.into_iter().map(|(name, _)| name).collect();
    if !stale.is_empty() {
        warn!(journal = %object, stale = ?stale, "Multiple journal objects, keeping the one with a pending intent");
    }

    let resolved = stored.resolved();
    if target.journal_loaded {
        let expected = target.journal.resolved();
        if resolved != expected && stored.without_intent() != expected {
            return Err(ProbeError::corrupted(format!(
                "journal {object} disagrees with in-memory state"
            )));
        }
    }

    if let Some(intent) = &stored.intent {
        info!(op = ?intent.op, file = %intent.filename, "Resolving pending intent");
        resolve_intent(&target.bucket, cx, &stored, intent).await?;
    }

    target.journal = resolved;
    target.journal_object = Some(object);
    target.stale_journals = stale;
    target.journal_loaded = true;
    Ok(())
}

/// Carry out an intent found in a stored journal. Both directions are
/// idempotent: a create that already landed is adopted and a delete of an
/// absent object succeeds.
async fn resolve_intent(
    bucket: &BucketHandle,
    cx: &RunContext<'_>,
    stored: &Journal,
    intent: &Intent,
) -> ProbeResult<()> {
    let id = intent.file_id().ok_or_else(|| {
        ProbeError::corrupted(format!("intent names a foreign file {}", intent.filename))
    })?;

    match intent.op {
        IntentOp::Create => {
            if stored.filename(id) == Some(intent.filename.as_str()) {
                return Ok(());
            }
            let listing = ops::list(bucket, cx, &id.prefix()).await?;
            if listing.iter().any(|o| o.name == intent.filename) {
                debug!(file = %intent.filename, "Create already landed");
                return ops::expect_single(&listing, &intent.filename);
            }
            if !listing.is_empty() {
                return ops::expect_single(&listing, &intent.filename);
            }
            let file = RandomFile::from_name(&intent.filename).ok_or_else(|| {
                ProbeError::corrupted(format!(
                    "cannot regenerate contents of {}",
                    intent.filename
                ))
            })?;
            ops::write_and_verify(bucket, cx, &file).await?;
        }
        IntentOp::Delete => {
            if stored.filename(id) != Some(intent.filename.as_str()) {
                return Ok(());
            }
            match ops::delete_object(bucket, cx, &intent.filename).await {
                Err(e) if e.status != ExitStatus::FileMissing => return Err(e),
                _ => {}
            }
            ops::verify_deleted(bucket, cx, &intent.filename).await?;
        }
    }
    Ok(())
}

/// Make `next` the durable journal.
///
/// A journal is committed to memory once its object is written. Older
/// journal objects are deleted afterwards; the ones that cannot be removed are
/// retried on the next persist.
pub(crate) async fn persist(
    target: &mut Target,
    cx: &RunContext<'_>,
    next: Journal,
) -> ProbeResult<()> {
    let payload = next.marshal();
    let name = journal_name(&sha1_hex(&payload));

    if target.journal_object.as_deref() != Some(name.as_str()) {
        ops::upload(&target.bucket, cx, &name, payload.as_slice()).await?;
        debug!(journal = %name, intent = next.intent.is_some(), "Journal written");
    }

    let mut leftovers = std::mem::take(&mut target.stale_journals);
    if let Some(previous) = target.journal_object.replace(name.clone()) {
        if previous != name {
            leftovers.push(previous);
        }
    }
    // A journal recorded as stale at check time may be the one just rewritten.
    leftovers.retain(|old| *old != name);
    target.journal = next;
    target.journal_loaded = true;

    let mut first_failure = None;
    for old in leftovers {
        match ops::delete_object(&target.bucket, cx, &old).await {
            Ok(()) => {}
            Err(e) if e.status == ExitStatus::FileMissing => {}
            Err(e) => {
                error!(journal = %old, error = %e, "Failed to delete superseded journal");
                target.stale_journals.push(old);
                first_failure.get_or_insert(e);
            }
        }
    }
    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Persist the in-memory journal with its intent cleared.
pub(crate) async fn update(target: &mut Target, cx: &RunContext<'_>) -> ProbeResult<()> {
    let next = target.journal.without_intent();
    persist(target, cx, next).await
}
