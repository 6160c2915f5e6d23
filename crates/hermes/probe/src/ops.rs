//! File operations.
//!
//! Create and delete follow the same protocol: make the intent durable in the
//! journal, issue the storage call, then confirm the result with a prefix
//! listing. Reads list, download and hash.

use std::io::Read;

use hermes_storage::{BucketHandle, ObjectAttrs, ListQuery};
use hermes_types::{parse_file_name, ApiCall, ExitStatus, FileId, ProbeOperation, RandomFile};
use hermes_metrics::record_latency;
use sha1::{Digest, Sha1};
use tracing::{debug, instrument};

use crate::error::{ProbeError, ProbeResult};
use crate::journal::{bucket as journal_io, Intent};
use crate::target::{RunContext, Target};

const UPLOAD_CHUNK: usize = 256;
const DOWNLOAD_CHUNK: usize = 256;

/// List objects under `prefix`.
pub(crate) async fn list(
    bucket: &BucketHandle,
    cx: &RunContext<'_>,
    prefix: &str,
) -> ProbeResult<Vec<ObjectAttrs>> {
    cx.api(ApiCall::ListFiles, async {
        bucket
            .objects(&ListQuery::prefix(prefix))
            .await
            .map_err(|e| ProbeError::storage(e, ExitStatus::ApiCallFailed, format!("listing {prefix}")))
    })
    .await
}

/// Stream `source` into a new object named `name`.
pub(crate) async fn upload<R: Read + Send>(
    bucket: &BucketHandle,
    cx: &RunContext<'_>,
    name: &str,
    mut source: R,
) -> ProbeResult<ObjectAttrs> {
    let object = bucket.object(name);
    cx.api(ApiCall::CreateFile, async move {
        let mut writer = object.new_writer();
        let mut buf = [0u8; UPLOAD_CHUNK];
        loop {
            let n = source.read(&mut buf).map_err(|e| {
                ProbeError::new(ExitStatus::ProbeFailed, format!("generating {name}: {e}"))
            })?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).await.map_err(|e| {
                ProbeError::storage(e, ExitStatus::ProbeFailed, format!("writing {name}"))
            })?;
        }
        writer
            .close()
            .await
            .map_err(|e| ProbeError::close_failed(e, name))
    })
    .await
}

/// Stream an object through `sink`.
pub(crate) async fn download<F: FnMut(&[u8]) + Send>(
    bucket: &BucketHandle,
    cx: &RunContext<'_>,
    name: &str,
    mut sink: F,
) -> ProbeResult<u64> {
    let object = bucket.object(name);
    cx.api(ApiCall::GetFile, async move {
        let mut reader = object.new_reader().await.map_err(|e| {
            ProbeError::storage(e, ExitStatus::ProbeFailed, format!("opening {name}"))
        })?;
        let mut buf = [0u8; DOWNLOAD_CHUNK];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| ProbeError {
                status: ExitStatus::FileReadFailure,
                message: format!("reading {name}"),
                source: Some(e),
            })?;
            if n == 0 {
                break;
            }
            sink(&buf[..n]);
            total += n as u64;
        }
        Ok(total)
    })
    .await
}

pub(crate) async fn delete_object(
    bucket: &BucketHandle,
    cx: &RunContext<'_>,
    name: &str,
) -> ProbeResult<()> {
    let object = bucket.object(name);
    cx.api(ApiCall::DeleteFile, async move {
        object
            .delete()
            .await
            .map_err(|e| ProbeError::storage(e, ExitStatus::ProbeFailed, format!("deleting {name}")))
    })
    .await
}

/// The listing must hold exactly `expected`.
pub(crate) fn expect_single(listing: &[ObjectAttrs], expected: &str) -> ProbeResult<()> {
    match listing {
        [] => Err(ProbeError::new(
            ExitStatus::FileMissing,
            format!("{expected} not listed"),
        )),
        [only] if only.name == expected => Ok(()),
        [only] => Err(ProbeError::new(
            ExitStatus::FileMetadataMismatch,
            format!("expected {expected}, bucket has {}", only.name),
        )),
        many => Err(ProbeError::new(
            ExitStatus::UnknownFileFound,
            format!(
                "{} objects share the prefix of {expected}: {}",
                many.len(),
                many.iter().map(|o| o.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
        )),
    }
}

/// Upload `file` and confirm it is the only object carrying its id.
pub(crate) async fn write_and_verify(
    bucket: &BucketHandle,
    cx: &RunContext<'_>,
    file: &RandomFile,
) -> ProbeResult<String> {
    let name = file.name();
    let attrs = upload(bucket, cx, &name, file.reader()).await?;
    debug!(object = %name, size = attrs.size, "Uploaded file");

    let listing = list(bucket, cx, &file.id().prefix()).await?;
    expect_single(&listing, &name)?;
    Ok(name)
}

/// Confirm `name` no longer shows up in a listing.
pub(crate) async fn verify_deleted(
    bucket: &BucketHandle,
    cx: &RunContext<'_>,
    name: &str,
) -> ProbeResult<()> {
    let listing = list(bucket, cx, name).await?;
    if listing.iter().any(|o| o.name == name) {
        return Err(ProbeError::new(
            ExitStatus::ProbeFailed,
            format!("{name} still listed after delete"),
        ));
    }
    Ok(())
}

#[instrument(skip(target, cx, file), fields(id = %file.id(), size = file.size()))]
pub(crate) async fn create_file(
    target: &mut Target,
    cx: &RunContext<'_>,
    file: &RandomFile,
) -> ProbeResult<()> {
    let id = file.id();
    if let Some(existing) = target.journal.filename(id) {
        return Err(ProbeError::new(
            ExitStatus::UnknownFileFound,
            format!("id {id} already holds {existing}"),
        ));
    }

    let name = file.name();
    let next = target.journal.with_intent(Intent::create(name.clone()));
    journal_io::persist(target, cx, next).await?;

    write_and_verify(&target.bucket, cx, file).await?;
    target.journal.filenames.insert(id, name);
    Ok(())
}

#[instrument(skip(target, cx), fields(id = %id))]
pub(crate) async fn read_file(target: &mut Target, cx: &RunContext<'_>, id: FileId) -> ProbeResult<()> {
    let name = target
        .journal
        .filename(id)
        .ok_or_else(|| {
            ProbeError::new(
                ExitStatus::StateJournalInconsistent,
                format!("journal has no file for id {id}"),
            )
        })?
        .to_string();

    let listing = list(&target.bucket, cx, &id.prefix()).await?;
    expect_single(&listing, &name)?;

    let mut hasher = Sha1::new();
    let size = download(&target.bucket, cx, &name, |chunk| hasher.update(chunk)).await?;
    let digest = hex::encode(hasher.finalize());

    record_latency(&cx.metrics.probe_op, ProbeOperation::VerifyFileContents, async {
        match parse_file_name(&name) {
            Some((_, expected)) if expected == digest => Ok(()),
            _ => Err(ProbeError::corrupted(format!(
                "{name} ({size} bytes) hashes to {digest}"
            ))),
        }
    })
    .await
}

#[instrument(skip(target, cx), fields(id = %id))]
pub(crate) async fn delete_file(
    target: &mut Target,
    cx: &RunContext<'_>,
    id: FileId,
) -> ProbeResult<()> {
    if !id.is_churn() {
        return Err(ProbeError::new(
            ExitStatus::InvalidArgument,
            format!("id {id} is persistent and cannot be deleted"),
        ));
    }
    let name = target
        .journal
        .filename(id)
        .ok_or_else(|| {
            ProbeError::new(
                ExitStatus::StateJournalInconsistent,
                format!("journal has no file for id {id}"),
            )
        })?
        .to_string();

    let next = target.journal.with_intent(Intent::delete(name.clone()));
    journal_io::persist(target, cx, next).await?;

    delete_object(&target.bucket, cx, &name).await?;
    verify_deleted(&target.bucket, cx, &name).await?;
    target.journal.filenames.remove(&id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attrs(name: &str) -> ObjectAttrs {
        ObjectAttrs {
            bucket: "b".to_string(),
            name: name.to_string(),
            size: 1,
            updated: Utc::now(),
        }
    }

    #[test]
    fn test_expect_single() {
        assert!(expect_single(&[attrs("a")], "a").is_ok());
        assert_eq!(
            expect_single(&[], "a").unwrap_err().status,
            ExitStatus::FileMissing
        );
        assert_eq!(
            expect_single(&[attrs("b")], "a").unwrap_err().status,
            ExitStatus::FileMetadataMismatch
        );
        assert_eq!(
            expect_single(&[attrs("a"), attrs("b")], "a").unwrap_err().status,
            ExitStatus::UnknownFileFound
        );
    }
}
