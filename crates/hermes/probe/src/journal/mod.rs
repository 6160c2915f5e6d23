//! The journal: Hermes's view of a bucket plus at most one pending intent.
//!
//! The journal is persisted as a single object whose name embeds the SHA-1 of
//! its payload. Before a data operation is issued its intent is made durable;
//! after a crash the next check finds the intent and finishes the operation.

pub(crate) mod bucket;

use std::collections::BTreeMap;

use hermes_types::{journal_name, parse_file_name, ExitStatus, FileId};
use prost::Message;
use sha1::{Digest, Sha1};

use crate::error::{ProbeError, ProbeResult};
use crate::pb::hermes::v1 as pb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentOp {
    Create,
    Delete,
}

/// A file operation that may have been started but not committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub op: IntentOp,
    pub filename: String,
}

impl Intent {
    pub fn create(filename: impl Into<String>) -> Self {
        Self {
            op: IntentOp::Create,
            filename: filename.into(),
        }
    }

    pub fn delete(filename: impl Into<String>) -> Self {
        Self {
            op: IntentOp::Delete,
            filename: filename.into(),
        }
    }

    /// Id encoded in the intent's file name.
    pub fn file_id(&self) -> Option<FileId> {
        parse_file_name(&self.filename).map(|(id, _)| id)
    }
}

/// In-memory journal of one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    pub intent: Option<Intent>,
    pub filenames: BTreeMap<FileId, String>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// No files and no intent.
    pub fn is_empty(&self) -> bool {
        self.intent.is_none() && self.filenames.is_empty()
    }

    pub fn filename(&self, id: FileId) -> Option<&str> {
        self.filenames.get(&id).map(String::as_str)
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.filenames.contains_key(&id)
    }

    pub fn present_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.filenames.keys().copied()
    }

    /// Number of churn files believed to exist.
    pub fn churn_count(&self) -> usize {
        self.filenames.keys().filter(|id| id.is_churn()).count()
    }

    /// Lowest persistent id missing from the journal.
    pub fn first_missing_persistent(&self) -> Option<FileId> {
        FileId::persistent().find(|id| !self.contains(*id))
    }

    /// Copy of this journal carrying `intent`.
    pub fn with_intent(&self, intent: Intent) -> Self {
        Self {
            intent: Some(intent),
            filenames: self.filenames.clone(),
        }
    }

    /// Copy of this journal with the intent dropped.
    pub fn without_intent(&self) -> Self {
        Self {
            intent: None,
            filenames: self.filenames.clone(),
        }
    }

    /// The journal that results once the pending intent has been carried
    /// out: a create records its file, a delete forgets its file if the
    /// journal still points at it.
    pub fn resolved(&self) -> Self {
        let mut out = self.without_intent();
        if let Some(intent) = &self.intent {
            if let Some(id) = intent.file_id() {
                match intent.op {
                    IntentOp::Create => {
                        out.filenames.insert(id, intent.filename.clone());
                    }
                    IntentOp::Delete => {
                        if out.filename(id) == Some(intent.filename.as_str()) {
                            out.filenames.remove(&id);
                        }
                    }
                }
            }
        }
        out
    }

    fn to_proto(&self) -> pb::StateJournal {
        pb::StateJournal {
            intent: self.intent.as_ref().map(|intent| pb::Intent {
                file_operation: match intent.op {
                    IntentOp::Create => pb::FileOperation::Create,
                    IntentOp::Delete => pb::FileOperation::Delete,
                } as i32,
                filename: intent.filename.clone(),
            }),
            filenames: self
                .filenames
                .iter()
                .map(|(id, name)| (i32::from(*id), name.clone()))
                .collect(),
        }
    }

    fn from_proto(msg: pb::StateJournal) -> ProbeResult<Self> {
        let intent = match msg.intent {
            None => None,
            Some(intent) => {
                let op = match pb::FileOperation::try_from(intent.file_operation) {
                    Ok(pb::FileOperation::Create) => IntentOp::Create,
                    Ok(pb::FileOperation::Delete) => IntentOp::Delete,
                    _ => {
                        return Err(ProbeError::corrupted(format!(
                            "journal intent has unknown operation {}",
                            intent.file_operation
                        )))
                    }
                };
                if parse_file_name(&intent.filename).is_none() {
                    return Err(ProbeError::corrupted(format!(
                        "journal intent names a foreign file {:?}",
                        intent.filename
                    )));
                }
                Some(Intent {
                    op,
                    filename: intent.filename,
                })
            }
        };

        let mut filenames = BTreeMap::new();
        for (raw_id, name) in msg.filenames {
            let id = FileId::try_from(raw_id)
                .map_err(|e| ProbeError::corrupted(format!("journal entry: {e}")))?;
            match parse_file_name(&name) {
                Some((name_id, _)) if name_id == id => {
                    filenames.insert(id, name);
                }
                _ => {
                    return Err(ProbeError::corrupted(format!(
                        "journal maps id {id} to {name:?}"
                    )))
                }
            }
        }

        Ok(Self { intent, filenames })
    }

    /// Length-delimited protobuf encoding.
    pub fn marshal(&self) -> Vec<u8> {
        self.to_proto().encode_length_delimited_to_vec()
    }

    pub fn unmarshal(bytes: &[u8]) -> ProbeResult<Self> {
        let msg = pb::StateJournal::decode_length_delimited(bytes).map_err(|e| ProbeError {
            status: ExitStatus::FileCorrupted,
            message: format!("journal payload does not decode: {e}"),
            source: None,
        })?;
        Self::from_proto(msg)
    }

    /// Name of the object this journal is stored under.
    pub fn object_name(&self) -> String {
        journal_name(&sha1_hex(&self.marshal()))
    }
}

pub(crate) fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_types::{parse_journal_name, RandomFile};
    use proptest::prelude::*;

    fn name(id: i64, size: usize) -> String {
        RandomFile::new(id, size).unwrap().name()
    }

    fn sample() -> Journal {
        let mut journal = Journal::new();
        for id in [1, 2, 3, 12] {
            journal
                .filenames
                .insert(FileId::new(id).unwrap(), name(id, 10 * id as usize));
        }
        journal
    }

    #[test]
    fn test_marshal_round_trip() {
        let journal = sample().with_intent(Intent::create(name(13, 40)));
        let decoded = Journal::unmarshal(&journal.marshal()).unwrap();
        assert_eq!(decoded, journal);

        assert_eq!(Journal::unmarshal(&Journal::new().marshal()).unwrap(), Journal::new());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = sample();
        let mut b = Journal::new();
        for (id, n) in a.filenames.iter().rev() {
            b.filenames.insert(*id, n.clone());
        }
        assert_eq!(a.marshal(), b.marshal());
        assert_eq!(a.object_name(), b.object_name());
    }

    #[test]
    fn test_object_name_binds_payload() {
        let journal = sample();
        let object = journal.object_name();
        let suffix = parse_journal_name(&object).unwrap();
        assert_eq!(suffix, sha1_hex(&journal.marshal()));
    }

    #[test]
    fn test_unmarshal_rejects_garbage() {
        let err = Journal::unmarshal(b"\x05garbage-bytes").unwrap_err();
        assert_eq!(err.status, ExitStatus::FileCorrupted);
    }

    #[test]
    fn test_unmarshal_rejects_mismatched_entry() {
        let mut msg = sample().to_proto();
        msg.filenames.insert(4, name(5, 10));
        let bytes = msg.encode_length_delimited_to_vec();
        assert_eq!(
            Journal::unmarshal(&bytes).unwrap_err().status,
            ExitStatus::FileCorrupted
        );
    }

    #[test]
    fn test_unmarshal_rejects_unspecified_intent() {
        let mut msg = sample().to_proto();
        msg.intent = Some(pb::Intent {
            file_operation: pb::FileOperation::Unspecified as i32,
            filename: name(3, 30),
        });
        let bytes = msg.encode_length_delimited_to_vec();
        assert!(Journal::unmarshal(&bytes).is_err());
    }

    #[test]
    fn test_resolved_applies_intent() {
        let base = sample();
        let created = name(13, 40);
        let resolved = base.with_intent(Intent::create(created.clone())).resolved();
        assert_eq!(resolved.filename(FileId::new(13).unwrap()), Some(created.as_str()));
        assert!(resolved.intent.is_none());

        let doomed = base.filename(FileId::new(12).unwrap()).unwrap().to_string();
        let resolved = base.with_intent(Intent::delete(doomed)).resolved();
        assert!(!resolved.contains(FileId::new(12).unwrap()));

        // A delete intent for a name the journal no longer holds is a no-op.
        let resolved = base.with_intent(Intent::delete(name(12, 999))).resolved();
        assert_eq!(resolved, base);
    }

    #[test]
    fn test_policy_helpers() {
        let journal = sample();
        assert_eq!(journal.churn_count(), 1);
        assert_eq!(journal.first_missing_persistent(), FileId::new(4).ok());
        assert!(!journal.is_empty());
        assert!(Journal::new().is_empty());
    }

    proptest! {
        #[test]
        fn prop_resolution_is_idempotent(
            entries in proptest::collection::btree_map(1i64..=50, 1usize..=64, 0..12),
            intent_id in 1i64..=50,
            intent_size in 1usize..=64,
            create in any::<bool>(),
        ) {
            let mut journal = Journal::new();
            for (id, size) in &entries {
                journal.filenames.insert(FileId::new(*id).unwrap(), name(*id, *size));
            }
            let intent_name = name(intent_id, intent_size);
            let intent = if create { Intent::create(intent_name) } else { Intent::delete(intent_name) };
            let pending = journal.with_intent(intent);

            let once = pending.resolved();
            prop_assert!(once.intent.is_none());
            prop_assert_eq!(once.resolved(), once.clone());
            prop_assert_eq!(Journal::unmarshal(&pending.marshal()).unwrap().resolved(), once);
        }
    }
}
