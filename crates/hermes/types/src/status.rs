//! Probe operations, API calls and exit statuses.
//!
//! These three enumerations are the label space of every latency
//! distribution Hermes emits. Each value has a stable snake_case label.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a probe operation or API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    OpTimeout,
    ProbeFailed,
    ApiCallFailed,
    FileMissing,
    BucketMissing,
    FileCorrupted,
    FileReadFailure,
    FileMetadataMismatch,
    UnknownFileFound,
    AllFilesMissing,
    StateJournalInconsistent,
    InvalidArgument,
    WriterCloseFailed,
}

impl ExitStatus {
    /// Every status, in declaration order.
    pub const ALL: [ExitStatus; 14] = [
        ExitStatus::Success,
        ExitStatus::OpTimeout,
        ExitStatus::ProbeFailed,
        ExitStatus::ApiCallFailed,
        ExitStatus::FileMissing,
        ExitStatus::BucketMissing,
        ExitStatus::FileCorrupted,
        ExitStatus::FileReadFailure,
        ExitStatus::FileMetadataMismatch,
        ExitStatus::UnknownFileFound,
        ExitStatus::AllFilesMissing,
        ExitStatus::StateJournalInconsistent,
        ExitStatus::InvalidArgument,
        ExitStatus::WriterCloseFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExitStatus::Success => "success",
            ExitStatus::OpTimeout => "op_timeout",
            ExitStatus::ProbeFailed => "probe_failed",
            ExitStatus::ApiCallFailed => "api_call_failed",
            ExitStatus::FileMissing => "file_missing",
            ExitStatus::BucketMissing => "bucket_missing",
            ExitStatus::FileCorrupted => "file_corrupted",
            ExitStatus::FileReadFailure => "file_read_failure",
            ExitStatus::FileMetadataMismatch => "file_metadata_mismatch",
            ExitStatus::UnknownFileFound => "unknown_file_found",
            ExitStatus::AllFilesMissing => "all_files_missing",
            ExitStatus::StateJournalInconsistent => "state_journal_inconsistent",
            ExitStatus::InvalidArgument => "invalid_argument",
            ExitStatus::WriterCloseFailed => "writer_close_failed",
        }
    }

    pub fn is_success(self) -> bool {
        self == ExitStatus::Success
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps of a probe run that are timed as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOperation {
    TotalProbeRun,
    CheckJournal,
    ReadFile,
    VerifyFileContents,
    DeleteFile,
    CreateFile,
}

impl ProbeOperation {
    pub const ALL: [ProbeOperation; 6] = [
        ProbeOperation::TotalProbeRun,
        ProbeOperation::CheckJournal,
        ProbeOperation::ReadFile,
        ProbeOperation::VerifyFileContents,
        ProbeOperation::DeleteFile,
        ProbeOperation::CreateFile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeOperation::TotalProbeRun => "total_probe_run",
            ProbeOperation::CheckJournal => "check_journal",
            ProbeOperation::ReadFile => "read_file",
            ProbeOperation::VerifyFileContents => "verify_file_contents",
            ProbeOperation::DeleteFile => "delete_file",
            ProbeOperation::CreateFile => "create_file",
        }
    }
}

impl fmt::Display for ProbeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual storage API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiCall {
    ListFiles,
    CreateFile,
    DeleteFile,
    GetFile,
}

impl ApiCall {
    pub const ALL: [ApiCall; 4] = [
        ApiCall::ListFiles,
        ApiCall::CreateFile,
        ApiCall::DeleteFile,
        ApiCall::GetFile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApiCall::ListFiles => "list_files",
            ApiCall::CreateFile => "create_file",
            ApiCall::DeleteFile => "delete_file",
            ApiCall::GetFile => "get_file",
        }
    }
}

impl fmt::Display for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_labels_are_unique() {
        let statuses: HashSet<_> = ExitStatus::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(statuses.len(), ExitStatus::ALL.len());

        let ops: HashSet<_> = ProbeOperation::ALL.iter().map(|o| o.as_str()).collect();
        assert_eq!(ops.len(), ProbeOperation::ALL.len());

        let calls: HashSet<_> = ApiCall::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(calls.len(), ApiCall::ALL.len());
    }

    #[test]
    fn test_serde_matches_labels() {
        for status in ExitStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
        let op: ProbeOperation = serde_json::from_str("\"verify_file_contents\"").unwrap();
        assert_eq!(op, ProbeOperation::VerifyFileContents);
    }
}
