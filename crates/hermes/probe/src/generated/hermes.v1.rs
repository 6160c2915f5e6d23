// @generated
// Generated from: proto/hermes/v1/journal.proto
// Manual check-in for offline builds.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Intent {
    #[prost(enumeration = "FileOperation", tag = "1")]
    pub file_operation: i32,
    #[prost(string, tag = "2")]
    pub filename: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StateJournal {
    #[prost(message, optional, tag = "1")]
    pub intent: ::core::option::Option<Intent>,
    #[prost(btree_map = "int32, string", tag = "2")]
    pub filenames: ::prost::alloc::collections::BTreeMap<i32, ::prost::alloc::string::String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FileOperation {
    Unspecified = 0,
    Create = 1,
    Delete = 2,
}

impl FileOperation {
    /// String value of the enum field names used in the ProtoBuf definition.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Unspecified => "FILE_OPERATION_UNSPECIFIED",
            Self::Create => "FILE_OPERATION_CREATE",
            Self::Delete => "FILE_OPERATION_DELETE",
        }
    }

    /// Creates an enum from field names used in the ProtoBuf definition.
    pub fn from_str_name(value: &str) -> ::core::option::Option<Self> {
        match value {
            "FILE_OPERATION_UNSPECIFIED" => Some(Self::Unspecified),
            "FILE_OPERATION_CREATE" => Some(Self::Create),
            "FILE_OPERATION_DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}
