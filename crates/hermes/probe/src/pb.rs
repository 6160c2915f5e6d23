//! Protobuf types for the journal object.

pub mod hermes {
    pub mod v1 {
        include!("generated/hermes.v1.rs");
    }
}
