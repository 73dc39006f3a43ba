//! Top-level facade crate for gadq.
//!
//! One dependency for embedders: token types and signing from `core`,
//! the policy gate, audit log and run orchestrator from `gateway`.

pub mod core {
    pub use gadq_core::*;
}

pub mod gateway {
    pub use gadq_gateway::*;
}
