pub mod discovery;
pub mod import;
pub mod jobs;
pub mod normalization;
pub mod reconciliation;
pub mod scheduler;

pub use discovery::{HttpWordProposalClient, NullWordProposalClient, WordProposalClient, WordProposalResponse};
pub use import::{import_dicts_from_dir, ImportReport};
pub use normalization::{normalize, NormalizedMessage, Tokenizer};
pub use reconciliation::{reconcile, ReconciliationResult};
pub use scheduler::Scheduler;
