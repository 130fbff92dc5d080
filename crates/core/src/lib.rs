pub mod idempotency;
pub mod instruction;
pub mod models;
pub mod signature;

pub use idempotency::{IdempotencyKey, IdempotencyKeyFactory};
pub use instruction::{InstructionError, PaymentInstruction, Scheme};
pub use signature::{SignatureMaterial, VerificationOutcome};
