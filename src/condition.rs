//! Step condition payloads and their codec.
//!
//! A step's conditions are stored as a raw CBOR blob on the step record. An
//! absent payload is legal and decodes to the zero-value conditions; anything
//! non-empty must be well formed or decoding fails loudly.

use crate::error::{Error, Result};

/// How a step's approval is gated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ApprovalType {
    /// No approval mode recorded on the step.
    #[default]
    #[n(0)]
    Unspecified,
    /// Approval completes automatically once the cumulative threshold is met.
    #[n(1)]
    Api,
    /// Approval always waits for an explicit sign-off, amount notwithstanding.
    #[n(2)]
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct StepConditions {
    #[n(0)]
    pub min_amount: u64,
    #[n(1)]
    pub approval_type: ApprovalType,
}

/// Decode a step's raw condition payload. Empty input is not an error.
pub fn decode(raw: &[u8]) -> Result<StepConditions> {
    if raw.is_empty() {
        return Ok(StepConditions::default());
    }
    Ok(minicbor::decode(raw)?)
}

/// Extract just the minimum amount, with the same emptiness rule as [`decode`].
pub fn min_amount(raw: &[u8]) -> Result<u64> {
    decode(raw).map(|c| c.min_amount)
}

/// Serialize conditions for storage on a step record. The engine itself never
/// encodes; only step record management goes through here.
pub fn encode(conditions: &StepConditions) -> Result<Vec<u8>> {
    minicbor::to_vec(conditions).map_err(|e| Error::Encode(e.to_string()))
}
