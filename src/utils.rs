//! Utility functions for id minting

use crate::error::{Error, Result};
use bech32::Bech32m;
use uuid7::uuid7;

pub const WORKFLOW_HRP: &str = "wf";
pub const STEP_HRP: &str = "step";
pub const REQUEST_HRP: &str = "req";

// construct a unique uuid then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| Error::Internal(e.to_string()))?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(encode)
}
