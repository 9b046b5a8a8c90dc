//! Approval request records

use super::workflow::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Request {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub workflow_id: String,
    #[n(2)]
    pub current_step: u32, // step level the request currently sits at
    #[n(3)]
    pub status: RequestStatus,
    #[n(4)]
    pub amount: u64, // cumulative, in minor currency units
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

impl RequestStatus {
    /// Approved and rejected requests admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl Request {
    pub fn new(id: String, workflow_id: String, amount: u64, created_at: TimeStamp<Utc>) -> Self {
        Self {
            id,
            workflow_id,
            current_step: 1,
            status: RequestStatus::Pending,
            amount,
            created_at,
        }
    }
}
