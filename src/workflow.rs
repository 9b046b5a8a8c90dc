//! Workflow and step records

use crate::error::Result;
use crate::utils;
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Workflow {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub name: String, // unique across workflows
    #[n(2)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Step {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub workflow_id: String,
    #[n(2)]
    pub level: u32, // dense, starting at 1
    #[n(3)]
    pub actor: String,
    #[n(4)]
    pub conditions: Vec<u8>, // raw CBOR condition payload, empty when unset
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl Workflow {
    pub fn new(name: String) -> Result<Self> {
        Ok(Self {
            id: utils::new_uuid_to_bech32(utils::WORKFLOW_HRP)?,
            name,
            created_at: TimeStamp::new(),
        })
    }
}

impl Step {
    pub fn new(workflow_id: String, level: u32, actor: String, conditions: Vec<u8>) -> Result<Self> {
        Ok(Self {
            id: utils::new_uuid_to_bech32(utils::STEP_HRP)?,
            workflow_id,
            level,
            actor,
            conditions,
            created_at: TimeStamp::new(),
        })
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _: &mut C,
    ) -> std::result::Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
