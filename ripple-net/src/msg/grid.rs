use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use serde_repr::*;

/// Identifier of a grid job, unique among outstanding jobs.
pub type JobId = u32;

/// Kinds of messages exchanged between grid coordinator and workers.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, TryFromPrimitive, Deserialize_repr, Serialize_repr,
)]
#[repr(u8)]
pub enum GridMessageType {
    /// Job was computed and the result is correct
    CompSuccessful = 1,
    /// Job was computed but the result is incorrect
    CompIncorrect = 2,
    /// Computing the job failed, coordinator should hand it out again
    CompError = 3,
    /// Worker joins the grid
    Register = 4,
    /// Worker leaves the grid
    Unregister = 5,
    /// Worker asks for another job
    NewData = 6,
    /// Static data shared by all the jobs
    InitData = 100,
    /// Job payload
    CompData = 101,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GridMessage {
    pub type_: GridMessageType,
    pub job_id: JobId,
    pub data: Option<Vec<u8>>,
}

impl GridMessage {
    pub fn new(type_: GridMessageType) -> Self {
        Self {
            type_,
            job_id: 0,
            data: None,
        }
    }

    pub fn with_job(type_: GridMessageType, job_id: JobId) -> Self {
        Self {
            type_,
            job_id,
            data: None,
        }
    }

    pub fn with_data(type_: GridMessageType, job_id: JobId, data: Vec<u8>) -> Self {
        Self {
            type_,
            job_id,
            data: Some(data),
        }
    }
}

#[test]
fn grid_codes_are_stable() {
    use std::convert::TryFrom;
    assert_eq!(GridMessageType::CompSuccessful as u8, 1);
    assert_eq!(GridMessageType::CompError as u8, 3);
    assert_eq!(GridMessageType::NewData as u8, 6);
    assert_eq!(GridMessageType::CompData as u8, 101);
    assert_eq!(
        GridMessageType::try_from(100).unwrap(),
        GridMessageType::InitData
    );
    assert!(GridMessageType::try_from(7).is_err());
}
