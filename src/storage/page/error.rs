use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Not enough free space on page")]
    InsufficientSpace,

    #[error("Invalid record ID")]
    InvalidRecordId,

    #[error("Record not found (deleted or never inserted)")]
    RecordNotFound,
}
