#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    InvalidAnswer(String),
    #[error("{0}")]
    InvalidPolicy(String),
}
