use b24bot_core::lookup::LookupError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Bitrix24 request failed: {0}")]
    Lookup(#[from] LookupError),

    #[error("Failed to read input: {0}")]
    Input(#[from] std::io::Error),
}
