use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("serialisation failed: {0}")]
    Encode(#[from] postcard::Error),

    #[error("no route to {0}")]
    Unroutable(String),

    #[error("outbound channel closed")]
    ChannelClosed,
}
