use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed query: {0}")]
    MalformedQuery(&'static str),

    #[error("upstream {addr} failed: {source}")]
    UpstreamAttemptFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("all upstream servers failed")]
    AllUpstreamsFailed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
