use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("netgraph error: {0}")]
    Netgraph(String),

    #[error("link {0} not found")]
    LinkNotFound(usize),

    #[error("parent interface table is full")]
    ParentTableFull,

    /// The kernel has no Ethernet node type and loading its module failed.
    /// The one error the embedding daemon must treat as fatal.
    #[error("kernel node type \"{0}\" unavailable")]
    NodeTypeUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
