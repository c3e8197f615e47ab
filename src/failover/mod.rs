//! Reader and writer failover handlers (spec.md §4.9, §4.10).

pub mod reader;
pub mod writer;

pub use reader::{ReaderFailoverHandler, ReaderFailoverResult};
pub use writer::{WriterFailoverHandler, WriterFailoverResult};

/// Which host role(s) failover is allowed to settle on (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailoverMode {
    /// Only a writer connection is acceptable; inside a transaction this
    /// means failover cannot recover and surfaces an unknown-resolution
    /// error instead of silently picking a reader.
    StrictWriter,
    /// Only a reader connection is acceptable.
    StrictReader,
    /// Either role is acceptable; a reader is preferred when one is
    /// reachable, falling back to the writer.
    #[default]
    ReaderOrWriter,
}

impl std::str::FromStr for FailoverMode {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict-writer" => Ok(Self::StrictWriter),
            "strict-reader" => Ok(Self::StrictReader),
            "reader-or-writer" => Ok(Self::ReaderOrWriter),
            other => Err(crate::error::Error::new(
                crate::error::ErrorKind::IllegalArgument {
                    message: format!("unknown failoverMode '{}'", other),
                },
            )),
        }
    }
}
