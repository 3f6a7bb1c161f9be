use crate::command::CommandError;
use crate::ntag;
use crate::response::StatusWord;
use crate::scard::ScardError;

/// Error returned by application callbacks and post-process functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{command}: {}", join(.errors))]
    Construction {
        command: String,
        errors: Vec<CommandError>,
    },

    #[error(transparent)]
    Scard(#[from] ScardError),

    #[error("{source}: command {command}")]
    Transmit {
        command: String,
        #[source]
        source: ScardError,
    },

    #[error("no sw1 and sw2 returned for {command}")]
    MissingStatusWord { command: String },

    #[error("{command}: {source}")]
    PostProcess {
        command: String,
        #[source]
        source: BoxError,
    },

    #[error("{command}: {status}")]
    Status { command: String, status: StatusWord },

    #[error(transparent)]
    Ntag(#[from] ntag::Error),

    #[error("no readers present")]
    NoReaders,

    #[error("no readers enabled")]
    NoReadersEnabled,

    #[error("reader selection failed: {0}")]
    ReaderSelect(#[source] BoxError),

    #[error("card handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("failed to spawn the poller thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("sdk already disposed")]
    Disposed,

    #[error("poller thread panicked")]
    PollerPanicked,

    #[error("{}", join(.0))]
    Aggregate(Vec<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Joins two errors without dropping either of them.
    pub fn join(self, other: Error) -> Error {
        let mut errors = match self {
            Error::Aggregate(errors) => errors,
            error => vec![error],
        };

        match other {
            Error::Aggregate(mut others) => errors.append(&mut others),
            error => errors.push(error),
        }

        Error::Aggregate(errors)
    }

    /// Joins all errors, returning `None` when there are none.
    pub(crate) fn join_all(errors: impl IntoIterator<Item = Error>) -> Option<Error> {
        let mut errors = errors.into_iter().collect::<Vec<_>>();
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }
}

fn join<T: ToString>(errors: &[T]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        let err = Error::NoReaders
            .join(Error::NoReadersEnabled)
            .join(Error::NoReaders.join(Error::NoReadersEnabled));

        match &err {
            Error::Aggregate(errors) => assert_eq!(4, errors.len()),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(
            "no readers present; no readers enabled; no readers present; no readers enabled",
            err.to_string(),
        );
    }

    #[test]
    fn test_join_all() {
        assert!(Error::join_all(vec![]).is_none());
        assert!(matches!(
            Error::join_all(vec![Error::NoReaders]),
            Some(Error::NoReaders),
        ));
    }
}
