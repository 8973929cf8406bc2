use thiserror::Error;

/// How the owning loop reacts to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Stay disconnected and probe again on the next re-probe interval.
    Reprobe,
    /// Drop the current transport, return to `Disconnected`, then re-probe.
    Demote,
    /// Discard the single offending command; no state change.
    Discard,
}

#[derive(Debug, Error)]
pub enum FcError {
    #[error("no flight controller transport available")]
    TransportAbsent,

    #[error("flight controller transport failed ({context}): {source}")]
    TransportFailed {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("rejected: {0}")]
    Unauthorized(&'static str),
}

impl FcError {
    pub fn io(context: &'static str, source: impl Into<std::io::Error>) -> Self {
        FcError::TransportFailed { context, source: source.into() }
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            FcError::TransportAbsent => Recovery::Reprobe,
            FcError::TransportFailed { .. } => Recovery::Demote,
            FcError::MalformedInput(_) | FcError::Unauthorized(_) => Recovery::Discard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_category_maps_to_one_policy() {
        assert_eq!(FcError::TransportAbsent.recovery(), Recovery::Reprobe);
        let broken = FcError::io("serial write", std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert_eq!(broken.recovery(), Recovery::Demote);
        assert_eq!(FcError::MalformedInput("NaN".into()).recovery(), Recovery::Discard);
        assert_eq!(FcError::Unauthorized("locked").recovery(), Recovery::Discard);
    }
}
