use std::time::Duration;
use thiserror::Error;

/// `CmdError` is the failure vocabulary a caller can observe for a
/// submitted command.
///
/// `Timeout` and `User` are *domain* failures: they describe the protected
/// call itself and feed the breaker statistics. `BreakerOpen` is a *policy*
/// failure: the call was never attempted, and it is tallied separately.
#[derive(Debug, Error)]
pub enum CmdError {
    /// The circuit breaker for this command key is open; the call was
    /// rejected without being attempted.
    #[error("circuit breaker open, accepting calls again in {remaining:?}")]
    BreakerOpen { remaining: Duration },
    /// The call did not produce a result within the configured call timeout.
    #[error("call timed out after {after:?}")]
    Timeout { after: Duration },
    /// The user-supplied command body failed.
    #[error("command failed: {cause}")]
    User { cause: crate::Error },
}

impl CmdError {
    pub fn user(cause: crate::Error) -> Self {
        CmdError::User { cause }
    }

    /// Domain failures count against the dependency's health; policy
    /// failures do not.
    pub fn is_domain_failure(&self) -> bool {
        matches!(self, CmdError::Timeout { .. } | CmdError::User { .. })
    }
}

pub type CmdResult<T> = std::result::Result<T, CmdError>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    #[test]
    fn taxonomy() {
        assert!(CmdError::user(Error::msg("boom")).is_domain_failure());
        assert!(CmdError::Timeout {
            after: Duration::from_millis(200)
        }
        .is_domain_failure());
        assert!(!CmdError::BreakerOpen {
            remaining: Duration::from_secs(5)
        }
        .is_domain_failure());
    }

    #[test]
    fn display() {
        let err = CmdError::Timeout {
            after: Duration::from_millis(200),
        };
        assert_eq!(format!("{}", err), "call timed out after 200ms");
    }
}
