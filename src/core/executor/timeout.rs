use super::Msg;
use crate::base::{CmdError, CmdResult};
use crate::Error;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Race a call's outcome against its deadline and deliver the decision to
/// the executor mailbox. The race resolves exactly once; whatever the
/// losing side produces later is dropped on the closed channel, so a late
/// success does not retroactively succeed.
pub(crate) fn watch<T: Send + 'static>(
    id: u64,
    outcome: oneshot::Receiver<crate::Result<T>>,
    call_timeout: Duration,
    mailbox: mpsc::UnboundedSender<Msg<T>>,
) {
    tokio::spawn(async move {
        let result = race(outcome, call_timeout).await;
        let _ = mailbox.send(Msg::Completed { id, result });
    });
}

async fn race<T>(
    outcome: oneshot::Receiver<crate::Result<T>>,
    call_timeout: Duration,
) -> CmdResult<T> {
    if call_timeout.is_zero() {
        // zero disables the deadline
        return settle(outcome.await);
    }
    tokio::select! {
        out = outcome => settle(out),
        _ = tokio::time::sleep(call_timeout) => Err(CmdError::Timeout { after: call_timeout }),
    }
}

fn settle<T>(out: Result<crate::Result<T>, oneshot::error::RecvError>) -> CmdResult<T> {
    match out {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(CmdError::user(err)),
        // the worker dropped its sender without sending: a panicked body
        Err(_) => Err(CmdError::user(Error::msg(
            "command terminated without producing a result",
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn decided<T: Send + 'static>(
        rx: &mut mpsc::UnboundedReceiver<Msg<T>>,
    ) -> (u64, CmdResult<T>) {
        match rx.recv().await.unwrap() {
            Msg::Completed { id, result } => (id, result),
            _ => panic!("expected a Completed message"),
        }
    }

    #[tokio::test]
    async fn work_wins() {
        let (mailbox, mut rx) = mpsc::unbounded_channel();
        let (tx, outcome) = oneshot::channel();
        watch(1, outcome, Duration::from_millis(200), mailbox);
        tx.send(Ok("fast")).unwrap();
        let (id, result) = decided(&mut rx).await;
        assert_eq!(id, 1);
        assert_eq!(result.unwrap(), "fast");
    }

    #[tokio::test]
    async fn timer_wins_and_late_completion_is_dropped() {
        let (mailbox, mut rx) = mpsc::unbounded_channel();
        let (tx, outcome) = oneshot::channel::<crate::Result<&str>>();
        watch(2, outcome, Duration::from_millis(30), mailbox);
        let (id, result) = decided(&mut rx).await;
        assert_eq!(id, 2);
        assert!(matches!(
            result,
            Err(CmdError::Timeout { after }) if after == Duration::from_millis(30)
        ));
        // the receiving side is gone, the late success goes nowhere
        assert!(tx.send(Ok("late")).is_err());
    }

    #[tokio::test]
    async fn zero_disables_the_deadline() {
        let (mailbox, mut rx) = mpsc::unbounded_channel();
        let (tx, outcome) = oneshot::channel();
        watch(3, outcome, Duration::ZERO, mailbox);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(Ok(7u32)).unwrap();
        let (_, result) = decided(&mut rx).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn user_error_passes_through() {
        let (mailbox, mut rx) = mpsc::unbounded_channel();
        let (tx, outcome) = oneshot::channel::<crate::Result<u32>>();
        watch(4, outcome, Duration::from_millis(200), mailbox);
        tx.send(Err(Error::msg("boom"))).unwrap();
        let (_, result) = decided(&mut rx).await;
        assert!(matches!(result, Err(CmdError::User { .. })));
    }

    #[tokio::test]
    async fn dropped_worker_is_an_error_not_a_crash() {
        let (mailbox, mut rx) = mpsc::unbounded_channel();
        let (tx, outcome) = oneshot::channel::<crate::Result<u32>>();
        watch(5, outcome, Duration::from_millis(200), mailbox);
        drop(tx);
        let (_, result) = decided(&mut rx).await;
        assert!(matches!(result, Err(CmdError::User { .. })));
    }
}
