//! Awaiting host requests
//!
//! One adapter per pending host operation. Callbacks are installed when the
//! adapter is called, not on first poll, and each adapter consumes its
//! request so it can never be adapted twice.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use futures::channel::oneshot;
use qntx_idb_host::{HostError, HostResult, HostTransaction, Pending};

use crate::error::{Error, Result};

pub(crate) type Sender<T> = Rc<RefCell<Option<oneshot::Sender<T>>>>;

pub(crate) fn send<T>(sender: &Sender<T>, value: T) {
    if let Some(tx) = sender.borrow_mut().take() {
        let _ = tx.send(value);
    }
}

pub(crate) fn dropped(what: &str) -> Error {
    Error::HostEngine(HostError::unknown(format!(
        "{} was dropped without completing",
        what
    )))
}

/// Resolve with the request's result or fail with its error, exactly once.
pub(crate) fn await_request<T: 'static>(request: Pending<T>) -> impl Future<Output = Result<T>> {
    let (tx, rx) = oneshot::channel::<HostResult<T>>();
    let on_success: Sender<HostResult<T>> = Rc::new(RefCell::new(Some(tx)));
    let on_error = Rc::clone(&on_success);
    request.set_callbacks(
        Box::new(move |value| send(&on_success, Ok(value))),
        Box::new(move |error| send(&on_error, Err(error))),
    );
    async move {
        match rx.await {
            Ok(result) => result.map_err(Error::from),
            Err(oneshot::Canceled) => Err(dropped("request")),
        }
    }
}

/// Resolve once the transaction commits; fail with the abort error, or
/// `AbortError` when the host reports none.
pub(crate) fn await_completion(transaction: &dyn HostTransaction) -> impl Future<Output = Result<()>> {
    let (tx, rx) = oneshot::channel::<Option<HostError>>();
    let on_complete: Sender<Option<HostError>> = Rc::new(RefCell::new(Some(tx)));
    let on_abort = Rc::clone(&on_complete);
    transaction.set_callbacks(
        Box::new(move || send(&on_complete, None)),
        Box::new(move |error| {
            let error = error.unwrap_or_else(|| HostError::abort("the transaction was aborted"));
            send(&on_abort, Some(error));
        }),
    );
    async move {
        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(error)) => Err(Error::from(error)),
            Err(oneshot::Canceled) => Err(dropped("transaction")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use qntx_idb_host::{HostErrorKind, HostRequest, OnError, OnSuccess};

    struct Immediate(HostResult<u32>);

    impl HostRequest<u32> for Immediate {
        fn set_callbacks(self: Box<Self>, on_success: OnSuccess<u32>, on_error: OnError) {
            match self.0 {
                Ok(value) => on_success(value),
                Err(error) => on_error(error),
            }
        }
    }

    struct Forgotten;

    impl HostRequest<u32> for Forgotten {
        fn set_callbacks(self: Box<Self>, _on_success: OnSuccess<u32>, _on_error: OnError) {}
    }

    #[test]
    fn test_success_and_failure() {
        assert_eq!(block_on(await_request(Box::new(Immediate(Ok(7))))).unwrap(), 7);

        let err = block_on(await_request(Box::new(Immediate(Err(HostError::data("bad"))))))
            .unwrap_err();
        assert_eq!(err.host_kind(), Some(HostErrorKind::Data));
    }

    #[test]
    fn test_dropped_callbacks_do_not_hang() {
        let err = block_on(await_request(Box::new(Forgotten))).unwrap_err();
        assert_eq!(err.host_kind(), Some(HostErrorKind::Unknown));
    }
}
