mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use nfcsdk::ntag::Tag;
use nfcsdk::scard::{codes, Disposition, ReaderStateFlags};
use nfcsdk::{CancellationToken, Error, Sdk};

use common::{empty, init_tracing, present, Step, Stub};

fn sdk(stub: Stub, token: &CancellationToken) -> (Arc<Stub>, Sdk<Stub>) {
    init_tracing();

    let stub = Arc::new(stub);
    let sdk = Sdk::new(Arc::clone(&stub), token.clone(), None).unwrap();

    (stub, sdk)
}

#[test]
fn test_one_present_event_one_callback() {
    let token = CancellationToken::new();
    let (stub, sdk) = sdk(
        Stub::new(&["ACS ACR122U 00 00"])
            .with_script(vec![Step::Events(vec![empty()]), Step::Events(vec![present()])])
            .cancel_when_exhausted(&token),
        &token,
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    sdk.on_card_present(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    sdk.run().unwrap();

    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(1, stub.counters.connects());
    assert_eq!(1, stub.counters.disconnects());
    assert_eq!(vec![Disposition::Reset], *stub.dispositions.lock());
    assert_eq!(1, stub.counters.releases());
    assert!(sdk.disposed());
}

#[test]
fn test_failing_callback_still_disconnects() {
    let token = CancellationToken::new();
    let (stub, sdk) = sdk(
        Stub::new(&["ACS ACR122U 00 00"])
            .with_script(vec![Step::Events(vec![present()])])
            .cancel_when_exhausted(&token),
        &token,
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    sdk.on_card_present(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        Err("unsupported tag".into())
    });

    // Callback failures are not fatal.
    sdk.run().unwrap();

    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(1, stub.counters.disconnects());
    assert_eq!(1, stub.counters.releases());
}

#[test]
fn test_failing_callback_and_disconnect_keep_polling() {
    let token = CancellationToken::new();
    let stub = Stub::new(&["ACS ACR122U 00 00"])
        .with_script(vec![
            Step::Events(vec![present()]),
            Step::Events(vec![empty()]),
            Step::Events(vec![present()]),
        ])
        .cancel_when_exhausted(&token);
    stub.fail_disconnect.store(true, Ordering::SeqCst);
    let (stub, sdk) = sdk(stub, &token);

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    sdk.on_card_present(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        Err("unsupported tag".into())
    });

    sdk.run().unwrap();

    assert_eq!(2, calls.load(Ordering::SeqCst));
    assert_eq!(2, stub.counters.connects());
    assert_eq!(2, stub.counters.disconnects());
    assert_eq!(
        vec![Disposition::Reset, Disposition::Reset],
        *stub.dispositions.lock(),
    );
    assert_eq!(4, stub.waited_on.lock().len());
    assert_eq!(1, stub.counters.releases());
}

#[test]
fn test_failed_cancel_is_retried() {
    let token = CancellationToken::new();
    let stub = Stub::new(&["Reader A"]).cancel_when_exhausted(&token);
    stub.failing_cancels.store(1, Ordering::SeqCst);
    let (stub, sdk) = sdk(stub, &token);

    let err = sdk.run().unwrap_err();

    assert_eq!(codes::NO_SERVICE, scard_code(&err));
    assert!(stub.counters.cancels() >= 2);
    assert_eq!(1, stub.counters.releases());
    assert!(sdk.disposed());
}

#[test]
fn test_present_edges_only() {
    let token = CancellationToken::new();
    let (stub, sdk) = sdk(
        Stub::new(&["ACS ACR122U 00 00"])
            .with_script(vec![
                Step::Events(vec![present()]),
                Step::Events(vec![present() | ReaderStateFlags::IN_USE]),
                Step::Events(vec![empty()]),
                Step::Events(vec![present()]),
            ])
            .cancel_when_exhausted(&token),
        &token,
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    sdk.on_card_present(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    sdk.run().unwrap();

    assert_eq!(2, calls.load(Ordering::SeqCst));
    assert_eq!(2, stub.counters.disconnects());
}

#[test]
fn test_cancel_stops_callbacks() {
    let token = CancellationToken::new();
    let (stub, sdk) = sdk(
        Stub::new(&["ACS ACR122U 00 00"]).with_script(vec![
            Step::Events(vec![present()]),
            Step::Events(vec![empty()]),
            Step::Events(vec![present()]),
        ]),
        &token,
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let cancel = token.clone();
    sdk.on_card_present(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        cancel.cancel();
        Ok(())
    });

    sdk.run().unwrap();

    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(1, stub.counters.disconnects());
    assert_eq!(1, stub.counters.releases());

    // Dropping after the run must not release the context again.
    drop(sdk);
    assert_eq!(1, stub.counters.releases());
}

#[test]
fn test_default_selection_uses_first_reader() {
    let token = CancellationToken::new();
    let (stub, sdk) = sdk(
        Stub::new(&["Reader A", "Reader B"]).cancel_when_exhausted(&token),
        &token,
    );

    sdk.run().unwrap();

    assert_eq!(vec![vec!["Reader A".to_owned()]], *stub.waited_on.lock());

    let readers = sdk.readers();
    assert_eq!(1, readers[0].id());
    assert!(readers[0].in_use);
    assert_eq!(2, readers[1].id());
    assert!(!readers[1].in_use);
}

#[test]
fn test_select_reader_once() {
    let token = CancellationToken::new();
    let (stub, sdk) = sdk(
        Stub::new(&["Reader A", "Reader B"]).cancel_when_exhausted(&token),
        &token,
    );

    sdk.select_reader(|mut readers| {
        for reader in readers.iter_mut() {
            reader.in_use = reader.name().ends_with('B');
        }
        Ok(readers)
    });
    sdk.select_reader(|_| Err("must be ignored".into()));

    sdk.run().unwrap();

    assert_eq!(vec![vec!["Reader B".to_owned()]], *stub.waited_on.lock());
}

#[test]
fn test_no_readers_enabled() {
    let token = CancellationToken::new();
    let (stub, sdk) = sdk(Stub::new(&["Reader A"]), &token);

    sdk.select_reader(|readers| Ok(readers));

    assert!(matches!(sdk.run(), Err(Error::NoReadersEnabled)));
    assert!(token.is_cancelled());
    assert_eq!(0, stub.counters.connects());
    assert_eq!(1, stub.counters.releases());
}

#[test]
fn test_reader_select_failure() {
    let token = CancellationToken::new();
    let (_, sdk) = sdk(Stub::new(&["Reader A"]), &token);

    sdk.select_reader(|_| Err("no reader matches \"SCM\"".into()));

    let err = sdk.run().unwrap_err();

    assert!(matches!(err, Error::ReaderSelect(_)));
    assert_eq!(
        "reader selection failed: no reader matches \"SCM\"",
        err.to_string(),
    );
}

#[test]
fn test_no_readers_present() {
    init_tracing();

    let stub = Arc::new(Stub::new(&[]));
    let result = Sdk::new(Arc::clone(&stub), CancellationToken::new(), None);

    assert!(matches!(result, Err(Error::NoReaders)));
    assert_eq!(1, stub.counters.releases());
}

#[test]
fn test_invalid_context_is_fatal() {
    let token = CancellationToken::new();
    let (stub, sdk) = sdk(
        Stub::new(&["Reader A"]).with_script(vec![Step::Invalidate]),
        &token,
    );

    let err = sdk.run().unwrap_err();

    assert_eq!(codes::INVALID_HANDLE, scard_code(&err));
    assert!(token.is_cancelled());
    assert_eq!(1, stub.counters.releases());
}

#[test]
fn test_status_change_failure_is_fatal() {
    let token = CancellationToken::new();
    let (stub, sdk) = sdk(
        Stub::new(&["Reader A"]).with_script(vec![Step::Fail(codes::READER_UNAVAILABLE)]),
        &token,
    );

    let err = sdk.run().unwrap_err();

    assert_eq!(codes::READER_UNAVAILABLE, scard_code(&err));
    assert_eq!(1, stub.counters.releases());
}

#[test]
fn test_connect_failure_keeps_polling() {
    let token = CancellationToken::new();
    let stub = Stub::new(&["Reader A"])
        .with_script(vec![Step::Events(vec![present()])])
        .cancel_when_exhausted(&token);
    stub.fail_connect.store(true, Ordering::SeqCst);
    let (stub, sdk) = sdk(stub, &token);

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    sdk.on_card_present(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    sdk.run().unwrap();

    assert_eq!(0, calls.load(Ordering::SeqCst));
    assert_eq!(0, stub.counters.disconnects());
    assert_eq!(2, stub.waited_on.lock().len());
}

#[test]
fn test_handler_reads_uid() {
    let token = CancellationToken::new();
    let (_, sdk) = sdk(
        Stub::new(&["Reader A"])
            .with_script(vec![Step::Events(vec![present()])])
            .with_answers(vec![vec![
                0x04, 0x5A, 0x3B, 0x92, 0xC1, 0x6F, 0x80, 0x90, 0x00,
            ]])
            .cancel_when_exhausted(&token),
        &token,
    );

    let uid = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&uid);
    sdk.on_card_present(move |card| {
        *seen.lock() = card.uid()?;
        Ok(())
    });

    sdk.run().unwrap();

    assert_eq!(vec![0x04, 0x5A, 0x3B, 0x92, 0xC1, 0x6F, 0x80], *uid.lock());
}

fn scard_code(err: &Error) -> u32 {
    match err {
        Error::Scard(e) => e.code(),
        other => panic!("unexpected error: {}", other),
    }
}
