//! Reactor-level tests against a real io_uring instance.

use std::future::Future;
use std::pin::pin;
use std::task::Poll;
use std::time::{Duration, Instant};

use ringherd::reactor::DEFAULT_RING_DEPTH;
use ringherd::{AsyncFile, FileOption, Reactor, ReactorPool};

#[test]
fn nop_completes_with_zero() {
    let reactor = Reactor::new(DEFAULT_RING_DEPTH);
    let result = reactor.run_until_done(async { reactor.nop().await }).unwrap();
    assert_eq!(result, 0);
}

#[test]
fn completions_resume_in_kernel_order() {
    let reactor = Reactor::new(DEFAULT_RING_DEPTH);

    let order = reactor.run_until_done(async {
        let mut slow = pin!(reactor.timeout(Duration::from_millis(60)));
        let mut medium = pin!(reactor.timeout(Duration::from_millis(30)));
        let mut fast = pin!(reactor.timeout(Duration::from_millis(10)));
        let mut done = [false; 3];
        let mut order = Vec::new();

        std::future::poll_fn(|cx| {
            let polls = [
                if done[0] { Poll::Pending } else { slow.as_mut().poll(cx) },
                if done[1] { Poll::Pending } else { medium.as_mut().poll(cx) },
                if done[2] { Poll::Pending } else { fast.as_mut().poll(cx) },
            ];
            for (i, poll) in polls.into_iter().enumerate() {
                if let Poll::Ready(result) = poll {
                    assert_eq!(result, -libc::ETIME);
                    done[i] = true;
                    order.push(i);
                }
            }
            if done.iter().all(|d| *d) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await;
        order
    });
    let order = order.unwrap();

    // Shortest timeout first: kernel completion order, not submission order.
    assert_eq!(order, vec![2, 1, 0]);
}

#[test]
fn timeout_respects_its_duration() {
    let reactor = Reactor::new(DEFAULT_RING_DEPTH);
    let started = Instant::now();
    let result = reactor
        .run_until_done(reactor.timeout(Duration::from_millis(50)))
        .unwrap();
    assert_eq!(result, -libc::ETIME);
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn attached_reactor_still_completes() {
    let pool = ReactorPool::new(2, DEFAULT_RING_DEPTH);
    let primary = pool.get(0);
    let attached = pool.get(1);
    assert_eq!(
        primary.run_until_done(async { primary.nop().await }).unwrap(),
        0
    );
    assert_eq!(
        attached
            .run_until_done(async { attached.nop().await })
            .unwrap(),
        0
    );
}

#[test]
fn file_write_then_read_round_trip() {
    let reactor = Reactor::new(DEFAULT_RING_DEPTH);
    let path = std::env::temp_dir().join(format!("ringherd-file-test-{}", std::process::id()));
    let payload = b"ringherd file io";

    reactor
        .run_until_done(async {
            let mut file = AsyncFile::new(&reactor, &path, FileOption::ReadWriteTruncate).unwrap();
            file.open().await.unwrap();
            let written = file.write(payload, 0).await.unwrap();
            assert_eq!(written, payload.len());
            file.sync(false).await.unwrap();
            file.close().await.unwrap();
        })
        .unwrap();

    reactor
        .run_until_done(async {
            let mut file = AsyncFile::new(&reactor, &path, FileOption::ReadOnly).unwrap();
            file.open().await.unwrap();
            assert_eq!(file.size().await.unwrap(), payload.len() as u64);
            let mut buf = vec![0u8; payload.len()];
            let read = file.read(&mut buf, 0).await.unwrap();
            assert_eq!(read, payload.len());
            assert_eq!(&buf, payload);
            file.close().await.unwrap();
        })
        .unwrap();

    let _ = std::fs::remove_file(&path);
}
