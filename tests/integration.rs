//! End-to-end scenarios spanning the heap, pool, sort, and reactor together,
//! the way a single query or a single IPC round trip would exercise them in
//! practice rather than in isolation.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayforce_core::heap::{Heap, HeapConfig};
use rayforce_core::pool::Pool;
use rayforce_core::reactor::{handshake, send_sync, Reactor, Response};
use rayforce_core::sort;
use rayforce_core::value::Value;

fn heap() -> Arc<Heap> {
    Heap::new(HeapConfig::default())
}

/// The IPC idempotence scenario (spec §8): a SYNC frame carrying `3` is
/// answered with a RESP frame carrying `3`, proving handshake, framing, and
/// dispatch compose correctly end to end.
#[test]
fn ipc_sync_request_gets_a_resp_reply() {
    let mut reactor = Reactor::bind("127.0.0.1:0", heap()).unwrap();
    let addr = reactor.local_addr().unwrap();

    let client = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        handshake(&mut stream, None).unwrap();
        let reply = send_sync(&mut stream, &Value::atom_i64(3)).unwrap();
        reply.as_atom_i64().unwrap()
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "timed out waiting for reply");
        reactor.step(Some(100), &mut |v| Response::Reply(v)).unwrap();
        if client.is_finished() {
            break;
        }
    }
    assert_eq!(client.join().unwrap(), 3);
}

/// A worker pool's parallel sort must produce the same ordering as a
/// straightforward sequential sort over a large enough input to take the
/// parallel-radix path rather than the below-threshold comparison path.
#[test]
fn parallel_sort_matches_sequential_reference_on_a_large_input() {
    let pool = Pool::create(4, HeapConfig::default());

    let mut rng_state = 0x2545F491_4F6CDD1Du64;
    let mut next = || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        (rng_state as i64) % 1_000_000
    };
    let data: Vec<i64> = (0..200_000).map(|_| next()).collect();

    let mut expected = data.clone();
    expected.sort();

    let mut actual = data;
    sort::parallel_sort_runs(&mut actual, &pool, |run| run.sort(), |a, b| a <= b);

    assert_eq!(actual, expected);
}
