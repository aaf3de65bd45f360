use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{self, Duration};

use harris_queue::{Leak, Locked, Queue, Reclaim};

const PRE_FILL_OPS: usize = 100;
const POP_PUSH_OPS: usize = 20_000;
const THREADS: usize = 4;

static COUNTERS: [ThreadCount; THREADS] = [
    ThreadCount(AtomicUsize::new(0)),
    ThreadCount(AtomicUsize::new(0)),
    ThreadCount(AtomicUsize::new(0)),
    ThreadCount(AtomicUsize::new(0)),
];

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
    println!("example: Harris' lock-free list as an MPMC queue");

    run_timed::<Locked>("locked");
    run_timed::<Leak>("leak");
    #[cfg(target_pointer_width = "64")]
    run_timed::<harris_queue::RefCounted>("reference counted");

    waiting_consumer();
}

#[inline]
fn run_timed<R: Reclaim>(name: &str) {
    for ThreadCount(counter) in &COUNTERS {
        counter.store(0, Ordering::Relaxed);
    }

    let queue: Arc<Queue<DropCount<'static>, R>> = Arc::new(Queue::new());
    let now = time::Instant::now();
    run_example(queue);
    println!("time with {} reclamation: {} ms", name, now.elapsed().as_millis());
}

#[inline]
fn run_example<R: Reclaim>(queue: Arc<Queue<DropCount<'static>, R>>) {
    let handles: Vec<_> = (0..THREADS)
        .map(|id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let ThreadCount(counter) = &COUNTERS[id];
                for _ in 0..PRE_FILL_OPS {
                    queue.push_back(DropCount(counter));
                }

                for _ in 0..POP_PUSH_OPS {
                    let _ = queue.pop_front();
                    queue.push_back(DropCount(counter));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    println!("all joined, {} elements remaining", queue.len_hint());

    mem::drop(queue);
    let drop_sum: usize =
        COUNTERS.iter().map(|ThreadCount(count)| count.load(Ordering::Relaxed)).sum();

    assert_eq!(THREADS * (PRE_FILL_OPS + POP_PUSH_OPS), drop_sum);
}

fn waiting_consumer() {
    let queue: Arc<Queue<&'static str>> = Arc::new(Queue::new());

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || loop {
            if queue.wait_for(Duration::from_millis(500)).timed_out() {
                println!("consumer timed out, exiting");
                return;
            }

            if let Some(msg) = queue.pop_front() {
                println!("consumer received: {}", msg);
            }
        })
    };

    for msg in ["hello", "from", "the", "producer"] {
        queue.push_back(msg);
        thread::sleep(Duration::from_millis(50));
    }

    consumer.join().unwrap();
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ThreadCount
////////////////////////////////////////////////////////////////////////////////////////////////////

#[repr(align(64))]
struct ThreadCount(AtomicUsize);

////////////////////////////////////////////////////////////////////////////////////////////////////
// DropCount
////////////////////////////////////////////////////////////////////////////////////////////////////

struct DropCount<'a>(&'a AtomicUsize);
impl Drop for DropCount<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}
