use std::time::Duration;

use deferred_promise::{
    any, reduce, CancellationError, CompositeError, Deferred, EventLoop, Promise, Reason, Resolution,
};

/// Announces when the fetch future is torn down.
struct FetchSlot(&'static str);

impl Drop for FetchSlot {
    fn drop(&mut self) {
        println!("released fetch slot for {}", self.0)
    }
}

fn main() {
    let mut event_loop = EventLoop::new();

    let download = Deferred::with_canceller(|resolver| {
        println!("download cancelled");
        resolver.reject(CancellationError::default());
    });
    let fetched = event_loop.spawn_promise(async {
        let _slot = FetchSlot("cache");
        async {}.await;
        Ok::<_, Reason>("cached copy")
    });

    let first: Promise<&str> = any(vec![download.promise(), fetched]);
    match event_loop.block_on(&first) {
        Ok(body) => println!("first source answered: {}", body),
        Err(reason) => println!("every source failed: {}", reason),
    }
    download.promise().cancel();

    let failing: Promise<i32> = any(vec![
        Resolution::reject(CancellationError("mirror a".into())),
        Resolution::reject(CancellationError("mirror b".into())),
    ]);
    if let Err(reason) = event_loop.block_on(&failing) {
        if let Some(composite) = reason.downcast_ref::<CompositeError>() {
            println!("{} ({} reasons)", composite, composite.reasons().len());
        }
    }

    let sizes = reduce(
        vec![120, 80, 300],
        |total: u32, size: u32, index, count| {
            println!("chunk {}/{}: {} bytes", index + 1, count, size);
            Resolution::Value(total + size)
        },
        0,
    );
    match sizes.wait_timeout(&mut event_loop, Some(Duration::from_secs(1))) {
        Ok(total) => println!("total: {} bytes", total),
        Err(error) => println!("gave up: {}", error),
    }
}
