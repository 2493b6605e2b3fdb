use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use tracing::info;

use crate::cmd::{client_host, running_flag, WatchArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_point, OutputFormat, PointRecord};

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let host = client_host(&args.peers)?;
    let running = running_flag()?;

    let event = host.client_event(&args.point.node, &args.point.point);
    let (tx, rx) = channel::unbounded();
    event.add_handler(move |delivery| {
        let _ = tx.send(delivery);
    });
    let watched = args.point.clone();
    event.add_state_handler(move |state| info!(point = %watched, %state, "binding state"));
    event
        .register_interest()
        .map_err(|err| peer_error("register failed", err))?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let delivery = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(delivery) => delivery,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        print_point(&PointRecord::new("event", &delivery.point, &delivery.arg), format);
        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    drop(event);
    host.shutdown();
    Ok(SUCCESS)
}
