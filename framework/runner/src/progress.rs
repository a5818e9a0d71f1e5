use std::cmp::min;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gust_core::prelude::DelegatedShutdownListener;
use indicatif::{ProgressBar, ProgressStyle};

use crate::worker::WorkerAgent;

/// Displays a progress bar for time-bounded runs: elapsed time against the planned runtime,
/// plus the live virtual-user population sampled from the worker agent.
pub(crate) fn start_progress(
    planned_runtime: Duration,
    mut shutdown_listener: DelegatedShutdownListener,
    agent: Arc<WorkerAgent>,
) {
    std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start_time = Instant::now();
            let pb = ProgressBar::new(planned_runtime.as_secs());
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{wide_bar:.cyan/blue}] {pos}s / {len}s {msg}",
                )
                .expect("Failed to set progress style")
                .progress_chars("#>-"),
            );

            loop {
                if shutdown_listener.should_shutdown() {
                    pb.finish_and_clear();
                    break;
                }

                let elapsed = min(start_time.elapsed().as_secs(), planned_runtime.as_secs());
                pb.set_position(elapsed);
                pb.set_message(format!("{} users", agent.active_population()));
                std::thread::sleep(Duration::from_secs(1));
            }
        })
        .expect("Failed to start progress thread");
}
