use gust_core::prelude::ShutdownHandle;
use tokio::signal;

pub(crate) fn start_shutdown_listener(runtime: &tokio::runtime::Runtime) -> ShutdownHandle {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if signal::ctrl_c().await.is_err() {
            log::warn!("Failed to install Ctrl-C handler, interactive shutdown unavailable");
            return;
        }
        log::info!("Received shutdown signal, draining virtual users...");
        listener_handle.shutdown();
    });

    handle
}
