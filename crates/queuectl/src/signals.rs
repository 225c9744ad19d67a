//! SIGTERM/SIGINT handling shared by the Worker and the WorkerManager
//! (spec §4.2/§4.3 treat the two signals interchangeably).

#[cfg(unix)]
pub async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
pub async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(unix)]
pub fn send_terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
pub fn send_terminate(_pid: u32) {}
