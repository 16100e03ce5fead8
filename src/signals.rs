/// Signal handling while the executor runs.
///
/// The executor shares our process group, so Ctrl-C reaches it directly.
/// The wrapper swallows SIGINT (and SIGTERM on Unix) so the executor gets
/// time to clean up; it exits on its own after a second Ctrl-C.
pub struct SignalGuard {
    task: tokio::task::JoinHandle<()>,
}

impl SignalGuard {
    /// Install the handlers. They stay active until the guard is dropped.
    #[cfg(unix)]
    pub fn install() -> std::io::Result<SignalGuard> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(()) = interrupt.recv() => {
                        tracing::debug!("SIGINT received, waiting for executor to exit");
                    }
                    Some(()) = terminate.recv() => {
                        tracing::debug!("SIGTERM received, waiting for executor to exit");
                    }
                    else => break,
                }
            }
        });
        Ok(SignalGuard { task })
    }

    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<SignalGuard> {
        let task = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("Ctrl-C received, waiting for executor to exit");
            }
        });
        Ok(SignalGuard { task })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
