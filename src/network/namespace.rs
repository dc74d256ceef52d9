//! Network namespace operations
//!
//! Namespace membership belongs to a single OS thread. Work that has to run
//! inside a container namespace is therefore handed to a dedicated worker
//! thread which switches in, drives the work to completion on its own
//! single-threaded runtime, and switches back before it exits.

use nix::sched::{setns, CloneFlags};
use nix::sys::statfs::{fstatfs, NSFS_MAGIC};
use std::fs::File;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{error, trace, warn};

use crate::error::{AppError, NetworkError, SwitchPhase};
use crate::network::NetworkNamespace;

const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Thread level namespace switching primitive
pub trait NamespaceSwitcher: Send + Sync + 'static {
    /// Token describing the namespace a thread was in before switching
    type Saved;

    fn resolve(&self, path: &Path) -> Result<NetworkNamespace, NetworkError>;

    fn capture(&self) -> Result<Self::Saved, NetworkError>;

    fn enter(&self, target: &NetworkNamespace) -> Result<(), NetworkError>;

    fn restore(&self, original: Self::Saved) -> Result<(), NetworkError>;
}

/// Namespace switching through `setns(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelNamespaces;

impl NamespaceSwitcher for KernelNamespaces {
    type Saved = File;

    fn resolve(&self, path: &Path) -> Result<NetworkNamespace, NetworkError> {
        if path.as_os_str().is_empty() {
            return Err(NetworkError::NamespaceResolution {
                path: path.to_path_buf(),
                reason: "empty namespace path".to_string(),
            });
        }
        let unresolved = |reason: String| NetworkError::NamespaceResolution {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| unresolved(e.to_string()))?;
        let fs = fstatfs(&file).map_err(|e| unresolved(e.to_string()))?;
        if fs.filesystem_type() != NSFS_MAGIC {
            return Err(unresolved("not a network namespace file".to_string()));
        }
        Ok(NetworkNamespace::new(path, Some(file.into())))
    }

    fn capture(&self) -> Result<File, NetworkError> {
        File::open(THREAD_NETNS).map_err(|e| NetworkError::NamespaceSwitch {
            phase: SwitchPhase::Capture,
            reason: e.to_string(),
        })
    }

    fn enter(&self, target: &NetworkNamespace) -> Result<(), NetworkError> {
        let fd = target.fd().ok_or_else(|| NetworkError::NamespaceSwitch {
            phase: SwitchPhase::Enter,
            reason: format!("{} has no open descriptor", target.path().display()),
        })?;
        setns(fd, CloneFlags::CLONE_NEWNET).map_err(|e| NetworkError::NamespaceSwitch {
            phase: SwitchPhase::Enter,
            reason: format!("{}: {}", target.path().display(), e),
        })
    }

    fn restore(&self, original: File) -> Result<(), NetworkError> {
        setns(&original, CloneFlags::CLONE_NEWNET).map_err(|e| NetworkError::NamespaceSwitch {
            phase: SwitchPhase::Restore,
            reason: e.to_string(),
        })
    }
}

/// Run `work` on the current thread with its namespace switched to `target`.
///
/// The original namespace is restored on every exit path. A failed restore
/// wins over the work's own result since the thread state is then unknown.
/// Panics from `work` are re-raised after the restore.
pub fn run_in_namespace<S, F, T>(
    switcher: &S,
    target: &NetworkNamespace,
    work: F,
) -> Result<T, AppError>
where
    S: NamespaceSwitcher + ?Sized,
    F: FnOnce() -> Result<T, AppError>,
{
    let original = switcher.capture()?;
    switcher.enter(target)?;
    trace!(namespace = %target.path().display(), "entered network namespace");

    let outcome = panic::catch_unwind(AssertUnwindSafe(work));
    let restored = switcher.restore(original);

    match (outcome, restored) {
        (Ok(result), Ok(())) => {
            trace!(namespace = %target.path().display(), "restored original network namespace");
            result
        }
        (Ok(result), Err(e)) => {
            if let Err(discarded) = result {
                warn!(error = %discarded, "discarding work error after failed namespace restore");
            }
            error!(error = %e, "failed to restore network namespace");
            Err(e.into())
        }
        (Err(payload), Ok(())) => panic::resume_unwind(payload),
        (Err(payload), Err(e)) => {
            error!(error = %e, "failed to restore network namespace after panic");
            panic::resume_unwind(payload)
        }
    }
}

/// Runs units of work inside network namespaces on pinned worker threads
pub struct NamespaceExecutor<S> {
    switcher: Arc<S>,
}

impl<S> Clone for NamespaceExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            switcher: Arc::clone(&self.switcher),
        }
    }
}

impl<S: NamespaceSwitcher> NamespaceExecutor<S> {
    pub fn new(switcher: Arc<S>) -> Self {
        Self { switcher }
    }

    /// Resolve a caller supplied namespace path
    pub fn resolve(&self, path: &Path) -> Result<NetworkNamespace, NetworkError> {
        self.switcher.resolve(path)
    }

    /// Execute async work inside `target`.
    ///
    /// The future is created and polled to completion on a fresh OS thread
    /// that owns a current-thread runtime, so every task it spawns (netlink
    /// connections included) stays inside the namespace.
    pub async fn execute<F, Fut, T>(&self, target: &NetworkNamespace, work: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AppError>>,
        T: Send + 'static,
    {
        let switcher = Arc::clone(&self.switcher);
        let target = target.clone();
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name("netns-worker".to_string())
            .spawn(move || {
                let result = run_in_namespace(&*switcher, &target, || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()?;
                    runtime.block_on(work())
                });
                // receiver only disappears if the caller was dropped
                let _ = tx.send(result);
            })?;

        rx.await.map_err(|_| NetworkError::WorkerLost)?
    }
}
