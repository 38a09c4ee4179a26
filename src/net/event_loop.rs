//! Event loop engine selection.
//!
//! # Responsibilities
//! - Probe whether the native epoll engine is usable on this platform
//! - Decide once which engine backs every listener in the process
//! - Own the shared runtime the listeners run their accept loops on
//!
//! # Design Decisions
//! - An unavailable native engine is an expected outcome, never an error
//! - The choice is an explicit value handed to every listener, not a global
//! - Listeners only get a runtime `Handle`; only the group can shut the runtime down

use std::fmt;
use std::future::Future;
use std::io;
use std::num::NonZeroUsize;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

/// The I/O engine backing every listener of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineChoice {
    /// Linux epoll engine, tuned for many connections per worker.
    NativeEpoll,
    /// Portable engine that works on every supported platform.
    PortableNio,
}

impl EngineChoice {
    fn thread_name(self) -> &'static str {
        match self {
            EngineChoice::NativeEpoll => "transport-epoll",
            EngineChoice::PortableNio => "transport-nio",
        }
    }

    /// Worker threads used when the configuration does not pin a count.
    pub fn default_worker_threads(self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        match self {
            EngineChoice::NativeEpoll => cores * 2,
            EngineChoice::PortableNio => cores,
        }
    }
}

impl fmt::Display for EngineChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineChoice::NativeEpoll => write!(f, "native-epoll"),
            EngineChoice::PortableNio => write!(f, "portable-nio"),
        }
    }
}

/// Result of probing for the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeAvailability {
    Available,
    Unavailable { cause: String },
}

impl NativeAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, NativeAvailability::Available)
    }
}

/// Platform capability probe for the native engine.
pub trait CapabilityProbe {
    /// Whether the native engine can be used right now.
    fn availability(&self) -> NativeAvailability;

    /// Whether this platform would normally provide the native engine.
    fn native_expected(&self) -> bool;
}

/// Probe for the real platform this process runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformProbe;

impl CapabilityProbe for PlatformProbe {
    #[cfg(target_os = "linux")]
    fn availability(&self) -> NativeAvailability {
        // Kernels built without epoll do not expose its sysctl directory.
        match std::fs::metadata("/proc/sys/fs/epoll") {
            Ok(_) => NativeAvailability::Available,
            Err(e) => NativeAvailability::Unavailable {
                cause: e.to_string(),
            },
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn availability(&self) -> NativeAvailability {
        NativeAvailability::Unavailable {
            cause: format!("epoll is not supported on {}", std::env::consts::OS),
        }
    }

    fn native_expected(&self) -> bool {
        cfg!(target_os = "linux")
    }
}

/// The outcome of engine selection, with the fallback warning if one was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSelection {
    pub choice: EngineChoice,
    pub warning: Option<String>,
}

/// Pure engine decision: native only when requested and available.
pub fn resolve_engine(requested_enabled: bool, native_available: bool) -> EngineChoice {
    if requested_enabled && native_available {
        EngineChoice::NativeEpoll
    } else {
        EngineChoice::PortableNio
    }
}

/// Select the engine for this process, warning when a requested native engine is missing.
pub fn select_engine(requested_enabled: bool, probe: &dyn CapabilityProbe) -> EngineSelection {
    let availability = probe.availability();
    let choice = resolve_engine(requested_enabled, availability.is_available());

    let warning = match &availability {
        NativeAvailability::Unavailable { cause }
            if requested_enabled && probe.native_expected() =>
        {
            tracing::warn!(
                cause = %cause,
                "epoll not available, falling back to portable event loop"
            );
            Some(format!("epoll not available: {}", cause))
        }
        _ => None,
    };

    EngineSelection { choice, warning }
}

/// The shared event loop every listener of the process runs on.
pub struct EventLoopGroup {
    selection: EngineSelection,
    worker_threads: usize,
    runtime: Runtime,
}

impl EventLoopGroup {
    /// Build the runtime for the selected engine.
    pub fn new(selection: EngineSelection, worker_threads: Option<usize>) -> io::Result<Self> {
        let engine = selection.choice;
        let worker_threads = worker_threads.unwrap_or_else(|| engine.default_worker_threads());

        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name(engine.thread_name())
            .enable_all()
            .build()?;

        match engine {
            EngineChoice::NativeEpoll => {
                tracing::info!(worker_threads, "Using native epoll event loop")
            }
            EngineChoice::PortableNio => {
                tracing::info!(worker_threads, "Using portable event loop")
            }
        }

        Ok(Self {
            selection,
            worker_threads,
            runtime,
        })
    }

    pub fn engine(&self) -> EngineChoice {
        self.selection.choice
    }

    pub fn selection(&self) -> &EngineSelection {
        &self.selection
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Handle for spawning onto the group. It cannot shut the group down.
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Drive a future to completion on the group from outside it.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Stop the runtime, giving in-flight tasks up to `timeout` to finish.
    pub fn shutdown(self, timeout: Duration) {
        tracing::debug!(engine = %self.selection.choice, "Shutting down event loop");
        self.runtime.shutdown_timeout(timeout);
    }
}

impl fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("engine", &self.selection.choice)
            .field("worker_threads", &self.worker_threads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        available: bool,
        expected: bool,
    }

    impl CapabilityProbe for FixedProbe {
        fn availability(&self) -> NativeAvailability {
            if self.available {
                NativeAvailability::Available
            } else {
                NativeAvailability::Unavailable {
                    cause: "probe says no".into(),
                }
            }
        }

        fn native_expected(&self) -> bool {
            self.expected
        }
    }

    #[test]
    fn resolve_truth_table() {
        assert_eq!(resolve_engine(true, true), EngineChoice::NativeEpoll);
        assert_eq!(resolve_engine(true, false), EngineChoice::PortableNio);
        assert_eq!(resolve_engine(false, true), EngineChoice::PortableNio);
        assert_eq!(resolve_engine(false, false), EngineChoice::PortableNio);
    }

    #[test]
    fn fallback_warns_when_native_expected() {
        let probe = FixedProbe {
            available: false,
            expected: true,
        };
        let selection = select_engine(true, &probe);
        assert_eq!(selection.choice, EngineChoice::PortableNio);
        let warning = selection.warning.unwrap();
        assert!(warning.contains("probe says no"));
    }

    #[test]
    fn no_warning_when_native_not_expected() {
        let probe = FixedProbe {
            available: false,
            expected: false,
        };
        let selection = select_engine(true, &probe);
        assert_eq!(selection.choice, EngineChoice::PortableNio);
        assert_eq!(selection.warning, None);
    }

    #[test]
    fn no_warning_when_native_disabled() {
        let probe = FixedProbe {
            available: false,
            expected: true,
        };
        let selection = select_engine(false, &probe);
        assert_eq!(selection.choice, EngineChoice::PortableNio);
        assert_eq!(selection.warning, None);
    }

    #[test]
    fn native_selected_when_available() {
        let probe = FixedProbe {
            available: true,
            expected: true,
        };
        let selection = select_engine(true, &probe);
        assert_eq!(selection.choice, EngineChoice::NativeEpoll);
        assert_eq!(selection.warning, None);
    }

    #[test]
    fn platform_probe_agrees_with_target() {
        let probe = PlatformProbe;
        if !cfg!(target_os = "linux") {
            assert!(!probe.availability().is_available());
            assert!(!probe.native_expected());
        } else {
            assert!(probe.native_expected());
        }
    }

    #[test]
    fn group_uses_requested_worker_count() {
        let selection = EngineSelection {
            choice: EngineChoice::PortableNio,
            warning: None,
        };
        let group = EventLoopGroup::new(selection, Some(2)).unwrap();
        assert_eq!(group.engine(), EngineChoice::PortableNio);
        assert_eq!(group.worker_threads(), 2);
        assert_eq!(group.block_on(async { 40 + 2 }), 42);
        group.shutdown(Duration::from_secs(1));
    }
}
