//! Ownership table mapping program handles to profilers
//!
//! Profilers are created and destroyed explicitly. Lookups never create
//! anything; the one place that may create on a miss is
//! [`Registry::attach_if_missing`], called at the host boundary.

use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::function_profiler::FunctionProfiler;
use crate::host::{DebugHook, ProgramInfo};
use crate::profile::Profile;
use crate::timer::{Clock, MonotonicClock};
use fnv::FnvHashMap;
use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

/// A profiler shared between the registry and in-flight wrapped calls
///
/// The monitored VM is single-threaded and calls back into the profiler
/// re-entrantly, so shared ownership is `Rc<RefCell<_>>`.
pub type SharedProfiler = Rc<RefCell<FunctionProfiler>>;

/// What is left after a profiler is detached
pub struct Detached {
    pub profile: Profile,
    /// Debug hook the host should reinstall
    pub previous_hook: Option<DebugHook>,
}

impl fmt::Debug for Detached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detached")
            .field("profile", &self.profile)
            .field("previous_hook", &self.previous_hook.is_some())
            .finish()
    }
}

/// Program handle → profiler table
pub struct Registry<K> {
    config: ProfilerConfig,
    clock: Arc<dyn Clock>,
    profilers: FnvHashMap<K, SharedProfiler>,
}

impl<K> Registry<K>
where
    K: Copy + Eq + Hash + fmt::Debug,
{
    pub fn new(config: ProfilerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            profilers: FnvHashMap::default(),
        }
    }

    /// Registry timing calls with the wall clock
    pub fn with_config(config: ProfilerConfig) -> Self {
        Self::new(config, Arc::new(MonotonicClock))
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Create and activate a profiler for `handle`
    pub fn attach(
        &mut self,
        handle: K,
        program: ProgramInfo,
        previous_hook: Option<DebugHook>,
    ) -> Result<SharedProfiler> {
        if self.profilers.contains_key(&handle) {
            return Err(ProfilerError::AlreadyAttached(format!(
                "{:?} ({})",
                handle, program.name
            )));
        }

        let name = program.name.clone();
        let mut profiler = FunctionProfiler::new(program, &self.config, Arc::clone(&self.clock))?;
        profiler.activate(previous_hook);

        let shared = Rc::new(RefCell::new(profiler));
        self.profilers.insert(handle, Rc::clone(&shared));
        debug!(?handle, program = %name, "attached profiler");
        Ok(shared)
    }

    /// Return the profiler for `handle`, attaching one if there is none
    pub fn attach_if_missing(
        &mut self,
        handle: K,
        program: ProgramInfo,
        previous_hook: Option<DebugHook>,
    ) -> Result<SharedProfiler> {
        match self.get(handle) {
            Some(existing) => Ok(existing),
            None => self.attach(handle, program, previous_hook),
        }
    }

    pub fn get(&self, handle: K) -> Option<SharedProfiler> {
        self.profilers.get(&handle).cloned()
    }

    pub fn contains(&self, handle: K) -> bool {
        self.profilers.contains_key(&handle)
    }

    /// Deactivate and remove the profiler for `handle`
    ///
    /// Calls still on its stack are abandoned. Returns `None` if nothing was
    /// attached, or if the profiler is busy (detach was requested from inside
    /// one of its own hooks), in which case it stays registered.
    pub fn detach(&mut self, handle: K) -> Option<Detached> {
        let shared = self.profilers.get(&handle)?;
        let Ok(mut profiler) = shared.try_borrow_mut() else {
            warn!(?handle, "profiler busy, detach postponed");
            return None;
        };

        let previous_hook = profiler.deactivate();
        let profile = profiler.finish();
        drop(profiler);

        self.profilers.remove(&handle);
        debug!(?handle, program = %profile.program, functions = profile.stats.len(), "detached profiler");
        Some(Detached {
            profile,
            previous_hook,
        })
    }

    pub fn len(&self) -> usize {
        self.profilers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profilers.is_empty()
    }

    pub fn handles(&self) -> Vec<K> {
        self.profilers.keys().copied().collect()
    }
}

impl<K> fmt::Debug for Registry<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("programs", &self.profilers.keys().collect::<Vec<_>>())
            .finish()
    }
}
