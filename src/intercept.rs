//! Host integration layer
//!
//! The host routes its two patched entry points through an [`Interceptor`]:
//!
//! - **exec** (the host starts a public function or the program entry point)
//! - **callback** (the script calls a native function)
//!
//! plus the per-instruction debug hook. Each entry point is a hook slot that
//! can be suspended while a wrapped call runs. Inside exec the exec slot is
//! off and the callback slot is on; inside a native call the callback slot
//! is off and the exec slot is back on, because natives may re-enter the
//! script and that nested execution has to be profiled as well. Slots are
//! restored by guards when the wrapped call returns, even on failure.
//!
//! Borrows of a profiler are never held across a wrapped call or a chained
//! debug hook, so the nested execution can reach the same profiler again.

use crate::config::ProfilerConfig;
use crate::error::Result;
use crate::function::{Cell, FunctionId, MAIN_INDEX};
use crate::host::{CodeReader, DebugHook, HookResult, ProgramInfo, Registers, CELL_SIZE};
use crate::registry::{Detached, Registry, SharedProfiler};
use std::cell::{self, RefCell};
use std::fmt;
use std::hash::Hash;
use tracing::{debug, info, trace, warn};

/// Wrap a public exec so it is timed as `Public(index)`
///
/// Indices other than real publics and the entry point pass straight
/// through, as does everything while the profiler is inactive. The host's
/// result is returned unchanged.
pub fn profile_exec<T, E>(
    profiler: &SharedProfiler,
    index: Cell,
    regs: &Registers,
    run: impl FnOnce() -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    if index < 0 && index != MAIN_INDEX {
        return run();
    }
    // The callee's prologue will set up its frame three cells below the current stack.
    let frame = regs.stk.saturating_sub(3 * CELL_SIZE);
    let _scope = CallScope::enter(profiler, FunctionId::Public(index), frame);
    run()
}

/// Wrap a native call so it is timed as `Native(index)`
pub fn profile_native<T, E>(
    profiler: &SharedProfiler,
    index: Cell,
    regs: &Registers,
    run: impl FnOnce() -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    let _scope = CallScope::enter(profiler, FunctionId::Native(index), regs.frm);
    run()
}

/// Explicit call in flight; leaving happens on drop so it cannot be skipped
struct CallScope<'a> {
    profiler: &'a SharedProfiler,
    function: FunctionId,
}

impl<'a> CallScope<'a> {
    fn enter(profiler: &'a SharedProfiler, function: FunctionId, frame: Cell) -> Option<Self> {
        let Ok(mut guard) = profiler.try_borrow_mut() else {
            warn!(%function, "profiler busy, explicit call not recorded");
            return None;
        };
        if !guard.is_active() {
            return None;
        }
        guard.enter_function(function, frame);
        Some(Self { profiler, function })
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        let Ok(mut profiler) = self.profiler.try_borrow_mut() else {
            warn!(function = %self.function, "profiler busy, explicit exit lost");
            return;
        };
        // Detached while the call was running: its frames are already gone.
        if !profiler.is_active() {
            return;
        }
        if let Err(err) = profiler.leave_function(self.function) {
            warn!(program = %profiler.program(), function = %self.function, "explicit exit: {}", err);
        }
    }
}

/// Sets a hook slot for the lifetime of the guard, then restores it
struct SlotGuard<'a> {
    slot: &'a cell::Cell<bool>,
    previous: bool,
}

impl<'a> SlotGuard<'a> {
    fn set(slot: &'a cell::Cell<bool>, value: bool) -> Self {
        let previous = slot.replace(value);
        Self { slot, previous }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.set(self.previous);
    }
}

/// Routes host entry points to the profiler attached to each program
pub struct Interceptor<K> {
    registry: RefCell<Registry<K>>,
    installed: cell::Cell<bool>,
    exec_slot: cell::Cell<bool>,
    callback_slot: cell::Cell<bool>,
}

impl<K> Interceptor<K>
where
    K: Copy + Eq + Hash + fmt::Debug,
{
    /// Create an interceptor; hooks start uninstalled
    pub fn new(registry: Registry<K>) -> Self {
        Self {
            registry: RefCell::new(registry),
            installed: cell::Cell::new(false),
            exec_slot: cell::Cell::new(false),
            callback_slot: cell::Cell::new(false),
        }
    }

    pub fn install(&self) {
        self.installed.set(true);
        self.exec_slot.set(true);
        self.callback_slot.set(true);
        debug!("exec and callback hooks installed");
    }

    pub fn uninstall(&self) {
        self.installed.set(false);
        self.exec_slot.set(false);
        self.callback_slot.set(false);
        debug!("exec and callback hooks removed");
    }

    pub fn is_installed(&self) -> bool {
        self.installed.get()
    }

    /// Whether an exec arriving now would be intercepted
    pub fn exec_hooked(&self) -> bool {
        self.installed.get() && self.exec_slot.get()
    }

    /// Whether a native call arriving now would be intercepted
    pub fn callback_hooked(&self) -> bool {
        self.installed.get() && self.callback_slot.get()
    }

    pub fn config(&self) -> ProfilerConfig {
        self.registry.borrow().config().clone()
    }

    pub fn attach(
        &self,
        handle: K,
        program: ProgramInfo,
        previous_hook: Option<DebugHook>,
    ) -> Result<SharedProfiler> {
        self.registry.borrow_mut().attach(handle, program, previous_hook)
    }

    pub fn attach_if_missing(
        &self,
        handle: K,
        program: ProgramInfo,
        previous_hook: Option<DebugHook>,
    ) -> Result<SharedProfiler> {
        self.registry
            .borrow_mut()
            .attach_if_missing(handle, program, previous_hook)
    }

    pub fn get(&self, handle: K) -> Option<SharedProfiler> {
        self.registry.borrow().get(handle)
    }

    pub fn detach(&self, handle: K) -> Option<Detached> {
        self.registry.borrow_mut().detach(handle)
    }

    /// Program loaded: attach if the configured selection wants it
    ///
    /// Programs that cannot be profiled are logged and left to run
    /// unprofiled; the refusal is returned so the host can report it.
    pub fn on_program_load(
        &self,
        handle: K,
        program: ProgramInfo,
        previous_hook: Option<DebugHook>,
    ) -> Result<Option<SharedProfiler>> {
        let wanted = self.registry.borrow().config().selection.wants(&program.name);
        if !wanted {
            trace!(program = %program.name, "not selected for profiling");
            return Ok(None);
        }

        let name = program.name.clone();
        let has_symbols = program.symbols.has_debug_symbols();
        match self.attach(handle, program, previous_hook) {
            Ok(profiler) => {
                info!(program = %name, symbols = has_symbols, "attached profiler");
                Ok(Some(profiler))
            }
            Err(err) => {
                warn!(program = %name, "cannot profile: {}", err);
                Err(err)
            }
        }
    }

    /// Program unloading: detach and hand back its results
    pub fn on_program_unload(&self, handle: K) -> Option<Detached> {
        self.detach(handle)
    }

    /// Exec entry point
    pub fn exec<T, E>(
        &self,
        handle: K,
        index: Cell,
        regs: &Registers,
        run: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        if !self.exec_hooked() {
            return run();
        }
        let _exec = SlotGuard::set(&self.exec_slot, false);
        let _callback = SlotGuard::set(&self.callback_slot, true);

        match self.get(handle) {
            Some(profiler) => profile_exec(&profiler, index, regs, run),
            None => run(),
        }
    }

    /// Native call entry point
    pub fn callback<T, E>(
        &self,
        handle: K,
        index: Cell,
        regs: &Registers,
        run: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        if !self.callback_hooked() {
            return run();
        }
        let _callback = SlotGuard::set(&self.callback_slot, false);
        // Natives can start nested executions of the script.
        let _exec = SlotGuard::set(&self.exec_slot, true);

        match self.get(handle) {
            Some(profiler) => profile_native(&profiler, index, regs, run),
            None => run(),
        }
    }

    /// Debug hook entry point
    ///
    /// Programs without a profiler report success; their own hooks were
    /// never replaced. The chained hook runs with the profiler released, so
    /// steps it causes by re-entering the script are still profiled. Those
    /// nested steps are not forwarded to the chained hook a second time.
    pub fn debug_step(&self, handle: K, regs: &Registers, code: &dyn CodeReader) -> HookResult {
        let Some(shared) = self.get(handle) else {
            return Ok(());
        };
        let hook = {
            let Ok(mut profiler) = shared.try_borrow_mut() else {
                warn!(?handle, "profiler busy, debug step not recorded");
                return Ok(());
            };
            profiler.observe_step(regs, code);
            profiler.take_previous_hook()
        };
        let Some(mut hook) = hook else {
            return Ok(());
        };

        let result = hook(regs);
        match shared.try_borrow_mut() {
            Ok(mut profiler) => profiler.restore_previous_hook(hook),
            Err(_) => warn!(?handle, "profiler busy, chained hook dropped"),
        }
        result
    }
}

impl<K> fmt::Debug for Interceptor<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("registry", &self.registry)
            .field("installed", &self.installed.get())
            .field("exec_slot", &self.exec_slot.get())
            .field("callback_slot", &self.callback_slot.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostError, ProgramFlags};
    use crate::timer::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    const DEBUG: ProgramFlags = ProgramFlags {
        debug: true,
        no_checks: false,
    };

    fn interceptor(config: ProfilerConfig) -> (Interceptor<u32>, ManualClock) {
        let clock = ManualClock::new();
        let interceptor = Interceptor::new(Registry::new(config, Arc::new(clock.clone())));
        interceptor.install();
        (interceptor, clock)
    }

    fn regs() -> Registers {
        Registers {
            frm: 4084,
            stk: 4096,
            stp: 4096,
            cip: 0,
        }
    }

    #[test]
    fn test_exec_without_profiler_passes_through() {
        let (interceptor, _clock) = interceptor(ProfilerConfig::default());
        let result: std::result::Result<i32, HostError> = interceptor.exec(1, 0, &regs(), || Ok(5));
        assert_eq!(result, Ok(5));
    }

    #[test]
    fn test_exec_profiles_public_and_passes_errors_through() {
        let (interceptor, clock) = interceptor(ProfilerConfig::default());
        let profiler = interceptor.attach(1, ProgramInfo::new("a.amx", DEBUG), None).unwrap();

        let result: std::result::Result<(), HostError> = interceptor.exec(1, 2, &regs(), || {
            clock.advance(Duration::from_micros(8));
            Err(HostError::new(4))
        });
        assert_eq!(result, Err(HostError::new(4)));

        let profiler = profiler.borrow();
        assert!(profiler.call_stack().is_empty());
        let stats = profiler.stats().get(FunctionId::Public(2)).unwrap();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.total_time, Duration::from_micros(8));
    }

    #[test]
    fn test_exec_records_frame_three_cells_below_stack() {
        let (interceptor, _clock) = interceptor(ProfilerConfig::default());
        let profiler = interceptor.attach(1, ProgramInfo::new("a.amx", DEBUG), None).unwrap();

        let frame: std::result::Result<Cell, HostError> = interceptor.exec(1, MAIN_INDEX, &regs(), || {
            Ok(profiler.borrow().call_stack().top().unwrap().frame())
        });
        assert_eq!(frame, Ok(4096 - 12));
    }

    #[test]
    fn test_continue_index_is_not_profiled() {
        let (interceptor, _clock) = interceptor(ProfilerConfig::default());
        let profiler = interceptor.attach(1, ProgramInfo::new("a.amx", DEBUG), None).unwrap();

        let _: std::result::Result<(), HostError> = interceptor.exec(1, -2, &regs(), || Ok(()));
        assert!(profiler.borrow().stats().is_empty());
    }

    #[test]
    fn test_hook_slots_switch_and_restore() {
        let (interceptor, _clock) = interceptor(ProfilerConfig::default());
        assert!(interceptor.exec_hooked());
        assert!(interceptor.callback_hooked());

        let _: std::result::Result<(), HostError> = interceptor.exec(1, 0, &regs(), || {
            assert!(!interceptor.exec_hooked());
            assert!(interceptor.callback_hooked());

            interceptor.callback(1, 0, &regs(), || {
                assert!(interceptor.exec_hooked());
                assert!(!interceptor.callback_hooked());
                Ok::<(), HostError>(())
            })?;

            assert!(!interceptor.exec_hooked());
            assert!(interceptor.callback_hooked());
            Ok(())
        });

        assert!(interceptor.exec_hooked());
        assert!(interceptor.callback_hooked());
    }

    #[test]
    fn test_uninstalled_hooks_pass_through() {
        let (interceptor, _clock) = interceptor(ProfilerConfig::default());
        let profiler = interceptor.attach(1, ProgramInfo::new("a.amx", DEBUG), None).unwrap();
        interceptor.uninstall();

        let _: std::result::Result<(), HostError> = interceptor.exec(1, 0, &regs(), || Ok(()));
        let _: std::result::Result<(), HostError> = interceptor.callback(1, 0, &regs(), || Ok(()));
        assert!(profiler.borrow().stats().is_empty());
    }

    #[test]
    fn test_on_program_load_respects_selection() {
        let mut config = ProfilerConfig::default();
        config.selection.gamemode = true;
        let (interceptor, _clock) = interceptor(config);

        let skipped = interceptor
            .on_program_load(1, ProgramInfo::new("filterscripts/admin.amx", DEBUG), None)
            .unwrap();
        assert!(skipped.is_none());

        let attached = interceptor
            .on_program_load(2, ProgramInfo::new("gamemodes/lvdm.amx", DEBUG), None)
            .unwrap();
        assert!(attached.is_some());

        let stripped = ProgramFlags {
            debug: false,
            no_checks: true,
        };
        let refused = interceptor.on_program_load(3, ProgramInfo::new("gamemodes/x.amx", stripped), None);
        assert!(refused.is_err());
        assert!(interceptor.get(3).is_none());
    }

    #[test]
    fn test_detach_during_exec_drops_explicit_exit_quietly() {
        let (interceptor, _clock) = interceptor(ProfilerConfig::default());
        interceptor.attach(1, ProgramInfo::new("a.amx", DEBUG), None).unwrap();

        let mut detached = None;
        let _: std::result::Result<(), HostError> = interceptor.exec(1, 0, &regs(), || {
            detached = interceptor.on_program_unload(1);
            Ok(())
        });

        let detached = detached.unwrap();
        assert_eq!(detached.profile.abandoned_frames, 1);
        assert!(interceptor.get(1).is_none());
    }

    #[test]
    fn test_steps_from_chained_hook_are_profiled() {
        use crate::host::OP_PROC;
        use std::rc::Rc;

        let (interceptor, _clock) = interceptor(ProfilerConfig::default());
        let interceptor = Rc::new(interceptor);
        let nested = Rc::clone(&interceptor);
        let hits = Rc::new(cell::Cell::new(0));
        let seen = Rc::clone(&hits);
        let hook: DebugHook = Box::new(move |regs: &Registers| {
            seen.set(seen.get() + 1);
            if seen.get() == 1 {
                // The hook runs script code that enters a normal function.
                let inner = Registers {
                    frm: regs.frm - 12,
                    stk: regs.frm - 12,
                    stp: regs.stp,
                    cip: 0x48,
                };
                let code = |offset: Cell| (offset == 0x40).then_some(OP_PROC);
                nested.debug_step(1, &inner, &code)?;
            }
            Ok(())
        });
        let profiler = interceptor
            .attach(1, ProgramInfo::new("a.amx", DEBUG), Some(hook))
            .unwrap();

        let reader = |_: Cell| -> Option<Cell> { None };
        interceptor.debug_step(1, &regs(), &reader).unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(
            profiler.borrow().call_stack().top().unwrap().function(),
            FunctionId::Normal(0x40)
        );

        // The hook is back in place for the next step.
        interceptor.debug_step(1, &regs(), &reader).unwrap();
        assert_eq!(hits.get(), 2);
        assert!(interceptor.detach(1).unwrap().previous_hook.is_some());
    }

    #[test]
    fn test_debug_step_without_profiler_is_ok() {
        let (interceptor, _clock) = interceptor(ProfilerConfig::default());
        let reader = |_: Cell| -> Option<Cell> { None };
        assert!(interceptor.debug_step(5, &regs(), &reader).is_ok());
    }
}
