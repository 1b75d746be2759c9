// Simulated host VM for integration tests
//
// Moves the registers the way the real VM does around calls and reports
// every signal through an `Interceptor`, so tests can script a program's
// call structure and check what the profiler reconstructs.

#![allow(dead_code)]

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use vmprof::config::ProfilerConfig;
use vmprof::function::Cell;
use vmprof::host::{HostError, ProgramFlags, ProgramInfo, Registers, CELL_SIZE, OP_PROC};
use vmprof::intercept::Interceptor;
use vmprof::profile::Profile;
use vmprof::registry::{Registry, SharedProfiler};
use vmprof::symbols::SymbolInfo;
use vmprof::timer::ManualClock;

pub const STACK_TOP: Cell = 0x4000;
pub const HANDLE: u32 = 1;

pub const DEBUG_FLAGS: ProgramFlags = ProgramFlags {
    debug: true,
    no_checks: false,
};

pub struct MockVm {
    pub interceptor: Rc<Interceptor<u32>>,
    pub clock: ManualClock,
    regs: Registers,
    code: HashMap<Cell, Cell>,
}

impl MockVm {
    /// VM with a profiled program loaded under `HANDLE`
    pub fn new(symbols: SymbolInfo) -> Self {
        Self::with_config(ProfilerConfig::default(), symbols)
    }

    pub fn with_config(config: ProfilerConfig, symbols: SymbolInfo) -> Self {
        let vm = Self::unloaded(config);
        vm.interceptor
            .attach(
                HANDLE,
                ProgramInfo::new("gamemodes/test.amx", DEBUG_FLAGS).with_symbols(symbols),
                None,
            )
            .expect("attach test program");
        vm
    }

    /// VM with hooks installed but no program attached
    pub fn unloaded(config: ProfilerConfig) -> Self {
        let clock = ManualClock::new();
        let interceptor = Interceptor::new(Registry::new(config, Arc::new(clock.clone())));
        interceptor.install();
        Self {
            interceptor: Rc::new(interceptor),
            clock,
            regs: Registers {
                frm: STACK_TOP,
                stk: STACK_TOP,
                stp: STACK_TOP,
                cip: 0,
            },
            code: HashMap::new(),
        }
    }

    pub fn registers(&self) -> Registers {
        self.regs
    }

    pub fn profiler(&self) -> SharedProfiler {
        self.interceptor.get(HANDLE).expect("profiler attached")
    }

    pub fn advance(&self, micros: u64) {
        self.clock.advance(Duration::from_micros(micros));
    }

    /// Report a debug step at the current registers
    pub fn step(&mut self) {
        let code = &self.code;
        let reader = |offset: Cell| code.get(&offset).copied();
        self.interceptor
            .debug_step(HANDLE, &self.regs, &reader)
            .expect("debug step");
    }

    /// Report a debug step as if the frame pointer were `frm`
    pub fn step_with_frame(&mut self, frm: Cell) {
        let saved = self.regs.frm;
        self.regs.frm = frm;
        self.step();
        self.regs.frm = saved;
    }

    /// Host executes public `index` (or `MAIN_INDEX`)
    pub fn exec(&mut self, index: Cell, body: impl FnOnce(&mut Self)) {
        self.exec_result(index, |vm| {
            body(vm);
            Ok(())
        })
        .expect("exec succeeded");
    }

    pub fn exec_result(
        &mut self,
        index: Cell,
        body: impl FnOnce(&mut Self) -> Result<(), HostError>,
    ) -> Result<(), HostError> {
        let interceptor = Rc::clone(&self.interceptor);
        let regs = self.regs;
        interceptor.exec(HANDLE, index, &regs, || {
            let saved = self.regs;
            let frame = saved.stk - 3 * CELL_SIZE;
            self.regs.frm = frame;
            self.regs.stk = frame;
            self.step();
            let result = body(self);
            self.regs = saved;
            result
        })
    }

    /// Script calls the normal function whose prologue is at `address`
    pub fn call(&mut self, address: Cell, body: impl FnOnce(&mut Self)) {
        self.code.insert(address, OP_PROC);
        let saved = self.regs;

        let frame = saved.stk - 3 * CELL_SIZE;
        self.regs.frm = frame;
        self.regs.stk = frame;
        self.regs.cip = address + 2 * CELL_SIZE;
        self.step();

        self.regs.cip += CELL_SIZE;
        body(self);

        self.regs = saved;
        self.regs.cip += CELL_SIZE;
        self.step();
    }

    /// Script calls native `index`
    pub fn native(&mut self, index: Cell, body: impl FnOnce(&mut Self)) {
        let interceptor = Rc::clone(&self.interceptor);
        let regs = self.regs;
        interceptor
            .callback(HANDLE, index, &regs, || {
                body(self);
                Ok::<(), HostError>(())
            })
            .expect("native succeeded");
    }

    /// Unload the program and return its profile
    pub fn finish(&mut self) -> Profile {
        self.interceptor
            .on_program_unload(HANDLE)
            .expect("profiler attached")
            .profile
    }
}
