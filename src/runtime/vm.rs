use crate::bytecode::Bytecode;
use crate::bytecode::labels::{LabelTable, resolve};
use crate::bytecode::load_error::LoadError;
use crate::bytecode::op::{CallTarget, Instruction};
use crate::lang::value::{Builtin, Routine, Value};
use crate::runtime::builtins::Builtins;
use crate::runtime::frames::FrameStack;
use crate::runtime::runtime_error::{ErrorKind, RuntimeError};
use crate::runtime::scope::{Scope, ScopeChain, ScopeRef};
use crate::runtime::stack::OperandStack;
use std::rc::Rc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_call_depth: usize,
    /// Instruction budget. `None` runs until halt.
    pub max_steps: Option<usize>,
    /// Counts the current stack and every parked one together.
    pub max_stack_size: usize,
    /// Saved frames of either kind.
    pub max_frame_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1000,
            max_steps: None,
            max_stack_size: 10_000,
            max_frame_depth: 10_000,
        }
    }
}

/// How a run ended when it ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halt {
    pub steps: usize,
    /// Frames still saved when the program counter ran off the stream.
    pub pending_frames: usize,
}

/// The execution engine.
///
/// Owns the decoded stream, its label table, and the execution cursor:
/// program counter, current operand stack, current scope and the saved
/// frames. Nothing outside the machine aliases the stacks.
#[derive(Debug)]
pub struct Vm {
    code: Rc<[Option<Instruction>]>,
    labels: LabelTable,
    root: ScopeRef,
    config: VmConfig,

    pc: usize,
    stack: OperandStack,
    scope: ScopeChain,
    frames: FrameStack,
    steps: usize,
}

impl Vm {
    /// Resolve labels and build a machine ready to run.
    pub fn load(code: Bytecode, builtins: Builtins) -> Result<Self, LoadError> {
        Self::with_config(code, builtins, VmConfig::default())
    }

    pub fn with_config(
        code: Bytecode,
        builtins: Builtins,
        config: VmConfig,
    ) -> Result<Self, LoadError> {
        let resolved = resolve(&code.slots)?;
        let root = builtins.into_root();

        debug!(
            slots = code.len(),
            labels = resolved.labels.len(),
            "loaded bytecode"
        );

        Ok(Self {
            code: resolved.decoded.into(),
            labels: resolved.labels,
            scope: ScopeChain::new(Scope::child(&root)),
            root,
            config,
            pc: 0,
            stack: OperandStack::new(),
            frames: FrameStack::new(),
            steps: 0,
        })
    }

    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// The current scope link.
    pub fn scope(&self) -> &ScopeRef {
        self.scope.current()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.depth()
    }

    /// Back to the initial state: pc 0, empty stack, fresh global scope.
    pub fn reset_execution_state(&mut self) {
        self.pc = 0;
        self.stack = OperandStack::new();
        self.scope = ScopeChain::new(Scope::child(&self.root));
        self.frames = FrameStack::new();
        self.steps = 0;
    }

    /// Run until the program counter leaves the stream or an error occurs.
    pub fn run(&mut self) -> Result<Halt, RuntimeError> {
        while self.pc < self.code.len() {
            self.step()?;
        }

        let halt = Halt {
            steps: self.steps,
            pending_frames: self.frames.depth(),
        };

        if halt.pending_frames > 0 {
            warn!(
                pending = halt.pending_frames,
                "halted with saved frames still pending"
            );
        }
        debug!(steps = halt.steps, depth = self.stack.len(), "halted");

        Ok(halt)
    }

    // Execution

    fn step(&mut self) -> Result<(), RuntimeError> {
        let pc = self.pc;
        self.check_limits().map_err(|kind| self.fail(pc, kind))?;

        let code = Rc::clone(&self.code);
        let instruction = match code.get(pc) {
            Some(Some(instruction)) => instruction,
            _ => return Err(self.fail(pc, ErrorKind::InvalidTarget(pc))),
        };

        trace!(
            pc,
            op = %instruction.opcode(),
            depth = self.stack.len(),
            "exec"
        );

        self.pc = pc + instruction.opcode().stride();
        self.execute(instruction).map_err(|kind| self.fail(pc, kind))
    }

    fn check_limits(&mut self) -> Result<(), ErrorKind> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(ErrorKind::StepLimitExceeded(max));
            }
        }

        if self.stack.len() + self.frames.parked_values() > self.config.max_stack_size {
            return Err(ErrorKind::StackLimitExceeded(self.config.max_stack_size));
        }

        Ok(())
    }

    fn fail(&self, pc: usize, kind: ErrorKind) -> RuntimeError {
        RuntimeError::new(pc, kind).with_call_stack(self.frames.return_addresses())
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<(), ErrorKind> {
        match instruction {
            // Literals
            Instruction::Name(s) | Instruction::Str(s) => self.stack.push(Value::Text(s.clone())),
            Instruction::Num(n) => self.stack.push(Value::Number(*n)),

            Instruction::MakeList => {
                let count = self.pop_count()?;
                self.stack.make_list(count)?;
            }

            // Frames
            Instruction::PushStack => {
                self.reserve_frame()?;
                let parked = std::mem::take(&mut self.stack);
                self.frames.save_frame(parked, Rc::clone(self.scope.current()));
            }
            Instruction::PopStack => {
                let (stack, scope) = self.frames.restore_frame()?;
                self.switch_back(stack, scope);
            }

            // Scopes
            Instruction::PushScope => self.scope.push_scope(),
            Instruction::PopScope => self.scope.pop_scope()?,
            Instruction::Define(name) => {
                let value = self.stack.pop()?;
                self.scope.define(name, value)?;
            }
            Instruction::Assign(name) => {
                let value = self.stack.pop()?;
                self.scope.assign(name, value)?;
            }
            Instruction::Load(name) => {
                let value = self.scope.lookup(name)?;
                self.stack.push(value);
            }
            Instruction::Scope => {
                self.stack.push(Value::Scope(Rc::clone(self.scope.current())));
            }

            // Control flow
            Instruction::Label(_) => {}
            Instruction::JumpIf(label) => {
                let condition = self.stack.pop()?;
                if condition.is_truthy() {
                    self.pc = self.target(*label)?;
                }
            }
            Instruction::Jump(label) => {
                self.pc = self.target(*label)?;
            }
            Instruction::Call(CallTarget::Label(label)) => {
                let address = self.target(*label)?;
                let parent = Rc::clone(self.scope.current());
                self.enter_routine(address, parent)?;
            }
            Instruction::Call(CallTarget::Name(name)) => match self.scope.lookup(name)? {
                Value::Builtin(builtin) => self.call_builtin(&builtin)?,
                Value::Routine(routine) => {
                    self.enter_routine(routine.address, Rc::clone(&routine.scope))?
                }
                other => return Err(ErrorKind::NotCallable(other.type_name())),
            },
            Instruction::Return => {
                let (parked, scope, return_to) = self.frames.restore_call()?;
                self.return_to_caller(parked, scope);
                self.pc = return_to;
            }
            Instruction::Routine(label) => {
                let address = self.target(*label)?;
                self.stack.push(Value::Routine(Rc::new(Routine {
                    address,
                    scope: Rc::clone(self.scope.current()),
                })));
            }

            Instruction::Pop => {
                self.stack.pop()?;
            }
        }

        Ok(())
    }

    fn target(&self, label: i64) -> Result<usize, ErrorKind> {
        self.labels.get(label).ok_or(ErrorKind::UnresolvedLabel(label))
    }

    /// `MAKE_LIST` takes its element count from the stack.
    fn pop_count(&mut self) -> Result<usize, ErrorKind> {
        match self.stack.pop()? {
            Value::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= usize::MAX as f64 => {
                Ok(n as usize)
            }
            Value::Number(n) => Err(ErrorKind::InvalidCount(n.to_string())),
            other => Err(ErrorKind::InvalidCount(format!(
                "expected number, got {}",
                other.type_name()
            ))),
        }
    }

    /// Reinstate a saved stack and scope. The top of the stack being
    /// discarded, if any, is carried over as the result.
    fn switch_back(&mut self, stack: OperandStack, scope: ScopeRef) {
        let discarded = std::mem::replace(&mut self.stack, stack);
        self.scope.replace(scope);
        if let Some(result) = discarded.into_vec().pop() {
            self.stack.push(result);
        }
    }

    fn reserve_frame(&self) -> Result<(), ErrorKind> {
        if self.frames.depth() >= self.config.max_frame_depth {
            return Err(ErrorKind::FrameLimitExceeded(self.config.max_frame_depth));
        }
        Ok(())
    }

    /// The caller's stack is parked intact and the callee starts on a copy
    /// of it, marked at its current depth. Whatever the callee pops below
    /// that mark counts as consumed arguments.
    fn enter_routine(&mut self, address: usize, parent: ScopeRef) -> Result<(), ErrorKind> {
        if self.frames.call_depth() >= self.config.max_call_depth {
            return Err(ErrorKind::CallDepthExceeded(self.config.max_call_depth));
        }
        self.reserve_frame()?;

        let mut callee = self.stack.clone();
        callee.mark_low_water();
        let parked = std::mem::replace(&mut self.stack, callee);
        let caller_scope = self.scope.replace(Scope::child(&parent));
        self.frames.save_call(parked, caller_scope, self.pc);
        self.pc = address;
        Ok(())
    }

    /// Drop the arguments the callee consumed from the parked stack, then
    /// push the callee's top if it left anything above its low-water mark.
    fn return_to_caller(&mut self, mut parked: OperandStack, scope: ScopeRef) {
        let callee = std::mem::take(&mut self.stack);
        let kept = callee.low_water();
        let result = if callee.len() > kept {
            callee.into_vec().pop()
        } else {
            None
        };

        parked.truncate(kept);
        self.stack = parked;
        self.scope.replace(scope);
        if let Some(value) = result {
            self.stack.push(value);
        }
    }

    fn call_builtin(&mut self, builtin: &Builtin) -> Result<(), ErrorKind> {
        let results = builtin.invoke(&mut self.stack)?;
        for value in results {
            self.stack.push(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Emitter, Opcode, Slot};
    use std::cell::RefCell;

    // ============================================================
    // Test Helpers
    // ============================================================

    fn program(ops: Vec<Instruction>) -> Bytecode {
        let mut emitter = Emitter::new();
        for op in ops {
            emitter.emit(op);
        }
        emitter.finish()
    }

    fn num(n: f64) -> Instruction {
        Instruction::Num(n)
    }

    fn text(s: &str) -> Instruction {
        Instruction::Str(s.to_string())
    }

    fn call(name: &str) -> Instruction {
        Instruction::Call(CallTarget::Name(name.to_string()))
    }

    fn define(name: &str) -> Instruction {
        Instruction::Define(name.to_string())
    }

    fn load(name: &str) -> Instruction {
        Instruction::Load(name.to_string())
    }

    fn binary(
        name: &'static str,
        f: fn(f64, f64) -> f64,
    ) -> impl Fn(&mut OperandStack) -> Result<Vec<Value>, ErrorKind> {
        move |stack| {
            let b = stack.pop()?;
            let a = stack.pop()?;
            match (a.as_number(), b.as_number()) {
                (Some(a), Some(b)) => Ok(vec![Value::Number(f(a, b))]),
                _ => Err(ErrorKind::builtin(name, "expected two numbers")),
            }
        }
    }

    fn test_builtins() -> Builtins {
        Builtins::new()
            .register("add", binary("add", |a, b| a + b))
            .register("sub", binary("sub", |a, b| a - b))
            .register("pair", |stack| {
                let v = stack.pop()?;
                Ok(vec![v.clone(), v])
            })
            .register("same", |stack| Ok(vec![stack.pop()?]))
    }

    /// Run ops and return the resulting stack
    fn run_ops(ops: Vec<Instruction>) -> Result<Vec<Value>, RuntimeError> {
        run_ops_with_config(ops, VmConfig::default())
    }

    fn run_ops_with_config(
        ops: Vec<Instruction>,
        config: VmConfig,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut vm = Vm::with_config(program(ops), test_builtins(), config)
            .expect("program should load");
        vm.run()?;
        Ok(vm.stack().to_vec())
    }

    /// Assert stack contains expected values
    fn assert_stack(ops: Vec<Instruction>, expected: Vec<Value>) {
        let stack = run_ops(ops).expect("execution should succeed");
        assert_eq!(stack, expected, "stack mismatch");
    }

    /// Assert execution fails with the given kind
    fn assert_error(ops: Vec<Instruction>, expected: ErrorKind) -> RuntimeError {
        match run_ops(ops) {
            Ok(stack) => panic!("expected error {:?}, got stack: {:?}", expected, stack),
            Err(e) => {
                assert_eq!(e.kind, expected, "wrong error: {}", e);
                e
            }
        }
    }

    // ============================================================
    // Literals
    // ============================================================

    #[test]
    fn test_push_literals() {
        assert_stack(
            vec![Instruction::Name("x".to_string()), num(2.0), text("s")],
            vec![Value::text("x"), Value::Number(2.0), Value::text("s")],
        );
    }

    #[test]
    fn test_name_is_not_looked_up() {
        assert_stack(
            vec![Instruction::Name("unbound".to_string())],
            vec![Value::text("unbound")],
        );
    }

    #[test]
    fn test_empty_program_halts() {
        let mut vm = Vm::load(Bytecode::new(), Builtins::new()).unwrap();
        assert_eq!(
            vm.run(),
            Ok(Halt {
                steps: 0,
                pending_frames: 0
            })
        );
    }

    // ============================================================
    // Lists
    // ============================================================

    #[test]
    fn test_make_list_count_from_stack() {
        let stack = run_ops(vec![
            num(1.0),
            text("two"),
            num(3.0),
            num(3.0),
            Instruction::MakeList,
        ])
        .unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(
            stack[0].list_items().unwrap(),
            vec![Value::Number(1.0), Value::text("two"), Value::Number(3.0)]
        );
    }

    #[test]
    fn test_make_list_empty() {
        let stack = run_ops(vec![num(0.0), Instruction::MakeList]).unwrap();
        assert_eq!(stack[0].list_items().unwrap(), vec![]);
    }

    #[test]
    fn test_make_list_underflow() {
        assert_error(
            vec![num(1.0), num(2.0), Instruction::MakeList],
            ErrorKind::StackUnderflow {
                needed: 2,
                available: 1,
            },
        );
    }

    #[test]
    fn test_make_list_bad_count() {
        assert_error(
            vec![num(-1.0), Instruction::MakeList],
            ErrorKind::InvalidCount("-1".to_string()),
        );
        assert_error(
            vec![num(1.5), Instruction::MakeList],
            ErrorKind::InvalidCount("1.5".to_string()),
        );
        assert_error(
            vec![text("3"), Instruction::MakeList],
            ErrorKind::InvalidCount("expected number, got text".to_string()),
        );
    }

    // ============================================================
    // Stack frames
    // ============================================================

    #[test]
    fn test_pop_stack_carries_top() {
        assert_stack(
            vec![
                num(1.0),
                Instruction::PushStack,
                num(2.0),
                num(3.0),
                Instruction::PopStack,
            ],
            vec![Value::Number(1.0), Value::Number(3.0)],
        );
    }

    #[test]
    fn test_pop_stack_empty_callee_carries_nothing() {
        assert_stack(
            vec![num(1.0), Instruction::PushStack, Instruction::PopStack],
            vec![Value::Number(1.0)],
        );
    }

    #[test]
    fn test_push_stack_hides_caller_values() {
        assert_error(
            vec![num(1.0), Instruction::PushStack, Instruction::Pop],
            ErrorKind::StackUnderflow {
                needed: 1,
                available: 0,
            },
        );
    }

    #[test]
    fn test_pop_stack_restores_scope() {
        assert_stack(
            vec![
                num(1.0),
                define("x"),
                Instruction::PushStack,
                Instruction::PushScope,
                num(2.0),
                define("x"),
                Instruction::PopStack,
                load("x"),
            ],
            vec![Value::Number(1.0)],
        );
    }

    #[test]
    fn test_pop_stack_without_frame() {
        let err = assert_error(
            vec![num(1.0), Instruction::PopStack],
            ErrorKind::FrameUnderflow,
        );
        assert_eq!(err.pc, 2);
    }

    // ============================================================
    // Scopes
    // ============================================================

    #[test]
    fn test_define_and_load() {
        assert_stack(
            vec![num(4.0), define("x"), load("x"), load("x")],
            vec![Value::Number(4.0), Value::Number(4.0)],
        );
    }

    #[test]
    fn test_scope_shadowing() {
        assert_stack(
            vec![
                text("outer"),
                define("x"),
                Instruction::PushScope,
                text("inner"),
                define("x"),
                load("x"),
                Instruction::PopScope,
                load("x"),
            ],
            vec![Value::text("inner"), Value::text("outer")],
        );
    }

    #[test]
    fn test_inner_binding_gone_after_pop_scope() {
        assert_error(
            vec![
                Instruction::PushScope,
                num(1.0),
                define("y"),
                Instruction::PopScope,
                load("y"),
            ],
            ErrorKind::UnboundName("y".to_string()),
        );
    }

    #[test]
    fn test_pop_scope_past_root() {
        let err = assert_error(
            vec![Instruction::PopScope, Instruction::PopScope],
            ErrorKind::ScopeUnderflow,
        );
        assert_eq!(err.pc, 1);
    }

    #[test]
    fn test_root_scope_is_frozen() {
        assert_error(
            vec![Instruction::PopScope, num(1.0), define("add")],
            ErrorKind::FrozenScope("add".to_string()),
        );
    }

    #[test]
    fn test_assign_updates_outer_binding() {
        assert_stack(
            vec![
                num(1.0),
                define("x"),
                Instruction::PushScope,
                num(5.0),
                Instruction::Assign("x".to_string()),
                Instruction::PopScope,
                load("x"),
            ],
            vec![Value::Number(5.0)],
        );
    }

    #[test]
    fn test_assign_unbound_name() {
        assert_error(
            vec![num(1.0), Instruction::Assign("nope".to_string())],
            ErrorKind::UnboundName("nope".to_string()),
        );
    }

    #[test]
    fn test_assign_to_builtin_is_frozen() {
        assert_error(
            vec![num(1.0), Instruction::Assign("add".to_string())],
            ErrorKind::FrozenScope("add".to_string()),
        );
    }

    #[test]
    fn test_closure_counter() {
        let tick = || {
            vec![
                Instruction::PushStack,
                call("tick"),
                Instruction::PopStack,
            ]
        };
        let mut ops = vec![
            Instruction::Jump(99),
            // make_counter
            Instruction::Label(1),
            num(0.0),
            define("count"),
            Instruction::Routine(2),
            Instruction::Return,
            // the counter itself
            Instruction::Label(2),
            Instruction::PushStack,
            load("count"),
            num(1.0),
            call("add"),
            Instruction::PopStack,
            Instruction::Assign("count".to_string()),
            load("count"),
            Instruction::Return,
            Instruction::Label(99),
            Instruction::PushStack,
            Instruction::Call(CallTarget::Label(1)),
            Instruction::PopStack,
            define("tick"),
        ];
        ops.extend(tick());
        ops.extend(tick());
        assert_stack(ops, vec![Value::Number(1.0), Value::Number(2.0)]);
    }

    #[test]
    fn test_builtin_visible_as_value() {
        let stack = run_ops(vec![load("add")]).unwrap();
        assert!(matches!(&stack[0], Value::Builtin(b) if &*b.name == "add"));
    }

    #[test]
    fn test_scope_opcode_pushes_current_link() {
        let mut vm = Vm::load(program(vec![Instruction::Scope]), Builtins::new()).unwrap();
        vm.run().unwrap();
        match &vm.stack()[0] {
            Value::Scope(link) => assert!(Rc::ptr_eq(link, vm.scope())),
            other => panic!("expected scope, got {:?}", other),
        }
    }

    // ============================================================
    // Jumps
    // ============================================================

    fn branch(condition: Instruction) -> Vec<Instruction> {
        vec![
            num(5.0),
            condition,
            Instruction::JumpIf(1),
            text("no"),
            Instruction::Jump(2),
            Instruction::Label(1),
            text("yes"),
            Instruction::Label(2),
        ]
    }

    #[test]
    fn test_jump_if_truthy_number() {
        assert_stack(
            branch(num(3.0)),
            vec![Value::Number(5.0), Value::text("yes")],
        );
    }

    #[test]
    fn test_jump_if_zero_falls_through() {
        assert_stack(branch(num(0.0)), vec![Value::Number(5.0), Value::text("no")]);
    }

    #[test]
    fn test_jump_if_empty_text_falls_through() {
        assert_stack(branch(text("")), vec![Value::Number(5.0), Value::text("no")]);
    }

    #[test]
    fn test_jump_if_empty_list_is_truthy() {
        assert_stack(
            vec![
                num(0.0),
                Instruction::MakeList,
                Instruction::JumpIf(1),
                text("no"),
                Instruction::Label(1),
            ],
            vec![],
        );
    }

    #[test]
    fn test_jump_if_on_empty_stack() {
        assert_error(
            vec![Instruction::JumpIf(1), Instruction::Label(1)],
            ErrorKind::StackUnderflow {
                needed: 1,
                available: 0,
            },
        );
    }

    #[test]
    fn test_countdown_loop() {
        assert_stack(
            vec![
                num(3.0),
                define("n"),
                Instruction::Label(1),
                load("n"),
                Instruction::JumpIf(2),
                Instruction::Jump(3),
                Instruction::Label(2),
                Instruction::PushStack,
                load("n"),
                num(1.0),
                call("sub"),
                Instruction::PopStack,
                define("n"),
                load("n"),
                Instruction::Jump(1),
                Instruction::Label(3),
                text("done"),
            ],
            vec![
                Value::Number(2.0),
                Value::Number(1.0),
                Value::Number(0.0),
                Value::text("done"),
            ],
        );
    }

    #[test]
    fn test_unresolved_label_fails_at_load() {
        let err = Vm::load(program(vec![Instruction::Jump(1)]), Builtins::new()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnresolvedLabel {
                label: 1,
                address: 0
            }
        ));
    }

    #[test]
    fn test_duplicate_label_fails_at_load() {
        let code = program(vec![Instruction::Label(1), Instruction::Label(1)]);
        assert!(matches!(
            Vm::load(code, Builtins::new()),
            Err(LoadError::DuplicateLabel { label: 1, .. })
        ));
    }

    #[test]
    fn test_malformed_stream_fails_at_load() {
        let code = Bytecode::from_slots(vec![Slot::Op(Opcode::Num)]);
        assert!(matches!(
            Vm::load(code, Builtins::new()),
            Err(LoadError::MalformedStream { address: 0, .. })
        ));
    }

    // ============================================================
    // Calls
    // ============================================================

    #[test]
    fn test_builtin_call_convention() {
        assert_stack(
            vec![
                Instruction::PushStack,
                num(10.0),
                num(4.0),
                call("sub"),
                Instruction::PopStack,
            ],
            vec![Value::Number(6.0)],
        );
    }

    #[test]
    fn test_builtin_multiple_results_in_order() {
        assert_stack(
            vec![num(1.0), call("pair")],
            vec![Value::Number(1.0), Value::Number(1.0)],
        );
    }

    #[test]
    fn test_builtin_failure() {
        assert_error(
            vec![text("a"), num(1.0), call("add")],
            ErrorKind::builtin("add", "expected two numbers"),
        );
    }

    #[test]
    fn test_builtin_sees_underflow() {
        assert_error(
            vec![num(1.0), call("add")],
            ErrorKind::StackUnderflow {
                needed: 1,
                available: 0,
            },
        );
    }

    #[test]
    fn test_call_unbound_name() {
        assert_error(
            vec![call("missing")],
            ErrorKind::UnboundName("missing".to_string()),
        );
    }

    #[test]
    fn test_call_non_callable() {
        assert_error(
            vec![num(1.0), define("x"), call("x")],
            ErrorKind::NotCallable("number"),
        );
    }

    fn double_routine() -> Vec<Instruction> {
        vec![
            Instruction::Jump(99),
            Instruction::Label(1),
            define("a"),
            Instruction::PushStack,
            load("a"),
            load("a"),
            call("add"),
            Instruction::PopStack,
            Instruction::Return,
            Instruction::Label(99),
        ]
    }

    #[test]
    fn test_routine_call_by_label() {
        let mut ops = double_routine();
        ops.extend(vec![
            Instruction::PushStack,
            num(21.0),
            Instruction::Call(CallTarget::Label(1)),
            Instruction::PopStack,
        ]);
        assert_stack(ops, vec![Value::Number(42.0)]);
    }

    #[test]
    fn test_routine_call_by_name() {
        let mut ops = double_routine();
        ops.extend(vec![
            Instruction::Routine(1),
            define("double"),
            num(7.0),
            Instruction::PushStack,
            num(4.0),
            call("double"),
            Instruction::PopStack,
        ]);
        assert_stack(ops, vec![Value::Number(7.0), Value::Number(8.0)]);
    }

    #[test]
    fn test_routine_locals_do_not_leak() {
        let mut ops = double_routine();
        ops.extend(vec![
            Instruction::PushStack,
            num(1.0),
            Instruction::Call(CallTarget::Label(1)),
            Instruction::PopStack,
            load("a"),
        ]);
        assert_error(ops, ErrorKind::UnboundName("a".to_string()));
    }

    #[test]
    fn test_closure_outlives_defining_scope() {
        assert_stack(
            vec![
                Instruction::Jump(99),
                Instruction::Label(1),
                load("k"),
                Instruction::Return,
                Instruction::Label(99),
                Instruction::PushScope,
                num(7.0),
                define("k"),
                Instruction::Routine(1),
                Instruction::PopScope,
                define("f"),
                Instruction::PushStack,
                call("f"),
                Instruction::PopStack,
            ],
            vec![Value::Number(7.0)],
        );
    }

    fn identity_routine() -> Vec<Instruction> {
        vec![
            Instruction::Jump(99),
            Instruction::Label(1),
            define("a"),
            load("a"),
            Instruction::Return,
            Instruction::Label(99),
        ]
    }

    #[test]
    fn test_routine_call_keeps_values_below_arguments() {
        let mut ops = identity_routine();
        ops.extend(vec![num(1.0), num(2.0), Instruction::Call(CallTarget::Label(1))]);
        let routine = run_ops(ops).unwrap();

        let builtin = run_ops(vec![num(1.0), num(2.0), call("same")]).unwrap();

        assert_eq!(routine, vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(routine, builtin);
    }

    #[test]
    fn test_routine_without_result_consumes_its_argument() {
        assert_stack(
            vec![
                Instruction::Jump(99),
                Instruction::Label(1),
                define("a"),
                Instruction::Return,
                Instruction::Label(99),
                num(5.0),
                num(6.0),
                Instruction::Call(CallTarget::Label(1)),
            ],
            vec![Value::Number(5.0)],
        );
    }

    #[test]
    fn test_routine_that_pops_nothing_leaves_caller_stack() {
        assert_stack(
            vec![
                Instruction::Jump(99),
                Instruction::Label(1),
                Instruction::Return,
                Instruction::Label(99),
                num(5.0),
                num(6.0),
                Instruction::Call(CallTarget::Label(1)),
            ],
            vec![Value::Number(5.0), Value::Number(6.0)],
        );
    }

    #[test]
    fn test_return_without_call() {
        assert_error(vec![Instruction::Return], ErrorKind::FrameUnderflow);
        assert_error(
            vec![Instruction::PushStack, Instruction::Return],
            ErrorKind::FrameMismatch { expected: "call" },
        );
    }

    #[test]
    fn test_pop_stack_inside_routine_mismatch() {
        assert_error(
            vec![
                Instruction::Jump(9),
                Instruction::Label(1),
                Instruction::PopStack,
                Instruction::Label(9),
                Instruction::Call(CallTarget::Label(1)),
            ],
            ErrorKind::FrameMismatch { expected: "stack" },
        );
    }

    #[test]
    fn test_error_reports_call_stack() {
        let err = assert_error(
            vec![
                Instruction::Jump(9),
                Instruction::Label(1),
                load("nope"),
                Instruction::Label(9),
                Instruction::Call(CallTarget::Label(1)),
            ],
            ErrorKind::UnboundName("nope".to_string()),
        );
        assert_eq!(err.pc, 4);
        assert_eq!(err.call_stack, vec![10]);
    }

    #[test]
    fn test_running_off_routine_end_halts() {
        let code = program(vec![
            Instruction::Call(CallTarget::Label(1)),
            Instruction::Label(1),
            num(1.0),
        ]);
        let mut vm = Vm::load(code, Builtins::new()).unwrap();
        let halt = vm.run().unwrap();
        assert_eq!(halt.pending_frames, 1);
        assert_eq!(vm.stack(), &[Value::Number(1.0)]);
    }

    #[test]
    fn test_recursion_depth_limit() {
        let config = VmConfig {
            max_call_depth: 50,
            ..VmConfig::default()
        };
        let result = run_ops_with_config(
            vec![
                Instruction::Label(1),
                Instruction::Call(CallTarget::Label(1)),
            ],
            config,
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::CallDepthExceeded(50));
    }

    // ============================================================
    // Limits
    // ============================================================

    #[test]
    fn test_step_limit() {
        let config = VmConfig {
            max_steps: Some(100),
            ..VmConfig::default()
        };
        let result = run_ops_with_config(
            vec![Instruction::Label(1), Instruction::Jump(1)],
            config,
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::StepLimitExceeded(100));
    }

    #[test]
    fn test_stack_limit() {
        let config = VmConfig {
            max_stack_size: 8,
            ..VmConfig::default()
        };
        let result = run_ops_with_config(
            vec![Instruction::Label(1), num(1.0), Instruction::Jump(1)],
            config,
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::StackLimitExceeded(8));
    }

    #[test]
    fn test_parked_stacks_count_toward_stack_limit() {
        let config = VmConfig {
            max_stack_size: 8,
            ..VmConfig::default()
        };
        let result = run_ops_with_config(
            vec![
                Instruction::Label(1),
                num(1.0),
                Instruction::PushStack,
                Instruction::Jump(1),
            ],
            config,
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::StackLimitExceeded(8));
    }

    #[test]
    fn test_frame_limit() {
        let result = run_ops(vec![
            Instruction::Label(1),
            Instruction::PushStack,
            Instruction::Jump(1),
        ]);
        assert_eq!(
            result.unwrap_err().kind,
            ErrorKind::FrameLimitExceeded(10_000)
        );
    }

    #[test]
    fn test_steps_counted() {
        let mut vm = Vm::load(program(vec![num(1.0), num(2.0)]), Builtins::new()).unwrap();
        assert_eq!(vm.run().unwrap().steps, 2);
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    #[test]
    fn test_reset_and_rerun() {
        let mut vm = Vm::load(program(vec![num(1.0), define("x"), load("x")]), test_builtins())
            .unwrap();
        vm.run().unwrap();
        vm.reset_execution_state();
        assert!(vm.scope().lookup("x").is_err());
        vm.run().unwrap();
        assert_eq!(vm.stack(), &[Value::Number(1.0)]);
    }

    #[test]
    fn test_run_from_postcard_bytes() {
        let bytes = program(branch(num(3.0))).to_bytes().unwrap();
        let code = Bytecode::from_bytes(&bytes).unwrap();
        let mut vm = Vm::load(code, Builtins::new()).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.stack().last(), Some(&Value::text("yes")));
    }

    #[test]
    fn test_builtin_with_host_state() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let builtins = Builtins::new().register("print", move |stack| {
            let value = stack.pop()?;
            sink.borrow_mut().push(value.to_string());
            Ok(vec![])
        });
        let code = program(vec![
            Instruction::PushStack,
            text("hello"),
            call("print"),
            Instruction::PopStack,
        ]);
        let mut vm = Vm::load(code, builtins).unwrap();
        vm.run().unwrap();
        assert_eq!(*log.borrow(), vec!["hello".to_string()]);
        assert!(vm.stack().is_empty());
    }
}
