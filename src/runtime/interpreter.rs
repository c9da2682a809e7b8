use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::{trace, warn};

use crate::bytecode::Opcode;
use crate::bytecode::ir::{Executable, INIT_FUNCTION, Instruction, Literal, Operand};
use crate::lang::container::Key;
use crate::lang::value::Value;
use crate::runtime::bridge::ObjectBridge;
use crate::runtime::host::RoutineRegistry;
use crate::runtime::locks::LockTable;
use crate::runtime::memory::{Memory, MemoryRef, Scope};
use crate::runtime::ops;
use crate::runtime::runtime_error::{
    ExecutionError, not_indexable, stack_underflow, undefined_variable,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Execution limits.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
    pub max_stack_size: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            max_call_depth: 1000,
            max_steps: None,
            max_stack_size: 10_000,
        }
    }
}

/// Host-side collaborators shared by an interpreter and the jobs it spawns.
#[derive(Clone)]
pub struct Environment {
    pub routines: Rc<dyn RoutineRegistry>,
    pub bridge: Option<Rc<ObjectBridge>>,
    pub locks: Rc<LockTable>,
}

impl Environment {
    pub fn new(routines: Rc<dyn RoutineRegistry>) -> Self {
        Self {
            routines,
            bridge: None,
            locks: Rc::new(LockTable::new()),
        }
    }

    pub fn with_bridge(mut self, bridge: Rc<ObjectBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }
}

struct Frame {
    function: String,
    memory: MemoryRef,
    ip: usize,
    /// Temporaries parked while other interpreters run (script-scope frames only).
    hidden: IndexMap<String, Value>,
}

/// Runs one function of an [`Executable`] plus the background jobs it
/// spawns, cooperatively.
///
/// `interpret(n)` executes up to `n` instructions of this interpreter; after
/// each one every live job executes exactly one of its own. `yield`, a
/// contended `lock` and each poll of `wait` end the current slice early.
pub struct Interpreter {
    id: u64,
    executable: Rc<Executable>,
    env: Environment,
    config: InterpreterConfig,
    function: String,
    args: Vec<Value>,

    frames: Vec<Frame>,
    stack: Vec<Value>,
    /// Locks held by this interpreter, with the address of the claiming `LOCK`.
    held: HashMap<Key, usize>,
    jobs: Vec<Interpreter>,

    interrupted: bool,
    failed: bool,
    result: Option<Value>,
    steps: usize,
}

impl Interpreter {
    pub fn new(
        executable: Rc<Executable>,
        function: &str,
        args: Vec<Value>,
        env: Environment,
        config: InterpreterConfig,
    ) -> Result<Self, ExecutionError> {
        let declared = executable
            .function(function)
            .ok_or_else(|| ExecutionError::new(format!("undefined function '{}'", function)))?;
        if declared.params.len() != args.len() {
            return Err(ExecutionError::new(format!(
                "'{}' expects {} arguments, got {}",
                function,
                declared.params.len(),
                args.len()
            )));
        }

        let mut interpreter = Interpreter {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            executable,
            env,
            config,
            function: function.to_string(),
            args,
            frames: Vec::new(),
            stack: Vec::new(),
            held: HashMap::new(),
            jobs: Vec::new(),
            interrupted: false,
            failed: false,
            result: None,
            steps: 0,
        };
        interpreter.reset();
        Ok(interpreter)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Restarts at the function's entry, dropping frames, stack, jobs and
    /// every lock this interpreter or its jobs hold.
    pub fn reset(&mut self) {
        self.release_all();
        self.frames.clear();
        self.stack.clear();
        self.stack.extend(self.args.iter().cloned());
        self.interrupted = false;
        self.failed = false;
        self.result = None;
        self.steps = 0;

        if let Some(frame) = self.enter(&self.function.clone()) {
            self.frames.push(frame);
        }
    }

    /// Main function returned and every job finished.
    pub fn is_finished(&self) -> bool {
        self.frames.is_empty() && self.jobs.is_empty()
    }

    /// Return value of the function, once it returned.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn jobs(&self) -> &[Interpreter] {
        &self.jobs
    }

    /// Executes up to `steps` instructions. Returns early when interrupted or
    /// finished. After an error the interpreter refuses to continue until
    /// [`reset`](Self::reset).
    pub fn interpret(&mut self, steps: usize) -> Result<(), ExecutionError> {
        if self.failed {
            return Err(ExecutionError::new(format!(
                "interpreter for '{}' stopped after an error",
                self.function
            )));
        }

        self.interrupted = false;
        let mut executed = 0;
        while executed < steps && !self.interrupted && !self.is_finished() {
            if let Err(e) = self.step() {
                self.failed = true;
                return Err(e);
            }
            executed += 1;
        }
        Ok(())
    }

    /// Drives the interpreter and its jobs until everything finished.
    pub fn run_to_completion(&mut self) -> Result<Value, ExecutionError> {
        while !self.is_finished() {
            self.interpret(usize::MAX)?;
        }
        Ok(self.result.clone().unwrap_or(Value::Null))
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    fn step(&mut self) -> Result<(), ExecutionError> {
        if !self.frames.is_empty() {
            self.check_limits()?;
            let active = self.expose_temporaries();
            let outcome = self.execute_next();
            self.hide_temporaries(active);
            outcome.map_err(|e| self.annotate(e))?;
        }
        self.drive_jobs()
    }

    fn drive_jobs(&mut self) -> Result<(), ExecutionError> {
        let mut index = 0;
        while index < self.jobs.len() {
            let job = &mut self.jobs[index];
            job.interpret(1)
                .map_err(|e| e.with_context(format!("job '{}'", job.function)))?;

            if job.is_finished() {
                let job = self.jobs.remove(index);
                trace!(job = job.id, function = %job.function, "job finished");
            } else {
                index += 1;
            }
        }
        Ok(())
    }

    fn check_limits(&mut self) -> Result<(), ExecutionError> {
        self.steps += 1;
        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(ExecutionError::new(format!(
                    "execution step limit exceeded ({})",
                    max
                )));
            }
        }
        Ok(())
    }

    fn annotate(&self, mut error: ExecutionError) -> ExecutionError {
        for frame in self.frames.iter().rev() {
            error = error.with_context(format!(
                "{}() at [{:08X}]",
                frame.function,
                frame.ip.saturating_sub(1)
            ));
        }
        error
    }

    /// Re-exposes the top frame's parked temporaries; returns its memory.
    fn expose_temporaries(&mut self) -> Option<MemoryRef> {
        let frame = self.frames.last_mut()?;
        if frame.memory.borrow().scope() != Scope::Local && !frame.hidden.is_empty() {
            let hidden = std::mem::take(&mut frame.hidden);
            frame.memory.borrow_mut().expose_temporaries(hidden);
        }
        Some(Rc::clone(&frame.memory))
    }

    fn hide_temporaries(&mut self, active: Option<MemoryRef>) {
        for frame in &mut self.frames {
            if frame.memory.borrow().scope() != Scope::Local {
                let parked = frame.memory.borrow_mut().hide_temporaries();
                frame.hidden.extend(parked);
            }
        }
        // A script-scope frame that just returned takes its temporaries with it.
        if let Some(memory) = active {
            if memory.borrow().scope() != Scope::Local {
                memory.borrow_mut().hide_temporaries();
            }
        }
    }

    /// Frame for a fresh activation of `function`. `.init` runs directly in
    /// script memory.
    fn enter(&self, function: &str) -> Option<Frame> {
        let declared = self.executable.function(function)?;
        let memory = if function == INIT_FUNCTION {
            Rc::clone(self.executable.memory())
        } else {
            Memory::local(self.executable.memory())
        };
        Some(Frame {
            function: function.to_string(),
            memory,
            ip: declared.entry.0,
            hidden: IndexMap::new(),
        })
    }

    fn release_all(&mut self) {
        for (key, _) in self.held.drain() {
            self.env.locks.release(&key, self.id);
        }
        for job in &mut self.jobs {
            job.release_all();
        }
        self.jobs.clear();
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn execute_next(&mut self) -> Result<(), ExecutionError> {
        let executable = Rc::clone(&self.executable);
        let frame = self.frames.last_mut().ok_or_else(|| ExecutionError::new("no active frame"))?;
        let at = frame.ip;
        let ins = executable
            .code
            .get(at)
            .ok_or_else(|| ExecutionError::new(format!("instruction pointer {:08X} out of range", at)))?;
        frame.ip += 1;

        self.execute(ins, at)
    }

    fn execute(&mut self, ins: &Instruction, at: usize) -> Result<(), ExecutionError> {
        match ins.opcode {
            Opcode::Nop => {}

            Opcode::Mov => {
                let value = self.read(operand2(ins)?)?;
                self.write(operand1(ins)?, value)?;
            }
            Opcode::Push => {
                let value = self.read(operand1(ins)?)?;
                self.push(value)?;
            }
            Opcode::Pop => {
                let value = self.pop()?;
                self.write(operand1(ins)?, value)?;
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let dst = self.read(operand1(ins)?)?;
                let src = self.read(operand2(ins)?)?;
                let result = ops::arithmetic(ins.opcode, dst, &src)?;
                self.write(operand1(ins)?, result)?;
            }
            Opcode::Inc | Opcode::Dec => {
                let dst = self.read(operand1(ins)?)?;
                let op = if ins.opcode == Opcode::Inc { Opcode::Add } else { Opcode::Sub };
                let result = ops::arithmetic(op, dst, &Value::Int(1))?;
                self.write(operand1(ins)?, result)?;
            }
            Opcode::Neg => {
                let value = ops::negate(&self.read(operand1(ins)?)?)?;
                self.write(operand1(ins)?, value)?;
            }

            Opcode::Ceq | Opcode::Cne | Opcode::Cg | Opcode::Cge | Opcode::Cl | Opcode::Cle => {
                let left = self.read(operand1(ins)?)?;
                let right = self.read(operand2(ins)?)?;
                let result = ops::compare(ins.opcode, &left, &right)?;
                self.write(operand1(ins)?, Value::Bool(result))?;
            }
            Opcode::And | Opcode::Or => {
                let left = self.read(operand1(ins)?)?;
                let right = self.read(operand2(ins)?)?;
                let result = ops::logic(ins.opcode, &left, &right)?;
                self.write(operand1(ins)?, Value::Bool(result))?;
            }
            Opcode::Not => {
                let result = ops::not(&self.read(operand1(ins)?)?)?;
                self.write(operand1(ins)?, Value::Bool(result))?;
            }

            Opcode::Shl | Opcode::Shr | Opcode::Andb | Opcode::Orb | Opcode::Xor => {
                let left = self.read(operand1(ins)?)?;
                let right = self.read(operand2(ins)?)?;
                let result = ops::bitwise(ins.opcode, &left, &right)?;
                self.write(operand1(ins)?, result)?;
            }
            Opcode::Notb => {
                let result = ops::bit_not(&self.read(operand1(ins)?)?)?;
                self.write(operand1(ins)?, result)?;
            }

            Opcode::Ptr => {
                let current = self.read(operand1(ins)?)?;
                let collection = self.read(operand2(ins)?)?;
                let next = ops::advance(&collection, &current)?;
                self.write(operand1(ins)?, next)?;
            }
            Opcode::Test => {
                let is_null = self.read(operand1(ins)?)?.is_null();
                self.write(operand1(ins)?, Value::Bool(is_null))?;
            }

            Opcode::Jmp => self.jump(operand1(ins)?)?,
            Opcode::Jz | Opcode::Jnz => {
                let value = self.read(operand1(ins)?)?;
                let condition = value.truthiness().ok_or_else(|| {
                    ExecutionError::new(format!("condition must be boolean, got {}", value.type_name()))
                })?;
                if condition == (ins.opcode == Opcode::Jnz) {
                    self.jump(operand2(ins)?)?;
                }
            }

            Opcode::Db => {
                let name = variable(operand1(ins)?)?;
                let value = match &ins.op2 {
                    Some(init) => self.read(init)?,
                    None => Value::Null,
                };
                self.memory()?.borrow_mut().declare(name, value);
            }
            Opcode::Dsb => {
                let name = variable(operand1(ins)?)?;
                let shared = Memory::shared_root(&self.memory()?);
                let exists = shared.borrow().contains(name);
                if !exists {
                    let value = match &ins.op2 {
                        Some(init) => self.read(init)?,
                        None => Value::Null,
                    };
                    shared.borrow_mut().declare(name, value);
                }
            }
            Opcode::Dc => {
                let name = variable(operand1(ins)?)?;
                self.memory()?.borrow_mut().declare(name, Value::new_container());
            }

            Opcode::Call => {
                let name = function_name(operand1(ins)?)?;
                let argc = argument_count(ins)?;
                self.call(name, argc)?;
            }
            Opcode::Ret => {
                let value = self.pop()?;
                self.frames.pop();
                if self.frames.is_empty() {
                    self.result = Some(value);
                } else {
                    self.push(value)?;
                }
            }
            Opcode::Inv => {
                let Operand::RoutinePointer(name) = operand1(ins)? else {
                    return Err(ExecutionError::new("INV needs a routine operand"));
                };
                let argc = argument_count(ins)?;
                let args = self.pop_args(argc)?;
                let result = self.invoke_routine(name, &args)?;
                self.push(result)?;
            }
            Opcode::Invm => {
                let Operand::Member(base, method) = operand1(ins)? else {
                    return Err(ExecutionError::new("INVM needs a member operand"));
                };
                let argc = argument_count(ins)?;
                let target = self.read(base)?;
                let args = self.pop_args(argc)?;
                let result = self.invoke_method(&target, method, &args)?;
                self.push(result)?;
            }
            Opcode::Run => {
                let name = function_name(operand1(ins)?)?;
                let argc = argument_count(ins)?;
                let args = self.pop_args(argc)?;
                let job = Interpreter::new(
                    Rc::clone(&self.executable),
                    name,
                    args,
                    self.env.clone(),
                    self.config.clone(),
                )?;
                trace!(parent = self.id, job = job.id, function = name, "job spawned");
                self.jobs.push(job);
            }

            Opcode::Lock => {
                let key = self.lock_key(operand1(ins)?)?;
                self.lock(key, at)?;
            }
            Opcode::Free => {
                let key = self.lock_key(operand1(ins)?)?;
                if self.held.remove(&key).is_none() {
                    return Err(ExecutionError::new(format!("lock '{}' is not held", key)));
                }
                self.env.locks.release(&key, self.id);
            }
            Opcode::Int => self.interrupted = true,
        }
        Ok(())
    }

    fn call(&mut self, name: &str, argc: usize) -> Result<(), ExecutionError> {
        let function = self
            .executable
            .function(name)
            .ok_or_else(|| ExecutionError::new(format!("undefined function '{}'", name)))?;
        if function.params.len() != argc {
            return Err(ExecutionError::new(format!(
                "'{}' expects {} arguments, got {}",
                name,
                function.params.len(),
                argc
            )));
        }
        if self.frames.len() >= self.config.max_call_depth {
            return Err(ExecutionError::new(format!(
                "call depth limit exceeded ({}) - possible infinite recursion in '{}'",
                self.config.max_call_depth, name
            )));
        }
        if self.stack.len() < argc {
            return Err(stack_underflow());
        }

        let frame = self
            .enter(name)
            .ok_or_else(|| ExecutionError::new(format!("undefined function '{}'", name)))?;
        self.frames.push(frame);
        Ok(())
    }

    fn invoke_routine(&self, name: &str, args: &[Value]) -> Result<Value, ExecutionError> {
        let routines = &self.env.routines;
        let signature = routines
            .signature(name)
            .ok_or_else(|| ExecutionError::new(format!("unknown routine '{}'", name)))?;
        signature
            .check_args(args)
            .map_err(|e| ExecutionError::new(format!("routine '{}': {}", name, e)))?;

        match routines.invoke(name, args) {
            Ok(value) => {
                signature
                    .check_result(&value)
                    .map_err(|e| ExecutionError::new(format!("routine '{}': {}", name, e)))?;
                Ok(value)
            }
            Err(e) => {
                warn!(routine = name, error = %e, "routine failed, continuing with null");
                Ok(Value::Null)
            }
        }
    }

    fn invoke_method(&self, target: &Value, method: &str, args: &[Value]) -> Result<Value, ExecutionError> {
        match target {
            Value::Foreign(object) => self
                .bridge()?
                .invoke(object, method, args)
                .map_err(|e| ExecutionError::new(e.to_string())),
            other => Err(ExecutionError::new(format!(
                "value of type {} has no method '{}'",
                other.type_name(),
                method
            ))),
        }
    }

    /// Claims a lock, or rewinds and yields while another interpreter holds it.
    fn lock(&mut self, key: Key, at: usize) -> Result<(), ExecutionError> {
        match self.held.get(&key) {
            Some(claimed_at) if *claimed_at == at => return Ok(()),
            Some(_) => {
                return Err(ExecutionError::new(format!(
                    "lock '{}' is already held by this interpreter",
                    key
                )));
            }
            None => {}
        }

        if self.env.locks.claim(&key, self.id) {
            self.held.insert(key, at);
        } else {
            if let Some(frame) = self.frames.last_mut() {
                frame.ip = at;
            }
            self.interrupted = true;
        }
        Ok(())
    }

    fn lock_key(&self, operand: &Operand) -> Result<Key, ExecutionError> {
        let value = self.read(operand)?;
        Key::from_value(&value).ok_or_else(|| {
            ExecutionError::new(format!("a value of type {} cannot be a lock key", value.type_name()))
        })
    }

    fn jump(&mut self, target: &Operand) -> Result<(), ExecutionError> {
        let Operand::InstructionPointer(id) = target else {
            return Err(ExecutionError::new(format!("'{}' is not a jump target", target)));
        };
        let frame = self.frames.last_mut().ok_or_else(|| ExecutionError::new("no active frame"))?;
        frame.ip = id.0;
        Ok(())
    }

    // =========================================================================
    // Stack
    // =========================================================================

    fn push(&mut self, value: Value) -> Result<(), ExecutionError> {
        if self.stack.len() >= self.config.max_stack_size {
            return Err(ExecutionError::new(format!(
                "stack size limit exceeded ({})",
                self.config.max_stack_size
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, ExecutionError> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    /// Pops `argc` values, first argument first.
    fn pop_args(&mut self, argc: usize) -> Result<Vec<Value>, ExecutionError> {
        if self.stack.len() < argc {
            return Err(stack_underflow());
        }
        Ok(self.stack.split_off(self.stack.len() - argc))
    }

    // =========================================================================
    // Operands
    // =========================================================================

    fn memory(&self) -> Result<MemoryRef, ExecutionError> {
        self.frames
            .last()
            .map(|frame| Rc::clone(&frame.memory))
            .ok_or_else(|| ExecutionError::new("no active frame"))
    }

    fn bridge(&self) -> Result<&ObjectBridge, ExecutionError> {
        self.env
            .bridge
            .as_deref()
            .ok_or_else(|| ExecutionError::new("no object bridge is configured"))
    }

    fn variable_value(&self, name: &str) -> Result<Value, ExecutionError> {
        self.memory()?
            .borrow()
            .get(name)
            .ok_or_else(|| undefined_variable(name))
    }

    fn read(&self, operand: &Operand) -> Result<Value, ExecutionError> {
        match operand {
            Operand::Literal(literal) => Ok(literal.to_value()),
            Operand::Variable(name) => self.variable_value(name),
            Operand::Member(base, key) => {
                let base = self.read(base)?;
                self.read_member(&base, key)
            }
            Operand::Pointer(base, index) => {
                let base = self.read(base)?;
                let index = self.variable_value(index)?;
                self.read_index(&base, &index)
            }
            other => Err(ExecutionError::new(format!("'{}' is not a value", other))),
        }
    }

    fn read_member(&self, base: &Value, key: &str) -> Result<Value, ExecutionError> {
        match base {
            Value::Container(container) if key == LENGTH => Ok(Value::Int(container.borrow().len() as i64)),
            Value::Str(s) if key == LENGTH => Ok(Value::Int(s.chars().count() as i64)),
            Value::Container(container) => Ok(container
                .borrow()
                .get(&Key::Str(key.to_string()))
                .cloned()
                .unwrap_or(Value::Null)),
            Value::Foreign(object) => self
                .bridge()?
                .get_member(object, key)
                .map_err(|e| ExecutionError::new(e.to_string())),
            other => Err(not_indexable(other.type_name())),
        }
    }

    fn read_index(&self, base: &Value, index: &Value) -> Result<Value, ExecutionError> {
        match base {
            Value::Container(container) => {
                let key = container_key(index)?;
                Ok(container.borrow().get(&key).cloned().unwrap_or(Value::Null))
            }
            Value::Str(s) => {
                let position = match index {
                    Value::Int(i) => usize::try_from(*i).ok(),
                    _ => None,
                };
                position
                    .and_then(|i| s.chars().nth(i))
                    .map(Value::Char)
                    .ok_or_else(|| ExecutionError::new(format!("string index {} out of range", index)))
            }
            Value::Foreign(object) => self
                .bridge()?
                .get_index(object, index)
                .map_err(|e| ExecutionError::new(e.to_string())),
            other => Err(not_indexable(other.type_name())),
        }
    }

    fn write(&self, operand: &Operand, value: Value) -> Result<(), ExecutionError> {
        match operand {
            Operand::Variable(name) => {
                self.memory()?.borrow_mut().set(name, value);
                Ok(())
            }
            Operand::Member(base, key) => {
                if key == LENGTH {
                    return Err(ExecutionError::new("'length' is read-only"));
                }
                match self.read(base)? {
                    Value::Container(container) => {
                        container.borrow_mut().insert(Key::Str(key.clone()), value);
                        Ok(())
                    }
                    Value::Foreign(object) => self
                        .bridge()?
                        .set_member(&object, key, value)
                        .map_err(|e| ExecutionError::new(e.to_string())),
                    other => Err(not_indexable(other.type_name())),
                }
            }
            Operand::Pointer(base, index) => {
                let index = self.variable_value(index)?;
                match self.read(base)? {
                    Value::Container(container) => {
                        let key = container_key(&index)?;
                        container.borrow_mut().insert(key, value);
                        Ok(())
                    }
                    Value::Str(_) => Err(ExecutionError::new("strings cannot be modified by index")),
                    Value::Foreign(object) => self
                        .bridge()?
                        .set_index(&object, &index, value)
                        .map_err(|e| ExecutionError::new(e.to_string())),
                    other => Err(not_indexable(other.type_name())),
                }
            }
            other => Err(ExecutionError::new(format!("'{}' cannot be assigned to", other))),
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.release_all();
    }
}

const LENGTH: &str = "length";

fn container_key(index: &Value) -> Result<Key, ExecutionError> {
    Key::from_value(index).ok_or_else(|| {
        ExecutionError::new(format!("a value of type {} cannot be a container key", index.type_name()))
    })
}

fn operand1(ins: &Instruction) -> Result<&Operand, ExecutionError> {
    ins.op1
        .as_ref()
        .ok_or_else(|| ExecutionError::new(format!("{} is missing its first operand", ins.opcode)))
}

fn operand2(ins: &Instruction) -> Result<&Operand, ExecutionError> {
    ins.op2
        .as_ref()
        .ok_or_else(|| ExecutionError::new(format!("{} is missing its second operand", ins.opcode)))
}

fn variable(operand: &Operand) -> Result<&str, ExecutionError> {
    operand
        .variable_name()
        .ok_or_else(|| ExecutionError::new(format!("'{}' is not a variable", operand)))
}

fn function_name(operand: &Operand) -> Result<&str, ExecutionError> {
    match operand {
        Operand::FunctionPointer(name) => Ok(name),
        other => Err(ExecutionError::new(format!("'{}' is not a function", other))),
    }
}

fn argument_count(ins: &Instruction) -> Result<usize, ExecutionError> {
    match operand2(ins)? {
        Operand::Literal(Literal::Int(n)) => {
            usize::try_from(*n).map_err(|_| ExecutionError::new("negative argument count"))
        }
        other => Err(ExecutionError::new(format!("'{}' is not an argument count", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::{Function, InstrId};
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;
    use crate::runtime::host::Routines;

    // ============================================================
    // Test Helpers
    // ============================================================

    fn env() -> Environment {
        Environment::new(Rc::new(Routines::with_builtins()))
    }

    /// Executable whose `main` is exactly `ops`.
    fn program_from_ops(ops: Vec<Instruction>) -> Rc<Executable> {
        let mut exe = Executable::new("ops", &Memory::shared());
        for ins in ops {
            exe.emit(ins.opcode, ins.op1, ins.op2);
        }
        exe.functions.insert(
            "main".to_string(),
            Function {
                name: "main".to_string(),
                params: Vec::new(),
                entry: InstrId(0),
            },
        );
        Rc::new(exe)
    }

    fn ins(opcode: Opcode, op1: Option<Operand>, op2: Option<Operand>) -> Instruction {
        Instruction::new(opcode, op1, op2)
    }

    fn run_ops(ops: Vec<Instruction>) -> Result<Value, ExecutionError> {
        let mut interpreter = Interpreter::new(
            program_from_ops(ops),
            "main",
            Vec::new(),
            env(),
            InterpreterConfig::default(),
        )?;
        interpreter.run_to_completion()
    }

    fn assert_error(ops: Vec<Instruction>, error_contains: &str) {
        match run_ops(ops) {
            Ok(value) => panic!(
                "expected error containing '{}', got value: {:?}",
                error_contains, value
            ),
            Err(e) => assert!(
                e.message.contains(error_contains),
                "expected error containing '{}', got: {}",
                error_contains,
                e.message
            ),
        }
    }

    /// Compiles a script, runs `.init`, then `main`.
    fn run(source: &str) -> Result<Value, ExecutionError> {
        let tokens = Lexer::from_source(source).tokenize().expect("lexing failed");
        let routines = Routines::with_builtins();
        let exe = Parser::new(tokens, "test", &Memory::shared(), &routines)
            .parse()
            .expect("parsing failed");
        let exe = Rc::new(exe);

        let env = env();
        let mut init = Interpreter::new(Rc::clone(&exe), INIT_FUNCTION, Vec::new(), env.clone(), InterpreterConfig::default())?;
        init.run_to_completion()?;

        let mut main = Interpreter::new(exe, "main", Vec::new(), env, InterpreterConfig::default())?;
        main.run_to_completion()
    }

    fn var(name: &str) -> Option<Operand> {
        Some(Operand::var(name))
    }

    fn int(n: i64) -> Option<Operand> {
        Some(Operand::int(n))
    }

    // ============================================================
    // Opcodes
    // ============================================================

    #[test]
    fn test_mov_and_arithmetic() {
        let result = run_ops(vec![
            ins(Opcode::Mov, var("x"), int(6)),
            ins(Opcode::Mul, var("x"), int(7)),
            ins(Opcode::Push, var("x"), None),
            ins(Opcode::Ret, None, None),
        ]);
        assert_eq!(result.unwrap(), Value::Int(42));
    }

    #[test]
    fn test_increment_and_negate() {
        let result = run_ops(vec![
            ins(Opcode::Mov, var("x"), int(1)),
            ins(Opcode::Inc, var("x"), None),
            ins(Opcode::Neg, var("x"), None),
            ins(Opcode::Push, var("x"), None),
            ins(Opcode::Ret, None, None),
        ]);
        assert_eq!(result.unwrap(), Value::Int(-2));
    }

    #[test]
    fn test_undefined_variable() {
        assert_error(
            vec![ins(Opcode::Push, var("nope"), None), ins(Opcode::Ret, None, None)],
            "undefined variable 'nope'",
        );
    }

    #[test]
    fn test_stack_underflow() {
        assert_error(vec![ins(Opcode::Ret, None, None)], "stack underflow");
    }

    #[test]
    fn test_step_limit() {
        let ops = vec![ins(Opcode::Jmp, Some(Operand::InstructionPointer(InstrId(0))), None)];
        let mut interpreter = Interpreter::new(
            program_from_ops(ops),
            "main",
            Vec::new(),
            env(),
            InterpreterConfig {
                max_steps: Some(100),
                ..InterpreterConfig::default()
            },
        )
        .unwrap();
        let err = interpreter.run_to_completion().unwrap_err();
        assert!(err.message.contains("step limit"));

        let again = interpreter.interpret(1).unwrap_err();
        assert!(again.message.contains("stopped after an error"));
    }

    #[test]
    fn test_int_ends_slice() {
        let ops = vec![
            ins(Opcode::Int, None, None),
            ins(Opcode::Push, int(1), None),
            ins(Opcode::Ret, None, None),
        ];
        let mut interpreter =
            Interpreter::new(program_from_ops(ops), "main", Vec::new(), env(), InterpreterConfig::default()).unwrap();
        interpreter.interpret(100).unwrap();
        assert!(!interpreter.is_finished());
        interpreter.interpret(100).unwrap();
        assert!(interpreter.is_finished());
        assert_eq!(interpreter.result(), Some(&Value::Int(1)));
    }

    #[test]
    fn test_free_without_lock() {
        assert_error(
            vec![
                ins(Opcode::Free, Some(Operand::Literal(Literal::Str("k".into()))), None),
                ins(Opcode::Ret, None, None),
            ],
            "is not held",
        );
    }

    #[test]
    fn test_nested_lock_on_same_key() {
        let key = || Some(Operand::Literal(Literal::Str("k".into())));
        assert_error(
            vec![
                ins(Opcode::Lock, key(), None),
                ins(Opcode::Lock, key(), None),
                ins(Opcode::Ret, None, None),
            ],
            "already held",
        );
    }

    #[test]
    fn test_reset_releases_locks() {
        let ops = vec![
            ins(Opcode::Lock, Some(Operand::Literal(Literal::Str("k".into()))), None),
            ins(Opcode::Int, None, None),
            ins(Opcode::Push, int(0), None),
            ins(Opcode::Ret, None, None),
        ];
        let env = env();
        let locks = Rc::clone(&env.locks);
        let mut interpreter =
            Interpreter::new(program_from_ops(ops), "main", Vec::new(), env, InterpreterConfig::default()).unwrap();

        interpreter.interpret(10).unwrap();
        assert!(!locks.is_empty());
        interpreter.reset();
        assert!(locks.is_empty());
    }

    // ============================================================
    // Scripts
    // ============================================================

    #[test]
    fn test_recursion() {
        let source = "function fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }
                      function main() { return fib(10); }";
        assert_eq!(run(source).unwrap(), Value::Int(55));
    }

    #[test]
    fn test_script_variables_persist_between_calls() {
        let source = "var count = 0;
                      function bump() { count += 1; }
                      function main() { bump(); bump(); return count; }";
        assert_eq!(run(source).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_struct_and_enum() {
        let source = "struct Point { x = 3; y; }
                      enum Color { Red, Green, Blue }
                      function main() { Point.y = 4; return Point.x * Point.y + Color.Blue; }";
        assert_eq!(run(source).unwrap(), Value::Int(14));
    }

    #[test]
    fn test_foreach_over_string() {
        let source = "function main() { var out = \"\"; foreach (var i in \"abc\") { out = \"\" + i + out; } return out; }";
        assert_eq!(run(source).unwrap(), Value::Str("210".into()));
    }

    #[test]
    fn test_foreach_over_container_keys() {
        let source = "function main() { var a = [5, 6, 7]; var sum = 0; foreach (var k in a) { sum += a[k]; } return sum; }";
        assert_eq!(run(source).unwrap(), Value::Int(18));
    }

    #[test]
    fn test_length_member() {
        let source = "function main() { var a = [1, 2]; a += 3; var s = \"four\"; return a.length + s.length; }";
        assert_eq!(run(source).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_length_is_read_only() {
        let err = run("function main() { var a = [1]; a.length = 3; }").unwrap_err();
        assert!(err.message.contains("read-only"));
        assert!(!err.call_stack.is_empty());
    }

    #[test]
    fn test_routine_call_in_expression() {
        let source = "function main() { return str(12) + \"!\"; }";
        assert_eq!(run(source).unwrap(), Value::Str("12!".into()));
    }

    #[test]
    fn test_call_depth_limit() {
        let err = run("function f(n) { return f(n + 1); } function main() { return f(0); }").unwrap_err();
        assert!(err.message.contains("call depth limit exceeded"));
    }

    #[test]
    fn test_job_runs_after_main_returns() {
        let source = "shared done = false;
                      function worker() { yield; done = true; }
                      function main() { run worker(); return done; }";
        let tokens = Lexer::from_source(source).tokenize().unwrap();
        let routines = Routines::with_builtins();
        let shared = Memory::shared();
        let exe = Rc::new(Parser::new(tokens, "test", &shared, &routines).parse().unwrap());

        let env = env();
        Interpreter::new(Rc::clone(&exe), INIT_FUNCTION, Vec::new(), env.clone(), InterpreterConfig::default())
            .unwrap()
            .run_to_completion()
            .unwrap();

        let mut main = Interpreter::new(exe, "main", Vec::new(), env, InterpreterConfig::default()).unwrap();
        let result = main.run_to_completion().unwrap();
        assert_eq!(result, Value::Bool(false));
        assert!(main.jobs().is_empty());
        assert_eq!(shared.borrow().get("done"), Some(Value::Bool(true)));
    }
}
