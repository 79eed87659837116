use std::io::{self, ErrorKind, Read, Write};

use tracing::Level;

use crate::{
    disasm, Error, Fault, FaultKind, Op, Result, StackId, VmConfig, FALSE, TRUE, WORD_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Halted,
    /// Absorbing: a faulted machine never executes again until reloaded.
    Faulted,
}

/// A bounded LIFO of words. Overflow and underflow are faults, never wraps.
#[derive(Debug)]
struct Stack {
    id: StackId,
    cells: Box<[i32]>,
    len: usize,
}

impl Stack {
    fn new(id: StackId, capacity: usize) -> Self {
        Self {
            id,
            cells: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    fn push(&mut self, value: i32) -> std::result::Result<(), FaultKind> {
        let cell = self
            .cells
            .get_mut(self.len)
            .ok_or(FaultKind::StackOverflow(self.id))?;
        *cell = value;
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> std::result::Result<i32, FaultKind> {
        let value = self.peek()?;
        self.len -= 1;
        Ok(value)
    }

    fn peek(&self) -> std::result::Result<i32, FaultKind> {
        match self.len {
            0 => Err(FaultKind::StackUnderflow(self.id)),
            len => Ok(self.cells[len - 1]),
        }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    fn as_slice(&self) -> &[i32] {
        &self.cells[..self.len]
    }
}

fn flag(cond: bool) -> i32 {
    if cond {
        TRUE
    } else {
        FALSE
    }
}

/// Executes a binary image held in byte-addressed memory.
///
/// Code and data share memory: `@`/`!` and friends see the same bytes the
/// instruction pointer walks.
pub struct Vm<R, W> {
    ip: u32,
    memory: Vec<u8>,
    data: Stack,
    ret: Stack,
    input: R,
    output: W,
    state: State,
    fault: Option<Fault>,
    // instruction being executed, for fault reports
    at: u32,
    op: Op,
}

impl<R: Read, W: Write> Vm<R, W> {
    pub fn new(config: &VmConfig, input: R, output: W) -> Self {
        Self {
            ip: 0,
            memory: vec![0; config.memory as usize],
            data: Stack::new(StackId::Data, config.data_stack),
            ret: Stack::new(StackId::Return, config.return_stack),
            input,
            output,
            state: State::Halted,
            fault: None,
            at: 0,
            op: Op::EXIT,
        }
    }

    /// Copies `image` to the start of memory and resets the machine.
    pub fn load(&mut self, image: &[u8]) -> Result<()> {
        if image.len() > self.memory.len() {
            return Err(Error::ImageTooLarge {
                len: image.len(),
                capacity: self.memory.len() as u32,
            });
        }
        self.memory[..image.len()].copy_from_slice(image);
        self.memory[image.len()..].fill(0);
        self.ip = 0;
        self.data.clear();
        self.ret.clear();
        self.state = State::Running;
        self.fault = None;
        tracing::debug!(
            "loaded {} byte image into {} bytes of memory",
            image.len(),
            self.memory.len()
        );
        Ok(())
    }

    pub fn load_from<T: Read>(&mut self, mut reader: T) -> Result<()> {
        let mut image = Vec::new();
        reader
            .by_ref()
            .take(self.memory.len() as u64 + 1)
            .read_to_end(&mut image)?;
        self.load(&image)
    }

    pub fn ip(&self) -> u32 {
        self.ip
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn data_stack(&self) -> &[i32] {
        self.data.as_slice()
    }

    pub fn return_stack(&self) -> &[i32] {
        self.ret.as_slice()
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Runs until `exit`, the end of memory, or a fault.
    pub fn run(&mut self) -> Result<()> {
        tracing::trace!("running");
        loop {
            match self.step() {
                Ok(State::Running) => {}
                Ok(State::Halted | State::Faulted) => {
                    self.output.flush()?;
                    return Ok(());
                }
                Err(e) => {
                    // the fault is what gets reported, not a failed flush
                    let _ = self.output.flush();
                    return Err(e);
                }
            }
        }
    }

    /// Executes one instruction.
    pub fn step(&mut self) -> Result<State> {
        match (self.state, self.fault) {
            (State::Running, _) => {}
            (State::Faulted, Some(fault)) => return Err(Error::Runtime(fault)),
            (state, _) => return Ok(state),
        }
        if self.ip as usize >= self.memory.len() {
            tracing::warn!("reached end of memory at ${:04X}", self.ip);
            self.state = State::Halted;
            return Ok(State::Halted);
        }
        self.at = self.ip;
        self.op = Op(self.memory[self.ip as usize]);
        if tracing::enabled!(Level::TRACE) {
            if let Some(ins) = disasm::decode(&self.memory, self.ip) {
                tracing::trace!("{ins} {:?}", self.data.as_slice());
            }
        }
        match self.exec() {
            Ok(state) => {
                self.state = state;
                Ok(state)
            }
            Err(e) => {
                self.state = State::Faulted;
                if let Error::Runtime(fault) = e {
                    self.fault = Some(fault);
                }
                Err(e)
            }
        }
    }

    fn fault(&self, kind: FaultKind) -> Error {
        Error::Runtime(Fault {
            ip: self.at,
            opcode: self.op.0,
            kind,
        })
    }

    fn io_fault(&self, e: io::Error) -> Error {
        tracing::debug!("i/o failure at ${:04X}: {e}", self.at);
        self.fault(FaultKind::Io(e.kind()))
    }

    fn push(&mut self, value: i32) -> Result<()> {
        let res = self.data.push(value);
        res.map_err(|kind| self.fault(kind))
    }

    fn pop(&mut self) -> Result<i32> {
        let res = self.data.pop();
        res.map_err(|kind| self.fault(kind))
    }

    fn rpush(&mut self, value: i32) -> Result<()> {
        let res = self.ret.push(value);
        res.map_err(|kind| self.fault(kind))
    }

    fn rpop(&mut self) -> Result<i32> {
        let res = self.ret.pop();
        res.map_err(|kind| self.fault(kind))
    }

    /// Byte offset of an access of `width` bytes at `addr`.
    fn addr(&self, addr: i64, width: usize) -> Result<usize> {
        usize::try_from(addr)
            .ok()
            .filter(|at| at.checked_add(width).is_some_and(|end| end <= self.memory.len()))
            .ok_or_else(|| self.fault(FaultKind::BadAddress(addr)))
    }

    fn read_word(&self, addr: i64) -> Result<i32> {
        let at = self.addr(addr, WORD_SIZE)?;
        let mut buf = [0; WORD_SIZE];
        buf.copy_from_slice(&self.memory[at..at + WORD_SIZE]);
        Ok(i32::from_be_bytes(buf))
    }

    fn write_word(&mut self, addr: i64, value: i32) -> Result<()> {
        let at = self.addr(addr, WORD_SIZE)?;
        self.memory[at..at + WORD_SIZE].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn operand(&self) -> Result<i32> {
        self.read_word(self.ip as i64 + 1)
    }

    fn jump(&mut self, target: i32) -> Result<()> {
        self.ip = self.addr(target as i64, 1)? as u32;
        Ok(())
    }

    fn binary(&mut self, f: impl FnOnce(i32, i32) -> i32) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(a, b))
    }

    fn key(&mut self) -> Result<i32> {
        let res = self.output.flush();
        res.map_err(|e| self.io_fault(e))?;
        let mut buf = [0];
        loop {
            match self.input.read(&mut buf) {
                Ok(0) => return Ok(-1),
                Ok(_) => return Ok(buf[0] as i32),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_fault(e)),
            }
        }
    }

    fn exec(&mut self) -> Result<State> {
        let next = self.ip + self.op.size();
        match self.op {
            Op::EXIT => return Ok(State::Halted),
            Op::NOP => {}
            Op::CONST => {
                let value = self.operand()?;
                self.push(value)?;
            }
            Op::FETCH => {
                let addr = self.pop()?;
                let value = self.read_word(addr as i64)?;
                self.push(value)?;
            }
            Op::STORE => {
                let value = self.pop()?;
                let addr = self.pop()?;
                self.write_word(addr as i64, value)?;
            }
            Op::BFETCH => {
                let addr = self.pop()?;
                let at = self.addr(addr as i64, 1)?;
                self.push(self.memory[at] as i32)?;
            }
            Op::BSTORE => {
                let value = self.pop()?;
                let addr = self.pop()?;
                let at = self.addr(addr as i64, 1)?;
                self.memory[at] = value as u8;
            }
            Op::ADD => self.binary(i32::wrapping_add)?,
            Op::SUB => self.binary(i32::wrapping_sub)?,
            Op::MUL => self.binary(i32::wrapping_mul)?,
            Op::DIV | Op::MOD => {
                let b = self.pop()?;
                let a = self.pop()?;
                if b == 0 {
                    return Err(self.fault(FaultKind::DivideByZero));
                }
                let value = if self.op == Op::DIV {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                };
                self.push(value)?;
            }
            Op::DUP => {
                let a = self.pop()?;
                self.push(a)?;
                self.push(a)?;
            }
            Op::DROP => {
                self.pop()?;
            }
            Op::SWAP => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
            }
            Op::OVER => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(a)?;
                self.push(b)?;
                self.push(a)?;
            }
            Op::EQ => self.binary(|a, b| flag(a == b))?,
            Op::LT => self.binary(|a, b| flag(a < b))?,
            Op::GT => self.binary(|a, b| flag(a > b))?,
            Op::NOT => {
                let a = self.pop()?;
                self.push(flag(a == FALSE))?;
            }
            Op::AND => self.binary(|a, b| a & b)?,
            Op::OR => self.binary(|a, b| a | b)?,
            Op::CJMP => {
                let target = self.operand()?;
                if self.pop()? != FALSE {
                    self.jump(target)?;
                    return Ok(State::Running);
                }
            }
            Op::CALL => {
                let target = self.operand()?;
                self.rpush(next as i32)?;
                self.jump(target)?;
                return Ok(State::Running);
            }
            Op::RETURN => {
                let target = self.rpop()?;
                self.jump(target)?;
                return Ok(State::Running);
            }
            Op::RPOP => {
                let value = self.rpop()?;
                self.push(value)?;
            }
            Op::RPUT => {
                let value = self.pop()?;
                self.rpush(value)?;
            }
            Op::RPEEK => {
                let res = self.ret.peek();
                let value = res.map_err(|kind| self.fault(kind))?;
                self.push(value)?;
            }
            Op::KEY => {
                let value = self.key()?;
                self.push(value)?;
            }
            Op::EMIT => {
                let value = self.pop()?;
                let res = self.output.write_all(&[value as u8]);
                res.map_err(|e| self.io_fault(e))?;
            }
            Op::JMP => {
                let target = self.operand()?;
                self.jump(target)?;
                return Ok(State::Running);
            }
            _ => return Err(self.fault(FaultKind::UnknownOpcode)),
        }
        self.ip = next;
        Ok(State::Running)
    }
}

impl<W: Write> Vm<io::Empty, W> {
    /// A machine whose `key` always sees end of input.
    pub fn without_input(config: &VmConfig, output: W) -> Self {
        Self::new(config, io::empty(), output)
    }
}
