use crate::runtime::runtime_error::ErrorKind;
use crate::runtime::scope::ScopeRef;
use crate::runtime::stack::OperandStack;

/// How a frame was entered, and therefore how it must be left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Saved by `PUSH_STACK`, restored by `POP_STACK`.
    Stack,
    /// Saved by a routine `CALL`, restored by `RETURN`.
    Call { return_to: usize },
}

/// A parked operand stack and the scope that was current with it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub stack: OperandStack,
    pub scope: ScopeRef,
    pub kind: FrameKind,
}

/// Saved frames, innermost last.
///
/// A stack and its scope are pushed and popped as one record, so the saved
/// stack depth and the saved scope depth can never drift apart.
#[derive(Debug, Clone, Default)]
pub struct FrameStack {
    frames: Vec<Frame>,
    calls: usize,
    parked_values: usize,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_frame(&mut self, stack: OperandStack, scope: ScopeRef) {
        self.push(Frame {
            stack,
            scope,
            kind: FrameKind::Stack,
        });
    }

    pub fn save_call(&mut self, stack: OperandStack, scope: ScopeRef, return_to: usize) {
        self.calls += 1;
        self.push(Frame {
            stack,
            scope,
            kind: FrameKind::Call { return_to },
        });
    }

    pub fn restore_frame(&mut self) -> Result<(OperandStack, ScopeRef), ErrorKind> {
        if let FrameKind::Call { .. } = self.top_kind()? {
            return Err(ErrorKind::FrameMismatch { expected: "stack" });
        }
        let frame = self.pop()?;
        Ok((frame.stack, frame.scope))
    }

    /// Pop a call frame, yielding `(stack, scope, return_to)`.
    pub fn restore_call(&mut self) -> Result<(OperandStack, ScopeRef, usize), ErrorKind> {
        let FrameKind::Call { return_to } = self.top_kind()? else {
            return Err(ErrorKind::FrameMismatch { expected: "call" });
        };
        let frame = self.pop()?;
        self.calls -= 1;
        Ok((frame.stack, frame.scope, return_to))
    }

    fn top_kind(&self) -> Result<FrameKind, ErrorKind> {
        self.frames
            .last()
            .map(|frame| frame.kind)
            .ok_or(ErrorKind::FrameUnderflow)
    }

    fn push(&mut self, frame: Frame) {
        self.parked_values += frame.stack.len();
        self.frames.push(frame);
    }

    fn pop(&mut self) -> Result<Frame, ErrorKind> {
        let frame = self.frames.pop().ok_or(ErrorKind::FrameUnderflow)?;
        self.parked_values -= frame.stack.len();
        Ok(frame)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of pending routine calls.
    pub fn call_depth(&self) -> usize {
        self.calls
    }

    /// Values held by all parked stacks together.
    pub fn parked_values(&self) -> usize {
        self.parked_values
    }

    /// Return addresses of pending routine calls, outermost first.
    pub fn return_addresses(&self) -> Vec<usize> {
        self.frames
            .iter()
            .filter_map(|f| match f.kind {
                FrameKind::Call { return_to } => Some(return_to),
                FrameKind::Stack => None,
            })
            .collect()
    }
}
