use crate::lang::value::Value;
use crate::runtime::runtime_error::ErrorKind;

/// The operand stack.
///
/// Backed by a `Vec`, so pushes are amortized O(1) with doubling growth. Only
/// the tail is ever touched.
///
/// The stack also remembers its low-water mark: the fewest values it has held
/// since it was built or last marked. Everything below that mark is exactly
/// what was there at the mark.
#[derive(Debug, Clone, Default)]
pub struct OperandStack {
    values: Vec<Value>,
    low_water: usize,
}

impl OperandStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, ErrorKind> {
        let value = self.values.pop().ok_or(ErrorKind::StackUnderflow {
            needed: 1,
            available: 0,
        })?;
        self.low_water = self.low_water.min(self.values.len());
        Ok(value)
    }

    pub fn peek(&self) -> Result<&Value, ErrorKind> {
        self.values.last().ok_or(ErrorKind::StackUnderflow {
            needed: 1,
            available: 0,
        })
    }

    /// Pop `n` values, returned in the order they were pushed.
    ///
    /// Leaves the stack untouched when fewer than `n` values are present.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, ErrorKind> {
        let available = self.values.len();
        if available < n {
            return Err(ErrorKind::StackUnderflow {
                needed: n,
                available,
            });
        }
        self.low_water = self.low_water.min(available - n);
        Ok(self.values.split_off(available - n))
    }

    /// Replace the top `n` values with one list holding them in push order.
    pub fn make_list(&mut self, n: usize) -> Result<(), ErrorKind> {
        let items = self.pop_n(n)?;
        self.push(Value::list(items));
        Ok(())
    }

    /// Start counting the low-water mark from the current depth.
    pub fn mark_low_water(&mut self) {
        self.low_water = self.values.len();
    }

    pub fn low_water(&self) -> usize {
        self.low_water
    }

    /// Drop everything above the first `len` values.
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
        self.low_water = self.low_water.min(self.values.len());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

impl PartialEq for OperandStack {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl From<Vec<Value>> for OperandStack {
    fn from(values: Vec<Value>) -> Self {
        let low_water = values.len();
        Self { values, low_water }
    }
}
