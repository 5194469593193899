//! This module contains the implementation of the symbolic virtual machine's
//! stack.

use crate::{constant::MAXIMUM_STACK_DEPTH, expr::SymbolicValue, vm::outcome::ExceptionKind};

/// The representation of the symbolic virtual machine's stack.
///
/// # Indexing
///
/// Indexing into this stack is zero-based, where frame 0 is the top stack
/// frame.
///
/// # Depth
///
/// In a true EVM, it is a depth [`MAXIMUM_STACK_DEPTH`] stack, where each item
/// is word (256-bit) sized. Here, the symbolic virtual machine maintains the
/// same maximum depth, but stores word-wide [`SymbolicValue`]s instead of
/// words.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Stack {
    data: Vec<SymbolicValue>,
}

impl Stack {
    /// Creates a new stack without any items on it.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes the provided value onto the top of the stack.
    ///
    /// # Errors
    ///
    /// If the stack cannot grow to accommodate the requested `data`.
    pub fn push(&mut self, data: SymbolicValue) -> Result<(), ExceptionKind> {
        if self.data.len() >= MAXIMUM_STACK_DEPTH {
            return Err(ExceptionKind::StackOverflow);
        }
        self.data.push(data);
        Ok(())
    }

    /// Pops the top value from the stack.
    ///
    /// # Errors
    ///
    /// If the stack has no item to pop.
    pub fn pop(&mut self) -> Result<SymbolicValue, ExceptionKind> {
        self.data.pop().ok_or(ExceptionKind::StackUnderflow)
    }

    /// Pops the top `N` values from the stack, with the top value first.
    ///
    /// # Errors
    ///
    /// If the stack has fewer than `N` items, in which case it is left
    /// untouched.
    pub fn pop_n<const N: usize>(&mut self) -> Result<[SymbolicValue; N], ExceptionKind> {
        self.check_frame_at(N.saturating_sub(1))?;
        let values: Vec<SymbolicValue> = self.data.drain(self.data.len() - N..).rev().collect();
        values.try_into().map_err(|_| ExceptionKind::StackUnderflow)
    }

    /// Reads from the stack frame at the provided `depth`.
    ///
    /// # Errors
    ///
    /// If `depth` does not exist in the stack.
    pub fn read(&self, depth: usize) -> Result<&SymbolicValue, ExceptionKind> {
        self.check_frame_at(depth)?;
        Ok(&self.data[self.data.len() - 1 - depth])
    }

    /// Duplicates the stack item at `frame` onto the top of the stack.
    ///
    /// This is a more general case of the `DUP` opcodes as it can duplicate any
    /// available stack frame. `DUPN` is `dup(N - 1)`.
    ///
    /// # Errors
    ///
    /// If `frame` doesn't exist, or the stack is full.
    pub fn dup(&mut self, frame: usize) -> Result<(), ExceptionKind> {
        let value = self.read(frame)?.clone();
        self.push(value)
    }

    /// Swaps the top stack item with the item in `frame`.
    ///
    /// Note that this swaps with the indicated frame directly, rather than the
    /// `n+1`th frame as for the `SWAP` opcodes, so `SWAPN` is `swap(N)`.
    ///
    /// # Errors
    ///
    /// If either the source or target stack frame do not exist.
    pub fn swap(&mut self, frame: usize) -> Result<(), ExceptionKind> {
        self.check_frame_at(frame)?;
        let top = self.data.len() - 1;
        self.data.swap(top, top - frame);
        Ok(())
    }

    /// Gets the current size of the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Checks if the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates over the stack from the bottom to the top.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolicValue> {
        self.data.iter()
    }

    /// Checks if a frame exists at the provided `depth`.
    ///
    /// # Errors
    ///
    /// If there is no such stack frame.
    pub fn check_frame_at(&self, depth: usize) -> Result<(), ExceptionKind> {
        if depth >= self.data.len() {
            return Err(ExceptionKind::StackUnderflow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        constant::MAXIMUM_STACK_DEPTH,
        expr::SymbolicValue,
        vm::{outcome::ExceptionKind, state::stack::Stack},
    };

    fn word(value: u64) -> SymbolicValue {
        SymbolicValue::word(value)
    }

    #[test]
    fn can_push_and_pop() -> anyhow::Result<()> {
        let mut stack = Stack::new();
        stack.push(word(1))?;
        stack.push(word(2))?;

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop()?.as_concrete(), Some(U256::from(2u8)));
        assert_eq!(stack.pop()?.as_concrete(), Some(U256::ONE));
        assert_eq!(stack.pop(), Err(ExceptionKind::StackUnderflow));

        Ok(())
    }

    #[test]
    fn pops_many_with_the_top_first() -> anyhow::Result<()> {
        let mut stack = Stack::new();
        for value in 1..=3 {
            stack.push(word(value))?;
        }
        let [a, b] = stack.pop_n::<2>()?;

        assert_eq!(a.as_concrete(), Some(U256::from(3u8)));
        assert_eq!(b.as_concrete(), Some(U256::from(2u8)));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.pop_n::<2>(), Err(ExceptionKind::StackUnderflow));
        assert_eq!(stack.len(), 1);

        Ok(())
    }

    #[test]
    fn can_dup_and_swap() -> anyhow::Result<()> {
        let mut stack = Stack::new();
        for value in 1..=3 {
            stack.push(word(value))?;
        }

        stack.dup(2)?;
        assert_eq!(stack.read(0)?.as_concrete(), Some(U256::ONE));

        stack.swap(3)?;
        assert_eq!(stack.read(0)?.as_concrete(), Some(U256::ONE));
        assert_eq!(stack.read(3)?.as_concrete(), Some(U256::ONE));

        stack.swap(1)?;
        assert_eq!(stack.read(0)?.as_concrete(), Some(U256::from(3u8)));
        assert_eq!(stack.swap(4), Err(ExceptionKind::StackUnderflow));

        Ok(())
    }

    #[test]
    fn overflows_at_maximum_depth() -> anyhow::Result<()> {
        let mut stack = Stack::new();
        for _ in 0..MAXIMUM_STACK_DEPTH {
            stack.push(word(0))?;
        }
        assert_eq!(stack.push(word(0)), Err(ExceptionKind::StackOverflow));
        assert_eq!(stack.dup(0), Err(ExceptionKind::StackOverflow));

        Ok(())
    }
}
