//! This module contains a representation of concrete bit-vector values that
//! can be known and manipulated statically, at any width up to the EVM's word
//! size.
//!
//! Every operation here implements the exact modular semantics the EVM gives
//! to the corresponding opcode, truncated to the width of the operands. This
//! is what constant folding and model verification both rely on.

use std::fmt::{Display, Formatter};

use ethnum::{I256, U256};
use sha3::{Digest, Keccak256};

use crate::{constant::WORD_SIZE_BITS, expr::Width};

/// A concrete value of a known bit-width.
///
/// # Representation
///
/// The value is stored unsigned in a [`U256`] and is always masked to `width`
/// bits, so two words of equal width compare equal exactly when their bit
/// patterns do. Signed operations reinterpret the bit pattern as two's
/// complement at the word's own width.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Word {
    value: U256,
    width: Width,
}

impl Word {
    /// Constructs a new word of the given `width`, truncating `value` to fit.
    #[must_use]
    pub fn new(value: impl Into<U256>, width: Width) -> Self {
        let value = value.into() & mask(width);
        Self { value, width }
    }

    /// Constructs a word of `width` with all bits unset.
    #[must_use]
    pub fn zero(width: Width) -> Self {
        Self::new(0u8, width)
    }

    /// Constructs a word of `width` with the value one.
    #[must_use]
    pub fn one(width: Width) -> Self {
        Self::new(1u8, width)
    }

    /// Constructs a word of `width` with all bits set.
    #[must_use]
    pub fn ones(width: Width) -> Self {
        Self::new(U256::MAX, width)
    }

    /// Constructs a single-bit word from `value`.
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        Self::new(u8::from(value), 1)
    }

    /// Constructs a word from `value`, interpreting the result at `width` in
    /// two's complement.
    #[must_use]
    pub fn from_signed(value: I256, width: Width) -> Self {
        Self::new(U256::from_ne_bytes(value.to_ne_bytes()), width)
    }

    /// Gets the unsigned value of the word.
    #[must_use]
    pub fn value(&self) -> U256 {
        self.value
    }

    /// Gets the width of the word in bits.
    #[must_use]
    pub fn width(&self) -> Width {
        self.width
    }

    /// Gets the value of the word interpreted as a two's complement number at
    /// its own width.
    #[must_use]
    pub fn signed(&self) -> I256 {
        let extended = if self.is_negative() {
            self.value | !mask(self.width)
        } else {
            self.value
        };
        I256::from_ne_bytes(extended.to_ne_bytes())
    }

    /// Checks if the sign bit of the word is set.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.bit(u32::from(self.width) - 1)
    }

    /// Checks if the word is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.value == U256::ZERO
    }

    /// Gets the value of the bit at `index`, where bit zero is the least
    /// significant.
    #[must_use]
    pub fn bit(&self, index: u32) -> bool {
        index < 256 && (self.value >> index) & U256::ONE == U256::ONE
    }

    /// Gets the value as a `usize` if it fits.
    #[must_use]
    pub fn as_usize(&self) -> Option<usize> {
        usize::try_from(self.value).ok()
    }

    /// Gets the big-endian bytes of the word, using exactly `width / 8` bytes
    /// (rounded up).
    #[must_use]
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let byte_count = usize::from(self.width).div_ceil(8);
        let bytes = self.value.to_be_bytes();
        bytes[32 - byte_count..].to_vec()
    }

    /// Wrapping addition.
    #[must_use]
    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.value.wrapping_add(rhs.value), self.width)
    }

    /// Wrapping subtraction.
    #[must_use]
    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.value.wrapping_sub(rhs.value), self.width)
    }

    /// Wrapping multiplication.
    #[must_use]
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(self.value.wrapping_mul(rhs.value), self.width)
    }

    /// Unsigned division, where division by zero yields zero.
    #[must_use]
    pub fn udiv(self, rhs: Self) -> Self {
        match self.value.checked_div(rhs.value) {
            Some(value) => Self::new(value, self.width),
            None => Self::zero(self.width),
        }
    }

    /// Signed division, where division by zero yields zero and the overflowing
    /// case of the minimum value divided by minus one wraps.
    #[must_use]
    pub fn sdiv(self, rhs: Self) -> Self {
        if rhs.is_zero() {
            return Self::zero(self.width);
        }
        let min = Self::new(U256::ONE << (u32::from(self.width) - 1), self.width);
        if self == min && rhs == Self::ones(self.width) {
            return min;
        }
        Self::from_signed(self.signed().wrapping_div(rhs.signed()), self.width)
    }

    /// Unsigned remainder, where a zero modulus yields zero.
    #[must_use]
    pub fn urem(self, rhs: Self) -> Self {
        match self.value.checked_rem(rhs.value) {
            Some(value) => Self::new(value, self.width),
            None => Self::zero(self.width),
        }
    }

    /// Signed remainder, taking the sign of the dividend, where a zero modulus
    /// yields zero.
    #[must_use]
    pub fn srem(self, rhs: Self) -> Self {
        if rhs.is_zero() {
            return Self::zero(self.width);
        }
        let dividend = self.signed();
        let magnitude = dividend.unsigned_abs() % rhs.signed().unsigned_abs();
        let result = Self::new(magnitude, self.width);
        if dividend < 0 {
            Self::zero(self.width).sub(result)
        } else {
            result
        }
    }

    /// Wrapping exponentiation by squaring.
    #[must_use]
    pub fn exp(self, exponent: Self) -> Self {
        let mut result = Self::one(self.width);
        let mut base = self;
        let mut remaining = exponent.value;
        while remaining != U256::ZERO {
            if remaining & U256::ONE == U256::ONE {
                result = result.mul(base);
            }
            base = base.mul(base);
            remaining >>= 1;
        }
        result
    }

    /// Computes `(self + rhs) % modulus` without intermediate overflow, where a
    /// zero modulus yields zero.
    #[must_use]
    pub fn add_mod(self, rhs: Self, modulus: Self) -> Self {
        if modulus.is_zero() {
            return Self::zero(self.width);
        }
        let m = modulus.value;
        let a = self.value % m;
        let b = rhs.value % m;
        let value = if a >= m - b { a - (m - b) } else { a + b };
        Self::new(value, self.width)
    }

    /// Computes `(self * rhs) % modulus` without intermediate overflow, where a
    /// zero modulus yields zero.
    #[must_use]
    pub fn mul_mod(self, rhs: Self, modulus: Self) -> Self {
        if modulus.is_zero() {
            return Self::zero(self.width);
        }
        let a = Self::new(self.value % modulus.value, self.width);
        let mut result = Self::zero(self.width);
        for index in (0..u32::from(self.width)).rev() {
            result = result.add_mod(result, modulus);
            if rhs.bit(index) {
                result = result.add_mod(a, modulus);
            }
        }
        result
    }

    /// Bitwise and.
    #[must_use]
    pub fn and(self, rhs: Self) -> Self {
        Self::new(self.value & rhs.value, self.width)
    }

    /// Bitwise or.
    #[must_use]
    pub fn or(self, rhs: Self) -> Self {
        Self::new(self.value | rhs.value, self.width)
    }

    /// Bitwise exclusive or.
    #[must_use]
    pub fn xor(self, rhs: Self) -> Self {
        Self::new(self.value ^ rhs.value, self.width)
    }

    /// Bitwise negation.
    #[must_use]
    pub fn not(self) -> Self {
        Self::new(!self.value, self.width)
    }

    /// Logical left shift by `shift`, yielding zero for shifts of the width or
    /// more.
    #[must_use]
    pub fn shl(self, shift: Self) -> Self {
        match self.shift_amount(shift) {
            Some(amount) => Self::new(self.value << amount, self.width),
            None => Self::zero(self.width),
        }
    }

    /// Logical right shift by `shift`, yielding zero for shifts of the width or
    /// more.
    #[must_use]
    pub fn shr(self, shift: Self) -> Self {
        match self.shift_amount(shift) {
            Some(amount) => Self::new(self.value >> amount, self.width),
            None => Self::zero(self.width),
        }
    }

    /// Arithmetic right shift by `shift`, filling with the sign bit.
    #[must_use]
    pub fn sar(self, shift: Self) -> Self {
        match self.shift_amount(shift) {
            Some(amount) => Self::from_signed(self.signed() >> amount, self.width),
            None if self.is_negative() => Self::ones(self.width),
            None => Self::zero(self.width),
        }
    }

    /// Gets the byte at `index` of `self`, counting from the most significant
    /// byte, as the EVM's `BYTE` opcode does.
    #[must_use]
    pub fn byte(self, index: Self) -> Self {
        let byte_count = u32::from(self.width) / 8;
        match index.as_usize().and_then(|i| u32::try_from(i).ok()) {
            Some(i) if i < byte_count => {
                let shift = 8 * (byte_count - 1 - i);
                Self::new((self.value >> shift) & U256::from(0xffu8), self.width)
            }
            _ => Self::zero(self.width),
        }
    }

    /// Sign extends `self` from the byte at (little-endian) index `byte_index`,
    /// as the EVM's `SIGNEXTEND` opcode does.
    #[must_use]
    pub fn sign_extend_from_byte(self, byte_index: Self) -> Self {
        let byte_count = u32::from(self.width) / 8;
        let index = match byte_index.as_usize().and_then(|i| u32::try_from(i).ok()) {
            Some(i) if i + 1 < byte_count => i,
            _ => return self,
        };
        let sign_bit = 8 * index + 7;
        let low_mask = (U256::ONE << (sign_bit + 1)) - U256::ONE;
        if self.bit(sign_bit) {
            Self::new(self.value | !low_mask, self.width)
        } else {
            Self::new(self.value & low_mask, self.width)
        }
    }

    /// Equality as a single-bit word.
    #[must_use]
    pub fn eq_bit(self, rhs: Self) -> Self {
        Self::from_bool(self.value == rhs.value)
    }

    /// Unsigned less-than as a single-bit word.
    #[must_use]
    pub fn ult(self, rhs: Self) -> Self {
        Self::from_bool(self.value < rhs.value)
    }

    /// Unsigned less-than-or-equal as a single-bit word.
    #[must_use]
    pub fn ule(self, rhs: Self) -> Self {
        Self::from_bool(self.value <= rhs.value)
    }

    /// Signed less-than as a single-bit word.
    #[must_use]
    pub fn slt(self, rhs: Self) -> Self {
        Self::from_bool(self.signed() < rhs.signed())
    }

    /// Zero extends the word to `width`.
    #[must_use]
    pub fn zero_extend(self, width: Width) -> Self {
        Self::new(self.value, width)
    }

    /// Extracts the bits `high..=low` of the word.
    #[must_use]
    pub fn extract(self, high: Width, low: Width) -> Self {
        Self::new(self.value >> u32::from(low), high - low + 1)
    }

    /// Concatenates `low` below `self`.
    #[must_use]
    pub fn concat(self, low: Self) -> Self {
        let width = self.width + low.width;
        let high = if low.width == WORD_SIZE_BITS {
            U256::ZERO
        } else {
            self.value << u32::from(low.width)
        };
        Self::new(high | low.value, width)
    }

    /// Computes the Keccak-256 hash of the big-endian concatenation of `bytes`.
    #[must_use]
    pub fn keccak(bytes: &[u8]) -> Self {
        let digest = Keccak256::digest(bytes);
        let mut buffer = [0u8; 32];
        buffer.copy_from_slice(digest.as_slice());
        Self::new(U256::from_be_bytes(buffer), WORD_SIZE_BITS)
    }

    /// Gets the shift amount if it is less than the width of `self`.
    fn shift_amount(self, shift: Self) -> Option<u32> {
        shift
            .as_usize()
            .and_then(|s| u32::try_from(s).ok())
            .filter(|s| *s < u32::from(self.width))
    }
}

impl Display for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.value <= U256::from(0xffffu32) {
            write!(f, "{}", self.value)
        } else {
            write!(f, "0x{:x}", self.value)
        }
    }
}

/// Gets the mask with the low `width` bits set.
#[must_use]
pub fn mask(width: Width) -> U256 {
    if width >= WORD_SIZE_BITS {
        U256::MAX
    } else {
        (U256::ONE << u32::from(width)) - U256::ONE
    }
}
