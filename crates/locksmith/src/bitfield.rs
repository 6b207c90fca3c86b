//! Growable bit-vector backing the per-lock "before" relation and the
//! registry's used-ID map.
//!
//! Storage is byte-aligned: a field with capacity `n` bits owns
//! `n.div_ceil(8)` bytes. Growth preserves every existing bit and
//! zero-fills the new bytes. A field never shrinks.

use std::collections::TryReserveError;

/// Number of bytes needed to hold `bits` bits.
#[inline]
#[must_use]
pub(crate) const fn bytes_for(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// A dynamically sized bit-vector with an explicit bit capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitField {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitField {
    /// Creates an empty field with zero capacity.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bits: 0,
        }
    }

    /// Creates a zeroed field able to hold `bits` bits.
    ///
    /// # Errors
    ///
    /// Returns the allocator error if the backing bytes cannot be reserved.
    pub fn with_capacity(bits: usize) -> Result<Self, TryReserveError> {
        let mut field = Self::new();
        field.grow(bits)?;
        Ok(field)
    }

    /// Capacity in bits.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bits
    }

    /// Grows the field to at least `bits` bits.
    ///
    /// Existing bits are preserved and new bits read as zero. Requests at or
    /// below the current capacity are no-ops. On error the field is left
    /// exactly as it was.
    pub fn grow(&mut self, bits: usize) -> Result<(), TryReserveError> {
        if bits <= self.bits {
            return Ok(());
        }
        let needed = bytes_for(bits);
        if needed > self.bytes.len() {
            self.bytes.try_reserve_exact(needed - self.bytes.len())?;
            self.bytes.resize(needed, 0);
        }
        self.bits = bits;
        Ok(())
    }

    /// Returns whether bit `index` is set. Bits past capacity read as zero.
    #[inline]
    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        if index >= self.bits {
            return false;
        }
        self.bytes[index / 8] & (1 << (index % 8)) != 0
    }

    /// Sets bit `index`, growing the field first when it lies past capacity.
    pub fn set(&mut self, index: usize) -> Result<(), TryReserveError> {
        if index >= self.bits {
            self.grow(index + 1)?;
        }
        self.bytes[index / 8] |= 1 << (index % 8);
        Ok(())
    }

    /// Clears bit `index`. Clearing past capacity is a no-op.
    #[inline]
    pub fn clear(&mut self, index: usize) {
        if index < self.bits {
            self.bytes[index / 8] &= !(1 << (index % 8));
        }
    }

    /// Lowest clear bit below capacity, if any.
    #[must_use]
    pub fn first_clear(&self) -> Option<usize> {
        self.bytes
            .iter()
            .enumerate()
            .find(|(_, byte)| **byte != u8::MAX)
            .map(|(i, byte)| i * 8 + byte.trailing_ones() as usize)
            .filter(|&index| index < self.bits)
    }

    /// Iterates over the indices of all set bits in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.bits).filter(move |&i| self.test(i))
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }
}
