// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Complement-checked storage for critical scalars.
//!
//! A [`Checked<T>`] keeps a value next to its bitwise complement. Any single
//! bit flip in either half breaks the relationship, so corruption of the
//! stored state is detected the next time it is read through
//! [`Checked::get`] or audited with [`Checked::validate`], instead of being
//! silently acted upon.
//!
//! Values are held in `Cell`s, so a checked field can be shared by plain
//! reference between the code that owns its contents and the code that
//! audits it. That makes this crate strictly single-threaded, which is the
//! only context it is meant for.
//!
//! Related fields are usually declared together with [`checked_group!`],
//! which generates a struct of checked fields plus a [`CheckedGroup`]
//! implementation that validates all of them and names the first bad one.

#![cfg_attr(not(test), no_std)]

use core::cell::Cell;

/// Scalars that can be stored in complemented form.
pub trait Complement: Copy + PartialEq {
    /// Width of the type, in bits.
    const BITS: u32;

    /// Returns the bitwise complement of `self`.
    fn complement(self) -> Self;

    /// Returns `self` with bit `bit` inverted. `bit` is taken modulo
    /// [`Complement::BITS`].
    fn flip_bit(self, bit: u32) -> Self;
}

macro_rules! impl_complement {
    ($($t:ty),* $(,)?) => {
        $(
            impl Complement for $t {
                const BITS: u32 = <$t>::BITS;

                #[inline(always)]
                fn complement(self) -> Self {
                    !self
                }

                #[inline(always)]
                fn flip_bit(self, bit: u32) -> Self {
                    self ^ (1 << (bit % Self::BITS))
                }
            }
        )*
    };
}

impl_complement!(u8, u16, u32, u64, usize);

/// Returned when a checked value and its complement disagree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Corrupted;

/// A value stored alongside its bitwise complement.
pub struct Checked<T: Complement> {
    value: Cell<T>,
    inverse: Cell<T>,
}

impl<T: Complement> Checked<T> {
    /// Creates a checked value, writing both halves.
    pub fn new(value: T) -> Self {
        Self {
            value: Cell::new(value),
            inverse: Cell::new(value.complement()),
        }
    }

    /// Overwrites the stored value, writing both halves together.
    pub fn store(&self, value: T) {
        self.value.set(value);
        self.inverse.set(value.complement());
    }

    /// Checks that the stored complement still matches the stored value.
    pub fn validate(&self) -> bool {
        self.inverse.get() == self.value.get().complement()
    }

    /// Reads the value, failing if either half has been disturbed.
    pub fn get(&self) -> Result<T, Corrupted> {
        let value = self.value.get();
        if self.inverse.get() == value.complement() {
            Ok(value)
        } else {
            Err(Corrupted)
        }
    }

    /// Returns the raw `(value, complement)` pair without checking it.
    pub fn raw(&self) -> (T, T) {
        (self.value.get(), self.inverse.get())
    }

    /// Inverts one bit of the stored value half, bypassing the complement.
    ///
    /// This stands in for a hardware upset in host simulation and tests.
    #[cfg(any(test, feature = "upset"))]
    pub fn upset_value(&self, bit: u32) {
        self.value.set(self.value.get().flip_bit(bit));
    }

    /// Inverts one bit of the stored complement half. See
    /// [`Checked::upset_value`].
    #[cfg(any(test, feature = "upset"))]
    pub fn upset_complement(&self, bit: u32) {
        self.inverse.set(self.inverse.get().flip_bit(bit));
    }
}

impl<T: Complement + core::fmt::Debug> core::fmt::Debug for Checked<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (value, inverse) = self.raw();
        f.debug_struct("Checked")
            .field("value", &value)
            .field("inverse", &inverse)
            .finish()
    }
}

/// A set of checked fields that are audited together.
pub trait CheckedGroup {
    /// Name of the group, for diagnostics.
    fn group_name(&self) -> &'static str;

    /// Returns the name of the first field whose complement does not match,
    /// or `None` if every field is intact.
    fn first_corrupt(&self) -> Option<&'static str>;

    /// Returns true iff every field in the group is intact.
    fn validate(&self) -> bool {
        self.first_corrupt().is_none()
    }
}

/// Declares a struct whose fields are all [`Checked`], along with a
/// constructor and a [`CheckedGroup`] implementation.
///
/// ```ignore
/// checked_group! {
///     /// Bounds and cursor of the region under test.
///     pub struct RegionCursor {
///         pub start: usize,
///         pub end: usize,
///         pub cursor: usize,
///     }
/// }
///
/// let c = RegionCursor::new(0, 1024, 0);
/// c.cursor.store(64);
/// assert!(c.validate());
/// ```
#[macro_export]
macro_rules! checked_group {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $t:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $crate::Checked<$t>,
            )*
        }

        impl $name {
            #[allow(clippy::too_many_arguments)]
            pub fn new($($field: $t),*) -> Self {
                Self {
                    $($field: $crate::Checked::new($field),)*
                }
            }
        }

        impl $crate::CheckedGroup for $name {
            fn group_name(&self) -> &'static str {
                stringify!($name)
            }

            fn first_corrupt(&self) -> Option<&'static str> {
                $(
                    if !self.$field.validate() {
                        return Some(stringify!($field));
                    }
                )*
                None
            }
        }
    };
}
