// SPDX-License-Identifier: AGPL-3.0-only

//! Element-wise conversion to and from the engine's canonical numeric type.
//!
//! Converting a slice that is already [`Real`] is free: [`to_real`] hands
//! the caller's storage back as a borrow. Any other element type is copied
//! into a fresh [`Buffer`] allocated through the execution context.

use crate::error::{AmsError, Result};
use crate::resource::{Buffer, ExecutionContext};
use std::ops::Deref;

/// Canonical value type of every feature vector the core moves.
pub type Real = f64;

/// Numeric element types the engine can convert to and from [`Real`].
pub trait Scalar: Copy + Send + Sync + Default + 'static {
    fn to_real(self) -> Real;

    fn from_real(value: Real) -> Self;

    /// Reinterpret as `[Real]` when `Self` is `Real`, for zero-copy casts.
    fn as_real_slice(_data: &[Self]) -> Option<&[Real]> {
        None
    }
}

impl Scalar for f64 {
    #[inline]
    fn to_real(self) -> Real {
        self
    }

    #[inline]
    fn from_real(value: Real) -> Self {
        value
    }

    fn as_real_slice(data: &[Self]) -> Option<&[Real]> {
        Some(data)
    }
}

macro_rules! lossy_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                #[inline]
                #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
                fn to_real(self) -> Real {
                    self as Real
                }

                #[inline]
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                fn from_real(value: Real) -> Self {
                    value as $t
                }
            }
        )*
    };
}

lossy_scalar!(f32, i32, i64, u32, u64);

/// Result of [`to_real`]: the caller's data when no conversion was needed,
/// an owned converted copy otherwise.
#[derive(Debug)]
pub enum RealBuffer<'a> {
    Borrowed(&'a [Real]),
    Owned(Buffer<Real>),
}

impl RealBuffer<'_> {
    /// True when no allocation took place.
    #[must_use]
    pub const fn is_borrowed(&self) -> bool {
        matches!(self, Self::Borrowed(_))
    }
}

impl Deref for RealBuffer<'_> {
    type Target = [Real];

    fn deref(&self) -> &[Real] {
        match self {
            Self::Borrowed(data) => data,
            Self::Owned(buf) => buf,
        }
    }
}

/// View `data` as [`Real`] values, converting only if `S` is not `Real`.
///
/// # Errors
///
/// [`AmsError::Allocation`] if a converted copy cannot be allocated.
pub fn to_real<'a, S: Scalar>(ctx: &ExecutionContext, data: &'a [S]) -> Result<RealBuffer<'a>> {
    if let Some(real) = S::as_real_slice(data) {
        return Ok(RealBuffer::Borrowed(real));
    }
    let mut buf = ctx.allocate::<Real>(data.len())?;
    for (dst, &src) in buf.iter_mut().zip(data) {
        *dst = src.to_real();
    }
    Ok(RealBuffer::Owned(buf))
}

/// Convert `src` element-wise into the front of `dest`.
///
/// # Errors
///
/// [`AmsError::ShortBuffer`] when `dest` is shorter than `src`.
pub fn from_real<S: Scalar>(src: &[Real], dest: &mut [S]) -> Result<()> {
    if dest.len() < src.len() {
        return Err(AmsError::ShortBuffer {
            what: "cast destination",
            required: src.len(),
            actual: dest.len(),
        });
    }
    for (dst, &v) in dest.iter_mut().zip(src) {
        *dst = S::from_real(v);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identity_cast_borrows_without_allocating() {
        let ctx = ExecutionContext::host();
        let data = vec![1.5, 2.5];
        let real = to_real(&ctx, &data).unwrap();
        assert!(real.is_borrowed());
        assert_eq!(real.as_ptr(), data.as_ptr());
        assert_eq!(ctx.tracker().allocations(), 0);
    }

    #[test]
    fn widening_cast_allocates_once() {
        let ctx = ExecutionContext::accelerator();
        let data = [1.0_f32, -2.0, 0.25];
        let real = to_real(&ctx, &data).unwrap();
        assert!(!real.is_borrowed());
        assert_eq!(&*real, &[1.0, -2.0, 0.25]);
        assert_eq!(ctx.tracker().allocations(), 1);
        drop(real);
        assert_eq!(ctx.tracker().live_bytes(), 0);
    }

    #[test]
    fn integer_round_trip() {
        let ctx = ExecutionContext::host();
        let ids = [3_u32, 0, 42];
        let real = to_real(&ctx, &ids).unwrap();
        let mut back = [0_u32; 3];
        from_real(&real, &mut back).unwrap();
        assert_eq!(back, ids);
    }

    #[test]
    fn narrowing_into_short_destination_fails() {
        let mut dest = [0.0_f32; 1];
        let err = from_real(&[1.0, 2.0], &mut dest).unwrap_err();
        assert!(matches!(
            err,
            AmsError::ShortBuffer {
                required: 2,
                actual: 1,
                ..
            }
        ));
    }
}
