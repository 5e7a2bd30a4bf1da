//! Numeric element types the kernels are generic over.
use crate::config::ElementType;
use rand::Rng;
use std::fmt::Debug;

mod sealed {
    pub trait Sealed {}
}

/// Element of a working-set array.
///
/// Implemented only for `f32`, `f64` and `i32`. The all-zero bit pattern is a
/// valid value of every implementor, which lets freshly mapped (zeroed)
/// memory be viewed as a slice of elements. Integer arithmetic wraps.
pub trait Element: sealed::Sealed + Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    const TYPE: ElementType;

    fn from_f32(v: f32) -> Self;

    /// Draw one fill value; consumes exactly one `f32` from the generator
    fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self;

    fn add(self, rhs: Self) -> Self;

    fn mul(self, rhs: Self) -> Self;
}

macro_rules! impl_element_float {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const TYPE: ElementType = ElementType::$variant;

                #[inline(always)]
                fn from_f32(v: f32) -> Self {
                    v as $ty
                }

                fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
                    rng.random::<f32>() as $ty
                }

                #[inline(always)]
                fn add(self, rhs: Self) -> Self {
                    self + rhs
                }

                #[inline(always)]
                fn mul(self, rhs: Self) -> Self {
                    self * rhs
                }
            }
        )*
    };
}

impl_element_float!(f32 => F32, f64 => F64);

impl sealed::Sealed for i32 {}

impl Element for i32 {
    const TYPE: ElementType = ElementType::I32;

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        v as i32
    }

    fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // [0, 1) scaled so integer data is not all zeros
        (rng.random::<f32>() * 16.0) as i32
    }

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        self.wrapping_mul(rhs)
    }
}
