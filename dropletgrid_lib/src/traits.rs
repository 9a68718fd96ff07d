use std::fmt::Debug;

use bytemuck::Pod;
use nalgebra::{RealField, SVector};
use num_traits::{Bounded, FromPrimitive, NumCast, ToPrimitive};

/// Convenience trait that combines `Send` and `Sync`
pub trait ThreadSafe: Sync + Send {}
impl<T> ThreadSafe for T where T: Sync + Send {}

/// Trait that has to be implemented for types to be used as physical coordinates in the context of the library (e.g. for cell bounds, particle positions)
pub trait Real:
RealField
// Not part of RealField anymore
+ Bounded
+ Copy
+ FromPrimitive
+ ToPrimitive
+ NumCast
+ Debug
+ Default
+ Pod
+ ThreadSafe
{
    /// Tries to convert this value to another [`Real`] type `T` by converting first to `f64` followed by `T::from_f64`. If the value cannot be represented by the target type, `None` is returned.
    fn try_convert<T: Real>(self) -> Option<T> {
        T::from_f64(self.to_f64()?)
    }

    /// Tries to convert the values of a statically sized `nalgebra::SVector` to another type, same behavior as [`Real::try_convert`]
    fn try_convert_vec_from<R, const D: usize>(vec: &SVector<R, D>) -> Option<SVector<Self, D>>
    where
        R: Real,
    {
        let mut converted = SVector::<Self, D>::zeros();
        for i in 0..D {
            converted[i] = vec[i].try_convert()?
        }
        Some(converted)
    }

    /// Returns the largest finite value of the type, used for the synthetic bounds of null axes
    fn largest() -> Self {
        <Self as Bounded>::max_value()
    }

    /// Returns the smallest (most negative) finite value of the type
    fn lowest() -> Self {
        <Self as Bounded>::min_value()
    }
}

impl<
    T: RealField
        + Bounded
        + Copy
        + FromPrimitive
        + ToPrimitive
        + NumCast
        + Debug
        + Default
        + Pod
        + ThreadSafe
        + 'static,
> Real for T
{
}
