//! Axis-aligned bounding boxes of simulation domains

use std::fmt;
use std::fmt::Debug;

use nalgebra::SVector;

use crate::Real;

/// Axis aligned box spanned by a lower and an upper corner
///
/// Points on the upper faces are outside of the box, in line with the half-open gridboxes.
#[derive(Clone, Eq, PartialEq)]
pub struct AxisAlignedBoundingBox<R: Real, const D: usize> {
    min: SVector<R, D>,
    max: SVector<R, D>,
}

/// Bounding box of a three dimensional domain, components ordered `(z, x, y)`
pub type Aabb3d<R> = AxisAlignedBoundingBox<R, 3>;

impl<R, const D: usize> AxisAlignedBoundingBox<R, D>
where
    R: Real,
{
    #[inline(always)]
    pub fn new(min: SVector<R, D>, max: SVector<R, D>) -> Self {
        Self { min, max }
    }

    /// Tries to convert the box to another real type, returns None if a coordinate is out of range
    pub fn try_convert<T>(&self) -> Option<AxisAlignedBoundingBox<T, D>>
    where
        T: Real,
    {
        Some(AxisAlignedBoundingBox::new(
            T::try_convert_vec_from(&self.min)?,
            T::try_convert_vec_from(&self.max)?,
        ))
    }

    #[inline(always)]
    pub fn min(&self) -> &SVector<R, D> {
        &self.min
    }

    #[inline(always)]
    pub fn max(&self) -> &SVector<R, D> {
        &self.max
    }

    /// Returns whether the box has a strictly positive extent along every dimension
    /// ```
    /// use dropletgrid_lib::Aabb3d;
    /// use nalgebra::Vector3;
    /// assert!(Aabb3d::new(Vector3::new(-1.0, 0.0, -3.0), Vector3::new(2.0, 2.0, 4.0)).is_non_degenerate());
    /// assert!(!Aabb3d::new(Vector3::new(-1.0, 1.0, -1.0), Vector3::new(1.0, 1.0, 1.0)).is_non_degenerate());
    /// ```
    pub fn is_non_degenerate(&self) -> bool {
        (0..D).all(|i| self.min[i] < self.max[i])
    }

    #[inline(always)]
    pub fn extents(&self) -> SVector<R, D> {
        self.max - self.min
    }

    /// Checks if the given point is inside of the box, lower bounds inclusive, upper bounds exclusive
    /// ```
    /// use dropletgrid_lib::Aabb3d;
    /// use nalgebra::Vector3;
    /// let domain = Aabb3d::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
    /// assert!(domain.contains_point(&Vector3::new(0.0, 0.5, 0.5)));
    /// assert!(!domain.contains_point(&Vector3::new(1.0, 0.5, 0.5)));
    /// ```
    #[inline(always)]
    pub fn contains_point(&self, point: &SVector<R, D>) -> bool {
        (0..D).all(|i| point[i] >= self.min[i] && point[i] < self.max[i])
    }

    /// Splits dimension `dim` into `n` gridboxes of equal width and returns the `n + 1` edges
    ///
    /// The last edge is exactly the upper bound of the box.
    pub fn uniform_edges(&self, dim: usize, n: usize) -> Vec<R> {
        let lower = self.min[dim];
        let extent = self.max[dim] - lower;
        let n_real = R::from_usize(n).unwrap_or_else(R::one);
        (0..=n)
            .map(|c| {
                if c == n {
                    self.max[dim]
                } else {
                    lower + extent * R::from_usize(c).unwrap_or_else(R::zero) / n_real
                }
            })
            .collect()
    }
}

impl<R, const D: usize> Debug for AxisAlignedBoundingBox<R, D>
where
    R: Real,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Aabb { min: [")?;
        for i in 0..D {
            let sep = if i + 1 < D { ", " } else { "" };
            write!(f, "{:.7}{}", self.min[i], sep)?;
        }
        f.write_str("], max: [")?;
        for i in 0..D {
            let sep = if i + 1 < D { ", " } else { "" };
            write!(f, "{:.7}{}", self.max[i], sep)?;
        }
        f.write_str("] }")
    }
}
