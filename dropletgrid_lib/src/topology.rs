//! Helper types for the cartesian topology of the gridbox domain
//!
//! All three-component quantities of the crate (cell counts, cell coordinates, positions) are
//! ordered `(z, x, y)`, i.e. the vertical axis comes first.

/// Direction on a coordinate axis or identifiers for the end points of an interval
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Direction {
    Negative = 0,
    Positive = 1,
}

/// The cartesian coordinate axes of the domain in storage order
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Axis {
    /// The vertical axis (fastest running index of the global cell numbering)
    Z = 0,
    /// The first horizontal axis
    X = 1,
    /// The second horizontal axis
    Y = 2,
}

/// Identifies a direction along a specific cartesian axis, i.e. one of the six faces of a gridbox
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DirectedAxis {
    pub axis: Axis,
    pub direction: Direction,
}

/// Collection that stores one value per unique [`DirectedAxis`], used e.g. to store the face neighbors of a gridbox
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub struct DirectedAxisArray<T> {
    data: [T; 6],
}

/// Offset between two partition slices, every component is one of `-1`, `0` or `1`
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SliceOffset([i8; 3]);

impl Direction {
    /// Returns a reference to an array containing all possible directions
    /// ```
    /// use dropletgrid_lib::topology::Direction;
    /// assert_eq!(Direction::all_possible().len(), 2);
    /// ```
    pub const fn all_possible() -> &'static [Direction; 2] {
        &ALL_DIRECTIONS
    }

    /// Returns the opposite direction
    pub const fn opposite(&self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
        }
    }

    /// Returns `-1` or `+1` depending on the direction
    /// ```
    /// use dropletgrid_lib::topology::Direction;
    /// assert_eq!(Direction::Negative.signum(), -1);
    /// assert_eq!(Direction::Positive.signum(), 1);
    /// ```
    #[inline(always)]
    pub const fn signum(&self) -> i8 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }

    /// Returns whether the direction is positive
    #[inline(always)]
    pub const fn is_positive(&self) -> bool {
        match self {
            Direction::Positive => true,
            Direction::Negative => false,
        }
    }

    /// Returns whether the direction is negative
    #[inline(always)]
    pub const fn is_negative(&self) -> bool {
        !self.is_positive()
    }
}

const ALL_DIRECTIONS: [Direction; 2] = [Direction::Negative, Direction::Positive];

impl Axis {
    /// Returns a reference to an array containing all axes in storage order (z, x, y)
    /// ```
    /// use dropletgrid_lib::topology::Axis;
    /// assert_eq!(Axis::all_possible()[0], Axis::Z);
    /// assert_eq!(Axis::all_possible()[2], Axis::Y);
    /// ```
    #[inline(always)]
    pub const fn all_possible() -> &'static [Axis; 3] {
        &ALL_AXES
    }

    /// Converts the axis into the corresponding component index (Z=0, X=1, Y=2)
    #[inline(always)]
    pub const fn dim(self) -> usize {
        self as usize
    }

    /// Converts a component index back into an axis, panics if the index is larger than 2
    #[inline(always)]
    pub const fn from_dim(dim: usize) -> Self {
        ALL_AXES[dim]
    }

    /// Combines this coordinate axis with a direction into a [`DirectedAxis`]
    /// ```
    /// use dropletgrid_lib::topology::{Axis, DirectedAxis, Direction};
    /// assert_eq!(Axis::X.with_direction(Direction::Positive), DirectedAxis::new(Axis::X, Direction::Positive));
    /// ```
    #[inline(always)]
    pub const fn with_direction(self, direction: Direction) -> DirectedAxis {
        DirectedAxis::new(self, direction)
    }
}

const ALL_AXES: [Axis; 3] = [Axis::Z, Axis::X, Axis::Y];

impl DirectedAxis {
    /// Returns a reference to an array of all six directed axes
    #[inline(always)]
    pub const fn all_possible() -> &'static [DirectedAxis; 6] {
        &ALL_DIRECTED_AXES
    }

    /// Constructs a new directed axis
    #[inline(always)]
    pub const fn new(axis: Axis, direction: Direction) -> Self {
        Self { axis, direction }
    }

    /// Returns a directed axis with the opposite direction
    /// ```
    /// use dropletgrid_lib::topology::{Axis, DirectedAxis, Direction};
    /// assert_eq!(DirectedAxis::new(Axis::Z, Direction::Negative).opposite(),
    ///            DirectedAxis::new(Axis::Z, Direction::Positive));
    /// ```
    #[inline(always)]
    pub const fn opposite(&self) -> Self {
        Self::new(self.axis, self.direction.opposite())
    }

    /// Converts the directed axis into a unique index in the range `(0..=5)`
    #[inline(always)]
    pub const fn to_usize(&self) -> usize {
        self.axis as usize + (self.direction as usize * 3)
    }

    /// Converts an index in the range `(0..=5)` to the corresponding directed axis, panics if the index is out of range
    #[inline(always)]
    pub const fn from_usize(n: usize) -> Self {
        Self::all_possible()[n]
    }

    /// Returns the slice offset that points one step along this directed axis
    /// ```
    /// use dropletgrid_lib::topology::{Axis, DirectedAxis, Direction, SliceOffset};
    /// assert_eq!(DirectedAxis::new(Axis::X, Direction::Negative).slice_offset(),
    ///            SliceOffset::new([0, -1, 0]));
    /// ```
    pub fn slice_offset(&self) -> SliceOffset {
        let mut offset = [0; 3];
        offset[self.axis.dim()] = self.direction.signum();
        SliceOffset(offset)
    }
}

const ALL_DIRECTED_AXES: [DirectedAxis; 6] = [
    DirectedAxis::new(Axis::Z, Direction::Negative),
    DirectedAxis::new(Axis::X, Direction::Negative),
    DirectedAxis::new(Axis::Y, Direction::Negative),
    DirectedAxis::new(Axis::Z, Direction::Positive),
    DirectedAxis::new(Axis::X, Direction::Positive),
    DirectedAxis::new(Axis::Y, Direction::Positive),
];

impl<T> DirectedAxisArray<T> {
    /// Constructs a new array and fills it with values produced by the given closure
    pub fn new_with<F: FnMut(&DirectedAxis) -> T>(mut f: F) -> Self {
        Self {
            data: std::array::from_fn(|i| f(&DirectedAxis::all_possible()[i])),
        }
    }

    /// Returns a reference to the value stored for the given axis
    pub fn get(&self, axis: &DirectedAxis) -> &T {
        &self.data[axis.to_usize()]
    }

    /// Returns a mutable reference to the value stored for the given axis
    pub fn get_mut(&mut self, axis: &DirectedAxis) -> &mut T {
        &mut self.data[axis.to_usize()]
    }

    /// Returns an iterator of all unique directed axes and references to the corresponding stored value
    pub fn iter(&self) -> impl Iterator<Item = (&DirectedAxis, &T)> {
        DirectedAxis::all_possible().iter().zip(self.data.iter())
    }

    /// Returns an iterator over references of all stored values
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }
}

impl SliceOffset {
    /// The number of distinct non-zero offsets
    pub const NUM_NEIGHBORS: usize = 26;

    /// Constructs an offset, panics if a component is not in `{-1, 0, 1}`
    pub fn new(offset: [i8; 3]) -> Self {
        assert!(
            offset.iter().all(|o| (-1..=1).contains(o)),
            "slice offset components have to be -1, 0 or 1"
        );
        Self(offset)
    }

    /// Returns the offset components in `(z, x, y)` order
    #[inline(always)]
    pub fn components(&self) -> [i8; 3] {
        self.0
    }

    /// Returns whether this is the zero offset (pointing to the slice itself)
    pub fn is_zero(&self) -> bool {
        self.0 == [0, 0, 0]
    }

    /// Returns the offset pointing in the opposite direction
    pub fn opposite(&self) -> Self {
        Self([-self.0[0], -self.0[1], -self.0[2]])
    }

    /// Converts the offset into a unique index in `0..27`, the zero offset maps to 13
    #[inline(always)]
    pub fn to_usize(&self) -> usize {
        let [dz, dx, dy] = self.0.map(|o| (o + 1) as usize);
        dz + 3 * (dx + 3 * dy)
    }

    /// Iterates over all 26 non-zero offsets in a fixed order (z running fastest)
    /// ```
    /// use dropletgrid_lib::topology::SliceOffset;
    /// assert_eq!(SliceOffset::all_neighbors().count(), 26);
    /// assert!(SliceOffset::all_neighbors().all(|o| !o.is_zero()));
    /// ```
    pub fn all_neighbors() -> impl Iterator<Item = SliceOffset> {
        itertools::iproduct!(-1i8..=1, -1i8..=1, -1i8..=1)
            .map(|(dy, dx, dz)| SliceOffset([dz, dx, dy]))
            .filter(|o| !o.is_zero())
    }
}
