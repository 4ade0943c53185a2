use ndarray::{NdFloat, ScalarOperand};

use num_traits::{AsPrimitive, FromPrimitive, NumCast};

use std::iter::Sum;
use std::ops::{AddAssign, SubAssign};

mod common;
mod landmarks;

pub use common::{DataPoint, Sample};
pub use landmarks::{
    normalize, HandPose, Landmark, PoseError, FEATURE_LEN, LANDMARK_COUNT, WRIST,
};

/// Numeric type the algorithm crates are generic over.
///
/// Split thresholds and leaf weights are stored in `Self`; exported graphs
/// always carry `f32`, hence the `AsPrimitive<f32>` bound.
pub trait Float:
    NdFloat
    + FromPrimitive
    + Default
    + Sum
    + AsPrimitive<f32>
    + for<'a> AddAssign<&'a Self>
    + for<'a> SubAssign<&'a Self>
    + ScalarOperand
    + std::marker::Unpin
{
    fn cast<T: NumCast>(x: T) -> Option<Self> {
        NumCast::from(x)
    }
}

impl Float for f32 {}

impl Float for f64 {}
