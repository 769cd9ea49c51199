//! Streaming mean accumulation of aligned frames.

use ndarray::{Array2, ArrayView2, Zip};

use crate::error::Error;
use crate::Float;

/// Running arithmetic mean of equally shaped frames.
///
/// Frames are folded in one at a time with the incremental update
/// `mean += (frame - mean) / n`, so the frame history is never stored and
/// the partial sums never leave the value range of the inputs, no matter how
/// many frames are accumulated.
#[derive(Debug, Clone, Default)]
pub struct FrameStack<F: Float> {
    mean: Option<Array2<F>>,
    count: usize,
}

impl<F: Float> FrameStack<F> {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self {
            mean: None,
            count: 0,
        }
    }

    /// Fold one frame into the running mean.
    ///
    /// Every frame after the first must match the shape of the first.
    pub fn push(&mut self, frame: ArrayView2<F>) -> Result<(), Error> {
        match &mut self.mean {
            None => {
                self.mean = Some(frame.to_owned());
                self.count = 1;
            }
            Some(mean) => {
                if mean.dim() != frame.dim() {
                    return Err(Error::ShapeMismatch {
                        expected: mean.dim(),
                        actual: frame.dim(),
                    });
                }
                self.count += 1;
                let n = F::from_usize(self.count).unwrap();
                Zip::from(mean)
                    .and(frame)
                    .for_each(|mean, &value| *mean += (value - *mean) / n);
            }
        }
        Ok(())
    }

    /// Number of frames folded in so far.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether any frame has been folded in.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The current mean image, if any frame has been folded in.
    pub fn mean(&self) -> Option<ArrayView2<'_, F>> {
        self.mean.as_ref().map(|mean| mean.view())
    }

    /// Consume the accumulator, yielding the mean image.
    pub fn into_mean(self) -> Option<Array2<F>> {
        self.mean
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    use super::*;

    #[test]
    fn empty_stack_has_no_mean() {
        let stack = FrameStack::<f64>::new();
        assert!(stack.is_empty());
        assert!(stack.mean().is_none());
    }

    #[test]
    fn mean_matches_direct_computation() {
        let frames: Vec<Array2<f64>> = (0..3)
            .map(|_| Array2::random((16, 16), Uniform::new(0., 1.)))
            .collect();
        let direct = (&frames[0] + &frames[1] + &frames[2]) / 3.;

        let mut stack = FrameStack::new();
        for frame in &frames {
            stack.push(frame.view()).unwrap();
        }
        assert_eq!(stack.len(), 3);
        assert_abs_diff_eq!(stack.mean().unwrap(), direct.view(), epsilon = 1e-12);
    }

    #[test]
    fn refolding_reproduces_the_mean() {
        let frames: Vec<Array2<f64>> = (0..4)
            .map(|_| Array2::random((8, 8), Uniform::new(0., 1.)))
            .collect();

        let mut first = FrameStack::new();
        for frame in &frames {
            first.push(frame.view()).unwrap();
        }
        let mut second = FrameStack::new();
        for frame in &frames {
            second.push(frame.view()).unwrap();
        }

        assert_abs_diff_eq!(
            first.mean().unwrap(),
            second.mean().unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn single_frame_mean_is_the_frame() {
        let frame = Array2::random((8, 8), Uniform::new(0., 1.));
        let mut stack = FrameStack::new();
        stack.push(frame.view()).unwrap();
        assert_abs_diff_eq!(stack.into_mean().unwrap(), frame, epsilon = 1e-15);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut stack = FrameStack::new();
        stack.push(Array2::<f64>::zeros((4, 4)).view()).unwrap();
        let result = stack.push(Array2::<f64>::zeros((4, 5)).view());
        assert!(matches!(
            result,
            Err(Error::ShapeMismatch {
                expected: (4, 4),
                actual: (4, 5)
            })
        ));
        // the failed push leaves the accumulator untouched
        assert_eq!(stack.len(), 1);
    }
}
