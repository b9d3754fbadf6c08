use log::debug;
use ndarray::{Array3, ArrayView3};

use super::matrix::{Method, SpilloverMatrix};
use super::solver::compensate;
use crate::error::CompensationResult;

/// Compensate a `[height, width, channel]` image pixel by pixel.
///
/// Every pixel is one observation row, in row-major raster order. The output
/// keeps height and width; its channel count is the matrix output channel
/// count (or the input count when no pixel is finite and the image is
/// returned as-is).
pub fn compensate_image(
    image: ArrayView3<'_, f64>,
    spillover: &SpilloverMatrix,
    method: Method,
) -> CompensationResult<Array3<f64>> {
    let (height, width, channels) = image.dim();
    debug!("compensating {height}x{width} image with {channels} channels ({method})");

    let pixels = image.to_shape((height * width, channels))?;
    let compensated = compensate(pixels.view(), spillover, method)?;
    let out_channels = compensated.ncols();
    Ok(compensated.into_shape_with_order((height, width, out_channels))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompensationError;
    use ndarray::{array, s, Array3};

    fn simple_matrix() -> SpilloverMatrix {
        SpilloverMatrix::from_rows(&[vec![1.0, 0.1], vec![0.0, 1.0]]).unwrap()
    }

    #[test]
    fn compensates_every_pixel() {
        let image = array![
            [[1.0, 0.1], [0.0, 1.0], [1.0, 0.1]],
            [[0.0, 1.0], [1.0, 0.1], [2.0, 0.2]]
        ];
        let expected = array![
            [[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]],
            [[0.0, 1.0], [1.0, 0.0], [2.0, 0.0]]
        ];
        for method in [Method::LeastSquares, Method::NonNegativeLeastSquares] {
            let out = compensate_image(image.view(), &simple_matrix(), method).unwrap();
            assert_eq!(out.dim(), (2, 3, 2));
            for (a, e) in out.iter().zip(expected.iter()) {
                assert!((a - e).abs() < 1e-6, "{method}: {out}");
            }
        }
    }

    #[test]
    fn preserves_raster_order_for_non_standard_layout() {
        // A transposed view is not in standard layout; pixel (y, x) must still map to (y, x).
        let mut base = Array3::<f64>::zeros((3, 2, 2));
        base[(2, 1, 0)] = 4.0;
        let image = base.view().permuted_axes([1, 0, 2]);
        let out = compensate_image(image, &SpilloverMatrix::identity(2).unwrap(), Method::LeastSquares)
            .unwrap();
        assert_eq!(out.dim(), (2, 3, 2));
        assert!((out[(1, 2, 0)] - 4.0).abs() < 1e-12);
        assert_eq!(out.slice(s![.., .., 1]).sum(), 0.0);
    }

    #[test]
    fn non_square_matrix_sets_output_channels() {
        let sm = SpilloverMatrix::from_rows(&[vec![1.0, 0.2, 0.0], vec![0.0, 0.1, 1.0]]).unwrap();
        let image = Array3::<f64>::ones((4, 5, 3));
        let out = compensate_image(image.view(), &sm, Method::LeastSquares).unwrap();
        assert_eq!(out.dim(), (4, 5, 2));
    }

    #[test]
    fn nan_pixel_propagates() {
        let mut image = Array3::<f64>::from_elem((2, 2, 2), 0.5);
        image[(1, 0, 1)] = f64::NAN;
        let out = compensate_image(image.view(), &simple_matrix(), Method::NonNegativeLeastSquares)
            .unwrap();
        assert!(out[(1, 0, 0)].is_nan() && out[(1, 0, 1)].is_nan());
        assert!(out[(0, 0, 0)].is_finite());
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let image = Array3::<f64>::zeros((2, 2, 3));
        let err = compensate_image(image.view(), &simple_matrix(), Method::LeastSquares).unwrap_err();
        assert!(matches!(err, CompensationError::ShapeMismatch { expected: 2, actual: 3 }));
    }
}
