use crate::types::{CloudError, CloudResult};
use ndarray::{s, Array2, Array4, ArrayView2, ArrayView4};
use num_traits::Zero;

/// Apply a 2-D frame function independently over the (time, band) axes of a
/// 4-D stack.
///
/// The output spatial shape is taken from the first mapped slice, so the
/// function may change the frame size (resampling) as long as every slice
/// agrees. Slices are processed in parallel when the `parallel` feature is
/// enabled; results are identical either way.
pub fn map_sequence<T, U, F>(stack: ArrayView4<T>, f: F) -> CloudResult<Array4<U>>
where
    T: Sync,
    U: Clone + Zero + Send,
    F: Fn(usize, usize, ArrayView2<T>) -> CloudResult<Array2<U>> + Sync,
{
    let (num_frames, _, _, num_bands) = stack.dim();
    if num_frames == 0 || num_bands == 0 {
        return Err(CloudError::ShapeMismatch(format!(
            "Sequence mapping requires at least one frame and one band, got {} frames and {} bands",
            num_frames, num_bands
        )));
    }

    log::debug!(
        "Mapping {} frame-band slices ({} frames, {} bands)",
        num_frames * num_bands,
        num_frames,
        num_bands
    );

    let results = map_slices(&stack, &f, num_frames, num_bands)?;

    let (height, width) = results[0].1.dim();
    let mut out = Array4::<U>::zeros((num_frames, height, width, num_bands));
    for ((frame, band), plane) in results {
        if plane.dim() != (height, width) {
            return Err(CloudError::ShapeMismatch(format!(
                "Slice (frame {}, band {}) produced shape {:?}, expected {:?}",
                frame,
                band,
                plane.dim(),
                (height, width)
            )));
        }
        out.slice_mut(s![frame, .., .., band]).assign(&plane);
    }

    Ok(out)
}

#[cfg(feature = "parallel")]
fn map_slices<T, U, F>(
    stack: &ArrayView4<T>,
    f: &F,
    num_frames: usize,
    num_bands: usize,
) -> CloudResult<Vec<((usize, usize), Array2<U>)>>
where
    T: Sync,
    U: Send,
    F: Fn(usize, usize, ArrayView2<T>) -> CloudResult<Array2<U>> + Sync,
{
    use rayon::prelude::*;

    let indices: Vec<(usize, usize)> = (0..num_frames)
        .flat_map(|t| (0..num_bands).map(move |b| (t, b)))
        .collect();

    indices
        .into_par_iter()
        .map(|(t, b)| {
            let plane = stack.slice(s![t, .., .., b]);
            f(t, b, plane).map(|mapped| ((t, b), mapped))
        })
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn map_slices<T, U, F>(
    stack: &ArrayView4<T>,
    f: &F,
    num_frames: usize,
    num_bands: usize,
) -> CloudResult<Vec<((usize, usize), Array2<U>)>>
where
    T: Sync,
    U: Send,
    F: Fn(usize, usize, ArrayView2<T>) -> CloudResult<Array2<U>> + Sync,
{
    let mut results = Vec::with_capacity(num_frames * num_bands);
    for t in 0..num_frames {
        for b in 0..num_bands {
            let plane = stack.slice(s![t, .., .., b]);
            results.push(((t, b), f(t, b, plane)?));
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_identity_map_preserves_values() {
        let stack = Array4::from_shape_fn((3, 4, 5, 2), |(t, i, j, b)| {
            (t * 1000 + i * 100 + j * 10 + b) as f32
        });

        let mapped = map_sequence(stack.view(), |_, _, plane| Ok(plane.to_owned())).unwrap();
        assert_eq!(mapped, stack);
    }

    #[test]
    fn test_slices_land_in_their_own_plane() {
        let stack = Array4::<f32>::zeros((4, 2, 2, 3));

        let mapped = map_sequence(stack.view(), |t, b, plane| {
            Ok(Array2::from_elem(plane.dim(), (t * 10 + b) as f32))
        })
        .unwrap();

        for t in 0..4 {
            for b in 0..3 {
                assert_eq!(mapped[[t, 0, 0, b]], (t * 10 + b) as f32);
                assert_eq!(mapped[[t, 1, 1, b]], (t * 10 + b) as f32);
            }
        }
    }

    #[test]
    fn test_output_shape_taken_from_mapped_slices() {
        let stack = Array4::<f32>::zeros((2, 8, 8, 1));

        let mapped = map_sequence(stack.view(), |_, _, _| Ok(Array2::<f32>::zeros((3, 5)))).unwrap();
        assert_eq!(mapped.dim(), (2, 3, 5, 1));
    }

    #[test]
    fn test_inconsistent_slice_shapes_rejected() {
        let stack = Array4::<f32>::zeros((2, 4, 4, 1));

        let result = map_sequence(stack.view(), |t, _, _| {
            Ok(Array2::<f32>::zeros((2 + t, 2)))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_slice_errors_propagate() {
        let stack = Array4::<f32>::zeros((2, 4, 4, 2));

        let result = map_sequence(stack.view(), |t, b, plane| {
            if t == 1 && b == 1 {
                Err(CloudError::Processing("bad slice".to_string()))
            } else {
                Ok(plane.to_owned())
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_stack_rejected() {
        let stack = Array4::<f32>::zeros((0, 4, 4, 2));
        assert!(map_sequence(stack.view(), |_, _, plane| Ok(plane.to_owned())).is_err());
    }
}
