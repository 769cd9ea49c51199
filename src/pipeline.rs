//! Batch operations tying the store, detector, matcher, and accumulator
//! together.
//!
//! Every operation processes its file list sequentially. A failure on one
//! file is logged and skipped; the rest of the batch continues. Nothing is
//! retried.

use std::path::{Path, PathBuf};

use log::{error, info, warn};
use ndarray::Array2;

use crate::detect::StarDetector;
use crate::error::Error;
use crate::frame::Frame;
use crate::matching::StarMatcher;
use crate::meta::{Detection, Transform};
use crate::stack::FrameStack;
use crate::store::MetadataStore;

/// Detect stars in every listed frame and persist them to its sidecar.
///
/// Frames that already carry a registration are skipped unless `overwrite`
/// is set; re-detection replaces the star list wholesale. Returns the number
/// of frames registered.
pub fn register_frames(
    store: &mut impl MetadataStore,
    paths: &[PathBuf],
    detector: &StarDetector,
    overwrite: bool,
) -> usize {
    let mut registered = 0;
    for path in paths {
        match register_one(store, path, detector, overwrite) {
            Ok(true) => registered += 1,
            Ok(false) => {}
            Err(err) => error!("skipping {}: {err}", path.display()),
        }
    }
    registered
}

fn register_one(
    store: &mut impl MetadataStore,
    path: &Path,
    detector: &StarDetector,
    overwrite: bool,
) -> Result<bool, Error> {
    let (mut frame, _) = Frame::load(path, store)?;
    if !overwrite && frame.meta.stars.is_detected() {
        warn!("{} already registered", path.display());
        return Ok(false);
    }

    info!("registering {}", path.display());
    let stars = detector.detect(frame.pixels());
    info!("found {} stars in {}", stars.len(), path.display());
    frame.meta.stars = Detection::Detected(stars);
    frame.save(store)?;
    Ok(true)
}

/// Compute the transform mapping `target` star coordinates onto `reference`
/// star coordinates and record it in the target's metadata under the
/// reference's id.
///
/// Both frames must carry a non-empty star registration. The reference
/// frame is never mutated; persisting the target is left to the caller.
pub fn align_pair(reference: &Frame, target: &mut Frame) -> Result<Transform, Error> {
    let reference_stars = registered_positions(reference)?;
    let target_stars = registered_positions(target)?;

    let matcher = StarMatcher::triangles(reference_stars, target_stars);
    let matrix = matcher.find_alignment().ok_or(Error::NoTransform)?;
    let transform = Transform::from_matrix(&matrix);
    target
        .meta
        .transforms
        .insert(reference.meta.id.clone(), transform);
    Ok(transform)
}

fn registered_positions(frame: &Frame) -> Result<Array2<f64>, Error> {
    frame
        .meta
        .stars
        .positions()
        .filter(|positions| positions.nrows() > 0)
        .ok_or_else(|| Error::Unregistered(frame.path().to_owned()))
}

/// Align every target frame against `reference` and persist the results.
///
/// An unregistered reference fails the whole invocation; per-target
/// failures are logged and skipped. Returns the number of frames aligned.
pub fn align_frames(
    store: &mut impl MetadataStore,
    reference: &Path,
    targets: &[PathBuf],
) -> Result<usize, Error> {
    let (reference_frame, _) = Frame::load(reference, store)?;
    registered_positions(&reference_frame)?;

    let mut aligned = 0;
    for path in targets {
        match align_one(store, &reference_frame, path) {
            Ok(()) => aligned += 1,
            Err(err) => error!("skipping {}: {err}", path.display()),
        }
    }
    Ok(aligned)
}

fn align_one(
    store: &mut impl MetadataStore,
    reference: &Frame,
    path: &Path,
) -> Result<(), Error> {
    let (mut target, _) = Frame::load(path, store)?;
    info!("aligning {}", path.display());
    let transform = align_pair(reference, &mut target)?;
    info!(
        "aligned {}: rotation {:.2} deg, translation ({:.2}, {:.2})",
        path.display(),
        transform.rotation().to_degrees(),
        transform.translation().0,
        transform.translation().1,
    );
    target.save(store)?;
    Ok(())
}

/// Fold every listed frame into a running mean image.
///
/// Frames that fail to load or do not match the stack shape are logged and
/// skipped. Returns `None` when no frame could be folded in.
pub fn stack_frames(store: &impl MetadataStore, paths: &[PathBuf]) -> Option<Array2<f64>> {
    let mut stack = FrameStack::new();
    for path in paths {
        match Frame::load(path, store) {
            Ok((frame, _)) => {
                if let Err(err) = stack.push(frame.pixels()) {
                    error!("skipping {}: {err}", path.display());
                }
            }
            Err(err) => error!("skipping {}: {err}", path.display()),
        }
    }
    info!("stacked {} frames", stack.len());
    stack.into_mean()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use approx::assert_abs_diff_eq;
    use image::{ImageBuffer, Luma};
    use ndarray::Array2;

    use super::*;
    use crate::blob::BlobConfig;
    use crate::frame::LoadOutcome;
    use crate::store::SidecarStore;

    fn add_spot(image: &mut Array2<f64>, row: f64, col: f64, sigma: f64, height: f64) {
        for ((r, c), value) in image.indexed_iter_mut() {
            let dr = r as f64 - row;
            let dc = c as f64 - col;
            *value += height * (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp();
        }
    }

    fn write_image(image: &Array2<f64>, path: &Path) {
        let (height, width) = image.dim();
        let buffer = ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            let value = image[[y as usize, x as usize]].clamp(0.0, 1.0);
            Luma([(value * f64::from(u16::MAX)).round() as u16])
        });
        buffer.save(path).unwrap();
    }

    fn test_detector() -> StarDetector {
        StarDetector {
            scale: 0.2,
            refine_scale: 3.0,
            blob: BlobConfig {
                min_sigma: 3.0,
                max_sigma: 10.0,
                num_sigma: 5,
                threshold: 0.1,
            },
        }
    }

    /// Star layout shared by the end-to-end scenario: five sources in the
    /// central region so a moderate rotation keeps all of them in frame.
    const LAYOUT: [(f64, f64); 5] = [
        (30.0, 30.0),
        (30.0, 65.0),
        (50.0, 45.0),
        (70.0, 35.0),
        (65.0, 70.0),
    ];

    /// Write a 100x100 frame whose stars are `LAYOUT` mapped by a rotation
    /// about the image center plus a translation.
    fn write_field(path: &Path, angle_deg: f64, offset: (f64, f64)) {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        let mut image = Array2::zeros((100, 100));
        for &(row, col) in &LAYOUT {
            let (x, y) = (col - 50.0, row - 50.0);
            let x_rot = cos * x - sin * y + 50.0 + offset.0;
            let y_rot = sin * x + cos * y + 50.0 + offset.1;
            add_spot(&mut image, y_rot, x_rot, 3.0, 1.0);
        }
        write_image(&image, path);
    }

    #[test]
    fn register_skips_registered_frames_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        write_field(&path, 0.0, (0.0, 0.0));
        let mut store = SidecarStore;
        let paths = vec![path.clone()];

        assert_eq!(register_frames(&mut store, &paths, &test_detector(), false), 1);
        let (frame, outcome) = Frame::load(&path, &store).unwrap();
        assert_eq!(outcome, LoadOutcome::Cached);
        let first_stars = frame.meta.stars.clone();
        assert!(first_stars.is_detected());

        // second run without force leaves the registration alone
        assert_eq!(register_frames(&mut store, &paths, &test_detector(), false), 0);
        // with force it re-registers
        assert_eq!(register_frames(&mut store, &paths, &test_detector(), true), 1);
        let (frame, _) = Frame::load(&path, &store).unwrap();
        assert_eq!(frame.meta.stars, first_stars);
    }

    #[test]
    fn memory_store_substitutes_for_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        write_field(&path, 0.0, (0.0, 0.0));
        let mut store = crate::store::MemoryStore::new();
        let paths = vec![path.clone()];

        assert_eq!(register_frames(&mut store, &paths, &test_detector(), false), 1);
        let (frame, outcome) = Frame::load(&path, &store).unwrap();
        assert_eq!(outcome, LoadOutcome::Cached);
        assert!(frame.meta.stars.is_detected());
        // nothing reached the filesystem
        assert!(!SidecarStore::sidecar_path(&path).exists());
    }

    #[test]
    fn register_continues_past_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        write_field(&good, 0.0, (0.0, 0.0));
        let paths = vec![dir.path().join("missing.png"), good];

        let mut store = SidecarStore;
        assert_eq!(register_frames(&mut store, &paths, &test_detector(), false), 1);
    }

    #[test]
    fn align_requires_registration() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("reference.png");
        let target = dir.path().join("target.png");
        write_field(&reference, 0.0, (0.0, 0.0));
        write_field(&target, 5.0, (1.0, 1.0));
        let mut store = SidecarStore;

        // nothing registered: the reference fails the invocation
        assert!(matches!(
            align_frames(&mut store, &reference, &[target.clone()]),
            Err(Error::Unregistered(path)) if path == reference
        ));

        // registered reference, unregistered target: skipped, not fatal
        register_frames(&mut store, &[reference.clone()], &test_detector(), false);
        assert_eq!(
            align_frames(&mut store, &reference, &[target.clone()]).unwrap(),
            0
        );
        let (frame, _) = Frame::load(&target, &store).unwrap();
        assert!(frame.meta.transforms.is_empty());
    }

    #[test]
    fn align_pair_records_the_transform_in_the_target_only() {
        let dir = tempfile::tempdir().unwrap();
        let reference_path = dir.path().join("reference.png");
        let target_path = dir.path().join("target.png");
        write_field(&reference_path, 0.0, (0.0, 0.0));
        write_field(&target_path, 10.0, (5.0, 3.0));
        let mut store = SidecarStore;

        let paths = vec![reference_path.clone(), target_path.clone()];
        assert_eq!(register_frames(&mut store, &paths, &test_detector(), false), 2);

        let (reference, _) = Frame::load(&reference_path, &store).unwrap();
        let (mut target, _) = Frame::load(&target_path, &store).unwrap();
        let reference_meta = reference.meta.clone();

        align_pair(&reference, &mut target).unwrap();

        assert!(target.meta.transforms.contains_key(&reference.meta.id));
        assert_eq!(reference.meta, reference_meta);
    }

    #[test]
    fn end_to_end_alignment_recovers_the_motion() {
        let dir = tempfile::tempdir().unwrap();
        let reference_path = dir.path().join("reference.png");
        let target_path = dir.path().join("target.png");
        // the target frame is the reference field rotated by 10 degrees and
        // shifted by (5, 3)
        write_field(&reference_path, 0.0, (0.0, 0.0));
        write_field(&target_path, 10.0, (5.0, 3.0));
        let mut store = SidecarStore;

        let paths = vec![reference_path.clone(), target_path.clone()];
        assert_eq!(register_frames(&mut store, &paths, &test_detector(), false), 2);
        assert_eq!(
            align_frames(&mut store, &reference_path, &[target_path.clone()]).unwrap(),
            1
        );

        let (reference, _) = Frame::load(&reference_path, &store).unwrap();
        let (target, _) = Frame::load(&target_path, &store).unwrap();
        assert!(reference.meta.transforms.is_empty());

        let transform = target.meta.transforms[&reference.meta.id];
        // the transform maps target onto reference, i.e. undoes the motion
        assert_abs_diff_eq!(
            transform.rotation().to_degrees(),
            -10.0,
            epsilon = 1.0
        );
        assert_abs_diff_eq!(transform.scale(), 1.0, epsilon = 0.05);

        // a reference star maps onto itself through the target frame
        let (sin, cos) = 10f64.to_radians().sin_cos();
        for &(row, col) in &LAYOUT {
            let (x, y) = (col - 50.0, row - 50.0);
            let in_target = crate::star::Point::new(
                cos * x - sin * y + 50.0 + 5.0,
                sin * x + cos * y + 50.0 + 3.0,
            );
            let back = transform.apply(in_target);
            assert_abs_diff_eq!(back.x, col, epsilon = 1.0);
            assert_abs_diff_eq!(back.y, row, epsilon = 1.0);
        }
    }

    #[test]
    fn stacking_averages_the_frames() {
        let dir = tempfile::tempdir().unwrap();
        let bright = dir.path().join("bright.png");
        let dark = dir.path().join("dark.png");
        write_image(&Array2::from_elem((10, 10), 0.8), &bright);
        write_image(&Array2::from_elem((10, 10), 0.2), &dark);

        let store = SidecarStore;
        let mean = stack_frames(&store, &[bright, dark]).unwrap();
        for value in mean.iter() {
            assert_abs_diff_eq!(*value, 0.5, epsilon = 1e-3);
        }
    }

    #[test]
    fn stacking_nothing_yields_nothing() {
        let store = SidecarStore;
        assert!(stack_frames(&store, &[PathBuf::from("missing.png")]).is_none());
    }
}
