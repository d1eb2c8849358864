//! Frame comparison.
//!
//! Tolerance comparison of packed 10-bit frames with optional per-channel
//! error statistics, and a fixed-tolerance comparison for 8-bit RGB.
//! Out-of-range code values are a correctness violation and surface as a
//! [`FramecastError::DataValidation`] error, distinct from a tolerance
//! mismatch (which is an `Ok(false)` result).

use crate::stats::ChannelStats;
use framecast_core::packed10::{self, SAMPLE_MAX, SAMPLE_MIN};
use framecast_core::{Frame, FramecastError, PixelFormat, Result};
use rayon::prelude::*;
use tracing::{error, info};

/// Tolerance applied by [`compare_rgb_frames`], per 8-bit channel.
const RGB_TOLERANCE: u8 = 10;

#[inline]
fn is_close(a: u16, b: u16, tolerance: u16) -> bool {
    a.abs_diff(b) <= tolerance
}

/// Shared precondition checks: matching formats, valid data, equal sizes.
fn check_comparable(reference: &Frame, candidate: &Frame, required: PixelFormat) -> Result<()> {
    if reference.format().pixel_format() != required {
        return Err(FramecastError::DataValidation(format!(
            "comparison requires {} frames, reference is {}",
            required,
            reference.format().pixel_format()
        )));
    }
    if reference.format() != candidate.format() {
        return Err(FramecastError::DataValidation(format!(
            "format mismatch: reference [{}] vs candidate [{}]",
            reference.format(),
            candidate.format()
        )));
    }
    if !reference.is_valid() || !candidate.is_valid() {
        return Err(FramecastError::DataValidation(
            "comparison requires both frames to hold valid data".to_string(),
        ));
    }
    if reference.byte_size() != candidate.byte_size() {
        return Err(FramecastError::DataValidation(format!(
            "image size mismatch: reference '{}', candidate '{}'",
            reference.byte_size(),
            candidate.byte_size()
        )));
    }
    Ok(())
}

/// Per-row accumulator over the three channels (Y', Cb, Cr).
struct RowAcc {
    min_error: [i64; 3],
    max_error: [i64; 3],
    sum_squared: [f64; 3],
    within_tolerance: bool,
    /// First out-of-range code in the reference / candidate buffer.
    reference_oor: Option<u16>,
    candidate_oor: Option<u16>,
    /// First tolerance exceedance: (reference, candidate) codes.
    first_mismatch: Option<(u16, u16)>,
}

impl RowAcc {
    fn identity() -> Self {
        Self {
            min_error: [i64::MAX; 3],
            max_error: [0; 3],
            sum_squared: [0.0; 3],
            within_tolerance: true,
            reference_oor: None,
            candidate_oor: None,
            first_mismatch: None,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for i in 0..3 {
            self.min_error[i] = self.min_error[i].min(other.min_error[i]);
            self.max_error[i] = self.max_error[i].max(other.max_error[i]);
            self.sum_squared[i] += other.sum_squared[i];
        }
        self.within_tolerance &= other.within_tolerance;
        self.reference_oor = self.reference_oor.or(other.reference_oor);
        self.candidate_oor = self.candidate_oor.or(other.candidate_oor);
        self.first_mismatch = self.first_mismatch.or(other.first_mismatch);
        self
    }

    #[inline]
    fn accumulate(&mut self, channel: usize, reference: u16, candidate: u16, tolerance: u16) {
        let error = (reference as i64 - candidate as i64).abs();
        self.min_error[channel] = self.min_error[channel].min(error);
        self.max_error[channel] = self.max_error[channel].max(error);
        self.sum_squared[channel] += (error * error) as f64;

        if !packed10::in_valid_range(reference) && self.reference_oor.is_none() {
            self.reference_oor = Some(reference);
        }
        if !packed10::in_valid_range(candidate) && self.candidate_oor.is_none() {
            self.candidate_oor = Some(candidate);
        }
        if !is_close(reference, candidate, tolerance) {
            self.within_tolerance = false;
            if self.first_mismatch.is_none() {
                self.first_mismatch = Some((reference, candidate));
            }
        }
    }
}

const Y: usize = 0;
const CB: usize = 1;
const CR: usize = 2;

fn scan_row(
    row: usize,
    groups_per_row: usize,
    reference: &[u8],
    candidate: &[u8],
    tolerance: u16,
) -> RowAcc {
    let mut acc = RowAcc::identity();
    for g in 0..groups_per_row {
        let offset = (row * groups_per_row + g) * packed10::GROUP_BYTES;
        let mut group = [0u8; packed10::GROUP_BYTES];

        group.copy_from_slice(&reference[offset..offset + packed10::GROUP_BYTES]);
        let r = packed10::decode_group(&group);
        group.copy_from_slice(&candidate[offset..offset + packed10::GROUP_BYTES]);
        let c = packed10::decode_group(&group);

        for k in 0..packed10::SAMPLES_PER_GROUP {
            acc.accumulate(Y, r.luma[k], c.luma[k], tolerance);
        }
        for k in 0..3 {
            acc.accumulate(CB, r.cb[k], c.cb[k], tolerance);
            acc.accumulate(CR, r.cr[k], c.cr[k], tolerance);
        }
    }
    acc
}

/// Compare two packed 10-bit frames within a per-component tolerance.
///
/// Returns whether every component pair is within tolerance. When
/// `statistics_out` is given it is filled with per-channel {min error,
/// max error, MSE, PSNR}; the chroma MSE denominators account for Cb and
/// Cr being sampled at half the horizontal resolution.
///
/// A code value outside the legal [4, 1019] range in either buffer is a
/// hard correctness violation and fails with a data-validation error
/// (statistics are still written first).
pub fn compare_packed10_frames(
    reference: &Frame,
    candidate: &Frame,
    tolerance: u16,
    statistics_out: Option<&mut [ChannelStats; 3]>,
) -> Result<bool> {
    check_comparable(reference, candidate, PixelFormat::Yuv10Bit422)?;

    let format = reference.format();
    let width = format.width() as usize;
    let height = format.height() as usize;
    let groups_per_row = packed10::groups_per_row(format.width());

    let reference_data = reference.data();
    let candidate_data = candidate.data();

    let acc = (0..height)
        .into_par_iter()
        .map(|row| scan_row(row, groups_per_row, reference_data, candidate_data, tolerance))
        .reduce(RowAcc::identity, RowAcc::merge);

    if let Some(stats) = statistics_out {
        let luma_samples = width * height;
        let chroma_samples = (width / 2) * height;
        let counts = [luma_samples, chroma_samples, chroma_samples];
        for (i, name) in ["Y'", "Cb", "Cr"].into_iter().enumerate() {
            stats[i] = ChannelStats::from_accumulated(
                name,
                acc.min_error[i],
                acc.max_error[i],
                acc.sum_squared[i],
                counts[i],
            );
        }
    }

    if let Some(value) = acc.reference_oor {
        error!("out-of-valid-range value in reference image: '{}'", value);
        return Err(FramecastError::DataValidation(format!(
            "reference holds code value {} outside the legal [{}, {}] range",
            value, SAMPLE_MIN, SAMPLE_MAX
        )));
    }
    if let Some(value) = acc.candidate_oor {
        error!("out-of-valid-range value in candidate image: '{}'", value);
        return Err(FramecastError::DataValidation(format!(
            "candidate holds code value {} outside the legal [{}, {}] range",
            value, SAMPLE_MIN, SAMPLE_MAX
        )));
    }

    if let Some((r, c)) = acc.first_mismatch {
        info!(
            "component diff exceeded tolerance: reference = {} vs candidate = {} with tolerance '{}' (showing only first encounter)",
            r, c, tolerance
        );
    }

    Ok(acc.within_tolerance)
}

/// Compare two 8-bit RGB frames with a fixed per-channel tolerance of
/// ±10, returning whether every pixel is within it.
pub fn compare_rgb_frames(reference: &Frame, candidate: &Frame) -> Result<bool> {
    check_comparable(reference, candidate, PixelFormat::Rgb8)?;

    let mut first_reported = false;
    let mut close = true;
    for (r, c) in reference
        .data()
        .chunks_exact(3)
        .zip(candidate.data().chunks_exact(3))
    {
        let pixel_close = (0..3).all(|i| r[i].abs_diff(c[i]) <= RGB_TOLERANCE);
        if !pixel_close && !first_reported {
            info!(
                "pixel diff exceeded tolerance: reference = {:?} vs candidate = {:?} with tolerance '{}' (showing only first encounter)",
                r, c, RGB_TOLERANCE
            );
            first_reported = true;
        }
        close &= pixel_close;
    }
    Ok(close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::packed10::{encode_group, SampleGroup};
    use framecast_core::{Chromaticity, FrameTime, ImageFormat, Origin, Transfer};

    fn v210(width: u32, height: u32) -> ImageFormat {
        ImageFormat::new(
            width,
            height,
            Transfer::Bt709,
            Chromaticity::Bt709,
            PixelFormat::Yuv10Bit422,
            Origin::UpperLeft,
        )
        .unwrap()
    }

    fn rgb8(width: u32, height: u32) -> ImageFormat {
        ImageFormat::new(
            width,
            height,
            Transfer::Srgb,
            Chromaticity::Srgb,
            PixelFormat::Rgb8,
            Origin::UpperLeft,
        )
        .unwrap()
    }

    fn frame_of_groups(format: ImageFormat, samples: &SampleGroup) -> Frame {
        let bytes = encode_group(samples);
        let mut frame = Frame::new(format, FrameTime::ZERO);
        for chunk in frame.data_mut().chunks_exact_mut(packed10::GROUP_BYTES) {
            chunk.copy_from_slice(&bytes);
        }
        frame
    }

    fn legal_samples() -> SampleGroup {
        SampleGroup {
            luma: [64, 200, 400, 600, 800, 940],
            cb: [64, 512, 960],
            cr: [128, 512, 896],
        }
    }

    #[test]
    fn test_self_comparison_is_exact() {
        let frame = frame_of_groups(v210(12, 4), &legal_samples());
        let mut stats: [ChannelStats; 3] = Default::default();
        let close =
            compare_packed10_frames(&frame, &frame, 0, Some(&mut stats)).unwrap();
        assert!(close);
        for channel in &stats {
            assert_eq!(channel.mean_squared_error, 0.0);
            assert!(channel.psnr.is_infinite() && channel.psnr > 0.0);
            assert_eq!(channel.max_error, 0.0);
        }
    }

    #[test]
    fn test_tolerance_mismatch_is_not_an_error() {
        let reference = frame_of_groups(v210(6, 1), &legal_samples());
        let mut shifted = legal_samples();
        shifted.luma[0] += 5;
        let candidate = frame_of_groups(v210(6, 1), &shifted);

        assert!(!compare_packed10_frames(&reference, &candidate, 4, None).unwrap());
        assert!(compare_packed10_frames(&reference, &candidate, 5, None).unwrap());
    }

    #[test]
    fn test_out_of_range_is_a_validation_error() {
        let reference = frame_of_groups(v210(6, 1), &legal_samples());

        // Code 0 and code 1023 both sit outside [4, 1019]; neither is a
        // tolerance question.
        for bad in [0u16, 1023] {
            let mut samples = legal_samples();
            samples.cb[0] = bad;
            let candidate = frame_of_groups(v210(6, 1), &samples);
            let err = compare_packed10_frames(&reference, &candidate, 1023, None);
            assert!(matches!(err, Err(FramecastError::DataValidation(_))));
        }
    }

    #[test]
    fn test_chroma_mse_uses_half_width() {
        // One chroma sample off by 2 in a 6x1 frame: 3 Cb samples over
        // a half-width of 3, so MSE = 4 / 3.
        let reference = frame_of_groups(v210(6, 1), &legal_samples());
        let mut samples = legal_samples();
        samples.cb[1] += 2;
        let candidate = frame_of_groups(v210(6, 1), &samples);

        let mut stats: [ChannelStats; 3] = Default::default();
        compare_packed10_frames(&reference, &candidate, 10, Some(&mut stats)).unwrap();
        assert_eq!(stats[0].mean_squared_error, 0.0);
        assert!((stats[1].mean_squared_error - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats[2].mean_squared_error, 0.0);
    }

    #[test]
    fn test_format_mismatch_fails_fast() {
        let a = frame_of_groups(v210(6, 1), &legal_samples());
        let b = frame_of_groups(v210(12, 1), &legal_samples());
        let err = compare_packed10_frames(&a, &b, 0, None);
        assert!(matches!(err, Err(FramecastError::DataValidation(_))));

        let not_packed = Frame::new(rgb8(6, 1), FrameTime::ZERO);
        let err = compare_packed10_frames(&not_packed, &not_packed.create_copy(), 0, None);
        assert!(matches!(err, Err(FramecastError::DataValidation(_))));
    }

    #[test]
    fn test_invalid_frame_fails_fast() {
        let a = frame_of_groups(v210(6, 1), &legal_samples());
        let b = Frame::placeholder(v210(6, 1));
        let err = compare_packed10_frames(&a, &b, 0, None);
        assert!(matches!(err, Err(FramecastError::DataValidation(_))));
    }

    #[test]
    fn test_rgb_comparison_tolerance_band() {
        let format = rgb8(4, 2);
        let mut reference = Frame::new(format, FrameTime::ZERO);
        reference.data_mut().fill(100);

        let mut candidate = reference.create_copy();
        candidate.data_mut()[5] = 110;
        assert!(compare_rgb_frames(&reference, &candidate).unwrap());

        candidate.data_mut()[5] = 111;
        assert!(!compare_rgb_frames(&reference, &candidate).unwrap());
    }

    #[test]
    fn test_rgb_comparison_requires_rgb8() {
        let frame = frame_of_groups(v210(6, 1), &legal_samples());
        let err = compare_rgb_frames(&frame, &frame.create_copy());
        assert!(matches!(err, Err(FramecastError::DataValidation(_))));
    }
}
