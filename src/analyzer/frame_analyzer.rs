use crate::config::AnalysisProfile;
use crate::error::AnalyzerError;
use crate::frame::{FrameData, FrameFormat};

use super::metrics::{DominantColor, FrameMetrics, MotionHistory};

use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info};

/// Per-frame quality and pattern analyzer.
///
/// Every source frame is sampled into one fixed-size scratch surface that
/// lives as long as the analyzer; the luma planes and colour bins are reused
/// the same way. The previous luma plane is kept for motion estimation.
pub struct FrameAnalyzer {
    profile: AnalysisProfile,
    scratch: RgbImage,
    luma: Vec<u8>,
    previous_luma: Vec<u8>,
    has_previous: bool,
    color_bins: Vec<u32>,
    source_dims: Option<(u32, u32)>,
    motion_history: MotionHistory,
    current: Option<FrameMetrics>,
    analyses_since_reset: u64,
    pub(crate) frame_count: u64,
}

impl FrameAnalyzer {
    pub fn new(profile: AnalysisProfile) -> Self {
        let (w, h) = (profile.analysis_width, profile.analysis_height);
        let plane = (w as usize) * (h as usize);
        let levels = profile.color_levels.max(2) as usize;

        debug!(
            "Creating frame analyzer at {}x{} analysis resolution",
            w, h
        );

        Self {
            scratch: RgbImage::new(w, h),
            luma: vec![0; plane],
            previous_luma: vec![0; plane],
            has_previous: false,
            color_bins: vec![0; levels * levels * levels],
            source_dims: None,
            motion_history: MotionHistory::new(profile.motion_history_len),
            current: None,
            analyses_since_reset: 0,
            frame_count: 0,
            profile,
        }
    }

    pub fn profile(&self) -> &AnalysisProfile {
        &self.profile
    }

    /// The latest snapshot, if any frame has been analysed
    pub fn current(&self) -> Option<&FrameMetrics> {
        self.current.as_ref()
    }

    pub fn motion_history(&self) -> &MotionHistory {
        &self.motion_history
    }

    /// Drop the previous frame and the motion history
    pub fn reset(&mut self) {
        self.has_previous = false;
        self.motion_history.clear();
        self.analyses_since_reset = 0;
    }

    /// Analyse one frame and replace the current snapshot
    pub fn analyze(&mut self, frame: &FrameData) -> Result<FrameMetrics, AnalyzerError> {
        frame.ensure_ready()?;
        let started = Instant::now();

        let dims = (frame.width, frame.height);
        if self.source_dims != Some(dims) {
            if let Some(previous) = self.source_dims {
                info!(
                    "Source dimensions changed {:?} -> {:?}, resetting motion baseline",
                    previous, dims
                );
            }
            self.reset();
            self.source_dims = Some(dims);
        }

        if self.analyses_since_reset >= self.profile.reset_after_analyses {
            debug!(
                "Resetting retained analysis state after {} analyses",
                self.analyses_since_reset
            );
            self.reset();
        }

        self.sample_into_scratch(frame)?;
        self.compute_luma();

        let (brightness, contrast) = self.brightness_and_contrast();
        let (sharpness, edge_density) = self.sharpness_and_edges();
        let texture_complexity = self.texture_complexity();
        let repetition = self.repetition();
        let (color_variance, saturation, dominant_colors) = self.color_statistics();

        let motion_level = if self.has_previous {
            let level = self.motion_level();
            self.motion_history.push(level);
            level
        } else {
            debug!("No previous frame, reporting motion baseline");
            0.0
        };
        let is_stable = self.motion_history.is_stable(
            self.profile.stability_threshold,
            self.profile.min_stability_samples,
        );

        std::mem::swap(&mut self.luma, &mut self.previous_luma);
        self.has_previous = true;
        self.analyses_since_reset += 1;
        self.frame_count += 1;

        let metrics = FrameMetrics {
            brightness,
            contrast,
            sharpness,
            color_variance,
            saturation,
            edge_density,
            texture_complexity,
            repetition,
            dominant_colors,
            motion_level,
            is_stable,
            analysis_duration_ms: started.elapsed().as_millis() as u64,
            frame_dimensions: dims,
            captured_at_ms: frame.timestamp_ms(),
        };

        debug!(
            "Frame {} analysed: sharpness={:.1} contrast={:.1} edges={:.1} texture={:.1} repetition={:.1} motion={:.1} stable={}",
            frame.id,
            metrics.sharpness,
            metrics.contrast,
            metrics.edge_density,
            metrics.texture_complexity,
            metrics.repetition,
            metrics.motion_level,
            metrics.is_stable
        );

        self.current = Some(metrics.clone());
        Ok(metrics)
    }

    fn sample_into_scratch(&mut self, frame: &FrameData) -> Result<(), AnalyzerError> {
        match frame.format {
            FrameFormat::Jpeg => {
                let decoded = frame.to_rgb_image()?;
                let (w, h) = decoded.dimensions();
                self.downsample(decoded.as_raw(), w, h, 3);
            }
            FrameFormat::Rgb24 => self.downsample(&frame.data, frame.width, frame.height, 3),
            FrameFormat::Rgba32 => self.downsample(&frame.data, frame.width, frame.height, 4),
        }
        Ok(())
    }

    /// Box-sample the source into the scratch surface with four taps per target pixel
    fn downsample(&mut self, data: &[u8], src_w: u32, src_h: u32, bpp: usize) {
        let (dst_w, dst_h) = self.scratch.dimensions();
        let sw = src_w as u64;
        let sh = src_h as u64;

        for ty in 0..dst_h {
            let y0 = ((ty as u64 * 4 + 1) * sh / (dst_h as u64 * 4)).min(sh - 1) as usize;
            let y1 = ((ty as u64 * 4 + 3) * sh / (dst_h as u64 * 4)).min(sh - 1) as usize;
            for tx in 0..dst_w {
                let x0 = ((tx as u64 * 4 + 1) * sw / (dst_w as u64 * 4)).min(sw - 1) as usize;
                let x1 = ((tx as u64 * 4 + 3) * sw / (dst_w as u64 * 4)).min(sw - 1) as usize;

                let mut acc = [0u32; 3];
                for (sx, sy) in [(x0, y0), (x1, y0), (x0, y1), (x1, y1)] {
                    let idx = (sy * src_w as usize + sx) * bpp;
                    acc[0] += data[idx] as u32;
                    acc[1] += data[idx + 1] as u32;
                    acc[2] += data[idx + 2] as u32;
                }

                let px = self.scratch.get_pixel_mut(tx, ty);
                px.0 = [(acc[0] / 4) as u8, (acc[1] / 4) as u8, (acc[2] / 4) as u8];
            }
        }
    }

    fn compute_luma(&mut self) {
        for (slot, px) in self.luma.iter_mut().zip(self.scratch.pixels()) {
            let [r, g, b] = px.0;
            *slot = (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64).round() as u8;
        }
    }

    #[inline]
    fn luma_at(&self, x: u32, y: u32) -> i32 {
        self.luma[(y * self.profile.analysis_width + x) as usize] as i32
    }

    /// Mean luma and luma range in one pass with running min/max
    fn brightness_and_contrast(&self) -> (f64, f64) {
        let mut sum = 0u64;
        let mut min = u8::MAX;
        let mut max = u8::MIN;
        for &l in &self.luma {
            sum += l as u64;
            min = min.min(l);
            max = max.max(l);
        }
        let brightness = sum as f64 / self.luma.len() as f64;
        let contrast = (max - min) as f64 / 255.0 * 100.0;
        (brightness, contrast)
    }

    fn sharpness_and_edges(&self) -> (f64, f64) {
        let (w, h) = (self.profile.analysis_width, self.profile.analysis_height);
        let mut magnitude_sum = 0.0;
        let mut edges = 0u64;
        let mut interior = 0u64;

        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let tl = self.luma_at(x - 1, y - 1);
                let tc = self.luma_at(x, y - 1);
                let tr = self.luma_at(x + 1, y - 1);
                let ml = self.luma_at(x - 1, y);
                let mr = self.luma_at(x + 1, y);
                let bl = self.luma_at(x - 1, y + 1);
                let bc = self.luma_at(x, y + 1);
                let br = self.luma_at(x + 1, y + 1);

                let gx = (tr + 2 * mr + br) - (tl + 2 * ml + bl);
                let gy = (bl + 2 * bc + br) - (tl + 2 * tc + tr);
                let magnitude = ((gx * gx + gy * gy) as f64).sqrt();

                magnitude_sum += magnitude;
                if magnitude > self.profile.edge_magnitude_threshold {
                    edges += 1;
                }
                interior += 1;
            }
        }

        if interior == 0 {
            return (0.0, 0.0);
        }

        let mean = magnitude_sum / interior as f64;
        let sharpness = (mean / self.profile.sharpness_divisor).min(100.0);
        let edge_density = edges as f64 / interior as f64 * 100.0;
        (sharpness, edge_density)
    }

    fn texture_complexity(&self) -> f64 {
        let (w, h) = (self.profile.analysis_width, self.profile.analysis_height);
        let window = self.profile.texture_window;
        let stride = self.profile.texture_stride as usize;
        if window > w || window > h {
            return 0.0;
        }

        let n = (window * window) as f64;
        let mut deviation_sum = 0.0;
        let mut windows = 0u64;

        for wy in (0..=h - window).step_by(stride) {
            for wx in (0..=w - window).step_by(stride) {
                let mut sum = 0.0;
                let mut sum_sq = 0.0;
                for y in wy..wy + window {
                    for x in wx..wx + window {
                        let l = self.luma_at(x, y) as f64;
                        sum += l;
                        sum_sq += l * l;
                    }
                }
                let mean = sum / n;
                let variance = (sum_sq / n - mean * mean).max(0.0);
                deviation_sum += variance.sqrt();
                windows += 1;
            }
        }

        if windows == 0 {
            return 0.0;
        }
        (deviation_sum / windows as f64).min(100.0)
    }

    /// Pairs that match across an offset while differing from the midpoint
    /// between them. Flat or noisy surfaces match either both or neither, so
    /// only periodic structure scores.
    fn repetition(&self) -> f64 {
        let (w, h) = (self.profile.analysis_width, self.profile.analysis_height);
        let step = self.profile.repetition_sample_step as usize;
        let tolerance = self.profile.repetition_tolerance as i32;

        let mut ratio_sum = 0.0;
        let mut offsets = 0usize;

        for &[dx, dy] in &self.profile.repetition_offsets {
            if dx >= w || dy >= h || (dx == 0 && dy == 0) {
                continue;
            }
            let mut repeats = 0u64;
            let mut pairs = 0u64;
            for y in (0..h - dy).step_by(step) {
                for x in (0..w - dx).step_by(step) {
                    let a = self.luma_at(x, y);
                    let b = self.luma_at(x + dx, y + dy);
                    let mid = self.luma_at(x + dx / 2, y + dy / 2);
                    pairs += 1;
                    if (a - b).abs() <= tolerance && (a - mid).abs() > tolerance {
                        repeats += 1;
                    }
                }
            }
            if pairs > 0 {
                ratio_sum += repeats as f64 / pairs as f64;
                offsets += 1;
            }
        }

        if offsets == 0 {
            return 0.0;
        }
        (ratio_sum / offsets as f64 * 100.0).min(100.0)
    }

    fn color_statistics(&mut self) -> (f64, f64, Vec<DominantColor>) {
        let step = self.profile.color_sample_step as usize;
        let levels = self.profile.color_levels.max(2) as u32;
        let (w, h) = self.scratch.dimensions();

        self.color_bins.iter_mut().for_each(|bin| *bin = 0);

        let mut sums = [0.0f64; 3];
        let mut sums_sq = [0.0f64; 3];
        let mut saturation_sum = 0.0;
        let mut samples = 0u64;

        for y in (0..h).step_by(step) {
            for x in (0..w).step_by(step) {
                let [r, g, b] = self.scratch.get_pixel(x, y).0;
                for (i, c) in [r, g, b].into_iter().enumerate() {
                    let c = c as f64;
                    sums[i] += c;
                    sums_sq[i] += c * c;
                }

                let max = r.max(g).max(b);
                let min = r.min(g).min(b);
                if max > 0 {
                    saturation_sum += (max - min) as f64 / max as f64;
                }

                let q = |c: u8| c as u32 * levels / 256;
                let bin = (q(r) * levels + q(g)) * levels + q(b);
                self.color_bins[bin as usize] += 1;
                samples += 1;
            }
        }

        if samples == 0 {
            return (0.0, 0.0, Vec::new());
        }

        let n = samples as f64;
        let color_variance = (0..3)
            .map(|i| {
                let mean = sums[i] / n;
                (sums_sq[i] / n - mean * mean).max(0.0)
            })
            .sum::<f64>()
            / 3.0;
        let saturation = (saturation_sum / n * 100.0).min(100.0);

        let mut ranked: Vec<(usize, u32)> = self
            .color_bins
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, count)| *count > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let centre = |q: u32| ((q * 256 + 128) / levels).min(255) as u8;
        let dominant_colors = ranked
            .into_iter()
            .take(3)
            .map(|(bin, count)| {
                let bin = bin as u32;
                let r = bin / (levels * levels);
                let g = (bin / levels) % levels;
                let b = bin % levels;
                DominantColor {
                    rgb: [centre(r), centre(g), centre(b)],
                    share: count as f64 / n * 100.0,
                }
            })
            .collect();

        (color_variance, saturation, dominant_colors)
    }

    /// Mean absolute luma difference against the previous frame on a coarse grid
    fn motion_level(&self) -> f64 {
        let (w, h) = (self.profile.analysis_width, self.profile.analysis_height);
        let step = self.profile.motion_grid_step as usize;
        let mut diff_sum = 0u64;
        let mut samples = 0u64;

        for y in (0..h).step_by(step) {
            for x in (0..w).step_by(step) {
                let idx = (y * w + x) as usize;
                diff_sum += (self.luma[idx] as i32 - self.previous_luma[idx] as i32).unsigned_abs()
                    as u64;
                samples += 1;
            }
        }

        if samples == 0 {
            return 0.0;
        }
        let mean = diff_sum as f64 / samples as f64;
        (mean / 255.0 * 100.0 * self.profile.motion_gain).min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::test_frames::{checkerboard, flat, noise, shifted_checkerboard};
    use image::Rgb;
    use imageproc::filter::gaussian_blur_f32;
    use std::time::SystemTime;

    fn analyzer() -> FrameAnalyzer {
        FrameAnalyzer::new(AnalysisProfile::default())
    }

    fn assert_in_range(metrics: &FrameMetrics) {
        for (name, value) in [
            ("sharpness", metrics.sharpness),
            ("contrast", metrics.contrast),
            ("edge_density", metrics.edge_density),
            ("texture_complexity", metrics.texture_complexity),
            ("repetition", metrics.repetition),
            ("saturation", metrics.saturation),
            ("motion_level", metrics.motion_level),
        ] {
            assert!((0.0..=100.0).contains(&value), "{} out of range: {}", name, value);
        }
        assert!((0.0..=255.0).contains(&metrics.brightness));
        assert!(metrics.dominant_colors.len() <= 3);
    }

    #[test]
    fn test_zero_dimension_frame_is_not_ready() {
        let frame = FrameData::new(1, SystemTime::now(), Vec::new(), 0, 0, FrameFormat::Rgb24);
        assert!(matches!(
            analyzer().analyze(&frame),
            Err(AnalyzerError::NotReady { .. })
        ));
    }

    #[test]
    fn test_patterned_frame_scores_high() {
        let mut analyzer = analyzer();
        let metrics = analyzer.analyze(&checkerboard(1, 640, 480, 16)).unwrap();

        assert_in_range(&metrics);
        assert!(metrics.sharpness > 30.0, "sharpness {}", metrics.sharpness);
        assert!(metrics.edge_density > 20.0, "edges {}", metrics.edge_density);
        assert!(metrics.texture_complexity > 30.0, "texture {}", metrics.texture_complexity);
        assert!(metrics.contrast > 50.0);
        assert_eq!(metrics.frame_dimensions, (640, 480));
    }

    #[test]
    fn test_flat_frame_scores_low() {
        let mut analyzer = analyzer();
        let metrics = analyzer.analyze(&flat(1, 320, 240, [128, 128, 128])).unwrap();

        assert_in_range(&metrics);
        assert_eq!(metrics.sharpness, 0.0);
        assert_eq!(metrics.edge_density, 0.0);
        assert_eq!(metrics.texture_complexity, 0.0);
        assert_eq!(metrics.contrast, 0.0);
        assert_eq!(metrics.repetition, 0.0);
        assert!((metrics.brightness - 128.0).abs() < 1.0);
        assert_eq!(metrics.dominant_colors.len(), 1);
        assert!((metrics.dominant_colors[0].share - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_blur_lowers_sharpness() {
        let sharp_frame = checkerboard(1, 320, 320, 8);
        let sharp = analyzer().analyze(&sharp_frame).unwrap();

        let image = sharp_frame.to_rgb_image().unwrap();
        let blurred_image = gaussian_blur_f32(&image, 6.0);
        let blurred_frame = FrameData::from_rgb_image(2, SystemTime::now(), blurred_image);
        let blurred = analyzer().analyze(&blurred_frame).unwrap();

        assert!(blurred.sharpness < sharp.sharpness);
        assert!(blurred.edge_density < sharp.edge_density);
    }

    #[test]
    fn test_repetition_rewards_structure_not_flatness() {
        let pattern = analyzer().analyze(&checkerboard(1, 320, 320, 8)).unwrap();
        let smooth = analyzer().analyze(&flat(2, 320, 320, [90, 90, 90])).unwrap();
        let random = analyzer().analyze(&noise(3, 320, 320, 7)).unwrap();

        assert!(pattern.repetition > smooth.repetition);
        assert!(pattern.repetition > random.repetition);
    }

    #[test]
    fn test_first_frame_is_motion_baseline() {
        let mut analyzer = analyzer();
        let metrics = analyzer.analyze(&checkerboard(1, 320, 240, 8)).unwrap();
        assert_eq!(metrics.motion_level, 0.0);
        assert!(!metrics.is_stable);
        assert!(analyzer.motion_history().is_empty());
    }

    #[test]
    fn test_static_scene_becomes_stable() {
        let mut analyzer = analyzer();
        let mut last = None;
        for id in 0..4 {
            last = Some(analyzer.analyze(&checkerboard(id, 320, 240, 8)).unwrap());
        }
        let metrics = last.unwrap();
        assert_eq!(metrics.motion_level, 0.0);
        assert_eq!(analyzer.motion_history().len(), 3);
        assert!(metrics.is_stable);
    }

    #[test]
    fn test_moving_scene_is_unstable() {
        let mut analyzer = analyzer();
        let mut metrics = None;
        for id in 0..6 {
            let frame = if id % 2 == 0 {
                checkerboard(id, 320, 240, 16)
            } else {
                shifted_checkerboard(id, 320, 240, 16)
            };
            metrics = Some(analyzer.analyze(&frame).unwrap());
        }
        let metrics = metrics.unwrap();
        assert!(metrics.motion_level > 20.0, "motion {}", metrics.motion_level);
        assert!(!metrics.is_stable);
        assert_eq!(analyzer.motion_history().len(), 5);
    }

    #[test]
    fn test_dimension_change_resets_baseline() {
        let mut analyzer = analyzer();
        for id in 0..4 {
            analyzer.analyze(&checkerboard(id, 320, 240, 8)).unwrap();
        }
        let metrics = analyzer.analyze(&checkerboard(5, 640, 480, 8)).unwrap();
        assert_eq!(metrics.motion_level, 0.0);
        assert!(!metrics.is_stable);
        assert!(analyzer.motion_history().is_empty());
    }

    #[test]
    fn test_periodic_reset_bounds_retained_state() {
        let profile = AnalysisProfile {
            reset_after_analyses: 3,
            ..AnalysisProfile::default()
        };
        let mut analyzer = FrameAnalyzer::new(profile);
        for id in 0..3 {
            analyzer.analyze(&checkerboard(id, 160, 160, 8)).unwrap();
        }
        assert_eq!(analyzer.motion_history().len(), 2);

        let metrics = analyzer.analyze(&checkerboard(4, 160, 160, 8)).unwrap();
        assert_eq!(metrics.motion_level, 0.0);
        assert!(analyzer.motion_history().is_empty());
    }

    #[test]
    fn test_jpeg_and_rgba_frames() {
        let image = RgbImage::from_fn(64, 48, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([30, 60, 90])
            } else {
                Rgb([220, 200, 180])
            }
        });

        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95)
            .encode_image(&image)
            .unwrap();
        let frame = FrameData::new(1, SystemTime::now(), jpeg, 64, 48, FrameFormat::Jpeg);
        let metrics = analyzer().analyze(&frame).unwrap();
        assert_in_range(&metrics);
        assert!(metrics.contrast > 40.0);

        let rgba: Vec<u8> = image
            .pixels()
            .flat_map(|p| [p.0[0], p.0[1], p.0[2], 255])
            .collect();
        let frame = FrameData::new(2, SystemTime::now(), rgba, 64, 48, FrameFormat::Rgba32);
        let metrics = analyzer().analyze(&frame).unwrap();
        assert_in_range(&metrics);
        assert!(metrics.saturation > 0.0);
    }

    #[test]
    fn test_metrics_stay_in_range_for_assorted_frames() {
        let frames = [
            checkerboard(1, 17, 9, 1),
            flat(2, 3, 3, [255, 0, 0]),
            flat(3, 1000, 10, [0, 0, 0]),
            noise(4, 200, 150, 11),
            checkerboard(5, 1920, 1080, 3),
        ];
        for frame in frames {
            let metrics = analyzer().analyze(&frame).unwrap();
            assert_in_range(&metrics);
        }
    }
}
