//! Word splitting inside a detected line
//!
//! Columns of a line crop whose ink projection (taken over a central band,
//! away from ascenders and descenders) stays below a threshold are spaces.
//! Runs of spaces wide enough to be inter-word gaps split the line into
//! word boxes.

use image::{imageops, GrayImage};
use tracing::debug;

use super::binarize::{close_gaps, otsu_inverted};
use super::geometry::BoundingBox;
use crate::config::SegmentationConfig;

/// Splits line regions into word boxes
#[derive(Debug, Clone)]
pub struct WordSplitter {
    space_threshold_coeff: f32,
    min_space_width: f32,
    min_word_width_ratio: f32,
    scale_bbox: f64,
}

impl WordSplitter {
    pub fn new(config: &SegmentationConfig) -> Self {
        Self {
            space_threshold_coeff: config.space_threshold_coeff,
            min_space_width: config.min_space_width,
            min_word_width_ratio: config.min_word_width_ratio,
            scale_bbox: config.scale_bbox,
        }
    }

    /// Split `line` (page coordinates) of `page` into word boxes, left to right,
    /// in page coordinates. Degenerate or blank lines yield no words.
    pub fn split(&self, page: &GrayImage, line: BoundingBox) -> Vec<BoundingBox> {
        let Some(region) = line.clamp_to(page.width(), page.height()) else {
            debug!("Skipping degenerate line {:?}", line);
            return Vec::new();
        };

        let crop = imageops::crop_imm(
            page,
            region.x1 as u32,
            region.y1 as u32,
            region.width() as u32,
            region.height() as u32,
        )
        .to_image();
        let mask = close_gaps(&otsu_inverted(&crop));

        let width = mask.width() as usize;
        let height = mask.height();
        let projection = band_projection(&mask);
        let space_threshold = self.space_threshold_coeff as f64 * height as f64 * 255.0;

        let min_gap = self.min_space_width as f64 * width as f64;
        let gaps: Vec<(usize, usize)> = space_runs(&projection, space_threshold)
            .into_iter()
            .filter(|&(start, end)| (end - start) as f64 >= min_gap)
            .collect();

        let min_word = self.min_word_width_ratio as f64 * width as f64;
        let words: Vec<BoundingBox> = word_intervals(&gaps, width)
            .into_iter()
            .filter(|&(start, end)| (end - start) as f64 >= min_word)
            .map(|(start, end)| {
                BoundingBox::new(start as i32, 0, end as i32, height as i32)
                    .translate(region.x1, region.y1)
                    .expand_pct(self.scale_bbox)
            })
            .collect();

        debug!(
            "Line {:?}: {} gaps, {} words",
            region,
            gaps.len(),
            words.len()
        );
        words
    }
}

impl Default for WordSplitter {
    fn default() -> Self {
        Self::new(&SegmentationConfig::default())
    }
}

/// Rows `[start, end)` of the central band used for the space signal.
///
/// Starts a sixteenth of the height above the middle and extends five
/// sixteenths below it (rows 14..26 of a 32 px crop).
fn central_band(height: u32) -> (u32, u32) {
    let mid = height / 2;
    let start = mid.saturating_sub(height / 16);
    let end = (mid + height * 5 / 16).min(height);
    if end > start {
        (start, end)
    } else {
        (start.min(height.saturating_sub(1)), height)
    }
}

/// Column sums of the mask over the central band, scaled to the full
/// crop height so the threshold does not depend on the band size.
fn band_projection(mask: &GrayImage) -> Vec<f64> {
    let (width, height) = mask.dimensions();
    let (start, end) = central_band(height);
    let band_height = (end - start).max(1);
    let scale = height as f64 / band_height as f64;

    (0..width)
        .map(|x| {
            let sum: u64 = (start..end).map(|y| mask.get_pixel(x, y).0[0] as u64).sum();
            sum as f64 * scale
        })
        .collect()
}

/// Maximal runs `[start, end)` of columns below `threshold`
fn space_runs(projection: &[f64], threshold: f64) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;

    for (x, &value) in projection.iter().enumerate() {
        match (value < threshold, start) {
            (true, None) => start = Some(x),
            (false, Some(s)) => {
                runs.push((s, x));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, projection.len()));
    }

    runs
}

/// Complement of the gaps within `[0, width)`
fn word_intervals(gaps: &[(usize, usize)], width: usize) -> Vec<(usize, usize)> {
    let mut words = Vec::with_capacity(gaps.len() + 1);
    let mut prev_end = 0;

    for &(start, end) in gaps {
        if start > prev_end {
            words.push((prev_end, start));
        }
        prev_end = end;
    }
    if prev_end < width {
        words.push((prev_end, width));
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// 400x200 white page with ink blocks (x ranges) on rows 108..132
    fn page_with_words(blocks: &[(u32, u32)]) -> GrayImage {
        let mut page = GrayImage::from_pixel(400, 200, Luma([255]));
        for &(x1, x2) in blocks {
            for y in 108..132 {
                for x in x1..x2 {
                    page.put_pixel(x, y, Luma([0]));
                }
            }
        }
        page
    }

    fn exact_splitter() -> WordSplitter {
        WordSplitter::new(&SegmentationConfig {
            scale_bbox: 0.0,
            ..SegmentationConfig::default()
        })
    }

    const LINE: BoundingBox = BoundingBox::new(0, 100, 300, 140);

    #[test]
    fn test_three_words() {
        let page = page_with_words(&[(10, 80), (110, 190), (220, 290)]);
        let words = exact_splitter().split(&page, LINE);
        assert_eq!(
            words,
            vec![
                BoundingBox::new(10, 100, 80, 140),
                BoundingBox::new(110, 100, 190, 140),
                BoundingBox::new(220, 100, 290, 140),
            ]
        );
    }

    #[test]
    fn test_no_gap_is_single_word() {
        let page = page_with_words(&[(0, 300)]);
        let words = exact_splitter().split(&page, LINE);
        assert_eq!(words, vec![LINE]);
    }

    #[test]
    fn test_letter_gap_does_not_split() {
        // 4 px gap is below 2% of the 300 px line width
        let page = page_with_words(&[(10, 70), (74, 150)]);
        let words = exact_splitter().split(&page, LINE);
        assert_eq!(words, vec![BoundingBox::new(10, 100, 150, 140)]);
    }

    #[test]
    fn test_noise_speck_dropped() {
        let page = page_with_words(&[(10, 80), (250, 252)]);
        let words = exact_splitter().split(&page, LINE);
        assert_eq!(words, vec![BoundingBox::new(10, 100, 80, 140)]);
    }

    #[test]
    fn test_margin_expands_into_page_coordinates() {
        let page = page_with_words(&[(0, 300)]);
        let words = WordSplitter::default().split(&page, LINE);
        assert_eq!(words, vec![BoundingBox::new(0, 99, 303, 141)]);
    }

    #[test]
    fn test_blank_and_degenerate_lines() {
        let page = page_with_words(&[]);
        assert!(exact_splitter().split(&page, LINE).is_empty());
        assert!(exact_splitter()
            .split(&page, BoundingBox::new(500, 10, 600, 20))
            .is_empty());
    }

    #[test]
    fn test_central_band() {
        assert_eq!(central_band(32), (14, 26));
        assert_eq!(central_band(1), (0, 1));
        let (start, end) = central_band(200);
        assert!(start < 100 && end > 100 && end <= 200);
    }

    #[test]
    fn test_word_intervals() {
        assert_eq!(word_intervals(&[], 50), vec![(0, 50)]);
        assert_eq!(word_intervals(&[(0, 5), (20, 30)], 50), vec![(5, 20), (30, 50)]);
        assert_eq!(word_intervals(&[(0, 50)], 50), vec![]);
    }
}
