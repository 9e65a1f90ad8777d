//! Reading-order sorting of word boxes
//!
//! Boxes are clustered into lines by vertical position, then read left to
//! right within a line and line by line top to bottom.

use super::geometry::BoundingBox;

/// Order boxes for reading.
///
/// Boxes are visited top-down. A box joins the first line whose reference
/// box (the first box placed in that line) vertically contains its center,
/// with a tolerance of `line_overlap_threshold` reference heights above and
/// below; otherwise it starts a new line. The reference box never changes,
/// so strongly skewed lines can be split or misassigned.
pub fn sort_reading_order(boxes: &[BoundingBox], line_overlap_threshold: f32) -> Vec<BoundingBox> {
    let mut by_top = boxes.to_vec();
    by_top.sort_by_key(|b| b.y1);

    let mut lines: Vec<Vec<BoundingBox>> = Vec::new();
    for bbox in by_top {
        let center = bbox.center_y();
        let line = lines.iter_mut().find(|line| {
            let reference = line[0];
            let tolerance = reference.height() as f32 * line_overlap_threshold;
            reference.y1 as f32 - tolerance <= center && center <= reference.y2 as f32 + tolerance
        });

        match line {
            Some(line) => line.push(bbox),
            None => lines.push(vec![bbox]),
        }
    }

    lines
        .into_iter()
        .flat_map(|mut line| {
            line.sort_by_key(|b| b.x1);
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2)
    }

    #[test]
    fn test_row_major_order() {
        let boxes = [b(0, 20, 10, 30), b(20, 0, 30, 10), b(0, 0, 10, 10)];
        assert_eq!(
            sort_reading_order(&boxes, 0.7),
            vec![b(0, 0, 10, 10), b(20, 0, 30, 10), b(0, 20, 10, 30)]
        );
    }

    #[test]
    fn test_slightly_offset_words_share_a_line() {
        let boxes = [b(120, 104, 180, 138), b(0, 100, 100, 140), b(200, 98, 260, 136), b(0, 200, 90, 240)];
        assert_eq!(
            sort_reading_order(&boxes, 0.7),
            vec![b(0, 100, 100, 140), b(120, 104, 180, 138), b(200, 98, 260, 136), b(0, 200, 90, 240)]
        );
    }

    #[test]
    fn test_single_and_empty() {
        assert!(sort_reading_order(&[], 0.7).is_empty());
        assert_eq!(sort_reading_order(&[b(1, 2, 3, 4)], 0.7), vec![b(1, 2, 3, 4)]);
    }

    #[test]
    fn test_zero_threshold_separates_non_overlapping_rows() {
        // Centers fall outside each other's spans, so each box is its own line
        let boxes = [b(50, 0, 60, 10), b(0, 12, 10, 22), b(30, 24, 40, 34)];
        assert_eq!(
            sort_reading_order(&boxes, 0.0),
            vec![b(50, 0, 60, 10), b(0, 12, 10, 22), b(30, 24, 40, 34)]
        );
    }

    #[test]
    fn test_skewed_line_uses_first_box_as_reference() {
        // A line drifting downward: the third word's center (45) is beyond
        // the reference span 0..20 plus 0.7 * 20 = 14 tolerance, so it starts
        // a new line even though it follows the second word.
        let boxes = [b(0, 0, 50, 20), b(60, 15, 110, 35), b(120, 35, 170, 55)];
        let sorted = sort_reading_order(&boxes, 0.7);
        assert_eq!(sorted, vec![b(0, 0, 50, 20), b(60, 15, 110, 35), b(120, 35, 170, 55)]);

        // Known misassignment: once a word starts the next line left of the
        // drift, the drifting word is read after it.
        let boxes = [b(0, 0, 50, 20), b(60, 15, 110, 35), b(120, 35, 170, 55), b(0, 36, 40, 56)];
        let sorted = sort_reading_order(&boxes, 0.7);
        assert_eq!(
            sorted,
            vec![b(0, 0, 50, 20), b(60, 15, 110, 35), b(0, 36, 40, 56), b(120, 35, 170, 55)]
        );
    }
}
