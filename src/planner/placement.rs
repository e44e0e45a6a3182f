//! Aspect-preserving placement (§4.5). Shared by picture-in-picture,
//! multi-overlay, side-by-side grids, and slideshow frame standardization:
//! scale down to fit the target cell without distortion, then pad to the
//! cell's exact size with black, and reset SAR to 1:1 so players don't
//! re-stretch the result.

/// Rounds a dimension down to the nearest even integer; the codec tool
/// rejects odd width/height on most encoders.
pub fn round_down_even(value: u32) -> u32 {
    if value % 2 == 0 { value } else { value - 1 }
}

/// Builds the `scale,pad,setsar` filter-graph fragment for placing one
/// stream labelled `input_label` into a `width`x`height` cell.
pub fn scale_pad_filter(input_label: &str, output_label: &str, width: u32, height: u32) -> String {
    let width = round_down_even(width.max(2));
    let height = round_down_even(height.max(2));
    format!(
        "[{input_label}]scale={width}:{height}:force_original_aspect_ratio=decrease,\
pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1:1[{output_label}]"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_odd_dimensions_down() {
        assert_eq!(round_down_even(1281), 1280);
        assert_eq!(round_down_even(720), 720);
    }

    #[test]
    fn filter_fragment_contains_expected_stages() {
        let filter = scale_pad_filter("0:v", "v0", 1280, 721);
        assert!(filter.contains("scale=1280:720:force_original_aspect_ratio=decrease"));
        assert!(filter.contains("pad=1280:720:(ow-iw)/2:(oh-ih)/2:color=black"));
        assert!(filter.contains("setsar=1:1"));
    }
}
