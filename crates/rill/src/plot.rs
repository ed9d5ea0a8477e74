// Terminal line charts
//
// A small fixed-size renderer for watching predictions track ground truth
// during training, standing in for a plotting window. Each call produces
// one complete frame as a String; the caller prints it.
//
// Series are drawn in order, one glyph each, later series over earlier
// ones. Values outside [y_min, y_max] are clamped onto the border rows.

const HEIGHT: usize = 16;
const MAX_WIDTH: usize = 72;
const GLYPHS: [char; 4] = ['*', '+', 'o', 'x'];

/// Render `series` against `xs` as an ASCII line chart with a fixed
/// y-range. The first series draws with `*`, the second with `+`, then
/// `o` and `x`.
///
/// `xs` sets the number of points and the x-extent printed under the
/// axis; series longer than `xs` are cut off, shorter ones leave gaps.
/// Returns an empty string for empty input or a y-range with
/// `y_max <= y_min`.
pub fn render(xs: &[f64], series: &[&[f64]], y_min: f64, y_max: f64) -> String {
    let n = xs.len();
    if n == 0 || series.is_empty() || y_max <= y_min {
        return String::new();
    }
    let width = n.min(MAX_WIDTH);
    let span = y_max - y_min;

    let mut grid = vec![vec![' '; width]; HEIGHT];
    for (series_idx, s) in series.iter().enumerate() {
        let glyph = GLYPHS[series_idx % GLYPHS.len()];
        for col in 0..width {
            // Downsample: pick the source point this column lands on.
            let i = col * n / width;
            let v = match s.get(i) {
                Some(&v) => v.clamp(y_min, y_max),
                None => continue,
            };
            let row = ((y_max - v) / span * (HEIGHT - 1) as f64).round() as usize;
            grid[row.min(HEIGHT - 1)][col] = glyph;
        }
    }

    let mut out = String::new();
    for (row_idx, row) in grid.iter().enumerate() {
        if row_idx == 0 {
            out.push_str(&format!("{:>7.2}", y_max));
        } else if row_idx == HEIGHT - 1 {
            out.push_str(&format!("{:>7.2}", y_min));
        } else {
            out.push_str(&" ".repeat(7));
        }
        out.push_str(" |");
        out.extend(row.iter());
        out.push('\n');
    }

    out.push_str(&" ".repeat(7));
    out.push_str(" +");
    out.push_str(&"-".repeat(width));
    out.push('\n');

    // x-extent, first value under the left edge and last under the right
    let left = format!("{:.2}", xs[0]);
    let right = format!("{:.2}", xs[n - 1]);
    let pad = width.saturating_sub(left.len() + right.len());
    out.push_str(&" ".repeat(9));
    out.push_str(&left);
    out.push_str(&" ".repeat(pad));
    out.push_str(&right);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_frame_shape() {
        let xs: Vec<f64> = (0..100).map(|i| i as f64 * 0.1).collect();
        let truth: Vec<f64> = xs.iter().map(|x| x.sin()).collect();
        let pred: Vec<f64> = xs.iter().map(|x| x.cos()).collect();
        let frame = render(&xs, &[truth.as_slice(), pred.as_slice()], -1.2, 1.2);

        // HEIGHT chart rows, one axis row, one x-label row
        assert_eq!(frame.lines().count(), HEIGHT + 2);
        assert!(frame.contains('*'));
        assert!(frame.contains('+'));
        assert!(frame.contains("1.20"));
        assert!(frame.contains("-1.20"));
    }

    #[test]
    fn test_render_clamps_out_of_range() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let wild = [5.0, -5.0, 0.0, 0.5];
        let frame = render(&xs, &[&wild[..]], -1.0, 1.0);
        assert_eq!(frame.lines().count(), HEIGHT + 2);
    }

    #[test]
    fn test_render_degenerate_input() {
        assert_eq!(render(&[], &[], -1.0, 1.0), "");
        let xs = [0.0, 1.0];
        let s = [0.1, 0.2];
        assert_eq!(render(&xs, &[&s[..]], 1.0, 1.0), "");
    }

    #[test]
    fn test_render_short_series_leaves_gap() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let short = [0.5];
        let frame = render(&xs, &[&short[..]], -1.0, 1.0);
        // Only one column can be drawn from a one-point series.
        assert_eq!(frame.matches('*').count(), 1);
    }
}
