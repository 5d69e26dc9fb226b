use std::collections::BTreeMap;

use image::Rgb;
use palette::{Hsl, IntoColor, Srgb};

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Rgb<u8>> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.45);
            let rgb: Srgb = hsl.into_color();
            Rgb([
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            ])
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Color mapping: series name → Rgb
// ---------------------------------------------------------------------------

pub const GRAY: Rgb<u8> = Rgb([128, 128, 128]);

/// Maps plotted series (or histogram frames) to distinct colours.
#[derive(Debug, Clone)]
pub struct ColorMap {
    mapping: BTreeMap<String, Rgb<u8>>,
    order: Vec<String>,
    default_color: Rgb<u8>,
}

impl ColorMap {
    /// Build a colour map, assigning hues in the order the names are given.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let palette = generate_palette(names.len());
        let order: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let mapping = order.iter().cloned().zip(palette).collect();

        ColorMap {
            mapping,
            order,
            default_color: GRAY,
        }
    }

    /// Look up the colour for a given series.
    pub fn color_for(&self, name: &str) -> Rgb<u8> {
        self.mapping.get(name).copied().unwrap_or(self.default_color)
    }

    /// Legend entries (label → colour), in insertion order.
    pub fn legend_entries(&self) -> Vec<(String, Rgb<u8>)> {
        self.order
            .iter()
            .map(|name| (name.clone(), self.color_for(name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_colours_are_distinct() {
        let palette = generate_palette(6);
        assert_eq!(palette.len(), 6);
        for (i, a) in palette.iter().enumerate() {
            for b in &palette[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(generate_palette(0).is_empty());
    }

    #[test]
    fn unknown_names_are_gray() {
        let map = ColorMap::new(&["frame_5", "frame_10"]);
        assert_ne!(map.color_for("frame_5"), map.color_for("frame_10"));
        assert_eq!(map.color_for("frame_15"), GRAY);
        let legend: Vec<String> = map.legend_entries().into_iter().map(|(n, _)| n).collect();
        assert_eq!(legend, vec!["frame_5", "frame_10"]);
    }
}
