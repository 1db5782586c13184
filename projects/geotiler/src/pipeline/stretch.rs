use crate::error::SampleError;
use anyhow::Result;
use serde::Serialize;

/// Memory order of a multi-band buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandLayout {
    /// `[band][row][col]`
    BandFirst,
    /// `[row][col][band]`
    BandLast,
}

/// Stretch selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum StretchKind {
    Percentile,
    Stddev,
    Minmax,
}

/// Per-band contrast stretch to 8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum StretchMethod {
    Percentile { lower: f64, upper: f64 },
    StdDev { k: f64 },
    MinMax,
}

impl Default for StretchMethod {
    fn default() -> Self {
        Self::Percentile {
            lower: 0.5,
            upper: 99.5,
        }
    }
}

impl StretchMethod {
    /// Builds a method from its kind and the textual parameters
    /// (`"lower,upper"` for percentile, `"k"` for stddev).
    pub fn from_parameters(kind: StretchKind, params: Option<&str>) -> Result<Self> {
        let params = params.map(str::trim).filter(|p| !p.is_empty());
        match kind {
            StretchKind::Minmax => Ok(Self::MinMax),
            StretchKind::Percentile => {
                let Some(text) = params else {
                    return Ok(Self::default());
                };
                let values = parse_numbers(text)?;
                let [lower, upper] = values[..] else {
                    return Err(SampleError::config(format!(
                        "percentile stretch expects \"lower,upper\", got {:?}",
                        text
                    ))
                    .into());
                };
                if !(0.0..=100.0).contains(&lower) || !(0.0..=100.0).contains(&upper) || lower >= upper
                {
                    return Err(SampleError::config(format!(
                        "percentile bounds must satisfy 0 <= lower < upper <= 100, got {},{}",
                        lower, upper
                    ))
                    .into());
                }
                Ok(Self::Percentile { lower, upper })
            }
            StretchKind::Stddev => {
                let Some(text) = params else {
                    return Ok(Self::StdDev { k: 2.5 });
                };
                let values = parse_numbers(text)?;
                match values[..] {
                    [k] if k > 0.0 => Ok(Self::StdDev { k }),
                    _ => Err(SampleError::config(format!(
                        "stddev stretch expects one positive factor, got {:?}",
                        text
                    ))
                    .into()),
                }
            }
        }
    }

    /// Value range mapped onto `[0, 255]`, or `None` to pass the band through.
    fn range(&self, band: &[f64]) -> Option<(f64, f64)> {
        let (lo, hi) = match *self {
            Self::MinMax => {
                let lo = band.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = band.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (lo, hi)
            }
            Self::Percentile { lower, upper } => {
                let mut sorted = band.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                (percentile(&sorted, lower), percentile(&sorted, upper))
            }
            Self::StdDev { k } => {
                if band.len() < 2 {
                    return None;
                }
                let n = band.len() as f64;
                let mean = band.iter().sum::<f64>() / n;
                let var = band.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
                let s = var.sqrt();
                (mean - k * s, mean + k * s)
            }
        };
        (hi > lo).then_some((lo, hi))
    }
}

fn parse_numbers(text: &str) -> Result<Vec<f64>> {
    text.split(',')
        .map(|part| {
            part.trim().parse::<f64>().map_err(|_| {
                anyhow::Error::from(SampleError::config(format!(
                    "invalid stretch parameter {:?}",
                    part.trim()
                )))
            })
        })
        .collect()
}

/// Linearly interpolated percentile of sorted data (numpy's default).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Stretches each band independently to `u8`. The output keeps the input layout.
pub fn stretch(
    data: &[f32],
    shape: (usize, usize, usize),
    layout: BandLayout,
    method: StretchMethod,
) -> Vec<u8> {
    let (bands, rows, cols) = shape;
    let size = rows * cols;
    let index = |band: usize, px: usize| match layout {
        BandLayout::BandFirst => band * size + px,
        BandLayout::BandLast => px * bands + band,
    };

    let mut out = vec![0u8; data.len()];
    for band in 0..bands {
        let values: Vec<f64> = (0..size).map(|px| data[index(band, px)] as f64).collect();
        match method.range(&values) {
            Some((lo, hi)) => {
                let scale = 255.0 / (hi - lo);
                for (px, v) in values.iter().enumerate() {
                    out[index(band, px)] = ((v - lo) * scale).clamp(0.0, 255.0) as u8;
                }
            }
            None => {
                for (px, v) in values.iter().enumerate() {
                    out[index(band, px)] = v.clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minmax_is_idempotent_on_full_range() {
        let data: Vec<f32> = (0..=255).map(|v| v as f32).collect();
        let out = stretch(&data, (1, 16, 16), BandLayout::BandFirst, StretchMethod::MinMax);
        let expected: Vec<u8> = (0..=255).collect();
        assert_eq!(out, expected);

        let again: Vec<f32> = out.iter().map(|&v| v as f32).collect();
        assert_eq!(
            stretch(&again, (1, 16, 16), BandLayout::BandFirst, StretchMethod::MinMax),
            expected
        );
    }

    #[test]
    fn test_full_percentile_equals_minmax() {
        let data: Vec<f32> = (0..60).map(|v| ((v * 37) % 1000) as f32 + 100.0).collect();
        let full = StretchMethod::Percentile {
            lower: 0.0,
            upper: 100.0,
        };
        for layout in [BandLayout::BandFirst, BandLayout::BandLast] {
            assert_eq!(
                stretch(&data, (3, 4, 5), layout, full),
                stretch(&data, (3, 4, 5), layout, StretchMethod::MinMax)
            );
        }
    }

    #[test]
    fn test_uniform_band_passes_through() {
        let data = vec![7.0f32; 16];
        for method in [
            StretchMethod::MinMax,
            StretchMethod::default(),
            StretchMethod::StdDev { k: 2.5 },
        ] {
            let out = stretch(&data, (1, 4, 4), BandLayout::BandFirst, method);
            assert!(out.iter().all(|&v| v == 7));
        }
    }

    #[test]
    fn test_bands_stretch_independently_band_last() {
        // Two bands interleaved: band 0 in 0..10, band 1 in 1000..2000
        let data = vec![0.0, 1000.0, 10.0, 2000.0];
        let out = stretch(&data, (2, 1, 2), BandLayout::BandLast, StretchMethod::MinMax);
        assert_eq!(out, vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 50.0), 2.5);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 4.0);
    }

    #[test]
    fn test_from_parameters() {
        assert_eq!(
            StretchMethod::from_parameters(StretchKind::Percentile, None).unwrap(),
            StretchMethod::default()
        );
        assert_eq!(
            StretchMethod::from_parameters(StretchKind::Percentile, Some("2, 98")).unwrap(),
            StretchMethod::Percentile {
                lower: 2.0,
                upper: 98.0
            }
        );
        assert_eq!(
            StretchMethod::from_parameters(StretchKind::Stddev, Some("3")).unwrap(),
            StretchMethod::StdDev { k: 3.0 }
        );
        assert!(StretchMethod::from_parameters(StretchKind::Percentile, Some("98,2")).is_err());
        assert!(StretchMethod::from_parameters(StretchKind::Percentile, Some("5")).is_err());
        assert!(StretchMethod::from_parameters(StretchKind::Stddev, Some("x")).is_err());
    }
}
