use crate::error::SampleError;
use crate::pipeline::types::Label;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;

/// How class values are turned into gray levels of the label image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum GltMethod {
    /// Numeric classes are written as-is.
    None,
    /// Classes spread evenly over 0..=255.
    MaxContrast,
    /// Classes numbered 1, 2, 3, ... in sorted order.
    PositiveInteger,
    /// Explicit `class:value` pairs.
    Custom,
}

impl GltMethod {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::MaxContrast => "Maximum Contrast",
            Self::PositiveInteger => "Positive Integer",
            Self::Custom => "Custom",
        }
    }
}

/// Immutable class -> gray level table, ordered by class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrayLevelMapping {
    pub method: GltMethod,
    entries: Vec<(Label, u8)>,
}

impl GrayLevelMapping {
    /// Builds the table for the distinct `labels`. `params` is required for
    /// [`GltMethod::Custom`] and ignored otherwise.
    pub fn build(method: GltMethod, labels: &BTreeSet<Label>, params: Option<&str>) -> Result<Self> {
        if labels.is_empty() {
            return Err(SampleError::config("no class values found in the features").into());
        }
        let values: Vec<&Label> = labels.iter().collect();
        let numeric = values.iter().all(|l| l.is_digit());

        let entries = match method {
            GltMethod::None | GltMethod::MaxContrast => {
                if !numeric {
                    return Err(SampleError::config(
                        "string class values need the positive-integer or custom gray level transformation",
                    )
                    .into());
                }
                let in_range = values
                    .iter()
                    .all(|l| l.as_str().parse::<u32>().map(|v| v <= 255).unwrap_or(false));
                if !in_range {
                    return Err(SampleError::config(
                        "class values outside 0..=255 need the positive-integer or custom gray level transformation",
                    )
                    .into());
                }

                if method == GltMethod::None {
                    values
                        .iter()
                        .map(|l| Ok(((*l).clone(), l.as_str().parse::<u8>()?)))
                        .collect::<Result<Vec<_>>>()?
                } else {
                    let step = 255 / values.len();
                    values
                        .iter()
                        .enumerate()
                        .map(|(i, l)| ((*l).clone(), (step * (i + 1)).min(255) as u8))
                        .collect()
                }
            }
            GltMethod::PositiveInteger => {
                if values.len() > 255 {
                    return Err(SampleError::config(format!(
                        "{} classes do not fit in an 8-bit label",
                        values.len()
                    ))
                    .into());
                }
                values
                    .iter()
                    .enumerate()
                    .map(|(i, l)| ((*l).clone(), (i + 1) as u8))
                    .collect()
            }
            GltMethod::Custom => parse_custom(labels, params)?,
        };

        Ok(Self { method, entries })
    }

    pub fn gray_level(&self, label: &Label) -> Option<u8> {
        self.entries
            .binary_search_by(|(l, _)| l.cmp(label))
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn entries(&self) -> &[(Label, u8)] {
        &self.entries
    }
}

fn parse_custom(labels: &BTreeSet<Label>, params: Option<&str>) -> Result<Vec<(Label, u8)>> {
    let text: String = params
        .unwrap_or("")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if text.is_empty() {
        return Err(SampleError::config("custom gray level transformation needs \"class:value,...\" parameters").into());
    }

    let mut entries = Vec::new();
    for pair in text.split(',') {
        let (key, value) = pair
            .split_once(':')
            .ok_or_else(|| SampleError::config(format!("malformed mapping entry {:?}", pair)))?;
        let label = Label::from(key);
        if !labels.contains(&label) {
            return Err(SampleError::config(format!(
                "mapping entry {:?} does not match any class value",
                key
            ))
            .into());
        }
        let level: u8 = value.parse().map_err(|_| {
            SampleError::config(format!("gray level {:?} is not in 0..=255", value))
        })?;
        entries.push((label, level));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.dedup_by(|a, b| a.0 == b.0);
    if entries.len() != labels.len() {
        return Err(SampleError::config(format!(
            "mapping covers {} of {} class values",
            entries.len(),
            labels.len()
        ))
        .into());
    }
    Ok(entries)
}
