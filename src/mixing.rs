//! Feature mixing and normalization.
//!
//! A mix step combines two derived columns with an arithmetic operator (or
//! passes one through) and then applies a normalization selected by a short
//! code. Codes come from user input and stored records, so an unrecognized
//! code is kept verbatim and treated as passthrough with a warning.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::error::{EngineError, Result};
use crate::math::butterworth::{design, filtfilt, FilterKind};
use crate::math::stats::{mean, min_max, quantile, sample_std};
use crate::record::{MixRecord, ProcStep};
use crate::table::{FeatureTable, RowKey};

/// Elementwise operator between two columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MixOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    /// `col_a` alone.
    #[default]
    #[serde(rename = "")]
    Passthrough,
}

impl MixOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Passthrough => "",
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Passthrough => a,
        }
    }
}

impl fmt::Display for MixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for MixOp {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "+" => Ok(Self::Add),
            "-" => Ok(Self::Sub),
            "*" => Ok(Self::Mul),
            "/" => Ok(Self::Div),
            "" => Ok(Self::Passthrough),
            other => Err(EngineError::invalid_input(format!("unknown operator '{other}'"))),
        }
    }
}

/// Normalization transform applied after mixing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NormalizeCode {
    #[default]
    None,
    MinMax,
    ZScore,
    /// Divide by 180 (degrees to half turns).
    Div180,
    Thresh25,
    Thresh50,
    Thresh75,
    Bandpass,
    Highpass,
    Lowpass,
    /// A code this version does not know; applied as passthrough.
    Unknown(String),
}

impl NormalizeCode {
    /// Parse a code. Never fails: unknown codes are kept as [`Self::Unknown`].
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "" | "none" => Self::None,
            "minmax" => Self::MinMax,
            "zscore" => Self::ZScore,
            "0-180" => Self::Div180,
            "thresh25" => Self::Thresh25,
            "thresh50" => Self::Thresh50,
            "thresh75" => Self::Thresh75,
            "bandpass" => Self::Bandpass,
            "highpass" => Self::Highpass,
            "lowpass" => Self::Lowpass,
            other => Self::Unknown(other.to_owned()),
        }
    }

    #[must_use]
    pub fn as_code(&self) -> &str {
        match self {
            Self::None => "none",
            Self::MinMax => "minmax",
            Self::ZScore => "zscore",
            Self::Div180 => "0-180",
            Self::Thresh25 => "thresh25",
            Self::Thresh50 => "thresh50",
            Self::Thresh75 => "thresh75",
            Self::Bandpass => "bandpass",
            Self::Highpass => "highpass",
            Self::Lowpass => "lowpass",
            Self::Unknown(code) => code,
        }
    }
}

impl From<String> for NormalizeCode {
    fn from(code: String) -> Self {
        Self::parse(&code)
    }
}

impl From<NormalizeCode> for String {
    fn from(code: NormalizeCode) -> Self {
        code.as_code().to_owned()
    }
}

impl fmt::Display for NormalizeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Combine two columns of a table elementwise.
///
/// `col_b` is ignored for [`MixOp::Passthrough`] and required otherwise.
///
/// # Errors
///
/// Returns [`EngineError::ColumnNotFound`] if a named column is missing and
/// [`EngineError::InvalidInput`] if an operator has no second column.
pub fn arithmetic_operations<K: RowKey>(
    table: &FeatureTable<K>,
    op: MixOp,
    col_a: &str,
    col_b: Option<&str>,
) -> Result<Vec<f64>> {
    let a = table.column(col_a)?;
    if op == MixOp::Passthrough {
        return Ok(a.to_vec());
    }
    let name_b = col_b.ok_or_else(|| {
        EngineError::invalid_input(format!("operator '{op}' needs a second column"))
    })?;
    let b = table.column(name_b)?;
    Ok(a.iter().zip(b).map(|(&x, &y)| op.apply(x, y)).collect())
}

/// Apply a normalization to a series. Missing values stay missing.
///
/// # Errors
///
/// Returns an error only if a filter code meets an invalid filter
/// configuration.
pub fn calc(series: &[f64], code: &NormalizeCode, filter: &FilterConfig) -> Result<Vec<f64>> {
    let out = match code {
        NormalizeCode::None => series.to_vec(),
        NormalizeCode::MinMax => match min_max(series) {
            Some((lo, hi)) if hi > lo => series.iter().map(|v| (v - lo) / (hi - lo)).collect(),
            Some((lo, _)) => series.iter().map(|v| v - lo).collect(),
            None => series.to_vec(),
        },
        NormalizeCode::ZScore => {
            let m = mean(series);
            let sd = sample_std(series);
            series.iter().map(|v| (v - m) / sd).collect()
        }
        NormalizeCode::Div180 => series.iter().map(|v| v / 180.0).collect(),
        NormalizeCode::Thresh25 => threshold(series, 0.25),
        NormalizeCode::Thresh50 => threshold(series, 0.50),
        NormalizeCode::Thresh75 => threshold(series, 0.75),
        NormalizeCode::Bandpass => filtered(series, FilterKind::Bandpass, filter)?,
        NormalizeCode::Highpass => filtered(series, FilterKind::Highpass, filter)?,
        NormalizeCode::Lowpass => filtered(series, FilterKind::Lowpass, filter)?,
        NormalizeCode::Unknown(code) => {
            log::warn!("unknown normalization code '{code}', passing values through");
            series.to_vec()
        }
    };
    Ok(out)
}

fn threshold(series: &[f64], q: f64) -> Vec<f64> {
    let cut = quantile(series, q);
    series
        .iter()
        .map(|&v| if v.is_nan() { f64::NAN } else { f64::from(u8::from(v > cut)) })
        .collect()
}

/// Filter the finite samples and scatter them back onto their positions.
fn filtered(series: &[f64], kind: FilterKind, config: &FilterConfig) -> Result<Vec<f64>> {
    let sos = design(kind, config)?;
    let (positions, values): (Vec<usize>, Vec<f64>) = series
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, &v)| (i, v))
        .unzip();

    let mut out = vec![f64::NAN; series.len()];
    for (i, v) in positions.into_iter().zip(filtfilt(&sos, &values)) {
        out[i] = v;
    }
    Ok(out)
}

/// Apply a mix record to a table.
///
/// The result shares the table's keys and timestamps and holds one column
/// named by [`MixRecord::column_name`].
///
/// # Errors
///
/// Returns [`EngineError::ColumnNotFound`] if a referenced column is missing.
pub fn mix<K: RowKey>(
    table: &FeatureTable<K>,
    record: &MixRecord,
    filter: &FilterConfig,
) -> Result<FeatureTable<K>> {
    let combined = arithmetic_operations(table, record.op, &record.col_a, record.col_b.as_deref())?;
    let values = calc(&combined, &record.normalize, filter)?;

    let mut out = table.empty_like();
    out.insert_column(record.column_name(), values)?;
    out.push_history(ProcStep::mix(record));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FeatureTableBuilder, MemberFrame};
    use approx::assert_relative_eq;

    fn table() -> FeatureTable<MemberFrame> {
        let mut builder = FeatureTableBuilder::new(vec!["a".to_owned(), "b".to_owned()]);
        let rows = [(1.0, 2.0), (2.0, 4.0), (f64::NAN, 1.0), (6.0, 3.0)];
        for (i, (a, b)) in rows.into_iter().enumerate() {
            builder.push(MemberFrame::new(i as i64, "1"), i as f64, &[a, b]);
        }
        builder.finish()
    }

    #[test]
    fn test_arithmetic_operations() {
        let t = table();
        let div = arithmetic_operations(&t, MixOp::Div, "a", Some("b")).unwrap();
        assert_relative_eq!(div[0], 0.5);
        assert!(div[2].is_nan());
        assert_relative_eq!(div[3], 2.0);

        let pass = arithmetic_operations(&t, MixOp::Passthrough, "b", None).unwrap();
        assert_eq!(pass, vec![2.0, 4.0, 1.0, 3.0]);
    }

    #[test]
    fn test_arithmetic_missing_column() {
        let t = table();
        assert!(matches!(
            arithmetic_operations(&t, MixOp::Add, "a", Some("nope")),
            Err(EngineError::ColumnNotFound(name)) if name == "nope"
        ));
        assert!(arithmetic_operations(&t, MixOp::Add, "a", None).is_err());
    }

    #[test]
    fn test_zscore() {
        let series = [1.0, 2.0, f64::NAN, 4.0, 8.0];
        let out = calc(&series, &NormalizeCode::ZScore, &FilterConfig::default()).unwrap();
        assert!(out[2].is_nan());
        assert_relative_eq!(mean(&out), 0.0, epsilon = 1e-12);
        assert_relative_eq!(sample_std(&out), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_minmax() {
        let out = calc(&[2.0, 4.0, 6.0], &NormalizeCode::MinMax, &FilterConfig::default()).unwrap();
        assert_eq!(out, vec![0.0, 0.5, 1.0]);
        let flat = calc(&[3.0, 3.0], &NormalizeCode::MinMax, &FilterConfig::default()).unwrap();
        assert_eq!(flat, vec![0.0, 0.0]);
    }

    #[test]
    fn test_threshold() {
        let series = [1.0, 2.0, 3.0, 4.0, f64::NAN];
        let out = calc(&series, &NormalizeCode::Thresh50, &FilterConfig::default()).unwrap();
        assert_eq!(&out[..4], &[0.0, 0.0, 1.0, 1.0]);
        assert!(out[4].is_nan());
    }

    #[test]
    fn test_div180() {
        let code = NormalizeCode::parse("0-180");
        let out = calc(&[90.0, -180.0], &code, &FilterConfig::default()).unwrap();
        assert_eq!(out, vec![0.5, -1.0]);
    }

    #[test]
    fn test_unknown_code_passes_through() {
        let _ = env_logger::builder().is_test(true).try_init();
        let code = NormalizeCode::parse("median9");
        assert_eq!(code, NormalizeCode::Unknown("median9".to_owned()));
        let out = calc(&[1.0, 5.0], &code, &FilterConfig::default()).unwrap();
        assert_eq!(out, vec![1.0, 5.0]);
    }

    #[test]
    fn test_filter_keeps_missing_positions() {
        let mut series: Vec<f64> = (0..200).map(|i| 2.0 + (i as f64 * 0.05).sin()).collect();
        series[10] = f64::NAN;
        series[150] = f64::NAN;
        let out = calc(&series, &NormalizeCode::Lowpass, &FilterConfig::default()).unwrap();
        assert!(out[10].is_nan());
        assert!(out[150].is_nan());
        assert_eq!(out.iter().filter(|v| v.is_finite()).count(), 198);

        let high =
            calc(&vec![4.0; 100], &NormalizeCode::Highpass, &FilterConfig::default()).unwrap();
        assert!(high.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_bandpass_removes_offset_and_keeps_gaps() {
        let config = FilterConfig::default();
        // 0.5 Hz inside the pass band, riding on a constant offset
        let mut series: Vec<f64> = (0..600)
            .map(|i| {
                let t = i as f64 / config.sample_rate;
                5.0 + (2.0 * std::f64::consts::PI * 0.5 * t).sin()
            })
            .collect();
        for i in [0, 77, 420, 599] {
            series[i] = f64::NAN;
        }
        let out = calc(&series, &NormalizeCode::Bandpass, &config).unwrap();
        assert_eq!(out.len(), series.len());
        for (i, v) in out.iter().enumerate() {
            assert_eq!(v.is_nan(), series[i].is_nan(), "position {i}");
        }
        assert!(mean(&out).abs() < 1.0);
        let peak = out.iter().filter(|v| v.is_finite()).fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(peak > 0.5, "pass band was attenuated: {peak}");
    }

    #[test]
    fn test_code_round_trip() {
        let codes = [
            "minmax", "zscore", "0-180", "thresh25", "thresh50", "thresh75", "bandpass", "highpass",
            "lowpass",
        ];
        for code in codes {
            assert_eq!(NormalizeCode::parse(code).as_code(), code);
        }
        assert_eq!(NormalizeCode::parse(""), NormalizeCode::None);
        let json = serde_json::to_string(&NormalizeCode::Div180).unwrap();
        assert_eq!(json, "\"0-180\"");
    }

    #[test]
    fn test_op_parse() {
        assert_eq!("/".parse::<MixOp>().unwrap(), MixOp::Div);
        assert_eq!("".parse::<MixOp>().unwrap(), MixOp::Passthrough);
        assert!("%".parse::<MixOp>().is_err());
        assert_eq!(serde_json::to_string(&MixOp::Mul).unwrap(), "\"*\"");
    }

    #[test]
    fn test_mix_table() {
        let t = table();
        let record = MixRecord::new("a", MixOp::Add, Some("b".to_owned()), NormalizeCode::None);
        let out = mix(&t, &record, &FilterConfig::default()).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out.column_names().collect::<Vec<_>>(), vec!["a+b"]);
        assert_eq!(out.column("a+b").unwrap()[1], 6.0);
        let step = out.proc_history.last().unwrap();
        assert_eq!(step.kind, "mix");
        assert_eq!(step.source_cols, vec!["a".to_owned(), "b".to_owned()]);
    }
}
