//! Calculation records, processing history and the derived column-name
//! contract.
//!
//! Vector features are named `op(a-b)` for two keypoints and
//! `op(a-b,a-c)` for three, with `_x`/`_y` on the op for paired components
//! (`component_x(0-1)`, `plus_y(5-7,5-9)`). Downstream tools rebuild a
//! [`CalcRecord`] from nothing but the column name, so the format is stable.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::mixing::{MixOp, NormalizeCode};
use crate::table::{KeypointId, MemberId};

/// Vector geometry calculation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcType {
    Component,
    Norm,
    Angle2,
    Plus,
    Cross,
    Dot,
    Norms,
    SinCos,
    Angle3,
    CrossDotPlusNorms,
    CrossDotPlusAngle,
}

impl CalcType {
    pub const ALL: [Self; 11] = [
        Self::Component,
        Self::Norm,
        Self::Angle2,
        Self::Plus,
        Self::Cross,
        Self::Dot,
        Self::Norms,
        Self::SinCos,
        Self::Angle3,
        Self::CrossDotPlusNorms,
        Self::CrossDotPlusAngle,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Norm => "norm",
            Self::Angle2 => "angle2",
            Self::Plus => "plus",
            Self::Cross => "cross",
            Self::Dot => "dot",
            Self::Norms => "norms",
            Self::SinCos => "sin_cos",
            Self::Angle3 => "angle3",
            Self::CrossDotPlusNorms => "cross_dot_plus_norms",
            Self::CrossDotPlusAngle => "cross_dot_plus_angle",
        }
    }

    /// Number of keypoints the calculation takes.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Component | Self::Norm | Self::Angle2 => 2,
            _ => 3,
        }
    }
}

impl fmt::Display for CalcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalcType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EngineError::invalid_input(format!("unknown calc type '{s}'")))
    }
}

/// One reproducible vector feature computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalcRecord {
    pub calc_type: CalcType,
    /// Restrict to one member; `None` computes every member.
    pub member: Option<MemberId>,
    pub point_a: KeypointId,
    pub point_b: KeypointId,
    pub point_c: Option<KeypointId>,
}

impl CalcRecord {
    /// A two-keypoint calculation.
    #[must_use]
    pub fn pair(calc_type: CalcType, a: KeypointId, b: KeypointId) -> Self {
        Self {
            calc_type,
            member: None,
            point_a: a,
            point_b: b,
            point_c: None,
        }
    }

    /// A three-keypoint calculation.
    #[must_use]
    pub fn triple(calc_type: CalcType, a: KeypointId, b: KeypointId, c: KeypointId) -> Self {
        Self {
            calc_type,
            member: None,
            point_a: a,
            point_b: b,
            point_c: Some(c),
        }
    }

    #[must_use]
    pub fn with_member(mut self, member: impl Into<MemberId>) -> Self {
        self.member = Some(member.into());
        self
    }

    /// Check that the number of keypoints matches the calculation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] on an arity mismatch.
    pub fn validate(&self) -> Result<()> {
        let given = if self.point_c.is_some() { 3 } else { 2 };
        if given == self.calc_type.arity() {
            Ok(())
        } else {
            Err(EngineError::invalid_input(format!(
                "{} takes {} keypoints, record has {given}",
                self.calc_type,
                self.calc_type.arity()
            )))
        }
    }

    /// Rebuild a record from a derived column name.
    ///
    /// Composite calculations cannot be told apart from their parts by
    /// name, so they come back as the individual calculation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidColumnName`] if the name does not follow
    /// the contract or names an unknown op.
    pub fn from_column_name(name: &str) -> Result<Self> {
        let parsed = parse_column_name(name)?;
        let calc_type = match (parsed.op.as_str(), parsed.point_c.is_some()) {
            ("component", false) => CalcType::Component,
            ("norm", false) => CalcType::Norm,
            ("deg", false) => CalcType::Angle2,
            ("deg", true) => CalcType::Angle3,
            ("plus", true) => CalcType::Plus,
            ("cross", true) => CalcType::Cross,
            ("dot", true) => CalcType::Dot,
            ("norms", true) => CalcType::Norms,
            ("sin" | "cos", true) => CalcType::SinCos,
            _ => return Err(EngineError::invalid_column_name(name)),
        };
        Ok(Self {
            calc_type,
            member: None,
            point_a: parsed.point_a,
            point_b: parsed.point_b,
            point_c: parsed.point_c,
        })
    }
}

/// Arithmetic combination of two derived columns plus a normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixRecord {
    pub col_a: String,
    pub op: MixOp,
    pub col_b: Option<String>,
    pub normalize: NormalizeCode,
}

impl MixRecord {
    #[must_use]
    pub fn new(
        col_a: impl Into<String>,
        op: MixOp,
        col_b: Option<String>,
        normalize: NormalizeCode,
    ) -> Self {
        Self {
            col_a: col_a.into(),
            op,
            col_b,
            normalize,
        }
    }

    /// Name of the column this record produces.
    #[must_use]
    pub fn column_name(&self) -> String {
        let base = match (&self.col_b, self.op) {
            (Some(b), op) if op != MixOp::Passthrough => {
                format!("{}{}{}", self.col_a, op.symbol(), b)
            }
            _ => self.col_a.clone(),
        };
        match self.normalize {
            NormalizeCode::None => base,
            ref code => format!("{base}_{}", code.as_code()),
        }
    }
}

/// Entry of a table's processing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcStep {
    /// Transform name, e.g. `thinning`, `calc`, `mix`, `speed`.
    #[serde(rename = "type")]
    pub kind: String,
    pub source_cols: Vec<String>,
    pub params: serde_json::Value,
}

impl ProcStep {
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        source_cols: Vec<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            source_cols,
            params,
        }
    }

    /// History entry for a vector calculation.
    #[must_use]
    pub fn calc(record: &CalcRecord) -> Self {
        Self::new(
            "calc",
            Vec::new(),
            serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
        )
    }

    /// History entry for a mix/normalize step.
    #[must_use]
    pub fn mix(record: &MixRecord) -> Self {
        let mut sources = vec![record.col_a.clone()];
        sources.extend(record.col_b.iter().cloned());
        Self::new(
            "mix",
            sources,
            serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
        )
    }
}

/// Paired-component suffix of a derived column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// A derived column name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedColumn {
    pub op: String,
    pub axis: Option<Axis>,
    pub point_a: KeypointId,
    pub point_b: KeypointId,
    pub point_c: Option<KeypointId>,
}

static COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<op>[a-z]+?)(?:_(?P<axis>[xy]))?",
        r"\((?P<a>\d+)-(?P<b>\d+)(?:,(?P<a2>\d+)-(?P<c>\d+))?\)$",
    ))
    .expect("column name pattern is valid")
});

/// Name of a two-keypoint column: `op(a-b)`.
#[must_use]
pub fn pair_column(op: &str, a: KeypointId, b: KeypointId) -> String {
    format!("{op}({a}-{b})")
}

/// Name of a three-keypoint column: `op(a-b,a-c)`.
#[must_use]
pub fn triple_column(op: &str, a: KeypointId, b: KeypointId, c: KeypointId) -> String {
    format!("{op}({a}-{b},{a}-{c})")
}

/// Split a derived column name into op, axis suffix and keypoints.
///
/// # Errors
///
/// Returns [`EngineError::InvalidColumnName`] if the name does not match
/// `op(a-b)` or `op(a-b,a-c)`, or if the two vectors do not share `a`.
pub fn parse_column_name(name: &str) -> Result<ParsedColumn> {
    let caps = COLUMN_RE
        .captures(name)
        .ok_or_else(|| EngineError::invalid_column_name(name))?;
    let number = |group: &str| -> Result<Option<KeypointId>> {
        caps.name(group)
            .map(|m| m.as_str().parse::<KeypointId>())
            .transpose()
            .map_err(|_| EngineError::invalid_column_name(name))
    };

    let point_a = number("a")?.ok_or_else(|| EngineError::invalid_column_name(name))?;
    let point_b = number("b")?.ok_or_else(|| EngineError::invalid_column_name(name))?;
    let point_c = number("c")?;
    if let Some(a2) = number("a2")? {
        if a2 != point_a {
            return Err(EngineError::invalid_column_name(name));
        }
    }

    let axis = caps.name("axis").map(|m| match m.as_str() {
        "x" => Axis::X,
        _ => Axis::Y,
    });

    Ok(ParsedColumn {
        op: caps["op"].to_owned(),
        axis,
        point_a,
        point_b,
        point_c,
    })
}
