//! 类型化的测量字段
//!
//! 每个测量值由 (分组, 指标, 层, 扇区名) 唯一确定，宽表列名由这些部分生成。
//! 列的筛选通过 `NamedGroup` 的集合成员判断完成。

use deid_core::{DeidError, Laterality, Modality};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// XML中的一级测量分组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeasurementGroup {
    // Disc3D
    FourSectors,
    TwelveSectors,
    RnflParameters,
    OnhParameters,
    // Glaucoma3D
    TotalSector,
    TwoSectors,
    EightSectors,
    // Macula3D
    EtdrsSectors,
    FullRetinal,
}

impl MeasurementGroup {
    pub const DISC: [MeasurementGroup; 4] = [
        MeasurementGroup::FourSectors,
        MeasurementGroup::TwelveSectors,
        MeasurementGroup::RnflParameters,
        MeasurementGroup::OnhParameters,
    ];

    pub const MACULA: [MeasurementGroup; 2] =
        [MeasurementGroup::EtdrsSectors, MeasurementGroup::FullRetinal];

    pub fn modality(&self) -> Modality {
        match self {
            MeasurementGroup::FourSectors
            | MeasurementGroup::TwelveSectors
            | MeasurementGroup::RnflParameters
            | MeasurementGroup::OnhParameters => Modality::Disc,
            MeasurementGroup::TotalSector
            | MeasurementGroup::TwoSectors
            | MeasurementGroup::EightSectors => Modality::Glaucoma,
            MeasurementGroup::EtdrsSectors | MeasurementGroup::FullRetinal => Modality::Macula,
        }
    }

    /// XML元素名
    pub fn xml_tag(&self) -> &'static str {
        match self {
            MeasurementGroup::FourSectors => "FourSectors",
            MeasurementGroup::TwelveSectors => "TwelveSectors",
            MeasurementGroup::RnflParameters => "RNFLParameters",
            MeasurementGroup::OnhParameters => "ONHParameters",
            MeasurementGroup::TotalSector => "TotalSector",
            MeasurementGroup::TwoSectors => "TwoSectors",
            MeasurementGroup::EightSectors => "EightSectors",
            MeasurementGroup::EtdrsSectors => "ETDRSSectors",
            MeasurementGroup::FullRetinal => "FullRetinalParameters",
        }
    }

    /// 宽表列名中的分组标记
    pub fn column_tag(&self) -> &'static str {
        match self {
            MeasurementGroup::TotalSector => "Total",
            MeasurementGroup::TwoSectors => "TwoSect",
            MeasurementGroup::EightSectors => "EightSect",
            MeasurementGroup::FullRetinal => "FullRetinal",
            other => other.xml_tag(),
        }
    }

    pub fn from_xml_tag(tag: &str) -> Option<Self> {
        [
            MeasurementGroup::FourSectors,
            MeasurementGroup::TwelveSectors,
            MeasurementGroup::RnflParameters,
            MeasurementGroup::OnhParameters,
            MeasurementGroup::TotalSector,
            MeasurementGroup::TwoSectors,
            MeasurementGroup::EightSectors,
            MeasurementGroup::EtdrsSectors,
            MeasurementGroup::FullRetinal,
        ]
        .into_iter()
        .find(|group| group.xml_tag() == tag)
    }
}

/// 视网膜分层
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layer {
    GclIpl,
    NflGclIpl,
    IlmRpe,
    IlmBm,
}

impl Layer {
    pub const GLAUCOMA: [Layer; 2] = [Layer::GclIpl, Layer::NflGclIpl];
    pub const MACULA: [Layer; 2] = [Layer::IlmRpe, Layer::IlmBm];

    pub fn tag(&self) -> &'static str {
        match self {
            Layer::GclIpl => "GCL_IPL",
            Layer::NflGclIpl => "NFL_GCL_IPL",
            Layer::IlmRpe => "ILM_RPE",
            Layer::IlmBm => "ILM_BM",
        }
    }

    /// 分层所属的字段族
    pub fn family(&self) -> Family {
        match self {
            Layer::GclIpl | Layer::NflGclIpl => Family::Glaucoma,
            Layer::IlmRpe | Layer::IlmBm => Family::Macula,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        [Layer::GclIpl, Layer::NflGclIpl, Layer::IlmRpe, Layer::IlmBm]
            .into_iter()
            .find(|layer| layer.tag() == tag)
    }
}

impl FromStr for Layer {
    type Err = DeidError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Layer::from_tag(&value.to_uppercase().replace('-', "_"))
            .ok_or_else(|| DeidError::Config(format!("未知的分层: {}", value)))
    }
}

/// Glaucoma3D 的测量指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Thickness,
    DifferenceSi,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Thickness, Metric::DifferenceSi];

    pub fn tag(&self) -> &'static str {
        match self {
            Metric::Thickness => "Thickness",
            Metric::DifferenceSi => "DifferenceSI",
        }
    }
}

/// 单个测量字段（不含眼别）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasurementField {
    pub group: MeasurementGroup,
    pub metric: Option<Metric>,
    pub layer: Option<Layer>,
    /// 扇区或参数名，TotalSector 的厚度值没有名字
    pub name: String,
}

impl MeasurementField {
    pub fn new(group: MeasurementGroup, name: impl Into<String>) -> Self {
        Self {
            group,
            metric: None,
            layer: None,
            name: name.into(),
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn modality(&self) -> Modality {
        self.group.modality()
    }

    /// 不含眼别前缀的列名
    pub fn column_suffix(&self) -> String {
        let mut parts = vec![self.group.column_tag()];
        if let Some(metric) = &self.metric {
            parts.push(metric.tag());
        }
        if let Some(layer) = &self.layer {
            parts.push(layer.tag());
        }
        if !self.name.is_empty() {
            parts.push(&self.name);
        }
        parts.join("_")
    }
}

/// 宽表中的一列：眼别 + 测量字段
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub laterality: Laterality,
    pub field: MeasurementField,
}

impl Column {
    pub fn new(laterality: Laterality, field: MeasurementField) -> Self {
        Self { laterality, field }
    }

    pub fn name(&self) -> String {
        format!("{}_{}", self.laterality.prefix(), self.field.column_suffix())
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// 列顺序: 模态 → 眼别（右眼在前）→ 字段
impl Ord for Column {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.field.modality(), self.laterality, &self.field).cmp(&(
            other.field.modality(),
            other.laterality,
            &other.field,
        ))
    }
}

impl PartialOrd for Column {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 测量字段族，筛选按族进行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Rnfl,
    Onh,
    Glaucoma,
    Macula,
}

impl Family {
    pub fn of(field: &MeasurementField) -> Family {
        match field.group {
            MeasurementGroup::FourSectors
            | MeasurementGroup::TwelveSectors
            | MeasurementGroup::RnflParameters => Family::Rnfl,
            MeasurementGroup::OnhParameters => Family::Onh,
            MeasurementGroup::TotalSector
            | MeasurementGroup::TwoSectors
            | MeasurementGroup::EightSectors => Family::Glaucoma,
            MeasurementGroup::EtdrsSectors | MeasurementGroup::FullRetinal => Family::Macula,
        }
    }
}

/// 可选择保留的具名测量组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamedGroup {
    RnflTsnitAverage,
    RnflFourSectors,
    RnflTwelveSectors,
    OnhParameters,
    GlaucomaTotal,
    GlaucomaTwoSectors,
    GlaucomaEightSectors,
    MaculaEtdrs,
    MaculaFullRetinal,
}

impl NamedGroup {
    pub const ALL: [NamedGroup; 9] = [
        NamedGroup::RnflTsnitAverage,
        NamedGroup::RnflFourSectors,
        NamedGroup::RnflTwelveSectors,
        NamedGroup::OnhParameters,
        NamedGroup::GlaucomaTotal,
        NamedGroup::GlaucomaTwoSectors,
        NamedGroup::GlaucomaEightSectors,
        NamedGroup::MaculaEtdrs,
        NamedGroup::MaculaFullRetinal,
    ];

    pub fn family(&self) -> Family {
        match self {
            NamedGroup::RnflTsnitAverage
            | NamedGroup::RnflFourSectors
            | NamedGroup::RnflTwelveSectors => Family::Rnfl,
            NamedGroup::OnhParameters => Family::Onh,
            NamedGroup::GlaucomaTotal
            | NamedGroup::GlaucomaTwoSectors
            | NamedGroup::GlaucomaEightSectors => Family::Glaucoma,
            NamedGroup::MaculaEtdrs | NamedGroup::MaculaFullRetinal => Family::Macula,
        }
    }

    /// 命令行和配置中使用的名字
    pub fn key(&self) -> &'static str {
        match self {
            NamedGroup::RnflTsnitAverage => "rnfl-tsnit-average",
            NamedGroup::RnflFourSectors => "rnfl-four-sectors",
            NamedGroup::RnflTwelveSectors => "rnfl-twelve-sectors",
            NamedGroup::OnhParameters => "onh-parameters",
            NamedGroup::GlaucomaTotal => "glaucoma-total",
            NamedGroup::GlaucomaTwoSectors => "glaucoma-two-sectors",
            NamedGroup::GlaucomaEightSectors => "glaucoma-eight-sectors",
            NamedGroup::MaculaEtdrs => "macula-etdrs",
            NamedGroup::MaculaFullRetinal => "macula-full-retinal",
        }
    }

    pub fn contains(&self, field: &MeasurementField) -> bool {
        match self {
            NamedGroup::RnflTsnitAverage => {
                field.group == MeasurementGroup::RnflParameters && field.name == "TSNITAverage"
            }
            NamedGroup::RnflFourSectors => field.group == MeasurementGroup::FourSectors,
            NamedGroup::RnflTwelveSectors => field.group == MeasurementGroup::TwelveSectors,
            NamedGroup::OnhParameters => field.group == MeasurementGroup::OnhParameters,
            NamedGroup::GlaucomaTotal => field.group == MeasurementGroup::TotalSector,
            NamedGroup::GlaucomaTwoSectors => field.group == MeasurementGroup::TwoSectors,
            NamedGroup::GlaucomaEightSectors => field.group == MeasurementGroup::EightSectors,
            NamedGroup::MaculaEtdrs => field.group == MeasurementGroup::EtdrsSectors,
            NamedGroup::MaculaFullRetinal => field.group == MeasurementGroup::FullRetinal,
        }
    }
}

impl FromStr for NamedGroup {
    type Err = DeidError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_lowercase().replace('_', "-");
        NamedGroup::ALL
            .into_iter()
            .find(|group| group.key() == value)
            .ok_or_else(|| DeidError::Config(format!("未知的测量组: {}", value)))
    }
}

impl fmt::Display for NamedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// 列筛选条件
///
/// 选中的组只影响其所属字段族：该族中不属于任何选中组的列被丢弃。
/// 分层独立生效：某字段族给出了分层时，该族其他分层的列被丢弃。
/// 未涉及的字段族保持不变。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub groups: Vec<NamedGroup>,
    pub layers: Vec<Layer>,
}

impl Selection {
    pub fn new(groups: Vec<NamedGroup>, layers: Vec<Layer>) -> Self {
        Self { groups, layers }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.layers.is_empty()
    }

    pub fn keeps(&self, field: &MeasurementField) -> bool {
        let family = Family::of(field);
        let selected: Vec<&NamedGroup> = self
            .groups
            .iter()
            .filter(|group| group.family() == family)
            .collect();
        if !selected.is_empty() && !selected.iter().any(|group| group.contains(field)) {
            return false;
        }
        let Some(layer) = field.layer else {
            return true;
        };
        let mut family_layers = self
            .layers
            .iter()
            .filter(|candidate| candidate.family() == family)
            .peekable();
        family_layers.peek().is_none() || family_layers.any(|candidate| *candidate == layer)
    }
}
