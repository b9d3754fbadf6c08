//! Column catalog handling: which upstream columns hold the channels of a
//! measurement, and how compensated columns are named.

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CompensationError, CompensationResult};

// ---------------------------------------------------------------------------
// ColumnDescriptor – one entry of the upstream column catalog
// ---------------------------------------------------------------------------

/// Storage type of a measurement column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Float,
    Integer,
    Text,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Float | ColumnType::Integer)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Float => write!(f, "float"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Text => write!(f, "text"),
        }
    }
}

/// `(object, column, type)` triple describing one available column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub object_name: String,
    pub column_name: String,
    pub data_type: ColumnType,
}

impl ColumnDescriptor {
    pub fn new(object_name: &str, column_name: &str, data_type: ColumnType) -> Self {
        Self {
            object_name: object_name.to_string(),
            column_name: column_name.to_string(),
            data_type,
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelColumnSet – ordered per-channel columns of one measurement
// ---------------------------------------------------------------------------

/// Columns `<base>_c1 .. <base>_cN` of one object, in channel order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelColumnSet {
    pub object_name: String,
    pub base_measurement: String,
    columns: Vec<ColumnDescriptor>,
}

impl ChannelColumnSet {
    /// Number of channels.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.column_name.as_str())
    }
}

/// Find the channel columns of `base_measurement` on `object_name`.
///
/// A column belongs to the measurement when it is named
/// `<base_measurement>_c<k>` with a positive integer `k`. The result is
/// sorted by `k` and must cover `1..=N` without gaps or repeats.
pub fn resolve_channels(
    all_columns: &[ColumnDescriptor],
    object_name: &str,
    base_measurement: &str,
) -> CompensationResult<ChannelColumnSet> {
    let prefix = format!("{base_measurement}_c");

    let mut indexed: Vec<(usize, &ColumnDescriptor)> = Vec::new();
    for col in all_columns.iter().filter(|c| c.object_name == object_name) {
        let Some(rest) = col.column_name.strip_prefix(&prefix) else {
            continue;
        };
        match parse_channel_index(rest) {
            Some(channel) => indexed.push((channel, col)),
            None => debug!(
                "{object_name}.{}: not a channel column of {base_measurement}",
                col.column_name
            ),
        }
    }

    if !indexed.windows(2).all(|w| w[0].0 < w[1].0) {
        warn!("channel columns of {object_name}.{base_measurement} are not listed in channel order; sorting");
    }
    indexed.sort_by_key(|(channel, _)| *channel);

    for (position, (channel, col)) in indexed.iter().enumerate() {
        let expected = position + 1;
        if *channel < expected {
            return Err(CompensationError::DuplicateChannel {
                measurement: base_measurement.to_string(),
                channel: *channel,
            });
        }
        if *channel > expected {
            return Err(CompensationError::ChannelGap {
                measurement: base_measurement.to_string(),
                missing: expected,
                highest: indexed.last().map_or(0, |(c, _)| *c),
            });
        }
        if !col.data_type.is_numeric() {
            return Err(CompensationError::NonNumericColumn {
                object: object_name.to_string(),
                column: col.column_name.clone(),
            });
        }
    }

    Ok(ChannelColumnSet {
        object_name: object_name.to_string(),
        base_measurement: base_measurement.to_string(),
        columns: indexed.into_iter().map(|(_, c)| c.clone()).collect(),
    })
}

/// `"3"` -> 3; channels are 1-based.
fn parse_channel_index(rest: &str) -> Option<usize> {
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse::<usize>().ok().filter(|&k| k > 0)
}

/// Splice `suffix` onto the first `_`-separated segment of a column name.
///
/// `MeanIntensity_c3` + `Corrected` gives `MeanIntensityCorrected_c3`.
pub fn derive_output_name(column_name: &str, suffix: &str) -> String {
    match column_name.split_once('_') {
        Some((root, rest)) => format!("{root}{suffix}_{rest}"),
        None => format!("{column_name}{suffix}"),
    }
}

/// Descriptors of the `channels` compensated columns written for a
/// measurement.
pub fn output_columns(
    object_name: &str,
    base_measurement: &str,
    suffix: &str,
    channels: usize,
) -> Vec<ColumnDescriptor> {
    (1..=channels)
        .map(|channel| {
            let input = format!("{base_measurement}_c{channel}");
            ColumnDescriptor::new(object_name, &derive_output_name(&input, suffix), ColumnType::Float)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float(object: &str, column: &str) -> ColumnDescriptor {
        ColumnDescriptor::new(object, column, ColumnType::Float)
    }

    #[test]
    fn derive_output_name_splices_root() {
        assert_eq!(derive_output_name("Foo_c3", "Bar"), "FooBar_c3");
        assert_eq!(derive_output_name("MeanIntensity_c3", "Corrected"), "MeanIntensityCorrected_c3");
        assert_eq!(
            derive_output_name("Intensity_MeanIntensity_FullStack_c1", "Comp"),
            "IntensityComp_MeanIntensity_FullStack_c1"
        );
        assert_eq!(derive_output_name("Plain", "X"), "PlainX");
    }

    #[test]
    fn resolves_only_matching_object_and_prefix() {
        let catalog = vec![
            float("cell", "m_c1"),
            float("nuclei", "m_c1"),
            float("cell", "other_c1"),
            float("cell", "m_c2"),
            float("cell", "ObjectNumber"),
        ];
        let set = resolve_channels(&catalog, "cell", "m").unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.column_names().collect::<Vec<_>>(), vec!["m_c1", "m_c2"]);
        assert_eq!(set.object_name, "cell");
    }

    #[test]
    fn sorts_by_channel_index_not_catalog_order() {
        let catalog = vec![
            float("cell", "m_c10"),
            float("cell", "m_c2"),
            float("cell", "m_c1"),
            float("cell", "m_c3"),
            float("cell", "m_c4"),
            float("cell", "m_c5"),
            float("cell", "m_c6"),
            float("cell", "m_c7"),
            float("cell", "m_c8"),
            float("cell", "m_c9"),
        ];
        let set = resolve_channels(&catalog, "cell", "m").unwrap();
        let names: Vec<_> = set.column_names().collect();
        assert_eq!(names.first(), Some(&"m_c1"));
        assert_eq!(names.last(), Some(&"m_c10"));
        assert_eq!(names[1], "m_c2");
    }

    #[test]
    fn skips_columns_that_only_share_the_prefix() {
        let catalog = vec![
            float("cell", "m_c1"),
            float("cell", "m_cells"),
            float("cell", "m_c1_extra"),
            float("cell", "m_c0"),
        ];
        let set = resolve_channels(&catalog, "cell", "m").unwrap();
        assert_eq!(set.column_names().collect::<Vec<_>>(), vec!["m_c1"]);
    }

    #[test]
    fn gap_is_an_error() {
        let catalog = vec![float("cell", "m_c1"), float("cell", "m_c3")];
        let err = resolve_channels(&catalog, "cell", "m").unwrap_err();
        assert!(matches!(
            err,
            CompensationError::ChannelGap { missing: 2, highest: 3, .. }
        ));
    }

    #[test]
    fn duplicate_is_an_error() {
        let catalog = vec![float("cell", "m_c1"), float("cell", "m_c01"), float("cell", "m_c2")];
        let err = resolve_channels(&catalog, "cell", "m").unwrap_err();
        assert!(matches!(err, CompensationError::DuplicateChannel { channel: 1, .. }));
    }

    #[test]
    fn text_channel_column_is_an_error() {
        let catalog = vec![
            float("cell", "m_c1"),
            ColumnDescriptor::new("cell", "m_c2", ColumnType::Text),
        ];
        let err = resolve_channels(&catalog, "cell", "m").unwrap_err();
        assert!(matches!(err, CompensationError::NonNumericColumn { ref column, .. } if column == "m_c2"));
    }

    #[test]
    fn nothing_found_is_empty() {
        let set = resolve_channels(&[float("cell", "x_c1")], "cell", "m").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn output_columns_are_float_and_named() {
        let cols = output_columns("Obj", "m", "Corrected", 2);
        assert_eq!(
            cols,
            vec![
                ColumnDescriptor::new("Obj", "mCorrected_c1", ColumnType::Float),
                ColumnDescriptor::new("Obj", "mCorrected_c2", ColumnType::Float),
            ]
        );
    }
}
