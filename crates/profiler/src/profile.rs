//! Data profiler.
//!
//! Inspects a dataset of records and produces a [`DataProfile`]: structural,
//! type, size, query-pattern, relationship, temporal, and cardinality
//! analysis, finished with a scored engine recommendation. Datasets larger
//! than the sample size are profiled over a uniform random sample.

use polystore_core::{EngineKind, Object, Value};
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Field-name tokens that mark id-like fields.
const ID_TOKENS: [&str; 4] = ["id", "_id", "ref", "key"];
/// Field-name tokens that mark temporal fields.
const TEMPORAL_TOKENS: [&str; 4] = ["time", "date", "created", "updated"];
/// Strings longer than this count as text rather than equality candidates.
const TEXT_LENGTH_THRESHOLD: usize = 50;

/// Field presence and nesting shape of the dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureAnalysis {
    /// How many records carry each field.
    pub field_presence: BTreeMap<String, usize>,
    /// Presence fraction per field.
    pub field_coverage: BTreeMap<String, f64>,
    /// Fields whose values are nested maps.
    pub nested_fields: Vec<String>,
    /// Fields whose values are ordered sequences.
    pub array_fields: Vec<String>,
    /// Mean field count per record.
    pub avg_fields_per_item: f64,
    /// Mean presence fraction across the union of fields.
    pub schema_consistency: f64,
}

/// Per-field value type distribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeAnalysis {
    /// field → type name → occurrence count.
    pub type_distribution: BTreeMap<String, BTreeMap<String, usize>>,
    /// Fields with at least one numeric value.
    pub numeric_fields: Vec<String>,
    /// Fields with at least one string value.
    pub string_fields: Vec<String>,
    /// Fields with at least one boolean value.
    pub boolean_fields: Vec<String>,
    /// Fields observed with more than one value type.
    pub mixed_type_fields: Vec<String>,
}

/// Serialized-size statistics for one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSizeStats {
    /// Mean encoded size in bytes.
    pub avg: f64,
    /// Largest encoded size.
    pub max: usize,
    /// Smallest encoded size.
    pub min: usize,
}

/// Item and per-field serialized length statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeAnalysis {
    /// Mean encoded record size in bytes.
    pub avg_item_size: f64,
    /// Largest encoded record.
    pub max_item_size: usize,
    /// Smallest encoded record.
    pub min_item_size: usize,
    /// Sample variance of record sizes.
    pub size_variance: f64,
    /// Per-field size statistics.
    pub field_sizes: BTreeMap<String, FieldSizeStats>,
}

/// Complexity bucket derived from field counts and nesting density.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    /// Few flat fields.
    #[default]
    Simple,
    /// More than five fields on average.
    Moderate,
    /// More than ten fields on average, or nesting in most records.
    Complex,
}

/// Which query styles the data invites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPatternAnalysis {
    /// Short strings, booleans, and other equality-friendly fields.
    pub equality_fields: Vec<String>,
    /// Numeric fields suited to range predicates.
    pub range_fields: Vec<String>,
    /// Long-text fields.
    pub text_fields: Vec<String>,
    /// Overall complexity bucket.
    pub complexity: QueryComplexity,
}

/// Foreign-key and id-field heuristics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipAnalysis {
    /// Fields whose names contain id-like tokens.
    pub id_fields: Vec<String>,
    /// Fields whose short string values look like references.
    pub potential_foreign_keys: Vec<String>,
    /// `|id fields| / |records|`.
    pub relationship_score: f64,
}

/// Timestamp and date-like fields by name token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalAnalysis {
    /// Temporally named fields with numeric values.
    pub timestamp_fields: Vec<String>,
    /// Temporally named fields with string values.
    pub date_fields: Vec<String>,
    /// Whether any temporal field was found.
    pub has_temporal_data: bool,
}

/// Unique-value fraction per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardinalityAnalysis {
    /// field → unique fraction in [0, 1].
    pub field_cardinality: BTreeMap<String, f64>,
    /// Fields with fraction > 0.8.
    pub high_cardinality_fields: Vec<String>,
    /// Fields with fraction < 0.1.
    pub low_cardinality_fields: Vec<String>,
}

/// Full analytical summary of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataProfile {
    /// Number of profiled records (after sampling).
    pub total_items: usize,
    /// Structure group.
    pub structure: StructureAnalysis,
    /// Type group.
    pub types: TypeAnalysis,
    /// Size group.
    pub sizes: SizeAnalysis,
    /// Query-pattern hints.
    pub query_patterns: QueryPatternAnalysis,
    /// Relationship heuristics.
    pub relationships: RelationshipAnalysis,
    /// Temporal heuristics.
    pub temporal: TemporalAnalysis,
    /// Cardinality group.
    pub cardinality: CardinalityAnalysis,
    /// Top two positively scored engines, best first.
    pub recommendations: Vec<EngineKind>,
}

/// Dataset introspection pipeline.
#[derive(Debug, Clone)]
pub struct DataProfiler {
    sample_size: usize,
}

impl Default for DataProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProfiler {
    /// Profiler with the default sample size of 1000 records.
    pub fn new() -> Self {
        DataProfiler { sample_size: 1000 }
    }

    /// Profiler with an explicit sample size.
    pub fn with_sample_size(sample_size: usize) -> Self {
        DataProfiler {
            sample_size: sample_size.max(1),
        }
    }

    /// Profile a dataset. Records are expected to be objects; anything else
    /// contributes an empty record.
    pub fn profile(&self, data: &[Value]) -> DataProfile {
        if data.is_empty() {
            return DataProfile {
                recommendations: vec![EngineKind::Kv],
                ..DataProfile::default()
            };
        }

        let sampled: Vec<&Value> = if data.len() > self.sample_size {
            let mut rng = rand::thread_rng();
            sample(&mut rng, data.len(), self.sample_size)
                .into_iter()
                .map(|i| &data[i])
                .collect()
        } else {
            data.iter().collect()
        };

        let empty = Object::new();
        let records: Vec<&Object> = sampled
            .iter()
            .map(|item| item.as_object().unwrap_or(&empty))
            .collect();

        let mut profile = DataProfile {
            total_items: records.len(),
            structure: analyze_structure(&records),
            types: analyze_types(&records),
            sizes: analyze_sizes(&sampled, &records),
            query_patterns: analyze_query_patterns(&records),
            relationships: analyze_relationships(&records),
            temporal: analyze_temporal(&records),
            cardinality: analyze_cardinality(&records),
            recommendations: Vec::new(),
        };
        profile.recommendations = recommend(&profile);
        profile
    }
}

fn sorted(set: BTreeSet<String>) -> Vec<String> {
    set.into_iter().collect()
}

fn analyze_structure(records: &[&Object]) -> StructureAnalysis {
    let mut field_presence: BTreeMap<String, usize> = BTreeMap::new();
    let mut nested = BTreeSet::new();
    let mut arrays = BTreeSet::new();
    let mut total_fields = 0usize;

    for record in records {
        total_fields += record.len();
        for (field, value) in *record {
            *field_presence.entry(field.clone()).or_default() += 1;
            match value {
                Value::Object(_) => {
                    nested.insert(field.clone());
                }
                Value::Array(_) => {
                    arrays.insert(field.clone());
                }
                _ => {}
            }
        }
    }

    let n = records.len() as f64;
    let field_coverage: BTreeMap<String, f64> = field_presence
        .iter()
        .map(|(field, count)| (field.clone(), *count as f64 / n))
        .collect();
    let schema_consistency = if field_coverage.is_empty() {
        0.0
    } else {
        field_coverage.values().sum::<f64>() / field_coverage.len() as f64
    };

    StructureAnalysis {
        field_presence,
        field_coverage,
        nested_fields: sorted(nested),
        array_fields: sorted(arrays),
        avg_fields_per_item: total_fields as f64 / n,
        schema_consistency,
    }
}

fn analyze_types(records: &[&Object]) -> TypeAnalysis {
    let mut distribution: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    let mut numeric = BTreeSet::new();
    let mut strings = BTreeSet::new();
    let mut booleans = BTreeSet::new();

    for record in records {
        for (field, value) in *record {
            *distribution
                .entry(field.clone())
                .or_default()
                .entry(value.type_name().to_string())
                .or_default() += 1;

            match value {
                Value::Int(_) | Value::Float(_) => {
                    numeric.insert(field.clone());
                }
                Value::String(_) => {
                    strings.insert(field.clone());
                }
                Value::Bool(_) => {
                    booleans.insert(field.clone());
                }
                _ => {}
            }
        }
    }

    let mixed = distribution
        .iter()
        .filter(|(_, types)| types.len() > 1)
        .map(|(field, _)| field.clone())
        .collect();

    TypeAnalysis {
        type_distribution: distribution,
        numeric_fields: sorted(numeric),
        string_fields: sorted(strings),
        boolean_fields: sorted(booleans),
        mixed_type_fields: mixed,
    }
}

fn analyze_sizes(items: &[&Value], records: &[&Object]) -> SizeAnalysis {
    let item_sizes: Vec<usize> = items.iter().map(|item| item.json_size()).collect();
    let n = item_sizes.len() as f64;
    let avg = item_sizes.iter().sum::<usize>() as f64 / n;
    let variance = if item_sizes.len() > 1 {
        item_sizes
            .iter()
            .map(|&s| (s as f64 - avg).powi(2))
            .sum::<f64>()
            / (n - 1.0)
    } else {
        0.0
    };

    let mut field_size_samples: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for record in records {
        for (field, value) in *record {
            field_size_samples
                .entry(field.clone())
                .or_default()
                .push(value.json_size());
        }
    }
    let field_sizes = field_size_samples
        .into_iter()
        .map(|(field, sizes)| {
            let stats = FieldSizeStats {
                avg: sizes.iter().sum::<usize>() as f64 / sizes.len() as f64,
                max: sizes.iter().copied().max().unwrap_or(0),
                min: sizes.iter().copied().min().unwrap_or(0),
            };
            (field, stats)
        })
        .collect();

    SizeAnalysis {
        avg_item_size: avg,
        max_item_size: item_sizes.iter().copied().max().unwrap_or(0),
        min_item_size: item_sizes.iter().copied().min().unwrap_or(0),
        size_variance: variance,
        field_sizes,
    }
}

fn analyze_query_patterns(records: &[&Object]) -> QueryPatternAnalysis {
    let mut equality = BTreeSet::new();
    let mut range = BTreeSet::new();
    let mut text = BTreeSet::new();
    let mut nested_count = 0usize;
    let mut total_fields = 0usize;

    for record in records {
        total_fields += record.len();
        for (field, value) in *record {
            match value {
                Value::Int(_) | Value::Float(_) => {
                    range.insert(field.clone());
                }
                Value::String(s) if s.len() > TEXT_LENGTH_THRESHOLD => {
                    text.insert(field.clone());
                }
                Value::Object(_) => {
                    nested_count += 1;
                    equality.insert(field.clone());
                }
                _ => {
                    equality.insert(field.clone());
                }
            }
        }
    }

    let n = records.len();
    let avg_fields = total_fields as f64 / n as f64;
    let complexity = if avg_fields > 10.0 || nested_count * 2 > n {
        QueryComplexity::Complex
    } else if avg_fields > 5.0 {
        QueryComplexity::Moderate
    } else {
        QueryComplexity::Simple
    };

    QueryPatternAnalysis {
        equality_fields: sorted(equality),
        range_fields: sorted(range),
        text_fields: sorted(text),
        complexity,
    }
}

fn analyze_relationships(records: &[&Object]) -> RelationshipAnalysis {
    let mut id_fields = BTreeSet::new();
    let mut foreign_keys = BTreeSet::new();

    for record in records {
        for (field, value) in *record {
            let lowered = field.to_lowercase();
            if ID_TOKENS.iter().any(|token| lowered.contains(token)) {
                id_fields.insert(field.clone());
            }
            if let Value::String(s) = value {
                if s.len() < TEXT_LENGTH_THRESHOLD {
                    let lowered = s.to_lowercase();
                    if ["id", "ref", "key"].iter().any(|token| lowered.contains(token)) {
                        foreign_keys.insert(field.clone());
                    }
                }
            }
        }
    }

    let relationship_score = id_fields.len() as f64 / records.len().max(1) as f64;
    RelationshipAnalysis {
        id_fields: sorted(id_fields),
        potential_foreign_keys: sorted(foreign_keys),
        relationship_score,
    }
}

fn analyze_temporal(records: &[&Object]) -> TemporalAnalysis {
    let mut timestamps = BTreeSet::new();
    let mut dates = BTreeSet::new();

    for record in records {
        for (field, value) in *record {
            let lowered = field.to_lowercase();
            if !TEMPORAL_TOKENS.iter().any(|token| lowered.contains(token)) {
                continue;
            }
            match value {
                Value::Int(_) | Value::Float(_) => {
                    timestamps.insert(field.clone());
                }
                Value::String(_) => {
                    dates.insert(field.clone());
                }
                _ => {}
            }
        }
    }

    let has_temporal_data = !timestamps.is_empty() || !dates.is_empty();
    TemporalAnalysis {
        timestamp_fields: sorted(timestamps),
        date_fields: sorted(dates),
        has_temporal_data,
    }
}

fn analyze_cardinality(records: &[&Object]) -> CardinalityAnalysis {
    let mut all_fields = BTreeSet::new();
    for record in records {
        all_fields.extend(record.keys().cloned());
    }

    let mut field_cardinality = BTreeMap::new();
    for field in all_fields {
        let values: Vec<String> = records
            .iter()
            .filter_map(|record| record.get(&field))
            .map(|value| value.index_key())
            .collect();
        if values.is_empty() {
            field_cardinality.insert(field, 0.0);
            continue;
        }
        let unique: BTreeSet<&String> = values.iter().collect();
        field_cardinality.insert(field, unique.len() as f64 / values.len() as f64);
    }

    let high = field_cardinality
        .iter()
        .filter(|(_, &fraction)| fraction > 0.8)
        .map(|(field, _)| field.clone())
        .collect();
    let low = field_cardinality
        .iter()
        .filter(|(_, &fraction)| fraction < 0.1)
        .map(|(field, _)| field.clone())
        .collect();

    CardinalityAnalysis {
        field_cardinality,
        high_cardinality_fields: high,
        low_cardinality_fields: low,
    }
}

/// Integer-point scoring; the top two positive engines win, with `document`
/// as the fallback.
fn recommend(profile: &DataProfile) -> Vec<EngineKind> {
    let mut scores: BTreeMap<EngineKind, i64> =
        EngineKind::ALL.iter().map(|&kind| (kind, 0)).collect();

    if profile.total_items < 1000 {
        *scores.entry(EngineKind::Kv).or_default() += 3;
    }
    if profile.sizes.avg_item_size < 1024.0 {
        *scores.entry(EngineKind::Kv).or_default() += 2;
    }
    if profile.structure.nested_fields.is_empty() {
        *scores.entry(EngineKind::Kv).or_default() += 2;
    }

    if !profile.structure.nested_fields.is_empty() {
        *scores.entry(EngineKind::Document).or_default() += 3;
    }
    if !profile.structure.array_fields.is_empty() {
        *scores.entry(EngineKind::Document).or_default() += 2;
    }
    if !profile.types.mixed_type_fields.is_empty() {
        *scores.entry(EngineKind::Document).or_default() += 2;
    }
    if profile.query_patterns.complexity == QueryComplexity::Complex {
        *scores.entry(EngineKind::Document).or_default() += 2;
    }
    // General-purpose base point.
    *scores.entry(EngineKind::Document).or_default() += 1;

    if !profile.types.numeric_fields.is_empty() {
        *scores.entry(EngineKind::Column).or_default() += 2;
    }
    if !profile.query_patterns.range_fields.is_empty() {
        *scores.entry(EngineKind::Column).or_default() += 3;
    }
    if !profile.cardinality.low_cardinality_fields.is_empty() {
        *scores.entry(EngineKind::Column).or_default() += 2;
    }
    if profile.structure.schema_consistency > 0.8 {
        *scores.entry(EngineKind::Column).or_default() += 2;
    }

    if !profile.relationships.id_fields.is_empty() {
        *scores.entry(EngineKind::Graph).or_default() += 2;
    }
    if !profile.relationships.potential_foreign_keys.is_empty() {
        *scores.entry(EngineKind::Graph).or_default() += 3;
    }
    if profile.relationships.relationship_score > 0.3 {
        *scores.entry(EngineKind::Graph).or_default() += 2;
    }

    if profile.temporal.has_temporal_data {
        *scores.entry(EngineKind::TimeSeries).or_default() += 4;
    }
    if !profile.temporal.timestamp_fields.is_empty() {
        *scores.entry(EngineKind::TimeSeries).or_default() += 3;
    }
    if !profile.types.numeric_fields.is_empty() {
        *scores.entry(EngineKind::TimeSeries).or_default() += 1;
    }

    let mut ranked: Vec<(EngineKind, i64)> = EngineKind::ALL
        .iter()
        .map(|&kind| (kind, scores[&kind]))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let recommendations: Vec<EngineKind> = ranked
        .into_iter()
        .take(2)
        .filter(|(_, score)| *score > 0)
        .map(|(kind, _)| kind)
        .collect();

    if recommendations.is_empty() {
        vec![EngineKind::Document]
    } else {
        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::object;

    fn record(pairs: Vec<(&str, Value)>) -> Value {
        Value::Object(object(pairs))
    }

    #[test]
    fn empty_dataset_recommends_kv() {
        let profile = DataProfiler::new().profile(&[]);
        assert_eq!(profile.total_items, 0);
        assert_eq!(profile.recommendations, vec![EngineKind::Kv]);
    }

    #[test]
    fn temporal_dataset_recommends_timeseries() {
        let data: Vec<Value> = (0..20)
            .map(|i| {
                record(vec![
                    ("timestamp", Value::Int(1_700_000_000 + i * 60)),
                    ("value", Value::Float(0.5 + i as f64)),
                ])
            })
            .collect();

        let profile = DataProfiler::new().profile(&data);
        assert!(profile.temporal.has_temporal_data);
        assert!(profile
            .recommendations
            .contains(&EngineKind::TimeSeries));
    }

    #[test]
    fn id_heavy_dataset_scores_relationships() {
        let data: Vec<Value> = (0..5)
            .map(|i| {
                record(vec![
                    ("user_id", Value::Int(i)),
                    ("order_ref", Value::from(format!("ref-{}", i))),
                ])
            })
            .collect();

        let profile = DataProfiler::new().profile(&data);
        assert!(profile.relationships.relationship_score > 0.0);
        assert_eq!(profile.relationships.id_fields.len(), 2);
        assert!(!profile.relationships.potential_foreign_keys.is_empty());
    }

    #[test]
    fn nested_dataset_recommends_document() {
        let data: Vec<Value> = (0..10)
            .map(|i| {
                record(vec![
                    ("name", Value::from(format!("u{}", i))),
                    (
                        "profile",
                        Value::Object(object([("bio", Value::from("text"))])),
                    ),
                    ("labels", Value::Array(vec![Value::from("a")])),
                ])
            })
            .collect();

        let profile = DataProfiler::new().profile(&data);
        assert_eq!(profile.recommendations[0], EngineKind::Document);
        assert_eq!(profile.structure.nested_fields, vec!["profile"]);
        assert_eq!(profile.structure.array_fields, vec!["labels"]);
    }

    #[test]
    fn schema_consistency_is_mean_presence() {
        let data = vec![
            record(vec![("a", Value::Int(1)), ("b", Value::Int(2))]),
            record(vec![("a", Value::Int(3))]),
        ];
        let profile = DataProfiler::new().profile(&data);
        // a is present in 2/2, b in 1/2.
        assert!((profile.structure.schema_consistency - 0.75).abs() < 1e-9);
    }

    #[test]
    fn mixed_types_are_detected() {
        let data = vec![
            record(vec![("v", Value::Int(1))]),
            record(vec![("v", Value::from("one"))]),
        ];
        let profile = DataProfiler::new().profile(&data);
        assert_eq!(profile.types.mixed_type_fields, vec!["v"]);
    }

    #[test]
    fn cardinality_buckets() {
        let mut data: Vec<Value> = (0..20)
            .map(|i| {
                record(vec![
                    ("unique", Value::Int(i)),
                    ("constant", Value::from("same")),
                ])
            })
            .collect();
        data.push(record(vec![
            ("unique", Value::Int(999)),
            ("constant", Value::from("same")),
        ]));

        let profile = DataProfiler::new().profile(&data);
        assert!(profile
            .cardinality
            .high_cardinality_fields
            .contains(&"unique".to_string()));
        assert!(profile
            .cardinality
            .low_cardinality_fields
            .contains(&"constant".to_string()));
    }

    #[test]
    fn sampling_caps_profiled_records() {
        let data: Vec<Value> = (0..500)
            .map(|i| record(vec![("n", Value::Int(i))]))
            .collect();
        let profile = DataProfiler::with_sample_size(100).profile(&data);
        assert_eq!(profile.total_items, 100);
    }

    #[test]
    fn complexity_buckets() {
        let flat = vec![record(vec![("a", Value::Int(1))])];
        assert_eq!(
            DataProfiler::new().profile(&flat).query_patterns.complexity,
            QueryComplexity::Simple
        );

        let wide: Vec<Value> = (0..3)
            .map(|_| {
                Value::Object(object(
                    (0..7).map(|i| (format!("f{}", i), Value::Int(i))),
                ))
            })
            .collect();
        assert_eq!(
            DataProfiler::new().profile(&wide).query_patterns.complexity,
            QueryComplexity::Moderate
        );
    }
}
