//! Class splits and attribute descriptors, loaded once per run.

use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::class_set::ClassSet;
use super::error::{Result, ZslError};
use crate::tensor::row_argmax;

/// On-disk layout of `data_info.json`. Every field is required.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticDataFile {
    pub img_path: String,
    pub seen_class: Vec<usize>,
    pub unseen_class: Vec<usize>,
    pub all_att: Vec<Vec<f32>>,
}

/// Dense `(num_classes, attribute_dim)` matrix, one descriptor row per class.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeTable {
    rows: Array2<f32>,
}

impl AttributeTable {
    pub fn new(rows: Array2<f32>) -> Self {
        Self { rows }
    }

    /// Build from nested rows, requiring a rectangular, non-empty table.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || dim == 0 {
            return Err(ZslError::SemanticData(
                "attribute table must have at least one non-empty row".to_string(),
            ));
        }
        if let Some((class, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(ZslError::SemanticData(format!(
                "attribute row for class {} has {} values, expected {}",
                class,
                row.len(),
                dim
            )));
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let rows = Array2::from_shape_vec((rows.len(), dim), flat)
            .map_err(|e| ZslError::SemanticData(e.to_string()))?;
        Ok(Self { rows })
    }

    pub fn num_classes(&self) -> usize {
        self.rows.nrows()
    }

    pub fn dim(&self) -> usize {
        self.rows.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.rows.view()
    }

    /// Gather the descriptor row of every target, in target order.
    pub fn rows_for(&self, targets: &[usize]) -> Result<Array2<f32>> {
        let num_classes = self.num_classes();
        if let Some(&class) = targets.iter().find(|&&t| t >= num_classes) {
            return Err(ZslError::InvalidClass { class, num_classes });
        }
        Ok(self.rows.select(Axis(0), targets))
    }

    /// Assign each query row to the class in `classes` whose descriptor has
    /// the highest cosine similarity.
    pub fn rank_by_cosine(&self, queries: ArrayView2<'_, f32>, classes: &ClassSet) -> Result<Vec<usize>> {
        if queries.ncols() != self.dim() {
            return Err(ZslError::shape(
                "semantic queries",
                (queries.nrows(), self.dim()),
                queries.dim(),
            ));
        }
        let candidates = l2_normalize(self.rows_for(classes.ids())?.view());
        let queries = l2_normalize(queries);
        let similarity = queries.dot(&candidates.t());
        Ok(row_argmax(similarity.view())
            .into_iter()
            .map(|i| classes.ids()[i])
            .collect())
    }
}

fn l2_normalize(rows: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = rows.to_owned();
    for mut row in out.rows_mut() {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    out
}

/// Typed, immutable semantic data for one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticData {
    pub img_path: PathBuf,
    pub seen_classes: ClassSet,
    pub unseen_classes: ClassSet,
    pub all_classes: ClassSet,
    pub attributes: AttributeTable,
}

impl SemanticData {
    /// Validate class splits against the attribute table.
    pub fn new(
        img_path: PathBuf,
        seen_classes: ClassSet,
        unseen_classes: ClassSet,
        attributes: AttributeTable,
    ) -> Result<Self> {
        let num_classes = attributes.num_classes();
        if !seen_classes.is_disjoint(&unseen_classes) {
            return Err(ZslError::SemanticData(
                "seen and unseen classes overlap".to_string(),
            ));
        }
        for set in [&seen_classes, &unseen_classes] {
            if set.id_bound() > num_classes {
                return Err(ZslError::InvalidClass {
                    class: set.id_bound() - 1,
                    num_classes,
                });
            }
        }
        Ok(Self {
            img_path,
            seen_classes,
            unseen_classes,
            all_classes: ClassSet::range(num_classes),
            attributes,
        })
    }

    pub fn from_file(file: SemanticDataFile) -> Result<Self> {
        let attributes = AttributeTable::from_rows(&file.all_att)?;
        let num_classes = attributes.num_classes();
        Self::new(
            PathBuf::from(file.img_path),
            ClassSet::bounded(file.seen_class, num_classes)?,
            ClassSet::bounded(file.unseen_class, num_classes)?,
            attributes,
        )
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: SemanticDataFile =
            serde_json::from_str(raw).map_err(|e| ZslError::SemanticData(e.to_string()))?;
        Self::from_file(file)
    }

    /// Load `data_info.json`. Any failure here is fatal for the run.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ZslError::SemanticData(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn num_classes(&self) -> usize {
        self.attributes.num_classes()
    }

    pub fn attribute_dim(&self) -> usize {
        self.attributes.dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const SAMPLE: &str = r#"{
        "img_path": "/data/cub/images",
        "seen_class": [0, 2],
        "unseen_class": [1],
        "all_att": [[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]
    }"#;

    #[test]
    fn parses_valid_file() {
        let data = SemanticData::from_json_str(SAMPLE).expect("valid semantic data");
        assert_eq!(data.num_classes(), 3);
        assert_eq!(data.attribute_dim(), 2);
        assert_eq!(data.seen_classes.ids(), &[0, 2]);
        assert_eq!(data.unseen_classes.ids(), &[1]);
        assert_eq!(data.all_classes.ids(), &[0, 1, 2]);
        assert_eq!(data.img_path, PathBuf::from("/data/cub/images"));
    }

    #[test]
    fn missing_field_is_fatal() {
        let raw = r#"{"img_path": "x", "seen_class": [0], "all_att": [[1.0]]}"#;
        let err = SemanticData::from_json_str(raw).unwrap_err();
        assert!(matches!(err, ZslError::SemanticData(_)));
        assert!(err.to_string().contains("unseen_class"));
    }

    #[test]
    fn overlapping_splits_rejected() {
        let raw = r#"{"img_path": "x", "seen_class": [0, 1], "unseen_class": [1],
                      "all_att": [[1.0], [2.0]]}"#;
        let err = SemanticData::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn out_of_range_class_rejected() {
        let raw = r#"{"img_path": "x", "seen_class": [0], "unseen_class": [5],
                      "all_att": [[1.0], [2.0]]}"#;
        let err = SemanticData::from_json_str(raw).unwrap_err();
        assert!(matches!(err, ZslError::InvalidClass { class: 5, num_classes: 2 }));
    }

    #[test]
    fn huge_class_id_is_an_error() {
        let raw = r#"{"img_path": "x", "seen_class": [0], "unseen_class": [18446744073709551615],
                      "all_att": [[1.0], [2.0]]}"#;
        let err = SemanticData::from_json_str(raw).unwrap_err();
        assert!(matches!(
            err,
            ZslError::InvalidClass {
                class: usize::MAX,
                num_classes: 2
            }
        ));

        let raw = r#"{"img_path": "x", "seen_class": [4000000000], "unseen_class": [1],
                      "all_att": [[1.0], [2.0]]}"#;
        assert!(matches!(
            SemanticData::from_json_str(raw),
            Err(ZslError::InvalidClass { class: 4_000_000_000, .. })
        ));
    }

    #[test]
    fn ragged_attribute_rows_rejected() {
        let err = AttributeTable::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(err.to_string().contains("class 1"));
    }

    #[test]
    fn rows_for_targets_follow_target_order() {
        let data = SemanticData::from_json_str(SAMPLE).expect("data");
        let rows = data.attributes.rows_for(&[2, 0, 2]).expect("rows");
        assert_eq!(rows, array![[1.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);
        assert!(data.attributes.rows_for(&[3]).is_err());
    }

    #[test]
    fn cosine_rank_picks_closest_candidate() {
        let data = SemanticData::from_json_str(SAMPLE).expect("data");
        let queries = array![[0.1, 2.0], [3.0, 0.2]];
        let candidates = ClassSet::new(vec![1, 0]).expect("candidates");
        let ranked = data
            .attributes
            .rank_by_cosine(queries.view(), &candidates)
            .expect("rank");
        assert_eq!(ranked, vec![1, 0]);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data_info.json");
        std::fs::write(&path, SAMPLE).expect("write");
        let data = SemanticData::load(&path).expect("load");
        assert_eq!(data.num_classes(), 3);

        let missing = SemanticData::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(missing.to_string().contains("cannot read"));
    }
}
