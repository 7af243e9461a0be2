//! Versioned little-endian model format.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic "MIML" | version u32
//! relations: index       features: index
//! y feature kinds: u32 n, n × u8
//! dependencies: u32 n, n × (u32, u32)
//! z classifiers: u32 k, k × classifier
//! merged: u8 flag [classifier]
//! y models: u32 n, n × (string name, index features, classifier)
//!
//! index      = u32 n, n × string
//! string     = u32 len, utf-8 bytes
//! classifier = u32 rows, u32 cols, rows*cols × f64 (row-major), cols × f64 bias
//! ```

use std::{
    collections::BTreeSet,
    io::{Read, Write},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;
use ndarray::{Array1, Array2};

use crate::{
    classify::LinearClassifier,
    data::Index,
    error::{MimlError, Result},
    model::{yfeatures::YFeatureKind, ymodel::YModel, JointModel},
};

const MAGIC: &[u8; 4] = b"MIML";
pub const VERSION: u32 = 1;
/// Upper bound on capacity reserved from an untrusted count.
const PREALLOC_LIMIT: usize = 4096;

pub fn write_model<W: Write>(model: &JointModel, mut wtr: W) -> Result<()> {
    wtr.write_all(MAGIC)?;
    wtr.write_u32::<LittleEndian>(VERSION)?;
    write_index(&model.labels, &mut wtr)?;
    write_index(&model.features, &mut wtr)?;

    write_len(model.y_features.len(), &mut wtr)?;
    for kind in &model.y_features {
        wtr.write_u8(kind.code())?;
    }

    write_len(model.dependencies.len(), &mut wtr)?;
    for &(a, b) in &model.dependencies {
        write_len(a, &mut wtr)?;
        write_len(b, &mut wtr)?;
    }

    write_len(model.z_classifiers.len(), &mut wtr)?;
    for clf in &model.z_classifiers {
        write_classifier(clf, &mut wtr)?;
    }
    match &model.merged_z {
        Some(clf) => {
            wtr.write_u8(1)?;
            write_classifier(clf, &mut wtr)?;
        }
        None => wtr.write_u8(0)?,
    }

    write_len(model.y_models.len(), &mut wtr)?;
    for (name, y_model) in &model.y_models {
        write_string(name, &mut wtr)?;
        write_index(&y_model.features, &mut wtr)?;
        write_classifier(&y_model.classifier, &mut wtr)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_model<R: Read>(mut rdr: R) -> Result<JointModel> {
    let mut magic = [0u8; 4];
    rdr.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(MimlError::format("not a model file (bad magic)"));
    }
    let version = rdr.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(MimlError::format(format!(
            "unsupported model version {version}, expected {VERSION}"
        )));
    }
    let labels = read_index(&mut rdr)?;
    let features = read_index(&mut rdr)?;

    let n_kinds = read_len(&mut rdr)?;
    let mut y_features = Vec::with_capacity(n_kinds.min(PREALLOC_LIMIT));
    for _ in 0..n_kinds {
        let code = rdr.read_u8()?;
        let kind = YFeatureKind::from_code(code)
            .ok_or_else(|| MimlError::format(format!("unknown y feature code {code}")))?;
        y_features.push(kind);
    }

    let n_deps = read_len(&mut rdr)?;
    let mut dependencies = BTreeSet::new();
    for _ in 0..n_deps {
        let a = read_len(&mut rdr)?;
        let b = read_len(&mut rdr)?;
        dependencies.insert((a, b));
    }

    let folds = read_len(&mut rdr)?;
    let z_shape = (features.len(), labels.len() + 1);
    let mut z_classifiers = Vec::with_capacity(folds.min(PREALLOC_LIMIT));
    for _ in 0..folds {
        z_classifiers.push(read_classifier(&mut rdr, z_shape)?);
    }
    let merged_z = match rdr.read_u8()? {
        0 => None,
        1 => Some(read_classifier(&mut rdr, z_shape)?),
        flag => return Err(MimlError::format(format!("bad merged flag {flag}"))),
    };

    let n_models = read_len(&mut rdr)?;
    let mut y_models = IndexMap::with_capacity(n_models.min(PREALLOC_LIMIT));
    for _ in 0..n_models {
        let name = read_string(&mut rdr)?;
        let features = read_index(&mut rdr)?;
        let classifier = read_classifier(&mut rdr, (features.len(), 2))?;
        y_models.insert(
            name,
            YModel {
                features,
                classifier,
            },
        );
    }

    Ok(JointModel {
        labels,
        features,
        z_classifiers,
        merged_z,
        y_models,
        dependencies,
        y_features,
    })
}

fn write_len<W: Write>(len: usize, wtr: &mut W) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| MimlError::format("length exceeds u32"))?;
    wtr.write_u32::<LittleEndian>(len)?;
    Ok(())
}

fn read_len<R: Read>(rdr: &mut R) -> Result<usize> {
    Ok(rdr.read_u32::<LittleEndian>()? as usize)
}

fn write_string<W: Write>(value: &str, wtr: &mut W) -> Result<()> {
    write_len(value.len(), wtr)?;
    wtr.write_all(value.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(rdr: &mut R) -> Result<String> {
    let len = read_len(rdr)?;
    let mut bytes = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    rdr.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    String::from_utf8(bytes).map_err(|e| MimlError::format(format!("invalid utf-8: {e}")))
}

fn write_index<W: Write>(index: &Index, wtr: &mut W) -> Result<()> {
    write_len(index.len(), wtr)?;
    for name in index.iter() {
        write_string(name, wtr)?;
    }
    Ok(())
}

fn read_index<R: Read>(rdr: &mut R) -> Result<Index> {
    let len = read_len(rdr)?;
    let mut names = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    for _ in 0..len {
        names.push(read_string(rdr)?);
    }
    let index = Index::from_names(names);
    if index.len() != len {
        return Err(MimlError::format("duplicate names in index"));
    }
    Ok(index)
}

fn write_classifier<W: Write>(clf: &LinearClassifier, wtr: &mut W) -> Result<()> {
    write_len(clf.num_features(), wtr)?;
    write_len(clf.num_labels(), wtr)?;
    for &w in clf.weights().iter() {
        wtr.write_f64::<LittleEndian>(w)?;
    }
    for &b in clf.bias().iter() {
        wtr.write_f64::<LittleEndian>(b)?;
    }
    Ok(())
}

/// Read a classifier whose declared shape must equal `expected` (features, labels).
fn read_classifier<R: Read>(rdr: &mut R, expected: (usize, usize)) -> Result<LinearClassifier> {
    let rows = read_len(rdr)?;
    let cols = read_len(rdr)?;
    if (rows, cols) != expected {
        return Err(MimlError::format(format!(
            "classifier is {rows}x{cols}, expected {}x{}",
            expected.0, expected.1
        )));
    }
    let cells = rows
        .checked_mul(cols)
        .filter(|&n| n.checked_mul(std::mem::size_of::<f64>()).is_some_and(|b| b <= isize::MAX as usize))
        .ok_or_else(|| MimlError::format(format!("classifier size {rows}x{cols} overflows")))?;
    let mut weights = vec![0.0; cells];
    rdr.read_f64_into::<LittleEndian>(&mut weights)?;
    let mut bias = vec![0.0; cols];
    rdr.read_f64_into::<LittleEndian>(&mut bias)?;
    let weights = Array2::from_shape_vec((rows, cols), weights)
        .map_err(|e| MimlError::format(format!("bad weight matrix: {e}")))?;
    Ok(LinearClassifier::from_parts(weights, Array1::from(bias)))
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::model::ymodel::YModel;

    fn model() -> JointModel {
        let mut y_models = IndexMap::new();
        y_models.insert("a".to_string(), YModel::at_least_once());
        JointModel {
            labels: Index::from_names(["a"]),
            features: Index::from_names(["f0", "f1"]),
            z_classifiers: vec![
                LinearClassifier::from_parts(array![[0.1, -0.2], [1e-300, 3.5]], array![0.0, -1.0]),
                LinearClassifier::zeros(2, 2),
            ],
            merged_z: None,
            y_models,
            dependencies: BTreeSet::new(),
            y_features: vec![YFeatureKind::AtLeastOnce, YFeatureKind::None],
        }
    }

    #[test]
    fn round_trip_is_exact() {
        let original = model();
        let mut bytes = Vec::new();
        write_model(&original, &mut bytes).unwrap();
        let restored = read_model(bytes.as_slice()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = Vec::new();
        write_model(&model(), &mut bytes).unwrap();
        let mut wrong_version = bytes.clone();
        wrong_version[4] = 9;
        assert!(matches!(
            read_model(wrong_version.as_slice()),
            Err(MimlError::Format(_))
        ));
        bytes[0] = b'X';
        assert!(matches!(read_model(bytes.as_slice()), Err(MimlError::Format(_))));
    }

    #[test]
    fn truncated_input_is_an_io_error() {
        let mut bytes = Vec::new();
        write_model(&model(), &mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(read_model(bytes.as_slice()), Err(MimlError::Io(_))));
    }

    fn header_with_classifier(rows: u32, cols: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.write_u32::<LittleEndian>(VERSION).unwrap();
        write_index(&Index::from_names(["a"]), &mut bytes).unwrap();
        write_index(&Index::from_names(["f0", "f1"]), &mut bytes).unwrap();
        bytes.write_u32::<LittleEndian>(0).unwrap();
        bytes.write_u32::<LittleEndian>(0).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.write_u32::<LittleEndian>(rows).unwrap();
        bytes.write_u32::<LittleEndian>(cols).unwrap();
        bytes
    }

    #[test]
    fn oversized_classifier_header_is_a_format_error() {
        let bytes = header_with_classifier(u32::MAX, u32::MAX);
        assert!(matches!(read_model(bytes.as_slice()), Err(MimlError::Format(_))));
        let bytes = header_with_classifier(2, 3);
        assert!(matches!(read_model(bytes.as_slice()), Err(MimlError::Format(_))));
    }

    #[test]
    fn huge_string_length_on_short_input_is_an_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.write_u32::<LittleEndian>(VERSION).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
        bytes.extend_from_slice(b"abc");
        assert!(matches!(read_model(bytes.as_slice()), Err(MimlError::Io(_))));
    }
}
