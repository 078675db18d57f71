use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::index::IndexModel;
use crate::matrix::{HostCsr, SparseMatrix};
use crate::vectorizer::TrigramVectorizer;

/// Host form of the sparse matrix as it appears in the container.
#[derive(Serialize, Deserialize)]
struct MatrixData {
    shape: (usize, usize),
    csr: HostCsr,
}

/// Writes `model` to `path` as an opaque, versionless CBOR container of
/// exactly three host-resident objects in fixed order: the sparse matrix,
/// the vectorizer (vocabulary plus extraction parameters as plain data) and
/// the string collection.
///
/// The matrix is copied down to host form for encoding regardless of its
/// residency at call time; the model itself is left untouched.
pub fn save_index(model: &IndexModel, path: impl AsRef<Path>) -> Result<()> {
    let matrix = MatrixData {
        shape: model.matrix.shape(),
        csr: model.matrix.host_snapshot()?,
    };
    let payload = (&matrix, &model.vectorizer, &model.strings);

    let file = File::create(path.as_ref())?;
    serde_cbor::to_writer(BufWriter::new(file), &payload)?;
    info!(path = %path.as_ref().display(), docs = model.len(), "index saved");
    Ok(())
}

/// Reads an index previously written by [`save_index`].
///
/// The loaded model is always host-resident; callers wanting accelerator
/// residency must place it again. No schema versioning is attempted: a
/// container produced by an incompatible implementation surfaces as a
/// decode error at best.
pub fn load_index(path: impl AsRef<Path>) -> Result<IndexModel> {
    let file = File::open(path.as_ref())?;
    let (matrix, vectorizer, strings): (MatrixData, TrigramVectorizer, Vec<String>) =
        serde_cbor::from_reader(BufReader::new(file))?;

    let matrix = SparseMatrix::from_host_parts(matrix.csr, matrix.shape)?;
    if matrix.shape() != (strings.len(), vectorizer.vocab_len()) {
        return Err(Error::Decode(format!(
            "container is internally inconsistent: matrix {:?}, {} strings, {} features",
            matrix.shape(),
            strings.len(),
            vectorizer.vocab_len()
        )));
    }
    info!(path = %path.as_ref().display(), docs = strings.len(), "index loaded");
    Ok(IndexModel {
        matrix,
        vectorizer,
        strings,
    })
}
