use tracing::info;

use crate::error::Result;
use crate::matrix::{DeviceSpec, Residency, SparseMatrix};
use crate::vectorizer::TrigramVectorizer;

/// The built index: sparse matrix, frozen vectorizer and the ordered string
/// collection. The unit that is placed, queried and persisted.
///
/// Read-only after construction except for residency transfers; the borrow
/// checker enforces that `place` cannot race a concurrent `lookup` on the
/// same model.
#[derive(Debug)]
pub struct IndexModel {
    pub(crate) matrix: SparseMatrix,
    pub(crate) vectorizer: TrigramVectorizer,
    pub(crate) strings: Vec<String>,
}

impl IndexModel {
    /// The indexed strings, in row order.
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Number of indexed strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Number of trigram features discovered at build time.
    pub fn vocab_len(&self) -> usize {
        self.vectorizer.vocab_len()
    }

    /// Current residency of the sparse matrix. The vectorizer and the string
    /// collection always stay host-resident.
    pub fn residency(&self) -> Residency {
        self.matrix.residency()
    }

    /// Moves the sparse matrix to the requested device. All subsequent
    /// lookups compute on that residency.
    pub fn place(&mut self, spec: DeviceSpec) -> Result<()> {
        self.matrix.to_device(spec)?;
        info!(?spec, "index placed on device");
        Ok(())
    }

    /// Moves the sparse matrix back to host memory.
    pub fn to_host(&mut self) -> Result<()> {
        self.matrix.to_host()
    }
}

/// Builds an index over `strings`: fits the trigram vocabulary, constructs
/// the normalized frequency matrix with explicit shape
/// `(strings.len(), vocabulary len)` and binds the string collection.
pub fn build_index(strings: Vec<String>) -> Result<IndexModel> {
    let (vectorizer, matrix) = TrigramVectorizer::fit(&strings)?;
    info!(
        docs = strings.len(),
        vocab = vectorizer.vocab_len(),
        nnz = matrix.nnz(),
        "index built"
    );
    Ok(IndexModel {
        matrix,
        vectorizer,
        strings,
    })
}

/// Free-function form of [`IndexModel::place`].
pub fn place(model: &mut IndexModel, spec: DeviceSpec) -> Result<()> {
    model.place(spec)
}
