use candle_core::{DType, Device, Tensor};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A residency target for the sparse matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    /// The candle CPU device. Distinct from plain host residency: data lives
    /// in tensors and the similarity product runs through tensor kernels.
    Cpu,
    /// CUDA device by ordinal.
    Cuda(usize),
    /// Metal device by ordinal.
    Metal(usize),
}

impl DeviceSpec {
    fn open(self) -> Result<Device> {
        let device = match self {
            DeviceSpec::Cpu => Device::Cpu,
            DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal)?,
            DeviceSpec::Metal(ordinal) => Device::new_metal(ordinal)?,
        };
        Ok(device)
    }
}

/// Where the matrix data currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Host,
    Device(DeviceSpec),
}

/// Host representation: compressed sparse rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HostCsr {
    pub(crate) row_ptr: Vec<usize>,
    pub(crate) col_idx: Vec<u32>,
    pub(crate) values: Vec<f32>,
}

impl HostCsr {
    fn empty(rows: usize) -> Self {
        HostCsr {
            row_ptr: vec![0; rows + 1],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }
}

/// Device representation: COO index/value tensors. Entries stay in CSR
/// order so the host form can be rebuilt without re-sorting.
#[derive(Debug)]
struct DeviceCoo {
    spec: DeviceSpec,
    device: Device,
    nnz: usize,
    /// `(rows, cols, values)` tensors of length nnz; `None` when the matrix
    /// holds no nonzero entries.
    coo: Option<(Tensor, Tensor, Tensor)>,
}

#[derive(Debug)]
enum Storage {
    Host(HostCsr),
    Device(DeviceCoo),
}

/// Sparse matrix with an asserted shape and explicit residency.
///
/// Rows are indexed strings, columns are vocabulary features. The shape is
/// never inferred from the maximum observed index, so trailing all-zero rows
/// and columns survive every construction and transfer.
#[derive(Debug)]
pub struct SparseMatrix {
    shape: (usize, usize),
    storage: Storage,
}

impl SparseMatrix {
    /// Builds a host-resident matrix from `(row, col, value)` entries and an
    /// asserted shape. Entries outside the shape are a shape error; duplicate
    /// coordinates are summed.
    pub fn from_triplets(entries: Vec<(usize, usize, f32)>, shape: (usize, usize)) -> Result<Self> {
        let (rows, cols) = shape;
        if cols > u32::MAX as usize || rows > u32::MAX as usize {
            return Err(Error::shape(format!("shape {rows}x{cols} exceeds index range")));
        }
        for &(r, c, _) in &entries {
            if r >= rows || c >= cols {
                return Err(Error::shape(format!(
                    "entry ({r}, {c}) outside asserted shape {rows}x{cols}"
                )));
            }
        }

        // Counting sort by row, then per-row column sort with duplicate merge.
        let mut offsets = vec![0usize; rows + 1];
        for &(r, _, _) in &entries {
            offsets[r + 1] += 1;
        }
        for i in 0..rows {
            offsets[i + 1] += offsets[i];
        }
        let mut by_row_cols = vec![0u32; entries.len()];
        let mut by_row_vals = vec![0f32; entries.len()];
        let mut cursor = offsets.clone();
        for (r, c, v) in entries {
            let pos = cursor[r];
            cursor[r] += 1;
            by_row_cols[pos] = c as u32;
            by_row_vals[pos] = v;
        }

        let mut csr = HostCsr::empty(rows);
        csr.col_idx.reserve(by_row_cols.len());
        csr.values.reserve(by_row_vals.len());
        for r in 0..rows {
            let (lo, hi) = (offsets[r], offsets[r + 1]);
            let mut pairs: Vec<(u32, f32)> = by_row_cols[lo..hi]
                .iter()
                .copied()
                .zip(by_row_vals[lo..hi].iter().copied())
                .collect();
            pairs.sort_unstable_by_key(|&(c, _)| c);
            let row_start = csr.col_idx.len();
            for (c, v) in pairs {
                if csr.col_idx.len() > row_start && csr.col_idx[csr.col_idx.len() - 1] == c {
                    let last = csr.values.len() - 1;
                    csr.values[last] += v;
                } else {
                    csr.col_idx.push(c);
                    csr.values.push(v);
                }
            }
            csr.row_ptr[r + 1] = csr.col_idx.len();
        }

        Ok(SparseMatrix {
            shape,
            storage: Storage::Host(csr),
        })
    }

    /// Rebuilds a matrix from persisted host parts, validating structure.
    pub(crate) fn from_host_parts(csr: HostCsr, shape: (usize, usize)) -> Result<Self> {
        let (rows, cols) = shape;
        let nnz = csr.values.len();
        let structurally_ok = csr.row_ptr.len() == rows + 1
            && csr.col_idx.len() == nnz
            && csr.row_ptr.first() == Some(&0)
            && csr.row_ptr.last() == Some(&nnz)
            && csr.row_ptr.windows(2).all(|w| w[0] <= w[1])
            && csr.col_idx.iter().all(|&c| (c as usize) < cols);
        if !structurally_ok {
            return Err(Error::Decode(format!(
                "sparse matrix payload inconsistent with shape {rows}x{cols}"
            )));
        }
        Ok(SparseMatrix {
            shape,
            storage: Storage::Host(csr),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn nnz(&self) -> usize {
        match &self.storage {
            Storage::Host(csr) => csr.values.len(),
            Storage::Device(coo) => coo.nnz,
        }
    }

    pub fn residency(&self) -> Residency {
        match &self.storage {
            Storage::Host(_) => Residency::Host,
            Storage::Device(coo) => Residency::Device(coo.spec),
        }
    }

    /// Moves the matrix to the given device. A transfer to the current
    /// residency is a no-op; an unavailable target surfaces as a device
    /// error and leaves the matrix where it was.
    pub fn to_device(&mut self, spec: DeviceSpec) -> Result<()> {
        if self.residency() == Residency::Device(spec) {
            return Ok(());
        }
        let device = spec.open()?;
        let nnz = self.nnz();
        let coo = match &self.storage {
            Storage::Host(csr) => upload(csr, &device)?,
            Storage::Device(current) => match &current.coo {
                Some((r, c, v)) => Some((
                    r.to_device(&device)?,
                    c.to_device(&device)?,
                    v.to_device(&device)?,
                )),
                None => None,
            },
        };
        self.storage = Storage::Device(DeviceCoo {
            spec,
            device,
            nnz,
            coo,
        });
        Ok(())
    }

    /// Moves the matrix back to host memory. No-op if already host-resident.
    pub fn to_host(&mut self) -> Result<()> {
        if matches!(self.storage, Storage::Host(_)) {
            return Ok(());
        }
        let csr = self.host_snapshot()?;
        self.storage = Storage::Host(csr);
        Ok(())
    }

    /// Host copy of the matrix data, leaving residency untouched.
    pub(crate) fn host_snapshot(&self) -> Result<HostCsr> {
        match &self.storage {
            Storage::Host(csr) => Ok(csr.clone()),
            Storage::Device(coo) => {
                let rows = self.shape.0;
                match &coo.coo {
                    None => Ok(HostCsr::empty(rows)),
                    Some((r, c, v)) => {
                        let row_ids: Vec<u32> = r.to_device(&Device::Cpu)?.to_vec1()?;
                        let col_idx: Vec<u32> = c.to_device(&Device::Cpu)?.to_vec1()?;
                        let values: Vec<f32> = v.to_device(&Device::Cpu)?.to_vec1()?;
                        // Entries kept CSR order on upload, so only the row
                        // pointers need recounting.
                        let mut row_ptr = vec![0usize; rows + 1];
                        for &r in &row_ids {
                            row_ptr[r as usize + 1] += 1;
                        }
                        for i in 0..rows {
                            row_ptr[i + 1] += row_ptr[i];
                        }
                        Ok(HostCsr {
                            row_ptr,
                            col_idx,
                            values,
                        })
                    }
                }
            }
        }
    }

    /// `self × rhs`, where `rhs` is dense of shape `(self.cols, q)` in
    /// row-major order. Returns the dense product of shape `(self.rows, q)`,
    /// row-major, always on the host. The right-hand side is moved to the
    /// matrix's residency, never the reverse.
    pub(crate) fn matmul_dense(&self, rhs: &[f32], rhs_shape: (usize, usize)) -> Result<Vec<f32>> {
        let (inner, q) = rhs_shape;
        let (rows, cols) = self.shape;
        if cols != inner || rhs.len() != inner * q {
            return Err(Error::shape(format!(
                "cannot multiply {rows}x{cols} by {inner}x{q}"
            )));
        }
        if rows == 0 || q == 0 {
            return Ok(vec![0.0; rows * q]);
        }
        match &self.storage {
            Storage::Host(csr) => {
                let mut out = vec![0f32; rows * q];
                out.par_chunks_mut(q).enumerate().for_each(|(i, out_row)| {
                    for k in csr.row_ptr[i]..csr.row_ptr[i + 1] {
                        let c = csr.col_idx[k] as usize;
                        let v = csr.values[k];
                        let rhs_row = &rhs[c * q..(c + 1) * q];
                        for (acc, x) in out_row.iter_mut().zip(rhs_row) {
                            *acc += v * *x;
                        }
                    }
                });
                Ok(out)
            }
            Storage::Device(coo) => {
                let Some((row_ids, col_ids, vals)) = &coo.coo else {
                    return Ok(vec![0.0; rows * q]);
                };
                let rhs_t = Tensor::from_vec(rhs.to_vec(), (inner, q), &coo.device)?;
                // Gather the rhs row of every nonzero, scale by its value,
                // scatter-add into the output row.
                let gathered = rhs_t.index_select(col_ids, 0)?;
                let weighted = gathered.broadcast_mul(&vals.unsqueeze(1)?)?;
                let acc = Tensor::zeros((rows, q), DType::F32, &coo.device)?;
                let product = acc.index_add(row_ids, &weighted, 0)?;
                let out = product
                    .to_device(&Device::Cpu)?
                    .flatten_all()?
                    .to_vec1::<f32>()?;
                Ok(out)
            }
        }
    }

    /// Dense transposed copy `(cols, rows)` in row-major order. Only defined
    /// for host-resident matrices; query matrices are always built on host.
    pub(crate) fn to_dense_transposed(&self) -> Result<Vec<f32>> {
        let (rows, cols) = self.shape;
        let csr = match &self.storage {
            Storage::Host(csr) => csr,
            Storage::Device(_) => {
                return Err(Error::shape("dense expansion requires host residency"))
            }
        };
        let mut out = vec![0f32; rows * cols];
        for r in 0..rows {
            for k in csr.row_ptr[r]..csr.row_ptr[r + 1] {
                out[csr.col_idx[k] as usize * rows + r] = csr.values[k];
            }
        }
        Ok(out)
    }
}

fn upload(csr: &HostCsr, device: &Device) -> Result<Option<(Tensor, Tensor, Tensor)>> {
    let nnz = csr.values.len();
    if nnz == 0 {
        return Ok(None);
    }
    let mut row_ids = Vec::with_capacity(nnz);
    for r in 0..csr.row_ptr.len() - 1 {
        for _ in csr.row_ptr[r]..csr.row_ptr[r + 1] {
            row_ids.push(r as u32);
        }
    }
    let rows_t = Tensor::from_vec(row_ids, nnz, device)?;
    let cols_t = Tensor::from_vec(csr.col_idx.clone(), nnz, device)?;
    let vals_t = Tensor::from_vec(csr.values.clone(), nnz, device)?;
    Ok(Some((rows_t, cols_t, vals_t)))
}

#[cfg(test)]
impl SparseMatrix {
    /// Test helper: `(col, value)` entries of one row, host residency only.
    pub(crate) fn row_entries(&self, row: usize) -> Vec<(usize, f32)> {
        match &self.storage {
            Storage::Host(csr) => (csr.row_ptr[row]..csr.row_ptr[row + 1])
                .map(|k| (csr.col_idx[k] as usize, csr.values[k]))
                .collect(),
            Storage::Device(_) => panic!("row_entries requires host residency"),
        }
    }
}
