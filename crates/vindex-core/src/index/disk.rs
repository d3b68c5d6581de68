//! On-disk graph format and the disk index manager.
//!
//! Each named index owns two files in its index directory:
//!
//! - `{name}.graph`: the HNSW topology with inline exact vectors and, once
//!   PQ is trained, the codebook and one PQ code per node
//! - `{name}.meta`: `[formatVersion: i32] [dimension: i32] [vectorCount: i64]`
//!   (little-endian), a cheap compatibility pre-check
//!
//! # Graph File Format
//!
//! ```text
//! [magic: 8B "VXGRAPH\0"] [version: u32] [flags: u32] [metric: u8] [reserved: 3B]
//! [dimension: u32] [max_degree: u32] [node_count: u32] [entry: u32]
//! [max_level: u32] [code_len: u32] [pq_len: u32]
//! [PQ codebook: pq_len bytes]
//! [offset table: (ordinal: u32, offset: u64) × node_count, ordinal-sorted]
//! [node records]
//! [CRC32: 4 bytes over everything above]
//!
//! record: [level: u8] [live: u8] ([count: u16] [neighbor: u32] × count) × (level + 1)
//!         [vector: f32 × dimension] [code: u8 × code_len]
//! ```
//!
//! Both files are written to `*.tmp` and renamed into place, metadata last.
//! The metadata check does not hash content: a different dataset with the
//! same dimension and count is accepted.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::index::hnsw::{GraphView, HnswGraph, HnswParams, NodeId};
use crate::index::pq::{PqCodes, PqCompressionManager, ProductQuantizer};
use crate::store::VectorRef;
use crate::vector_values::{NullSafeVectorValues, VectorValues};
use memmap2::Mmap;
use rayon::prelude::*;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata format version; any other value invalidates the cached graph.
pub const FORMAT_VERSION: i32 = 1;

/// Graph file magic bytes.
const GRAPH_MAGIC: &[u8; 8] = b"VXGRAPH\0";

/// Graph file layout version.
const GRAPH_VERSION: u32 = 1;

/// Node records carry exact vectors.
pub const FLAG_INLINE_VECTORS: u32 = 1;
/// Node records carry PQ codes and the file carries the codebook.
pub const FLAG_PQ_CODES: u32 = 1 << 1;

const HEADER_SIZE: usize = 48;
const TABLE_ENTRY_SIZE: usize = 12;
const CRC_SIZE: usize = 4;
const NO_ENTRY: u32 = u32::MAX;

/// CRC32 (IEEE 802.3 polynomial) of `data`.
#[inline]
#[allow(clippy::cast_possible_truncation)] // Table index always 0-255
#[must_use]
pub fn crc32_hash(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[idx];
    }
    !crc
}

/// Bounds-checked little-endian reader.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                Error::CorruptIndex(format!(
                    "Unexpected end of data: need {len} bytes at offset {}",
                    self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_f32s(&mut self, count: usize) -> Result<Vec<f32>> {
        let len = count
            .checked_mul(4)
            .ok_or_else(|| Error::CorruptIndex("Vector length overflow".into()))?;
        Ok(decode_f32s(self.read_bytes(len)?))
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

fn decode_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn decode_u32s(bytes: &[u8]) -> Vec<NodeId> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// =============================================================================
// Metadata file
// =============================================================================

/// Contents of `{name}.meta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMetadata {
    /// Always [`FORMAT_VERSION`] when written by this crate.
    pub format_version: i32,
    /// Vector dimension.
    pub dimension: i32,
    /// Number of vectors in the graph.
    pub vector_count: i64,
}

impl IndexMetadata {
    /// Size of the encoded metadata.
    pub const SIZE: usize = 16;

    /// Encodes the fixed 16-byte layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.format_version.to_le_bytes());
        out[4..8].copy_from_slice(&self.dimension.to_le_bytes());
        out[8..16].copy_from_slice(&self.vector_count.to_le_bytes());
        out
    }

    /// Decodes the fixed 16-byte layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] if `bytes` is not exactly 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(Error::CorruptIndex(format!(
                "Metadata must be {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let mut r = ByteReader::new(bytes);
        #[allow(clippy::cast_possible_wrap)]
        Ok(Self {
            format_version: r.read_u32()? as i32,
            dimension: r.read_u32()? as i32,
            vector_count: r.read_u64()? as i64,
        })
    }

    /// Reads a metadata file.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or a malformed file.
    pub fn read(path: &Path) -> Result<Self> {
        Self::from_bytes(&fs::read(path)?)
    }

    /// Writes a metadata file atomically.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `bytes` to `path.tmp`, syncs, then renames over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp file");
            }
        }
        return Err(e.into());
    }
    Ok(())
}

// =============================================================================
// Writer
// =============================================================================

#[allow(clippy::cast_possible_truncation)]
fn encode_record(
    graph: &HnswGraph,
    node: NodeId,
    values: &dyn VectorValues,
    pq: Option<&ProductQuantizer>,
) -> Vec<u8> {
    let level = graph.level_of(node).unwrap_or(0);
    let mut buf = Vec::with_capacity(64 + values.dimension() * 4);
    // Reason: levels are capped at 15
    buf.push(level as u8);
    buf.push(u8::from(graph.is_live(node)));
    for l in 0..=level {
        let list = graph.neighbors_at(node, l);
        let count = list.len().min(usize::from(u16::MAX));
        buf.extend_from_slice(&(count as u16).to_le_bytes());
        for n in &list[..count] {
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }

    let vector = values
        .get_vector(node)
        .unwrap_or_else(|| VectorRef::from(vec![0.0; values.dimension()]));
    for v in vector.iter() {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    if let Some(pq) = pq {
        buf.extend_from_slice(&pq.encode(&vector));
    }
    buf
}

/// Serializes `graph` into the graph file format.
#[allow(clippy::cast_possible_truncation)]
fn encode_graph(
    graph: &HnswGraph,
    values: &dyn VectorValues,
    pq: Option<&ProductQuantizer>,
    parallel: bool,
) -> Vec<u8> {
    let ordinals = graph.ordinals();
    let safe_values = NullSafeVectorValues::new(values);
    let encode = |node: &NodeId| encode_record(graph, *node, &safe_values, pq);
    let records: Vec<Vec<u8>> = if parallel {
        ordinals.par_iter().map(encode).collect()
    } else {
        ordinals.iter().map(encode).collect()
    };

    let pq_bytes = pq.map(ProductQuantizer::to_bytes).unwrap_or_default();
    let code_len = pq.map_or(0, ProductQuantizer::num_subspaces);
    let mut flags = FLAG_INLINE_VECTORS;
    if pq.is_some() {
        flags |= FLAG_PQ_CODES;
    }

    let records_len: usize = records.iter().map(Vec::len).sum();
    let table_start = HEADER_SIZE + pq_bytes.len();
    let records_start = table_start + ordinals.len() * TABLE_ENTRY_SIZE;
    let mut out = Vec::with_capacity(records_start + records_len + CRC_SIZE);

    // Reason: counts and dimensions are bounded by the 31-bit ordinal space
    out.extend_from_slice(GRAPH_MAGIC);
    out.extend_from_slice(&GRAPH_VERSION.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.push(graph.metric().as_u8());
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&(values.dimension() as u32).to_le_bytes());
    out.extend_from_slice(&(graph.params().max_degree as u32).to_le_bytes());
    out.extend_from_slice(&(ordinals.len() as u32).to_le_bytes());
    out.extend_from_slice(&graph.entry_point().unwrap_or(NO_ENTRY).to_le_bytes());
    out.extend_from_slice(&(graph.max_level() as u32).to_le_bytes());
    out.extend_from_slice(&(code_len as u32).to_le_bytes());
    out.extend_from_slice(&(pq_bytes.len() as u32).to_le_bytes());
    debug_assert_eq!(out.len(), HEADER_SIZE);
    out.extend_from_slice(&pq_bytes);

    let mut offset = records_start as u64;
    for (node, record) in ordinals.iter().zip(&records) {
        out.extend_from_slice(&node.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        offset += record.len() as u64;
    }
    for record in &records {
        out.extend_from_slice(record);
    }

    let crc = crc32_hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

// =============================================================================
// Reader
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GraphHeader {
    flags: u32,
    metric: DistanceMetric,
    dimension: usize,
    max_degree: usize,
    node_count: usize,
    entry_point: Option<NodeId>,
    max_level: usize,
    code_len: usize,
}

/// One node record, borrowed from the mapped file.
struct NodeRecord<'a> {
    live: bool,
    lists: Vec<&'a [u8]>,
    vector: &'a [u8],
    code: &'a [u8],
}

impl<'a> NodeRecord<'a> {
    fn parse(bytes: &'a [u8], header: &GraphHeader) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let level = usize::from(r.read_u8()?);
        let live = r.read_u8()? != 0;
        let mut lists = Vec::with_capacity(level + 1);
        for _ in 0..=level {
            let count = usize::from(r.read_u16()?);
            lists.push(r.read_bytes(count * 4)?);
        }
        let vector = if header.flags & FLAG_INLINE_VECTORS != 0 {
            r.read_bytes(header.dimension * 4)?
        } else {
            &[]
        };
        let code = if header.flags & FLAG_PQ_CODES != 0 {
            r.read_bytes(header.code_len)?
        } else {
            &[]
        };
        Ok(Self {
            live,
            lists,
            vector,
            code,
        })
    }
}

/// Memory-mapped, read-only graph file.
pub struct DiskGraph {
    mmap: Mmap,
    header: GraphHeader,
    table_offset: usize,
    /// Length of the file without the CRC trailer.
    body_len: usize,
    quantizer: Option<ProductQuantizer>,
}

impl std::fmt::Debug for DiskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskGraph")
            .field("header", &self.header)
            .field("bytes", &self.mmap.len())
            .finish_non_exhaustive()
    }
}

impl DiskGraph {
    /// Maps and validates a graph file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] on a bad magic, version, checksum or
    /// truncated header, and I/O errors as [`Error::Io`].
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the file is only ever replaced by rename, never modified in
        // place, so the mapped bytes stay stable for the mapping's lifetime.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE + CRC_SIZE {
            return Err(Error::CorruptIndex(format!(
                "Graph file too short: {} bytes",
                mmap.len()
            )));
        }
        let body_len = mmap.len() - CRC_SIZE;
        let mut trailer = ByteReader::new(&mmap[body_len..]);
        let stored_crc = trailer.read_u32()?;
        let actual_crc = crc32_hash(&mmap[..body_len]);
        if stored_crc != actual_crc {
            return Err(Error::CorruptIndex(format!(
                "Graph checksum mismatch: stored {stored_crc:#010x}, computed {actual_crc:#010x}"
            )));
        }

        let (header, table_offset, quantizer) = Self::parse_header(&mmap[..body_len])?;
        Ok(Self {
            mmap,
            header,
            table_offset,
            body_len,
            quantizer,
        })
    }

    fn parse_header(body: &[u8]) -> Result<(GraphHeader, usize, Option<ProductQuantizer>)> {
        let mut r = ByteReader::new(body);
        if r.read_bytes(GRAPH_MAGIC.len())? != GRAPH_MAGIC {
            return Err(Error::CorruptIndex("Bad graph magic".into()));
        }
        let version = r.read_u32()?;
        if version != GRAPH_VERSION {
            return Err(Error::CorruptIndex(format!(
                "Unsupported graph version {version}"
            )));
        }
        let flags = r.read_u32()?;
        let metric_id = r.read_u8()?;
        let metric = DistanceMetric::from_u8(metric_id)
            .ok_or_else(|| Error::CorruptIndex(format!("Unknown metric id {metric_id}")))?;
        r.read_bytes(3)?;
        let dimension = r.read_u32()? as usize;
        let max_degree = r.read_u32()? as usize;
        let node_count = r.read_u32()? as usize;
        let entry = r.read_u32()?;
        let max_level = r.read_u32()? as usize;
        let code_len = r.read_u32()? as usize;
        let pq_len = r.read_u32()? as usize;

        let quantizer = if pq_len > 0 {
            Some(ProductQuantizer::from_bytes(r.read_bytes(pq_len)?)?)
        } else {
            None
        };
        if (flags & FLAG_PQ_CODES != 0)
            != quantizer.as_ref().is_some_and(|pq| pq.num_subspaces() == code_len)
        {
            return Err(Error::CorruptIndex("PQ flag and codebook disagree".into()));
        }

        let table_offset = r.position();
        r.read_bytes(node_count * TABLE_ENTRY_SIZE)?;

        let header = GraphHeader {
            flags,
            metric,
            dimension,
            max_degree,
            node_count,
            entry_point: (entry != NO_ENTRY).then_some(entry),
            max_level,
            code_len,
        };
        Ok((header, table_offset, quantizer))
    }

    /// Number of nodes in the file, tombstones included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.header.node_count
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.header.dimension
    }

    /// Similarity function the graph was built with.
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.header.metric
    }

    /// Max degree the graph was built with.
    #[must_use]
    pub fn max_degree(&self) -> usize {
        self.header.max_degree
    }

    /// Returns true if records carry PQ codes.
    #[must_use]
    pub fn has_pq_codes(&self) -> bool {
        self.header.flags & FLAG_PQ_CODES != 0
    }

    /// The embedded PQ codebook.
    #[must_use]
    pub fn quantizer(&self) -> Option<&ProductQuantizer> {
        self.quantizer.as_ref()
    }

    fn table_entry(&self, index: usize) -> Option<(NodeId, usize)> {
        let start = self.table_offset + index * TABLE_ENTRY_SIZE;
        let mut r = ByteReader::new(self.mmap.get(start..start + TABLE_ENTRY_SIZE)?);
        let node = r.read_u32().ok()?;
        let offset = usize::try_from(r.read_u64().ok()?).ok()?;
        Some((node, offset))
    }

    fn record_offset(&self, node: NodeId) -> Option<usize> {
        let (mut lo, mut hi) = (0, self.header.node_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (ordinal, offset) = self.table_entry(mid)?;
            match ordinal.cmp(&node) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(offset),
            }
        }
        None
    }

    fn record(&self, node: NodeId) -> Option<NodeRecord<'_>> {
        let offset = self.record_offset(node)?;
        let bytes = self.mmap.get(offset..self.body_len)?;
        NodeRecord::parse(bytes, &self.header).ok()
    }

    /// Inline exact vector of `node`.
    #[must_use]
    pub fn vector(&self, node: NodeId) -> Option<VectorRef> {
        let record = self.record(node)?;
        (!record.vector.is_empty()).then(|| VectorRef::from(decode_f32s(record.vector)))
    }

    /// Rebuilds the in-memory graph from every record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] if any record is malformed or the
    /// offset table is not sorted.
    pub fn to_graph(&self, params: HnswParams) -> Result<HnswGraph> {
        let mut nodes = Vec::with_capacity(self.header.node_count);
        let mut previous: Option<NodeId> = None;
        for index in 0..self.header.node_count {
            let (node, offset) = self
                .table_entry(index)
                .ok_or_else(|| Error::CorruptIndex(format!("Bad offset entry {index}")))?;
            if previous.is_some_and(|p| p >= node) {
                return Err(Error::CorruptIndex("Offset table is not sorted".into()));
            }
            previous = Some(node);

            let bytes = self
                .mmap
                .get(offset..self.body_len)
                .ok_or_else(|| Error::CorruptIndex(format!("Record offset {offset} out of range")))?;
            let record = NodeRecord::parse(bytes, &self.header)?;
            let lists = record.lists.iter().map(|l| decode_u32s(l)).collect();
            nodes.push((node, record.live, lists));
        }
        Ok(HnswGraph::from_parts(
            params,
            self.header.metric,
            self.header.entry_point,
            nodes,
        ))
    }
}

impl GraphView for DiskGraph {
    fn entry_point(&self) -> Option<NodeId> {
        self.header.entry_point
    }

    fn max_level(&self) -> usize {
        self.header.max_level
    }

    fn neighbors(&self, node: NodeId, level: usize) -> Cow<'_, [NodeId]> {
        let list = self
            .record(node)
            .and_then(|r| r.lists.get(level).map(|l| decode_u32s(l)))
            .unwrap_or_default();
        Cow::Owned(list)
    }

    fn is_live(&self, node: NodeId) -> bool {
        self.record(node).is_some_and(|r| r.live)
    }
}

impl PqCodes for DiskGraph {
    fn pq_code(&self, node: NodeId) -> Option<Cow<'_, [u8]>> {
        let record = self.record(node)?;
        (!record.code.is_empty()).then_some(Cow::Borrowed(record.code))
    }
}

/// Exact vectors read from a [`DiskGraph`]'s inline records.
#[derive(Debug, Clone)]
pub struct DiskVectorValues {
    graph: Arc<DiskGraph>,
}

impl DiskVectorValues {
    /// Creates a view over `graph`.
    #[must_use]
    pub fn new(graph: Arc<DiskGraph>) -> Self {
        Self { graph }
    }
}

impl VectorValues for DiskVectorValues {
    fn size(&self) -> usize {
        self.graph.node_count()
    }

    fn dimension(&self) -> usize {
        self.graph.dimension()
    }

    fn get_vector(&self, ordinal: NodeId) -> Option<VectorRef> {
        self.graph.vector(ordinal)
    }

    fn copy(&self) -> Self {
        self.clone()
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Loads and writes the on-disk files of one named index.
#[derive(Debug)]
pub struct DiskIndexManager {
    name: String,
    directory: PathBuf,
    dimension: usize,
    parallel_write: bool,
    graph: Option<Arc<DiskGraph>>,
}

impl DiskIndexManager {
    /// Creates a manager for `{directory}/{name}.*`. Nothing is opened yet.
    pub fn new(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        dimension: usize,
        parallel_write: bool,
    ) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            dimension,
            parallel_write,
            graph: None,
        }
    }

    /// Path of the graph file.
    #[must_use]
    pub fn graph_path(&self) -> PathBuf {
        self.directory.join(format!("{}.graph", self.name))
    }

    /// Path of the metadata file.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.directory.join(format!("{}.meta", self.name))
    }

    /// The loaded graph, if any.
    #[must_use]
    pub fn graph(&self) -> Option<&Arc<DiskGraph>> {
        self.graph.as_ref()
    }

    /// Returns true if a graph is loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.graph.is_some()
    }

    /// Loads the graph if both files exist and the metadata matches the
    /// format version, the dimension and `expected_count`.
    ///
    /// Never fails: any load error is logged, resources are released and
    /// `false` is returned so the caller rebuilds in memory.
    pub fn try_load(&mut self, expected_count: usize) -> bool {
        match self.load(expected_count) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(
                    index = %self.name,
                    error = %e,
                    "Failed to load on-disk graph, rebuilding in memory"
                );
                self.close();
                false
            }
        }
    }

    fn load(&mut self, expected_count: usize) -> Result<bool> {
        let graph_path = self.graph_path();
        let meta_path = self.meta_path();
        if !graph_path.exists() || !meta_path.exists() {
            tracing::debug!(index = %self.name, "No on-disk graph found");
            return Ok(false);
        }

        let meta = IndexMetadata::read(&meta_path)?;
        let expected_dimension = i32::try_from(self.dimension).unwrap_or(i32::MAX);
        let expected_count = i64::try_from(expected_count).unwrap_or(i64::MAX);
        if meta.format_version != FORMAT_VERSION
            || meta.dimension != expected_dimension
            || meta.vector_count != expected_count
        {
            tracing::info!(
                index = %self.name,
                format_version = meta.format_version,
                dimension = meta.dimension,
                vector_count = meta.vector_count,
                expected_count,
                "On-disk metadata does not match, ignoring cached graph"
            );
            return Ok(false);
        }

        let graph = DiskGraph::open(&graph_path)?;
        if graph.dimension() != self.dimension {
            return Err(Error::CorruptIndex(format!(
                "Graph dimension {} does not match metadata {}",
                graph.dimension(),
                self.dimension
            )));
        }
        tracing::info!(
            index = %self.name,
            nodes = graph.node_count(),
            pq = graph.has_pq_codes(),
            "Loaded on-disk graph"
        );
        self.graph = Some(Arc::new(graph));
        Ok(true)
    }

    /// Writes the graph file, then the metadata file.
    ///
    /// The loaded reader, if any, is released first. PQ codes and the
    /// codebook are embedded when `pq` is present and trained.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors; the previous files stay intact in that case.
    pub fn write_index(
        &mut self,
        graph: &HnswGraph,
        values: &dyn VectorValues,
        pq: Option<&PqCompressionManager>,
    ) -> Result<usize> {
        self.close();
        fs::create_dir_all(&self.directory)?;

        let quantizer = pq.and_then(PqCompressionManager::quantizer).map(Arc::as_ref);
        let bytes = encode_graph(graph, values, quantizer, self.parallel_write);
        write_atomic(&self.graph_path(), &bytes)?;

        let count = graph.live_count();
        IndexMetadata {
            format_version: FORMAT_VERSION,
            dimension: i32::try_from(self.dimension).unwrap_or(i32::MAX),
            vector_count: i64::try_from(count).unwrap_or(i64::MAX),
        }
        .write(&self.meta_path())?;

        tracing::info!(
            index = %self.name,
            nodes = graph.node_count(),
            vectors = count,
            bytes = bytes.len(),
            pq = quantizer.is_some(),
            "Wrote on-disk graph"
        );
        Ok(count)
    }

    /// Releases the memory-mapped reader. Idempotent.
    pub fn close(&mut self) {
        if self.graph.take().is_some() {
            tracing::debug!(index = %self.name, "Released on-disk graph");
        }
    }
}
