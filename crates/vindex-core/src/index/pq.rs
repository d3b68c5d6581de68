//! Product Quantization for compressed vector scoring.
//!
//! # How It Works
//!
//! 1. **Center** (dimension < 64): subtract the global mean of the training set
//! 2. **Split**: divide each vector into M subspaces (default `dimension / 4`)
//! 3. **Cluster**: k-means on each subspace to find 256 centroids
//! 4. **Encode**: each subvector becomes the id of its nearest centroid (1 byte)
//! 5. **Score**: precompute query-to-centroid partials, then sum by code
//!
//! Scores follow [`DistanceMetric::score_from_raw`], so compressed and exact
//! scoring order results the same way.
//!
//! [`PqCompressionManager`] owns the codebook of one index. It is not
//! internally synchronized; the index serializes access.

use crate::distance::{dot_product, squared_euclidean, DistanceMetric};
use crate::error::{Error, Result};
use crate::index::disk::ByteReader;
use crate::index::hnsw::{search, ExactScorer, GraphView, NodeId, NodeScorer};
use crate::vector_values::{ListVectorValues, VectorValues};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::borrow::Cow;
use std::sync::Arc;

/// Centroids per subspace.
pub const PQ_CENTROIDS: usize = 256;

/// Minimum number of vectors before training is attempted.
pub const MIN_TRAINING_VECTORS: usize = PQ_CENTROIDS;

/// Below this dimension vectors are centered on a global mean first.
pub const GLOBAL_CENTERING_DIMENSION: usize = 64;

const KMEANS_ITERATIONS: usize = 12;
const TRAINING_SAMPLE_SIZE: usize = 16_384;
const KMEANS_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Trained product quantizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuantizer {
    dimension: usize,
    num_subspaces: usize,
    subspace_dim: usize,
    /// Per subspace: `PQ_CENTROIDS * subspace_dim` floats
    codebooks: Vec<Vec<f32>>,
    global_centroid: Option<Vec<f32>>,
    /// Per subspace: squared norm of each decoded sub-centroid
    centroid_norms: Vec<Vec<f32>>,
}

impl ProductQuantizer {
    /// Trains a quantizer on `samples`.
    ///
    /// # Errors
    ///
    /// Fails if `num_subspaces` does not divide the dimension or fewer than
    /// [`MIN_TRAINING_VECTORS`] samples are supplied.
    pub fn train(samples: &ListVectorValues, num_subspaces: usize) -> Result<Self> {
        let dimension = samples.dimension();
        if num_subspaces == 0 || dimension % num_subspaces != 0 {
            return Err(Error::Quantization(format!(
                "Dimension {dimension} not divisible by {num_subspaces} subspaces"
            )));
        }
        if samples.size() < MIN_TRAINING_VECTORS {
            return Err(Error::Quantization(format!(
                "Need at least {MIN_TRAINING_VECTORS} training vectors, got {}",
                samples.size()
            )));
        }

        let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
        let mut training: Vec<&[f32]> = samples
            .iter()
            .map(|v| &v[..])
            .filter(|v| v.len() == dimension)
            .collect();
        if training.len() > TRAINING_SAMPLE_SIZE {
            training.shuffle(&mut rng);
            training.truncate(TRAINING_SAMPLE_SIZE);
        }

        let global_centroid =
            (dimension < GLOBAL_CENTERING_DIMENSION).then(|| mean(&training, dimension));
        let centered: Vec<Vec<f32>> = training
            .iter()
            .map(|v| center(v, global_centroid.as_deref()))
            .collect();

        let subspace_dim = dimension / num_subspaces;
        let codebooks: Vec<Vec<f32>> = (0..num_subspaces)
            .into_par_iter()
            .map(|s| {
                let start = s * subspace_dim;
                let points: Vec<&[f32]> = centered
                    .iter()
                    .map(|v| &v[start..start + subspace_dim])
                    .collect();
                kmeans(
                    &points,
                    PQ_CENTROIDS,
                    subspace_dim,
                    KMEANS_ITERATIONS,
                    KMEANS_SEED ^ s as u64,
                )
            })
            .collect();

        tracing::debug!(
            dimension,
            num_subspaces,
            samples = training.len(),
            centered = global_centroid.is_some(),
            "PQ codebook trained"
        );
        Ok(Self::from_parts(
            dimension,
            num_subspaces,
            codebooks,
            global_centroid,
        ))
    }

    fn from_parts(
        dimension: usize,
        num_subspaces: usize,
        codebooks: Vec<Vec<f32>>,
        global_centroid: Option<Vec<f32>>,
    ) -> Self {
        let subspace_dim = dimension / num_subspaces;
        let centroid_norms = codebooks
            .iter()
            .enumerate()
            .map(|(s, book)| {
                let offset = global_centroid
                    .as_ref()
                    .map(|g| &g[s * subspace_dim..(s + 1) * subspace_dim]);
                book.chunks_exact(subspace_dim)
                    .map(|c| match offset {
                        Some(g) => c.iter().zip(g).map(|(x, y)| (x + y).powi(2)).sum(),
                        None => dot_product(c, c),
                    })
                    .collect()
            })
            .collect();
        Self {
            dimension,
            num_subspaces,
            subspace_dim,
            codebooks,
            global_centroid,
            centroid_norms,
        }
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of subspaces, which is also the code length in bytes.
    #[must_use]
    pub fn num_subspaces(&self) -> usize {
        self.num_subspaces
    }

    /// Returns true if vectors are centered before encoding.
    #[must_use]
    pub fn is_centered(&self) -> bool {
        self.global_centroid.is_some()
    }

    fn centroid(&self, subspace: usize, code: u8) -> &[f32] {
        let start = usize::from(code) * self.subspace_dim;
        &self.codebooks[subspace][start..start + self.subspace_dim]
    }

    /// Encodes a vector to one centroid id per subspace.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        debug_assert_eq!(vector.len(), self.dimension);
        let centered = center(vector, self.global_centroid.as_deref());
        centered
            .chunks_exact(self.subspace_dim)
            .enumerate()
            // Reason: at most PQ_CENTROIDS (256) centroids, ids fit in u8
            .map(|(s, sub)| nearest(&self.codebooks[s], sub, self.subspace_dim) as u8)
            .collect()
    }

    /// Reconstructs the approximate vector of a code.
    #[must_use]
    pub fn decode(&self, code: &[u8]) -> Vec<f32> {
        let mut out: Vec<f32> = code
            .iter()
            .enumerate()
            .flat_map(|(s, &c)| self.centroid(s, c).iter().copied())
            .collect();
        if let Some(g) = &self.global_centroid {
            for (x, y) in out.iter_mut().zip(g) {
                *x += y;
            }
        }
        out
    }

    /// Precomputes the per-subspace partial scores of `query`.
    #[must_use]
    pub fn lookup_table(&self, query: &[f32], metric: DistanceMetric) -> AdcTable {
        debug_assert_eq!(query.len(), self.dimension);
        let mut partials = Vec::with_capacity(self.num_subspaces * PQ_CENTROIDS);
        let mut bias = 0.0;

        match metric {
            DistanceMetric::Euclidean => {
                let centered = center(query, self.global_centroid.as_deref());
                for (s, sub) in centered.chunks_exact(self.subspace_dim).enumerate() {
                    partials.extend(
                        self.codebooks[s]
                            .chunks_exact(self.subspace_dim)
                            .map(|c| squared_euclidean(sub, c)),
                    );
                }
            }
            DistanceMetric::DotProduct | DistanceMetric::Cosine => {
                if let Some(g) = &self.global_centroid {
                    bias = dot_product(query, g);
                }
                for (s, sub) in query.chunks_exact(self.subspace_dim).enumerate() {
                    partials.extend(
                        self.codebooks[s]
                            .chunks_exact(self.subspace_dim)
                            .map(|c| dot_product(sub, c)),
                    );
                }
            }
        }

        AdcTable {
            metric,
            num_subspaces: self.num_subspaces,
            partials,
            norms: (metric == DistanceMetric::Cosine).then(|| self.centroid_norms.concat()),
            bias,
            query_norm: crate::distance::norm(query),
        }
    }

    /// Serializes the codebook.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Reason: dimensions and subspace counts are far below u32::MAX
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.num_subspaces as u32).to_le_bytes());
        bytes.push(u8::from(self.global_centroid.is_some()));
        if let Some(g) = &self.global_centroid {
            for v in g {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        for book in &self.codebooks {
            for v in book {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        bytes
    }

    /// Deserializes a codebook written by [`ProductQuantizer::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] on truncated or inconsistent input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let dimension = reader.read_u32()? as usize;
        let num_subspaces = reader.read_u32()? as usize;
        if num_subspaces == 0 || dimension == 0 || dimension % num_subspaces != 0 {
            return Err(Error::CorruptIndex(format!(
                "PQ codebook shape {dimension}/{num_subspaces} is invalid"
            )));
        }
        let global_centroid = match reader.read_u8()? {
            0 => None,
            _ => Some(reader.read_f32s(dimension)?),
        };
        let subspace_dim = dimension / num_subspaces;
        let codebooks = (0..num_subspaces)
            .map(|_| reader.read_f32s(PQ_CENTROIDS * subspace_dim))
            .collect::<Result<Vec<_>>>()?;
        if !reader.is_exhausted() {
            return Err(Error::CorruptIndex("Trailing bytes after PQ codebook".into()));
        }
        Ok(Self::from_parts(
            dimension,
            num_subspaces,
            codebooks,
            global_centroid,
        ))
    }
}

/// Query-specific lookup table for asymmetric distance computation.
#[derive(Debug, Clone)]
pub struct AdcTable {
    metric: DistanceMetric,
    num_subspaces: usize,
    partials: Vec<f32>,
    /// Cosine only: squared norms of decoded sub-centroids
    norms: Option<Vec<f32>>,
    bias: f32,
    query_norm: f32,
}

impl AdcTable {
    /// Similarity score of the vector encoded as `code`.
    ///
    /// Returns `None` if the code length does not match the quantizer.
    #[must_use]
    pub fn score(&self, code: &[u8]) -> Option<f32> {
        if code.len() != self.num_subspaces {
            return None;
        }
        let mut raw = 0.0_f32;
        let mut norm2 = 0.0_f32;
        for (s, &c) in code.iter().enumerate() {
            let idx = s * PQ_CENTROIDS + usize::from(c);
            raw += self.partials[idx];
            if let Some(norms) = &self.norms {
                norm2 += norms[idx];
            }
        }
        raw += self.bias;

        if self.metric == DistanceMetric::Cosine {
            let denom = self.query_norm * norm2.sqrt();
            raw = if denom == 0.0 || !denom.is_finite() {
                0.0
            } else {
                (raw / denom).clamp(-1.0, 1.0)
            };
        }
        Some(self.metric.score_from_raw(raw))
    }
}

/// Random access to the PQ codes of graph nodes.
pub trait PqCodes {
    /// Code of `node`, `None` if it has none.
    fn pq_code(&self, node: NodeId) -> Option<Cow<'_, [u8]>>;
}

/// Scores nodes through an [`AdcTable`].
pub struct AdcScorer<'a, C: ?Sized> {
    table: AdcTable,
    codes: &'a C,
}

impl<C: PqCodes + ?Sized> NodeScorer for AdcScorer<'_, C> {
    fn score(&self, node: NodeId) -> Option<f32> {
        self.codes.pq_code(node).and_then(|c| self.table.score(&c))
    }
}

/// Supplies every currently available vector for PQ training.
pub trait VectorSampleSource {
    /// Snapshot of the vectors to train on.
    fn sample_vectors(&self) -> ListVectorValues;
}

/// PQ state of one vector index.
#[derive(Debug)]
pub struct PqCompressionManager {
    dimension: usize,
    num_subspaces: usize,
    metric: DistanceMetric,
    quantizer: Option<Arc<ProductQuantizer>>,
}

impl PqCompressionManager {
    /// Creates an untrained manager.
    #[must_use]
    pub fn new(dimension: usize, num_subspaces: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            num_subspaces,
            metric,
            quantizer: None,
        }
    }

    /// Returns true once a codebook is available.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.quantizer.is_some()
    }

    /// The trained quantizer.
    #[must_use]
    pub fn quantizer(&self) -> Option<&Arc<ProductQuantizer>> {
        self.quantizer.as_ref()
    }

    /// Trains a codebook over every available vector unless already trained
    /// or fewer than [`MIN_TRAINING_VECTORS`] are available.
    ///
    /// Returns true if a codebook was trained by this call.
    ///
    /// # Errors
    ///
    /// Propagates training failures.
    pub fn train_if_needed(&mut self, source: &dyn VectorSampleSource) -> Result<bool> {
        if self.is_trained() {
            return Ok(false);
        }
        let samples = source.sample_vectors();
        if samples.size() < MIN_TRAINING_VECTORS {
            tracing::debug!(
                available = samples.size(),
                required = MIN_TRAINING_VECTORS,
                "Skipping PQ training"
            );
            return Ok(false);
        }
        let pq = ProductQuantizer::train(&samples, self.num_subspaces)?;
        tracing::info!(
            vectors = samples.size(),
            subspaces = self.num_subspaces,
            "PQ codebook trained"
        );
        self.quantizer = Some(Arc::new(pq));
        Ok(true)
    }

    /// Installs a codebook loaded with an on-disk graph.
    ///
    /// # Errors
    ///
    /// Fails if the codebook does not match this index's shape.
    pub fn mark_trained(&mut self, pq: ProductQuantizer) -> Result<()> {
        if pq.dimension() != self.dimension || pq.num_subspaces() != self.num_subspaces {
            return Err(Error::Quantization(format!(
                "Codebook shape {}/{} does not match index {}/{}",
                pq.dimension(),
                pq.num_subspaces(),
                self.dimension,
                self.num_subspaces
            )));
        }
        self.quantizer = Some(Arc::new(pq));
        Ok(())
    }

    /// Forgets the codebook.
    pub fn reset(&mut self) {
        self.quantizer = None;
    }

    /// Exact-vector graph search for `2k` candidates, rescored with the
    /// exact similarity, sorted by descending score and truncated to `k`.
    ///
    /// PQ codes never steer this traversal; see
    /// [`search_approximate`](Self::search_approximate) for that.
    pub fn search_with_rerank<G>(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        graph: &G,
        exact: &dyn VectorValues,
    ) -> Vec<(NodeId, f32)>
    where
        G: GraphView + ?Sized,
    {
        let candidate_count = k.saturating_mul(2);
        let ef = ef.max(candidate_count);
        let candidates = search(
            graph,
            &ExactScorer::new(query, self.metric, exact),
            candidate_count,
            ef,
        );

        let mut reranked: Vec<(NodeId, f32)> = candidates
            .into_iter()
            .filter_map(|(node, _)| {
                exact
                    .get_vector(node)
                    .map(|v| (node, self.metric.similarity(query, &v)))
            })
            .collect();
        reranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        reranked.truncate(k);
        reranked
    }

    /// Graph search scored through PQ codes only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Quantization`] if no codebook is trained.
    pub fn search_approximate<G, C>(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        graph: &G,
        codes: &C,
    ) -> Result<Vec<(NodeId, f32)>>
    where
        G: GraphView + ?Sized,
        C: PqCodes + ?Sized,
    {
        let pq = self
            .quantizer
            .as_ref()
            .ok_or_else(|| Error::Quantization("PQ codebook is not trained".into()))?;
        let scorer = AdcScorer {
            table: pq.lookup_table(query, self.metric),
            codes,
        };
        Ok(search(graph, &scorer, k, ef))
    }
}

/// PQ codes of the in-memory graph's nodes.
#[derive(Debug, Default)]
pub struct EncodedVectors {
    codes: FxHashMap<NodeId, Box<[u8]>>,
}

impl EncodedVectors {
    /// Encodes the vector of every ordinal in `nodes` that has one.
    #[must_use]
    pub fn encode_all(pq: &ProductQuantizer, values: &dyn VectorValues, nodes: &[NodeId]) -> Self {
        let codes = nodes
            .par_iter()
            .filter_map(|&node| {
                values
                    .get_vector(node)
                    .map(|v| (node, pq.encode(&v).into_boxed_slice()))
            })
            .collect();
        Self { codes }
    }

    /// Stores the code of `node`, replacing any previous one.
    pub fn insert(&mut self, node: NodeId, code: Vec<u8>) {
        self.codes.insert(node, code.into_boxed_slice());
    }

    /// Drops the code of `node`.
    pub fn remove(&mut self, node: NodeId) {
        self.codes.remove(&node);
    }

    /// Number of encoded nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns true if no node is encoded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Drops every code.
    pub fn clear(&mut self) {
        self.codes.clear();
    }
}

impl PqCodes for EncodedVectors {
    fn pq_code(&self, node: NodeId) -> Option<Cow<'_, [u8]>> {
        self.codes.get(&node).map(|c| Cow::Borrowed(&c[..]))
    }
}

fn mean(vectors: &[&[f32]], dimension: usize) -> Vec<f32> {
    let mut sum = vec![0.0_f32; dimension];
    for v in vectors {
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += x;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let n = vectors.len().max(1) as f32;
    sum.iter_mut().for_each(|s| *s /= n);
    sum
}

fn center(vector: &[f32], centroid: Option<&[f32]>) -> Vec<f32> {
    match centroid {
        Some(c) => vector.iter().zip(c).map(|(x, y)| x - y).collect(),
        None => vector.to_vec(),
    }
}

/// Index of the centroid in the flattened `book` closest to `point`.
fn nearest(book: &[f32], point: &[f32], dim: usize) -> usize {
    book.chunks_exact(dim)
        .enumerate()
        .map(|(i, c)| (i, squared_euclidean(point, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(i, _)| i)
}

/// Lloyd's k-means with seeded initialization; returns `k * dim` floats.
fn kmeans(points: &[&[f32]], k: usize, dim: usize, iterations: usize, seed: u64) -> Vec<f32> {
    let mut centroids = vec![0.0_f32; k * dim];
    if points.is_empty() {
        return centroids;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.shuffle(&mut rng);
    for (c, &i) in order.iter().cycle().take(k).enumerate() {
        centroids[c * dim..(c + 1) * dim].copy_from_slice(points[i]);
    }

    for _ in 0..iterations {
        let mut sums = vec![0.0_f32; k * dim];
        let mut counts = vec![0_usize; k];
        for p in points {
            let c = nearest(&centroids, p, dim);
            counts[c] += 1;
            for (s, x) in sums[c * dim..(c + 1) * dim].iter_mut().zip(p.iter()) {
                *s += x;
            }
        }
        for (c, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let n = count as f32;
            for (dst, s) in centroids[c * dim..(c + 1) * dim]
                .iter_mut()
                .zip(&sums[c * dim..(c + 1) * dim])
            {
                *dst = s / n;
            }
        }
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::hnsw::{HnswGraph, HnswParams};
    use crate::store::VectorRef;
    use proptest::prelude::*;

    fn generate_vectors(n: usize, dim: usize) -> Vec<VectorRef> {
        (0..n)
            .map(|i| {
                (0..dim)
                    .map(|j| ((i * dim + j) as f32 * 0.37).sin())
                    .collect::<Vec<f32>>()
                    .into()
            })
            .collect()
    }

    struct Samples(ListVectorValues);

    impl VectorSampleSource for Samples {
        fn sample_vectors(&self) -> ListVectorValues {
            self.0.clone()
        }
    }

    fn graph_over(values: &ListVectorValues, metric: DistanceMetric) -> HnswGraph {
        let mut graph = HnswGraph::new(HnswParams::default(), metric);
        for (i, v) in values.iter().enumerate() {
            graph.insert(i as NodeId, v, values);
        }
        graph
    }

    #[test]
    fn test_train_if_needed_skips_small_samples() {
        let values = ListVectorValues::new(generate_vectors(100, 16), 16);
        let mut manager = PqCompressionManager::new(16, 4, DistanceMetric::Euclidean);
        assert!(!manager.train_if_needed(&Samples(values)).unwrap());
        assert!(!manager.is_trained());
    }

    #[test]
    fn test_train_if_needed_trains_once() {
        let values = ListVectorValues::new(generate_vectors(300, 16), 16);
        let mut manager = PqCompressionManager::new(16, 4, DistanceMetric::Euclidean);
        assert!(manager.train_if_needed(&Samples(values.clone())).unwrap());
        assert!(!manager.train_if_needed(&Samples(values)).unwrap());

        let pq = manager.quantizer().unwrap();
        assert!(pq.is_centered(), "dimension 16 uses global centering");

        manager.reset();
        assert!(!manager.is_trained());
    }

    #[test]
    fn test_train_rejects_indivisible_subspaces() {
        let values = ListVectorValues::new(generate_vectors(300, 10), 10);
        assert!(matches!(
            ProductQuantizer::train(&values, 3),
            Err(Error::Quantization(_))
        ));
    }

    #[test]
    fn test_euclidean_table_matches_decoded_distance() {
        let vectors = generate_vectors(300, 16);
        let values = ListVectorValues::new(vectors.clone(), 16);
        let pq = ProductQuantizer::train(&values, 4).unwrap();

        let query = &vectors[3];
        let code = pq.encode(&vectors[10]);
        let table = pq.lookup_table(query, DistanceMetric::Euclidean);

        let expected = DistanceMetric::Euclidean.similarity(query, &pq.decode(&code));
        let actual = table.score(&code).unwrap();
        assert!((expected - actual).abs() < 1e-4, "{expected} vs {actual}");
    }

    #[test]
    fn test_cosine_table_matches_decoded_similarity() {
        let vectors = generate_vectors(300, 8);
        let values = ListVectorValues::new(vectors.clone(), 8);
        let pq = ProductQuantizer::train(&values, 2).unwrap();

        let code = pq.encode(&vectors[7]);
        let table = pq.lookup_table(&vectors[1], DistanceMetric::Cosine);
        let expected = DistanceMetric::Cosine.similarity(&vectors[1], &pq.decode(&code));
        assert!((expected - table.score(&code).unwrap()).abs() < 1e-4);
        assert!(table.score(&[0]).is_none());
    }

    #[test]
    fn test_codebook_bytes_reload() {
        let values = ListVectorValues::new(generate_vectors(300, 16), 16);
        let pq = ProductQuantizer::train(&values, 4).unwrap();
        let restored = ProductQuantizer::from_bytes(&pq.to_bytes()).unwrap();
        assert_eq!(restored, pq);

        let bytes = pq.to_bytes();
        assert!(ProductQuantizer::from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_mark_trained_checks_shape() {
        let values = ListVectorValues::new(generate_vectors(300, 16), 16);
        let pq = ProductQuantizer::train(&values, 4).unwrap();

        let mut wrong = PqCompressionManager::new(16, 8, DistanceMetric::Cosine);
        assert!(wrong.mark_trained(pq.clone()).is_err());

        let mut manager = PqCompressionManager::new(16, 4, DistanceMetric::Cosine);
        manager.mark_trained(pq).unwrap();
        assert!(manager.is_trained());
    }

    #[test]
    fn test_search_with_rerank_returns_k_sorted() {
        let values = ListVectorValues::new(generate_vectors(300, 16), 16);
        let graph = graph_over(&values, DistanceMetric::Cosine);
        let mut manager = PqCompressionManager::new(16, 4, DistanceMetric::Cosine);
        manager.train_if_needed(&Samples(values.clone())).unwrap();

        let query = values.get_vector(42).unwrap();
        let results = manager.search_with_rerank(&query, 5, 64, &graph, &values);
        assert_eq!(results.len(), 5);
        assert!(results.windows(2).all(|w| w[0].1 >= w[1].1));
        assert_eq!(results[0].0, 42);
    }

    #[test]
    fn test_rerank_matches_exact_search_when_trained() {
        let values = ListVectorValues::new(generate_vectors(400, 16), 16);
        let graph = graph_over(&values, DistanceMetric::Cosine);
        let mut manager = PqCompressionManager::new(16, 2, DistanceMetric::Cosine);
        manager.train_if_needed(&Samples(values.clone())).unwrap();
        assert!(manager.is_trained());

        for query in generate_vectors(420, 16).into_iter().skip(400) {
            let exact = search(
                &graph,
                &ExactScorer::new(&query, DistanceMetric::Cosine, &values),
                10,
                128,
            );
            let reranked = manager.search_with_rerank(&query, 10, 128, &graph, &values);
            let exact_ids: Vec<NodeId> = exact.iter().map(|(n, _)| *n).collect();
            let reranked_ids: Vec<NodeId> = reranked.iter().map(|(n, _)| *n).collect();
            assert_eq!(reranked_ids, exact_ids);
        }
    }

    #[test]
    fn test_search_approximate_uses_codes() {
        let values = ListVectorValues::new(generate_vectors(300, 16), 16);
        let graph = graph_over(&values, DistanceMetric::Euclidean);
        let mut manager = PqCompressionManager::new(16, 4, DistanceMetric::Euclidean);

        let query = values.get_vector(7).unwrap();
        let empty = EncodedVectors::default();
        assert!(manager
            .search_approximate(&query, 5, 64, &graph, &empty)
            .is_err());

        manager.train_if_needed(&Samples(values.clone())).unwrap();
        let pq = Arc::clone(manager.quantizer().unwrap());
        let nodes: Vec<NodeId> = (0..300).collect();
        let mut codes = EncodedVectors::encode_all(&pq, &values, &nodes);
        assert_eq!(codes.len(), 300);
        codes.remove(299);
        assert!(codes.pq_code(299).is_none());
        let results = manager
            .search_approximate(&query, 5, 64, &graph, &codes)
            .unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_kmeans_separates_clusters() {
        let a = [0.0_f32, 0.0];
        let b = [0.1_f32, 0.1];
        let c = [10.0_f32, 10.0];
        let d = [10.1_f32, 10.1];
        let points: Vec<&[f32]> = vec![&a, &b, &c, &d];
        let centroids = kmeans(&points, 2, 2, 10, 7);
        let near_zero: Vec<bool> = centroids.chunks_exact(2).map(|c| c[0] < 5.0).collect();
        assert_ne!(near_zero[0], near_zero[1]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_code_has_one_byte_per_subspace(
            query in prop::collection::vec(-1.0f32..1.0, 16)
        ) {
            let values = ListVectorValues::new(generate_vectors(260, 16), 16);
            let pq = ProductQuantizer::train(&values, 4).unwrap();
            let code = pq.encode(&query);
            prop_assert_eq!(code.len(), 4);
            prop_assert_eq!(pq.decode(&code).len(), 16);
        }
    }
}
