use std::path::Path;

use crate::core::error::{Error, Result};
use crate::mmap::mmap_file::MmapFile;

/// Binary tree keyed by cosine angle (§4.5). Each node owns an embedding
/// vector and accumulates doc-ids whose vector merged into it; insertion
/// descends left/right by comparing the cosine angle between the inserted
/// vector and the node's vector against two thresholds.
struct VectorNode {
    vector: Vec<f32>,
    docs: Vec<u64>,
    postings_offset: Option<u64>,
    left: Option<u32>,
    right: Option<u32>,
}

pub struct VectorTree {
    nodes: Vec<VectorNode>,
    root: Option<u32>,
    /// Angle at or above which an inserted vector is considered the same
    /// term as the visited node and merged into it rather than branched.
    identical_angle: f64,
    /// Angle at or above which (but below `identical_angle`) the walk
    /// descends into a child rather than branching to the sibling side.
    fold_angle: f64,
}

impl VectorTree {
    pub fn new(identical_angle: f64, fold_angle: f64) -> Self {
        VectorTree {
            nodes: Vec::new(),
            root: None,
            identical_angle,
            fold_angle,
        }
    }

    pub fn insert(&mut self, vector: Vec<f32>, doc_id: u64) {
        let Some(mut cursor) = self.root else {
            let idx = self.push_node(vector, doc_id);
            self.root = Some(idx);
            return;
        };

        loop {
            let angle = cosine_angle(&vector, &self.nodes[cursor as usize].vector);

            if angle >= self.identical_angle {
                self.nodes[cursor as usize].docs.push(doc_id);
                return;
            }

            if angle >= self.fold_angle {
                let slot = if angle >= 0.0 {
                    self.nodes[cursor as usize].left
                } else {
                    self.nodes[cursor as usize].right
                };
                match slot {
                    Some(next) => cursor = next,
                    None => {
                        let idx = self.push_node(vector, doc_id);
                        if angle >= 0.0 {
                            self.nodes[cursor as usize].left = Some(idx);
                        } else {
                            self.nodes[cursor as usize].right = Some(idx);
                        }
                        return;
                    }
                }
            } else {
                let slot = if angle >= 0.0 {
                    self.nodes[cursor as usize].right
                } else {
                    self.nodes[cursor as usize].left
                };
                match slot {
                    Some(next) => cursor = next,
                    None => {
                        let idx = self.push_node(vector, doc_id);
                        if angle >= 0.0 {
                            self.nodes[cursor as usize].right = Some(idx);
                        } else {
                            self.nodes[cursor as usize].left = Some(idx);
                        }
                        return;
                    }
                }
            }
        }
    }

    fn push_node(&mut self, vector: Vec<f32>, doc_id: u64) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(VectorNode {
            vector,
            docs: vec![doc_id],
            postings_offset: None,
            left: None,
            right: None,
        });
        idx
    }

    /// Descends the tree toward `query`, remembering the best (largest)
    /// angle visited, and returns the doc-ids at that node plus its angle
    /// as the match score.
    pub fn closest_match(&self, query: &[f32]) -> Option<(&[u64], f64)> {
        let mut cursor = self.root?;
        let mut best_idx = cursor;
        let mut best_angle = cosine_angle(query, &self.nodes[cursor as usize].vector);

        loop {
            let angle = cosine_angle(query, &self.nodes[cursor as usize].vector);
            if angle > best_angle {
                best_angle = angle;
                best_idx = cursor;
            }
            if angle >= self.identical_angle {
                break;
            }
            let next = if angle >= self.fold_angle {
                if angle >= 0.0 {
                    self.nodes[cursor as usize].left
                } else {
                    self.nodes[cursor as usize].right
                }
            } else if angle >= 0.0 {
                self.nodes[cursor as usize].right
            } else {
                self.nodes[cursor as usize].left
            };
            match next {
                Some(n) => cursor = n,
                None => break,
            }
        }

        Some((&self.nodes[best_idx as usize].docs, best_angle))
    }

    /// Serializes as a preorder stream of
    /// `(vector-offset, vector-len, postings-address, has-left, has-right)`
    /// records; the vectors themselves are appended to `vec_path` and
    /// referenced by byte offset, keeping the index file itself small.
    pub fn write_to(&self, index_path: impl AsRef<Path>, vec_path: impl AsRef<Path>) -> Result<()> {
        let mut vec_buf = Vec::new();
        let mut index_buf = Vec::new();
        match self.root {
            Some(root) => {
                index_buf.push(1);
                self.encode_node(root, &mut index_buf, &mut vec_buf);
            }
            None => index_buf.push(0),
        }
        std::fs::write(vec_path, vec_buf)?;
        std::fs::write(index_path, index_buf)?;
        Ok(())
    }

    fn encode_node(&self, idx: u32, index_buf: &mut Vec<u8>, vec_buf: &mut Vec<u8>) {
        let n = &self.nodes[idx as usize];

        let vec_offset = vec_buf.len() as u64;
        for component in &n.vector {
            vec_buf.extend_from_slice(&component.to_be_bytes());
        }
        index_buf.extend_from_slice(&vec_offset.to_be_bytes());
        index_buf.extend_from_slice(&(n.vector.len() as u32).to_be_bytes());

        let postings_offset = n.postings_offset.unwrap_or(u64::MAX);
        index_buf.extend_from_slice(&postings_offset.to_be_bytes());

        let flags = (n.left.is_some() as u8) | ((n.right.is_some() as u8) << 1);
        index_buf.push(flags);

        if let Some(left) = n.left {
            self.encode_node(left, index_buf, vec_buf);
        }
        if let Some(right) = n.right {
            self.encode_node(right, index_buf, vec_buf);
        }
    }

    pub fn read_from(index_path: impl AsRef<Path>, vec_path: impl AsRef<Path>, identical_angle: f64, fold_angle: f64) -> Result<Self> {
        let index_bytes = std::fs::read(index_path)?;
        let vectors = MmapFile::open_read_only(vec_path)?;

        let mut tree = VectorTree::new(identical_angle, fold_angle);
        if index_bytes.is_empty() || index_bytes[0] == 0 {
            return Ok(tree);
        }

        let mut pos = 1usize;
        let root = tree.decode_node(&index_bytes, &mut pos, vectors.data())?;
        tree.root = Some(root);
        Ok(tree)
    }

    fn decode_node(&mut self, buf: &[u8], pos: &mut usize, vec_data: &[u8]) -> Result<u32> {
        const HEADER_LEN: usize = 8 + 4 + 8 + 1;
        if *pos + HEADER_LEN > buf.len() {
            return Err(Error::DataMisaligned("truncated vector tree node".into()));
        }
        let vec_offset = u64::from_be_bytes(buf[*pos..*pos + 8].try_into().unwrap()) as usize;
        let vec_len = u32::from_be_bytes(buf[*pos + 8..*pos + 12].try_into().unwrap()) as usize;
        let postings_raw = u64::from_be_bytes(buf[*pos + 12..*pos + 20].try_into().unwrap());
        let flags = buf[*pos + 20];
        *pos += HEADER_LEN;

        let byte_len = vec_len * 4;
        let slice = vec_data
            .get(vec_offset..vec_offset + byte_len)
            .ok_or_else(|| Error::DataMisaligned("vector offset out of range".into()))?;
        let mut vector = Vec::with_capacity(vec_len);
        for chunk in slice.chunks_exact(4) {
            vector.push(f32::from_be_bytes(chunk.try_into().unwrap()));
        }

        let idx = self.nodes.len() as u32;
        self.nodes.push(VectorNode {
            vector,
            docs: Vec::new(),
            postings_offset: if postings_raw == u64::MAX { None } else { Some(postings_raw) },
            left: None,
            right: None,
        });

        if flags & 0b01 != 0 {
            let left = self.decode_node(buf, pos, vec_data)?;
            self.nodes[idx as usize].left = Some(left);
        }
        if flags & 0b10 != 0 {
            let right = self.decode_node(buf, pos, vec_data)?;
            self.nodes[idx as usize].right = Some(right);
        }
        Ok(idx)
    }

    pub fn set_postings_offset(&mut self, node_idx: u32, offset: u64) {
        self.nodes[node_idx as usize].postings_offset = Some(offset);
    }

    /// Number of nodes currently in the tree (used by the write session to
    /// know whether a flush has anything to persist).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Persists every node's accumulated doc-ids by calling `write` with
    /// the slice and recording the returned postings offset back onto the
    /// node, per §4.10's "post each term's postings ... record the returned
    /// addresses into the tree nodes". `write` is typically a closure over
    /// the write session's postings store.
    pub fn flush_postings<E>(&mut self, mut write: impl FnMut(&[u64]) -> std::result::Result<u64, E>) -> std::result::Result<(), E> {
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].docs.is_empty() {
                continue;
            }
            let offset = write(&self.nodes[idx].docs)?;
            self.nodes[idx].postings_offset = Some(offset);
        }
        Ok(())
    }
}

/// Cosine of the angle between two vectors of equal length. Zero vectors
/// yield `0.0` (orthogonal convention) rather than dividing by zero.
fn cosine_angle(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
