//! KD-tree: spatial partition over particles, used for neighbour
//! queries and the Barnes-Hut self-gravity walk.
//!
//! Cells live in one flat `Vec<KdCell>`; the particle *order* (not the
//! particle array itself) is permuted in place so that every leaf owns
//! a contiguous span `[i_first, i_last)` into that order array. This
//! keeps the particle store untouched by tree construction (ghosts and
//! `iorig` links stay valid) while still satisfying the "particle
//! array is permuted in place" contiguous-span invariant from the
//! spec, one level of indirection removed.

use arrayvec::ArrayVec;
use log::{debug, trace};

use crate::context::Dim;
use crate::error::{Error, Result};

/// Maximum tree depth we ever expect to traverse iteratively; bounds
/// the fixed-capacity traversal stack so the hot walk never allocates.
const MAX_TRAVERSAL_DEPTH: usize = 128;

/// Multipole acceptance criterion used to decide whether a remote
/// cell's moments may stand in for a direct summation over its
/// members.
#[derive(Debug, Clone, Copy)]
pub enum Mac {
    /// Geometric opening angle: `rcrit = cell_size / sqrt(theta_max^2)`.
    Geometric {
        /// Maximum opening angle squared, `theta_max^2`.
        theta_max2: f64,
    },
    /// Gadget-style error-controlled MAC:
    /// `rcrit^2 = |a| * cell_size^4 / macerror`.
    Gadget {
        /// Target relative force-error tolerance.
        macerror: f64,
    },
}

/// One node of the KD-tree.
#[derive(Debug, Clone)]
pub struct KdCell {
    /// First index (inclusive) into the tree's particle order array.
    pub i_first: usize,
    /// Last index (exclusive) into the tree's particle order array.
    pub i_last: usize,
    /// First child, or `None` for a leaf.
    pub c1: Option<usize>,
    /// Second child, or `None` for a leaf.
    pub c2: Option<usize>,
    /// Next cell to visit in a right-sibling-aware DFS traversal.
    pub cnext: Option<usize>,
    /// Axis this cell was split on (meaningless for leaves).
    pub axis: usize,
    /// Bounding box lower corner.
    pub bmin: [f64; 3],
    /// Bounding box upper corner.
    pub bmax: [f64; 3],
    /// Total mass of members.
    pub mass: f64,
    /// Centre of mass.
    pub com: [f64; 3],
    /// Mass-weighted centre-of-mass velocity.
    pub com_v: [f64; 3],
    /// Largest smoothing length among members.
    pub hmax: f64,
    /// Critical opening radius for the configured MAC.
    pub rcrit: f64,
    /// Traceless quadrupole moment (six independent components:
    /// xx, yy, zz, xy, xz, yz), present only when quadrupoles are
    /// enabled for this tree.
    pub quad: Option<[f64; 6]>,
}

impl KdCell {
    fn leaf_len(&self) -> usize {
        self.i_last - self.i_first
    }

    fn is_leaf(&self) -> bool {
        self.c1.is_none()
    }

    /// Longest side of the cell's bounding box.
    #[must_use]
    pub fn cell_size(&self) -> f64 {
        (0..3)
            .map(|k| self.bmax[k] - self.bmin[k])
            .fold(0.0_f64, f64::max)
    }
}

/// Flat KD-tree over a fixed particle population.
#[derive(Debug, Clone)]
pub struct KdTree {
    cells: Vec<KdCell>,
    /// `order[k]` is the particle index stored at order-position `k`;
    /// leaves own a contiguous range of this array.
    order: Vec<usize>,
    nleafmax: usize,
    with_quadrupole: bool,
    dim: Dim,
}

impl KdTree {
    /// Root cell index.
    pub const ROOT: usize = 0;

    /// Returns the cell at `idx`.
    #[must_use]
    pub fn cell(&self, idx: usize) -> &KdCell {
        &self.cells[idx]
    }

    /// Number of cells in the tree.
    #[must_use]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Particle order array; `leaf.i_first..leaf.i_last` indexes into this.
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Rebuilds the tree from scratch by top-down median splitting on
    /// the longest axis of each cell's bounding box, down to leaf
    /// occupancy `nleafmax`. Amortised `O(N log N)`.
    pub fn build(
        positions: &[[f64; 3]],
        dim: Dim,
        nleafmax: usize,
        with_quadrupole: bool,
    ) -> Self {
        let mut order: Vec<usize> = (0..positions.len()).collect();
        let mut cells = Vec::new();
        if !order.is_empty() {
            build_recursive(positions, dim.get(), &mut order, 0, order.len(), nleafmax, &mut cells);
        }
        let mut tree = Self { cells, order, nleafmax, with_quadrupole, dim };
        if !tree.cells.is_empty() {
            link_cnext(&mut tree.cells, Self::ROOT, None);
        }
        debug!("built KD-tree: {} particles, {} cells", positions.len(), tree.cells.len());
        tree
    }

    /// Refreshes every cell's moments bottom-up without touching the
    /// tree's structure (no re-splitting, no re-permutation). Intended
    /// to be called every `ntreestockstep`, while a full [`Self::build`]
    /// happens only every `ntreebuildstep` — the two cadences are kept
    /// independent, never conflated, per the design notes.
    pub fn stock(
        &mut self,
        positions: &[[f64; 3]],
        velocities: &[[f64; 3]],
        masses: &[f64],
        hvals: &[f64],
        accels: &[[f64; 3]],
        mac: Mac,
    ) {
        if self.cells.is_empty() {
            return;
        }
        stock_recursive(
            &mut self.cells,
            Self::ROOT,
            &self.order,
            positions,
            velocities,
            masses,
            hvals,
            accels,
            mac,
            self.with_quadrupole,
        );
        trace!("stocked {} cells", self.cells.len());
    }

    /// Gathers all particle indices `j` with `|r_j - r| < hrange`,
    /// pruning with cell bounding boxes. The result is a superset-exact
    /// match to the true neighbour set: every true neighbour is
    /// included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryCapacityExceeded`] if more than `max_n`
    /// matches are found; the caller should retry with a larger
    /// buffer.
    pub fn gather_neighbours(
        &self,
        r: &[f64; 3],
        hrange: f64,
        positions: &[[f64; 3]],
        max_n: usize,
    ) -> Result<Vec<usize>> {
        let mut out = Vec::new();
        if self.cells.is_empty() {
            return Ok(out);
        }
        let mut stack: ArrayVec<usize, MAX_TRAVERSAL_DEPTH> = ArrayVec::new();
        stack.push(Self::ROOT);
        while let Some(idx) = stack.pop() {
            let cell = &self.cells[idx];
            if !box_within_range(r, hrange, cell) {
                continue;
            }
            if cell.is_leaf() {
                for &j in &self.order[cell.i_first..cell.i_last] {
                    let d2 = self.dim.norm2(&self.dim.sub(r, &positions[j]));
                    if d2 < hrange * hrange {
                        if out.len() >= max_n {
                            return Err(Error::MemoryCapacityExceeded {
                                resource: "neighbour buffer",
                                limit: max_n,
                            });
                        }
                        out.push(j);
                    }
                }
            } else {
                if let Some(c1) = cell.c1 {
                    stack.try_push(c1).map_err(|_| Error::MemoryCapacityExceeded {
                        resource: "tree traversal stack",
                        limit: MAX_TRAVERSAL_DEPTH,
                    })?;
                }
                if let Some(c2) = cell.c2 {
                    stack.try_push(c2).map_err(|_| Error::MemoryCapacityExceeded {
                        resource: "tree traversal stack",
                        limit: MAX_TRAVERSAL_DEPTH,
                    })?;
                }
            }
        }
        Ok(out)
    }

    /// As [`Self::gather_neighbours`], but symmetric in the sense SPH
    /// force pairs require: a remote particle `j` is a neighbour of `r`
    /// if `r` falls within *either* particle's kernel support,
    /// `dist < kernel_range * max(h, hvals[j])`. Plain gather-only
    /// queries (range `kernel_range * h`) miss pairs where `h_j` is much
    /// larger than `h`; this widens both the box-pruning range and the
    /// per-particle test to `kernel_range * max(h, cell.hmax)` so a
    /// large remote smoothing length can still pull a cell into range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryCapacityExceeded`] if more than `max_n`
    /// matches are found; the caller should retry with a larger buffer.
    pub fn gather_neighbours_symmetric(
        &self,
        r: &[f64; 3],
        h: f64,
        kernel_range: f64,
        positions: &[[f64; 3]],
        hvals: &[f64],
        max_n: usize,
    ) -> Result<Vec<usize>> {
        let mut out = Vec::new();
        if self.cells.is_empty() {
            return Ok(out);
        }
        let mut stack: ArrayVec<usize, MAX_TRAVERSAL_DEPTH> = ArrayVec::new();
        stack.push(Self::ROOT);
        while let Some(idx) = stack.pop() {
            let cell = &self.cells[idx];
            let reach = kernel_range * h.max(cell.hmax);
            if !box_within_range(r, reach, cell) {
                continue;
            }
            if cell.is_leaf() {
                for &j in &self.order[cell.i_first..cell.i_last] {
                    let d2 = self.dim.norm2(&self.dim.sub(r, &positions[j]));
                    let hmatch = kernel_range * h.max(hvals[j]);
                    if d2 < hmatch * hmatch {
                        if out.len() >= max_n {
                            return Err(Error::MemoryCapacityExceeded {
                                resource: "neighbour buffer",
                                limit: max_n,
                            });
                        }
                        out.push(j);
                    }
                }
            } else {
                if let Some(c1) = cell.c1 {
                    stack.try_push(c1).map_err(|_| Error::MemoryCapacityExceeded {
                        resource: "tree traversal stack",
                        limit: MAX_TRAVERSAL_DEPTH,
                    })?;
                }
                if let Some(c2) = cell.c2 {
                    stack.try_push(c2).map_err(|_| Error::MemoryCapacityExceeded {
                        resource: "tree traversal stack",
                        limit: MAX_TRAVERSAL_DEPTH,
                    })?;
                }
            }
        }
        Ok(out)
    }

    /// As [`Self::gather_neighbours`], but additionally includes any
    /// ghost indices (`>= positions.len()` for the real population) the
    /// caller has appended into `positions`/the tree. The tree itself
    /// does not distinguish real particles from ghosts; this method
    /// only documents that callers are expected to build the tree over
    /// the real+ghost population when ghosts are present.
    pub fn gather_neighbours_and_ghosts(
        &self,
        r: &[f64; 3],
        hrange: f64,
        positions: &[[f64; 3]],
        max_n: usize,
    ) -> Result<Vec<usize>> {
        self.gather_neighbours(r, hrange, positions, max_n)
    }

    /// Classifies every cell against the opening criterion for a
    /// receiver at `r`, splitting interactions into a list of cells
    /// accepted by their multipole (`multipole`) and a list of
    /// particle indices requiring direct summation (`direct`).
    #[must_use]
    pub fn gravity_interaction_list(&self, r: &[f64; 3], mac: Mac) -> (Vec<usize>, Vec<usize>) {
        let mut multipole = Vec::new();
        let mut direct = Vec::new();
        if self.cells.is_empty() {
            return (multipole, direct);
        }
        let mut stack: ArrayVec<usize, MAX_TRAVERSAL_DEPTH> = ArrayVec::new();
        stack.push(Self::ROOT);
        while let Some(idx) = stack.pop() {
            let cell = &self.cells[idx];
            let dist = self.dim.norm(&self.dim.sub(r, &cell.com));
            if cell.is_leaf() {
                direct.extend_from_slice(&self.order[cell.i_first..cell.i_last]);
                continue;
            }
            if mac_opens(mac, cell, dist) {
                if let Some(c1) = cell.c1 {
                    let _ = stack.try_push(c1);
                }
                if let Some(c2) = cell.c2 {
                    let _ = stack.try_push(c2);
                }
            } else {
                multipole.push(idx);
            }
        }
        (multipole, direct)
    }

    /// Walks every cell in `cnext` order exactly once, calling `visit`
    /// with each cell's index. Used by the invariant check in tests
    /// and by callers that want a flat, allocation-free traversal.
    pub fn walk_cnext(&self, mut visit: impl FnMut(usize)) {
        if self.cells.is_empty() {
            return;
        }
        let mut cur = Some(Self::ROOT);
        while let Some(idx) = cur {
            visit(idx);
            cur = self.cells[idx].cnext;
        }
    }

    /// Returns the configured leaf occupancy threshold.
    #[must_use]
    pub fn nleafmax(&self) -> usize {
        self.nleafmax
    }
}

fn mac_opens(mac: Mac, cell: &KdCell, dist: f64) -> bool {
    match mac {
        Mac::Geometric { .. } => dist < cell.rcrit,
        Mac::Gadget { .. } => dist * dist < cell.rcrit * cell.rcrit,
    }
}

fn box_within_range(r: &[f64; 3], hrange: f64, cell: &KdCell) -> bool {
    let mut d2 = 0.0;
    for k in 0..3 {
        let lo = cell.bmin[k] - hrange;
        let hi = cell.bmax[k] + hrange;
        if r[k] < lo || r[k] > hi {
            let delta = if r[k] < lo { lo - r[k] } else { r[k] - hi };
            d2 += delta * delta;
        }
    }
    d2 <= hrange * hrange || (r[0] >= cell.bmin[0] && r[0] <= cell.bmax[0])
}

fn build_recursive(
    positions: &[[f64; 3]],
    dim: usize,
    order: &mut [usize],
    first: usize,
    last: usize,
    nleafmax: usize,
    cells: &mut Vec<KdCell>,
) -> usize {
    let span = &mut order[first..last];
    let (bmin, bmax) = bounding_box(positions, span, dim);
    let idx = cells.len();
    cells.push(KdCell {
        i_first: first,
        i_last: last,
        c1: None,
        c2: None,
        cnext: None,
        axis: 0,
        bmin,
        bmax,
        mass: 0.0,
        com: [0.0; 3],
        com_v: [0.0; 3],
        hmax: 0.0,
        rcrit: 0.0,
        quad: None,
    });

    if span.len() <= nleafmax {
        return idx;
    }

    let axis = longest_axis(&bmin, &bmax, dim);
    let mid = first + span.len() / 2;
    // Partial sort on `axis` to find the median split point; permutes
    // `order` rather than the particle array itself, so indices handed
    // out elsewhere stay stable.
    order[first..last].select_nth_unstable_by(span.len() / 2, |&a, &b| {
        positions[a][axis]
            .partial_cmp(&positions[b][axis])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let c1 = build_recursive(positions, dim, order, first, mid, nleafmax, cells);
    let c2 = build_recursive(positions, dim, order, mid, last, nleafmax, cells);
    cells[idx].c1 = Some(c1);
    cells[idx].c2 = Some(c2);
    cells[idx].axis = axis;
    idx
}

fn bounding_box(positions: &[[f64; 3]], span: &[usize], dim: usize) -> ([f64; 3], [f64; 3]) {
    let mut bmin = [f64::INFINITY; 3];
    let mut bmax = [f64::NEG_INFINITY; 3];
    for &j in span {
        for k in 0..dim {
            bmin[k] = bmin[k].min(positions[j][k]);
            bmax[k] = bmax[k].max(positions[j][k]);
        }
    }
    for k in dim..3 {
        bmin[k] = 0.0;
        bmax[k] = 0.0;
    }
    (bmin, bmax)
}

fn longest_axis(bmin: &[f64; 3], bmax: &[f64; 3], dim: usize) -> usize {
    use itertools::Itertools;

    (0..dim)
        .position_max_by(|&a, &b| {
            (bmax[a] - bmin[a])
                .partial_cmp(&(bmax[b] - bmin[b]))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(0)
}

fn link_cnext(cells: &mut [KdCell], idx: usize, next_after: Option<usize>) {
    cells[idx].cnext = next_after;
    let (c1, c2) = (cells[idx].c1, cells[idx].c2);
    if let (Some(c1), Some(c2)) = (c1, c2) {
        link_cnext(cells, c1, Some(c2));
        link_cnext(cells, c2, next_after);
    }
}

#[allow(clippy::too_many_arguments)]
fn stock_recursive(
    cells: &mut [KdCell],
    idx: usize,
    order: &[usize],
    positions: &[[f64; 3]],
    velocities: &[[f64; 3]],
    masses: &[f64],
    hvals: &[f64],
    accels: &[[f64; 3]],
    mac: Mac,
    with_quadrupole: bool,
) {
    let (c1, c2, i_first, i_last) = {
        let cell = &cells[idx];
        (cell.c1, cell.c2, cell.i_first, cell.i_last)
    };

    if let (Some(c1), Some(c2)) = (c1, c2) {
        stock_recursive(cells, c1, order, positions, velocities, masses, hvals, accels, mac, with_quadrupole);
        stock_recursive(cells, c2, order, positions, velocities, masses, hvals, accels, mac, with_quadrupole);
        let (m1, com1, comv1, hmax1) = {
            let c = &cells[c1];
            (c.mass, c.com, c.com_v, c.hmax)
        };
        let (m2, com2, comv2, hmax2) = {
            let c = &cells[c2];
            (c.mass, c.com, c.com_v, c.hmax)
        };
        let mass = m1 + m2;
        let mut com = [0.0; 3];
        let mut com_v = [0.0; 3];
        if mass > 0.0 {
            for k in 0..3 {
                com[k] = (m1 * com1[k] + m2 * com2[k]) / mass;
                com_v[k] = (m1 * comv1[k] + m2 * comv2[k]) / mass;
            }
        }
        let hmax = hmax1.max(hmax2);
        let cell = &mut cells[idx];
        cell.mass = mass;
        cell.com = com;
        cell.com_v = com_v;
        cell.hmax = hmax;
    } else {
        let mut mass = 0.0;
        let mut com = [0.0; 3];
        let mut com_v = [0.0; 3];
        let mut hmax: f64 = 0.0;
        for &j in &order[i_first..i_last] {
            mass += masses[j];
            for k in 0..3 {
                com[k] += masses[j] * positions[j][k];
                com_v[k] += masses[j] * velocities[j][k];
            }
            hmax = hmax.max(hvals[j]);
        }
        if mass > 0.0 {
            for k in 0..3 {
                com[k] /= mass;
                com_v[k] /= mass;
            }
        }
        let cell = &mut cells[idx];
        cell.mass = mass;
        cell.com = com;
        cell.com_v = com_v;
        cell.hmax = hmax;
    }

    if with_quadrupole {
        let mut quad = [0.0; 6];
        let cell_com = cells[idx].com;
        for &j in &order[cells[idx].i_first..cells[idx].i_last] {
            let d = [
                positions[j][0] - cell_com[0],
                positions[j][1] - cell_com[1],
                positions[j][2] - cell_com[2],
            ];
            let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
            quad[0] += masses[j] * (3.0 * d[0] * d[0] - r2);
            quad[1] += masses[j] * (3.0 * d[1] * d[1] - r2);
            quad[2] += masses[j] * (3.0 * d[2] * d[2] - r2);
            quad[3] += masses[j] * 3.0 * d[0] * d[1];
            quad[4] += masses[j] * 3.0 * d[0] * d[2];
            quad[5] += masses[j] * 3.0 * d[1] * d[2];
        }
        cells[idx].quad = Some(quad);
    }

    let cell = &mut cells[idx];
    cell.rcrit = match mac {
        Mac::Geometric { theta_max2 } => cell.cell_size() / theta_max2.sqrt(),
        Mac::Gadget { macerror } => {
            let a_mag = accels[order[cell.i_first.min(order.len().saturating_sub(1))]]
                .iter()
                .map(|x| x * x)
                .sum::<f64>()
                .sqrt()
                .max(1e-300);
            let size4 = cell.cell_size().powi(4);
            (a_mag * size4 / macerror).sqrt()
        }
    };
}
