use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::error::{AinebError, AinebResult};

// --- Physics Types ---

/// Represents a single chemical element/species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub symbol: String,
    pub atomic_number: u8,
    pub mass: f64, // amu
}

impl Default for Species {
    fn default() -> Self {
        Self {
            symbol: "X".to_string(),
            atomic_number: 0,
            mass: 1.0,
        }
    }
}

/// A single atom instance in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub element_id: usize, // Index into the RunConfig.species list
    pub position: Point3<f64>,
    #[serde(default)]
    pub is_fixed: bool,
}

impl Atom {
    pub fn new(element_id: usize, position: Point3<f64>) -> Self {
        Self { element_id, position, is_fixed: false }
    }
}

/// Defines the Periodic Boundary Conditions (if any).
///
/// Only the cell vectors are stored on disk; the inverse is recomputed on
/// load, and a singular cell fails to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "CellVectors", try_from = "CellVectors")]
pub struct Lattice {
    pub vectors: Matrix3<f64>, // Columns are a, b, c
    pub inverse: Matrix3<f64>, // Precomputed for fractional conversion
}

#[derive(Serialize, Deserialize)]
struct CellVectors {
    vectors: Matrix3<f64>,
}

impl TryFrom<CellVectors> for Lattice {
    type Error = String;

    fn try_from(cell: CellVectors) -> Result<Self, Self::Error> {
        Self::from_matrix(cell.vectors).ok_or_else(|| "lattice vectors are singular".to_string())
    }
}

impl From<Lattice> for CellVectors {
    fn from(lattice: Lattice) -> Self {
        Self { vectors: lattice.vectors }
    }
}

impl Lattice {
    pub fn new(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Option<Self> {
        Self::from_matrix(Matrix3::from_columns(&[a, b, c]))
    }

    /// Columns of `vectors` are the cell vectors. `None` for a singular cell.
    pub fn from_matrix(vectors: Matrix3<f64>) -> Option<Self> {
        let inverse = vectors.try_inverse()?;
        Some(Self { vectors, inverse })
    }

    pub fn to_fractional(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.inverse * p.coords)
    }

    pub fn to_cartesian(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.vectors * p.coords)
    }
}

// --- The Core Entity ---

/// One point of the search space: a geometry plus optional single-point labels.
///
/// Labels (`energy`, `forces`) come either from the reference evaluator or are
/// absent. The gradient with respect to the coordinates is `-forces`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub atoms: Vec<Atom>,
    #[serde(default)]
    pub lattice: Option<Lattice>,

    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub forces: Option<Vec<Vector3<f64>>>,
}

impl Image {
    pub fn new(atoms: Vec<Atom>, lattice: Option<Lattice>) -> Self {
        Self { atoms, lattice, energy: None, forces: None }
    }

    /// Geometry-only copy; labels are discarded.
    pub fn unlabeled(&self) -> Self {
        Self {
            atoms: self.atoms.clone(),
            lattice: self.lattice.clone(),
            energy: None,
            forces: None,
        }
    }

    pub fn with_labels(mut self, energy: f64, forces: Vec<Vector3<f64>>) -> Self {
        self.energy = Some(energy);
        self.forces = Some(forces);
        self
    }

    pub fn is_labeled(&self) -> bool {
        match (&self.energy, &self.forces) {
            (Some(_), Some(f)) => f.len() == self.atoms.len(),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Positions as a flat `[x0, y0, z0, x1, ...]` vector.
    pub fn positions_flat(&self) -> Vec<f64> {
        self.atoms
            .iter()
            .flat_map(|a| [a.position.x, a.position.y, a.position.z])
            .collect()
    }

    /// Overwrites positions from a flat vector. Length must be `3 * len()`.
    pub fn set_positions_flat(&mut self, flat: &[f64]) {
        debug_assert_eq!(flat.len(), 3 * self.atoms.len());
        for (atom, xyz) in self.atoms.iter_mut().zip(flat.chunks_exact(3)) {
            atom.position = Point3::new(xyz[0], xyz[1], xyz[2]);
        }
    }

    /// Two images are compatible when they describe the same atoms in the same
    /// order under the same periodicity. Every comparison or interpolation
    /// between images requires this.
    pub fn check_compatible(&self, other: &Image) -> AinebResult<()> {
        if self.atoms.len() != other.atoms.len() {
            return Err(AinebError::Incompatible(format!(
                "atom count {} vs {}",
                self.atoms.len(),
                other.atoms.len()
            )));
        }
        if let Some(i) = self
            .atoms
            .iter()
            .zip(&other.atoms)
            .position(|(a, b)| a.element_id != b.element_id)
        {
            return Err(AinebError::Incompatible(format!(
                "element mismatch at atom {}: {} vs {}",
                i, self.atoms[i].element_id, other.atoms[i].element_id
            )));
        }
        if self.lattice.is_some() != other.lattice.is_some() {
            return Err(AinebError::Incompatible(
                "periodic and non-periodic images cannot be mixed".to_string(),
            ));
        }
        Ok(())
    }
}

// --- Training Data ---

/// Ordered, append-only collection of fully labeled images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingSet {
    images: Vec<Image>,
}

impl TrainingSet {
    pub fn new(images: Vec<Image>) -> AinebResult<Self> {
        let mut set = Self::default();
        set.extend_labeled(images)?;
        Ok(set)
    }

    /// Appends images, rejecting the whole batch if any image lacks labels.
    pub fn extend_labeled(&mut self, images: Vec<Image>) -> AinebResult<()> {
        if let Some(i) = images.iter().position(|img| !img.is_labeled()) {
            return Err(AinebError::Config(format!(
                "training image {} is missing energy/force labels",
                i
            )));
        }
        self.images.extend(images);
        Ok(())
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
