use serde::{Deserialize, Serialize};

use crate::core::domain::Image;
use crate::core::error::{AinebError, AinebResult};

/// An ordered band of images between two fixed endpoints.
///
/// Index `0` and `len() - 1` are the endpoints; everything in between is an
/// interior image owned by exactly one rank while the band is being relaxed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    images: Vec<Image>,
}

impl Band {
    /// Assembles a band, checking every image against the initial endpoint.
    pub fn from_parts(initial: Image, interior: Vec<Image>, final_image: Image) -> AinebResult<Self> {
        initial.check_compatible(&final_image)?;
        for img in &interior {
            initial.check_compatible(img)?;
        }
        let mut images = Vec::with_capacity(interior.len() + 2);
        images.push(initial);
        images.extend(interior);
        images.push(final_image);
        Ok(Self { images })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Number of interior images (`len() - 2`).
    pub fn num_interior(&self) -> usize {
        self.images.len().saturating_sub(2)
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn initial(&self) -> &Image {
        &self.images[0]
    }

    pub fn final_image(&self) -> &Image {
        &self.images[self.images.len() - 1]
    }

    pub fn interior(&self) -> &[Image] {
        let n = self.images.len();
        &self.images[1..n - 1]
    }

    pub fn interior_mut(&mut self) -> &mut [Image] {
        let n = self.images.len();
        &mut self.images[1..n - 1]
    }

    /// Replaces the interior, keeping both endpoints untouched.
    pub fn replace_interior(&mut self, interior: Vec<Image>) -> AinebResult<()> {
        if interior.len() != self.num_interior() {
            return Err(AinebError::Config(format!(
                "expected {} interior images, got {}",
                self.num_interior(),
                interior.len()
            )));
        }
        for img in &interior {
            self.images[0].check_compatible(img)?;
        }
        let n = self.images.len();
        self.images.splice(1..n - 1, interior);
        Ok(())
    }

    pub fn into_images(self) -> Vec<Image> {
        self.images
    }
}

/// Builds the naive seed band: `n` geometry-only copies of the initial image.
/// Geometric interpolation is applied later by the band optimizer.
pub fn initialize(initial: &Image, final_image: &Image, n: usize) -> AinebResult<Band> {
    initial.check_compatible(final_image)?;
    let interior = (0..n).map(|_| initial.unlabeled()).collect();
    Band::from_parts(initial.clone(), interior, final_image.clone())
}
