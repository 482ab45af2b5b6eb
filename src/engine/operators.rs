use anyhow::{Context, Result};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::core::config::BootstrapConfig;
use crate::core::domain::{Image, TrainingSet};
use crate::engine::evaluator::EvaluatorFactory;

/// Displaces every free atom by up to `max_dist` per Cartesian component.
/// Fixed atoms stay put; labels are discarded.
pub fn rattle<R: Rng + ?Sized>(image: &Image, max_dist: f64, rng: &mut R) -> Image {
    let mut c = image.unlabeled();
    if max_dist <= 0.0 {
        return c;
    }
    for atom in c.atoms.iter_mut().filter(|a| !a.is_fixed) {
        atom.position.x += rng.gen_range(-max_dist..max_dist);
        atom.position.y += rng.gen_range(-max_dist..max_dist);
        atom.position.z += rng.gen_range(-max_dist..max_dist);
    }
    c
}

/// Labels `image` with a fresh evaluator: forces first, the energy comes free.
pub fn label(image: &Image, factory: &dyn EvaluatorFactory) -> Result<Image> {
    let mut evaluator = factory.create();
    let forces = evaluator.forces(image)?;
    let energy = evaluator.energy(image)?;
    Ok(image.unlabeled().with_labels(energy, forces))
}

/// Synthesises a starting training set: both endpoints plus `copies` rattled
/// variants of each, all labeled by the reference evaluator.
pub fn bootstrap_training_set(
    initial: &Image,
    final_image: &Image,
    config: &BootstrapConfig,
    factory: &dyn EvaluatorFactory,
) -> Result<TrainingSet> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut images = Vec::with_capacity(2 * (config.copies + 1));

    for endpoint in [initial, final_image] {
        let labeled = if endpoint.is_labeled() {
            endpoint.clone()
        } else {
            label(endpoint, factory).context("labeling endpoint")?
        };
        images.push(labeled);

        for i in 0..config.copies {
            let trial = rattle(endpoint, config.rattle, &mut rng);
            images.push(label(&trial, factory).with_context(|| format!("labeling rattled copy {}", i))?);
        }
    }

    log::info!("Bootstrapped {} training images", images.len());
    Ok(TrainingSet::new(images)?)
}
