use nalgebra::Point3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use aineb::comm::{CollectiveChannel, ThreadGroup};
use aineb::core::config::SurrogateConfig;
use aineb::core::domain::{Atom, Image, TrainingSet};
use aineb::core::error::AinebError;
use aineb::engine::evaluator::{Evaluator, EvaluatorFactory};
use aineb::engine::operators;
use aineb::engine::surrogate::{self, ModelStore, PairFactory, PairSurrogate, Surrogate, SurrogateFactory};

use crate::common::*;

mod common;

fn random_trimer(rng: &mut ChaCha8Rng) -> Image {
    let atoms = vec![
        Atom::new(0, Point3::new(0.0, 0.0, 0.0)),
        Atom::new(0, Point3::new(rng.gen_range(1.0..2.0), 0.0, 0.0)),
        Atom::new(1, Point3::new(rng.gen_range(0.0..1.5), rng.gen_range(1.0..2.2), rng.gen_range(-0.5..0.5))),
    ];
    Image::new(atoms, None)
}

fn known_model() -> PairSurrogate {
    let mut model = PairSurrogate::new(2, 4, 4.0);
    // eps_0, eps_1, then 3 pair types x 4 basis functions
    model.coefficients = vec![
        -1.5, -2.0, //
        3.0, -1.0, 0.2, 0.05, //
        2.0, -0.5, 0.1, 0.0, //
        4.0, -2.0, 0.3, -0.1,
    ];
    model
}

#[test]
fn test_lennard_jones_forces_are_negative_gradient() {
    let mut evaluator = lj().create();
    let image = hop_image(0.7);
    let forces = evaluator.forces(&image).unwrap();

    let h = 1e-6;
    let mut x = image.positions_flat();
    for k in 0..x.len() {
        let orig = x[k];
        let mut probe = image.clone();
        x[k] = orig + h;
        probe.set_positions_flat(&x);
        let e_plus = lj().compute(&probe).unwrap().energy;
        x[k] = orig - h;
        probe.set_positions_flat(&x);
        let e_minus = lj().compute(&probe).unwrap().energy;
        x[k] = orig;

        let numeric = -(e_plus - e_minus) / (2.0 * h);
        assert!((numeric - forces[k / 3][k % 3]).abs() < 1e-5, "component {}", k);
    }
}

#[test]
fn test_evaluator_caches_last_geometry_only() {
    let mut evaluator = lj().create();
    let a = hop_image(0.7);
    let b = hop_image(-0.2);

    evaluator.forces(&a).unwrap();
    let e_a = evaluator.energy(&a).unwrap();
    let e_b = evaluator.energy(&b).unwrap();

    assert_eq!(e_a, lj().compute(&a).unwrap().energy);
    assert_eq!(e_b, lj().compute(&b).unwrap().energy);
    assert_ne!(e_a, e_b);
}

#[test]
fn test_rattle_moves_only_free_atoms() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let image = labeled(&hop_image(0.5));
    let moved = operators::rattle(&image, 0.1, &mut rng);

    assert!(!moved.is_labeled());
    assert_eq!(moved.atoms[0].position, image.atoms[0].position);
    assert_eq!(moved.atoms[1].position, image.atoms[1].position);
    assert_ne!(moved.atoms[2].position, image.atoms[2].position);
    assert!((moved.atoms[2].position - image.atoms[2].position).amax() <= 0.1);
}

#[test]
fn test_pair_surrogate_recovers_known_model() {
    let truth = known_model();
    let mut rng = ChaCha8Rng::seed_from_u64(11);

    let images: Vec<Image> = (0..12)
        .map(|_| {
            let img = random_trimer(&mut rng);
            let sp = truth.predict(&img).unwrap();
            img.with_labels(sp.energy, sp.forces)
        })
        .collect();
    let set = TrainingSet::new(images).unwrap();

    let factory = PairFactory::new(
        2,
        SurrogateConfig {
            num_basis: 4,
            cutoff: 4.0,
            ridge: 1e-14,
            ..Default::default()
        },
    );
    let model = factory.train(&set).unwrap();

    for _ in 0..5 {
        let probe = random_trimer(&mut rng);
        let expected = truth.predict(&probe).unwrap();
        let got = model.predict(&probe).unwrap();
        assert!((expected.energy - got.energy).abs() < 1e-5);
        for (e, g) in expected.forces.iter().zip(&got.forces) {
            assert!((e - g).amax() < 1e-5);
        }
    }
}

#[test]
fn test_training_on_empty_set_fails() {
    let factory = PairFactory::new(1, SurrogateConfig::default());
    assert!(factory.train(&TrainingSet::default()).is_err());
}

#[test]
fn test_model_store_overwrites_single_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let store = ModelStore::new(dir.path(), "ainebmodel");
    let factory = PairFactory::new(
        1,
        SurrogateConfig {
            num_basis: 3,
            cutoff: 3.0,
            ..Default::default()
        },
    );
    let (initial, final_image) = endpoints();

    let first = store
        .train_and_publish(&factory, &TrainingSet::new(vec![initial.clone()]).unwrap())
        .unwrap();
    let second = store
        .train_and_publish(&factory, &TrainingSet::new(vec![initial, final_image.clone()]).unwrap())
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second.artifact, dir.path().join("ainebmodel.json"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    // The artifact holds the latest model
    let direct = factory
        .train(&TrainingSet::new(vec![endpoints().0, final_image.clone()]).unwrap())
        .unwrap();
    let loaded = surrogate::load(&factory, &second).unwrap();
    assert_eq!(
        loaded.predict(&final_image).unwrap(),
        direct.predict(&final_image).unwrap()
    );
}

#[test]
fn test_every_rank_loads_the_same_model() {
    let dir = tempfile::tempdir().unwrap();
    let store = ModelStore::new(dir.path(), "shared");
    let factory = PairFactory::new(1, SurrogateConfig::default());
    let inputs = inputs();
    let probe = hop_image(0.25);

    let energies = ThreadGroup::run(3, TIMEOUT, |channel| {
        let trained = channel.is_coordinator().then(|| {
            store
                .train_and_publish(&factory, &inputs.training_set)
                .map_err(|e| AinebError::Training {
                    iteration: 0,
                    message: format!("{:#}", e),
                })
        });
        let model = surrogate::distribute(&channel, trained, &factory, 0)?;
        model.predict(&probe).map(|sp| sp.energy).map_err(|e| AinebError::Surrogate {
            iteration: 0,
            message: format!("{:#}", e),
        })
    })
    .unwrap();

    let energies: Vec<f64> = energies.into_iter().map(|r| r.unwrap()).collect();
    assert!(energies.iter().all(|&e| e == energies[0]));
}
