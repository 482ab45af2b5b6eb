use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use nalgebra::Vector3;
use regex::Regex;

use crate::core::domain::{Image, Species};
use crate::engine::evaluator::{Evaluator, EvaluatorFactory, ResultCache, SinglePoint};

const ENERGY_PATTERN: &str = r"(?i)total lattice energy\s*=\s*(\S+)\s*eV";

/// Single-point wrapper for GULP.
/// Streams input/output via pipes; nothing touches the disk.
pub struct GulpEvaluator {
    runner: GulpRunner,
    cache: ResultCache,
}

struct GulpRunner {
    executable: String,
    potential_parameters: String,
    species_map: Vec<Species>,
}

impl GulpEvaluator {
    /// Creates a new evaluator.
    ///
    /// # Arguments
    /// * `executable` - Path to GULP binary (e.g., "gulp").
    /// * `potential_parameters` - The potential block (buckingham, spring, etc.).
    /// * `species_map` - Ordered list of species corresponding to element_ids in Images.
    pub fn new(executable: &str, potential_parameters: &str, species_map: Vec<Species>) -> Self {
        Self {
            runner: GulpRunner {
                executable: executable.to_string(),
                potential_parameters: potential_parameters.to_string(),
                species_map,
            },
            cache: ResultCache::default(),
        }
    }

    fn calculate(&mut self, image: &Image) -> Result<&SinglePoint> {
        self.cache.get_or_compute(image, |img| self.runner.single_point(img))
    }
}

impl GulpRunner {
    /// Constructs the GULP input string for a gradient-only single point.
    fn generate_input(&self, image: &Image) -> Result<String> {
        let mut s = String::with_capacity(1024);

        // 1. Header Keywords
        s.push_str("gradients\n");

        // 2. Lattice Vectors (if periodic)
        if let Some(lat) = &image.lattice {
            s.push_str("vectors\n");
            let v = lat.vectors;
            // GULP reads vectors as rows
            s.push_str(&format!("{:.9} {:.9} {:.9}\n", v[(0, 0)], v[(1, 0)], v[(2, 0)]));
            s.push_str(&format!("{:.9} {:.9} {:.9}\n", v[(0, 1)], v[(1, 1)], v[(2, 1)]));
            s.push_str(&format!("{:.9} {:.9} {:.9}\n", v[(0, 2)], v[(1, 2)], v[(2, 2)]));
        }

        // 3. Coordinates (always Cartesian; GULP converts internally)
        s.push_str("cartesian\n");
        for atom in &image.atoms {
            let species = self
                .species_map
                .get(atom.element_id)
                .ok_or_else(|| anyhow!("Invalid element_id {}", atom.element_id))?;
            let p = atom.position;
            s.push_str(&format!("{:<3} core {:.9} {:.9} {:.9}\n", species.symbol, p.x, p.y, p.z));
        }

        // 4. Potentials
        s.push('\n');
        s.push_str(&self.potential_parameters);
        s.push('\n');

        Ok(s)
    }

    /// Executes GULP via stdin/stdout piping.
    fn run_process(&self, input_data: &str) -> Result<String> {
        let mut child = Command::new(&self.executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn GULP executable")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input_data.as_bytes())
                .context("Failed to write to GULP stdin")?;
        }

        let output = child.wait_with_output().context("Failed to read GULP output")?;

        if !output.status.success() {
            let err_msg = String::from_utf8_lossy(&output.stderr);
            bail!("GULP exited with error: {}", err_msg);
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn parse_energy(&self, output: &str) -> Result<f64> {
        let re = Regex::new(ENERGY_PATTERN)?;
        let caps = re
            .captures_iter(output)
            .last()
            .ok_or_else(|| anyhow!("Could not find total lattice energy in GULP output"))?;
        caps[1].parse::<f64>().context("Failed to parse energy float")
    }

    /// Parses the derivative table and returns forces (negative Cartesian gradient).
    fn parse_forces(&self, output: &str, image: &Image) -> Result<Vec<Vector3<f64>>> {
        let lines: Vec<&str> = output.lines().collect();
        let mut start_idx = None;
        let mut is_internal = false;

        // Find the LAST derivative table
        for (i, line) in lines.iter().enumerate().rev() {
            let lower = line.to_ascii_lowercase();
            if lower.contains("final cartesian derivatives") {
                start_idx = Some(i + 1);
                break;
            } else if lower.contains("final internal derivatives") {
                start_idx = Some(i + 1);
                is_internal = true;
                break;
            }
        }

        let start = start_idx.ok_or_else(|| anyhow!("No derivatives found in GULP output"))?;
        let expected_atoms = image.len();
        let mut forces = Vec::with_capacity(expected_atoms);
        let mut dashes = 0;

        for line in lines.into_iter().skip(start) {
            if forces.len() >= expected_atoms {
                break;
            }
            if line.trim_start().starts_with("----") {
                dashes += 1;
                if dashes > 2 {
                    break;
                }
                continue;
            }
            if dashes < 2 {
                continue; // Still inside the table header
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                continue;
            }

            // Skip shells if present (we only track cores)
            if parts[2].to_lowercase().starts_with('s') {
                continue;
            }

            let g = Vector3::new(
                parts[3].parse::<f64>().context("Bad derivative x")?,
                parts[4].parse::<f64>().context("Bad derivative y")?,
                parts[5].parse::<f64>().context("Bad derivative z")?,
            );

            let g_cart = match (&image.lattice, is_internal) {
                // dE/dr = inv(A)^T dE/ds
                (Some(lat), true) => lat.inverse.transpose() * g,
                (None, true) => bail!("GULP returned internal derivatives for a cluster"),
                (_, false) => g,
            };
            forces.push(-g_cart);
        }

        // STRICT VALIDATION
        if forces.len() != expected_atoms {
            bail!(
                "GULP atom count mismatch: expected {}, got {}",
                expected_atoms,
                forces.len()
            );
        }
        Ok(forces)
    }

    fn check_errors(&self, output: &str) -> Result<()> {
        if output.contains("Interatomic distance too small") {
            bail!("Geometric collapse");
        }
        if output.contains("Dump of error info") {
            bail!("Internal GULP error");
        }
        Ok(())
    }

    fn single_point(&self, image: &Image) -> Result<SinglePoint> {
        let input_str = self.generate_input(image)?;
        let output_str = self.run_process(&input_str)?;
        self.check_errors(&output_str)?;

        let energy = self.parse_energy(&output_str)?;
        let forces = self.parse_forces(&output_str, image)?;
        Ok(SinglePoint { energy, forces })
    }
}

impl Evaluator for GulpEvaluator {
    fn name(&self) -> &str {
        "GULP (Pipe)"
    }

    fn forces(&mut self, image: &Image) -> Result<Vec<Vector3<f64>>> {
        Ok(self.calculate(image)?.forces.clone())
    }

    fn energy(&mut self, image: &Image) -> Result<f64> {
        Ok(self.calculate(image)?.energy)
    }
}

/// Hands out one independent `GulpEvaluator` per call.
pub struct GulpFactory {
    pub executable: String,
    pub potentials: String,
    pub species: Vec<Species>,
}

impl EvaluatorFactory for GulpFactory {
    fn create(&self) -> Box<dyn Evaluator> {
        Box::new(GulpEvaluator::new(&self.executable, &self.potentials, self.species.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Atom;
    use nalgebra::Point3;

    const OUTPUT: &str = "
  Total lattice energy       =        -41.07613447 eV

  Final Cartesian derivatives :

--------------------------------------------------------------------------------
   No.  Atomic          x             y             z           Radius
        Label       (eV/Angs)     (eV/Angs)    (eV/Angs)      (eV/Angs)
--------------------------------------------------------------------------------
      1 Mg    c      -0.001000      0.002000      0.000000      0.000000
      2 O     c       0.001000     -0.002000      0.500000      0.000000
      3 O     s       9.000000      9.000000      9.000000      0.000000
--------------------------------------------------------------------------------
";

    fn runner() -> GulpRunner {
        GulpRunner {
            executable: "gulp".into(),
            potential_parameters: String::new(),
            species_map: vec![
                Species { symbol: "Mg".into(), ..Default::default() },
                Species { symbol: "O".into(), ..Default::default() },
            ],
        }
    }

    fn pair() -> Image {
        Image::new(
            vec![
                Atom::new(0, Point3::new(0.0, 0.0, 0.0)),
                Atom::new(1, Point3::new(2.1, 0.0, 0.0)),
            ],
            None,
        )
    }

    #[test]
    fn parses_energy_and_cartesian_forces() {
        let r = runner();
        assert_eq!(r.parse_energy(OUTPUT).unwrap(), -41.07613447);

        let forces = r.parse_forces(OUTPUT, &pair()).unwrap();
        assert_eq!(forces.len(), 2);
        assert_eq!(forces[0], Vector3::new(0.001, -0.002, 0.0));
        assert_eq!(forces[1], Vector3::new(-0.001, 0.002, -0.5));
    }

    #[test]
    fn rejects_short_derivative_table() {
        let mut image = pair();
        image.atoms.push(Atom::new(1, Point3::new(4.2, 0.0, 0.0)));
        assert!(runner().parse_forces(OUTPUT, &image).is_err());
    }

    #[test]
    fn input_lists_every_core() {
        let input = runner().generate_input(&pair()).unwrap();
        assert!(input.starts_with("gradients\n"));
        assert_eq!(input.lines().filter(|l| l.contains(" core ")).count(), 2);
    }
}
