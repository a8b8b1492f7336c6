//! Derivative-free simplex minimiser with a hard iteration cap.
//!
//! All nonlinear fits in the crate (ETS smoothing parameters, ARIMA
//! coefficients, variogram parameters) go through this optimiser. Callers map
//! constrained parameters to an unconstrained space themselves; the objective may
//! return `f64::INFINITY` (or NaN, treated the same) to reject a point.

use log::debug;

/// Result of a minimisation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    /// Best point found.
    pub point: Vec<f64>,
    /// Objective value at `point`.
    pub value: f64,
    /// Iterations performed.
    pub iterations: usize,
    /// `false` when the iteration cap was hit before the tolerances were met.
    pub converged: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct NelderMead {
    max_iterations: usize,
    f_tolerance: f64,
    x_tolerance: f64,
    initial_step: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            f_tolerance: 1e-10,
            x_tolerance: 1e-8,
            initial_step: 0.1,
        }
    }
}

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

impl NelderMead {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Self::default()
        }
    }

    /// Size of the initial simplex edge, scaled by `max(|x_i|, 1)` per axis.
    pub fn with_initial_step(mut self, step: f64) -> Self {
        self.initial_step = step;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Minimises `objective` starting from `start`.
    pub fn minimize<F>(&self, objective: F, start: &[f64]) -> Minimum
    where
        F: Fn(&[f64]) -> f64,
    {
        let eval = |x: &[f64]| {
            let v = objective(x);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };

        let n = start.len();
        if n == 0 {
            return Minimum {
                point: Vec::new(),
                value: eval(start),
                iterations: 0,
                converged: true,
            };
        }

        let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
        simplex.push((start.to_vec(), eval(start)));
        for i in 0..n {
            let mut vertex = start.to_vec();
            vertex[i] += self.initial_step * vertex[i].abs().max(1.0);
            let value = eval(&vertex);
            simplex.push((vertex, value));
        }

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iterations {
            simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
            if self.has_converged(&simplex) {
                converged = true;
                break;
            }
            iterations += 1;

            let centroid = centroid(&simplex[..n]);
            let (worst, f_worst) = simplex[n].clone();
            let f_best = simplex[0].1;
            let f_second_worst = simplex[n - 1].1;

            let reflected = along(&centroid, &worst, -REFLECTION);
            let f_reflected = eval(&reflected);

            if f_reflected < f_best {
                let expanded = along(&centroid, &worst, -REFLECTION * EXPANSION);
                let f_expanded = eval(&expanded);
                simplex[n] = if f_expanded < f_reflected {
                    (expanded, f_expanded)
                } else {
                    (reflected, f_reflected)
                };
                continue;
            }
            if f_reflected < f_second_worst {
                simplex[n] = (reflected, f_reflected);
                continue;
            }

            let (contracted, accept) = if f_reflected < f_worst {
                let outside = along(&centroid, &worst, -REFLECTION * CONTRACTION);
                let f_outside = eval(&outside);
                (Some((outside, f_outside)), f_outside <= f_reflected)
            } else {
                let inside = along(&centroid, &worst, CONTRACTION);
                let f_inside = eval(&inside);
                (Some((inside, f_inside)), f_inside < f_worst)
            };
            if accept {
                if let Some(point) = contracted {
                    simplex[n] = point;
                    continue;
                }
            }

            let best = simplex[0].0.clone();
            for vertex in simplex.iter_mut().skip(1) {
                let shrunk: Vec<f64> = best
                    .iter()
                    .zip(&vertex.0)
                    .map(|(b, x)| b + SHRINK * (x - b))
                    .collect();
                let value = eval(&shrunk);
                *vertex = (shrunk, value);
            }
        }

        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (point, value) = simplex.swap_remove(0);
        if !converged {
            debug!(
                "Nelder-Mead stopped at the iteration cap ({}) with value {}",
                self.max_iterations, value
            );
        }
        Minimum {
            point,
            value,
            iterations,
            converged,
        }
    }

    fn has_converged(&self, sorted: &[(Vec<f64>, f64)]) -> bool {
        let f_best = sorted[0].1;
        let f_worst = sorted[sorted.len() - 1].1;
        if !f_best.is_finite() || !f_worst.is_finite() {
            return false;
        }
        let f_spread = (f_worst - f_best).abs();
        let x_spread = sorted[1..]
            .iter()
            .flat_map(|(x, _)| x.iter().zip(&sorted[0].0).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        f_spread <= self.f_tolerance * (f_best.abs() + self.f_tolerance) && x_spread <= self.x_tolerance
            || f_spread == 0.0 && x_spread <= self.x_tolerance.sqrt()
    }
}

fn centroid(vertices: &[(Vec<f64>, f64)]) -> Vec<f64> {
    let n = vertices.len() as f64;
    let dim = vertices[0].0.len();
    (0..dim)
        .map(|i| vertices.iter().map(|(x, _)| x[i]).sum::<f64>() / n)
        .collect()
}

/// `centroid + t * (point - centroid)`.
fn along(centroid: &[f64], point: &[f64], t: f64) -> Vec<f64> {
    centroid
        .iter()
        .zip(point)
        .map(|(c, p)| c + t * (p - c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimises_quadratic() {
        let result = NelderMead::default().minimize(
            |x| (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2) + 5.0,
            &[0.0, 0.0],
        );
        assert!(result.converged);
        assert!((result.point[0] - 3.0).abs() < 1e-4, "{:?}", result.point);
        assert!((result.point[1] + 1.0).abs() < 1e-4, "{:?}", result.point);
        assert!((result.value - 5.0).abs() < 1e-8);
    }

    #[test]
    fn test_minimises_rosenbrock() {
        let result = NelderMead::new(5000).minimize(
            |x| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2),
            &[-1.2, 1.0],
        );
        assert!((result.point[0] - 1.0).abs() < 1e-3, "{:?}", result.point);
        assert!((result.point[1] - 1.0).abs() < 1e-3, "{:?}", result.point);
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let result = NelderMead::new(3).minimize(
            |x| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2),
            &[-1.2, 1.0],
        );
        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
        assert!(result.value.is_finite());
    }

    #[test]
    fn test_infeasible_region_is_avoided() {
        // x must stay positive; the optimum of the unconstrained problem is at -2.
        let result = NelderMead::default().minimize(
            |x| {
                if x[0] <= 0.0 {
                    f64::INFINITY
                } else {
                    (x[0] + 2.0).powi(2)
                }
            },
            &[1.0],
        );
        assert!(result.point[0] > 0.0);
        assert!(result.point[0] < 1e-3);
    }
}
