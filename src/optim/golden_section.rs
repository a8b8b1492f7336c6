/// Minimises a unimodal function on `[lower, upper]` by golden-section search.
///
/// Returns the abscissa of the minimum. Stops when the bracket is narrower than
/// `tolerance` or after `max_iterations` bracket reductions.
pub fn golden_section_minimize<F>(
    objective: F,
    lower: f64,
    upper: f64,
    tolerance: f64,
    max_iterations: usize,
) -> f64
where
    F: Fn(f64) -> f64,
{
    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let eval = |x: f64| {
        let v = objective(x);
        if v.is_nan() {
            f64::INFINITY
        } else {
            v
        }
    };

    let (mut a, mut b) = (lower.min(upper), lower.max(upper));
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let mut fc = eval(c);
    let mut fd = eval(d);

    for _ in 0..max_iterations {
        if (b - a).abs() <= tolerance {
            break;
        }
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = eval(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = eval(d);
        }
    }
    (a + b) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_interior_minimum() {
        let x = golden_section_minimize(|x| (x - 0.37).powi(2), -1.0, 2.0, 1e-8, 200);
        assert!((x - 0.37).abs() < 1e-6);
    }

    #[test]
    fn test_boundary_minimum() {
        let x = golden_section_minimize(|x| x, -1.0, 2.0, 1e-8, 200);
        assert!((x + 1.0).abs() < 1e-6);
    }
}
