//! Dense log-semiring product: forward, first- and second-order rules
//!
//! References are written independently of the crate: the forward pass
//! materialises the full `(batch, n, m, p)` sum grid, the first-order rule
//! materialises the softmax tensor and the second-order rule is checked
//! against central finite differences of the first-order rule.

mod common;

use common::{
    assert_allclose_f64, central_difference, dot, reference_grads, reference_log_matmul,
    seeded_rng, uniform,
};
use logbmm::error::Error;
use logbmm::ops::{log_matmul, log_matmul_backward, log_matmul_double_backward};
use logbmm::tensor::Tensor;

const NEG_INF: f64 = f64::NEG_INFINITY;

// ============================================================================
// Forward
// ============================================================================

#[test]
fn test_forward_matches_broadcast_reference() {
    let mut rng = seeded_rng(7);
    let a = uniform(&mut rng, &[3, 8, 8], 3.0);
    let b = uniform(&mut rng, &[3, 8, 8], 3.0);

    let c = log_matmul(&a, &b).unwrap();
    assert_eq!(c.shape(), &[3, 8, 8]);
    assert_allclose_f64(c.as_slice(), &reference_log_matmul(&a, &b), 0.0, 1e-6, "forward");
}

#[test]
fn test_forward_unit_interval_inputs() {
    let mut rng = seeded_rng(13);
    let a = Tensor::rand_with(&[3, 8, 8], &mut rng);
    let b = Tensor::rand_with(&[3, 8, 8], &mut rng);

    let c = log_matmul(&a, &b).unwrap();
    assert_allclose_f64(c.as_slice(), &reference_log_matmul(&a, &b), 0.0, 1e-6, "forward");
}

#[test]
fn test_forward_non_square() {
    let mut rng = seeded_rng(11);
    let a = uniform(&mut rng, &[2, 3, 5], 1.0);
    let b = uniform(&mut rng, &[2, 5, 4], 1.0);

    let c = log_matmul(&a, &b).unwrap();
    assert_eq!(c.shape(), &[2, 3, 4]);
    assert_allclose_f64(c.as_slice(), &reference_log_matmul(&a, &b), 1e-12, 1e-12, "forward");
}

#[test]
fn test_forward_large_magnitudes_stay_finite() {
    // exp(900) overflows f64; the max-shifted reduction must not
    let a = Tensor::from_slice(&[900.0, 901.0, -900.0, -901.0], &[1, 2, 2]);
    let b = Tensor::from_slice(&[0.0, 1.0, 2.0, 3.0], &[1, 2, 2]);

    let c = log_matmul(&a, &b).unwrap();
    assert!(c.as_slice().iter().all(|v| v.is_finite()));
    assert_allclose_f64(c.as_slice(), &reference_log_matmul(&a, &b), 1e-12, 0.0, "large");
}

#[test]
fn test_neutral_element_is_absorbed() {
    // Row 1 of A is entirely -inf, column 0 of B is entirely -inf
    let a = Tensor::from_slice(&[0.5, -0.5, NEG_INF, NEG_INF], &[1, 2, 2]);
    let b = Tensor::from_slice(&[NEG_INF, 1.0, NEG_INF, 2.0], &[1, 2, 2]);

    let c = log_matmul(&a, &b).unwrap();
    let c = c.to_vec();
    assert_eq!(c[0], NEG_INF);
    assert_eq!(c[2], NEG_INF);
    assert_eq!(c[3], NEG_INF);
    assert!(c[1].is_finite());

    let (grad_a, grad_b) = log_matmul_backward(
        &a,
        &b,
        &log_matmul(&a, &b).unwrap(),
        &Tensor::ones(&[1, 2, 2]),
    )
    .unwrap();
    assert!(grad_a.as_slice().iter().all(|v| v.is_finite()));
    assert!(grad_b.as_slice().iter().all(|v| v.is_finite()));
    assert_eq!(&grad_a.as_slice()[2..], &[0.0, 0.0]);
    assert_eq!(grad_b.as_slice()[0], 0.0);
    assert_eq!(grad_b.as_slice()[2], 0.0);

    // An operand made only of the semiring zero annihilates the product
    let zero = Tensor::neg_inf(&[1, 2, 2]);
    let c = log_matmul(&zero, &b).unwrap();
    assert!(c.as_slice().iter().all(|&v| v == NEG_INF));
    let (grad_zero, grad_b) =
        log_matmul_backward(&zero, &b, &c, &Tensor::ones(&[1, 2, 2])).unwrap();
    assert!(grad_zero.as_slice().iter().all(|&v| v == 0.0));
    assert!(grad_b.as_slice().iter().all(|&v| v == 0.0));
}

#[test]
fn test_shape_errors() {
    let a = Tensor::zeros(&[2, 3, 4]);
    assert!(matches!(
        log_matmul(&a, &Tensor::zeros(&[2, 5, 4])),
        Err(Error::ShapeMismatch { .. })
    ));
    assert!(matches!(
        log_matmul(&a, &Tensor::zeros(&[3, 4, 4])),
        Err(Error::ShapeMismatch { .. })
    ));
    assert!(matches!(
        log_matmul(&Tensor::zeros(&[3, 4]), &a),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_empty_dimensions() {
    // No inner terms: every output is the semiring zero
    let c = log_matmul(&Tensor::zeros(&[2, 3, 0]), &Tensor::zeros(&[2, 0, 4])).unwrap();
    assert_eq!(c.shape(), &[2, 3, 4]);
    assert!(c.as_slice().iter().all(|&v| v == NEG_INF));

    let c = log_matmul(&Tensor::zeros(&[0, 3, 2]), &Tensor::zeros(&[0, 2, 4])).unwrap();
    assert_eq!(c.numel(), 0);
}

// ============================================================================
// First order
// ============================================================================

#[test]
fn test_backward_matches_softmax_reference() {
    let mut rng = seeded_rng(3);
    let a = uniform(&mut rng, &[3, 8, 8], 2.0);
    let b = uniform(&mut rng, &[3, 8, 8], 2.0);
    let g = uniform(&mut rng, &[3, 8, 8], 1.0);

    let c = log_matmul(&a, &b).unwrap();
    let (grad_a, grad_b) = log_matmul_backward(&a, &b, &c, &g).unwrap();
    let (ref_a, ref_b) = reference_grads(&a, &b, &g);

    assert_allclose_f64(grad_a.as_slice(), &ref_a, 0.0, 1e-5, "grad_a");
    assert_allclose_f64(grad_b.as_slice(), &ref_b, 0.0, 1e-5, "grad_b");
}

#[test]
fn test_backward_unit_upstream_gives_row_stochastic_weights() {
    // With dC = 1 every output spreads mass 1 over j, so each row of dA sums
    // to p and all of dB sums to n·p per batch
    let mut rng = seeded_rng(5);
    let (n, m, p) = (4, 6, 3);
    let a = uniform(&mut rng, &[2, n, m], 1.0);
    let b = uniform(&mut rng, &[2, m, p], 1.0);
    let c = log_matmul(&a, &b).unwrap();

    let (grad_a, grad_b) = log_matmul_backward(&a, &b, &c, &Tensor::ones(&[2, n, p])).unwrap();
    for row in grad_a.as_slice().chunks(m) {
        assert!((row.iter().sum::<f64>() - p as f64).abs() < 1e-12);
    }
    for batch in grad_b.as_slice().chunks(m * p) {
        assert!((batch.iter().sum::<f64>() - (n * p) as f64).abs() < 1e-12);
    }
}

#[test]
fn test_backward_matches_finite_differences() {
    let mut rng = seeded_rng(17);
    let a = uniform(&mut rng, &[2, 3, 4], 1.0);
    let b = uniform(&mut rng, &[2, 4, 2], 1.0);
    let g = uniform(&mut rng, &[2, 3, 2], 1.0);

    let c = log_matmul(&a, &b).unwrap();
    let (grad_a, grad_b) = log_matmul_backward(&a, &b, &c, &g).unwrap();

    // L = <C, G>
    let loss = |a: &Tensor, b: &Tensor| dot(log_matmul(a, b).unwrap().as_slice(), g.as_slice());
    let fd_a = central_difference(a.as_slice(), 1e-6, |x| {
        loss(&Tensor::from_slice(x, a.shape()), &b)
    });
    let fd_b = central_difference(b.as_slice(), 1e-6, |x| {
        loss(&a, &Tensor::from_slice(x, b.shape()))
    });
    assert_allclose_f64(grad_a.as_slice(), &fd_a, 1e-6, 1e-7, "grad_a");
    assert_allclose_f64(grad_b.as_slice(), &fd_b, 1e-6, 1e-7, "grad_b");
}

// ============================================================================
// Second order
// ============================================================================

#[test]
fn test_double_backward_matches_finite_differences() {
    let mut rng = seeded_rng(23);
    let a = uniform(&mut rng, &[2, 3, 4], 1.0);
    let b = uniform(&mut rng, &[2, 4, 2], 1.0);
    let g = uniform(&mut rng, &[2, 3, 2], 1.0);
    let gg_a = uniform(&mut rng, &[2, 3, 4], 1.0);
    let gg_b = uniform(&mut rng, &[2, 4, 2], 1.0);

    let c = log_matmul(&a, &b).unwrap();
    let (h_a, h_b, h_g) =
        log_matmul_double_backward(&a, &b, &c, &g, Some(&gg_a), Some(&gg_b)).unwrap();

    // phi = <dA, ggA> + <dB, ggB>; its gradient is the second-order rule
    let phi = |a: &Tensor, b: &Tensor, g: &Tensor| {
        let c = log_matmul(a, b).unwrap();
        let (da, db) = log_matmul_backward(a, b, &c, g).unwrap();
        dot(da.as_slice(), gg_a.as_slice()) + dot(db.as_slice(), gg_b.as_slice())
    };
    let eps = 1e-5;
    let fd_a = central_difference(a.as_slice(), eps, |x| {
        phi(&Tensor::from_slice(x, a.shape()), &b, &g)
    });
    let fd_b = central_difference(b.as_slice(), eps, |x| {
        phi(&a, &Tensor::from_slice(x, b.shape()), &g)
    });
    let fd_g = central_difference(g.as_slice(), eps, |x| {
        phi(&a, &b, &Tensor::from_slice(x, g.shape()))
    });

    assert_allclose_f64(h_a.as_slice(), &fd_a, 1e-4, 1e-6, "h_a");
    assert_allclose_f64(h_b.as_slice(), &fd_b, 1e-4, 1e-6, "h_b");
    assert_allclose_f64(h_g.as_slice(), &fd_g, 1e-4, 1e-6, "h_grad_c");
}

#[test]
fn test_double_backward_is_linear_in_upstream() {
    let mut rng = seeded_rng(29);
    let a = uniform(&mut rng, &[1, 4, 3], 1.0);
    let b = uniform(&mut rng, &[1, 3, 5], 1.0);
    let g = uniform(&mut rng, &[1, 4, 5], 1.0);
    let gg_a = uniform(&mut rng, &[1, 4, 3], 1.0);
    let gg_b = uniform(&mut rng, &[1, 3, 5], 1.0);
    let c = log_matmul(&a, &b).unwrap();

    let joint = log_matmul_double_backward(&a, &b, &c, &g, Some(&gg_a), Some(&gg_b)).unwrap();
    let only_a = log_matmul_double_backward(&a, &b, &c, &g, Some(&gg_a), None).unwrap();
    let only_b = log_matmul_double_backward(&a, &b, &c, &g, None, Some(&gg_b)).unwrap();

    let sum = |x: &Tensor, y: &Tensor| x.add(y).unwrap().to_vec();
    assert_allclose_f64(joint.0.as_slice(), &sum(&only_a.0, &only_b.0), 0.0, 1e-12, "h_a");
    assert_allclose_f64(joint.1.as_slice(), &sum(&only_a.1, &only_b.1), 0.0, 1e-12, "h_b");
    assert_allclose_f64(joint.2.as_slice(), &sum(&only_a.2, &only_b.2), 0.0, 1e-12, "h_g");
}

#[test]
fn test_double_backward_rejects_bad_upstream() {
    let a = Tensor::zeros(&[1, 2, 3]);
    let b = Tensor::zeros(&[1, 3, 2]);
    let c = log_matmul(&a, &b).unwrap();
    let g = Tensor::ones(&[1, 2, 2]);
    assert!(matches!(
        log_matmul_double_backward(&a, &b, &c, &g, Some(&Tensor::zeros(&[1, 3, 2])), None),
        Err(Error::ShapeMismatch { .. })
    ));
    assert!(matches!(
        log_matmul_double_backward(&a, &b, &c, &Tensor::ones(&[1, 2, 3]), None, None),
        Err(Error::ShapeMismatch { .. })
    ));
}
