// Tests for gate forward propagation: f(x·W + b) against hand-computed values.

use approx::assert_relative_eq;
use ndarray::{array, Array1, Array2};
use recurring_nn::config::GateConfig;
use recurring_nn::layers::{Gate, Recurring};
use recurring_nn::server::VarServer;
use recurring_nn::utils::activations::{sigmoid, ActivationKind};
use recurring_nn::ModuleError;

// Reference affine map with explicit loops.
fn affine(x: &Array2<f64>, w: &Array2<f64>, b: &Array1<f64>) -> Array2<f64> {
    let (batch, in_features) = x.dim();
    let out_features = w.ncols();
    let mut z = Array2::zeros((batch, out_features));
    for r in 0..batch {
        for c in 0..out_features {
            let mut acc = b[c];
            for k in 0..in_features {
                acc += x[[r, k]] * w[[k, c]];
            }
            z[[r, c]] = acc;
        }
    }
    z
}

fn gate_with(w: Array2<f64>, b: Array1<f64>, kind: ActivationKind) -> Gate {
    let mut server = VarServer::new(42);
    let config = GateConfig::new(w.nrows(), w.ncols())
        .with_activation(kind)
        .with_transfer(w, b);
    Gate::new(&mut server, &config).unwrap()
}

#[test]
fn test_forward_sigmoid_known_values() {
    let w = array![[0.5, -1.0, 0.25], [1.5, 0.0, -0.75]];
    let b = array![0.1, -0.2, 0.3];
    let x = array![[1.0, 2.0], [-1.0, 0.5], [0.0, 0.0]];
    let mut gate = gate_with(w.clone(), b.clone(), ActivationKind::Sigmoid);

    let y = gate.forward(x.view()).unwrap();
    let z = affine(&x, &w, &b);

    assert_eq!(y.dim(), (3, 3));
    for (yv, zv) in y.iter().zip(z.iter()) {
        assert_relative_eq!(*yv, sigmoid(*zv), epsilon = 1e-6);
    }
}

#[test]
fn test_forward_single_value_by_hand() {
    // z = 2*0.5 + 3*(-1) + 0.5 = -1.5
    let mut gate = gate_with(array![[0.5], [-1.0]], array![0.5], ActivationKind::Tanh);
    let y = gate.forward(array![[2.0, 3.0]].view()).unwrap();

    assert_relative_eq!(y[[0, 0]], (-1.5f64).tanh(), epsilon = 1e-12);
}

#[test]
fn test_forward_each_activation() {
    let w = array![[1.0, -2.0], [0.5, 0.5]];
    let b = array![-0.5, 0.25];
    let x = array![[0.3, -0.7], [2.0, 1.0]];
    let z = affine(&x, &w, &b);

    for kind in ActivationKind::ALL {
        let mut gate = gate_with(w.clone(), b.clone(), kind);
        let y = gate.forward(x.view()).unwrap();

        for (yv, &zv) in y.iter().zip(z.iter()) {
            let expected = match kind {
                ActivationKind::Sigmoid => sigmoid(zv),
                ActivationKind::Tanh => zv.tanh(),
                ActivationKind::Relu => zv.max(0.0),
                ActivationKind::Identity => zv,
            };
            assert_relative_eq!(*yv, expected, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_forward_does_not_touch_parameters() {
    let w = array![[1.0, 2.0], [3.0, 4.0]];
    let b = array![0.0, 1.0];
    let mut gate = gate_with(w.clone(), b.clone(), ActivationKind::Sigmoid);

    for _ in 0..3 {
        gate.forward(array![[1.0, 1.0]].view()).unwrap();
    }

    assert_eq!(*gate.weight().value(), w);
    assert_eq!(*gate.bias().value(), b);
    assert!(gate.weight().grad().iter().all(|&g| g == 0.0));
    assert_eq!(gate.depth(), 3);
}

#[test]
fn test_forward_accepts_views() {
    let w = array![[1.0], [1.0]];
    let mut gate = gate_with(w, array![0.0], ActivationKind::Identity);
    let big = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];

    // Column slice view of the last two columns
    let y = gate.forward(big.slice(ndarray::s![.., 1..]).view()).unwrap();
    assert_eq!(y, array![[5.0], [11.0]]);
}

#[test]
fn test_forward_dimension_mismatch() {
    let mut gate = gate_with(array![[1.0], [1.0]], array![0.0], ActivationKind::Identity);
    let err = gate.forward(array![[1.0, 2.0, 3.0]].view()).unwrap_err();

    match err {
        ModuleError::ShapeMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, vec![1, 2]);
            assert_eq!(actual, vec![1, 3]);
        }
        other => panic!("expected ShapeMismatch, got {}", other),
    }
    assert_eq!(gate.depth(), 0);
}
