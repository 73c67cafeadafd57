//! Backward pass implementation
//!
//! Implements reverse-mode automatic differentiation using topological sort
//! to traverse the computation graph and accumulate gradients.
//!
//! Two flavours exist. [`backward`] / [`grad`] call [`GradFn::backward`] and
//! return plain tensors. [`backward_with_graph`] / [`grad_with_graph`] call
//! [`GradFn::backward_var`], so every returned gradient is itself a [`Var`]
//! that can be fed to another backward pass.

use super::{GradFn, GradStore, Var, VarGradStore, var_add};
use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Compute gradients of a scalar loss
///
/// Seeds `dL/dL = 1` and delegates to [`grad`].
pub fn backward(loss: &Var) -> Result<GradStore> {
    check_scalar_loss(loss)?;
    grad(&[loss], &[Tensor::ones(loss.shape())])
}

/// Compute gradients of `outputs` given upstream gradients `grad_outputs`
///
/// `grad_outputs[i]` must have the shape of `outputs[i]`. The returned store
/// holds a gradient for every node reached from the outputs.
///
/// # Example
///
/// ```
/// use logbmm::autograd::{Var, grad, var_log_matmul};
/// use logbmm::tensor::Tensor;
///
/// let a = Var::new(Tensor::rand(&[2, 3, 4]), true);
/// let b = Var::new(Tensor::rand(&[2, 4, 5]), true);
/// let c = var_log_matmul(&a, &b)?;
///
/// let grads = grad(&[&c], &[Tensor::ones(&[2, 3, 5])])?;
/// assert_eq!(grads.get(a.id()).unwrap().shape(), &[2, 3, 4]);
/// # Ok::<(), logbmm::error::Error>(())
/// ```
pub fn grad(outputs: &[&Var], grad_outputs: &[Tensor]) -> Result<GradStore> {
    check_seeds(outputs, grad_outputs.iter().map(Tensor::shape))?;

    let mut grad_store = GradStore::new();
    for (output, seed) in outputs.iter().zip(grad_outputs) {
        grad_store.accumulate(output.id(), seed.clone())?;
    }

    let topo_order = topological_sort(outputs);
    debug!(nodes = topo_order.len(), "backward");

    for (var_id, grad_fn_opt, input_ids) in topo_order.into_iter().rev() {
        let Some(grad_fn) = grad_fn_opt else {
            continue;
        };
        let grad_output = match grad_store.get(var_id) {
            Some(g) => g.clone(),
            None => continue, // No gradient flowing to this node
        };

        let input_grads = grad_fn.backward(&grad_output)?;
        check_arity(grad_fn.as_ref(), input_grads.len(), input_ids.len())?;

        for (input_id, input_grad) in input_ids.iter().zip(input_grads) {
            if let Some(input_grad) = input_grad {
                grad_store.accumulate(*input_id, input_grad)?;
            }
        }
    }

    Ok(grad_store)
}

/// Differentiable gradients of a scalar loss
pub fn backward_with_graph(loss: &Var) -> Result<VarGradStore> {
    check_scalar_loss(loss)?;
    let seed = Var::new(Tensor::ones(loss.shape()), false);
    grad_with_graph(&[loss], &[seed])
}

/// Differentiable gradients of `outputs` given upstream gradients
///
/// The seeds are `Var`s: if a seed requires grad, second-order passes also
/// produce gradients with respect to it.
pub fn grad_with_graph(outputs: &[&Var], grad_outputs: &[Var]) -> Result<VarGradStore> {
    check_seeds(outputs, grad_outputs.iter().map(Var::shape))?;

    let mut grad_store = VarGradStore::new();
    for (output, seed) in outputs.iter().zip(grad_outputs) {
        grad_store.try_accumulate(output.id(), seed.clone(), |a, b| var_add(&a, &b))?;
    }

    let topo_order = topological_sort(outputs);
    debug!(nodes = topo_order.len(), "backward_with_graph");

    for (var_id, grad_fn_opt, input_ids) in topo_order.into_iter().rev() {
        let Some(grad_fn) = grad_fn_opt else {
            continue;
        };
        let grad_output = match grad_store.get_var(var_id) {
            Some(g) => g.clone(),
            None => continue,
        };

        let input_grads = grad_fn.backward_var(&grad_output)?;
        check_arity(grad_fn.as_ref(), input_grads.len(), input_ids.len())?;

        for (input_id, input_grad) in input_ids.iter().zip(input_grads) {
            if let Some(input_grad) = input_grad {
                grad_store.try_accumulate(*input_id, input_grad, |a, b| var_add(&a, &b))?;
            }
        }
    }

    Ok(grad_store)
}

fn check_scalar_loss(loss: &Var) -> Result<()> {
    if loss.numel() != 1 {
        return Err(Error::ShapeMismatch {
            expected: vec![1],
            got: loss.shape().to_vec(),
        });
    }
    if !loss.requires_grad() {
        return Err(Error::Internal(
            "backward() called on tensor that doesn't require grad".into(),
        ));
    }
    Ok(())
}

fn check_seeds<'a>(
    outputs: &[&Var],
    seed_shapes: impl ExactSizeIterator<Item = &'a [usize]>,
) -> Result<()> {
    if seed_shapes.len() != outputs.len() {
        return Err(Error::InvalidArgument {
            arg: "grad_outputs",
            reason: format!(
                "expected {} upstream gradients, got {}",
                outputs.len(),
                seed_shapes.len()
            ),
        });
    }
    for (output, shape) in outputs.iter().zip(seed_shapes) {
        if output.shape() != shape {
            return Err(Error::shape_mismatch(output.shape(), shape));
        }
    }
    Ok(())
}

fn check_arity(grad_fn: &dyn GradFn, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(Error::Internal(format!(
            "{} returned {} gradients for {} inputs",
            grad_fn.name(),
            got,
            expected
        )));
    }
    Ok(())
}

/// Entry for topological sort: (tensor_id, grad_fn, input_ids)
type TopoEntry = (TensorId, Option<Arc<dyn GradFn>>, Vec<TensorId>);

/// Build topological sort of the graph under `roots` using DFS post-order
///
/// Returns nodes in topological order (inputs before outputs). The visited
/// set is shared between roots, so every node appears once.
fn topological_sort(roots: &[&Var]) -> Vec<TopoEntry> {
    let mut result = Vec::new();
    let mut visited = HashSet::new();

    fn dfs(
        id: TensorId,
        grad_fn: Option<Arc<dyn GradFn>>,
        visited: &mut HashSet<TensorId>,
        result: &mut Vec<TopoEntry>,
    ) {
        if !visited.insert(id) {
            return;
        }

        let input_ids: Vec<TensorId> = grad_fn
            .as_ref()
            .map(|gf| gf.inputs().to_vec())
            .unwrap_or_default();

        if let Some(gf) = &grad_fn {
            for (input_id, input_grad_fn) in input_ids.iter().zip(gf.input_grad_fns()) {
                dfs(*input_id, input_grad_fn, visited, result);
            }
        }

        result.push((id, grad_fn, input_ids));
    }

    for root in roots {
        dfs(root.id(), root.grad_fn().cloned(), &mut visited, &mut result);
    }
    result
}
