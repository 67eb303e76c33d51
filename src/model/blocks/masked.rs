use burn::prelude::*;

/// [N, F, T] sensor mask -> [N, T] with 1.0 where any sensor was observed.
pub fn observed_steps<B: Backend>(sensor_mask: Tensor<B, 3>) -> Tensor<B, 2> {
    let [n, _, t] = sensor_mask.dims();
    sensor_mask.sum_dim(1).reshape([n, t]).clamp_max(1.0)
}

/// Mean of `[N, T, D]` over the steps weighted by `[N, T]`; rows without
/// weight yield zeros.
pub fn masked_mean<B: Backend>(hidden: Tensor<B, 3>, weights: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, t, d] = hidden.dims();
    let weights = weights.reshape([n, t, 1]);
    let total = weights.clone().sum_dim(1).reshape([n, 1]).clamp_min(1.0);
    (hidden * weights).sum_dim(1).reshape([n, d]) / total
}

/// Values and mask stacked per step: [N, F, T] x 2 -> [N, T, 2F].
pub fn step_features<B: Backend>(x: Tensor<B, 3>, sensor_mask: Tensor<B, 3>) -> Tensor<B, 3> {
    Tensor::cat(vec![x, sensor_mask], 1).swap_dims(1, 2)
}
