use anyhow::{ensure, Result};
use candle_core::{DType, Tensor};

/// Mean of the token vectors the mask keeps, scaled to unit length.
/// `hidden` is `[B, T, H]`, `attention_mask` is `[B, T]`; returns `[B, H]`.
/// Rows whose mask is all zero come back as zero vectors.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, tokens, width) = match hidden.dims() {
        &[b, t, h] => (b, t, h),
        other => anyhow::bail!("hidden states must be [B,T,H], got {:?}", other),
    };
    ensure!(attention_mask.dims() == [batch, tokens], "mask {:?} does not match hidden [{batch}, {tokens}, _]", attention_mask.dims());

    let dtype = hidden.dtype();
    let mask = attention_mask.to_device(hidden.device())?.to_dtype(dtype)?;
    let summed = hidden.broadcast_mul(&mask.unsqueeze(2)?)?.sum(1)?;
    let counts = mask.sum_keepdim(1)?.maximum(1.0)?;
    let mean = summed.broadcast_div(&counts)?;

    let eps = if dtype == DType::F16 { 1e-6 } else { 1e-12 };
    let norms = (mean.sqr()?.sum_keepdim(1)?.sqrt()? + eps)?;
    let pooled = mean.broadcast_div(&norms)?;
    ensure!(pooled.dims() == [batch, width], "pooled shape {:?}", pooled.dims());
    Ok(pooled)
}
