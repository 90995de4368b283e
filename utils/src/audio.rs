use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Builds a mono resampler converting `in_rate` to `out_rate`, consuming
/// fixed windows of `chunk_size` input frames.
pub fn create_resampler(
    in_rate: f64,
    out_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_rate / in_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Runs `samples` through the resampler window by window, zero-padding the
/// final window, and returns the concatenated output. A window that fails to
/// resample is logged and skipped.
pub fn resample_all(resampler: &mut FastFixedIn<f32>, samples: &[f32]) -> Vec<f32> {
    let window = resampler.input_frames_next();
    let mut out = Vec::with_capacity(samples.len() * 2);
    for chunk in samples.chunks(window) {
        let mut chunk = chunk.to_vec();
        chunk.resize(window, 0.0);
        match resampler.process(&[chunk], None) {
            Ok(mut channels) => {
                if let Some(mono) = channels.pop() {
                    out.extend(mono);
                }
            }
            Err(e) => tracing::warn!("failed to resample a window: {}", e),
        }
    }
    out
}
