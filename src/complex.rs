use num_complex::Complex;

/// The type of baseband samples moving to and from the front end
pub type IqSample = Complex<f32>;

/// Mean magnitude of one channel's samples.
///
/// This is the convergence signal for gain calibration. An empty slice
/// estimates to zero.
pub fn estimate_amplitude(samples: &[IqSample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    // Accumulate in f64, captures are long enough for f32 sums to drift
    let sum: f64 = samples.iter().map(|s| s.norm() as f64).sum();
    (sum / samples.len() as f64) as f32
}

/// Undo the sign convention mismatch between the tx and rx mixer models
/// by taking the conjugate of every sample in place.
pub fn conjugate_in_place(samples: &mut [IqSample]) {
    for s in samples.iter_mut() {
        s.im = -s.im;
    }
}

/// One period of a complex sinusoid with `period_len` samples
pub fn complex_sinusoid(period_len: usize, amplitude: f32) -> Vec<IqSample> {
    (0..period_len)
        .map(|n| {
            let phase = 2.0 * std::f64::consts::PI * n as f64 / period_len as f64;
            IqSample::from_polar(amplitude, phase as f32)
        })
        .collect()
}
