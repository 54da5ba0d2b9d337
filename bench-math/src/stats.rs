//! Sample statistics over weighted and unweighted particle sets.

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`), `None` for an empty slice.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let var = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Scale `weights` in place so they sum to one.
///
/// Falls back to uniform weights when the total is zero or not finite.
/// Returns the total before normalisation.
pub fn normalize(weights: &mut [f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() {
        return total;
    }
    if total > 0.0 && total.is_finite() {
        weights.iter_mut().for_each(|w| *w /= total);
    } else {
        let uniform = 1.0 / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = uniform);
    }
    total
}

/// Running sum of `weights`; the last entry is the total.
pub fn cumulative_sum(weights: &[f64]) -> Vec<f64> {
    weights
        .iter()
        .scan(0.0, |acc, w| {
            *acc += w;
            Some(*acc)
        })
        .collect()
}
